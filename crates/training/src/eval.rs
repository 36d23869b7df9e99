//! Held-out evaluation: detection mAP and scene accuracy.

use crate::error::{TrainError, TrainResult};
use crate::model::{DetectionModel, Prediction};
use crate::scorer::{DetectionRecords, DetectionScorer, Voc07Scorer};
use curb_dataset::{EvalSample, Prefetcher, SampleProvider};

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub map: f64,
    pub ap: Vec<Option<f64>>,
    /// Scene hits over evaluated images.
    pub accuracy: f64,
    pub evaluated: usize,
    pub scene_hits: usize,
}

pub struct EvalLoop {
    scorer: Box<dyn DetectionScorer>,
    test_num: usize,
    workers: usize,
}

impl EvalLoop {
    pub fn new(test_num: usize, workers: usize) -> Self {
        Self::with_scorer(Box::new(Voc07Scorer::default()), test_num, workers)
    }

    pub fn with_scorer(scorer: Box<dyn DetectionScorer>, test_num: usize, workers: usize) -> Self {
        Self {
            scorer,
            test_num,
            workers,
        }
    }

    pub fn test_num(&self) -> usize {
        self.test_num
    }

    /// Predict on at most `test_num` samples, in provider order.
    pub fn run<M, P>(&self, model: &mut M, provider: &P) -> TrainResult<EvalReport>
    where
        M: DetectionModel + ?Sized,
        P: SampleProvider<Item = EvalSample>,
    {
        let mut records = DetectionRecords::default();
        let mut evaluated = 0usize;

        for sample in Prefetcher::sequential(provider, self.workers, Some(self.test_num)) {
            let sample = sample?;
            let pred = predict_one(model, &sample)?;
            warn_mixed_scenes(&sample);
            records.pred_scenes.push(pred.scene);
            records.gt_scenes.push(sample.scene);
            records.pred_boxes.push(pred.boxes);
            records.pred_labels.push(pred.labels);
            records.pred_scores.push(pred.scores);
            records.gt_boxes.push(sample.boxes);
            records.gt_labels.push(sample.labels);
            records.gt_difficult.push(sample.difficult);
            evaluated += 1;
        }

        let score = self.scorer.score(&records);
        let scene_hits = records.scene_hits();
        let accuracy = if evaluated == 0 {
            0.0
        } else {
            scene_hits as f64 / evaluated as f64
        };
        log::debug!(
            "evaluated {evaluated} images: map={:.4} accuracy={accuracy:.4}",
            score.map
        );
        Ok(EvalReport {
            map: score.map,
            ap: score.ap,
            accuracy,
            evaluated,
            scene_hits,
        })
    }
}

fn predict_one<M>(model: &mut M, sample: &EvalSample) -> TrainResult<Prediction>
where
    M: DetectionModel + ?Sized,
{
    let preds = model
        .predict(std::slice::from_ref(&sample.image), &[sample.original_size])
        .map_err(TrainError::Model)?;
    preds.into_iter().next().ok_or_else(|| {
        TrainError::Model(format!("model returned no prediction for {}", sample.id).into())
    })
}

/// Scene accuracy scores against the first label; flag records that disagree.
fn warn_mixed_scenes(sample: &EvalSample) {
    let Some(first) = sample.scene.first() else {
        return;
    };
    if sample.scene.iter().any(|s| s != first) {
        log::warn!(
            "{} carries differing scene labels {:?}; scoring against {first}",
            sample.id,
            sample.scene
        );
    }
}

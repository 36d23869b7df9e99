//! Inference-only pass emitting the best box per image.

use crate::error::{TrainError, TrainResult};
use crate::model::DetectionModel;
use curb_dataset::{BoxYxyx, Prefetcher, PredictSample, SampleProvider, Scene};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Highest-scoring detection of one image, in original pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub image_id: String,
    pub bbox: BoxYxyx,
    pub score: f32,
    pub scene: Scene,
}

impl PredictionRecord {
    pub fn scene_name(&self) -> &'static str {
        self.scene.name()
    }

    /// `{"<image_id>": [ymin, xmin, ymax, xmax]}`
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(
            self.image_id.clone(),
            Value::from(self.bbox.iter().map(|v| *v as f64).collect::<Vec<f64>>()),
        );
        Value::Object(obj)
    }
}

pub struct PredictLoop {
    predict_num: usize,
    workers: usize,
}

impl PredictLoop {
    pub fn new(predict_num: usize, workers: usize) -> Self {
        Self {
            predict_num,
            workers,
        }
    }

    /// Predict over at most `predict_num` images. Images with no detections are
    /// skipped with a warning.
    pub fn run<M, P>(&self, model: &mut M, provider: &P) -> TrainResult<Vec<PredictionRecord>>
    where
        M: DetectionModel + ?Sized,
        P: SampleProvider<Item = PredictSample>,
    {
        let mut records = Vec::new();
        for sample in Prefetcher::sequential(provider, self.workers, Some(self.predict_num)) {
            let sample = sample?;
            let pred = model
                .predict(std::slice::from_ref(&sample.image), &[sample.original_size])
                .map_err(TrainError::Model)?
                .into_iter()
                .next();
            let Some(pred) = pred else {
                log::warn!("{}: model returned no prediction; skipped", sample.id);
                continue;
            };
            let best = pred
                .best_index()
                .and_then(|i| Some((*pred.boxes.get(i)?, *pred.scores.get(i)?)));
            let Some((bbox, score)) = best else {
                log::warn!("{}: no boxes predicted; skipped", sample.id);
                continue;
            };
            log::debug!("{}: scene {}", sample.id, pred.scene);
            records.push(PredictionRecord {
                image_id: sample.id,
                bbox,
                score,
                scene: pred.scene,
            });
        }
        log::info!("predicted {} images", records.len());
        Ok(records)
    }
}

/// Write records as a JSON list, creating parent directories.
pub fn write_predictions(path: &Path, records: &[PredictionRecord]) -> TrainResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| TrainError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let list = Value::Array(records.iter().map(PredictionRecord::to_json).collect());
    let body = serde_json::to_string_pretty(&list).map_err(|source| TrainError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, body).map_err(|source| TrainError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("wrote {} predictions to {}", records.len(), path.display());
    Ok(())
}

#![allow(dead_code)]

use curb_dataset::{
    ChwImage, DatasetError, DatasetResult, EvalSample, ImageSize, Label, SampleProvider, Scene,
    TrainSample,
};
use ndarray::Array3;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use training::{
    CheckpointTags, DetectionModel, DetectionRecords, DetectionScorer, ModelError, Prediction,
    ScoreReport, StepOutput,
};

/// Serves clones of pre-built samples.
pub struct VecProvider<T>(pub Vec<T>);

impl<T: Clone + Send + Sync> SampleProvider for VecProvider<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.0.len()
    }

    fn get(&self, index: usize) -> DatasetResult<T> {
        self.0.get(index).cloned().ok_or(DatasetError::OutOfRange {
            index,
            len: self.0.len(),
        })
    }
}

pub fn image(h: usize, w: usize) -> ChwImage {
    Array3::from_elem((3, h, w), 0.25)
}

pub fn train_samples(n: usize) -> VecProvider<TrainSample> {
    VecProvider(
        (0..n)
            .map(|i| TrainSample {
                id: format!("train_{i}"),
                image: image(16, 16),
                boxes: vec![[2.0, 2.0, 10.0, 12.0]],
                labels: vec![Label::Curb],
                scale: 1.0,
                scene: vec![Scene::Obstacle],
            })
            .collect(),
    )
}

pub fn eval_samples(n: usize, scene: Option<Scene>) -> VecProvider<EvalSample> {
    VecProvider(
        (0..n)
            .map(|i| EvalSample {
                id: format!("test_{i}"),
                image: image(16, 16),
                original_size: ImageSize {
                    height: 32,
                    width: 32,
                },
                boxes: vec![[4.0, 4.0, 20.0, 20.0]],
                labels: vec![Label::Curb],
                difficult: vec![false],
                scene: scene.into_iter().collect(),
            })
            .collect(),
    )
}

/// Model double: during evaluation it predicts the matching scene for the first
/// `hits[epoch]` images of a `test_len`-image split.
pub struct ScriptedModel {
    pub test_len: usize,
    pub hits: Vec<usize>,
    pub dir: PathBuf,
    pub lr: f64,
    pub predict_calls: usize,
    pub train_steps: usize,
    pub saves: Vec<CheckpointTags>,
    pub loads: Vec<PathBuf>,
    pub fail_train: bool,
}

impl ScriptedModel {
    pub fn new(dir: &Path, test_len: usize, hits: Vec<usize>) -> Self {
        Self {
            test_len,
            hits,
            dir: dir.to_path_buf(),
            lr: 1e-3,
            predict_calls: 0,
            train_steps: 0,
            saves: Vec::new(),
            loads: Vec::new(),
            fail_train: false,
        }
    }
}

impl DetectionModel for ScriptedModel {
    fn train_step(&mut self, sample: &TrainSample) -> Result<StepOutput, ModelError> {
        if self.fail_train {
            return Err(format!("diverged on {}", sample.id).into());
        }
        self.train_steps += 1;
        Ok(StepOutput {
            losses: vec![("box".into(), 0.5), ("total".into(), 1.0)],
            rpn_pairs: vec![(1, 1), (0, 0)],
            roi_pairs: vec![(1, 1)],
        })
    }

    fn predict(
        &mut self,
        images: &[ChwImage],
        sizes: &[ImageSize],
    ) -> Result<Vec<Prediction>, ModelError> {
        let mut out = Vec::new();
        for (_, size) in images.iter().zip(sizes) {
            let epoch = self.predict_calls / self.test_len.max(1);
            let idx = self.predict_calls % self.test_len.max(1);
            self.predict_calls += 1;
            let hit = idx < self.hits.get(epoch).copied().unwrap_or(0);
            out.push(Prediction {
                boxes: vec![[0.0, 0.0, size.height as f32 / 2.0, size.width as f32 / 2.0]],
                labels: vec![Label::Curb],
                scores: vec![0.9],
                scene: if hit {
                    Scene::Obstacle
                } else {
                    Scene::Intersection
                },
            });
        }
        Ok(out)
    }

    fn save(&mut self, tags: &CheckpointTags) -> Result<PathBuf, ModelError> {
        self.saves.push(*tags);
        let path = self.dir.join(format!("ckpt_{}.bin", self.saves.len()));
        std::fs::write(&path, b"state")?;
        Ok(path)
    }

    fn load(&mut self, path: &Path) -> Result<(), ModelError> {
        if !path.exists() {
            return Err(format!("no checkpoint at {}", path.display()).into());
        }
        self.loads.push(path.to_path_buf());
        Ok(())
    }

    fn scale_lr(&mut self, factor: f64) {
        self.lr *= factor;
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }
}

/// Returns queued map values in order, then zero.
pub struct ScriptedScorer {
    maps: RefCell<VecDeque<f64>>,
}

impl ScriptedScorer {
    pub fn new(maps: &[f64]) -> Self {
        Self {
            maps: RefCell::new(maps.iter().copied().collect()),
        }
    }
}

impl DetectionScorer for ScriptedScorer {
    fn score(&self, _records: &DetectionRecords) -> ScoreReport {
        let map = self.maps.borrow_mut().pop_front().unwrap_or(0.0);
        ScoreReport {
            ap: vec![Some(map)],
            map,
        }
    }
}

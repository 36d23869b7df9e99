//! Seam between the orchestration loops and a concrete detector.

use crate::error::ModelError;
use curb_dataset::{BoxYxyx, ChwImage, ImageSize, Label, Scene, TrainSample};
use std::path::{Path, PathBuf};

/// Loss components and confusion observations from one training step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Named loss components, e.g. `("box", 0.4)`. A `"total"` entry is expected.
    pub losses: Vec<(String, f32)>,
    /// `(actual, predicted)` pairs for the proposal stage (background = 0, object = 1).
    pub rpn_pairs: Vec<(usize, usize)>,
    /// `(actual, predicted)` pairs for the classification head (background = 0, class `i` = `i + 1`).
    pub roi_pairs: Vec<(usize, usize)>,
}

impl StepOutput {
    pub fn total(&self) -> Option<f32> {
        self.losses
            .iter()
            .find(|(name, _)| name == "total")
            .map(|(_, v)| *v)
    }
}

/// Detections for a single image, in the coordinate space of the size passed to `predict`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub boxes: Vec<BoxYxyx>,
    pub labels: Vec<Label>,
    pub scores: Vec<f32>,
    pub scene: Scene,
}

impl Prediction {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Index of the highest-scoring box; the first one wins ties.
    pub fn best_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, s) in self.scores.iter().enumerate() {
            match best {
                Some(b) if self.scores[b] >= *s => {}
                _ => best = Some(i),
            }
        }
        best
    }
}

/// Metric tags stored alongside a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CheckpointTags {
    pub best_map: f64,
    pub best_accuracy: f64,
}

/// A trainable two-stage style detector with a scene head.
///
/// Implementations own their optimizer state. Errors are returned as-is and
/// surfaced by the loops as [`crate::TrainError::Model`].
pub trait DetectionModel {
    fn train_step(&mut self, sample: &TrainSample) -> Result<StepOutput, ModelError>;

    /// Predict boxes for each image, rescaled to the matching entry of `sizes`.
    fn predict(
        &mut self,
        images: &[ChwImage],
        sizes: &[ImageSize],
    ) -> Result<Vec<Prediction>, ModelError>;

    /// Persist current state and return where it was written.
    fn save(&mut self, tags: &CheckpointTags) -> Result<PathBuf, ModelError>;

    fn load(&mut self, path: &Path) -> Result<(), ModelError>;

    fn scale_lr(&mut self, factor: f64);

    fn learning_rate(&self) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_index_prefers_first_on_ties() {
        let p = Prediction {
            boxes: vec![[0.0; 4]; 3],
            labels: vec![Label::Curb; 3],
            scores: vec![0.2, 0.9, 0.9],
            scene: Scene::Obstacle,
        };
        assert_eq!(p.best_index(), Some(1));
        let empty = Prediction {
            boxes: vec![],
            labels: vec![],
            scores: vec![],
            scene: Scene::Obstacle,
        };
        assert_eq!(empty.best_index(), None);
    }

    #[test]
    fn total_loss_lookup() {
        let out = StepOutput {
            losses: vec![("box".into(), 0.5), ("total".into(), 1.5)],
            ..Default::default()
        };
        assert_eq!(out.total(), Some(1.5));
        assert_eq!(StepOutput::default().total(), None);
    }
}

//! Checkpoint persistence and learning-rate schedule decisions.

use crate::model::CheckpointTags;
use std::path::PathBuf;

/// A persisted model state with the metric tags it was saved under.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub path: PathBuf,
    pub tags: CheckpointTags,
    pub epoch: usize,
}

/// What the loop should do after an epoch's evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochDecision {
    pub map_improved: bool,
    pub accuracy_improved: bool,
    /// Reload the best checkpoint and decay the learning rate.
    pub decay: bool,
    pub stop: bool,
}

impl EpochDecision {
    /// One checkpoint per epoch, whichever objective improved.
    pub fn persist(&self) -> bool {
        self.map_improved || self.accuracy_improved
    }
}

/// Tracks the best map and accuracy seen so far (both start at zero and never decrease)
/// and the path of the most recent checkpoint.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    best_map: f64,
    best_accuracy: f64,
    best: Option<Checkpoint>,
    history: Vec<Checkpoint>,
    decay_epoch: usize,
    stop_epoch: usize,
}

impl SelectionPolicy {
    pub fn new(decay_epoch: usize, stop_epoch: usize) -> Self {
        Self {
            best_map: 0.0,
            best_accuracy: 0.0,
            best: None,
            history: Vec::new(),
            decay_epoch,
            stop_epoch,
        }
    }

    /// Both comparisons always run; strict improvement is required.
    pub fn observe(&mut self, epoch: usize, map: f64, accuracy: f64) -> EpochDecision {
        let map_improved = map > self.best_map;
        if map_improved {
            self.best_map = map;
        }
        let accuracy_improved = accuracy > self.best_accuracy;
        if accuracy_improved {
            self.best_accuracy = accuracy;
        }
        EpochDecision {
            map_improved,
            accuracy_improved,
            decay: epoch == self.decay_epoch,
            stop: epoch >= self.stop_epoch,
        }
    }

    pub fn tags(&self) -> CheckpointTags {
        CheckpointTags {
            best_map: self.best_map,
            best_accuracy: self.best_accuracy,
        }
    }

    /// Replaces the current best path.
    pub fn record(&mut self, checkpoint: Checkpoint) {
        self.history.push(checkpoint.clone());
        self.best = Some(checkpoint);
    }

    pub fn best_map(&self) -> f64 {
        self.best_map
    }

    pub fn best_accuracy(&self) -> f64 {
        self.best_accuracy
    }

    pub fn best(&self) -> Option<&Checkpoint> {
        self.best.as_ref()
    }

    /// Every checkpoint recorded this run, oldest first.
    pub fn history(&self) -> &[Checkpoint] {
        &self.history
    }
}

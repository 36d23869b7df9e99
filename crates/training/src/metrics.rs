//! Per-epoch running loss means and confusion counts.

use crate::model::StepOutput;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AverageMeter {
    sum: f64,
    count: u64,
}

impl AverageMeter {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Square count matrix indexed `[actual][predicted]`. Out-of-range pairs are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        Self {
            counts: vec![vec![0; classes]; classes],
        }
    }

    pub fn classes(&self) -> usize {
        self.counts.len()
    }

    pub fn add(&mut self, actual: usize, predicted: usize) -> bool {
        match self.counts.get_mut(actual).and_then(|row| row.get_mut(predicted)) {
            Some(cell) => {
                *cell += 1;
                true
            }
            None => false,
        }
    }

    pub fn rows(&self) -> &[Vec<u64>] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    /// Trace over total; zero when empty.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let hits: u64 = (0..self.classes()).map(|i| self.counts[i][i]).sum();
        hits as f64 / total as f64
    }

    pub fn reset(&mut self) {
        for row in &mut self.counts {
            row.iter_mut().for_each(|c| *c = 0);
        }
    }
}

/// Read-only copy of the accumulator, handed to visualizers and epoch reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterSnapshot {
    pub steps: u64,
    pub losses: BTreeMap<String, f64>,
    pub rpn_confusion: Vec<Vec<u64>>,
    pub roi_confusion: Vec<Vec<u64>>,
}

/// Owned by the training loop; reset at every epoch start.
#[derive(Debug, Clone)]
pub struct MetricAccumulator {
    steps: u64,
    losses: BTreeMap<String, AverageMeter>,
    rpn: ConfusionMatrix,
    roi: ConfusionMatrix,
    dropped_pairs: u64,
}

impl MetricAccumulator {
    /// `classes` counts foreground classes; the classification matrix adds background.
    pub fn new(classes: usize) -> Self {
        Self {
            steps: 0,
            losses: BTreeMap::new(),
            rpn: ConfusionMatrix::new(2),
            roi: ConfusionMatrix::new(classes + 1),
            dropped_pairs: 0,
        }
    }

    pub fn reset(&mut self) {
        self.steps = 0;
        self.losses.clear();
        self.rpn.reset();
        self.roi.reset();
        self.dropped_pairs = 0;
    }

    pub fn record(&mut self, out: &StepOutput) {
        self.steps += 1;
        for (name, value) in &out.losses {
            self.losses
                .entry(name.clone())
                .or_default()
                .add(*value as f64);
        }
        for &(a, p) in &out.rpn_pairs {
            if !self.rpn.add(a, p) {
                self.dropped_pairs += 1;
            }
        }
        for &(a, p) in &out.roi_pairs {
            if !self.roi.add(a, p) {
                self.dropped_pairs += 1;
            }
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        self.losses.get(name).map(AverageMeter::mean)
    }

    pub fn rpn(&self) -> &ConfusionMatrix {
        &self.rpn
    }

    pub fn roi(&self) -> &ConfusionMatrix {
        &self.roi
    }

    pub fn dropped_pairs(&self) -> u64 {
        self.dropped_pairs
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            steps: self.steps,
            losses: self
                .losses
                .iter()
                .map(|(k, m)| (k.clone(), m.mean()))
                .collect(),
            rpn_confusion: self.rpn.rows().to_vec(),
            roi_confusion: self.roi.rows().to_vec(),
        }
    }

    /// `name=value` pairs for log lines.
    pub fn summary(&self) -> String {
        self.losses
            .iter()
            .map(|(k, m)| format!("{k}={:.4}", m.mean()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(total: f32, rpn: Vec<(usize, usize)>) -> StepOutput {
        StepOutput {
            losses: vec![("total".into(), total)],
            rpn_pairs: rpn,
            roi_pairs: vec![(1, 1), (0, 1)],
        }
    }

    #[test]
    fn accumulates_means_and_counts() {
        let mut acc = MetricAccumulator::new(1);
        acc.record(&step(1.0, vec![(1, 1), (0, 0)]));
        acc.record(&step(3.0, vec![(1, 0)]));
        assert_eq!(acc.steps(), 2);
        assert_eq!(acc.mean("total"), Some(2.0));
        assert_eq!(acc.rpn().rows(), &[vec![1, 0], vec![1, 1]]);
        assert_eq!(acc.roi().total(), 4);
        assert!((acc.rpn().accuracy() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_everything() {
        let mut acc = MetricAccumulator::new(1);
        acc.record(&step(1.0, vec![(5, 0)]));
        assert_eq!(acc.dropped_pairs(), 1);
        acc.reset();
        let snap = acc.snapshot();
        assert_eq!(snap.steps, 0);
        assert!(snap.losses.is_empty());
        assert_eq!(acc.rpn().total(), 0);
        assert_eq!(acc.dropped_pairs(), 0);
    }
}

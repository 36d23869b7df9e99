//! Visualization side channel. Failures here are reported to the caller, which logs
//! and drops them.

use crate::metrics::MeterSnapshot;
use crate::model::Prediction;
use curb_dataset::BoxYxyx;
use image::RgbImage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use vision_core::prelude::{confusion_heatmap, draw_boxes, GT_COLOR, PRED_COLOR};

#[derive(Debug, Error)]
pub enum VisError {
    #[error("visualization io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode meters: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything a visualizer may draw at a plot step.
pub struct PlotFrame<'a> {
    pub epoch: usize,
    pub step: usize,
    pub id: &'a str,
    /// Denormalized network-space image.
    pub image: &'a RgbImage,
    pub gt_boxes: &'a [BoxYxyx],
    pub prediction: Option<&'a Prediction>,
    pub meters: &'a MeterSnapshot,
}

/// Per-epoch figures forwarded to the side channel.
#[derive(Debug, Clone, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub lr: f64,
    pub map: f64,
    pub accuracy: f64,
    pub losses: std::collections::BTreeMap<String, f64>,
}

pub trait Visualizer {
    fn plot(&mut self, frame: &PlotFrame<'_>) -> Result<(), VisError>;

    fn epoch(&mut self, _record: &EpochRecord) -> Result<(), VisError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVisualizer;

impl Visualizer for NullVisualizer {
    fn plot(&mut self, _frame: &PlotFrame<'_>) -> Result<(), VisError> {
        Ok(())
    }
}

/// Writes overlay PNGs, confusion heat maps and meter JSON under a directory.
#[derive(Debug, Clone)]
pub struct OverlayVisualizer {
    dir: PathBuf,
    thickness: u32,
}

impl OverlayVisualizer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            thickness: 2,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<(), VisError> {
        fs::create_dir_all(&self.dir).map_err(|source| VisError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    fn save_png(&self, name: &str, img: &RgbImage) -> Result<(), VisError> {
        let path = self.dir.join(name);
        img.save(&path)
            .map_err(|source| VisError::Image { path, source })
    }

    fn save_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), VisError> {
        let path = self.dir.join(name);
        let body = serde_json::to_vec_pretty(value)?;
        fs::write(&path, body).map_err(|source| VisError::Io { path, source })
    }
}

impl Visualizer for OverlayVisualizer {
    fn plot(&mut self, frame: &PlotFrame<'_>) -> Result<(), VisError> {
        self.ensure_dir()?;
        let stem = format!("e{:03}_s{:06}", frame.epoch, frame.step);

        let mut gt = frame.image.clone();
        draw_boxes(&mut gt, frame.gt_boxes, GT_COLOR, self.thickness);
        self.save_png(&format!("{stem}_gt.png"), &gt)?;

        if let Some(pred) = frame.prediction {
            let mut overlay = frame.image.clone();
            let drawn = draw_boxes(&mut overlay, &pred.boxes, PRED_COLOR, self.thickness);
            log::debug!("{}: drew {drawn}/{} predicted boxes", frame.id, pred.len());
            self.save_png(&format!("{stem}_pred.png"), &overlay)?;
        }

        self.save_png(
            &format!("{stem}_rpn_cm.png"),
            &confusion_heatmap(&frame.meters.rpn_confusion, 32),
        )?;
        self.save_png(
            &format!("{stem}_roi_cm.png"),
            &confusion_heatmap(&frame.meters.roi_confusion, 32),
        )?;
        self.save_json(&format!("{stem}_meters.json"), frame.meters)
    }

    fn epoch(&mut self, record: &EpochRecord) -> Result<(), VisError> {
        self.ensure_dir()?;
        self.save_json(&format!("epoch_{:03}.json", record.epoch), record)
    }
}

//! Core types, error definitions, and data structures for curb_dataset.

use crate::vocab::{Label, Scene};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("split manifest missing for '{split}': {path}")]
    MissingSplit { split: String, path: PathBuf },
    #[error("annotation record missing for '{id}': {path}")]
    AnnotationMissing { id: String, path: PathBuf },
    #[error("image file missing for '{id}': {path}")]
    ImageMissing { id: String, path: PathBuf },
    #[error("unknown class label '{name}' in {path}")]
    UnknownLabel { name: String, path: PathBuf },
    #[error("unknown scene type '{name}' in {path}")]
    UnknownScene { name: String, path: PathBuf },
    #[error("malformed annotation at {path}: {msg}")]
    Malformed { path: PathBuf, msg: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("xml parse error at {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("index {index} out of range for split of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("{0}")]
    Other(String),
}

/// Named partition of the corpus, resolved through `ImageSets/Main/<split>.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Test,
    Trainval,
    Predict,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
            Split::Trainval => "trainval",
            Split::Predict => "predict",
        }
    }

    /// The predict split carries images only; no annotation records are read.
    pub fn is_inference(&self) -> bool {
        matches!(self, Split::Predict)
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Split {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "test" => Ok(Split::Test),
            "trainval" => Ok(Split::Trainval),
            "predict" => Ok(Split::Predict),
            other => Err(DatasetError::Other(format!("unknown split '{other}'"))),
        }
    }
}

/// Bounding box as `[ymin, xmin, ymax, xmax]` in pixel coordinates.
pub type BoxYxyx = [f32; 4];

/// Image in CHW layout, RGB order, one `f32` per channel sample.
pub type ChwImage = Array3<f32>;

/// Original image extent, `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub height: usize,
    pub width: usize,
}

impl ImageSize {
    pub fn of(image: &ChwImage) -> Self {
        let (_, height, width) = image.dim();
        Self { height, width }
    }
}

/// One annotated image as parsed from disk, before any transform.
#[derive(Debug, Clone)]
pub struct Example {
    pub id: String,
    /// Pixel values in 0..=255.
    pub image: ChwImage,
    /// 0-based boxes, parallel to `labels`, `difficult` and `scene`.
    pub boxes: Vec<BoxYxyx>,
    pub labels: Vec<Label>,
    pub difficult: Vec<bool>,
    pub scene: Vec<Scene>,
}

impl Example {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Image-only record from the predict split.
#[derive(Debug, Clone)]
pub struct UnlabeledImage {
    pub id: String,
    pub image: ChwImage,
}

/// Output of the geometric transform.
#[derive(Debug, Clone)]
pub struct TransformResult {
    pub image: ChwImage,
    pub boxes: Vec<BoxYxyx>,
    pub labels: Vec<Label>,
    /// `output_height / input_height`.
    pub scale: f32,
}

/// Item handed to the training step.
#[derive(Debug, Clone)]
pub struct TrainSample {
    pub id: String,
    /// Normalized network input, standard layout.
    pub image: ChwImage,
    pub boxes: Vec<BoxYxyx>,
    pub labels: Vec<Label>,
    pub scale: f32,
    pub scene: Vec<Scene>,
}

/// Item handed to the evaluation loop; annotations stay in original pixel space.
#[derive(Debug, Clone)]
pub struct EvalSample {
    pub id: String,
    pub image: ChwImage,
    pub original_size: ImageSize,
    pub boxes: Vec<BoxYxyx>,
    pub labels: Vec<Label>,
    pub difficult: Vec<bool>,
    pub scene: Vec<Scene>,
}

/// Item handed to the prediction loop.
#[derive(Debug, Clone)]
pub struct PredictSample {
    pub id: String,
    pub image: ChwImage,
    pub original_size: ImageSize,
}

#![recursion_limit = "256"]
//! Training, evaluation, checkpoint selection and prediction loops for curb detection.
//!
//! The loops are written against the [`DetectionModel`] trait; the `burn-runtime`
//! feature adds a Burn baseline implementation and the `train`/`eval`/`predict` binaries.

#[cfg(feature = "burn-runtime")]
pub mod baseline;
pub mod config;
pub mod error;
pub mod eval;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod predict;
pub mod scorer;
pub mod train;
pub mod vis;

pub use config::{RunArgs, RunConfig};
pub use error::{ModelError, TrainError, TrainResult};
pub use eval::{EvalLoop, EvalReport};
pub use metrics::{ConfusionMatrix, MeterSnapshot, MetricAccumulator};
pub use model::{CheckpointTags, DetectionModel, Prediction, StepOutput};
pub use policy::{Checkpoint, EpochDecision, SelectionPolicy};
pub use predict::{write_predictions, PredictLoop, PredictionRecord};
pub use scorer::{DetectionRecords, DetectionScorer, ScoreReport, Voc07Scorer};
pub use train::{EpochReport, TrainLoop, TrainState, TrainSummary};
pub use vis::{NullVisualizer, OverlayVisualizer, PlotFrame, VisError, Visualizer};

#[cfg(feature = "burn-runtime")]
pub use baseline::{baseline_detector, BaselineConfig, BaselineDetector};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(all(feature = "burn-runtime", feature = "backend-wgpu"))]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(all(feature = "burn-runtime", not(feature = "backend-wgpu")))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

//! Dataset loading and augmentation for curb detection.
//!
//! This crate provides:
//! - Split manifests and VOC-style annotation parsing (`AnnotationStore`)
//! - Joint image/box resize and horizontal flip (`GeometricTransform`)
//! - The two backbone normalization conventions (`Normalizer`)
//! - Training, evaluation and inference sample providers
//! - Ordered read-ahead over providers and holdout split generation

pub mod aug;
pub mod normalize;
pub mod prefetch;
pub mod provider;
pub mod splits;
pub mod store;
pub mod types;
pub mod vocab;

pub use aug::{flip_key, DatasetConfig, GeometricTransform, GeometricTransformBuilder};
pub use normalize::Normalizer;
pub use prefetch::Prefetcher;
pub use provider::{EvaluationProvider, InferenceProvider, SampleProvider, TrainingProvider};
pub use splits::{holdout, HoldoutSummary};
pub use store::{AnnotationStore, StoreItem};
pub use types::*;
pub use vocab::{Label, Scene};

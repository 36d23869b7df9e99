use curb_dataset::DatasetError;
use std::path::PathBuf;
use thiserror::Error;

/// Error type produced by a [`crate::DetectionModel`] implementation.
pub type ModelError = Box<dyn std::error::Error + Send + Sync>;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("model: {0}")]
    Model(#[source] ModelError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write json to {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

//! Indexable sample streams for training, evaluation and inference.

use crate::aug::{flip_key, DatasetConfig, GeometricTransform};
use crate::normalize::Normalizer;
use crate::store::AnnotationStore;
use crate::types::{DatasetResult, EvalSample, ImageSize, PredictSample, Split, TrainSample};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Random-access source of samples.
pub trait SampleProvider: Sync {
    type Item: Send;

    fn len(&self) -> usize;

    fn get(&self, index: usize) -> DatasetResult<Self::Item>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Called by the training loop before each pass over the split.
    fn set_epoch(&self, _epoch: usize) {}
}

/// Store → resize + random flip → normalize.
#[derive(Debug)]
pub struct TrainingProvider {
    store: AnnotationStore,
    transform: GeometricTransform,
    normalizer: Normalizer,
    epoch: AtomicU64,
}

impl Clone for TrainingProvider {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            transform: self.transform.clone(),
            normalizer: self.normalizer,
            epoch: AtomicU64::new(self.epoch.load(Ordering::Relaxed)),
        }
    }
}

impl TrainingProvider {
    pub fn open(root: impl AsRef<Path>, split: Split, cfg: &DatasetConfig) -> DatasetResult<Self> {
        let store = AnnotationStore::open(root, split, cfg.use_difficult)?;
        Ok(Self::new(
            store,
            GeometricTransform::from_config(cfg),
            Normalizer::from_flag(cfg.caffe_pretrain),
        ))
    }

    pub fn new(store: AnnotationStore, transform: GeometricTransform, normalizer: Normalizer) -> Self {
        log::info!(
            "training provider: {} samples from {} ({}), {:?} normalization",
            store.len(),
            store.split(),
            transform.describe(),
            normalizer
        );
        Self {
            store,
            transform,
            normalizer,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn normalizer(&self) -> Normalizer {
        self.normalizer
    }
}

impl SampleProvider for TrainingProvider {
    type Item = TrainSample;

    fn len(&self) -> usize {
        self.store.len()
    }

    fn set_epoch(&self, epoch: usize) {
        self.epoch.store(epoch as u64, Ordering::Relaxed);
    }

    fn get(&self, index: usize) -> DatasetResult<TrainSample> {
        let example = self.store.example(index)?;
        let key = flip_key(self.epoch.load(Ordering::Relaxed), index as u64);
        let out = self
            .transform
            .apply_keyed(key, &example.image, &example.boxes, &example.labels);
        Ok(TrainSample {
            id: example.id,
            image: self.normalizer.normalize(&out.image),
            boxes: out.boxes,
            labels: out.labels,
            scale: out.scale,
            scene: example.scene,
        })
    }
}

/// Resize + normalize only; annotations stay in original pixel space.
#[derive(Debug, Clone)]
pub struct EvaluationProvider {
    store: AnnotationStore,
    transform: GeometricTransform,
    normalizer: Normalizer,
}

impl EvaluationProvider {
    /// Opens `split` with difficult objects retained so they can be ignored during scoring.
    pub fn open(root: impl AsRef<Path>, split: Split, cfg: &DatasetConfig) -> DatasetResult<Self> {
        let store = AnnotationStore::open(root, split, true)?;
        Ok(Self::new(
            store,
            GeometricTransform::from_config(cfg),
            Normalizer::from_flag(cfg.caffe_pretrain),
        ))
    }

    pub fn new(store: AnnotationStore, transform: GeometricTransform, normalizer: Normalizer) -> Self {
        Self {
            store,
            transform,
            normalizer,
        }
    }
}

impl SampleProvider for EvaluationProvider {
    type Item = EvalSample;

    fn len(&self) -> usize {
        self.store.len()
    }

    fn get(&self, index: usize) -> DatasetResult<EvalSample> {
        let example = self.store.example(index)?;
        let original_size = ImageSize::of(&example.image);
        let unit = example.image.mapv(|v| v / 255.0);
        let image = self.normalizer.normalize(&self.transform.resize(&unit));
        Ok(EvalSample {
            id: example.id,
            image,
            original_size,
            boxes: example.boxes,
            labels: example.labels,
            difficult: example.difficult,
            scene: example.scene,
        })
    }
}

/// Image, original size and id; no annotations.
#[derive(Debug, Clone)]
pub struct InferenceProvider {
    store: AnnotationStore,
    transform: GeometricTransform,
    normalizer: Normalizer,
}

impl InferenceProvider {
    pub fn open(root: impl AsRef<Path>, cfg: &DatasetConfig) -> DatasetResult<Self> {
        let store = AnnotationStore::open(root, Split::Predict, false)?;
        Ok(Self::new(
            store,
            GeometricTransform::from_config(cfg),
            Normalizer::from_flag(cfg.caffe_pretrain),
        ))
    }

    pub fn new(store: AnnotationStore, transform: GeometricTransform, normalizer: Normalizer) -> Self {
        Self {
            store,
            transform,
            normalizer,
        }
    }
}

impl SampleProvider for InferenceProvider {
    type Item = PredictSample;

    fn len(&self) -> usize {
        self.store.len()
    }

    fn get(&self, index: usize) -> DatasetResult<PredictSample> {
        let raw = self.store.image(index)?;
        let original_size = ImageSize::of(&raw.image);
        let unit = raw.image.mapv(|v| v / 255.0);
        Ok(PredictSample {
            id: raw.id,
            image: self.normalizer.normalize(&self.transform.resize(&unit)),
            original_size,
        })
    }
}

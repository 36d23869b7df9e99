//! Random train/test holdout over the annotation directory.

use crate::store::{ANNOTATIONS_DIR, MANIFEST_DIR};
use crate::types::{DatasetError, DatasetResult, Split};
use rand::seq::index::sample;
use rand::SeedableRng;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldoutSummary {
    pub train: Vec<String>,
    pub test: Vec<String>,
}

/// Partition every `Annotations/*.xml` id into `test` (`floor(n * ratio)` ids chosen
/// at random) and `train` (the rest), writing both manifests under `ImageSets/Main`.
pub fn holdout(root: &Path, ratio: f32, seed: Option<u64>) -> DatasetResult<HoldoutSummary> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(DatasetError::Other(format!(
            "holdout ratio {ratio} outside [0, 1]"
        )));
    }
    let anno_dir = root.join(ANNOTATIONS_DIR);
    let entries = fs::read_dir(&anno_dir).map_err(|e| DatasetError::Io {
        path: anno_dir.clone(),
        source: e,
    })?;
    let mut ids: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("xml"))
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
        .collect();
    ids.sort();

    let num_test = (ids.len() as f32 * ratio).floor() as usize;
    let mut rng = match seed {
        Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
        None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
    };
    let picked: HashSet<usize> = sample(&mut rng, ids.len(), num_test).into_iter().collect();

    let mut summary = HoldoutSummary {
        train: Vec::with_capacity(ids.len() - num_test),
        test: Vec::with_capacity(num_test),
    };
    for (i, id) in ids.into_iter().enumerate() {
        if picked.contains(&i) {
            summary.test.push(id);
        } else {
            summary.train.push(id);
        }
    }

    let manifest_dir = root.join(MANIFEST_DIR);
    fs::create_dir_all(&manifest_dir).map_err(|e| DatasetError::Io {
        path: manifest_dir.clone(),
        source: e,
    })?;
    write_manifest(&manifest_dir, Split::Test, &summary.test)?;
    write_manifest(&manifest_dir, Split::Train, &summary.train)?;
    log::info!(
        "holdout under {}: {} train / {} test",
        root.display(),
        summary.train.len(),
        summary.test.len()
    );
    Ok(summary)
}

fn write_manifest(dir: &Path, split: Split, ids: &[String]) -> DatasetResult<()> {
    let path = dir.join(format!("{}.txt", split.as_str()));
    let mut body = String::new();
    for id in ids {
        body.push_str(id);
        body.push('\n');
    }
    fs::write(&path, body).map_err(|e| DatasetError::Io { path, source: e })
}

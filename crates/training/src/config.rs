use std::path::{Path, PathBuf};

use clap::Args;
use curb_dataset::DatasetConfig;
use serde::Deserialize;

use crate::error::{TrainError, TrainResult};

const DEFAULT_PREDICT_FILE: &str = "predict_result.json";

/// Every knob of a training, evaluation or prediction run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub voc_data_dir: PathBuf,
    pub predict_voc_data_dir: PathBuf,
    pub min_size: u32,
    pub max_size: u32,
    pub caffe_pretrain: bool,
    pub use_difficult: bool,
    pub epoch: usize,
    pub decay_epoch: usize,
    pub stop_epoch: usize,
    pub test_num: usize,
    pub predict_num: usize,
    pub num_workers: usize,
    pub test_num_workers: usize,
    pub load_path: Option<PathBuf>,
    pub lr: f64,
    pub lr_decay: f64,
    pub plot_every: usize,
    pub vis_dir: Option<PathBuf>,
    pub checkpoint_dir: PathBuf,
    pub predict_output: Option<PathBuf>,
    pub seed: Option<u64>,
    pub debug_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            voc_data_dir: PathBuf::from("data/curb/VOC2007"),
            predict_voc_data_dir: PathBuf::from("data/curb/predict"),
            min_size: 224,
            max_size: 224,
            caffe_pretrain: false,
            use_difficult: false,
            epoch: 14,
            decay_epoch: 9,
            stop_epoch: 13,
            test_num: 10000,
            predict_num: 10000,
            num_workers: 8,
            test_num_workers: 8,
            load_path: None,
            lr: 1e-3,
            lr_decay: 0.1,
            plot_every: 40,
            vis_dir: None,
            checkpoint_dir: PathBuf::from("checkpoints"),
            predict_output: None,
            seed: None,
            debug_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RunConfigFile {
    voc_data_dir: Option<String>,
    predict_voc_data_dir: Option<String>,
    min_size: Option<u32>,
    max_size: Option<u32>,
    caffe_pretrain: Option<bool>,
    use_difficult: Option<bool>,
    epoch: Option<usize>,
    decay_epoch: Option<usize>,
    stop_epoch: Option<usize>,
    test_num: Option<usize>,
    predict_num: Option<usize>,
    num_workers: Option<usize>,
    test_num_workers: Option<usize>,
    load_path: Option<String>,
    lr: Option<f64>,
    lr_decay: Option<f64>,
    plot_every: Option<usize>,
    vis_dir: Option<String>,
    checkpoint_dir: Option<String>,
    predict_output: Option<String>,
    seed: Option<u64>,
    debug_file: Option<String>,
}

impl RunConfig {
    pub fn from_path(path: &Path) -> TrainResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| TrainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: RunConfigFile = toml::from_str(&raw).map_err(|source| TrainError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: RunConfigFile) -> Self {
        let d = RunConfig::default();
        RunConfig {
            voc_data_dir: file.voc_data_dir.map(|v| expand_path(&v)).unwrap_or(d.voc_data_dir),
            predict_voc_data_dir: file
                .predict_voc_data_dir
                .map(|v| expand_path(&v))
                .unwrap_or(d.predict_voc_data_dir),
            min_size: file.min_size.unwrap_or(d.min_size),
            max_size: file.max_size.unwrap_or(d.max_size),
            caffe_pretrain: file.caffe_pretrain.unwrap_or(d.caffe_pretrain),
            use_difficult: file.use_difficult.unwrap_or(d.use_difficult),
            epoch: file.epoch.unwrap_or(d.epoch),
            decay_epoch: file.decay_epoch.unwrap_or(d.decay_epoch),
            stop_epoch: file.stop_epoch.unwrap_or(d.stop_epoch),
            test_num: file.test_num.unwrap_or(d.test_num),
            predict_num: file.predict_num.unwrap_or(d.predict_num),
            num_workers: file.num_workers.unwrap_or(d.num_workers),
            test_num_workers: file.test_num_workers.unwrap_or(d.test_num_workers),
            load_path: file.load_path.map(|v| expand_path(&v)),
            lr: file.lr.unwrap_or(d.lr),
            lr_decay: file.lr_decay.unwrap_or(d.lr_decay),
            plot_every: file.plot_every.unwrap_or(d.plot_every),
            vis_dir: file.vis_dir.map(|v| expand_path(&v)),
            checkpoint_dir: file
                .checkpoint_dir
                .map(|v| expand_path(&v))
                .unwrap_or(d.checkpoint_dir),
            predict_output: file.predict_output.map(|v| expand_path(&v)),
            seed: file.seed,
            debug_file: file.debug_file.map(|v| expand_path(&v)),
        }
    }

    pub fn validate(&self) -> TrainResult<()> {
        if self.min_size == 0 || self.max_size == 0 {
            return Err(TrainError::Config(format!(
                "min_size/max_size must be positive (got {}/{})",
                self.min_size, self.max_size
            )));
        }
        if self.plot_every == 0 {
            return Err(TrainError::Config("plot_every must be at least 1".into()));
        }
        if self.lr.is_nan() || self.lr <= 0.0 {
            return Err(TrainError::Config(format!("lr must be positive (got {})", self.lr)));
        }
        if self.lr_decay.is_nan() || self.lr_decay <= 0.0 || self.lr_decay > 1.0 {
            return Err(TrainError::Config(format!(
                "lr_decay must be in (0, 1] (got {})",
                self.lr_decay
            )));
        }
        if self.stop_epoch < self.decay_epoch {
            log::warn!(
                "stop_epoch {} precedes decay_epoch {}; the decay never fires",
                self.stop_epoch,
                self.decay_epoch
            );
        }
        Ok(())
    }

    pub fn dataset(&self) -> DatasetConfig {
        DatasetConfig {
            min_size: self.min_size,
            max_size: self.max_size,
            caffe_pretrain: self.caffe_pretrain,
            use_difficult: self.use_difficult,
            seed: self.seed,
        }
    }

    pub fn predict_output_path(&self) -> PathBuf {
        self.predict_output
            .clone()
            .unwrap_or_else(|| self.predict_voc_data_dir.join(DEFAULT_PREDICT_FILE))
    }
}

/// Command-line overrides shared by the binaries; unset flags keep the file/default value.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// TOML file with run settings.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Dataset root containing ImageSets/, Annotations/ and JPEGImages/.
    #[arg(long)]
    pub voc_data_dir: Option<PathBuf>,
    /// Dataset root holding the predict split.
    #[arg(long)]
    pub predict_voc_data_dir: Option<PathBuf>,
    /// Target height.
    #[arg(long)]
    pub min_size: Option<u32>,
    /// Target width.
    #[arg(long)]
    pub max_size: Option<u32>,
    /// Use caffe-style normalization.
    #[arg(long)]
    pub caffe_pretrain: Option<bool>,
    /// Keep difficult objects in the training split.
    #[arg(long)]
    pub use_difficult: Option<bool>,
    #[arg(long)]
    pub epoch: Option<usize>,
    #[arg(long)]
    pub decay_epoch: Option<usize>,
    #[arg(long)]
    pub stop_epoch: Option<usize>,
    /// Evaluate at most this many test images.
    #[arg(long)]
    pub test_num: Option<usize>,
    /// Predict at most this many images.
    #[arg(long)]
    pub predict_num: Option<usize>,
    #[arg(long)]
    pub num_workers: Option<usize>,
    #[arg(long)]
    pub test_num_workers: Option<usize>,
    /// Checkpoint to load before running.
    #[arg(long)]
    pub load_path: Option<PathBuf>,
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long)]
    pub lr_decay: Option<f64>,
    #[arg(long)]
    pub plot_every: Option<usize>,
    /// Directory for overlay images and meter dumps.
    #[arg(long)]
    pub vis_dir: Option<PathBuf>,
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Prediction JSON path (defaults under the predict data root).
    #[arg(long)]
    pub predict_output: Option<PathBuf>,
    /// Seed for shuffling and flip decisions.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Sentinel file; when present at a plot step, accumulator state is logged.
    #[arg(long)]
    pub debug_file: Option<PathBuf>,
}

impl RunArgs {
    /// Defaults, then the config file, then flags; validated.
    pub fn resolve(&self) -> TrainResult<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::from_path(path)?,
            None => RunConfig::default(),
        };
        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field.clone() { cfg.$field = v; })*
            };
        }
        apply!(
            voc_data_dir,
            predict_voc_data_dir,
            min_size,
            max_size,
            caffe_pretrain,
            use_difficult,
            epoch,
            decay_epoch,
            stop_epoch,
            test_num,
            predict_num,
            num_workers,
            test_num_workers,
            lr,
            lr_decay,
            plot_every,
            checkpoint_dir,
        );
        if self.load_path.is_some() {
            cfg.load_path = self.load_path.clone();
        }
        if self.vis_dir.is_some() {
            cfg.vis_dir = self.vis_dir.clone();
        }
        if self.predict_output.is_some() {
            cfg.predict_output = self.predict_output.clone();
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        if self.debug_file.is_some() {
            cfg.debug_file = self.debug_file.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    if let Some(stripped) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(stripped);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(
            &path,
            "voc_data_dir = \"/data/voc\"\nepoch = 3\nlr = 0.01\nvis_dir = \"/tmp/vis\"\n",
        )
        .unwrap();
        let cfg = RunConfig::from_path(&path).unwrap();
        assert_eq!(cfg.voc_data_dir, PathBuf::from("/data/voc"));
        assert_eq!(cfg.epoch, 3);
        assert_eq!(cfg.lr, 0.01);
        assert_eq!(cfg.vis_dir, Some(PathBuf::from("/tmp/vis")));
        assert_eq!(cfg.decay_epoch, 9);
        assert_eq!(cfg.min_size, 224);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "epochs = 3\n").unwrap();
        assert!(matches!(
            RunConfig::from_path(&path),
            Err(TrainError::ConfigParse { .. })
        ));
    }

    #[test]
    fn flags_win_and_validation_runs() {
        let args = RunArgs {
            epoch: Some(2),
            seed: Some(7),
            ..Default::default()
        };
        let cfg = args.resolve().unwrap();
        assert_eq!(cfg.epoch, 2);
        assert_eq!(cfg.dataset().seed, Some(7));

        let bad = RunArgs {
            lr_decay: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(bad.resolve(), Err(TrainError::Config(_))));
        let bad = RunArgs {
            plot_every: Some(0),
            ..Default::default()
        };
        assert!(bad.resolve().is_err());
    }

    #[test]
    fn predict_output_defaults_under_predict_root() {
        let cfg = RunConfig {
            predict_voc_data_dir: PathBuf::from("/p"),
            ..Default::default()
        };
        assert_eq!(cfg.predict_output_path(), PathBuf::from("/p/predict_result.json"));
    }
}

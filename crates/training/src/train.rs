//! Epoch driver: training steps, periodic visualization, evaluation, checkpoint
//! selection and the learning-rate schedule.

use crate::config::RunConfig;
use crate::error::{TrainError, TrainResult};
use crate::eval::{EvalLoop, EvalReport};
use crate::metrics::MetricAccumulator;
use crate::model::DetectionModel;
use crate::policy::{Checkpoint, EpochDecision, SelectionPolicy};
use crate::scorer::DetectionScorer;
use crate::vis::{EpochRecord, NullVisualizer, OverlayVisualizer, PlotFrame, Visualizer};
use curb_dataset::{
    EvalSample, ImageSize, Label, Normalizer, Prefetcher, SampleProvider, TrainSample,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainState {
    Idle,
    EpochRunning { epoch: usize },
    StepRunning { epoch: usize, step: usize },
    EpochEvaluating { epoch: usize },
    EpochComplete { epoch: usize },
    Done,
}

#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    /// Learning rate in effect while the epoch trained.
    pub lr: f64,
    pub steps: u64,
    pub losses: BTreeMap<String, f64>,
    pub eval: EvalReport,
    pub decision: EpochDecision,
    pub checkpoint: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub epochs: Vec<EpochReport>,
    pub best_map: f64,
    pub best_accuracy: f64,
    pub checkpoints: Vec<Checkpoint>,
}

impl TrainSummary {
    pub fn best_path(&self) -> Option<&PathBuf> {
        self.checkpoints.last().map(|c| &c.path)
    }
}

pub struct TrainLoop<M: DetectionModel> {
    cfg: RunConfig,
    model: M,
    eval: EvalLoop,
    vis: Box<dyn Visualizer>,
    normalizer: Normalizer,
    meters: MetricAccumulator,
    policy: SelectionPolicy,
    state: TrainState,
}

impl<M: DetectionModel> TrainLoop<M> {
    /// Writes visualizations under `cfg.vis_dir` when set, otherwise discards them.
    pub fn new(cfg: RunConfig, model: M) -> Self {
        let vis: Box<dyn Visualizer> = match &cfg.vis_dir {
            Some(dir) => Box::new(OverlayVisualizer::new(dir)),
            None => Box::new(NullVisualizer),
        };
        Self {
            eval: EvalLoop::new(cfg.test_num, cfg.test_num_workers),
            normalizer: Normalizer::from_flag(cfg.caffe_pretrain),
            meters: MetricAccumulator::new(Label::count()),
            policy: SelectionPolicy::new(cfg.decay_epoch, cfg.stop_epoch),
            state: TrainState::Idle,
            vis,
            model,
            cfg,
        }
    }

    pub fn with_visualizer(mut self, vis: Box<dyn Visualizer>) -> Self {
        self.vis = vis;
        self
    }

    pub fn with_scorer(mut self, scorer: Box<dyn DetectionScorer>) -> Self {
        self.eval = EvalLoop::with_scorer(scorer, self.cfg.test_num, self.cfg.test_num_workers);
        self
    }

    pub fn state(&self) -> TrainState {
        self.state
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    fn enter(&mut self, next: TrainState) {
        log::trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn run<P, Q>(&mut self, train: &P, test: &Q) -> TrainResult<TrainSummary>
    where
        P: SampleProvider<Item = TrainSample>,
        Q: SampleProvider<Item = EvalSample>,
    {
        self.cfg.validate()?;
        if let Some(path) = self.cfg.load_path.clone() {
            self.model.load(&path).map_err(TrainError::Model)?;
            log::info!("loaded pretrained model from {}", path.display());
        }

        let mut epochs = Vec::new();
        for epoch in 0..self.cfg.epoch {
            self.enter(TrainState::EpochRunning { epoch });
            self.meters.reset();
            train.set_epoch(epoch);
            let lr = self.model.learning_rate();
            let seed = self.cfg.seed.map(|s| s ^ epoch as u64);

            for (step, sample) in Prefetcher::shuffled(train, self.cfg.num_workers, seed).enumerate() {
                let sample = sample?;
                self.enter(TrainState::StepRunning { epoch, step });
                let out = self.model.train_step(&sample).map_err(TrainError::Model)?;
                self.meters.record(&out);
                if (step + 1) % self.cfg.plot_every == 0 {
                    self.plot(epoch, step, &sample);
                }
            }
            if self.meters.dropped_pairs() > 0 {
                log::warn!(
                    "epoch {epoch}: {} confusion pairs outside the class range were dropped",
                    self.meters.dropped_pairs()
                );
            }

            self.enter(TrainState::EpochEvaluating { epoch });
            let eval = self.eval.run(&mut self.model, test)?;
            let decision = self.policy.observe(epoch, eval.map, eval.accuracy);
            let checkpoint = if decision.persist() {
                Some(self.persist(epoch)?)
            } else {
                None
            };

            let losses = self.meters.snapshot().losses;
            log::info!(
                "epoch {epoch}: lr={lr:.6} map={:.4} accuracy={:.4} {}",
                eval.map,
                eval.accuracy,
                self.meters.summary()
            );
            let record = EpochRecord {
                epoch,
                lr,
                map: eval.map,
                accuracy: eval.accuracy,
                losses: losses.clone(),
            };
            if let Err(e) = self.vis.epoch(&record) {
                log::warn!("epoch {epoch}: visualization failed: {e}");
            }
            self.enter(TrainState::EpochComplete { epoch });

            if decision.decay {
                self.decay()?;
            }
            epochs.push(EpochReport {
                epoch,
                lr,
                steps: self.meters.steps(),
                losses,
                eval,
                decision,
                checkpoint,
            });
            if decision.stop {
                log::info!("stop epoch {epoch} reached");
                break;
            }
        }
        self.enter(TrainState::Done);

        Ok(TrainSummary {
            epochs,
            best_map: self.policy.best_map(),
            best_accuracy: self.policy.best_accuracy(),
            checkpoints: self.policy.history().to_vec(),
        })
    }

    fn persist(&mut self, epoch: usize) -> TrainResult<PathBuf> {
        let tags = self.policy.tags();
        let path = self.model.save(&tags).map_err(TrainError::Model)?;
        log::info!(
            "saved checkpoint {} (best_map={:.4} best_accuracy={:.4})",
            path.display(),
            tags.best_map,
            tags.best_accuracy
        );
        self.policy.record(Checkpoint {
            path: path.clone(),
            tags,
            epoch,
        });
        Ok(path)
    }

    fn decay(&mut self) -> TrainResult<()> {
        match self.policy.best().map(|c| c.path.clone()) {
            Some(path) => {
                self.model.load(&path).map_err(TrainError::Model)?;
                log::info!("reloaded best checkpoint {}", path.display());
            }
            None => log::warn!("no checkpoint saved yet; decaying lr without reload"),
        }
        self.model.scale_lr(self.cfg.lr_decay);
        log::info!("learning rate decayed to {:.6}", self.model.learning_rate());
        Ok(())
    }

    /// Best effort: nothing here may abort training.
    fn plot(&mut self, epoch: usize, step: usize, sample: &TrainSample) {
        if let Some(sentinel) = &self.cfg.debug_file {
            if sentinel.exists() {
                log::debug!(
                    "debug sentinel {} present at epoch {epoch} step {step}: {:?}",
                    sentinel.display(),
                    self.meters.snapshot()
                );
            }
        }

        let display = self.normalizer.to_display(&sample.image);
        let size = ImageSize::of(&sample.image);
        let prediction = match self
            .model
            .predict(std::slice::from_ref(&sample.image), &[size])
        {
            Ok(mut preds) => preds.pop(),
            Err(e) => {
                log::warn!("epoch {epoch} step {step}: prediction for visualization failed: {e}");
                None
            }
        };
        let meters = self.meters.snapshot();
        let frame = PlotFrame {
            epoch,
            step,
            id: &sample.id,
            image: &display,
            gt_boxes: &sample.boxes,
            prediction: prediction.as_ref(),
            meters: &meters,
        };
        if let Err(e) = self.vis.plot(&frame) {
            log::warn!("epoch {epoch} step {step}: visualization failed: {e}");
        }
    }
}

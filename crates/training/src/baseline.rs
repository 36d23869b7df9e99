//! Burn-backed multibox detector with a scene head.
//!
//! The network sees a coarse pooled grid of the normalized image and regresses a
//! fixed number of unit-space boxes with objectness scores, plus scene logits.
//! Targets are assigned greedily: every ground-truth box claims the prediction
//! slot it overlaps most.

use crate::config::RunConfig;
use crate::error::ModelError;
use crate::model::{CheckpointTags, DetectionModel, Prediction, StepOutput};
use crate::TrainBackend;
use burn::backend::Autodiff;
use burn::module::Module;
use burn::nn;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use curb_dataset::{BoxYxyx, ChwImage, ImageSize, Label, Scene, TrainSample};
use ndarray::s;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub type ADBackend = Autodiff<TrainBackend>;

/// Pooling grid per side.
pub const GRID: usize = 4;
pub const FEATURE_DIM: usize = 3 * GRID * GRID;

/// The box head is class-agnostic.
const PREDICTED_LABEL: Label = Label::Curb;

#[derive(Debug, Clone)]
pub struct BaselineConfig {
    pub hidden: usize,
    pub depth: usize,
    pub max_boxes: usize,
    pub lambda_box: f32,
    pub lambda_obj: f32,
    pub lambda_scene: f32,
    /// Boxes scoring below this are dropped from predictions.
    pub score_thresh: f32,
    pub lr: f64,
    pub checkpoint_dir: PathBuf,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            hidden: 128,
            depth: 2,
            max_boxes: 16,
            lambda_box: 1.0,
            lambda_obj: 1.0,
            lambda_scene: 1.0,
            score_thresh: 0.05,
            lr: 1e-3,
            checkpoint_dir: PathBuf::from("checkpoints"),
        }
    }
}

impl BaselineConfig {
    pub fn from_run(run: &RunConfig) -> Self {
        Self {
            lr: run.lr,
            checkpoint_dir: run.checkpoint_dir.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Module)]
pub struct BaselineNet<B: Backend> {
    stem: nn::Linear<B>,
    blocks: Vec<nn::Linear<B>>,
    box_head: nn::Linear<B>,
    score_head: nn::Linear<B>,
    scene_head: nn::Linear<B>,
    max_boxes: usize,
}

impl<B: Backend> BaselineNet<B> {
    pub fn new(cfg: &BaselineConfig, device: &B::Device) -> Self {
        let max_boxes = cfg.max_boxes.max(1);
        let stem = nn::LinearConfig::new(FEATURE_DIM, cfg.hidden).init(device);
        let blocks = (0..cfg.depth)
            .map(|_| nn::LinearConfig::new(cfg.hidden, cfg.hidden).init(device))
            .collect();
        Self {
            stem,
            blocks,
            box_head: nn::LinearConfig::new(cfg.hidden, max_boxes * 4).init(device),
            score_head: nn::LinearConfig::new(cfg.hidden, max_boxes).init(device),
            scene_head: nn::LinearConfig::new(cfg.hidden, Scene::count()).init(device),
            max_boxes,
        }
    }

    /// Returns `(boxes [N, K, 4], scores [N, K], scene_logits [N, S])`; boxes are
    /// `[ymin, xmin, ymax, xmax]` in unit space with min <= max.
    pub fn forward(&self, input: Tensor<B, 2>) -> (Tensor<B, 3>, Tensor<B, 2>, Tensor<B, 2>) {
        let mut x = relu(self.stem.forward(input));
        for block in &self.blocks {
            x = relu(block.forward(x));
        }
        let boxes_flat = sigmoid(self.box_head.forward(x.clone()));
        let scores = sigmoid(self.score_head.forward(x.clone()));
        let scene_logits = self.scene_head.forward(x);
        let batch = boxes_flat.dims()[0];
        let k = self.max_boxes;
        let boxes = boxes_flat.reshape([batch, k, 4]);

        let y0 = boxes.clone().slice([0..batch, 0..k, 0..1]);
        let x0 = boxes.clone().slice([0..batch, 0..k, 1..2]);
        let y1 = boxes.clone().slice([0..batch, 0..k, 2..3]);
        let x1 = boxes.slice([0..batch, 0..k, 3..4]);

        let dy = y0.clone() - y1.clone();
        let dx = x0.clone() - x1.clone();
        let y_min = (y0.clone() + y1.clone() - dy.clone().abs()) * 0.5;
        let y_max = (y0 + y1 + dy.abs()) * 0.5;
        let x_min = (x0.clone() + x1.clone() - dx.clone().abs()) * 0.5;
        let x_max = (x0 + x1 + dx.abs()) * 0.5;

        let ordered = Tensor::cat(vec![y_min, x_min, y_max, x_max], 2);
        (ordered, scores, scene_logits)
    }
}

pub struct BaselineDetector<O> {
    cfg: BaselineConfig,
    model: BaselineNet<ADBackend>,
    optim: O,
    lr: f64,
    device: <ADBackend as Backend>::Device,
    saves: usize,
}

/// Fresh network with an Adam optimizer.
pub fn baseline_detector(
    cfg: BaselineConfig,
) -> BaselineDetector<impl Optimizer<BaselineNet<ADBackend>, ADBackend>> {
    let device = <ADBackend as Backend>::Device::default();
    let model = BaselineNet::<ADBackend>::new(&cfg, &device);
    log::info!(
        "baseline detector: {} slots, hidden {}x{}, lr {}",
        cfg.max_boxes,
        cfg.hidden,
        cfg.depth,
        cfg.lr
    );
    BaselineDetector {
        lr: cfg.lr,
        optim: AdamConfig::new().init::<ADBackend, BaselineNet<ADBackend>>(),
        model,
        device,
        saves: 0,
        cfg,
    }
}

impl<O> BaselineDetector<O> {
    pub fn net(&self) -> &BaselineNet<ADBackend> {
        &self.model
    }

    fn features(&self, image: &ChwImage) -> Tensor<ADBackend, 2> {
        Tensor::from_data(
            TensorData::new(pooled_features(image), [1, FEATURE_DIM]),
            &self.device,
        )
    }
}

impl<O> DetectionModel for BaselineDetector<O>
where
    O: Optimizer<BaselineNet<ADBackend>, ADBackend>,
{
    fn train_step(&mut self, sample: &TrainSample) -> Result<StepOutput, ModelError> {
        let size = ImageSize::of(&sample.image);
        let input = self.features(&sample.image);
        let (pred_boxes, pred_scores, scene_logits) = self.model.forward(input);
        let k = self.model.max_boxes;

        let gt_unit: Vec<BoxYxyx> = sample.boxes.iter().map(|b| to_unit(*b, size)).collect();
        let pred_vec = to_vec(pred_boxes.clone().into_data());
        let targets = greedy_targets(&pred_vec, &gt_unit, &sample.labels, k);

        let obj_targets = Tensor::<ADBackend, 2>::from_data(
            TensorData::new(targets.objectness.clone(), [1, k]),
            &self.device,
        );
        let box_targets = Tensor::<ADBackend, 3>::from_data(
            TensorData::new(targets.boxes, [1, k, 4]),
            &self.device,
        );
        let box_weights = Tensor::<ADBackend, 3>::from_data(
            TensorData::new(targets.weights, [1, k, 4]),
            &self.device,
        );

        // Objectness BCE; unassigned slots train toward 0.
        let eps = 1e-6;
        let p = pred_scores.clone().clamp(eps, 1.0 - eps);
        let obj_loss = -((obj_targets.clone() * p.clone().log())
            + ((obj_targets.neg() + 1.0) * (p.neg() + 1.0).log()))
        .sum()
        .div_scalar(k as f32);

        let box_loss = if targets.matched > 0 {
            ((pred_boxes - box_targets).abs() * box_weights)
                .sum()
                .div_scalar(targets.matched as f32)
        } else {
            Tensor::<ADBackend, 1>::zeros([1], &self.device)
        };

        let scene_loss = match sample.scene.first() {
            Some(scene) => {
                let target = Tensor::<ADBackend, 1, Int>::from_data(
                    TensorData::new(vec![scene.index() as i64], [1]),
                    &self.device,
                );
                CrossEntropyLossConfig::new()
                    .init(&self.device)
                    .forward(scene_logits, target)
            }
            None => Tensor::<ADBackend, 1>::zeros([1], &self.device),
        };

        let loss = box_loss.clone() * self.cfg.lambda_box
            + obj_loss.clone() * self.cfg.lambda_obj
            + scene_loss.clone() * self.cfg.lambda_scene;
        let total = scalar(loss.clone().detach().into_data());
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optim.step(self.lr, self.model.clone(), grads);

        let scores = to_vec(pred_scores.into_data());
        let mut rpn_pairs = Vec::with_capacity(k);
        let mut roi_pairs = Vec::with_capacity(k);
        for (slot, score) in scores.iter().enumerate() {
            let predicted_fg = *score > 0.5;
            let actual = targets.objectness[slot] > 0.5;
            rpn_pairs.push((actual as usize, predicted_fg as usize));
            let actual_class = targets.labels[slot].map_or(0, |l| l.index() + 1);
            let predicted_class = if predicted_fg {
                PREDICTED_LABEL.index() + 1
            } else {
                0
            };
            roi_pairs.push((actual_class, predicted_class));
        }

        Ok(StepOutput {
            losses: vec![
                ("box".into(), scalar(box_loss.detach().into_data())),
                ("objectness".into(), scalar(obj_loss.detach().into_data())),
                ("scene".into(), scalar(scene_loss.detach().into_data())),
                ("total".into(), total),
            ],
            rpn_pairs,
            roi_pairs,
        })
    }

    fn predict(
        &mut self,
        images: &[ChwImage],
        sizes: &[ImageSize],
    ) -> Result<Vec<Prediction>, ModelError> {
        if images.len() != sizes.len() {
            return Err(format!("{} images but {} sizes", images.len(), sizes.len()).into());
        }
        let mut out = Vec::with_capacity(images.len());
        for (image, size) in images.iter().zip(sizes) {
            let (boxes, scores, scene_logits) = self.model.forward(self.features(image));
            let boxes = to_vec(boxes.into_data());
            let scores = to_vec(scores.into_data());
            let logits = to_vec(scene_logits.into_data());

            let mut pred = Prediction {
                boxes: Vec::new(),
                labels: Vec::new(),
                scores: Vec::new(),
                scene: argmax(&logits)
                    .and_then(Scene::from_index)
                    .unwrap_or(Scene::ALL[0]),
            };
            for (slot, score) in scores.iter().enumerate() {
                if *score < self.cfg.score_thresh {
                    continue;
                }
                let b = &boxes[slot * 4..slot * 4 + 4];
                pred.boxes.push([
                    b[0] * size.height as f32,
                    b[1] * size.width as f32,
                    b[2] * size.height as f32,
                    b[3] * size.width as f32,
                ]);
                pred.labels.push(PREDICTED_LABEL);
                pred.scores.push(*score);
            }
            out.push(pred);
        }
        Ok(out)
    }

    fn save(&mut self, tags: &CheckpointTags) -> Result<PathBuf, ModelError> {
        fs::create_dir_all(&self.cfg.checkpoint_dir)?;
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        self.saves += 1;
        // No dots in the stem: the recorder sets the extension itself.
        let stem = format!(
            "baseline_{stamp}_{:03}_map{:04}_acc{:04}",
            self.saves,
            (tags.best_map * 10000.0).round() as u32,
            (tags.best_accuracy * 10000.0).round() as u32
        );
        let path = self.cfg.checkpoint_dir.join(stem);
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model
            .clone()
            .save_file(&path, &recorder)
            .map_err(|e| format!("failed to save checkpoint {}: {e}", path.display()))?;
        Ok(path.with_extension("bin"))
    }

    fn load(&mut self, path: &Path) -> Result<(), ModelError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model = self
            .model
            .clone()
            .load_file(path, &recorder, &self.device)
            .map_err(|e| format!("failed to load checkpoint {}: {e}", path.display()))?;
        Ok(())
    }

    fn scale_lr(&mut self, factor: f64) {
        self.lr *= factor;
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }
}

/// Mean of each channel over a `GRID x GRID` partition of the image.
pub fn pooled_features(image: &ChwImage) -> Vec<f32> {
    let (channels, h, w) = image.dim();
    let mut feats = vec![0.0f32; FEATURE_DIM];
    if h == 0 || w == 0 {
        return feats;
    }
    for c in 0..channels.min(3) {
        for gy in 0..GRID {
            let y0 = (gy * h / GRID).min(h - 1);
            let y1 = ((gy + 1) * h / GRID).max(y0 + 1).min(h);
            for gx in 0..GRID {
                let x0 = (gx * w / GRID).min(w - 1);
                let x1 = ((gx + 1) * w / GRID).max(x0 + 1).min(w);
                let cell = image.slice(s![c, y0..y1, x0..x1]);
                feats[(c * GRID + gy) * GRID + gx] = cell.mean().unwrap_or(0.0);
            }
        }
    }
    feats
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotTargets {
    pub objectness: Vec<f32>,
    pub boxes: Vec<f32>,
    pub weights: Vec<f32>,
    pub labels: Vec<Option<Label>>,
    pub matched: usize,
}

/// Each ground-truth box claims the predicted slot with the highest IoU; later
/// boxes overwrite earlier claims on the same slot.
pub fn greedy_targets(pred: &[f32], gt: &[BoxYxyx], labels: &[Label], slots: usize) -> SlotTargets {
    let mut t = SlotTargets {
        objectness: vec![0.0; slots],
        boxes: vec![0.0; slots * 4],
        weights: vec![0.0; slots * 4],
        labels: vec![None; slots],
        matched: 0,
    };
    if pred.len() < slots * 4 {
        return t;
    }
    for (g, label) in gt.iter().zip(labels) {
        let mut best_iou = -1.0f32;
        let mut best = 0usize;
        for p in 0..slots {
            let pb = [pred[p * 4], pred[p * 4 + 1], pred[p * 4 + 2], pred[p * 4 + 3]];
            let iou = iou_unit(pb, *g);
            if iou > best_iou {
                best_iou = iou;
                best = p;
            }
        }
        if t.objectness[best] == 0.0 {
            t.matched += 1;
        }
        t.objectness[best] = 1.0;
        t.boxes[best * 4..best * 4 + 4].copy_from_slice(g);
        t.weights[best * 4..best * 4 + 4].copy_from_slice(&[1.0; 4]);
        t.labels[best] = Some(*label);
    }
    t
}

fn to_unit(b: BoxYxyx, size: ImageSize) -> BoxYxyx {
    let h = size.height.max(1) as f32;
    let w = size.width.max(1) as f32;
    [
        (b[0] / h).clamp(0.0, 1.0),
        (b[1] / w).clamp(0.0, 1.0),
        (b[2] / h).clamp(0.0, 1.0),
        (b[3] / w).clamp(0.0, 1.0),
    ]
}

fn iou_unit(a: BoxYxyx, b: BoxYxyx) -> f32 {
    let inter_h = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_w = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_h * inter_w;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let denom = area_a + area_b - inter;
    if denom <= 0.0 {
        0.0
    } else {
        inter / denom
    }
}

fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

fn to_vec(data: TensorData) -> Vec<f32> {
    data.to_vec::<f32>().unwrap_or_default()
}

fn scalar(data: TensorData) -> f32 {
    to_vec(data).first().copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn pooling_averages_cells() {
        let image = Array3::from_shape_fn((3, 8, 8), |(c, y, _)| {
            c as f32 + if y < 4 { 0.0 } else { 1.0 }
        });
        let feats = pooled_features(&image);
        assert_eq!(feats.len(), FEATURE_DIM);
        // Channel 2, top row of cells.
        assert!((feats[2 * GRID * GRID] - 2.0).abs() < 1e-6);
        // Channel 0, bottom row of cells.
        assert!((feats[(GRID - 1) * GRID] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn greedy_targets_claim_best_slot() {
        let pred = vec![0.0, 0.0, 0.1, 0.1, 0.5, 0.5, 0.9, 0.9];
        let t = greedy_targets(&pred, &[[0.45, 0.45, 0.95, 0.95]], &[Label::Curb], 2);
        assert_eq!(t.objectness, vec![0.0, 1.0]);
        assert_eq!(t.matched, 1);
        assert_eq!(&t.boxes[4..], &[0.45, 0.45, 0.95, 0.95]);
        assert_eq!(t.labels, vec![None, Some(Label::Curb)]);
    }

    #[test]
    fn fresh_detector_predicts_in_original_space() {
        let mut det = baseline_detector(BaselineConfig {
            score_thresh: 0.0,
            max_boxes: 4,
            ..Default::default()
        });
        let image = Array3::<f32>::zeros((3, 16, 16));
        let preds = det
            .predict(&[image], &[ImageSize { height: 100, width: 200 }])
            .unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].len(), 4);
        for b in &preds[0].boxes {
            assert!(b[0] <= b[2] && b[2] <= 100.0);
            assert!(b[1] <= b[3] && b[3] <= 200.0);
        }
    }
}

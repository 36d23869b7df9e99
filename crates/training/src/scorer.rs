//! Detection quality scoring over accumulated predictions and ground truth.

use curb_dataset::{BoxYxyx, Label, Scene};

/// Per-image predictions and ground truth gathered by the evaluation loop.
/// All outer vectors are indexed by image and have equal length.
#[derive(Debug, Clone, Default)]
pub struct DetectionRecords {
    pub pred_boxes: Vec<Vec<BoxYxyx>>,
    pub pred_labels: Vec<Vec<Label>>,
    pub pred_scores: Vec<Vec<f32>>,
    pub gt_boxes: Vec<Vec<BoxYxyx>>,
    pub gt_labels: Vec<Vec<Label>>,
    pub gt_difficult: Vec<Vec<bool>>,
    /// Predicted scene per image.
    pub pred_scenes: Vec<Scene>,
    /// Ground-truth scene labels per image; empty where the record has none.
    pub gt_scenes: Vec<Vec<Scene>>,
}

impl DetectionRecords {
    pub fn len(&self) -> usize {
        self.gt_boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gt_boxes.is_empty()
    }

    /// Images whose predicted scene equals their first ground-truth scene.
    /// Images without a ground-truth scene never count.
    pub fn scene_hits(&self) -> usize {
        self.pred_scenes
            .iter()
            .zip(&self.gt_scenes)
            .filter(|(pred, gt)| gt.first() == Some(*pred))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    /// Average precision per class, `None` where it is undefined (no positives).
    pub ap: Vec<Option<f64>>,
    /// Mean over classes with a defined AP; zero when none are defined.
    pub map: f64,
}

/// Deterministic: identical records always give an identical report.
pub trait DetectionScorer {
    fn score(&self, records: &DetectionRecords) -> ScoreReport;
}

/// PASCAL VOC 2007 metric: 11-point interpolated AP, inclusive pixel extents,
/// difficult ground truth neither rewarded nor penalised.
#[derive(Debug, Clone, Copy)]
pub struct Voc07Scorer {
    pub iou_thresh: f32,
}

impl Default for Voc07Scorer {
    fn default() -> Self {
        Self { iou_thresh: 0.5 }
    }
}

/// Match outcome of one prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hit {
    True,
    False,
    Ignored,
}

impl DetectionScorer for Voc07Scorer {
    fn score(&self, records: &DetectionRecords) -> ScoreReport {
        let classes = Label::count();
        let mut n_pos = vec![0usize; classes];
        let mut scored: Vec<Vec<(f32, Hit)>> = vec![Vec::new(); classes];

        for img in 0..records.len() {
            let pred_boxes = &records.pred_boxes[img];
            let pred_labels = &records.pred_labels[img];
            let pred_scores = &records.pred_scores[img];
            let gt_boxes = &records.gt_boxes[img];
            let gt_labels = &records.gt_labels[img];
            let gt_difficult = &records.gt_difficult[img];

            for (class, label) in Label::ALL.iter().enumerate() {
                let mut preds: Vec<(BoxYxyx, f32)> = pred_boxes
                    .iter()
                    .zip(pred_labels)
                    .zip(pred_scores)
                    .filter(|((_, l), _)| *l == label)
                    .map(|((b, _), s)| (*b, *s))
                    .collect();
                preds.sort_by(|a, b| b.1.total_cmp(&a.1));
                let gts: Vec<(BoxYxyx, bool)> = gt_boxes
                    .iter()
                    .zip(gt_labels)
                    .zip(gt_difficult)
                    .filter(|((_, l), _)| *l == label)
                    .map(|((b, _), d)| (*b, *d))
                    .collect();
                n_pos[class] += gts.iter().filter(|(_, d)| !d).count();

                if preds.is_empty() {
                    continue;
                }
                if gts.is_empty() {
                    scored[class].extend(preds.iter().map(|(_, s)| (*s, Hit::False)));
                    continue;
                }

                let mut taken = vec![false; gts.len()];
                for (pb, s) in &preds {
                    let mut best: Option<(usize, f32)> = None;
                    for (g, (gb, _)) in gts.iter().enumerate() {
                        let iou = iou_inclusive(*pb, *gb);
                        if best.map_or(true, |(_, v)| iou > v) {
                            best = Some((g, iou));
                        }
                    }
                    let hit = match best {
                        Some((g, iou)) if iou >= self.iou_thresh => {
                            let hit = if gts[g].1 {
                                Hit::Ignored
                            } else if taken[g] {
                                Hit::False
                            } else {
                                Hit::True
                            };
                            taken[g] = true;
                            hit
                        }
                        _ => Hit::False,
                    };
                    scored[class].push((*s, hit));
                }
            }
        }

        let ap: Vec<Option<f64>> = scored
            .iter_mut()
            .zip(&n_pos)
            .map(|(entries, &pos)| {
                if pos == 0 {
                    return None;
                }
                entries.sort_by(|a, b| b.0.total_cmp(&a.0));
                let mut tp = 0usize;
                let mut fp = 0usize;
                let mut prec = Vec::with_capacity(entries.len());
                let mut rec = Vec::with_capacity(entries.len());
                for (_, hit) in entries.iter() {
                    match hit {
                        Hit::True => tp += 1,
                        Hit::False => fp += 1,
                        Hit::Ignored => {}
                    }
                    let denom = tp + fp;
                    prec.push(if denom == 0 {
                        f64::NAN
                    } else {
                        tp as f64 / denom as f64
                    });
                    rec.push(tp as f64 / pos as f64);
                }
                Some(voc07_ap(&prec, &rec))
            })
            .collect();

        let defined: Vec<f64> = ap.iter().flatten().copied().collect();
        let map = if defined.is_empty() {
            log::warn!("no class has ground-truth positives; map reported as 0");
            0.0
        } else {
            defined.iter().sum::<f64>() / defined.len() as f64
        };
        ScoreReport { ap, map }
    }
}

/// 11-point interpolation at recall 0.0, 0.1, ..., 1.0. NaN precision entries are skipped.
pub fn voc07_ap(prec: &[f64], rec: &[f64]) -> f64 {
    let mut ap = 0.0;
    for step in 0..=10 {
        let t = step as f64 / 10.0;
        let p = prec
            .iter()
            .zip(rec)
            .filter(|(p, r)| **r >= t && !p.is_nan())
            .map(|(p, _)| *p)
            .fold(0.0f64, f64::max);
        ap += p / 11.0;
    }
    ap
}

/// IoU of two `[ymin, xmin, ymax, xmax]` boxes with the max edge counted inclusively.
pub fn iou_inclusive(a: BoxYxyx, b: BoxYxyx) -> f32 {
    let a = [a[0], a[1], a[2] + 1.0, a[3] + 1.0];
    let b = [b[0], b[1], b[2] + 1.0, b[3] + 1.0];
    let tl_y = a[0].max(b[0]);
    let tl_x = a[1].max(b[1]);
    let br_y = a[2].min(b[2]);
    let br_x = a[3].min(b[3]);
    let inter = if tl_y < br_y && tl_x < br_x {
        (br_y - tl_y) * (br_x - tl_x)
    } else {
        0.0
    };
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let denom = area_a + area_b - inter;
    if denom <= 0.0 {
        0.0
    } else {
        inter / denom
    }
}

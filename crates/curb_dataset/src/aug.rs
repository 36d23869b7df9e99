//! Resize and flip augmentation, applied jointly to images and boxes.

use crate::types::{BoxYxyx, ChwImage, TransformResult};
use crate::vocab::Label;
use ndarray::{s, Array3};
use rand::{Rng, SeedableRng};

pub const DEFAULT_MIN_SIZE: u32 = 224;
pub const DEFAULT_MAX_SIZE: u32 = 224;
pub const DEFAULT_FLIP_PROB: f32 = 0.5;

/// Pipeline settings shared by the sample providers.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Target height; the height scale is `min_size / H`.
    pub min_size: u32,
    /// Target width; the width scale is `max_size / W`.
    pub max_size: u32,
    /// Use the caffe normalization (BGR, 0..255, mean subtracted).
    pub caffe_pretrain: bool,
    /// Keep objects flagged difficult in the training split.
    pub use_difficult: bool,
    /// Seed for reproducible flip decisions (mixed with the sample index).
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            caffe_pretrain: false,
            use_difficult: false,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeometricTransform {
    pub min_size: u32,
    pub max_size: u32,
    pub flip_horizontal_prob: f32,
    pub seed: Option<u64>,
}

impl Default for GeometricTransform {
    fn default() -> Self {
        Self::from_config(&DatasetConfig::default())
    }
}

impl GeometricTransform {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            min_size: cfg.min_size,
            max_size: cfg.max_size,
            flip_horizontal_prob: DEFAULT_FLIP_PROB,
            seed: cfg.seed,
        }
    }

    pub fn builder() -> GeometricTransformBuilder {
        GeometricTransformBuilder::default()
    }

    pub fn describe(&self) -> String {
        format!(
            "min_size={} max_size={} flip_p={:.2} seed={}",
            self.min_size,
            self.max_size,
            self.flip_horizontal_prob,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    /// Resize and randomly flip; the flip is drawn from the thread RNG unless a seed is set.
    pub fn apply(&self, image: &ChwImage, boxes: &[BoxYxyx], labels: &[Label]) -> TransformResult {
        self.apply_keyed(0, image, boxes, labels)
    }

    /// Like `apply`, with `key` mixed into the seed so each sample gets its own draw.
    pub fn apply_keyed(
        &self,
        key: u64,
        image: &ChwImage,
        boxes: &[BoxYxyx],
        labels: &[Label],
    ) -> TransformResult {
        let flip = self.draw_flip(key);
        self.apply_with_flip(image, boxes, labels, flip)
    }

    /// Deterministic variant: `flip` decides the mirror for both image and boxes.
    pub fn apply_with_flip(
        &self,
        image: &ChwImage,
        boxes: &[BoxYxyx],
        labels: &[Label],
        flip: bool,
    ) -> TransformResult {
        let (_, in_h, in_w) = image.dim();
        let unit = image.mapv(|v| v / 255.0);
        let resized = self.resize(&unit);
        let (_, out_h, out_w) = resized.dim();
        let mut boxes = resize_boxes(boxes, (in_h, in_w), (out_h, out_w));
        let image = if flip {
            hflip(&resized, &mut boxes)
        } else {
            resized
        };
        TransformResult {
            image,
            boxes,
            labels: labels.to_vec(),
            scale: out_h as f32 / in_h as f32,
        }
    }

    /// Scale height by `min_size / H` and width by `max_size / W`, independently.
    pub fn resize(&self, image: &ChwImage) -> ChwImage {
        let (_, h, w) = image.dim();
        let scale_h = self.min_size as f64 / h as f64;
        let scale_w = self.max_size as f64 / w as f64;
        let out_h = ((h as f64 * scale_h).round() as usize).max(1);
        let out_w = ((w as f64 * scale_w).round() as usize).max(1);
        resize_bilinear(image, out_h, out_w)
    }

    fn draw_flip(&self, key: u64) -> bool {
        if self.flip_horizontal_prob <= 0.0 {
            return false;
        }
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            seeded_rng = rand::rngs::StdRng::seed_from_u64(seed ^ key);
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };
        rng.random_range(0.0..1.0) < self.flip_horizontal_prob
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeometricTransformBuilder {
    inner: GeometricTransform,
}

impl GeometricTransformBuilder {
    pub fn min_size(mut self, size: u32) -> Self {
        self.inner.min_size = size;
        self
    }
    pub fn max_size(mut self, size: u32) -> Self {
        self.inner.max_size = size;
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.inner.seed = seed;
        self
    }
    pub fn build(self) -> GeometricTransform {
        self.inner
    }
}

/// Flip key for `index` in `epoch`, so seeded runs redraw every epoch.
pub fn flip_key(epoch: u64, index: u64) -> u64 {
    (epoch << 32) ^ index
}

/// Scale y coordinates by `out_h / in_h` and x coordinates by `out_w / in_w`.
pub fn resize_boxes(
    boxes: &[BoxYxyx],
    (in_h, in_w): (usize, usize),
    (out_h, out_w): (usize, usize),
) -> Vec<BoxYxyx> {
    let sy = out_h as f32 / in_h as f32;
    let sx = out_w as f32 / in_w as f32;
    boxes
        .iter()
        .map(|b| [b[0] * sy, b[1] * sx, b[2] * sy, b[3] * sx])
        .collect()
}

/// Mirror the image along its width and remap box x-extents to `W - x`.
///
/// The returned image is in standard layout even though the mirror itself is a
/// negative-stride view.
pub fn hflip(image: &ChwImage, boxes: &mut [BoxYxyx]) -> ChwImage {
    let (_, _, w) = image.dim();
    let w = w as f32;
    for b in boxes.iter_mut() {
        let x_min = b[1];
        let x_max = b[3];
        b[1] = w - x_max;
        b[3] = w - x_min;
    }
    image
        .slice(s![.., .., ..;-1])
        .as_standard_layout()
        .into_owned()
}

/// Order-1 interpolation without anti-aliasing, mirror-reflecting samples past the edge.
pub fn resize_bilinear(image: &ChwImage, out_h: usize, out_w: usize) -> ChwImage {
    let (channels, in_h, in_w) = image.dim();
    if (in_h, in_w) == (out_h, out_w) {
        return image.as_standard_layout().into_owned();
    }
    let rows = axis_taps(in_h, out_h);
    let cols = axis_taps(in_w, out_w);
    let mut out = Array3::<f32>::zeros((channels, out_h, out_w));
    for c in 0..channels {
        for (oy, &(y0, y1, fy)) in rows.iter().enumerate() {
            for (ox, &(x0, x1, fx)) in cols.iter().enumerate() {
                let top = image[[c, y0, x0]] * (1.0 - fx) + image[[c, y0, x1]] * fx;
                let bottom = image[[c, y1, x0]] * (1.0 - fx) + image[[c, y1, x1]] * fx;
                out[[c, oy, ox]] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }
    out
}

/// For each output index: the two source indices and the weight of the second.
fn axis_taps(n_in: usize, n_out: usize) -> Vec<(usize, usize, f32)> {
    let factor = n_in as f64 / n_out as f64;
    (0..n_out)
        .map(|o| {
            let src = (o as f64 + 0.5) * factor - 0.5;
            let base = src.floor();
            let frac = (src - base) as f32;
            let i0 = base as isize;
            (mirror(i0, n_in), mirror(i0 + 1, n_in), frac)
        })
        .collect()
}

fn mirror(i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let i = i.rem_euclid(period);
    if i >= n as isize {
        (period - i) as usize
    } else {
        i as usize
    }
}

#[cfg(test)]
mod aug_tests {
    use super::*;

    fn ramp(h: usize, w: usize) -> ChwImage {
        Array3::from_shape_fn((3, h, w), |(c, y, x)| (c * 100 + y * 10 + x) as f32)
    }

    #[test]
    fn hflip_mirrors_pixels_and_boxes() {
        let img = ramp(2, 4);
        let mut boxes = vec![[0.0, 1.0, 2.0, 3.0]];
        let flipped = hflip(&img, &mut boxes);
        assert_eq!(boxes[0], [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(flipped[[0, 0, 0]], img[[0, 0, 3]]);
        assert_eq!(flipped[[2, 1, 3]], img[[2, 1, 0]]);
        assert!(flipped.is_standard_layout());

        let mut boxes = vec![[0.0, 0.5, 1.0, 1.5]];
        hflip(&img, &mut boxes);
        assert_eq!(boxes[0], [0.0, 2.5, 1.0, 3.5]);
    }

    #[test]
    fn resize_hits_target_per_axis() {
        let t = GeometricTransform::builder()
            .min_size(6)
            .max_size(10)
            .flip_horizontal_prob(0.0)
            .build();
        let out = t.apply(&ramp(3, 4), &[[1.0, 1.0, 2.0, 2.0]], &[Label::Curb]);
        assert_eq!(out.image.dim(), (3, 6, 10));
        assert!((out.scale - 2.0).abs() < 1e-6);
        assert_eq!(out.boxes[0], [2.0, 2.5, 4.0, 5.0]);
    }

    #[test]
    fn upsampling_constant_image_stays_constant() {
        let img = Array3::from_elem((3, 5, 7), 0.25f32);
        let out = resize_bilinear(&img, 11, 3);
        assert!(out.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn mirror_reflects_without_repeating_edge() {
        assert_eq!(mirror(-1, 4), 1);
        assert_eq!(mirror(4, 4), 2);
        assert_eq!(mirror(0, 1), 0);
        assert_eq!(mirror(3, 4), 3);
    }

    #[test]
    fn seeded_flip_is_reproducible() {
        let t = GeometricTransform::builder().seed(Some(7)).build();
        let img = ramp(4, 4);
        let a = t.apply_keyed(3, &img, &[[0.0, 0.0, 1.0, 1.0]], &[Label::Curb]);
        let b = t.apply_keyed(3, &img, &[[0.0, 0.0, 1.0, 1.0]], &[Label::Curb]);
        assert_eq!(a.boxes, b.boxes);
        assert_eq!(a.image, b.image);
    }

    #[test]
    fn seeded_flip_varies_across_epochs() {
        let t = GeometricTransform::builder().seed(Some(7)).build();
        let draws: Vec<bool> = (0..32).map(|e| t.draw_flip(flip_key(e, 0))).collect();
        assert!(draws.iter().any(|f| *f));
        assert!(draws.iter().any(|f| !*f));
        assert_eq!(t.draw_flip(flip_key(5, 0)), draws[5]);
        assert_ne!(flip_key(1, 0), flip_key(0, 1));
    }
}

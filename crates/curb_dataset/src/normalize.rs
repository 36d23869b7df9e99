//! Pixel normalization for the two supported backbone conventions.

use crate::types::ChwImage;
use ndarray::{s, Axis};

/// Per-channel mean in BGR order, 0..255 scale.
pub const CAFFE_MEAN_BGR: [f32; 3] = [122.7717, 115.9465, 102.9801];
pub const TORCH_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const TORCH_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Normalization policy, fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalizer {
    /// BGR order, 0..255 scale, mean subtracted.
    Caffe,
    /// RGB order, `(x - mean) / std` on unit-range input.
    #[default]
    Torchvision,
}

impl Normalizer {
    pub fn from_flag(caffe_pretrain: bool) -> Self {
        if caffe_pretrain {
            Normalizer::Caffe
        } else {
            Normalizer::Torchvision
        }
    }

    /// Input: RGB CHW in 0..=1. Output is always in standard layout.
    pub fn normalize(&self, image: &ChwImage) -> ChwImage {
        match self {
            Normalizer::Caffe => {
                let mut bgr = image
                    .slice(s![..;-1, .., ..])
                    .as_standard_layout()
                    .into_owned();
                for (c, mut plane) in bgr.axis_iter_mut(Axis(0)).enumerate() {
                    let mean = CAFFE_MEAN_BGR[c];
                    plane.mapv_inplace(|v| v * 255.0 - mean);
                }
                bgr
            }
            Normalizer::Torchvision => {
                let mut out = image.as_standard_layout().into_owned();
                for (c, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
                    let (mean, std) = (TORCH_MEAN[c], TORCH_STD[c]);
                    plane.mapv_inplace(|v| (v - mean) / std);
                }
                out
            }
        }
    }

    /// Back to RGB CHW in 0..=1.
    pub fn denormalize(&self, image: &ChwImage) -> ChwImage {
        match self {
            Normalizer::Caffe => {
                let mut bgr = image.as_standard_layout().into_owned();
                for (c, mut plane) in bgr.axis_iter_mut(Axis(0)).enumerate() {
                    let mean = CAFFE_MEAN_BGR[c];
                    plane.mapv_inplace(|v| (v + mean) / 255.0);
                }
                bgr.slice(s![..;-1, .., ..]).as_standard_layout().into_owned()
            }
            Normalizer::Torchvision => {
                let mut out = image.as_standard_layout().into_owned();
                for (c, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
                    let (mean, std) = (TORCH_MEAN[c], TORCH_STD[c]);
                    plane.mapv_inplace(|v| (v * std + mean).clamp(0.0, 1.0));
                }
                out
            }
        }
    }

    /// Denormalize and convert to an 8-bit RGB image for overlays.
    pub fn to_display(&self, image: &ChwImage) -> image::RgbImage {
        let unit = self.denormalize(image);
        let (_, h, w) = unit.dim();
        image::RgbImage::from_fn(w as u32, h as u32, |x, y| {
            let px = |c: usize| (unit[[c, y as usize, x as usize]].clamp(0.0, 1.0) * 255.0) as u8;
            image::Rgb([px(0), px(1), px(2)])
        })
    }
}

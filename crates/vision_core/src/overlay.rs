use image::{Rgb, RgbImage};

pub const GT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const PRED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Convert a `[ymin, xmin, ymax, xmax]` pixel box into `[x0, y0, x1, y1]`, clamped to image bounds.
pub fn box_to_px(bbox_yxyx: [f32; 4], dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 {
        return None;
    }
    if bbox_yxyx.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let clamp = |v: f32, max: u32| -> u32 { v.max(0.0).min((max - 1) as f32) as u32 };
    let y0 = clamp(bbox_yxyx[0], h);
    let x0 = clamp(bbox_yxyx[1], w);
    let y1 = clamp(bbox_yxyx[2], h);
    let x1 = clamp(bbox_yxyx[3], w);
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some([x0, y0, x1, y1])
}

/// Draw a rectangle border with given thickness.
pub fn draw_rect(img: &mut RgbImage, bbox_px: [u32; 4], color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    let [x0, y0, x1, y1] = bbox_px;
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 >= w || yy0 >= h || xx1 >= w || yy1 >= h || xx0 > xx1 || yy0 > yy1 {
            continue;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

/// Draw every box that survives clamping; returns how many were drawn.
pub fn draw_boxes(img: &mut RgbImage, boxes: &[[f32; 4]], color: Rgb<u8>, thickness: u32) -> usize {
    let dims = img.dimensions();
    let mut drawn = 0;
    for b in boxes {
        if let Some(px) = box_to_px(*b, dims) {
            draw_rect(img, px, color, thickness);
            drawn += 1;
        }
    }
    drawn
}

/// Render a confusion matrix as a grayscale heat map, `cell` pixels per entry.
pub fn confusion_heatmap(matrix: &[Vec<u64>], cell: u32) -> RgbImage {
    let rows = matrix.len() as u32;
    let cols = matrix.iter().map(Vec::len).max().unwrap_or(0) as u32;
    let peak = matrix.iter().flatten().copied().max().unwrap_or(0).max(1);
    let cell = cell.max(1);
    RgbImage::from_fn(cols.max(1) * cell, rows.max(1) * cell, |x, y| {
        let v = matrix
            .get((y / cell) as usize)
            .and_then(|row| row.get((x / cell) as usize))
            .copied()
            .unwrap_or(0);
        let level = (v as f64 / peak as f64 * 255.0) as u8;
        Rgb([level, level, level])
    })
}

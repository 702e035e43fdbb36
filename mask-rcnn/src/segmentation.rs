//! Raster operations on instance masks.
//!
//! Coordinates are continuous with pixel `(row, col)` covering
//! `[col, col + 1) × [row, row + 1)`, so pixel centers sit at half offsets.

use crate::{common::*, image::SegmentationMask};

impl SegmentationMask {
    /// Crops the instance to `rect` and resamples it to a binary
    /// `resolution × resolution` target.
    pub fn crop_and_resize(&self, rect: &XYXY<f32>, resolution: usize) -> Array2<f32> {
        match self {
            Self::Bitmap(bitmap) => crop_bitmap(bitmap, rect, resolution),
            Self::Polygons(polygons) => rasterize_polygons(polygons, rect, resolution),
            Self::BoxAligned { rect: frame, raster } => crop_raster(raster, frame, rect, resolution),
        }
    }
}

/// Bilinearly samples an image-sized bitmap inside `rect` and binarizes at 0.5.
pub fn crop_bitmap(bitmap: &Array2<u8>, rect: &XYXY<f32>, resolution: usize) -> Array2<f32> {
    let (height, width) = bitmap.dim();
    let frame = HW::from_hw([height, width]).to_bounds().to_rect();
    crop_raster(bitmap, &frame, rect, resolution)
}

/// Bilinearly samples a raster stretched over `frame` inside `rect` and
/// binarizes at 0.5. The raster is empty outside `frame`.
pub fn crop_raster(
    raster: &Array2<u8>,
    frame: &XYXY<f32>,
    rect: &XYXY<f32>,
    resolution: usize,
) -> Array2<f32> {
    let source = raster.mapv(|value| if value != 0 { 1.0f32 } else { 0.0 });
    let (height, width) = raster.dim();
    let eps = f32::geometry_epsilon();
    let scale_x = width as f32 / frame.w().max(eps);
    let scale_y = height as f32 / frame.h().max(eps);

    let [x1, y1, x2, y2] = rect.xyxy();
    let step_x = (x2 - x1) / resolution as f32;
    let step_y = (y2 - y1) / resolution as f32;

    Array2::from_shape_fn((resolution, resolution), |(row, col)| {
        let y = y1 + (row as f32 + 0.5) * step_y;
        let x = x1 + (col as f32 + 0.5) * step_x;
        let v = (y - frame.y1()) * scale_y;
        let u = (x - frame.x1()) * scale_x;
        let value = sample_bilinear(source.view(), v - 0.5, u - 0.5, false);
        if value >= 0.5 {
            1.0
        } else {
            0.0
        }
    })
}

/// Maps polygons into the frame of `rect` and fills them with the even-odd
/// rule, testing pixel centers. Separate polygons are united.
pub fn rasterize_polygons(
    polygons: &[Vec<[f32; 2]>],
    rect: &XYXY<f32>,
    resolution: usize,
) -> Array2<f32> {
    let eps = f32::geometry_epsilon();
    let [x1, y1, _, _] = rect.xyxy();
    let scale_x = resolution as f32 / rect.w().max(eps);
    let scale_y = resolution as f32 / rect.h().max(eps);

    let polygons: Vec<Vec<[f32; 2]>> = polygons
        .iter()
        .filter(|polygon| polygon.len() >= 3)
        .map(|polygon| {
            polygon
                .iter()
                .map(|&[x, y]| [(x - x1) * scale_x, (y - y1) * scale_y])
                .collect()
        })
        .collect();

    Array2::from_shape_fn((resolution, resolution), |(row, col)| {
        let point = [col as f32 + 0.5, row as f32 + 0.5];
        let inside = polygons
            .iter()
            .any(|polygon| contains_even_odd(polygon, point));
        if inside {
            1.0
        } else {
            0.0
        }
    })
}

fn contains_even_odd(polygon: &[[f32; 2]], [px, py]: [f32; 2]) -> bool {
    let mut inside = false;
    let last = polygon[polygon.len() - 1];

    iter::once(last)
        .chain(polygon.iter().cloned())
        .tuple_windows()
        .for_each(|([xa, ya], [xb, yb])| {
            if (ya > py) != (yb > py) {
                let x_cross = xa + (py - ya) * (xb - xa) / (yb - ya);
                if px < x_cross {
                    inside = !inside;
                }
            }
        });

    inside
}

/// Pastes a square probability map into a canvas over `rect` and thresholds
/// it. Pixels whose centers fall outside `rect` stay false.
pub fn paste_mask(
    probs: ArrayView2<f32>,
    rect: &XYXY<f32>,
    canvas_size: &HW<usize>,
    threshold: f32,
) -> Array2<bool> {
    let mut canvas = Array2::from_elem((canvas_size.h(), canvas_size.w()), false);
    let (mask_h, mask_w) = probs.dim();
    if mask_h == 0 || mask_w == 0 || rect.is_degenerate() {
        return canvas;
    }

    let [x1, y1, x2, y2] = rect.xyxy();
    let rows = pixel_span(y1, y2, canvas_size.h());
    let cols = pixel_span(x1, x2, canvas_size.w());
    let scale_x = mask_w as f32 / rect.w();
    let scale_y = mask_h as f32 / rect.h();

    iproduct!(rows, cols).for_each(|(row, col)| {
        let y = row as f32 + 0.5;
        let x = col as f32 + 0.5;
        if y < y1 || y >= y2 || x < x1 || x >= x2 {
            return;
        }
        let v = (y - y1) * scale_y - 0.5;
        let u = (x - x1) * scale_x - 0.5;
        canvas[[row, col]] = sample_bilinear(probs, v, u, true) >= threshold;
    });

    canvas
}

/// Canvas indexes possibly touched by `[begin, end)`.
fn pixel_span(begin: f32, end: f32, len: usize) -> Range<usize> {
    let begin = begin.floor().max(0.0).min(len as f32) as usize;
    let end = end.ceil().max(0.0).min(len as f32) as usize;
    begin..end.max(begin)
}

/// Bilinear interpolation at fractional index `(y, x)`. Samples outside the
/// array are zero, or the nearest edge value when `clamp_to_edge` is set.
fn sample_bilinear(source: ArrayView2<f32>, y: f32, x: f32, clamp_to_edge: bool) -> f32 {
    let (height, width) = source.dim();
    if height == 0 || width == 0 || !y.is_finite() || !x.is_finite() {
        return 0.0;
    }

    let (y, x) = if clamp_to_edge {
        (
            y.max(0.0).min((height - 1) as f32),
            x.max(0.0).min((width - 1) as f32),
        )
    } else {
        (y, x)
    };

    let y0 = y.floor();
    let x0 = x.floor();
    let wy = y - y0;
    let wx = x - x0;

    let at = |row: f32, col: f32| -> f32 {
        if row < 0.0 || col < 0.0 || row >= height as f32 || col >= width as f32 {
            0.0
        } else {
            source[[row as usize, col as usize]]
        }
    };

    // clamped samples never read past the last row or column
    let y1 = if clamp_to_edge { (y0 + 1.0).min((height - 1) as f32) } else { y0 + 1.0 };
    let x1 = if clamp_to_edge { (x0 + 1.0).min((width - 1) as f32) } else { x0 + 1.0 };

    (1.0 - wy) * ((1.0 - wx) * at(y0, x0) + wx * at(y0, x1))
        + wy * ((1.0 - wx) * at(y1, x0) + wx * at(y1, x1))
}

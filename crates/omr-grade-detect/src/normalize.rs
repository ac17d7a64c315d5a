//! Geometry normalization: deskew the captured sheet and equalize uneven
//! lighting so later stages see a canonical upright image.

use log::debug;
use omr_grade_core::{sample_bilinear_u8, GrayImage, GrayImageView};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NormalizeParams {
    /// Skew magnitudes below this are left alone, so an already-upright
    /// sheet passes through without resampling.
    pub min_correction_deg: f32,
    /// Tile grid (per axis) for local histogram equalization.
    pub equalize_tiles: usize,
    /// Clip limit relative to the uniform histogram level.
    pub clip_limit: f32,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            min_correction_deg: 0.5,
            equalize_tiles: 8,
            clip_limit: 2.0,
        }
    }
}

/// Otsu's threshold: maximizes inter-class variance of the intensity
/// histogram. Pixels at or below the returned value are foreground (ink).
pub fn otsu_threshold(img: &GrayImageView<'_>) -> u8 {
    let mut histogram = [0u64; 256];
    for &p in img.data {
        histogram[p as usize] += 1;
    }
    let total = img.data.len() as f64;
    let mut total_sum = 0.0f64;
    for (i, &count) in histogram.iter().enumerate() {
        total_sum += i as f64 * count as f64;
    }

    let mut best_threshold = 0u8;
    let mut max_variance = 0.0f64;
    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;

    for (t, &count) in histogram.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (total_sum - sum_bg) / weight_fg;
        let variance = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if variance > max_variance {
            max_variance = variance;
            best_threshold = t as u8;
        }
    }
    best_threshold
}

/// Estimate the dominant skew of the foreground in degrees, in (-45, 45].
///
/// Uses the principal axis of the second central moments of foreground
/// pixel coordinates. Angles past 45 degrees are reinterpreted as the
/// complement so the correction never overshoots 90 degrees. A blank image
/// has no foreground and yields 0.
pub fn estimate_skew_deg(img: &GrayImageView<'_>, fg_threshold: u8) -> f32 {
    let mut n = 0.0f64;
    let mut sx = 0.0f64;
    let mut sy = 0.0f64;
    for y in 0..img.height {
        for x in 0..img.width {
            if img.data[y * img.width + x] <= fg_threshold {
                n += 1.0;
                sx += x as f64;
                sy += y as f64;
            }
        }
    }
    if n < 2.0 {
        return 0.0;
    }
    let mx = sx / n;
    let my = sy / n;

    let mut sxx = 0.0f64;
    let mut syy = 0.0f64;
    let mut sxy = 0.0f64;
    for y in 0..img.height {
        for x in 0..img.width {
            if img.data[y * img.width + x] <= fg_threshold {
                let dx = x as f64 - mx;
                let dy = y as f64 - my;
                sxx += dx * dx;
                syy += dy * dy;
                sxy += dx * dy;
            }
        }
    }
    if sxy.abs() < 1e-9 && (sxx - syy).abs() < 1e-9 {
        return 0.0;
    }

    let mut angle = 0.5 * (2.0 * sxy).atan2(sxx - syy).to_degrees();
    if angle > 45.0 {
        angle -= 90.0;
    } else if angle <= -45.0 {
        angle += 90.0;
    }
    angle as f32
}

/// Remove the given skew by rotating the content about the image center.
///
/// Bilinear resampling with replicated borders; the output keeps the input
/// extent.
pub fn derotate(src: &GrayImageView<'_>, skew_deg: f32) -> GrayImage {
    let mut out = GrayImage::new(src.width, src.height, 0);
    let cx = (src.width as f32 - 1.0) * 0.5;
    let cy = (src.height as f32 - 1.0) * 0.5;
    let (sin_a, cos_a) = skew_deg.to_radians().sin_cos();

    for y in 0..src.height {
        for x in 0..src.width {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let sx = cx + cos_a * dx - sin_a * dy;
            let sy = cy + sin_a * dx + cos_a * dy;
            out.put(x, y, sample_bilinear_u8(src, sx, sy));
        }
    }
    out
}

/// Tiled, clip-limited histogram equalization (local contrast normalization).
pub fn equalize_adaptive(src: &GrayImageView<'_>, tiles: usize, clip_limit: f32) -> GrayImage {
    let tiles = tiles.max(1);
    if src.width == 0 || src.height == 0 {
        return GrayImage::new(src.width, src.height, 0);
    }
    let tile_w = (src.width as f32 / tiles as f32).max(1.0);
    let tile_h = (src.height as f32 / tiles as f32).max(1.0);

    // Per-tile clipped-CDF lookup tables.
    let mut luts = vec![[0u8; 256]; tiles * tiles];
    for ty in 0..tiles {
        for tx in 0..tiles {
            let x0 = (tx as f32 * tile_w) as usize;
            let y0 = (ty as f32 * tile_h) as usize;
            let x1 = (((tx + 1) as f32 * tile_w) as usize).min(src.width);
            let y1 = (((ty + 1) as f32 * tile_h) as usize).min(src.height);

            let mut hist = [0f32; 256];
            let mut count = 0f32;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[src.data[y * src.width + x] as usize] += 1.0;
                    count += 1.0;
                }
            }
            if count == 0.0 {
                continue;
            }

            let clip = clip_limit.max(1.0) * count / 256.0;
            let mut excess = 0.0f32;
            for h in hist.iter_mut() {
                if *h > clip {
                    excess += *h - clip;
                    *h = clip;
                }
            }
            let bonus = excess / 256.0;
            let mut cdf = 0.0f32;
            let lut = &mut luts[ty * tiles + tx];
            for (v, h) in hist.iter().enumerate() {
                cdf += *h + bonus;
                lut[v] = (255.0 * cdf / count).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    // Bilinear blend between the four surrounding tile LUTs.
    let mut out = GrayImage::new(src.width, src.height, 0);
    let max_t = (tiles - 1) as f32;
    for y in 0..src.height {
        let fy = ((y as f32 + 0.5) / tile_h - 0.5).clamp(0.0, max_t);
        let ty0 = fy.floor() as usize;
        let ty1 = (ty0 + 1).min(tiles - 1);
        let wy = fy - ty0 as f32;
        for x in 0..src.width {
            let fx = ((x as f32 + 0.5) / tile_w - 0.5).clamp(0.0, max_t);
            let tx0 = fx.floor() as usize;
            let tx1 = (tx0 + 1).min(tiles - 1);
            let wx = fx - tx0 as f32;

            let v = src.data[y * src.width + x] as usize;
            let p00 = luts[ty0 * tiles + tx0][v] as f32;
            let p10 = luts[ty0 * tiles + tx1][v] as f32;
            let p01 = luts[ty1 * tiles + tx0][v] as f32;
            let p11 = luts[ty1 * tiles + tx1][v] as f32;
            let a = p00 + wx * (p10 - p00);
            let b = p01 + wx * (p11 - p01);
            out.put(x, y, (a + wy * (b - a)).round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}

/// Full normalization: foreground mask, skew estimate, derotation, local
/// contrast equalization. Never fails; a blank sheet passes through and is
/// reported as low-confidence downstream.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(src, params), fields(width = src.width, height = src.height))
)]
pub fn normalize(src: &GrayImageView<'_>, params: &NormalizeParams) -> GrayImage {
    let fg = otsu_threshold(src);
    let skew = estimate_skew_deg(src, fg);

    let upright = if skew.abs() >= params.min_correction_deg {
        debug!("correcting skew of {skew:.2} deg");
        derotate(src, skew)
    } else {
        GrayImage {
            width: src.width,
            height: src.height,
            data: src.data.to_vec(),
        }
    };

    equalize_adaptive(&upright.as_view(), params.equalize_tiles, params.clip_limit)
}

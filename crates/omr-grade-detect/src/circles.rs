//! Circular bubble localization.
//!
//! Bubbles are printed outlines (filled or not), so every bubble shows a
//! dark rim against brighter paper just outside it. The detector scores each
//! candidate (center, radius) by the contrast between an outer annulus and
//! the rim, sampled on a shared unit-circle LUT, and keeps local maxima.

use nalgebra::Point2;
use omr_grade_core::{sample_bilinear, GrayImageView};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CircleDetectParams {
    /// Inclusive bubble radius bounds in pixels.
    pub min_radius: f32,
    pub max_radius: f32,
    /// Minimum rim-vs-surround contrast (0..255 scale) to accept.
    pub min_contrast: f32,
    /// Center scan stride in pixels.
    pub scan_step: usize,
    /// Samples per circle perimeter.
    pub samples: usize,
    /// Outer annulus radius as a multiple of the rim radius.
    pub surround_mul: f32,
}

impl Default for CircleDetectParams {
    fn default() -> Self {
        Self {
            min_radius: 6.0,
            max_radius: 14.0,
            min_contrast: 40.0,
            scan_step: 2,
            samples: 32,
            surround_mul: 1.45,
        }
    }
}

impl CircleDetectParams {
    /// Params with the radius bounds taken from a template.
    pub fn for_radius_bounds(bounds: [f32; 2]) -> Self {
        Self {
            min_radius: bounds[0],
            max_radius: bounds[1],
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DetectedCircle {
    pub center: Point2<f32>,
    pub radius: f32,
    /// Rim-vs-surround contrast; larger means a stronger bubble outline.
    pub response: f32,
}

fn build_unit_circle_lut(samples: usize) -> Vec<(f32, f32)> {
    let step = std::f32::consts::TAU / samples.max(4) as f32;
    (0..samples.max(4))
        .map(|k| {
            let (s, c) = (k as f32 * step).sin_cos();
            (c, s)
        })
        .collect()
}

fn ring_mean(img: &GrayImageView<'_>, cx: f32, cy: f32, r: f32, dirs: &[(f32, f32)]) -> f32 {
    let mut sum = 0.0f32;
    for &(ux, uy) in dirs {
        sum += sample_bilinear(img, cx + r * ux, cy + r * uy);
    }
    sum / dirs.len() as f32
}

/// Scan the image for bubble outlines within the configured radius bounds.
///
/// Near-duplicate detections (centers within one radius) are suppressed,
/// keeping the strongest response. An image with no circles yields an empty
/// set, not an error.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, params), fields(width = img.width, height = img.height))
)]
pub fn detect_circles(img: &GrayImageView<'_>, params: &CircleDetectParams) -> Vec<DetectedCircle> {
    if img.width == 0 || img.height == 0 || params.min_radius <= 0.0 {
        return Vec::new();
    }
    let dirs = build_unit_circle_lut(params.samples);
    let step = params.scan_step.max(1);

    let mut raw = Vec::new();
    let margin = params.min_radius.ceil() as usize;
    if img.width <= 2 * margin || img.height <= 2 * margin {
        return Vec::new();
    }

    for y in (margin..img.height - margin).step_by(step) {
        for x in (margin..img.width - margin).step_by(step) {
            let cx = x as f32;
            let cy = y as f32;

            let mut best: Option<(f32, f32)> = None; // (radius, response)
            let mut r = params.min_radius;
            while r <= params.max_radius + 1e-3 {
                let rim = ring_mean(img, cx, cy, r, &dirs);
                let surround = ring_mean(img, cx, cy, r * params.surround_mul, &dirs);
                let response = surround - rim;
                if best.map(|(_, b)| response > b).unwrap_or(true) {
                    best = Some((r, response));
                }
                r += 1.0;
            }

            if let Some((radius, response)) = best {
                if response >= params.min_contrast {
                    raw.push(DetectedCircle {
                        center: Point2::new(cx, cy),
                        radius,
                        response,
                    });
                }
            }
        }
    }

    suppress_duplicates(raw)
}

/// Greedy strongest-first suppression: a candidate whose center lies within
/// one radius of an already-kept circle is a duplicate of it.
fn suppress_duplicates(mut raw: Vec<DetectedCircle>) -> Vec<DetectedCircle> {
    raw.sort_by(|a, b| {
        b.response
            .partial_cmp(&a.response)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<DetectedCircle> = Vec::new();
    for c in raw {
        let merge_dist = |k: &DetectedCircle| k.radius.max(c.radius);
        if kept
            .iter()
            .all(|k| (k.center - c.center).norm() > merge_dist(k))
        {
            kept.push(c);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use omr_grade_core::GrayImage;

    fn draw_ring(img: &mut GrayImage, cx: f32, cy: f32, r: f32, fill: bool) {
        for y in 0..img.height {
            for x in 0..img.width {
                let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
                let on_rim = (d - r).abs() <= 1.2;
                let inside = d < r;
                if on_rim || (fill && inside) {
                    img.put(x, y, 10);
                }
            }
        }
    }

    fn params() -> CircleDetectParams {
        CircleDetectParams {
            min_radius: 6.0,
            max_radius: 12.0,
            ..CircleDetectParams::default()
        }
    }

    #[test]
    fn blank_image_yields_no_circles() {
        let img = GrayImage::new(80, 80, 255);
        assert!(detect_circles(&img.as_view(), &params()).is_empty());
    }

    #[test]
    fn finds_an_outline_bubble() {
        let mut img = GrayImage::new(80, 80, 255);
        draw_ring(&mut img, 40.0, 40.0, 9.0, false);
        let found = detect_circles(&img.as_view(), &params());
        assert!(!found.is_empty());
        let best = &found[0];
        assert!((best.center.x - 40.0).abs() <= 2.5);
        assert!((best.center.y - 40.0).abs() <= 2.5);
    }

    #[test]
    fn finds_a_filled_bubble() {
        let mut img = GrayImage::new(80, 80, 255);
        draw_ring(&mut img, 36.0, 44.0, 9.0, true);
        let found = detect_circles(&img.as_view(), &params());
        assert!(!found.is_empty());
        assert!((found[0].center.x - 36.0).abs() <= 2.5);
        assert!((found[0].center.y - 44.0).abs() <= 2.5);
    }

    #[test]
    fn near_duplicates_are_suppressed() {
        let raw = vec![
            DetectedCircle {
                center: Point2::new(40.0, 40.0),
                radius: 9.0,
                response: 100.0,
            },
            DetectedCircle {
                center: Point2::new(43.0, 41.0),
                radius: 9.0,
                response: 80.0,
            },
            DetectedCircle {
                center: Point2::new(70.0, 40.0),
                radius: 9.0,
                response: 60.0,
            },
        ];
        let kept = suppress_duplicates(raw);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].response - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn two_separated_bubbles_are_both_found() {
        let mut img = GrayImage::new(120, 60, 255);
        draw_ring(&mut img, 30.0, 30.0, 8.0, true);
        draw_ring(&mut img, 90.0, 30.0, 8.0, false);
        let found = detect_circles(&img.as_view(), &params());
        assert_eq!(found.len(), 2);
    }
}

//! Fill measurement and template mapping: turn detected circles into
//! per-question answer candidates.

use log::debug;
use nalgebra::Point2;
use omr_grade_core::{GrayImageView, TemplateGeometry};
use serde::{Deserialize, Serialize};

use crate::circles::{detect_circles, CircleDetectParams};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MarkParams {
    /// Fill ratio at or above this is a marked answer.
    pub marked_threshold: f32,
    /// Fill ratio below this is unmarked; [ambiguous_low, marked_threshold)
    /// is the ambiguous band handed to the resolver.
    pub ambiguous_low: f32,
    /// Pixels at or below this intensity count as dark inside the mask.
    pub dark_threshold: u8,
    /// Max snap distance to a template cell, as a fraction of the smaller
    /// pitch.
    pub snap_tolerance_frac: f32,
    /// A second marked bubble on the same question within this fill-ratio
    /// gap makes the question ambiguous instead of silently picking one.
    pub min_runner_up_gap: f32,
}

impl Default for MarkParams {
    fn default() -> Self {
        Self {
            marked_threshold: 60.0,
            ambiguous_low: 40.0,
            dark_threshold: 128,
            snap_tolerance_frac: 0.35,
            min_runner_up_gap: 8.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MarkClass {
    Marked,
    Ambiguous,
    Unmarked,
}

/// Classify a fill ratio against the marked/ambiguous thresholds.
pub fn classify_fill(fill_ratio: f32, params: &MarkParams) -> MarkClass {
    if fill_ratio >= params.marked_threshold {
        MarkClass::Marked
    } else if fill_ratio >= params.ambiguous_low {
        MarkClass::Ambiguous
    } else {
        MarkClass::Unmarked
    }
}

/// One bubble mapped onto the template grid. Immutable once produced.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BubbleCandidate {
    pub position: Point2<f32>,
    pub radius: f32,
    /// Fraction of mask pixels classified dark, 0..=100.
    pub fill_ratio: f32,
    pub question: u32,
    pub option: char,
    /// Column of `option` in the alphabet; tie-break key.
    pub option_col: usize,
}

/// Fraction (0..=100) of disk pixels at or below the dark threshold.
pub fn fill_ratio(
    img: &GrayImageView<'_>,
    center: Point2<f32>,
    radius: f32,
    dark_threshold: u8,
) -> f32 {
    let r = radius.max(1.0);
    let x0 = ((center.x - r).floor().max(0.0)) as usize;
    let y0 = ((center.y - r).floor().max(0.0)) as usize;
    let x1 = (((center.x + r).ceil()) as usize).min(img.width.saturating_sub(1));
    let y1 = (((center.y + r).ceil()) as usize).min(img.height.saturating_sub(1));

    let mut dark = 0usize;
    let mut total = 0usize;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f32 - center.x;
            let dy = y as f32 - center.y;
            if dx * dx + dy * dy > r * r {
                continue;
            }
            total += 1;
            if img.data[y * img.width + x] <= dark_threshold {
                dark += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        100.0 * dark as f32 / total as f32
    }
}

/// Snap a circle center to the nearest template cell.
///
/// Returns (question, option column), or None when the center does not
/// align with any cell within tolerance.
fn snap_to_cell(
    center: Point2<f32>,
    template: &TemplateGeometry,
    tolerance_frac: f32,
) -> Option<(u32, usize)> {
    let col = ((center.x - template.origin_x) / template.col_pitch).round();
    let row = ((center.y - template.origin_y) / template.row_pitch).round();
    if col < 0.0 || row < 0.0 {
        return None;
    }
    let col = col as usize;
    let question = row as u32 + 1;
    if col >= template.alphabet.len() || question > template.questions {
        return None;
    }

    let (ex, ey) = template.cell_center(question, col);
    let tol = tolerance_frac * template.row_pitch.min(template.col_pitch);
    let dist = ((center.x - ex).powi(2) + (center.y - ey).powi(2)).sqrt();
    if dist > tol {
        return None;
    }
    Some((question, col))
}

/// Outcome of mark detection for one sheet.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SheetDetection {
    /// Questions decided directly from the fill ratio.
    pub answers: std::collections::BTreeMap<u32, char>,
    /// Ambiguous-band candidates, one per undecided question, for the
    /// resolver.
    pub ambiguous: Vec<BubbleCandidate>,
    /// Every template-aligned candidate, for diagnostics.
    pub candidates: Vec<BubbleCandidate>,
}

/// Locate bubbles, measure fills and decide each question where the fill
/// ratio is conclusive.
pub fn detect_marks(
    img: &GrayImageView<'_>,
    template: &TemplateGeometry,
    circle_params: &CircleDetectParams,
    params: &MarkParams,
) -> SheetDetection {
    let circles = detect_circles(img, circle_params);

    let mut candidates = Vec::with_capacity(circles.len());
    for c in &circles {
        let Some((question, col)) = snap_to_cell(c.center, template, params.snap_tolerance_frac)
        else {
            debug!(
                "dropping off-template circle at ({:.1}, {:.1})",
                c.center.x, c.center.y
            );
            continue;
        };
        let Some(option) = template.alphabet.letter_at(col) else {
            continue;
        };
        candidates.push(BubbleCandidate {
            position: c.center,
            radius: c.radius,
            fill_ratio: fill_ratio(img, c.center, c.radius, params.dark_threshold),
            question,
            option,
            option_col: col,
        });
    }

    decide_questions(candidates, params)
}

/// Per-question decision from mapped candidates. Deterministic: the result
/// does not depend on the input order.
pub fn decide_questions(mut candidates: Vec<BubbleCandidate>, params: &MarkParams) -> SheetDetection {
    // Canonical order first so later tie-breaks are order-independent.
    candidates.sort_by(|a, b| {
        (a.question, a.option_col)
            .cmp(&(b.question, b.option_col))
            .then(
                a.fill_ratio
                    .partial_cmp(&b.fill_ratio)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut det = SheetDetection {
        candidates: candidates.clone(),
        ..SheetDetection::default()
    };

    let mut idx = 0;
    while idx < candidates.len() {
        let question = candidates[idx].question;
        let mut end = idx;
        while end < candidates.len() && candidates[end].question == question {
            end += 1;
        }
        decide_one_question(&candidates[idx..end], params, &mut det);
        idx = end;
    }
    det
}

fn decide_one_question(group: &[BubbleCandidate], params: &MarkParams, det: &mut SheetDetection) {
    let mut marked: Vec<&BubbleCandidate> = group
        .iter()
        .filter(|c| classify_fill(c.fill_ratio, params) == MarkClass::Marked)
        .collect();

    if !marked.is_empty() {
        // Higher fill wins; ties break on option column.
        marked.sort_by(|a, b| {
            b.fill_ratio
                .partial_cmp(&a.fill_ratio)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.option_col.cmp(&b.option_col))
        });
        let best = marked[0];
        let too_close = marked
            .get(1)
            .map(|second| best.fill_ratio - second.fill_ratio < params.min_runner_up_gap)
            .unwrap_or(false);
        if too_close {
            debug!(
                "question {} has two near-equal marks, escalating",
                best.question
            );
            det.ambiguous.push(*best);
        } else {
            det.answers.insert(best.question, best.option);
        }
        return;
    }

    let band = group
        .iter()
        .filter(|c| classify_fill(c.fill_ratio, params) == MarkClass::Ambiguous)
        .max_by(|a, b| {
            a.fill_ratio
                .partial_cmp(&b.fill_ratio)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.option_col.cmp(&a.option_col))
        });
    if let Some(c) = band {
        det.ambiguous.push(*c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omr_grade_core::{GrayImage, OptionAlphabet};

    fn template() -> TemplateGeometry {
        TemplateGeometry {
            origin_x: 20.0,
            origin_y: 20.0,
            row_pitch: 30.0,
            col_pitch: 25.0,
            questions: 10,
            bubble_radius: [6.0, 12.0],
            alphabet: OptionAlphabet::default(),
        }
    }

    fn candidate(question: u32, col: usize, fill: f32) -> BubbleCandidate {
        BubbleCandidate {
            position: Point2::new(0.0, 0.0),
            radius: 9.0,
            fill_ratio: fill,
            question,
            option: ['A', 'B', 'C', 'D'][col],
            option_col: col,
        }
    }

    #[test]
    fn fill_band_boundaries() {
        let p = MarkParams::default();
        assert_eq!(classify_fill(39.0, &p), MarkClass::Unmarked);
        assert_eq!(classify_fill(40.0, &p), MarkClass::Ambiguous);
        assert_eq!(classify_fill(59.0, &p), MarkClass::Ambiguous);
        assert_eq!(classify_fill(60.0, &p), MarkClass::Marked);
        assert_eq!(classify_fill(61.0, &p), MarkClass::Marked);
    }

    #[test]
    fn fill_ratio_of_solid_disk_is_high() {
        let mut img = GrayImage::new(40, 40, 255);
        for y in 0..40 {
            for x in 0..40 {
                let d = ((x as f32 - 20.0).powi(2) + (y as f32 - 20.0).powi(2)).sqrt();
                if d <= 9.0 {
                    img.put(x, y, 10);
                }
            }
        }
        let f = fill_ratio(&img.as_view(), Point2::new(20.0, 20.0), 9.0, 128);
        assert!(f > 90.0, "fill {f}");
        let empty = fill_ratio(&img.as_view(), Point2::new(5.0, 5.0), 4.0, 128);
        assert!(empty < 5.0, "fill {empty}");
    }

    #[test]
    fn snap_rejects_misaligned_centers() {
        let tpl = template();
        assert_eq!(
            snap_to_cell(Point2::new(45.2, 50.1), &tpl, 0.35),
            Some((2, 1))
        );
        // Halfway between two columns.
        assert_eq!(snap_to_cell(Point2::new(32.5, 20.0), &tpl, 0.35), None);
        // Outside the grid entirely.
        assert_eq!(snap_to_cell(Point2::new(500.0, 500.0), &tpl, 0.35), None);
    }

    #[test]
    fn higher_fill_wins_regardless_of_order() {
        let p = MarkParams::default();
        let a = vec![candidate(1, 0, 95.0), candidate(1, 2, 70.0)];
        let b = vec![candidate(1, 2, 70.0), candidate(1, 0, 95.0)];
        let da = decide_questions(a, &p);
        let db = decide_questions(b, &p);
        assert_eq!(da.answers.get(&1), Some(&'A'));
        assert_eq!(db.answers.get(&1), Some(&'A'));
    }

    #[test]
    fn equal_fills_break_on_option_column() {
        let p = MarkParams {
            min_runner_up_gap: 0.0,
            ..MarkParams::default()
        };
        let a = vec![candidate(1, 3, 80.0), candidate(1, 1, 80.0)];
        let b = vec![candidate(1, 1, 80.0), candidate(1, 3, 80.0)];
        assert_eq!(decide_questions(a, &p).answers.get(&1), Some(&'B'));
        assert_eq!(decide_questions(b, &p).answers.get(&1), Some(&'B'));
    }

    #[test]
    fn close_runner_up_escalates_instead_of_guessing() {
        let p = MarkParams::default();
        let det = decide_questions(vec![candidate(3, 0, 82.0), candidate(3, 1, 78.0)], &p);
        assert!(det.answers.is_empty());
        assert_eq!(det.ambiguous.len(), 1);
        assert_eq!(det.ambiguous[0].question, 3);
    }

    #[test]
    fn ambiguous_band_goes_to_resolver_not_answers() {
        let p = MarkParams::default();
        let det = decide_questions(vec![candidate(2, 1, 50.0)], &p);
        assert!(det.answers.is_empty());
        assert_eq!(det.ambiguous.len(), 1);
        assert_eq!(det.ambiguous[0].option, 'B');
    }

    #[test]
    fn unmarked_bubbles_are_excluded() {
        let p = MarkParams::default();
        let det = decide_questions(
            vec![candidate(1, 0, 12.0), candidate(1, 1, 20.0), candidate(2, 0, 90.0)],
            &p,
        );
        assert_eq!(det.answers.len(), 1);
        assert_eq!(det.answers.get(&2), Some(&'A'));
        assert!(det.ambiguous.is_empty());
    }
}

//! Per-sheet grading pipeline: decode, normalize, detect, resolve, aggregate.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use omr_grade_core::{
    aggregate, AnswerKey, DetectionStats, GrayImage, ScoreParams, SheetResult, SubjectMap,
    TemplateGeometry,
};
use omr_grade_detect::{
    detect_marks, normalize, AmbiguityResolver, CircleDetectParams, ClassifyRequest,
    ExternalClassifier, MarkParams, NormalizeParams, Resolution,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors local to one sheet. The batch orchestrator converts these into a
/// `Failed` sheet result; they never abort the batch.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("cannot decode sheet image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("sheet image has zero extent ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

/// All tunables of one grading run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineParams {
    #[serde(default)]
    pub normalize: NormalizeParams,
    #[serde(default)]
    pub marks: MarkParams,
    #[serde(default)]
    pub score: ScoreParams,
    /// Upper bound on one external classification call, milliseconds.
    #[serde(default = "default_classify_timeout_ms")]
    pub classify_timeout_ms: u64,
}

fn default_classify_timeout_ms() -> u64 {
    3000
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            normalize: NormalizeParams::default(),
            marks: MarkParams::default(),
            score: ScoreParams::default(),
            classify_timeout_ms: default_classify_timeout_ms(),
        }
    }
}

/// Decode raster bytes (JPEG/PNG and whatever else `image` understands)
/// into the internal grayscale type.
pub fn decode_gray(bytes: &[u8]) -> Result<GrayImage, PipelineError> {
    let decoded = image::load_from_memory(bytes)?;
    let luma = decoded.to_luma8();
    let (width, height) = luma.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::EmptyImage { width, height });
    }
    Ok(GrayImage {
        width: width as usize,
        height: height as usize,
        data: luma.into_raw(),
    })
}

/// Grade one already-decoded sheet.
///
/// Never fails: a sheet with no detectable marks simply comes back with
/// zero confidence and the review flag set.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(gray, key, subjects, template, params, classifier),
        fields(width = gray.width, height = gray.height, student_id = %student_id)
    )
)]
#[allow(clippy::too_many_arguments)]
pub fn score_sheet(
    gray: &GrayImage,
    key: &AnswerKey,
    subjects: &SubjectMap,
    template: &TemplateGeometry,
    params: &PipelineParams,
    classifier: Option<Arc<dyn ExternalClassifier>>,
    student_id: &str,
) -> SheetResult {
    let upright = normalize(&gray.as_view(), &params.normalize);
    let view = upright.as_view();

    let circle_params = CircleDetectParams::for_radius_bounds(template.bubble_radius);
    let detection = detect_marks(&view, template, &circle_params, &params.marks);

    let resolver = match classifier {
        Some(c) => AmbiguityResolver::with_classifier(
            &params.marks,
            c,
            Duration::from_millis(params.classify_timeout_ms),
        ),
        None => AmbiguityResolver::local(&params.marks),
    };

    let mut answers = detection.answers;
    let mut abstained = 0usize;
    for candidate in &detection.ambiguous {
        let request = ClassifyRequest {
            region: view.crop_centered(
                candidate.position.x,
                candidate.position.y,
                2.0 * candidate.radius,
            ),
            fill_ratio: candidate.fill_ratio,
            alphabet: template.alphabet.letters().to_vec(),
            suggested: candidate.option,
        };
        match resolver.resolve(request) {
            Resolution::Accepted(option) => {
                answers.entry(candidate.question).or_insert(option);
            }
            Resolution::Abstained => abstained += 1,
        }
    }

    let stats = DetectionStats {
        ambiguous: detection.ambiguous.len(),
        abstained,
    };
    aggregate(&answers, key, subjects, student_id, &params.score, stats)
}

/// Decode and grade one sheet from raw bytes.
pub fn score_sheet_bytes(
    bytes: &[u8],
    key: &AnswerKey,
    subjects: &SubjectMap,
    template: &TemplateGeometry,
    params: &PipelineParams,
    classifier: Option<Arc<dyn ExternalClassifier>>,
    student_id: &str,
) -> Result<SheetResult, PipelineError> {
    let gray = decode_gray(bytes)?;
    Ok(score_sheet(
        &gray, key, subjects, template, params, classifier, student_id,
    ))
}

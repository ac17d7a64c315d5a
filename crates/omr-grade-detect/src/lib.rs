//! Pixel-level stages of OMR sheet grading.
//!
//! Pipeline order:
//! - `normalize`: deskew and contrast-equalize the captured image,
//! - `circles`: find candidate bubble outlines with a ring-contrast score,
//! - `marks`: measure fill ratios and map bubbles to (question, option),
//! - `resolve`: escalate ambiguous fills to an injected classifier or a
//!   deterministic local fallback.

pub mod circles;
pub mod marks;
pub mod normalize;
pub mod resolve;

pub use circles::{detect_circles, CircleDetectParams, DetectedCircle};
pub use marks::{
    classify_fill, detect_marks, fill_ratio, BubbleCandidate, MarkClass, MarkParams, SheetDetection,
};
pub use normalize::{estimate_skew_deg, normalize, otsu_threshold, NormalizeParams};
pub use resolve::{
    AmbiguityResolver, ClassifyError, ClassifyRequest, ExternalClassifier, Resolution,
};

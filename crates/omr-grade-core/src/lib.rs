//! Core types and scoring logic for OMR answer-sheet grading.
//!
//! This crate is intentionally small and does *not* decode rasters or touch
//! pixels beyond a lightweight grayscale view type. Detection lives in
//! `omr-grade-detect`, end-to-end helpers in `omr-grade`.

mod image;
mod key;
mod logger;
mod score;
mod template;

pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView};
pub use key::{AnswerKey, KeyFormatError};
pub use score::{
    aggregate, BatchResult, DetectedAnswers, DetectionStats, ScoreParams, SheetResult, SheetStatus,
};
pub use template::{OptionAlphabet, SubjectMap, SubjectRange, TemplateError, TemplateGeometry};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;

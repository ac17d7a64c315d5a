//! High-level facade crate for the `omr-grade-*` workspace.
//!
//! This crate provides:
//! - stable re-exports of the core and detection crates
//! - raster decoding and the per-sheet grading pipeline
//! - a batch orchestrator that isolates per-sheet failures and can fan
//!   sheets out over a rayon worker pool (feature `rayon`, on by default)
//! - a small CLI (feature `cli`)
//!
//! ## Quickstart
//!
//! ```no_run
//! use omr_grade::batch::{BatchProcessor, SheetInput};
//! use omr_grade::core::{AnswerKey, OptionAlphabet, SubjectMap, SubjectRange, TemplateGeometry};
//! use omr_grade::pipeline::PipelineParams;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let alphabet = OptionAlphabet::default();
//! let key = AnswerKey::parse("1 - A\n2 - B\n3 - C\n", &alphabet)?;
//! let subjects = SubjectMap::new(vec![SubjectRange { name: "S1".into(), first: 1, last: 3 }])?;
//! let template = TemplateGeometry {
//!     origin_x: 40.0,
//!     origin_y: 40.0,
//!     row_pitch: 32.0,
//!     col_pitch: 28.0,
//!     questions: 3,
//!     bubble_radius: [7.0, 12.0],
//!     alphabet,
//! };
//!
//! let processor = BatchProcessor::new(key, subjects, template, PipelineParams::default());
//! let sheets = vec![SheetInput::from_bytes(std::fs::read("sheet.png")?)];
//! let batch = processor.process(&sheets);
//! println!("scored {} sheets", batch.attempted);
//! # Ok(())
//! # }
//! ```

pub use omr_grade_core as core;
pub use omr_grade_detect as detect;

pub use omr_grade_core::{
    AnswerKey, BatchResult, OptionAlphabet, ScoreParams, SheetResult, SheetStatus, SubjectMap,
    SubjectRange, TemplateGeometry,
};
pub use omr_grade_detect::{AmbiguityResolver, ExternalClassifier};

pub mod batch;
pub mod pipeline;

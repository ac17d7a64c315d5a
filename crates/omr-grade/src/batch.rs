//! Batch orchestration: grade many sheets against one shared answer key,
//! isolating per-sheet failures.

use std::sync::Arc;

use log::warn;

use omr_grade_core::{AnswerKey, BatchResult, SheetResult, SubjectMap, TemplateGeometry};
use omr_grade_detect::ExternalClassifier;

use crate::pipeline::{score_sheet_bytes, PipelineParams};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// One sheet to grade. An explicit `student_id` wins over the ordinal
/// placeholder assigned from input position.
#[derive(Clone, Debug)]
pub struct SheetInput {
    pub student_id: Option<String>,
    pub bytes: Vec<u8>,
}

impl SheetInput {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            student_id: None,
            bytes,
        }
    }

    pub fn with_id(student_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            student_id: Some(student_id.into()),
            bytes,
        }
    }
}

/// Shares the read-only answer key, subject map and template across all
/// sheets of one batch. With the `rayon` feature, sheets fan out over the
/// global worker pool; results keep input order either way.
pub struct BatchProcessor {
    key: AnswerKey,
    subjects: SubjectMap,
    template: TemplateGeometry,
    params: PipelineParams,
    classifier: Option<Arc<dyn ExternalClassifier>>,
}

impl BatchProcessor {
    pub fn new(
        key: AnswerKey,
        subjects: SubjectMap,
        template: TemplateGeometry,
        params: PipelineParams,
    ) -> Self {
        Self {
            key,
            subjects,
            template,
            params,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ExternalClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn subjects(&self) -> &SubjectMap {
        &self.subjects
    }

    /// Grade every sheet. A sheet that cannot be decoded yields a `Failed`
    /// result with a diagnostic; the rest of the batch is unaffected.
    pub fn process(&self, sheets: &[SheetInput]) -> BatchResult {
        #[cfg(feature = "rayon")]
        let results: Vec<SheetResult> = sheets
            .par_iter()
            .enumerate()
            .map(|(index, sheet)| self.process_one(index, sheet))
            .collect();

        #[cfg(not(feature = "rayon"))]
        let results: Vec<SheetResult> = sheets
            .iter()
            .enumerate()
            .map(|(index, sheet)| self.process_one(index, sheet))
            .collect();

        BatchResult {
            attempted: sheets.len(),
            sheets: results,
        }
    }

    fn process_one(&self, index: usize, sheet: &SheetInput) -> SheetResult {
        let student_id = sheet
            .student_id
            .clone()
            .unwrap_or_else(|| format!("sheet-{}", index + 1));

        match score_sheet_bytes(
            &sheet.bytes,
            &self.key,
            &self.subjects,
            &self.template,
            &self.params,
            self.classifier.clone(),
            &student_id,
        ) {
            Ok(result) => result,
            Err(err) => {
                warn!("sheet {student_id}: {err}");
                SheetResult::failed(student_id, err.to_string())
            }
        }
    }
}

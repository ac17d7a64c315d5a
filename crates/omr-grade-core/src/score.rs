//! Score aggregation: join detected answers against the key and produce the
//! per-sheet result record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::key::AnswerKey;
use crate::template::SubjectMap;

/// Question -> detected option. Questions with no decided mark are absent.
pub type DetectedAnswers = BTreeMap<u32, char>;

/// What happened during detection, for confidence and review flagging.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct DetectionStats {
    /// Candidates that fell into the ambiguous fill-ratio band.
    pub ambiguous: usize,
    /// Ambiguous candidates where resolution abstained.
    pub abstained: usize,
}

/// Aggregation thresholds. Named configuration rather than magic numbers so
/// they can be tuned per deployment.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScoreParams {
    /// Sheets below this confidence are flagged for manual review.
    pub review_confidence: u8,
    /// Flag when ambiguous candidates exceed this fraction of key questions.
    pub max_ambiguous_frac: f32,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            review_confidence: 80,
            max_ambiguous_frac: 0.25,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetStatus {
    Completed,
    PartiallyProcessed,
    Failed,
}

/// Final record for one sheet. Immutable once produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SheetResult {
    pub student_id: String,
    pub total_score: u32,
    pub subject_scores: BTreeMap<String, u32>,
    pub detected_answers: DetectedAnswers,
    /// Percent of key questions with a non-abstained detection, 0..=100.
    pub confidence: u8,
    pub flagged_for_review: bool,
    pub status: SheetStatus,
    /// Failure or processing diagnostic, distinct from the score fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl SheetResult {
    /// Result for a sheet that could not be processed at all.
    pub fn failed(student_id: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            total_score: 0,
            subject_scores: BTreeMap::new(),
            detected_answers: BTreeMap::new(),
            confidence: 0,
            flagged_for_review: true,
            status: SheetStatus::Failed,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// Join detected answers against the key and subject ranges.
///
/// A matching question outside every subject range still counts toward the
/// total. Detections for questions absent from the key are ignored and do
/// not appear in the published result.
pub fn aggregate(
    detected: &DetectedAnswers,
    key: &AnswerKey,
    subjects: &SubjectMap,
    student_id: impl Into<String>,
    params: &ScoreParams,
    stats: DetectionStats,
) -> SheetResult {
    let mut total = 0u32;
    let mut subject_scores: BTreeMap<String, u32> = subjects
        .ranges()
        .iter()
        .map(|r| (r.name.clone(), 0))
        .collect();

    let mut answers = DetectedAnswers::new();
    for (&question, &option) in detected {
        let Some(correct) = key.correct_option(question) else {
            continue;
        };
        answers.insert(question, option);
        if option == correct {
            total += 1;
            if let Some(subject) = subjects.subject_for(question) {
                *subject_scores.entry(subject.to_string()).or_insert(0) += 1;
            }
        }
    }

    let decided_in_key = answers.len();
    let key_len = key.len();
    let confidence = if key_len == 0 {
        0
    } else {
        ((100.0 * decided_in_key as f64 / key_len as f64).round() as u8).min(100)
    };

    let too_many_ambiguous =
        key_len > 0 && stats.ambiguous as f32 > params.max_ambiguous_frac * key_len as f32;
    let flagged = confidence < params.review_confidence || too_many_ambiguous;

    let status = if decided_in_key == key_len && stats.abstained == 0 {
        SheetStatus::Completed
    } else {
        SheetStatus::PartiallyProcessed
    };

    SheetResult {
        student_id: student_id.into(),
        total_score: total,
        subject_scores,
        detected_answers: answers,
        confidence,
        flagged_for_review: flagged,
        status,
        diagnostic: None,
    }
}

/// Ordered sheet results plus the number of sheets attempted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchResult {
    pub sheets: Vec<SheetResult>,
    pub attempted: usize,
}

/// Quote a CSV field when it carries a delimiter, a quote or a newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl BatchResult {
    /// Plain CSV rows for the display/export collaborator:
    /// `student_id,total,<one column per subject>,status,flagged,confidence`.
    pub fn csv_rows(&self, subjects: &SubjectMap) -> Vec<String> {
        let mut header = String::from("student_id,total");
        for r in subjects.ranges() {
            header.push(',');
            header.push_str(&csv_field(&r.name));
        }
        header.push_str(",status,flagged,confidence");

        let mut rows = Vec::with_capacity(self.sheets.len() + 1);
        rows.push(header);
        for s in &self.sheets {
            let mut row = format!("{},{}", csv_field(&s.student_id), s.total_score);
            for r in subjects.ranges() {
                let score = s.subject_scores.get(&r.name).copied().unwrap_or(0);
                row.push_str(&format!(",{score}"));
            }
            let status = match s.status {
                SheetStatus::Completed => "completed",
                SheetStatus::PartiallyProcessed => "partially_processed",
                SheetStatus::Failed => "failed",
            };
            row.push_str(&format!(",{status},{},{}", s.flagged_for_review, s.confidence));
            rows.push(row);
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{OptionAlphabet, SubjectRange};

    fn key_from(rows: &str) -> AnswerKey {
        AnswerKey::parse(rows, &OptionAlphabet::default()).unwrap()
    }

    fn subjects_s1_s2() -> SubjectMap {
        SubjectMap::new(vec![
            SubjectRange {
                name: "S1".into(),
                first: 1,
                last: 2,
            },
            SubjectRange {
                name: "S2".into(),
                first: 3,
                last: 3,
            },
        ])
        .unwrap()
    }

    #[test]
    fn total_counts_exact_matches_only() {
        let key = key_from("1-A\n2-B\n3-C\n4-D\n5-A\n");
        let subjects = SubjectMap::new(vec![]).unwrap();
        let detected: DetectedAnswers =
            [(1, 'A'), (2, 'B'), (3, 'A'), (5, 'A')].into_iter().collect();
        let res = aggregate(
            &detected,
            &key,
            &subjects,
            "s",
            &ScoreParams::default(),
            DetectionStats::default(),
        );
        assert_eq!(res.total_score, 3);
    }

    #[test]
    fn subject_buckets_follow_ranges() {
        let key = key_from("1-A\n2-B\n3-C\n");
        let detected: DetectedAnswers = [(1, 'A'), (2, 'C'), (3, 'C')].into_iter().collect();
        let res = aggregate(
            &detected,
            &key,
            &subjects_s1_s2(),
            "s",
            &ScoreParams::default(),
            DetectionStats::default(),
        );
        assert_eq!(res.total_score, 2);
        assert_eq!(res.subject_scores["S1"], 1);
        assert_eq!(res.subject_scores["S2"], 1);
    }

    #[test]
    fn question_outside_subjects_counts_toward_total_only() {
        let key = key_from("1-A\n9-B\n");
        let subjects = SubjectMap::new(vec![SubjectRange {
            name: "S1".into(),
            first: 1,
            last: 2,
        }])
        .unwrap();
        let detected: DetectedAnswers = [(1, 'A'), (9, 'B')].into_iter().collect();
        let res = aggregate(
            &detected,
            &key,
            &subjects,
            "s",
            &ScoreParams::default(),
            DetectionStats::default(),
        );
        assert_eq!(res.total_score, 2);
        assert_eq!(res.subject_scores["S1"], 1);
    }

    #[test]
    fn detection_outside_key_is_ignored() {
        let key = key_from("1-A\n");
        let detected: DetectedAnswers = [(1, 'A'), (42, 'B')].into_iter().collect();
        let res = aggregate(
            &detected,
            &key,
            &subjects_s1_s2(),
            "s",
            &ScoreParams::default(),
            DetectionStats::default(),
        );
        assert_eq!(res.total_score, 1);
        assert_eq!(res.confidence, 100);
        // The stray detection must not leak into the published record.
        assert_eq!(res.detected_answers.len(), 1);
        assert!(!res.detected_answers.contains_key(&42));
    }

    #[test]
    fn confidence_extremes() {
        let key = key_from("1-A\n2-B\n3-C\n");
        let full: DetectedAnswers = [(1, 'A'), (2, 'B'), (3, 'A')].into_iter().collect();
        let res = aggregate(
            &full,
            &key,
            &subjects_s1_s2(),
            "s",
            &ScoreParams::default(),
            DetectionStats::default(),
        );
        assert_eq!(res.confidence, 100);
        assert_eq!(res.status, SheetStatus::Completed);
        assert!(!res.flagged_for_review);

        let empty = DetectedAnswers::new();
        let res = aggregate(
            &empty,
            &key,
            &subjects_s1_s2(),
            "s",
            &ScoreParams::default(),
            DetectionStats::default(),
        );
        assert_eq!(res.confidence, 0);
        assert_eq!(res.status, SheetStatus::PartiallyProcessed);
        assert!(res.flagged_for_review);
    }

    #[test]
    fn abstention_blocks_completed_status() {
        let key = key_from("1-A\n2-B\n");
        let detected: DetectedAnswers = [(1, 'A'), (2, 'B')].into_iter().collect();
        let res = aggregate(
            &detected,
            &key,
            &subjects_s1_s2(),
            "s",
            &ScoreParams::default(),
            DetectionStats {
                ambiguous: 1,
                abstained: 1,
            },
        );
        assert_eq!(res.status, SheetStatus::PartiallyProcessed);
    }

    #[test]
    fn ambiguous_fraction_flags_for_review() {
        let key = key_from("1-A\n2-B\n3-C\n4-D\n");
        let detected: DetectedAnswers =
            [(1, 'A'), (2, 'B'), (3, 'C'), (4, 'D')].into_iter().collect();
        let res = aggregate(
            &detected,
            &key,
            &subjects_s1_s2(),
            "s",
            &ScoreParams::default(),
            DetectionStats {
                ambiguous: 2,
                abstained: 0,
            },
        );
        assert_eq!(res.confidence, 100);
        assert!(res.flagged_for_review);
    }

    #[test]
    fn csv_rows_cover_all_subject_columns() {
        let key = key_from("1-A\n2-B\n3-C\n");
        let detected: DetectedAnswers = [(1, 'A'), (2, 'C'), (3, 'C')].into_iter().collect();
        let subjects = subjects_s1_s2();
        let sheet = aggregate(
            &detected,
            &key,
            &subjects,
            "sheet-1",
            &ScoreParams::default(),
            DetectionStats::default(),
        );
        let batch = BatchResult {
            sheets: vec![sheet],
            attempted: 1,
        };
        let rows = batch.csv_rows(&subjects);
        assert_eq!(rows[0], "student_id,total,S1,S2,status,flagged,confidence");
        assert_eq!(rows[1], "sheet-1,2,1,1,completed,false,100");
    }

    #[test]
    fn csv_quotes_ids_with_delimiters() {
        let key = key_from("1-A\n");
        let detected: DetectedAnswers = [(1, 'A')].into_iter().collect();
        let subjects = SubjectMap::new(vec![]).unwrap();
        let sheet = aggregate(
            &detected,
            &key,
            &subjects,
            "Doe, \"Jane\"",
            &ScoreParams::default(),
            DetectionStats::default(),
        );
        let batch = BatchResult {
            sheets: vec![sheet],
            attempted: 1,
        };
        let rows = batch.csv_rows(&subjects);
        assert_eq!(rows[1], "\"Doe, \"\"Jane\"\"\",1,completed,false,100");
    }
}

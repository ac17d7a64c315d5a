//! Exam-template configuration: option alphabet, bubble grid geometry and
//! subject ranges. All of this is supplied by the caller for a given sheet
//! layout; nothing here is discovered at runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("subject range '{name}' is empty ({first}..={last})")]
    EmptyRange { name: String, first: u32, last: u32 },

    #[error("subject ranges '{a}' and '{b}' overlap")]
    OverlappingRanges { a: String, b: String },

    #[error("option alphabet must not be empty")]
    EmptyAlphabet,
}

/// The fixed, finite set of answer options printed on the sheet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionAlphabet(Vec<char>);

impl OptionAlphabet {
    pub fn new(letters: Vec<char>) -> Result<Self, TemplateError> {
        if letters.is_empty() {
            return Err(TemplateError::EmptyAlphabet);
        }
        Ok(Self(letters.into_iter().map(|c| c.to_ascii_uppercase()).collect()))
    }

    pub fn letters(&self) -> &[char] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Column index of a letter, case-insensitive.
    pub fn index_of(&self, letter: char) -> Option<usize> {
        let up = letter.to_ascii_uppercase();
        self.0.iter().position(|&c| c == up)
    }

    pub fn letter_at(&self, index: usize) -> Option<char> {
        self.0.get(index).copied()
    }
}

impl Default for OptionAlphabet {
    fn default() -> Self {
        Self(vec!['A', 'B', 'C', 'D'])
    }
}

/// Bubble grid geometry of one sheet layout, in normalized-image pixels.
///
/// Question `q` (1-based) sits on row `q - 1`; option column `c` is the
/// index of the letter in the alphabet. Cell centers are
/// `origin + (c * col_pitch, row * row_pitch)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateGeometry {
    pub origin_x: f32,
    pub origin_y: f32,
    pub row_pitch: f32,
    pub col_pitch: f32,
    /// Number of question rows on the sheet.
    pub questions: u32,
    /// Expected bubble radius bounds in pixels, inclusive.
    pub bubble_radius: [f32; 2],
    #[serde(default)]
    pub alphabet: OptionAlphabet,
}

impl TemplateGeometry {
    /// Expected center of the bubble for (question, option column).
    pub fn cell_center(&self, question: u32, col: usize) -> (f32, f32) {
        (
            self.origin_x + col as f32 * self.col_pitch,
            self.origin_y + (question - 1) as f32 * self.row_pitch,
        )
    }
}

/// Contiguous inclusive block of question numbers owned by one subject.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubjectRange {
    pub name: String,
    pub first: u32,
    pub last: u32,
}

/// Read-only mapping from subject name to its question range.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubjectMap {
    ranges: Vec<SubjectRange>,
}

impl SubjectMap {
    /// Build a map, rejecting empty or overlapping ranges.
    pub fn new(ranges: Vec<SubjectRange>) -> Result<Self, TemplateError> {
        for r in &ranges {
            if r.first > r.last || r.first == 0 {
                return Err(TemplateError::EmptyRange {
                    name: r.name.clone(),
                    first: r.first,
                    last: r.last,
                });
            }
        }
        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                if a.first <= b.last && b.first <= a.last {
                    return Err(TemplateError::OverlappingRanges {
                        a: a.name.clone(),
                        b: b.name.clone(),
                    });
                }
            }
        }
        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[SubjectRange] {
        &self.ranges
    }

    /// Subject owning this question, if any range contains it.
    pub fn subject_for(&self, question: u32) -> Option<&str> {
        self.ranges
            .iter()
            .find(|r| r.first <= question && question <= r.last)
            .map(|r| r.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_lookup_is_case_insensitive() {
        let alpha = OptionAlphabet::default();
        assert_eq!(alpha.index_of('b'), Some(1));
        assert_eq!(alpha.index_of('D'), Some(3));
        assert_eq!(alpha.index_of('E'), None);
    }

    #[test]
    fn subject_map_rejects_overlap() {
        let err = SubjectMap::new(vec![
            SubjectRange {
                name: "S1".into(),
                first: 1,
                last: 20,
            },
            SubjectRange {
                name: "S2".into(),
                first: 20,
                last: 40,
            },
        ]);
        assert!(matches!(err, Err(TemplateError::OverlappingRanges { .. })));
    }

    #[test]
    fn subject_for_finds_owning_range() {
        let map = SubjectMap::new(vec![
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
        .unwrap();
        assert_eq!(map.subject_for(2), Some("S1"));
        assert_eq!(map.subject_for(3), Some("S2"));
        assert_eq!(map.subject_for(4), None);
    }

    #[test]
    fn cell_center_uses_pitch() {
        let tpl = TemplateGeometry {
            origin_x: 10.0,
            origin_y: 20.0,
            row_pitch: 30.0,
            col_pitch: 25.0,
            questions: 5,
            bubble_radius: [6.0, 12.0],
            alphabet: OptionAlphabet::default(),
        };
        assert_eq!(tpl.cell_center(1, 0), (10.0, 20.0));
        assert_eq!(tpl.cell_center(3, 2), (60.0, 80.0));
    }
}

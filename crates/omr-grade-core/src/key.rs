//! Answer-key parsing.
//!
//! Accepts one row per question, either `<question> - <option>` or plain CSV
//! `question,option`. Non-conforming rows are skipped with a warning; the key
//! as a whole fails only when nothing parses or a question repeats.

use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::OptionAlphabet;

#[derive(Debug, Error)]
pub enum KeyFormatError {
    #[error("question {question} appears more than once in the answer key")]
    DuplicateQuestion { question: u32 },

    #[error("no parsable rows in the answer key")]
    Empty,
}

/// Read-only question -> correct option mapping, shared by all sheets of a
/// batch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnswerKey(BTreeMap<u32, char>);

impl AnswerKey {
    /// Parse tabular key data. Rows that cannot be decomposed into a question
    /// number and a known option letter are skipped with a diagnostic.
    pub fn parse(data: &str, alphabet: &OptionAlphabet) -> Result<Self, KeyFormatError> {
        let mut map = BTreeMap::new();
        for (lineno, raw) in data.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let Some((question, option)) = parse_row(line, alphabet) else {
                warn!("answer key row {} skipped: {line:?}", lineno + 1);
                continue;
            };
            if map.insert(question, option).is_some() {
                return Err(KeyFormatError::DuplicateQuestion { question });
            }
        }
        if map.is_empty() {
            return Err(KeyFormatError::Empty);
        }
        Ok(Self(map))
    }

    /// Deterministic demo key for quick testing, cycling a mixed sequence
    /// over the alphabet.
    pub fn demo(questions: u32, alphabet: &OptionAlphabet) -> Self {
        let n = alphabet.len() as u64;
        let map = (1..=questions)
            .map(|q| {
                let mut x = q as u64 ^ 0x9e37_79b9_7f4a_7c15;
                x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
                x ^= x >> 31;
                let letter = alphabet.letter_at((x % n) as usize).unwrap_or('A');
                (q, letter)
            })
            .collect();
        Self(map)
    }

    pub fn correct_option(&self, question: u32) -> Option<char> {
        self.0.get(&question).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn questions(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, char)> + '_ {
        self.0.iter().map(|(&q, &o)| (q, o))
    }
}

fn parse_row(line: &str, alphabet: &OptionAlphabet) -> Option<(u32, char)> {
    let (q_part, o_part) = line
        .split_once('-')
        .or_else(|| line.split_once(','))
        .or_else(|| line.split_once(':'))?;
    let question: u32 = q_part.trim().parse().ok()?;
    if question == 0 {
        return None;
    }
    let option = o_part.trim().trim_matches('"').chars().next()?;
    let option = option.to_ascii_uppercase();
    alphabet.index_of(option)?;
    Some((question, option))
}

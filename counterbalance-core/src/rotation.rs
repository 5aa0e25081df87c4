//! Latin-square rotation of question and syntax orders.
//!
//! For a rotation counter `k`, position `v` (1-based) of each order is
//!
//! ```text
//! question[v] = ((v + k - 1) mod Q) + 1
//! syntax[v]   = floormod(v - k - 1, S) + 1
//! ```
//!
//! The two orders rotate in opposite directions so that, across consecutive
//! counters, each question is paired with a different syntax instead of the
//! pair shifting in lockstep.

use crate::{AssignmentError, AssignmentResult};
use serde::{Deserialize, Serialize};

/// Largest question or syntax count a request may ask for.
pub const MAX_STIMULUS_COUNT: i64 = 10_000;

/// Validated pair of stimulus counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimulusCounts {
    questions: u32,
    syntaxes: u32,
}

impl StimulusCounts {
    pub fn new(question_count: i64, syntax_count: i64) -> AssignmentResult<Self> {
        Ok(Self {
            questions: validate_count("questionCount", question_count)?,
            syntaxes: validate_count("syntaxCount", syntax_count)?,
        })
    }

    pub fn questions(&self) -> u32 {
        self.questions
    }

    pub fn syntaxes(&self) -> u32 {
        self.syntaxes
    }
}

fn validate_count(field: &str, value: i64) -> AssignmentResult<u32> {
    if value <= 0 {
        return Err(AssignmentError::invalid_input(field, "must be positive"));
    }
    if value > MAX_STIMULUS_COUNT {
        return Err(AssignmentError::invalid_input(
            field,
            format!("must be at most {}", MAX_STIMULUS_COUNT),
        ));
    }
    u32::try_from(value).map_err(|_| AssignmentError::invalid_input(field, "out of range"))
}

/// Both orders for one participant. Values are 1-based stimulus indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    pub question_order: Vec<u32>,
    pub syntax_order: Vec<u32>,
}

/// Question order for counter `k`: shifts forward by `k`.
pub fn question_order(counter: i64, count: u32) -> Vec<u32> {
    let n = i64::from(count);
    if n == 0 {
        return Vec::new();
    }
    let k = counter.rem_euclid(n);
    (1..=n)
        .map(|v| ((v + k - 1).rem_euclid(n) + 1) as u32)
        .collect()
}

/// Syntax order for counter `k`: shifts backward by `k`.
pub fn syntax_order(counter: i64, count: u32) -> Vec<u32> {
    let n = i64::from(count);
    if n == 0 {
        return Vec::new();
    }
    let k = counter.rem_euclid(n);
    (1..=n)
        .map(|v| ((v - k - 1).rem_euclid(n) + 1) as u32)
        .collect()
}

pub fn latin_square_rotation(counter: i64, counts: StimulusCounts) -> Rotation {
    Rotation {
        question_order: question_order(counter, counts.questions()),
        syntax_order: syntax_order(counter, counts.syntaxes()),
    }
}

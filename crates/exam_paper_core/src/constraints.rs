//! crates/exam_paper_core/src/constraints.rs
//!
//! The typed constraint record of a draft and the whitelist-driven validator
//! applied to UPDATE_CONSTRAINTS payloads.

use crate::domain::{ExamType, Part, QuestionType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TOTAL_MARKS: i64 = 60;
pub const DEFAULT_PART_A_MARKS: i64 = 10;
pub const DEFAULT_PART_B_MARKS: i64 = 50;
/// Upper bound accepted for any mark setting.
pub const MAX_MARKS: i64 = 1000;

/// Named settings of a paper. Every field except the derived current marks is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_marks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_a_total_marks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_b_total_marks: Option<i64>,
    /// ISO `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_type: Option<ExamType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_a_question_marks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_a_question_type: Option<QuestionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_b_question_marks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_b_question_type: Option<QuestionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_b_min_marks: Option<i64>,
    #[serde(default)]
    pub part_a_current_marks: u32,
    #[serde(default)]
    pub part_b_current_marks: u32,
}

impl Constraints {
    /// Constraints every new draft starts from.
    pub fn initial() -> Self {
        Self {
            total_marks: Some(DEFAULT_TOTAL_MARKS),
            part_a_total_marks: Some(DEFAULT_PART_A_MARKS),
            part_b_total_marks: Some(DEFAULT_PART_B_MARKS),
            ..Self::default()
        }
    }

    pub fn part_target(&self, part: Part) -> Option<i64> {
        match part {
            Part::A => self.part_a_total_marks,
            Part::B => self.part_b_total_marks,
        }
    }

    pub fn current_marks(&self, part: Part) -> u32 {
        match part {
            Part::A => self.part_a_current_marks,
            Part::B => self.part_b_current_marks,
        }
    }

    pub fn set_current_marks(&mut self, part: Part, marks: u32) {
        match part {
            Part::A => self.part_a_current_marks = marks,
            Part::B => self.part_b_current_marks = marks,
        }
    }

    /// The configured target of a part minus what is already filled.
    pub fn remaining_marks(&self, part: Part) -> i64 {
        self.part_target(part)
            .unwrap_or(0)
            .saturating_sub(i64::from(self.current_marks(part)))
    }

    /// A warning when total, Part A and Part B targets are all set but do not add up.
    pub fn consistency_warning(&self) -> Option<String> {
        let (total, a, b) = (
            self.total_marks?,
            self.part_a_total_marks?,
            self.part_b_total_marks?,
        );
        (a.checked_add(b) != Some(total)).then(|| {
            format!(
                "Warning: Total marks ({total}) does not match the sum of Part A ({a}) and \
                 Part B ({b}) targets. Please adjust these for consistency."
            )
        })
    }

    fn assign(&mut self, key: &str, value: ConstraintValue) {
        use ConstraintValue::*;
        match (key, value) {
            ("total_marks", Integer(v)) => self.total_marks = Some(v),
            ("part_a_total_marks", Integer(v)) => self.part_a_total_marks = Some(v),
            ("part_b_total_marks", Integer(v)) => self.part_b_total_marks = Some(v),
            ("part_a_question_marks", Integer(v)) => self.part_a_question_marks = Some(v),
            ("part_b_question_marks", Integer(v)) => self.part_b_question_marks = Some(v),
            ("part_b_min_marks", Integer(v)) => self.part_b_min_marks = Some(v),
            ("date", Text(v)) => self.date = Some(v),
            ("semester", Text(v)) => self.semester = Some(v),
            ("duration", Text(v)) => self.duration = Some(v),
            ("exam_type", Text(v)) => self.exam_type = v.parse().ok(),
            ("part_a_question_type", Text(v)) => self.part_a_question_type = v.parse().ok(),
            ("part_b_question_type", Text(v)) => self.part_b_question_type = v.parse().ok(),
            (other, value) => {
                tracing::error!(key = other, ?value, "constraint whitelist and record are out of sync")
            }
        }
    }
}

/// Declared type of a whitelisted constraint key.
#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Integer,
    Date,
    Text,
    Choice(&'static [&'static str]),
}

const EXAM_TYPES: &[&str] = &["CIE", "SEE", "Quiz", "Test Event"];
const QUESTION_TYPES: &[&str] = &["Quiz", "MCQ", "Test"];

const CONSTRAINT_KEYS: &[(&str, ValueKind)] = &[
    ("total_marks", ValueKind::Integer),
    ("part_a_total_marks", ValueKind::Integer),
    ("part_b_total_marks", ValueKind::Integer),
    ("date", ValueKind::Date),
    ("semester", ValueKind::Text),
    ("duration", ValueKind::Text),
    ("exam_type", ValueKind::Choice(EXAM_TYPES)),
    ("part_a_question_marks", ValueKind::Integer),
    ("part_a_question_type", ValueKind::Choice(QUESTION_TYPES)),
    ("part_b_question_marks", ValueKind::Integer),
    ("part_b_question_type", ValueKind::Choice(QUESTION_TYPES)),
    ("part_b_min_marks", ValueKind::Integer),
];

/// Keys whose change requires the part fill levels to be recomputed.
pub const MARK_KEYS: &[&str] = &["total_marks", "part_a_total_marks", "part_b_total_marks"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConstraintValue {
    Integer(i64),
    Text(String),
}

/// Result of validating and applying one UPDATE_CONSTRAINTS payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintUpdate {
    /// Keys that were applied, in the iteration order of the payload map.
    pub applied: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConstraintUpdate {
    pub fn touches_marks(&self) -> bool {
        self.applied.iter().any(|key| MARK_KEYS.contains(&key.as_str()))
    }
}

/// Applies every recognised key of `payload` to `constraints`.
///
/// Unknown keys and values that fail conversion are skipped one by one and
/// reported as warnings; the remaining keys are still applied. After the keys
/// are applied, the mark targets are checked for consistency.
pub fn apply_constraint_update(
    constraints: &mut Constraints,
    payload: &Map<String, Value>,
) -> ConstraintUpdate {
    let mut update = ConstraintUpdate::default();

    for (key, raw) in payload {
        let Some((_, kind)) = CONSTRAINT_KEYS.iter().find(|(name, _)| name == key) else {
            tracing::warn!(key = %key, value = %raw, "unknown constraint key ignored");
            update
                .warnings
                .push(format!("Unknown constraint key '{key}' was ignored."));
            continue;
        };

        match convert(key, *kind, raw) {
            Ok(value) => {
                constraints.assign(key, value);
                update.applied.push(key.clone());
            }
            Err(warning) => {
                tracing::warn!(key = %key, value = %raw, "constraint value rejected");
                update.warnings.push(warning);
            }
        }
    }

    if !update.applied.is_empty() {
        if let Some(warning) = constraints.consistency_warning() {
            update.warnings.push(warning);
        }
    }

    update
}

fn convert(key: &str, kind: ValueKind, raw: &Value) -> Result<ConstraintValue, String> {
    match kind {
        ValueKind::Integer => {
            let value = as_integer(raw).ok_or_else(|| {
                format!("Invalid integer value for '{key}': '{}'. Skipped.", display(raw))
            })?;
            if !(0..=MAX_MARKS).contains(&value) {
                return Err(format!(
                    "Marks for '{key}' must be between 0 and {MAX_MARKS}, got {value}. Skipped."
                ));
            }
            Ok(ConstraintValue::Integer(value))
        }
        ValueKind::Date => match raw {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(|date| ConstraintValue::Text(date.format("%Y-%m-%d").to_string()))
                .map_err(|_| {
                    format!("Invalid date format for '{key}': '{s}'. Expected YYYY-MM-DD. Skipped.")
                }),
            other => Err(format!(
                "Invalid type for date '{key}': '{}'. Expected string. Skipped.",
                display(other)
            )),
        },
        ValueKind::Text => match raw {
            Value::String(s) => Ok(ConstraintValue::Text(s.clone())),
            Value::Number(n) => Ok(ConstraintValue::Text(n.to_string())),
            Value::Bool(b) => Ok(ConstraintValue::Text(b.to_string())),
            other => Err(format!(
                "Invalid text value for '{key}': '{}'. Skipped.",
                display(other)
            )),
        },
        ValueKind::Choice(choices) => raw
            .as_str()
            .and_then(|s| choices.iter().find(|choice| choice.eq_ignore_ascii_case(s.trim())))
            .map(|choice| ConstraintValue::Text((*choice).to_string()))
            .ok_or_else(|| {
                format!(
                    "Invalid choice for '{key}': '{}'. Allowed: {}. Skipped.",
                    display(raw),
                    choices.join(", ")
                )
            }),
    }
}

fn as_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn display(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

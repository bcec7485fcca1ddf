//! crates/exam_paper_core/src/action.rs
//!
//! The typed command schema exchanged with the assistant.
//!
//! Assistant replies carry directives of the form `[ACTION: TYPE {json}]`.
//! [`parse_directives`] decodes them into [`Action`] values and
//! [`Action::to_directive`] renders the same wire form, so the prompt examples
//! and the decoder share one definition.

use crate::domain::{text_enum, Difficulty, Part, PartSelector, QuestionId, QuestionType, TuneDirection};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use tracing::{debug, warn};

text_enum! {
    /// Directive names understood by the engine.
    ActionKind {
        UpdateConstraints => "UPDATE_CONSTRAINTS",
        SuggestQuestions => "SUGGEST_QUESTIONS",
        SuggestBalancedQuestions => "SUGGEST_BALANCED_QUESTIONS",
        AddQuestions => "ADD_QUESTIONS",
        RemoveQuestion => "REMOVE_QUESTION",
        ClearSelectedQuestions => "CLEAR_SELECTED_QUESTIONS",
        SwapQuestion => "SWAP_QUESTION",
        TuneDifficulty => "TUNE_DIFFICULTY",
        CalculateCoverage => "CALCULATE_COVERAGE",
        GetQuestionDetails => "GET_QUESTION_DETAILS",
        FinalizePaper => "FINALIZE_PAPER",
    }
}

impl ActionKind {
    pub fn is_suggestion(&self) -> bool {
        matches!(
            self,
            ActionKind::SuggestQuestions | ActionKind::SuggestBalancedQuestions
        )
    }
}

//=========================================================================================
// Payloads
//=========================================================================================

/// Filter criteria of a SUGGEST_QUESTIONS directive (also the replacement criteria of a swap).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<Part>,
    #[serde(default, deserialize_with = "lenient::opt_u32", skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    #[serde(default, deserialize_with = "lenient::opt_u32", skip_serializing_if = "Option::is_none")]
    pub marks: Option<u32>,
    #[serde(default, alias = "difficulty", skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bt: Option<String>,
    #[serde(
        default,
        alias = "unit_id__unit_id",
        deserialize_with = "lenient::opt_i32",
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_number: Option<i32>,
    /// Whitespace separated words that must all appear in the question text.
    #[serde(default, rename = "text__icontains", alias = "keywords", skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancedRequest {
    pub part: Part,
    #[serde(default, deserialize_with = "lenient::opt_i64", skip_serializing_if = "Option::is_none")]
    pub target_marks: Option<i64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    #[serde(default, alias = "difficulty", skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<Difficulty>,
    #[serde(default, rename = "text__icontains", alias = "keywords", skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRequest {
    pub part: Part,
    #[serde(deserialize_with = "lenient::id_list")]
    pub q_ids: Vec<QuestionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub part: Part,
    #[serde(deserialize_with = "lenient::id")]
    pub q_id: QuestionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearRequest {
    #[serde(default = "all_parts")]
    pub part: PartSelector,
}

fn all_parts() -> PartSelector {
    PartSelector::All
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub part: Part,
    #[serde(deserialize_with = "lenient::id")]
    pub q_id_to_remove: QuestionId,
    #[serde(default)]
    pub new_question_criteria: SuggestCriteria,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuneRequest {
    pub part: Part,
    pub direction: TuneDirection,
}

/// The id is kept raw so a bad id can be narrated instead of dropping the directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q_id: Option<Value>,
}

/// Payload of directives that take no arguments. Extra keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoPayload {}

//=========================================================================================
// Action
//=========================================================================================

/// One decoded directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Raw key/value pairs; validation happens per key in `constraints`.
    UpdateConstraints(Map<String, Value>),
    SuggestQuestions(SuggestCriteria),
    SuggestBalancedQuestions(BalancedRequest),
    AddQuestions(AddRequest),
    RemoveQuestion(RemoveRequest),
    ClearSelectedQuestions(ClearRequest),
    SwapQuestion(SwapRequest),
    TuneDifficulty(TuneRequest),
    CalculateCoverage(NoPayload),
    GetQuestionDetails(DetailsRequest),
    FinalizePaper(NoPayload),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::UpdateConstraints(_) => ActionKind::UpdateConstraints,
            Action::SuggestQuestions(_) => ActionKind::SuggestQuestions,
            Action::SuggestBalancedQuestions(_) => ActionKind::SuggestBalancedQuestions,
            Action::AddQuestions(_) => ActionKind::AddQuestions,
            Action::RemoveQuestion(_) => ActionKind::RemoveQuestion,
            Action::ClearSelectedQuestions(_) => ActionKind::ClearSelectedQuestions,
            Action::SwapQuestion(_) => ActionKind::SwapQuestion,
            Action::TuneDifficulty(_) => ActionKind::TuneDifficulty,
            Action::CalculateCoverage(_) => ActionKind::CalculateCoverage,
            Action::GetQuestionDetails(_) => ActionKind::GetQuestionDetails,
            Action::FinalizePaper(_) => ActionKind::FinalizePaper,
        }
    }

    /// Decodes a payload for a known directive name.
    pub fn decode(kind: ActionKind, payload: Value) -> Result<Action, serde_json::Error> {
        serde_json::from_value(json!({ "type": kind.as_str(), "payload": payload }))
    }

    pub fn payload(&self) -> Value {
        let encoded = match self {
            Action::UpdateConstraints(map) => Ok(Value::Object(map.clone())),
            Action::SuggestQuestions(p) => serde_json::to_value(p),
            Action::SuggestBalancedQuestions(p) => serde_json::to_value(p),
            Action::AddQuestions(p) => serde_json::to_value(p),
            Action::RemoveQuestion(p) => serde_json::to_value(p),
            Action::ClearSelectedQuestions(p) => serde_json::to_value(p),
            Action::SwapQuestion(p) => serde_json::to_value(p),
            Action::TuneDifficulty(p) => serde_json::to_value(p),
            Action::CalculateCoverage(p) | Action::FinalizePaper(p) => serde_json::to_value(p),
            Action::GetQuestionDetails(p) => serde_json::to_value(p),
        };
        encoded.unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// The canonical `[ACTION: TYPE {json}]` form of this action.
    pub fn to_directive(&self) -> String {
        format!("[ACTION: {} {}]", self.kind(), self.payload())
    }
}

//=========================================================================================
// Decoder
//=========================================================================================

/// Result of scanning one assistant reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    /// Accepted actions in order of appearance.
    pub actions: Vec<Action>,
    /// Directive names that were recognised as directives but not accepted.
    pub rejected: Vec<String>,
}

fn directive_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"\[ACTION:\s*([A-Za-z_]+)\s*").expect("directive header pattern is valid")
    })
}

/// Extracts the actions of an assistant reply. Pure: the same text always yields
/// the same result.
pub fn parse_directives(text: &str) -> ParsedReply {
    let mut parsed = ParsedReply::default();
    let mut seen_suggestion = false;
    let mut cursor = 0;

    while let Some(caps) = directive_header().captures_at(text, cursor) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let name = name.as_str();
        let rest = &text[whole.end()..];

        let (payload_text, consumed) = match split_payload(rest) {
            Some(found) => found,
            None => {
                warn!(action = name, "directive without a closing bracket or balanced payload skipped");
                parsed.rejected.push(name.to_string());
                cursor = whole.end();
                continue;
            }
        };
        cursor = whole.end() + consumed;

        let Ok(kind) = name.parse::<ActionKind>() else {
            warn!(action = name, "unknown action type skipped");
            parsed.rejected.push(name.to_string());
            continue;
        };

        let payload = match payload_text {
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!(action = %kind, error = %e, payload = raw, "malformed action payload skipped");
                    parsed.rejected.push(kind.to_string());
                    continue;
                }
            },
            None => Value::Object(Map::new()),
        };

        let action = match Action::decode(kind, payload) {
            Ok(action) => action,
            Err(e) => {
                warn!(action = %kind, error = %e, "action payload has the wrong shape, skipped");
                parsed.rejected.push(kind.to_string());
                continue;
            }
        };

        if kind.is_suggestion() {
            if seen_suggestion {
                warn!(action = %kind, "only one suggestion per reply is honoured, duplicate discarded");
                parsed.rejected.push(kind.to_string());
                continue;
            }
            seen_suggestion = true;
        }

        debug!(action = %kind, "parsed action");
        parsed.actions.push(action);
    }

    parsed
}

/// Convenience wrapper returning only the accepted actions.
pub fn parse_actions(text: &str) -> Vec<Action> {
    parse_directives(text).actions
}

/// Splits the text after a directive header into the JSON payload (if any) and the
/// number of bytes consumed up to and including the closing `]`.
fn split_payload(rest: &str) -> Option<(Option<&str>, usize)> {
    if rest.starts_with(']') {
        return Some((None, 1));
    }
    if !rest.starts_with('{') {
        return None;
    }

    let end = balanced_object_end(rest)?;
    let payload = &rest[..end];
    let after = &rest[end..];
    let trimmed = after.trim_start();
    if trimmed.starts_with(']') {
        Some((Some(payload), end + (after.len() - trimmed.len()) + 1))
    } else {
        // A payload that is never closed by `]` still counts; assistants drop it.
        Some((Some(payload), end))
    }
}

/// Byte offset just past the `}` matching the leading `{`, ignoring braces inside strings.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index + 1);
                }
            }
            _ => {}
        }
    }
    None
}

//=========================================================================================
// Lenient field decoding
//=========================================================================================

/// Deserializers accepting numbers written as JSON strings.
mod lenient {
    use crate::domain::QuestionId;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn integer<E: Error>(value: &Value) -> Result<Option<i64>, E> {
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Some)
                .ok_or_else(|| E::custom(format!("'{n}' is not an integer"))),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| E::custom(format!("'{s}' is not an integer"))),
            other => Err(E::custom(format!("expected an integer, found {other}"))),
        }
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        integer(&Value::deserialize(deserializer)?)
    }

    pub fn opt_i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
        integer(&Value::deserialize(deserializer)?)?
            .map(|v| i32::try_from(v).map_err(D::Error::custom))
            .transpose()
    }

    pub fn opt_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        integer(&Value::deserialize(deserializer)?)?
            .map(|v| u32::try_from(v).map_err(D::Error::custom))
            .transpose()
    }

    pub fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<QuestionId, D::Error> {
        integer(&Value::deserialize(deserializer)?)?
            .ok_or_else(|| D::Error::custom("missing question id"))
    }

    /// A list of ids, or a single id.
    pub fn id_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<QuestionId>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| integer::<D::Error>(item).transpose())
                .collect(),
            single => Ok(integer::<D::Error>(&single)?.into_iter().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_the_same_reply_twice_is_identical() {
        let reply = r#"Adding both. [ACTION: ADD_QUESTIONS {"part":"A","q_ids":[1,2]}]
            and again [ACTION: ADD_QUESTIONS {"part":"A","q_ids":[1,2]}]"#;

        let first = parse_actions(reply);
        let second = parse_actions(reply);

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(
            first[0],
            Action::AddQuestions(AddRequest {
                part: Part::A,
                q_ids: vec![1, 2]
            })
        );
    }

    #[test]
    fn nested_swap_criteria_are_decoded() {
        let reply = r#"[ACTION: SWAP_QUESTION {"part": "A", "q_id_to_remove": "123", "new_question_criteria": {"marks": 2, "unit_id__unit_id": 1, "text__icontains": "arrays {sorted}"} }]"#;

        let actions = parse_actions(reply);

        let [Action::SwapQuestion(swap)] = actions.as_slice() else {
            panic!("expected one swap, got {actions:?}");
        };
        assert_eq!(swap.q_id_to_remove, 123);
        assert_eq!(swap.new_question_criteria.marks, Some(2));
        assert_eq!(swap.new_question_criteria.unit_number, Some(1));
        assert_eq!(swap.new_question_criteria.keywords.as_deref(), Some("arrays {sorted}"));
    }

    #[test]
    fn only_the_first_suggestion_is_honoured() {
        let reply = r#"[ACTION: SUGGEST_QUESTIONS {"part":"A","count":"2"}]
            [ACTION: ADD_QUESTIONS {"part":"B","q_ids":[7]}]
            [ACTION: SUGGEST_BALANCED_QUESTIONS {"part":"B","target_marks":20}]"#;

        let parsed = parse_directives(reply);

        let kinds: Vec<ActionKind> = parsed.actions.iter().map(Action::kind).collect();
        assert_eq!(kinds, vec![ActionKind::SuggestQuestions, ActionKind::AddQuestions]);
        assert_eq!(parsed.rejected, vec!["SUGGEST_BALANCED_QUESTIONS"]);
    }

    #[test]
    fn malformed_and_unknown_directives_are_skipped() {
        let reply = r#"[ACTION: ADD_QUESTIONS {part: A, q_ids: [1]}]
            [ACTION: LAUNCH_ROCKET {"when": "now"}]
            [ACTION: REMOVE_QUESTION {"part": "A"}]
            [ACTION: CALCULATE_COVERAGE]
            [ACTION: clear_selected_questions {}]"#;

        let parsed = parse_directives(reply);

        assert_eq!(
            parsed.actions,
            vec![
                Action::CalculateCoverage(NoPayload {}),
                Action::ClearSelectedQuestions(ClearRequest {
                    part: PartSelector::All
                }),
            ]
        );
        assert_eq!(
            parsed.rejected,
            vec!["ADD_QUESTIONS", "LAUNCH_ROCKET", "REMOVE_QUESTION"]
        );
    }

    #[test]
    fn directives_render_in_the_form_they_are_parsed_from() {
        let action = Action::TuneDifficulty(TuneRequest {
            part: Part::B,
            direction: TuneDirection::Harder,
        });

        let directive = action.to_directive();

        assert!(directive.starts_with("[ACTION: TUNE_DIFFICULTY {"));
        assert!(directive.contains(r#""direction":"harder""#));
        assert!(directive.ends_with("}]"));
        assert_eq!(parse_actions(&directive), vec![action]);
    }

    #[test]
    fn constraint_payload_is_kept_raw() {
        let actions = parse_actions(r#"[ACTION: UPDATE_CONSTRAINTS {"total_marks": "abc"}]"#);
        let [Action::UpdateConstraints(map)] = actions.as_slice() else {
            panic!("expected one constraint update");
        };
        assert_eq!(map.get("total_marks"), Some(&json!("abc")));
    }
}

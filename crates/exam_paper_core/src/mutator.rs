//! crates/exam_paper_core/src/mutator.rs
//!
//! One function per mutating or inspecting action. Each works on the in-memory
//! draft and reports its outcome as a [`Narration`]; only unexpected port
//! failures are returned as errors.

use crate::action::{AddRequest, ClearRequest, DetailsRequest, RemoveRequest, SwapRequest, TuneRequest};
use crate::constraints::{apply_constraint_update, DEFAULT_TOTAL_MARKS};
use crate::coverage::calculate_coverage;
use crate::domain::{Difficulty, Draft, DraftStatus, ExamType, FacultyProfile, Part, Question, QuestionId, TuneDirection};
use crate::narration::{Narration, QuestionDetails};
use crate::ports::{
    FacultyDirectory, MarksFilter, PaperMetadata, PaperRenderer, PaperRequest, PortError, PortResult,
    QuestionBank, QuestionFilter,
};
use crate::selector::criteria_filter;
use chrono::{NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{info, warn};

/// Swaps attempted by one TUNE_DIFFICULTY.
pub const MAX_TUNE_SWAPS: usize = 2;

/// Selected questions of the draft's course, keyed by id.
async fn selected_questions(
    bank: &dyn QuestionBank,
    draft: &Draft,
) -> PortResult<HashMap<QuestionId, Question>> {
    let ids = draft.selected_question_ids();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(bank
        .get_questions(&ids)
        .await?
        .into_iter()
        .filter(|q| q.course_id == draft.course_id)
        .map(|q| (q.id, q))
        .collect())
}

/// Recomputes both parts' filled marks from the question bank.
pub async fn refresh_current_marks(bank: &dyn QuestionBank, draft: &mut Draft) -> PortResult<()> {
    let questions = selected_questions(bank, draft).await?;
    for part in [Part::A, Part::B] {
        let marks = draft
            .part(part)
            .iter()
            .filter_map(|id| questions.get(id))
            .map(|q| q.marks)
            .sum();
        draft.constraints.set_current_marks(part, marks);
    }
    Ok(())
}

fn part_status(draft: &Draft, part: Part) -> String {
    format!(
        "Current marks for Part {part}: {}/{}.",
        draft.constraints.current_marks(part),
        draft.constraints.part_target(part).unwrap_or(0)
    )
}

fn join_ids(ids: &[QuestionId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

//=========================================================================================
// Constraints
//=========================================================================================

pub async fn update_constraints(
    bank: &dyn QuestionBank,
    draft: &mut Draft,
    payload: &Map<String, Value>,
) -> PortResult<Narration> {
    let update = apply_constraint_update(&mut draft.constraints, payload);

    if update.applied.is_empty() {
        let message = if update.warnings.is_empty() {
            "No valid constraints were found in your request to update.".to_string()
        } else {
            format!(
                "Could not update constraints due to issues: {}",
                update.warnings.join(" ")
            )
        };
        return Ok(Narration::ack(message));
    }

    let mut parts = vec![format!("Constraints updated for: {}.", update.applied.join(", "))];
    if update.touches_marks() {
        refresh_current_marks(bank, draft).await?;
        for part in [Part::A, Part::B] {
            parts.push(format!(
                "Part {part} status: {}/{} marks.",
                draft.constraints.current_marks(part),
                draft.constraints.part_target(part).unwrap_or(0)
            ));
        }
    }
    if !update.warnings.is_empty() {
        parts.push(format!("Additionally: {}", update.warnings.join(" ")));
    }

    info!(draft_id = %draft.id, applied = ?update.applied, "constraints updated");
    Ok(Narration::ack(parts.join(" ")))
}

//=========================================================================================
// Selection edits
//=========================================================================================

/// What happened to each id of an ADD_QUESTIONS request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub part: Option<Part>,
    pub added: Vec<QuestionId>,
    /// Would have pushed the part above its target marks.
    pub skipped_for_marks: Vec<QuestionId>,
    /// Already present in one of the parts.
    pub already_selected: Vec<QuestionId>,
    /// Not in the bank or not from the draft's course.
    pub unknown: Vec<QuestionId>,
    pub status: String,
}

impl AddOutcome {
    pub fn narration(&self) -> Narration {
        let part = self.part.map_or("?".to_string(), |p| p.to_string());
        let mut message = Vec::new();
        if !self.added.is_empty() {
            message.push(format!(
                "Added QID(s) {} to Part {part}. {}",
                join_ids(&self.added),
                self.status
            ));
        }
        if !self.skipped_for_marks.is_empty() {
            message.push(format!(
                "Could not add QID(s) {} as it would exceed the marks limit for Part {part}.",
                join_ids(&self.skipped_for_marks)
            ));
        }
        if !self.already_selected.is_empty() {
            message.push(format!(
                "QID(s) {} are already selected.",
                join_ids(&self.already_selected)
            ));
        }
        if !self.unknown.is_empty() {
            message.push(format!(
                "QID(s) {} were not found for this course.",
                join_ids(&self.unknown)
            ));
        }
        if self.added.is_empty() && self.skipped_for_marks.is_empty() {
            message.insert(
                0,
                format!("No new valid questions found to add or QIDs already present in Part {part}."),
            );
        }
        Narration::ack(message.join(" "))
    }
}

/// Adds the requested ids to a part, in request order, while the part stays within
/// its target marks.
pub async fn add_questions(
    bank: &dyn QuestionBank,
    draft: &mut Draft,
    request: &AddRequest,
) -> PortResult<AddOutcome> {
    let part = request.part;
    let mut outcome = AddOutcome {
        part: Some(part),
        ..AddOutcome::default()
    };

    refresh_current_marks(bank, draft).await?;
    let target = draft.constraints.part_target(part).unwrap_or(0);
    let mut current = i64::from(draft.constraints.current_marks(part));

    let found: HashMap<QuestionId, Question> = bank
        .get_questions(&request.q_ids)
        .await?
        .into_iter()
        .filter(|q| q.course_id == draft.course_id)
        .map(|q| (q.id, q))
        .collect();

    let mut seen = Vec::new();
    for &id in &request.q_ids {
        if seen.contains(&id) {
            continue;
        }
        seen.push(id);

        let Some(question) = found.get(&id) else {
            outcome.unknown.push(id);
            continue;
        };
        if draft.part_of(id).is_some() {
            outcome.already_selected.push(id);
            continue;
        }
        if current + i64::from(question.marks) <= target {
            draft.part_mut(part).push(id);
            current += i64::from(question.marks);
            outcome.added.push(id);
        } else {
            outcome.skipped_for_marks.push(id);
        }
    }

    refresh_current_marks(bank, draft).await?;
    outcome.status = part_status(draft, part);
    info!(
        draft_id = %draft.id,
        part = %part,
        added = ?outcome.added,
        skipped = ?outcome.skipped_for_marks,
        "processed add questions"
    );
    Ok(outcome)
}

pub async fn remove_question(
    bank: &dyn QuestionBank,
    draft: &mut Draft,
    request: &RemoveRequest,
) -> PortResult<Narration> {
    let (part, id) = (request.part, request.q_id);
    let list = draft.part_mut(part);
    let Some(index) = list.iter().position(|&q| q == id) else {
        return Ok(Narration::ack(format!("QID {id} not found in Part {part}.")));
    };
    list.remove(index);

    refresh_current_marks(bank, draft).await?;
    Ok(Narration::ack(format!(
        "QID {id} removed from Part {part}. {}",
        part_status(draft, part)
    )))
}

pub async fn clear_selected(
    bank: &dyn QuestionBank,
    draft: &mut Draft,
    request: &ClearRequest,
) -> PortResult<Narration> {
    let mut cleared = Vec::new();
    for part in [Part::A, Part::B] {
        if request.part.includes(part) && !draft.part(part).is_empty() {
            draft.part_mut(part).clear();
            cleared.push(format!("Part {part}"));
        }
    }

    if cleared.is_empty() {
        return Ok(Narration::ack("No questions were selected to clear."));
    }
    refresh_current_marks(bank, draft).await?;
    Ok(Narration::ack(format!(
        "Cleared all selected questions from: {}.",
        cleared.join(", ")
    )))
}

//=========================================================================================
// Swap and tune
//=========================================================================================

/// Replaces one question of a part. Either the part ends up with the replacement
/// instead of the old id, or it is left exactly as it was.
pub async fn swap_question<R: Rng + ?Sized>(
    bank: &dyn QuestionBank,
    draft: &mut Draft,
    request: &SwapRequest,
    rng: &mut R,
) -> PortResult<Narration> {
    let (part, old_id) = (request.part, request.q_id_to_remove);
    let failed = |message: String| Narration::SwapResult {
        message,
        swapped: false,
    };

    let Some(index) = draft.part(part).iter().position(|&q| q == old_id) else {
        return Ok(failed(format!(
            "QID {old_id} not found in Part {part} of the draft."
        )));
    };
    let removed = match bank.get_question(old_id).await {
        Ok(q) if q.course_id == draft.course_id => q,
        Ok(_) | Err(PortError::NotFound(_)) => {
            return Ok(failed(format!(
                "Question QID {old_id} not found in the database for this course."
            )))
        }
        Err(e) => return Err(e),
    };

    draft.part_mut(part).remove(index);

    let criteria = &request.new_question_criteria;
    let mut filter = criteria_filter(&draft.course_id, criteria);
    filter.types = criteria.question_type.into_iter().collect();
    filter.marks = MarksFilter::Exact(criteria.marks.unwrap_or(removed.marks));
    filter.exclude_ids = draft.selected_question_ids();
    filter.exclude_ids.push(old_id);

    let replacement = match bank.find_questions(&filter).await {
        Ok(candidates) => candidates.choose(rng).cloned(),
        Err(e) => {
            draft.part_mut(part).insert(index, old_id);
            return Err(e);
        }
    };

    let Some(new_question) = replacement else {
        draft.part_mut(part).insert(index, old_id);
        info!(draft_id = %draft.id, old_id, "no replacement found, swap rolled back");
        return Ok(failed(format!(
            "Could not find a suitable replacement for QID {old_id} matching the criteria. \
             QID {old_id} has been kept in Part {part}."
        )));
    };

    draft.part_mut(part).push(new_question.id);
    refresh_current_marks(bank, draft).await?;
    info!(draft_id = %draft.id, old_id, new_id = new_question.id, "question swapped");
    Ok(Narration::SwapResult {
        message: format!(
            "Successfully swapped QID {old_id} with QID {} (Text: {}).",
            new_question.id,
            new_question.summary(50)
        ),
        swapped: true,
    })
}

/// Difficulties strictly above or below `current` in the given direction.
fn tuned_difficulties(current: Difficulty, direction: TuneDirection) -> Vec<Difficulty> {
    Difficulty::ALL
        .iter()
        .copied()
        .filter(|d| match direction {
            TuneDirection::Harder => d.ordinal() > current.ordinal(),
            TuneDirection::Easier => d.ordinal() < current.ordinal(),
        })
        .collect()
}

/// Makes a part harder or easier by swapping up to [`MAX_TUNE_SWAPS`] questions for
/// unused ones with the same marks and a strictly higher or lower difficulty.
pub async fn tune_difficulty<R: Rng + ?Sized>(
    bank: &dyn QuestionBank,
    draft: &mut Draft,
    request: &TuneRequest,
    rng: &mut R,
) -> PortResult<Narration> {
    let (part, direction) = (request.part, request.direction);
    if draft.part(part).is_empty() {
        return Ok(Narration::TuneResult {
            message: format!("No questions in Part {part} to tune."),
            swapped: 0,
        });
    }

    let by_id = selected_questions(bank, draft).await?;
    let mut candidates: Vec<Question> = draft
        .part(part)
        .iter()
        .filter_map(|id| by_id.get(id).cloned())
        .collect();
    match direction {
        TuneDirection::Harder => candidates.sort_by_key(|q| q.difficulty.ordinal()),
        TuneDirection::Easier => candidates.sort_by_key(|q| std::cmp::Reverse(q.difficulty.ordinal())),
    }

    let max_swaps = MAX_TUNE_SWAPS.min(candidates.len());
    let mut swapped = 0usize;
    for question in &candidates {
        if swapped >= max_swaps {
            break;
        }
        let difficulties = tuned_difficulties(question.difficulty, direction);
        if difficulties.is_empty() {
            continue;
        }

        let filter = QuestionFilter {
            marks: MarksFilter::Exact(question.marks),
            difficulties,
            exclude_ids: draft.selected_question_ids(),
            ..QuestionFilter::for_course(&draft.course_id)
        };
        let replacement = bank.find_questions(&filter).await?.choose(rng).cloned();
        let Some(replacement) = replacement else {
            continue;
        };

        if let Some(slot) = draft.part_mut(part).iter_mut().find(|id| **id == question.id) {
            *slot = replacement.id;
            swapped += 1;
            info!(
                draft_id = %draft.id,
                old_id = question.id,
                new_id = replacement.id,
                from = %question.difficulty,
                to = %replacement.difficulty,
                "tuned question difficulty"
            );
        }
    }

    let message = if swapped > 0 {
        refresh_current_marks(bank, draft).await?;
        format!("Attempted to make Part {part} {direction}. Swapped {swapped} question(s).")
    } else {
        format!(
            "Could not find suitable questions to make Part {part} {direction} further \
             with current availability while matching marks."
        )
    };
    Ok(Narration::TuneResult {
        message,
        swapped: swapped as u32,
    })
}

//=========================================================================================
// Read-only actions
//=========================================================================================

pub async fn question_details(
    bank: &dyn QuestionBank,
    draft: &Draft,
    request: &DetailsRequest,
) -> PortResult<Narration> {
    let error = |message: String| Narration::QuestionDetailsError { message };

    let raw = match &request.q_id {
        None | Some(Value::Null) => return Ok(error("Q_ID not provided for details.".to_string())),
        Some(raw) => raw,
    };
    let id = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    let Some(id) = id else {
        let shown = raw.as_str().map_or_else(|| raw.to_string(), str::to_string);
        return Ok(error(format!("Invalid QID format: {shown}.")));
    };

    match bank.get_question(id).await {
        Ok(question) if question.course_id == draft.course_id => Ok(Narration::QuestionDetails(
            QuestionDetails::new(&question, draft.course_name.clone()),
        )),
        Ok(_) | Err(PortError::NotFound(_)) => {
            Ok(error(format!("Question with QID {id} not found.")))
        }
        Err(e) => Err(e),
    }
}

pub async fn coverage(bank: &dyn QuestionBank, draft: &Draft) -> PortResult<Narration> {
    let questions: Vec<Question> = selected_questions(bank, draft).await?.into_values().collect();
    Ok(Narration::Coverage(calculate_coverage(draft, &questions)))
}

//=========================================================================================
// Finalize
//=========================================================================================

/// Header of the rendered paper, with defaults for unset constraints.
pub fn paper_metadata(draft: &Draft, faculty: &FacultyProfile, today: NaiveDate) -> PaperMetadata {
    let constraints = &draft.constraints;
    let exam_date = constraints
        .date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .unwrap_or(today);
    PaperMetadata {
        course_code: draft.course_id.clone(),
        course_title: draft.course_name.clone(),
        exam_date: exam_date.format("%Y-%m-%d").to_string(),
        max_marks: constraints.total_marks.unwrap_or(DEFAULT_TOTAL_MARKS),
        duration: constraints
            .duration
            .clone()
            .unwrap_or_else(|| "3 Hours".to_string()),
        semester: constraints
            .semester
            .clone()
            .unwrap_or_else(|| "N/A".to_string()),
        exam_type: constraints.exam_type.unwrap_or(ExamType::Cie).to_string(),
        faculty_name: faculty.name.clone(),
        faculty_department: faculty.department.clone(),
    }
}

/// Renders the paper and finalizes the draft. A failed render leaves the draft
/// in drafting status with no paper path recorded.
pub async fn finalize_paper(
    bank: &dyn QuestionBank,
    faculty: &dyn FacultyDirectory,
    renderer: &dyn PaperRenderer,
    draft: &mut Draft,
) -> PortResult<Narration> {
    let failed = |message: String| Narration::FinalizeResult {
        message,
        success: false,
        path: None,
    };

    if draft.is_finalized() {
        return Ok(Narration::FinalizeResult {
            message: "This paper has already been finalized.".to_string(),
            success: true,
            path: draft.metadata.generated_paper_path.clone(),
        });
    }
    if !draft.has_selection() {
        return Ok(failed("Cannot finalize. No questions added.".to_string()));
    }

    let Some(profile) = faculty.get_faculty_profile(draft.user_id).await? else {
        warn!(draft_id = %draft.id, user_id = %draft.user_id, "finalize without a faculty profile");
        return Ok(failed(
            "Error: Faculty profile not found. Cannot generate paper.".to_string(),
        ));
    };

    let by_id = selected_questions(bank, draft).await?;
    let selections = [Part::A, Part::B]
        .into_iter()
        .map(|part| {
            let ids = draft
                .part(part)
                .iter()
                .copied()
                .filter(|id| by_id.contains_key(id))
                .collect();
            (part, ids)
        })
        .collect();
    let request = PaperRequest {
        draft_id: draft.id,
        metadata: paper_metadata(draft, &profile, Utc::now().date_naive()),
        selections,
        questions: draft
            .selected_question_ids()
            .iter()
            .filter_map(|id| by_id.get(id).cloned())
            .collect(),
    };

    match renderer.render_paper(&request).await {
        Ok(rendered) => {
            draft.status = DraftStatus::Finalized;
            draft.metadata.generated_paper_path = Some(rendered.relative_path.clone());
            info!(draft_id = %draft.id, path = %rendered.relative_path, "paper generated");
            Ok(Narration::FinalizeResult {
                message: format!(
                    "Paper generated successfully: {}. The draft is now finalized.",
                    rendered.file_name
                ),
                success: true,
                path: Some(rendered.relative_path),
            })
        }
        Err(e) => {
            warn!(draft_id = %draft.id, error = %e, "paper generation failed");
            draft.status = DraftStatus::Drafting;
            Ok(failed(format!(
                "Paper generation failed: {e}. The draft remains open."
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::SuggestCriteria;
    use crate::domain::PartSelector;
    use crate::memory::{fixtures, InMemoryFacultyDirectory, InMemoryQuestionBank, RecordingRenderer};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn bank() -> InMemoryQuestionBank {
        InMemoryQuestionBank::with_questions(fixtures::sample_questions())
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[tokio::test]
    async fn add_respects_part_targets_and_reports_rejections() {
        let bank = bank();
        let mut draft = fixtures::draft();
        draft.constraints.part_b_total_marks = Some(15);
        draft.part_a_question_ids = vec![1];

        let outcome = add_questions(
            &bank,
            &mut draft,
            &AddRequest {
                part: Part::B,
                q_ids: vec![10, 11, 13, 1, 90, 404],
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.added, vec![10, 13]);
        assert_eq!(outcome.skipped_for_marks, vec![11]);
        assert_eq!(outcome.already_selected, vec![1]);
        assert_eq!(outcome.unknown, vec![90, 404]);
        assert_eq!(draft.part_b_question_ids, vec![10, 13]);
        assert_eq!(draft.constraints.part_b_current_marks, 15);

        let Narration::Acknowledgment { message } = outcome.narration() else {
            panic!("expected an acknowledgment");
        };
        assert!(message.starts_with("Added QID(s) 10, 13 to Part B. Current marks for Part B: 15/15."));
        assert!(message.contains("Could not add QID(s) 11"));
    }

    #[tokio::test]
    async fn constraint_update_reports_status_and_warnings() {
        let bank = bank();
        let mut draft = fixtures::draft();
        draft.part_a_question_ids = vec![3];

        let narration = update_constraints(
            &bank,
            &mut draft,
            json!({"part_a_total_marks": 12, "colour": "red"}).as_object().unwrap(),
        )
        .await
        .unwrap();

        let Narration::Acknowledgment { message } = narration else {
            panic!("expected an acknowledgment");
        };
        assert!(message.starts_with("Constraints updated for: part_a_total_marks."));
        assert!(message.contains("Part A status: 2/12 marks."));
        assert!(message.contains("Additionally: Unknown constraint key 'colour' was ignored."));
        assert!(message.contains("Total marks (60) does not match"));
    }

    #[tokio::test]
    async fn invalid_constraint_leaves_draft_unchanged() {
        let bank = bank();
        let mut draft = fixtures::draft();
        let before = draft.constraints.clone();

        let narration = update_constraints(
            &bank,
            &mut draft,
            json!({"total_marks": "abc"}).as_object().unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(draft.constraints, before);
        assert!(matches!(narration, Narration::Acknowledgment { ref message }
            if message.contains("Invalid integer value for 'total_marks'")));
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let bank = bank();
        let mut draft = fixtures::draft();
        draft.part_a_question_ids = vec![1, 2];
        draft.part_b_question_ids = vec![10];

        let missing = remove_question(&bank, &mut draft, &RemoveRequest { part: Part::B, q_id: 1 })
            .await
            .unwrap();
        assert_eq!(missing, Narration::ack("QID 1 not found in Part B."));

        remove_question(&bank, &mut draft, &RemoveRequest { part: Part::A, q_id: 1 })
            .await
            .unwrap();
        assert_eq!(draft.part_a_question_ids, vec![2]);
        assert_eq!(draft.constraints.part_a_current_marks, 1);

        clear_selected(&bank, &mut draft, &ClearRequest { part: PartSelector::All })
            .await
            .unwrap();
        assert!(draft.part_a_question_ids.is_empty());
        assert!(draft.part_b_question_ids.is_empty());
        assert_eq!(draft.constraints.part_b_current_marks, 0);
    }

    #[tokio::test]
    async fn swap_replaces_with_same_marks() {
        let bank = bank();
        let mut draft = fixtures::draft();
        draft.part_b_question_ids = vec![10, 13];

        let narration = swap_question(
            &bank,
            &mut draft,
            &SwapRequest {
                part: Part::B,
                q_id_to_remove: 10,
                new_question_criteria: SuggestCriteria::default(),
            },
            &mut rng(),
        )
        .await
        .unwrap();

        assert!(matches!(narration, Narration::SwapResult { swapped: true, .. }));
        assert!(!draft.part_b_question_ids.contains(&10));
        assert!(draft.part_b_question_ids.contains(&13));
        let new_id = draft.part_b_question_ids[1];
        assert!([11, 12].contains(&new_id));
        assert_eq!(draft.constraints.part_b_current_marks, 15);
    }

    #[tokio::test]
    async fn failed_swap_rolls_back_exactly() {
        let bank = bank();
        let mut draft = fixtures::draft();
        draft.part_b_question_ids = vec![13, 10, 14];
        let before = draft.part_b_question_ids.clone();

        let narration = swap_question(
            &bank,
            &mut draft,
            &SwapRequest {
                part: Part::B,
                q_id_to_remove: 10,
                new_question_criteria: SuggestCriteria {
                    co: Some("CO9".to_string()),
                    ..SuggestCriteria::default()
                },
            },
            &mut rng(),
        )
        .await
        .unwrap();

        assert!(matches!(narration, Narration::SwapResult { swapped: false, .. }));
        assert_eq!(draft.part_b_question_ids, before);
    }

    #[tokio::test]
    async fn tune_harder_swaps_easiest_questions_first() {
        let bank = bank();
        let mut draft = fixtures::draft();
        // 13: Easy 5 marks, 12: Hard 10 marks.
        draft.part_b_question_ids = vec![12, 13];

        let narration = tune_difficulty(
            &bank,
            &mut draft,
            &TuneRequest {
                part: Part::B,
                direction: TuneDirection::Harder,
            },
            &mut rng(),
        )
        .await
        .unwrap();

        assert_eq!(
            narration,
            Narration::TuneResult {
                message: "Attempted to make Part B harder. Swapped 1 question(s).".to_string(),
                swapped: 1,
            }
        );
        assert_eq!(draft.part_b_question_ids[0], 12);
        assert!([14, 15].contains(&draft.part_b_question_ids[1]));
    }

    #[tokio::test]
    async fn tune_easier_swaps_hardest_questions_first() {
        let bank = bank();
        let mut draft = fixtures::draft();
        // 12: Hard 10 marks, 13: Easy 5 marks.
        draft.part_b_question_ids = vec![12, 13];

        let narration = tune_difficulty(
            &bank,
            &mut draft,
            &TuneRequest {
                part: Part::B,
                direction: TuneDirection::Easier,
            },
            &mut rng(),
        )
        .await
        .unwrap();

        assert_eq!(
            narration,
            Narration::TuneResult {
                message: "Attempted to make Part B easier. Swapped 1 question(s).".to_string(),
                swapped: 1,
            }
        );
        assert!([10, 11].contains(&draft.part_b_question_ids[0]));
        assert_eq!(draft.part_b_question_ids[1], 13);
        assert_eq!(draft.constraints.part_b_current_marks, 15);
    }

    #[tokio::test]
    async fn details_validate_the_id() {
        let bank = bank();
        let draft = fixtures::draft();

        let missing = question_details(&bank, &draft, &DetailsRequest::default()).await.unwrap();
        assert!(matches!(missing, Narration::QuestionDetailsError { .. }));

        let invalid = question_details(&bank, &draft, &DetailsRequest { q_id: Some(json!("abc")) })
            .await
            .unwrap();
        assert_eq!(
            invalid,
            Narration::QuestionDetailsError {
                message: "Invalid QID format: abc.".to_string()
            }
        );

        let other_course = question_details(&bank, &draft, &DetailsRequest { q_id: Some(json!(90)) })
            .await
            .unwrap();
        assert!(matches!(other_course, Narration::QuestionDetailsError { .. }));

        let found = question_details(&bank, &draft, &DetailsRequest { q_id: Some(json!("12")) })
            .await
            .unwrap();
        let Narration::QuestionDetails(details) = found else {
            panic!("expected details");
        };
        assert_eq!(details.q_id, 12);
        assert_eq!(details.course_name, fixtures::COURSE_NAME);
    }

    #[tokio::test]
    async fn finalize_requires_questions_and_a_profile() {
        let bank = bank();
        let renderer = RecordingRenderer::new();
        let mut draft = fixtures::draft();

        let empty = finalize_paper(&bank, &InMemoryFacultyDirectory::new(), &renderer, &mut draft)
            .await
            .unwrap();
        assert!(matches!(empty, Narration::FinalizeResult { success: false, .. }));

        draft.part_a_question_ids = vec![1];
        let no_profile = finalize_paper(&bank, &InMemoryFacultyDirectory::new(), &renderer, &mut draft)
            .await
            .unwrap();
        assert!(matches!(no_profile, Narration::FinalizeResult { success: false, ref message, .. }
            if message.contains("Faculty profile not found")));
        assert_eq!(draft.status, DraftStatus::Drafting);
        assert!(renderer.rendered().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_success_and_failure() {
        let bank = bank();
        let faculty = InMemoryFacultyDirectory::new().with_profile(fixtures::faculty_profile());
        let mut draft = fixtures::draft();
        draft.part_a_question_ids = vec![1, 3];
        draft.part_b_question_ids = vec![10];

        let failing = RecordingRenderer::failing("template missing");
        let failed = finalize_paper(&bank, &faculty, &failing, &mut draft).await.unwrap();
        assert!(matches!(failed, Narration::FinalizeResult { success: false, ref message, .. }
            if message == "Paper generation failed: Could not lay out the paper: template missing. The draft remains open."));
        assert_eq!(draft.status, DraftStatus::Drafting);
        assert!(draft.metadata.generated_paper_path.is_none());

        let renderer = RecordingRenderer::new();
        let done = finalize_paper(&bank, &faculty, &renderer, &mut draft).await.unwrap();
        assert!(matches!(done, Narration::FinalizeResult { success: true, .. }));
        assert_eq!(draft.status, DraftStatus::Finalized);
        assert!(draft.metadata.generated_paper_path.is_some());

        let rendered = renderer.rendered().unwrap();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].selections, vec![(Part::A, vec![1, 3]), (Part::B, vec![10])]);
        assert_eq!(rendered[0].questions.len(), 3);
        assert_eq!(rendered[0].metadata.max_marks, 60);
        assert_eq!(rendered[0].metadata.exam_type, "CIE");
    }

    #[test]
    fn metadata_defaults_and_overrides() {
        let mut draft = fixtures::draft();
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let defaults = paper_metadata(&draft, &fixtures::faculty_profile(), today);
        assert_eq!(defaults.exam_date, "2024-05-01");
        assert_eq!(defaults.duration, "3 Hours");
        assert_eq!(defaults.semester, "N/A");

        draft.constraints.date = Some("2024-11-20".to_string());
        draft.constraints.exam_type = Some(ExamType::See);
        let set = paper_metadata(&draft, &fixtures::faculty_profile(), today);
        assert_eq!(set.exam_date, "2024-11-20");
        assert_eq!(set.exam_type, "SEE");
    }
}

//! crates/exam_paper_core/src/selector.rs
//!
//! Question retrieval for SUGGEST_QUESTIONS and SUGGEST_BALANCED_QUESTIONS.
//!
//! Balanced suggestions use a two-phase greedy pack: largest marks first without
//! overshooting the remaining marks, then a single exact-fit question for a small
//! leftover gap. It is an approximation and may fall short of a reachable target.

use crate::action::{BalancedRequest, SuggestCriteria};
use crate::constraints::{DEFAULT_PART_A_MARKS, DEFAULT_PART_B_MARKS};
use crate::domain::{Draft, Part, Question, QuestionType};
use crate::narration::{Narration, QuestionSummary, SuggestionBundle};
use crate::ports::{MarksFilter, PortResult, QuestionBank, QuestionFilter};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

pub const DEFAULT_SUGGESTION_COUNT: u32 = 3;
/// Largest leftover gap the second packing phase tries to close.
pub const SMALL_GAP_LIMIT: u32 = 5;
/// Largest remaining-marks value a single suggestion is aimed at exactly.
pub const EXACT_FILL_LIMIT: i64 = 10;

/// Question types and default marks implied by a part hint or an explicit type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeResolution {
    pub resolved: Option<QuestionType>,
    pub types: Vec<QuestionType>,
    pub default_marks: MarksFilter,
}

/// Part A implies Quiz (which also admits MCQ) and Part B implies Test,
/// unless a type is given explicitly.
pub fn resolve_type(part: Option<Part>, explicit: Option<QuestionType>) -> TypeResolution {
    let resolved = explicit.or(match part {
        Some(Part::A) => Some(QuestionType::Quiz),
        Some(Part::B) => Some(QuestionType::Test),
        None => None,
    });
    let (types, default_marks) = match resolved {
        Some(QuestionType::Quiz) => (
            vec![QuestionType::Quiz, QuestionType::Mcq],
            MarksFilter::AtMost(2),
        ),
        Some(QuestionType::Mcq) => (vec![QuestionType::Mcq], MarksFilter::AtMost(2)),
        Some(QuestionType::Test) => (vec![QuestionType::Test], MarksFilter::Above(2)),
        None => (Vec::new(), MarksFilter::Any),
    };
    TypeResolution {
        resolved,
        types,
        default_marks,
    }
}

/// Filter from the criteria fields shared by suggestions and swaps. Type and
/// marks are left to the caller.
pub fn criteria_filter(course_id: &str, criteria: &SuggestCriteria) -> QuestionFilter {
    let mut filter = QuestionFilter::for_course(course_id);
    filter.difficulties = criteria.difficulty_level.into_iter().collect();
    filter.co = criteria.co.clone().filter(|s| !s.trim().is_empty());
    filter.bt = criteria.bt.clone().filter(|s| !s.trim().is_empty());
    filter.unit_number = criteria.unit_number;
    filter.keywords = split_keywords(criteria.keywords.as_deref());
    filter
}

fn split_keywords(keywords: Option<&str>) -> Vec<String> {
    keywords
        .map(|k| k.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn total_marks(questions: &[Question]) -> u32 {
    questions.iter().map(|q| q.marks).sum()
}

/// SUGGEST_QUESTIONS: up to `count` random matches, or a violation naming the criteria.
pub async fn suggest_questions<R: Rng + ?Sized>(
    bank: &dyn QuestionBank,
    draft: &Draft,
    criteria: &SuggestCriteria,
    rng: &mut R,
) -> PortResult<Narration> {
    let part = criteria.part;
    let count = criteria.count.unwrap_or(DEFAULT_SUGGESTION_COUNT);
    let target = part.map(|p| draft.constraints.part_target(p).unwrap_or(0));
    let remaining = part.map(|p| draft.constraints.remaining_marks(p));

    let mut marks = criteria.marks;
    if let (None, Some(gap)) = (marks, remaining) {
        if count == 1 && (1..=EXACT_FILL_LIMIT).contains(&gap) {
            debug!(part = ?part, gap, "aiming single suggestion at the remaining marks");
            marks = u32::try_from(gap).ok();
        }
    }

    let resolution = resolve_type(part, criteria.question_type);
    let mut filter = criteria_filter(&draft.course_id, criteria);
    filter.types = resolution.types.clone();
    filter.marks = marks.map_or(resolution.default_marks, MarksFilter::Exact);
    filter.exclude_ids = draft.selected_question_ids();

    let mut candidates = bank.find_questions(&filter).await?;
    candidates.shuffle(rng);
    candidates.truncate(count as usize);

    if candidates.is_empty() {
        let mut criteria_list = filter.describe();
        if let Some(part) = part {
            criteria_list.insert(0, format!("intended for Part {part}"));
        }
        let mut message = format!(
            "I couldn't find any questions for course '{}' matching: {}. ",
            draft.course_name,
            criteria_list.join(", ")
        );
        if let (Some(part), Some(remaining), Some(target)) = (part, remaining, target) {
            message.push_str(&format!(
                "(Remaining marks for Part {part}: {remaining}/{target}). "
            ));
        }
        message.push_str(
            "You could try being less specific, or try different criteria \
             (e.g., different unit, difficulty, or marks).",
        );
        info!(draft_id = %draft.id, "no questions matched suggestion criteria");
        return Ok(Narration::violation(message, criteria_list));
    }

    info!(
        draft_id = %draft.id,
        part = ?part,
        suggested = candidates.len(),
        "prepared question suggestions"
    );
    Ok(Narration::Suggestions(SuggestionBundle {
        part,
        question_type: resolution.resolved,
        achieved_marks: total_marks(&candidates),
        questions: candidates.iter().map(QuestionSummary::from).collect(),
        aimed_marks: remaining,
    }))
}

/// Result of [`pack_balanced`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packing {
    pub selected: Vec<Question>,
    pub achieved: u32,
    pub aimed: u32,
}

impl Packing {
    pub fn shortfall(&self) -> u32 {
        self.aimed.saturating_sub(self.achieved)
    }
}

/// Greedy fill of `remaining` marks that never overshoots.
///
/// Candidates are shuffled, then stably sorted by descending marks so ties are
/// broken randomly. Phase 1 takes every candidate that still fits and stops on an
/// exact match. Phase 2 looks for one unused candidate of exactly the leftover gap
/// when that gap is at most [`SMALL_GAP_LIMIT`]. Phase 1 has already considered
/// every candidate, so any such question would have fitted there and Phase 2 never
/// changes the result.
pub fn pack_balanced<R: Rng + ?Sized>(
    mut candidates: Vec<Question>,
    remaining: u32,
    rng: &mut R,
) -> Packing {
    candidates.shuffle(rng);
    candidates.sort_by(|a, b| b.marks.cmp(&a.marks));

    let mut used = vec![false; candidates.len()];
    let mut achieved = 0u32;

    for (index, question) in candidates.iter().enumerate() {
        if achieved
            .checked_add(question.marks)
            .is_some_and(|sum| sum <= remaining)
        {
            used[index] = true;
            achieved += question.marks;
        }
        if achieved == remaining {
            break;
        }
    }

    let gap = remaining - achieved;
    if gap > 0 && gap <= SMALL_GAP_LIMIT {
        let exact = candidates
            .iter()
            .enumerate()
            .find(|(index, question)| !used[*index] && question.marks == gap)
            .map(|(index, _)| index);
        if let Some(index) = exact {
            used[index] = true;
            achieved += gap;
        }
    }

    let selected = candidates
        .into_iter()
        .zip(used)
        .filter_map(|(question, used)| used.then_some(question))
        .collect();

    Packing {
        selected,
        achieved,
        aimed: remaining,
    }
}

/// SUGGEST_BALANCED_QUESTIONS: a set of questions summing as close as possible to the
/// part's remaining marks.
pub async fn suggest_balanced<R: Rng + ?Sized>(
    bank: &dyn QuestionBank,
    draft: &Draft,
    request: &BalancedRequest,
    rng: &mut R,
) -> PortResult<Narration> {
    let part = request.part;
    let target = request
        .target_marks
        .or(draft.constraints.part_target(part))
        .unwrap_or(match part {
            Part::A => DEFAULT_PART_A_MARKS,
            Part::B => DEFAULT_PART_B_MARKS,
        });
    let current = draft.constraints.current_marks(part);
    let remaining = target.saturating_sub(i64::from(current));

    if remaining <= 0 {
        return Ok(Narration::violation(
            format!(
                "Part {part} already has {current}/{target} marks. \
                 No additional marks needed or target already met/exceeded."
            ),
            vec![format!("target marks: {target}")],
        ));
    }

    let resolution = resolve_type(Some(part), request.question_type);
    let mut filter = QuestionFilter::for_course(&draft.course_id);
    filter.types = resolution.types.clone();
    filter.difficulties = request.difficulty_level.into_iter().collect();
    filter.keywords = split_keywords(request.keywords.as_deref());
    filter.exclude_ids = draft.selected_question_ids();

    let candidates: Vec<Question> = bank
        .find_questions(&filter)
        .await?
        .into_iter()
        .filter(|q| q.marks > 0)
        .collect();
    let aimed = u32::try_from(remaining).unwrap_or(u32::MAX);
    let packing = pack_balanced(candidates, aimed, rng);

    info!(
        draft_id = %draft.id,
        part = %part,
        aimed = packing.aimed,
        achieved = packing.achieved,
        shortfall = packing.shortfall(),
        "balanced suggestion packed"
    );

    if packing.selected.is_empty() {
        let type_label = resolution
            .resolved
            .map_or("any".to_string(), |t| t.to_string());
        return Ok(Narration::violation(
            format!(
                "Could not generate a suitable balanced set of questions for Part {part} \
                 (type: {type_label}) to fill the remaining {remaining} marks with current \
                 availability. Try suggesting questions with specific criteria or different topics."
            ),
            filter.describe(),
        ));
    }

    Ok(Narration::Suggestions(SuggestionBundle {
        part: Some(part),
        question_type: resolution.resolved,
        questions: packing.selected.iter().map(QuestionSummary::from).collect(),
        aimed_marks: Some(remaining),
        achieved_marks: packing.achieved,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{fixtures, InMemoryQuestionBank};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ids(packing: &Packing) -> Vec<i64> {
        let mut ids: Vec<i64> = packing.selected.iter().map(|q| q.id).collect();
        ids.sort();
        ids
    }

    #[test]
    fn exact_fit_in_phase_one() {
        let candidates = vec![fixtures::test_question(7, 8), fixtures::test_question(9, 2)];

        let packing = pack_balanced(candidates, 10, &mut StdRng::seed_from_u64(1));

        assert_eq!(ids(&packing), vec![7, 9]);
        assert_eq!(packing.achieved, 10);
        assert_eq!(packing.shortfall(), 0);
    }

    #[test]
    fn shortfall_is_reported_when_the_gap_cannot_be_closed() {
        let packing = pack_balanced(vec![fixtures::test_question(3, 8)], 10, &mut StdRng::seed_from_u64(1));

        assert_eq!(ids(&packing), vec![3]);
        assert_eq!(packing.achieved, 8);
        assert_eq!(packing.shortfall(), 2);
    }

    #[test]
    fn packing_never_overshoots() {
        for seed in 0..20 {
            let candidates = vec![
                fixtures::test_question(1, 12),
                fixtures::test_question(2, 7),
                fixtures::test_question(3, 7),
                fixtures::test_question(4, 4),
                fixtures::test_question(5, 3),
            ];
            let packing = pack_balanced(candidates, 15, &mut StdRng::seed_from_u64(seed));
            assert!(packing.achieved <= 15);
            assert_eq!(packing.achieved, packing.selected.iter().map(|q| q.marks).sum::<u32>());
        }
    }

    #[test]
    fn part_hints_resolve_types_and_default_marks() {
        let a = resolve_type(Some(Part::A), None);
        assert_eq!(a.types, vec![QuestionType::Quiz, QuestionType::Mcq]);
        assert_eq!(a.default_marks, MarksFilter::AtMost(2));

        let explicit = resolve_type(Some(Part::A), Some(QuestionType::Test));
        assert_eq!(explicit.types, vec![QuestionType::Test]);
        assert_eq!(explicit.default_marks, MarksFilter::Above(2));

        assert_eq!(resolve_type(None, None).types, Vec::<QuestionType>::new());
    }

    #[tokio::test]
    async fn suggestions_exclude_selected_questions() {
        let bank = InMemoryQuestionBank::with_questions(fixtures::sample_questions());
        let mut draft = fixtures::draft();
        draft.part_a_question_ids = vec![1, 2];
        let criteria = SuggestCriteria {
            part: Some(Part::A),
            count: Some(10),
            ..SuggestCriteria::default()
        };

        let narration = suggest_questions(&bank, &draft, &criteria, &mut StdRng::seed_from_u64(3))
            .await
            .unwrap();

        let Narration::Suggestions(bundle) = narration else {
            panic!("expected suggestions, got {narration:?}");
        };
        assert!(!bundle.questions.is_empty());
        for summary in &bundle.questions {
            assert!(![1, 2].contains(&summary.q_id));
            assert!(summary.marks <= 2);
            assert_ne!(summary.question_type, QuestionType::Test);
        }
    }

    #[tokio::test]
    async fn no_match_yields_a_violation_with_criteria() {
        let bank = InMemoryQuestionBank::with_questions(fixtures::sample_questions());
        let draft = fixtures::draft();
        let criteria = SuggestCriteria {
            part: Some(Part::B),
            co: Some("CO9".to_string()),
            ..SuggestCriteria::default()
        };

        let narration = suggest_questions(&bank, &draft, &criteria, &mut StdRng::seed_from_u64(3))
            .await
            .unwrap();

        let Narration::Violation { message, criteria } = narration else {
            panic!("expected a violation");
        };
        assert!(message.contains("Remaining marks for Part B: 50/50"));
        assert!(criteria.contains(&"co: CO9".to_string()));
        assert!(criteria.contains(&"intended for Part B".to_string()));
    }

    #[tokio::test]
    async fn single_suggestion_targets_a_small_remaining_gap() {
        let bank = InMemoryQuestionBank::with_questions(fixtures::sample_questions());
        let mut draft = fixtures::draft();
        draft.constraints.part_b_total_marks = Some(8);
        let criteria = SuggestCriteria {
            part: Some(Part::B),
            count: Some(1),
            ..SuggestCriteria::default()
        };

        let narration = suggest_questions(&bank, &draft, &criteria, &mut StdRng::seed_from_u64(5))
            .await
            .unwrap();

        let Narration::Suggestions(bundle) = narration else {
            panic!("expected suggestions");
        };
        assert_eq!(bundle.questions.len(), 1);
        assert_eq!(bundle.questions[0].marks, 8);
        assert_eq!(bundle.aimed_marks, Some(8));
    }

    #[tokio::test]
    async fn balanced_suggestion_rejects_a_full_part() {
        let bank = InMemoryQuestionBank::with_questions(fixtures::sample_questions());
        let mut draft = fixtures::draft();
        draft.constraints.part_a_current_marks = 10;
        let request = BalancedRequest {
            part: Part::A,
            target_marks: None,
            question_type: None,
            difficulty_level: None,
            keywords: None,
        };

        let narration = suggest_balanced(&bank, &draft, &request, &mut StdRng::seed_from_u64(0))
            .await
            .unwrap();

        assert!(matches!(narration, Narration::Violation { ref message, .. } if message.starts_with("Part A already has 10/10 marks")));
    }

    #[tokio::test]
    async fn balanced_suggestion_survives_extreme_targets() {
        let bank = InMemoryQuestionBank::with_questions(fixtures::sample_questions());
        let mut draft = fixtures::draft();
        draft.constraints.part_b_current_marks = 5;
        let request = |target_marks| BalancedRequest {
            part: Part::B,
            target_marks: Some(target_marks),
            question_type: None,
            difficulty_level: None,
            keywords: None,
        };

        let huge = suggest_balanced(&bank, &draft, &request(i64::MAX), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();
        let Narration::Suggestions(bundle) = huge else {
            panic!("expected suggestions");
        };
        // Every unselected Test question of the course fits.
        assert_eq!(bundle.questions.len(), 8);
        assert_eq!(bundle.achieved_marks, 65);

        let negative = suggest_balanced(&bank, &draft, &request(i64::MIN), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();
        assert!(matches!(negative, Narration::Violation { .. }));
    }

    #[test]
    fn packing_never_overflows() {
        let candidates = vec![fixtures::test_question(1, u32::MAX), fixtures::test_question(2, 3)];
        let packing = pack_balanced(candidates, u32::MAX - 1, &mut StdRng::seed_from_u64(0));
        assert_eq!(packing.achieved, 3);
        assert_eq!(packing.selected.len(), 1);
    }

    #[tokio::test]
    async fn balanced_suggestion_fills_part_b() {
        let bank = InMemoryQuestionBank::with_questions(fixtures::sample_questions());
        let draft = fixtures::draft();
        let request = BalancedRequest {
            part: Part::B,
            target_marks: Some(20),
            question_type: None,
            difficulty_level: None,
            keywords: None,
        };

        let narration = suggest_balanced(&bank, &draft, &request, &mut StdRng::seed_from_u64(9))
            .await
            .unwrap();

        let Narration::Suggestions(bundle) = narration else {
            panic!("expected suggestions");
        };
        assert_eq!(bundle.aimed_marks, Some(20));
        assert!(bundle.achieved_marks <= 20);
        assert_eq!(
            bundle.achieved_marks,
            bundle.questions.iter().map(|q| q.marks).sum::<u32>()
        );
        assert!(bundle.questions.iter().all(|q| q.question_type == QuestionType::Test));
    }
}

//! crates/exam_paper_core/src/coverage.rs
//!
//! Read-only aggregation of the selected questions of a draft.

use crate::domain::{Draft, Part, Question, QuestionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallCoverage {
    pub total_questions: u32,
    pub total_marks: u32,
    pub part_a_questions: u32,
    pub part_a_marks: u32,
    pub part_b_questions: u32,
    pub part_b_marks: u32,
}

/// Count and mark sum of the questions sharing one tag value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageGroup {
    pub key: String,
    pub count: u32,
    pub total_marks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCoverage {
    pub unit_number: Option<i32>,
    pub unit_name: Option<String>,
    pub count: u32,
    pub total_marks: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub overall: OverallCoverage,
    pub co: Vec<CoverageGroup>,
    pub bt: Vec<CoverageGroup>,
    pub unit: Vec<UnitCoverage>,
    pub difficulty: Vec<CoverageGroup>,
    /// Set instead of the groups when nothing is selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Default)]
struct Tally {
    count: u32,
    marks: u32,
}

impl Tally {
    fn add(&mut self, marks: u32) {
        self.count += 1;
        self.marks += marks;
    }
}

fn groups(tallies: BTreeMap<String, Tally>) -> Vec<CoverageGroup> {
    tallies
        .into_iter()
        .map(|(key, tally)| CoverageGroup {
            key,
            count: tally.count,
            total_marks: tally.marks,
        })
        .collect()
}

/// Aggregates the selected questions of `draft`, looked up in `questions`.
///
/// Selected ids without a record in `questions` are left out of every figure,
/// so each grouping sums to `overall.total_marks`.
pub fn calculate_coverage(draft: &Draft, questions: &[Question]) -> CoverageSummary {
    if !draft.has_selection() {
        return CoverageSummary {
            message: Some("No questions selected yet to calculate coverage.".to_string()),
            ..CoverageSummary::default()
        };
    }

    let by_id: HashMap<QuestionId, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    let mut overall = OverallCoverage::default();
    let mut co = BTreeMap::<String, Tally>::new();
    let mut bt = BTreeMap::<String, Tally>::new();
    let mut difficulty = BTreeMap::<String, Tally>::new();
    let mut units = BTreeMap::<(Option<i32>, Option<String>), Tally>::new();

    for part in [Part::A, Part::B] {
        for question in draft.part(part).iter().filter_map(|id| by_id.get(id)) {
            let marks = question.marks;
            match part {
                Part::A => {
                    overall.part_a_questions += 1;
                    overall.part_a_marks += marks;
                }
                Part::B => {
                    overall.part_b_questions += 1;
                    overall.part_b_marks += marks;
                }
            }
            overall.total_questions += 1;
            overall.total_marks += marks;

            co.entry(question.co.clone()).or_default().add(marks);
            bt.entry(question.bt.clone()).or_default().add(marks);
            difficulty
                .entry(question.difficulty.to_string())
                .or_default()
                .add(marks);
            let unit_key = (
                question.unit.as_ref().map(|u| u.number),
                question.unit.as_ref().map(|u| u.name.clone()),
            );
            units.entry(unit_key).or_default().add(marks);
        }
    }

    CoverageSummary {
        overall,
        co: groups(co),
        bt: groups(bt),
        unit: units
            .into_iter()
            .map(|((unit_number, unit_name), tally)| UnitCoverage {
                unit_number,
                unit_name,
                count: tally.count,
                total_marks: tally.marks,
            })
            .collect(),
        difficulty: groups(difficulty),
        message: None,
    }
}

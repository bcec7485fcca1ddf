//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! `DraftRepository`, `QuestionBank` and `FacultyDirectory` ports from the core crate.
//! It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_paper_core::constraints::Constraints;
use exam_paper_core::domain::{
    ChatTurn, Course, Draft, DraftMetadata, DraftStatus, FacultyProfile, NewDraft, Question,
    QuestionId, Unit,
};
use exam_paper_core::ports::{
    DraftRepository, FacultyDirectory, MarksFilter, PortError, PortResult, QuestionBank,
    QuestionFilter,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter implementing every persistence port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct CourseRecord {
    course_id: String,
    course_name: String,
}
impl CourseRecord {
    fn to_domain(self) -> Course {
        Course {
            id: self.course_id,
            name: self.course_name,
        }
    }
}

#[derive(FromRow)]
struct QuestionRecord {
    q_id: i64,
    course_id: String,
    text: String,
    marks: i32,
    question_type: String,
    difficulty_level: String,
    co: String,
    bt: String,
    unit_number: Option<i32>,
    unit_name: Option<String>,
}
impl QuestionRecord {
    fn to_domain(self) -> PortResult<Question> {
        let unit = match (self.unit_number, self.unit_name) {
            (Some(number), Some(name)) => Some(Unit { number, name }),
            _ => None,
        };
        Ok(Question {
            id: self.q_id,
            course_id: self.course_id,
            unit,
            text: self.text,
            marks: u32::try_from(self.marks).unwrap_or(0),
            question_type: self
                .question_type
                .parse()
                .map_err(|e| PortError::Unexpected(format!("question {}: {e}", self.q_id)))?,
            difficulty: self
                .difficulty_level
                .parse()
                .map_err(|e| PortError::Unexpected(format!("question {}: {e}", self.q_id)))?,
            co: self.co,
            bt: self.bt,
        })
    }
}

#[derive(FromRow)]
struct FacultyRecord {
    user_id: Uuid,
    name: String,
    department: Option<String>,
}
impl FacultyRecord {
    fn to_domain(self) -> FacultyProfile {
        FacultyProfile {
            user_id: self.user_id,
            name: self.name,
            department: self.department,
        }
    }
}

#[derive(FromRow)]
struct DraftRecord {
    id: Uuid,
    user_id: Uuid,
    course_id: String,
    course_name: String,
    constraints: Json<Constraints>,
    part_a_question_ids: Vec<i64>,
    part_b_question_ids: Vec<i64>,
    conversation_history: Json<Vec<ChatTurn>>,
    metadata: Json<DraftMetadata>,
    status: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl DraftRecord {
    fn to_domain(self) -> PortResult<Draft> {
        Ok(Draft {
            id: self.id,
            user_id: self.user_id,
            course_id: self.course_id,
            course_name: self.course_name,
            constraints: self.constraints.0,
            part_a_question_ids: self.part_a_question_ids,
            part_b_question_ids: self.part_b_question_ids,
            conversation_history: self.conversation_history.0,
            metadata: self.metadata.0,
            status: self
                .status
                .parse()
                .map_err(|e| PortError::Unexpected(format!("draft {}: {e}", self.id)))?,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const QUESTION_SELECT: &str = "SELECT q.q_id, q.course_id, q.text, q.marks, q.question_type, \
     q.difficulty_level, q.co, q.bt, u.unit_number, u.unit_name \
     FROM questions q LEFT JOIN units u ON u.id = q.unit_id";

/// Drafts are always read together with their course name.
const DRAFT_SELECT: &str = "SELECT d.id, d.user_id, d.course_id, c.course_name, d.constraints, \
     d.part_a_question_ids, d.part_b_question_ids, d.conversation_history, d.metadata, \
     d.status, d.version, d.created_at, d.updated_at \
     FROM paper_drafts d JOIN courses c ON c.course_id = d.course_id";

/// Translates a filter into SQL with the same semantics as `QuestionFilter::matches`.
fn push_question_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &QuestionFilter) {
    query
        .push(" WHERE q.course_id = ")
        .push_bind(filter.course_id.clone());

    if !filter.types.is_empty() {
        let types: Vec<String> = filter.types.iter().map(|t| t.to_string()).collect();
        query.push(" AND q.question_type = ANY(").push_bind(types).push(")");
    }
    // Marks beyond the INTEGER column range: nothing equals or exceeds them,
    // and everything stays below them.
    match filter.marks {
        MarksFilter::Any => {}
        MarksFilter::Exact(m) => match i32::try_from(m) {
            Ok(m) => {
                query.push(" AND q.marks = ").push_bind(m);
            }
            Err(_) => {
                query.push(" AND FALSE");
            }
        },
        MarksFilter::AtMost(m) => {
            if let Ok(m) = i32::try_from(m) {
                query.push(" AND q.marks <= ").push_bind(m);
            }
        }
        MarksFilter::Above(m) => match i32::try_from(m) {
            Ok(m) => {
                query.push(" AND q.marks > ").push_bind(m);
            }
            Err(_) => {
                query.push(" AND FALSE");
            }
        },
    }
    if !filter.difficulties.is_empty() {
        let levels: Vec<String> = filter.difficulties.iter().map(|d| d.to_string()).collect();
        query.push(" AND q.difficulty_level = ANY(").push_bind(levels).push(")");
    }
    if let Some(co) = &filter.co {
        query.push(" AND LOWER(q.co) = LOWER(").push_bind(co.clone()).push(")");
    }
    if let Some(bt) = &filter.bt {
        query.push(" AND LOWER(q.bt) = LOWER(").push_bind(bt.clone()).push(")");
    }
    if let Some(unit) = filter.unit_number {
        query.push(" AND u.unit_number = ").push_bind(unit);
    }
    for keyword in &filter.keywords {
        let escaped = keyword
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        query
            .push(" AND q.text ILIKE ")
            .push_bind(format!("%{escaped}%"));
    }
    if !filter.exclude_ids.is_empty() {
        query
            .push(" AND NOT (q.q_id = ANY(")
            .push_bind(filter.exclude_ids.clone())
            .push("))");
    }
    query.push(" ORDER BY q.q_id");
}

//=========================================================================================
// `QuestionBank` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuestionBank for DbAdapter {
    async fn get_course(&self, course_id: &str) -> PortResult<Course> {
        let record = sqlx::query_as::<_, CourseRecord>(
            "SELECT course_id, course_name FROM courses WHERE course_id = $1",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))?;

        Ok(record.to_domain())
    }

    async fn find_questions(&self, filter: &QuestionFilter) -> PortResult<Vec<Question>> {
        let mut query = QueryBuilder::<Postgres>::new(QUESTION_SELECT);
        push_question_filter(&mut query, filter);

        query
            .build_query_as::<QuestionRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?
            .into_iter()
            .map(QuestionRecord::to_domain)
            .collect()
    }

    async fn get_question(&self, question_id: QuestionId) -> PortResult<Question> {
        let record = sqlx::query_as::<_, QuestionRecord>(&format!("{QUESTION_SELECT} WHERE q.q_id = $1"))
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Question {} not found", question_id)))?;

        record.to_domain()
    }

    async fn get_questions(&self, question_ids: &[QuestionId]) -> PortResult<Vec<Question>> {
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, QuestionRecord>(&format!(
            "{QUESTION_SELECT} WHERE q.q_id = ANY($1) ORDER BY q.q_id"
        ))
        .bind(question_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(QuestionRecord::to_domain)
        .collect()
    }
}

//=========================================================================================
// `FacultyDirectory` Trait Implementation
//=========================================================================================

#[async_trait]
impl FacultyDirectory for DbAdapter {
    async fn get_faculty_profile(&self, user_id: Uuid) -> PortResult<Option<FacultyProfile>> {
        let record = sqlx::query_as::<_, FacultyRecord>(
            "SELECT user_id, name, department FROM faculty_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.map(FacultyRecord::to_domain))
    }
}

//=========================================================================================
// `DraftRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl DraftRepository for DbAdapter {
    async fn get_draft(&self, draft_id: Uuid) -> PortResult<Draft> {
        sqlx::query_as::<_, DraftRecord>(&format!("{DRAFT_SELECT} WHERE d.id = $1"))
            .bind(draft_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Draft {} not found", draft_id)))?
            .to_domain()
    }

    async fn find_draft(
        &self,
        user_id: Uuid,
        course_id: &str,
        status: DraftStatus,
    ) -> PortResult<Option<Draft>> {
        sqlx::query_as::<_, DraftRecord>(&format!(
            "{DRAFT_SELECT} WHERE d.user_id = $1 AND d.course_id = $2 AND d.status = $3 \
             ORDER BY d.updated_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .bind(course_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(DraftRecord::to_domain)
        .transpose()
    }

    async fn create_draft(&self, new_draft: NewDraft) -> PortResult<Draft> {
        let draft_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO paper_drafts (id, user_id, course_id, constraints, status, version) \
             VALUES ($1, $2, $3, $4, $5, 0)",
        )
        .bind(draft_id)
        .bind(new_draft.user_id)
        .bind(&new_draft.course.id)
        .bind(Json(&new_draft.constraints))
        .bind(DraftStatus::Drafting.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        self.get_draft(draft_id).await
    }

    async fn save_draft(&self, draft: &Draft) -> PortResult<Draft> {
        let result = sqlx::query(
            "UPDATE paper_drafts SET constraints = $1, part_a_question_ids = $2, \
             part_b_question_ids = $3, conversation_history = $4, metadata = $5, status = $6, \
             version = version + 1, updated_at = NOW() \
             WHERE id = $7 AND version = $8",
        )
        .bind(Json(&draft.constraints))
        .bind(&draft.part_a_question_ids)
        .bind(&draft.part_b_question_ids)
        .bind(Json(&draft.conversation_history))
        .bind(Json(&draft.metadata))
        .bind(draft.status.as_str())
        .bind(draft.id)
        .bind(draft.version)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            // Either the draft is gone or someone else saved it first.
            let stored = self.get_draft(draft.id).await?;
            return Err(PortError::Conflict(format!(
                "Draft {} was modified concurrently (expected version {}, found {})",
                draft.id, draft.version, stored.version
            )));
        }

        self.get_draft(draft.id).await
    }

    async fn list_drafts_for_user(
        &self,
        user_id: Uuid,
        status: Option<DraftStatus>,
    ) -> PortResult<Vec<Draft>> {
        sqlx::query_as::<_, DraftRecord>(&format!(
            "{DRAFT_SELECT} WHERE d.user_id = $1 AND ($2::text IS NULL OR d.status = $2) \
             ORDER BY d.updated_at DESC"
        ))
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(DraftRecord::to_domain)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_sql(marks: MarksFilter) -> String {
        let filter = QuestionFilter {
            marks,
            ..QuestionFilter::for_course("CS101")
        };
        let mut query = QueryBuilder::<Postgres>::new(QUESTION_SELECT);
        push_question_filter(&mut query, &filter);
        query.sql().to_string()
    }

    #[test]
    fn marks_within_range_are_bound() {
        assert!(filter_sql(MarksFilter::Exact(5)).contains("AND q.marks = $2"));
        assert!(filter_sql(MarksFilter::AtMost(2)).contains("AND q.marks <= $2"));
        assert!(filter_sql(MarksFilter::Above(2)).contains("AND q.marks > $2"));
    }

    #[test]
    fn marks_beyond_the_column_range_are_not_truncated() {
        let exact = filter_sql(MarksFilter::Exact(u32::MAX));
        assert!(exact.contains("AND FALSE"));
        assert!(!exact.contains("AND q.marks"));

        assert!(filter_sql(MarksFilter::Above(u32::MAX)).contains("AND FALSE"));

        let at_most = filter_sql(MarksFilter::AtMost(u32::MAX));
        assert!(!at_most.contains("AND q.marks"));
        assert!(!at_most.contains("FALSE"));
    }
}

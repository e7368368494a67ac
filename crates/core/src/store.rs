//! Durable interview records backed by SQLite.

use crate::error::StoreError;
use crate::interview::{
    FeedbackItem, FeedbackReport, Interview, InterviewStatus, Question, Response, SessionOrigin,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use sqlx::Row;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Takes the write lock up front so concurrent writers wait on the busy
/// timeout instead of failing a read-to-write lock upgrade.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// Result of the completing write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    /// An earlier run completed the interview; nothing was written.
    AlreadyCompleted,
    /// The stored responses no longer match the report; nothing was written.
    ResponsesChanged,
}

/// Keyed document store for interviews and their responses.
///
/// Every method is a single atomic write or read; callers never observe a
/// partially applied update.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InterviewStore: Send + Sync {
    async fn insert(&self, interview: &Interview) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Interview>, StoreError>;

    /// Inserts or overwrites the response at `response.question_index`.
    async fn upsert_response(&self, interview_id: &str, response: &Response)
    -> Result<(), StoreError>;

    /// pending -> in_progress. A no-op for any later status.
    async fn mark_in_progress(&self, id: &str) -> Result<(), StoreError>;

    async fn mark_ended(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Writes feedback, score and completion in one update, only if the
    /// report scores exactly the responses stored at that moment.
    async fn complete_with_feedback(
        &self,
        id: &str,
        report: &FeedbackReport,
    ) -> Result<Completion, StoreError>;

    async fn save_external_feedback(
        &self,
        id: &str,
        feedback: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SqliteInterviewStore {
    pool: SqlitePool,
}

impl SqliteInterviewStore {
    /// Opens (creating if needed) the database at `database_url` and applies migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// A private in-memory database. One connection, kept alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        MIGRATOR.run(&pool).await?;
        info!("Interview store ready");
        Ok(Self { pool })
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM interviews WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn ensure_exists(&self, id: &str) -> Result<(), StoreError> {
        if self.exists(id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }
}

fn corrupt(id: &str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn to_json<T: serde::Serialize>(id: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| corrupt(id, e))
}

async fn fetch_responses(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Vec<Response>, StoreError> {
    let rows = sqlx::query(
        "SELECT question_index, question_text, answer_text FROM responses \
         WHERE interview_id = ? ORDER BY question_index",
    )
    .bind(id)
    .fetch_all(conn)
    .await?;

    let mut responses = Vec::with_capacity(rows.len());
    for r in rows {
        let index: i64 = r.try_get("question_index")?;
        responses.push(Response {
            question_index: usize::try_from(index).map_err(|e| corrupt(id, e))?,
            question_text: r.try_get("question_text")?,
            answer_text: r.try_get("answer_text")?,
        });
    }
    Ok(responses)
}

fn interview_from_row(row: &SqliteRow, responses: Vec<Response>) -> Result<Interview, StoreError> {
    let id: String = row.try_get("id")?;

    let status: String = row.try_get("status")?;
    let status = InterviewStatus::from_str(&status).map_err(|e| corrupt(&id, e))?;
    let origin: String = row.try_get("origin")?;
    let origin = SessionOrigin::from_str(&origin).map_err(|e| corrupt(&id, e))?;

    let questions: String = row.try_get("questions")?;
    let questions: Vec<Question> =
        serde_json::from_str(&questions).map_err(|e| corrupt(&id, format!("questions: {e}")))?;

    let feedback_details: Option<String> = row.try_get("feedback_details")?;
    let feedback_details = feedback_details
        .map(|raw| serde_json::from_str::<Vec<FeedbackItem>>(&raw))
        .transpose()
        .map_err(|e| corrupt(&id, format!("feedback_details: {e}")))?;

    let external_feedback: Option<String> = row.try_get("external_feedback")?;
    let external_feedback = external_feedback
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
        .transpose()
        .map_err(|e| corrupt(&id, format!("external_feedback: {e}")))?;

    Ok(Interview {
        user_id: row.try_get("user_id")?,
        role: row.try_get("role")?,
        interview_type: row.try_get("interview_type")?,
        experience: row.try_get("experience")?,
        technologies: row.try_get("technologies")?,
        origin,
        questions,
        responses,
        status,
        feedback_details,
        overall_score: row.try_get("overall_score")?,
        external_feedback,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        ended_at: row.try_get("ended_at")?,
        completed_at: row.try_get("completed_at")?,
        feedback_saved_at: row.try_get("feedback_saved_at")?,
        id,
    })
}

#[async_trait]
impl InterviewStore for SqliteInterviewStore {
    async fn insert(&self, interview: &Interview) -> Result<(), StoreError> {
        let id = interview.id.as_str();
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        sqlx::query(
            "INSERT INTO interviews (id, user_id, role, interview_type, experience, technologies, \
             origin, questions, status, feedback_details, overall_score, external_feedback, \
             created_at, updated_at, ended_at, completed_at, feedback_saved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&interview.user_id)
        .bind(&interview.role)
        .bind(&interview.interview_type)
        .bind(&interview.experience)
        .bind(&interview.technologies)
        .bind(interview.origin.as_str())
        .bind(to_json(id, &interview.questions)?)
        .bind(interview.status.as_str())
        .bind(
            interview
                .feedback_details
                .as_ref()
                .map(|f| to_json(id, f))
                .transpose()?,
        )
        .bind(interview.overall_score)
        .bind(
            interview
                .external_feedback
                .as_ref()
                .map(|f| to_json(id, f))
                .transpose()?,
        )
        .bind(interview.created_at)
        .bind(interview.updated_at)
        .bind(interview.ended_at)
        .bind(interview.completed_at)
        .bind(interview.feedback_saved_at)
        .execute(&mut *tx)
        .await?;

        for response in &interview.responses {
            sqlx::query(
                "INSERT INTO responses (interview_id, question_index, question_text, answer_text, updated_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(response.question_index as i64)
            .bind(&response.question_text)
            .bind(&response.answer_text)
            .bind(interview.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(interview_id = %id, "Inserted interview");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Interview>, StoreError> {
        // One read transaction so the row and its responses are a single snapshot.
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query("SELECT * FROM interviews WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let responses = fetch_responses(&mut *tx, id).await?;
        tx.commit().await?;
        interview_from_row(&row, responses).map(Some)
    }

    async fn upsert_response(
        &self,
        interview_id: &str,
        response: &Response,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let row = sqlx::query("SELECT status, questions FROM interviews WHERE id = ?")
            .bind(interview_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(interview_id.to_string()))?;

        let status: String = row.try_get("status")?;
        if status == InterviewStatus::Completed.as_str() {
            return Err(StoreError::AlreadyCompleted(interview_id.to_string()));
        }

        let questions: String = row.try_get("questions")?;
        let questions: Vec<Question> =
            serde_json::from_str(&questions).map_err(|e| corrupt(interview_id, e))?;
        if response.question_index >= questions.len() {
            return Err(StoreError::IndexOutOfRange {
                index: response.question_index,
                len: questions.len(),
            });
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO responses (interview_id, question_index, question_text, answer_text, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(interview_id, question_index) DO UPDATE SET \
             question_text = excluded.question_text, \
             answer_text = excluded.answer_text, \
             updated_at = excluded.updated_at",
        )
        .bind(interview_id)
        .bind(response.question_index as i64)
        .bind(&response.question_text)
        .bind(&response.answer_text)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE interviews SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(interview_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(
            interview_id = %interview_id,
            question_index = response.question_index,
            "Stored response"
        );
        Ok(())
    }

    async fn mark_in_progress(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE interviews SET status = 'in_progress', updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(id).await?;
        }
        Ok(())
    }

    async fn mark_ended(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE interviews SET ended_at = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn complete_with_feedback(
        &self,
        id: &str,
        report: &FeedbackReport,
    ) -> Result<Completion, StoreError> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let row = sqlx::query("SELECT status FROM interviews WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let status: String = row.try_get("status")?;
        let status = InterviewStatus::from_str(&status).map_err(|e| corrupt(id, e))?;
        if !status.can_advance_to(InterviewStatus::Completed) {
            return Ok(Completion::AlreadyCompleted);
        }

        let responses = fetch_responses(&mut *tx, id).await?;
        if !report.covers(&responses) {
            debug!(interview_id = %id, "Responses changed since scoring");
            return Ok(Completion::ResponsesChanged);
        }

        sqlx::query(
            "UPDATE interviews SET status = 'completed', feedback_details = ?, overall_score = ?, \
             completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(to_json(id, &report.items)?)
        .bind(report.overall_score)
        .bind(report.completed_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Completion::Completed)
    }

    async fn save_external_feedback(
        &self,
        id: &str,
        feedback: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE interviews SET external_feedback = ?, feedback_saved_at = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(to_json(id, feedback)?)
        .bind(at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

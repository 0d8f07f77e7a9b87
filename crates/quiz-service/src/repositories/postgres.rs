//! Postgres implementation of [`QuizRepository`].
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Answers and usernames are never logged

use super::QuizRepository;
use crate::errors::QuizError;
use crate::models::{
    CreateQuizRequest, LeaderboardEntry, NewResponse, Question, Quiz, QuizId, SessionStatus,
    UserId, UserProfile,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::instrument;

const QUIZ_COLUMNS: &str = "id, code, title, description, creator_id, status, created_at";

/// Quiz store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgQuizRepository {
    pool: PgPool,
}

impl PgQuizRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Attach questions and options to quiz rows.
    async fn hydrate(&self, rows: Vec<QuizRow>) -> Result<Vec<Quiz>, QuizError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let quiz_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

        let question_rows: Vec<QuestionRow> = sqlx::query_as(
            r#"
            SELECT id, quiz_id, position, prompt, correct_answer, time_limit
            FROM questions
            WHERE quiz_id = ANY($1)
            ORDER BY quiz_id, position
            "#,
        )
        .bind(&quiz_ids)
        .fetch_all(&self.pool)
        .await?;

        let question_ids: Vec<i64> = question_rows.iter().map(|q| q.id).collect();

        let option_rows: Vec<OptionRow> = sqlx::query_as(
            r#"
            SELECT question_id, option_text
            FROM question_options
            WHERE question_id = ANY($1)
            ORDER BY question_id, position
            "#,
        )
        .bind(&question_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut options: HashMap<i64, Vec<String>> = HashMap::new();
        for row in option_rows {
            options.entry(row.question_id).or_default().push(row.option_text);
        }

        let mut questions: HashMap<i64, Vec<Question>> = HashMap::new();
        for row in question_rows {
            questions.entry(row.quiz_id).or_default().push(Question {
                id: row.id,
                quiz_id: row.quiz_id,
                position: row.position,
                prompt: row.prompt,
                options: options.remove(&row.id).unwrap_or_default(),
                correct_answer: row.correct_answer,
                time_limit: row.time_limit,
            });
        }

        rows.into_iter()
            .map(|row| {
                let quiz_questions = questions.remove(&row.id).unwrap_or_default();
                row.into_quiz(quiz_questions)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl QuizRepository for PgQuizRepository {
    #[instrument(skip_all, fields(quiz_code = %code, creator_id = creator_id))]
    async fn create_quiz(
        &self,
        code: &str,
        creator_id: UserId,
        request: &CreateQuizRequest,
    ) -> Result<Quiz, QuizError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<QuizRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO quizzes (code, title, description, creator_id, status)
            VALUES ($1, $2, $3, $4, 'pending')
            ON CONFLICT (code) DO NOTHING
            RETURNING {QUIZ_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(request.title.trim())
        .bind(&request.description)
        .bind(creator_id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = row.ok_or_else(|| QuizError::Conflict("Quiz code already in use".to_string()))?;

        let mut questions = Vec::with_capacity(request.questions.len());
        for (position, question) in request.questions.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|e| QuizError::BadRequest(format!("Too many questions: {e}")))?;
            let time_limit = question.time_limit.unwrap_or(0);

            let question_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO questions (quiz_id, position, prompt, correct_answer, time_limit)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(row.id)
            .bind(position)
            .bind(&question.prompt)
            .bind(&question.correct_answer)
            .bind(time_limit)
            .fetch_one(&mut *tx)
            .await?;

            for (option_position, option_text) in question.options.iter().enumerate() {
                let option_position = i32::try_from(option_position)
                    .map_err(|e| QuizError::BadRequest(format!("Too many options: {e}")))?;
                sqlx::query(
                    r#"
                    INSERT INTO question_options (question_id, position, option_text)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(question_id)
                .bind(option_position)
                .bind(option_text)
                .execute(&mut *tx)
                .await?;
            }

            questions.push(Question {
                id: question_id,
                quiz_id: row.id,
                position,
                prompt: question.prompt.clone(),
                options: question.options.clone(),
                correct_answer: question.correct_answer.clone(),
                time_limit,
            });
        }

        tx.commit().await?;

        row.into_quiz(questions)
    }

    #[instrument(skip_all, fields(quiz_code = %code))]
    async fn find_quiz_by_code(&self, code: &str) -> Result<Option<Quiz>, QuizError> {
        let row: Option<QuizRow> =
            sqlx::query_as(&format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE code = $1"))
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id))]
    async fn find_quiz_by_id(&self, quiz_id: QuizId) -> Result<Option<Quiz>, QuizError> {
        let row: Option<QuizRow> =
            sqlx::query_as(&format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1"))
                .bind(quiz_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }

    #[instrument(skip_all, fields(creator_id = creator_id))]
    async fn quizzes_by_creator(&self, creator_id: UserId) -> Result<Vec<Quiz>, QuizError> {
        let rows: Vec<QuizRow> = sqlx::query_as(&format!(
            "SELECT {QUIZ_COLUMNS} FROM quizzes WHERE creator_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(creator_id)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id, status = status.as_str()))]
    async fn set_status(&self, quiz_id: QuizId, status: SessionStatus) -> Result<(), QuizError> {
        let result = sqlx::query("UPDATE quizzes SET status = $2 WHERE id = $1")
            .bind(quiz_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QuizError::NotFound("Quiz not found".to_string()));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id, user_id = user_id))]
    async fn is_host(&self, quiz_id: QuizId, user_id: UserId) -> Result<bool, QuizError> {
        let is_host: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM quizzes WHERE id = $1 AND creator_id = $2)",
        )
        .bind(quiz_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(is_host)
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id, user_id = profile.user_id))]
    async fn add_participant(
        &self,
        quiz_id: QuizId,
        profile: &UserProfile,
    ) -> Result<(), QuizError> {
        sqlx::query(
            r#"
            INSERT INTO quiz_participants (quiz_id, user_id, username)
            VALUES ($1, $2, $3)
            ON CONFLICT (quiz_id, user_id) DO NOTHING
            "#,
        )
        .bind(quiz_id)
        .bind(profile.user_id)
        .bind(&profile.username)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id, user_id = user_id))]
    async fn remove_participant(&self, quiz_id: QuizId, user_id: UserId) -> Result<(), QuizError> {
        sqlx::query("DELETE FROM quiz_participants WHERE quiz_id = $1 AND user_id = $2")
            .bind(quiz_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(quiz_id = response.quiz_id, user_id = response.user_id))]
    async fn save_response(&self, response: &NewResponse) -> Result<(), QuizError> {
        sqlx::query(
            r#"
            INSERT INTO quiz_responses
                (quiz_id, question_id, user_id, username, answer, score, time_spent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(response.quiz_id)
        .bind(response.question_id)
        .bind(response.user_id)
        .bind(&response.username)
        .bind(&response.answer)
        .bind(response.score)
        .bind(response.time_spent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id, user_id = user_id))]
    async fn clear_user_progress(
        &self,
        quiz_id: QuizId,
        user_id: UserId,
    ) -> Result<(), QuizError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM quiz_responses WHERE quiz_id = $1 AND user_id = $2")
            .bind(quiz_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM quiz_progress WHERE quiz_id = $1 AND user_id = $2")
            .bind(quiz_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id, user_id = user_id))]
    async fn progress(&self, quiz_id: QuizId, user_id: UserId) -> Result<usize, QuizError> {
        let next_index: Option<i32> = sqlx::query_scalar(
            "SELECT next_index FROM quiz_progress WHERE quiz_id = $1 AND user_id = $2",
        )
        .bind(quiz_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        to_index(next_index.unwrap_or(0))
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id, user_id = user_id))]
    async fn advance_progress(
        &self,
        quiz_id: QuizId,
        user_id: UserId,
    ) -> Result<usize, QuizError> {
        // Single statement: concurrent answers from the same user cannot lose
        // an increment.
        let next_index: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO quiz_progress (quiz_id, user_id, next_index)
            VALUES ($1, $2, 1)
            ON CONFLICT (quiz_id, user_id)
            DO UPDATE SET next_index = quiz_progress.next_index + 1, updated_at = NOW()
            RETURNING next_index
            "#,
        )
        .bind(quiz_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        to_index(next_index)
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id))]
    async fn reset_progress(&self, quiz_id: QuizId) -> Result<(), QuizError> {
        sqlx::query("UPDATE quiz_progress SET next_index = 0, updated_at = NOW() WHERE quiz_id = $1")
            .bind(quiz_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id))]
    async fn unique_participant_count(&self, quiz_id: QuizId) -> Result<usize, QuizError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT user_id) FROM quiz_responses WHERE quiz_id = $1",
        )
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await?;

        to_count(count)
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id, total_questions = total_questions))]
    async fn finished_count(
        &self,
        quiz_id: QuizId,
        total_questions: usize,
    ) -> Result<usize, QuizError> {
        let total = i32::try_from(total_questions)
            .map_err(|e| QuizError::Internal(format!("question count out of range: {e}")))?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM quiz_progress WHERE quiz_id = $1 AND next_index >= $2",
        )
        .bind(quiz_id)
        .bind(total)
        .fetch_one(&self.pool)
        .await?;

        to_count(count)
    }

    #[instrument(skip_all, fields(quiz_id = quiz_id))]
    async fn leaderboard(&self, quiz_id: QuizId) -> Result<Vec<LeaderboardEntry>, QuizError> {
        let rows: Vec<LeaderboardRow> = sqlx::query_as(
            r#"
            SELECT username, COALESCE(SUM(score), 0)::BIGINT AS score
            FROM quiz_responses
            WHERE quiz_id = $1
            GROUP BY username
            ORDER BY score DESC, username ASC
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LeaderboardEntry {
                username: r.username,
                score: r.score,
            })
            .collect())
    }
}

fn to_index(value: i32) -> Result<usize, QuizError> {
    usize::try_from(value)
        .map_err(|e| QuizError::Database(format!("negative progress index {value}: {e}")))
}

fn to_count(value: i64) -> Result<usize, QuizError> {
    usize::try_from(value).map_err(|e| QuizError::Database(format!("invalid count {value}: {e}")))
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct QuizRow {
    id: i64,
    code: String,
    title: String,
    description: String,
    creator_id: i64,
    status: String,
    created_at: DateTime<Utc>,
}

impl QuizRow {
    fn into_quiz(self, questions: Vec<Question>) -> Result<Quiz, QuizError> {
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            QuizError::Database(format!("unknown quiz status '{}'", self.status))
        })?;

        Ok(Quiz {
            id: self.id,
            code: self.code,
            title: self.title,
            description: self.description,
            creator_id: self.creator_id,
            status,
            questions,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    id: i64,
    quiz_id: i64,
    position: i32,
    prompt: String,
    correct_answer: String,
    time_limit: i32,
}

#[derive(sqlx::FromRow)]
struct OptionRow {
    question_id: i64,
    option_text: String,
}

#[derive(sqlx::FromRow)]
struct LeaderboardRow {
    username: String,
    score: i64,
}

//! Data Access Layer
//!
//! This module contains all the functions for interacting with the PostgreSQL database.
//! It uses `sqlx` with a bounded connection pool; callers queue for a
//! connection instead of opening new ones.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

use crate::{
    auth::{SessionStore, StoreError},
    models::{
        Contest, NewContest, ProgressStatus, Question, QuestionProgress, QuestionQuery, Reminder,
        User,
    },
};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool of at most `max_connections`, waiting up to `acquire_timeout` for a free one.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Deletes a session row, logging the user out everywhere that cookie is used.
    pub async fn delete_session(&self, sid: &str) -> Result<bool> {
        let result = sqlx::query(r#"DELETE FROM "session" WHERE sid = $1"#)
            .bind(sid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Inserts or refreshes contests keyed by `(source, external_id)` in a single transaction.
    pub async fn upsert_contests(&self, contests: &[NewContest]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for contest in contests {
            let result = sqlx::query(
                r#"
                INSERT INTO contests (source, external_id, name, start_time, duration_seconds, url)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (source, external_id) DO UPDATE
                SET name = EXCLUDED.name,
                    start_time = EXCLUDED.start_time,
                    duration_seconds = EXCLUDED.duration_seconds,
                    url = EXCLUDED.url,
                    updated_at = now()
                "#,
            )
            .bind(&contest.source)
            .bind(&contest.external_id)
            .bind(&contest.name)
            .bind(contest.start_time)
            .bind(contest.duration_seconds)
            .bind(&contest.url)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Lists contests that have not started yet, soonest first.
    pub async fn upcoming_contests(&self, limit: i64) -> Result<Vec<Contest>> {
        let contests = sqlx::query_as::<_, Contest>(
            r#"
            SELECT id, source, external_id, name, start_time, duration_seconds, url, updated_at
            FROM contests
            WHERE start_time > now()
            ORDER BY start_time ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(contests)
    }

    pub async fn contest_exists(&self, contest_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM contests WHERE id = $1)")
                .bind(contest_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Creates or updates a user's reminder for a contest.
    pub async fn set_reminder(
        &self,
        user_id: i64,
        contest_id: i64,
        remind_before_minutes: i32,
    ) -> Result<Reminder> {
        sqlx::query(
            r#"
            INSERT INTO reminders (user_id, contest_id, remind_before_minutes)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, contest_id) DO UPDATE
            SET remind_before_minutes = EXCLUDED.remind_before_minutes
            "#,
        )
        .bind(user_id)
        .bind(contest_id)
        .bind(remind_before_minutes)
        .execute(&self.pool)
        .await?;

        let reminder = sqlx::query_as::<_, Reminder>(
            r#"
            SELECT r.contest_id, c.name AS contest_name, c.start_time, c.url,
                   r.remind_before_minutes, r.created_at
            FROM reminders r
            JOIN contests c ON c.id = r.contest_id
            WHERE r.user_id = $1 AND r.contest_id = $2
            "#,
        )
        .bind(user_id)
        .bind(contest_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(reminder)
    }

    /// Removes a reminder. Returns `false` when there was none.
    pub async fn delete_reminder(&self, user_id: i64, contest_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reminders WHERE user_id = $1 AND contest_id = $2")
            .bind(user_id)
            .bind(contest_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_reminders(&self, user_id: i64) -> Result<Vec<Reminder>> {
        let reminders = sqlx::query_as::<_, Reminder>(
            r#"
            SELECT r.contest_id, c.name AS contest_name, c.start_time, c.url,
                   r.remind_before_minutes, r.created_at
            FROM reminders r
            JOIN contests c ON c.id = r.contest_id
            WHERE r.user_id = $1
            ORDER BY c.start_time ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reminders)
    }

    /// Lists the question bank, optionally filtered by topic and difficulty.
    pub async fn list_questions(&self, query: &QuestionQuery) -> Result<Vec<Question>> {
        let questions = sqlx::query_as::<_, Question>(
            r#"
            SELECT id, title, topic, difficulty, url
            FROM questions
            WHERE ($1::text IS NULL OR topic = $1)
              AND ($2::difficulty IS NULL OR difficulty = $2)
            ORDER BY id ASC
            "#,
        )
        .bind(query.topic.as_deref())
        .bind(query.difficulty)
        .fetch_all(&self.pool)
        .await?;
        Ok(questions)
    }

    pub async fn question_exists(&self, question_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM questions WHERE id = $1)")
                .bind(question_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    pub async fn list_progress(&self, user_id: i64) -> Result<Vec<QuestionProgress>> {
        let progress = sqlx::query_as::<_, QuestionProgress>(
            r#"
            SELECT question_id, status, updated_at
            FROM question_progress
            WHERE user_id = $1
            ORDER BY question_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(progress)
    }

    /// Records the user's status for a question.
    pub async fn set_progress(
        &self,
        user_id: i64,
        question_id: i64,
        status: ProgressStatus,
    ) -> Result<QuestionProgress> {
        let progress = sqlx::query_as::<_, QuestionProgress>(
            r#"
            INSERT INTO question_progress (user_id, question_id, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, question_id) DO UPDATE
            SET status = EXCLUDED.status, updated_at = now()
            RETURNING question_id, status, updated_at
            "#,
        )
        .bind(user_id)
        .bind(question_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(progress)
    }
}

#[async_trait]
impl SessionStore for Db {
    async fn session_payload(&self, sid: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let payload: Option<serde_json::Value> =
            sqlx::query_scalar(r#"SELECT sess FROM "session" WHERE sid = $1 AND expire > now()"#)
                .bind(sid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(payload)
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    const INIT_MIGRATION: &str = include_str!("../migrations/20240501000000_init.sql");

    /// Statements in the migration, without comment lines.
    fn statements() -> Vec<String> {
        let sql: String = INIT_MIGRATION
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        sql.split("END $$;")
            .flat_map(|chunk| chunk.split(';'))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    #[test]
    fn test_init_migration_is_rerunnable() {
        let statements = statements();
        assert!(!statements.is_empty());
        for statement in statements.iter().filter(|s| s.starts_with("CREATE ")) {
            assert!(
                statement.starts_with("CREATE TABLE IF NOT EXISTS")
                    || statement.starts_with("CREATE INDEX IF NOT EXISTS"),
                "unguarded statement: {statement}"
            );
        }
    }

    #[test]
    fn test_enum_types_tolerate_existing_definitions() {
        for name in ["difficulty", "progress_status"] {
            let create = format!("CREATE TYPE {name} AS ENUM");
            let at = INIT_MIGRATION
                .find(&create)
                .unwrap_or_else(|| panic!("missing type {name}"));
            let block_start = INIT_MIGRATION[..at]
                .rfind("DO $$ BEGIN")
                .expect("type is created inside a DO block");
            let block_end = at + INIT_MIGRATION[at..].find("END $$;").unwrap();
            let block = &INIT_MIGRATION[block_start..block_end];
            assert!(block.contains("WHEN duplicate_object THEN null"), "{block}");
            assert_eq!(block.matches("CREATE TYPE").count(), 1);
        }
    }
}

//! API and Database Models
//!
//! This module defines the core data structures used for both database mapping
//! with `sqlx` and for generating OpenAPI documentation with `utoipa`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::{IntoParams, ToSchema};

#[derive(sqlx::Type, Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "difficulty", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(sqlx::Type, Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "progress_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Todo,
    Attempted,
    Solved,
}

// Implement Display for easy conversion to a string, useful for logging and debugging.
impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::Todo => write!(f, "todo"),
            ProgressStatus::Attempted => write!(f, "attempted"),
            ProgressStatus::Solved => write!(f, "solved"),
        }
    }
}

/// An account as seen by the API. Credentials never leave the database.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct Contest {
    pub id: i64,
    #[schema(example = "codeforces")]
    pub source: String,
    pub external_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i32,
    pub url: String,
    pub updated_at: DateTime<Utc>,
}

/// A contest as fetched from an external source, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContest {
    pub source: String,
    pub external_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i32,
    pub url: String,
}

/// A user's reminder joined with the contest it points at.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct Reminder {
    pub contest_id: i64,
    pub contest_name: String,
    pub start_time: DateTime<Utc>,
    pub url: String,
    pub remind_before_minutes: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct Question {
    pub id: i64,
    pub title: String,
    #[schema(example = "graphs")]
    pub topic: String,
    #[schema(value_type = String, example = "medium")]
    pub difficulty: Difficulty,
    pub url: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct QuestionProgress {
    pub question_id: i64,
    #[schema(value_type = String, example = "solved")]
    pub status: ProgressStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, ToSchema)]
pub struct SetReminderPayload {
    /// Minutes before the contest start; defaults to 30.
    #[schema(example = 30)]
    pub remind_before_minutes: Option<i32>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateProgressPayload {
    #[schema(value_type = String, example = "attempted")]
    pub status: ProgressStatus,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct QuestionQuery {
    pub topic: Option<String>,
    #[param(value_type = Option<String>)]
    pub difficulty: Option<Difficulty>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Reachability of the generation backend as reported by `/api/tags`.
#[derive(Serialize, ToSchema, Debug)]
pub struct LlmHealth {
    pub available: bool,
    pub model: String,
    pub model_pulled: bool,
    pub models: Vec<String>,
    pub active_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

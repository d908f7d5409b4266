//! Axum Handlers for the REST API
//!
//! This module contains the HTTP side of the service: health probes, the
//! current user, contests and reminders, and the question bank. Endpoints
//! that need a user resolve it from the same session cookie the relay uses.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    auth::{AuthOutcome, SESSION_COOKIE, authenticate, session_id_from_cookie},
    models::{
        Contest, ErrorResponse, HealthResponse, LlmHealth, Question, QuestionProgress,
        QuestionQuery, Reminder, SetReminderPayload, UpdateProgressPayload, User,
    },
    state::AppState,
    ws::session::cookie_header,
};

const DEFAULT_REMIND_BEFORE_MINUTES: i32 = 30;
const MAX_REMIND_BEFORE_MINUTES: i32 = 7 * 24 * 60;
const UPCOMING_CONTEST_LIMIT: i64 = 100;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    ServiceUnavailable(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unauthorized => {
                let message = "Authentication required.".to_string();
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::ServiceUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse { message }),
            )
                .into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Resolves the session cookie to a user or fails with 401/503.
async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let cookie = cookie_header(headers);
    match authenticate(state.sessions.as_ref(), cookie.as_deref()).await {
        Ok(AuthOutcome::Authenticated(user)) => Ok(user),
        Ok(AuthOutcome::Unauthenticated(_)) => Err(ApiError::Unauthorized),
        Err(err) => {
            error!(error = ?err, "Session lookup failed");
            Err(ApiError::ServiceUnavailable(
                "Authentication is temporarily unavailable.".to_string(),
            ))
        }
    }
}

/// Whether `model` appears in a `/api/tags` listing. An untagged name matches `:latest`.
pub(crate) fn model_is_pulled(models: &[String], model: &str) -> bool {
    models.iter().any(|name| {
        name == model
            || (!model.contains(':')
                && name
                    .strip_prefix(model)
                    .is_some_and(|tag| tag == ":latest"))
    })
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Reachability of the generation backend and whether the configured model is pulled.
#[utoipa::path(
    get,
    path = "/api/llm/health",
    responses((status = 200, description = "Generation backend status", body = LlmHealth))
)]
pub async fn llm_health(State(state): State<Arc<AppState>>) -> Json<LlmHealth> {
    let backend = state.relay.backend();
    let model = backend.model().to_string();
    let active_connections = state.connections.len();

    match backend.list_models().await {
        Ok(models) => {
            let model_pulled = model_is_pulled(&models, &model);
            let message = (!model_pulled).then(|| {
                format!("Model '{model}' is not pulled. Run `ollama pull {model}` first.")
            });
            Json(LlmHealth {
                available: true,
                model,
                model_pulled,
                models,
                active_connections,
                message,
            })
        }
        Err(err) => {
            warn!(error = %err, "Generation backend health probe failed");
            Json(LlmHealth {
                available: false,
                model,
                model_pulled: false,
                models: Vec::new(),
                active_connections,
                message: Some(err.user_message()),
            })
        }
    }
}

/// The user behind the session cookie.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 503, description = "Session store unavailable", body = ErrorResponse)
    )
)]
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<User>, ApiError> {
    Ok(Json(require_user(&state, &headers).await?))
}

/// Ends the current session.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 204, description = "Session deleted"),
        (status = 401, description = "No valid session", body = ErrorResponse)
    )
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;
    let cookie = cookie_header(&headers).unwrap_or_default();
    if let Some(sid) = session_id_from_cookie(&cookie, SESSION_COOKIE) {
        state.db.delete_session(sid).await?;
    }
    info!(user_id = user.id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// Upcoming contests, soonest first.
#[utoipa::path(
    get,
    path = "/api/contests",
    responses(
        (status = 200, description = "Upcoming contests", body = [Contest]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_contests(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Contest>>, ApiError> {
    let contests = state.db.upcoming_contests(UPCOMING_CONTEST_LIMIT).await?;
    Ok(Json(contests))
}

/// The current user's contest reminders.
#[utoipa::path(
    get,
    path = "/api/reminders",
    responses(
        (status = 200, description = "Reminders", body = [Reminder]),
        (status = 401, description = "No valid session", body = ErrorResponse)
    )
)]
pub async fn list_reminders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Reminder>>, ApiError> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(state.db.list_reminders(user.id).await?))
}

/// Creates or updates a reminder for a contest.
#[utoipa::path(
    put,
    path = "/api/contests/{id}/reminder",
    request_body = SetReminderPayload,
    responses(
        (status = 200, description = "Reminder saved", body = Reminder),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 404, description = "Contest not found", body = ErrorResponse)
    ),
    params(("id" = i64, Path, description = "Contest ID"))
)]
pub async fn set_reminder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<SetReminderPayload>,
) -> Result<Json<Reminder>, ApiError> {
    let user = require_user(&state, &headers).await?;

    let minutes = payload
        .remind_before_minutes
        .unwrap_or(DEFAULT_REMIND_BEFORE_MINUTES);
    if !(1..=MAX_REMIND_BEFORE_MINUTES).contains(&minutes) {
        return Err(ApiError::BadRequest(format!(
            "remind_before_minutes must be between 1 and {}",
            MAX_REMIND_BEFORE_MINUTES
        )));
    }

    if !state.db.contest_exists(id).await? {
        return Err(ApiError::NotFound(format!(
            "Contest with id '{}' not found",
            id
        )));
    }

    let reminder = state.db.set_reminder(user.id, id, minutes).await?;
    Ok(Json(reminder))
}

/// Removes the current user's reminder for a contest.
#[utoipa::path(
    delete,
    path = "/api/contests/{id}/reminder",
    responses(
        (status = 204, description = "Reminder removed"),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 404, description = "No reminder for this contest", body = ErrorResponse)
    ),
    params(("id" = i64, Path, description = "Contest ID"))
)]
pub async fn delete_reminder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;
    if state.db.delete_reminder(user.id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "No reminder for contest '{}'",
            id
        )))
    }
}

/// The question bank, optionally filtered.
#[utoipa::path(
    get,
    path = "/api/questions",
    params(QuestionQuery),
    responses(
        (status = 200, description = "Questions", body = [Question]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_questions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuestionQuery>,
) -> Result<Json<Vec<Question>>, ApiError> {
    Ok(Json(state.db.list_questions(&query).await?))
}

/// The current user's progress across the question bank.
#[utoipa::path(
    get,
    path = "/api/questions/progress",
    responses(
        (status = 200, description = "Progress rows", body = [QuestionProgress]),
        (status = 401, description = "No valid session", body = ErrorResponse)
    )
)]
pub async fn list_progress(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<QuestionProgress>>, ApiError> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(state.db.list_progress(user.id).await?))
}

/// Records the current user's status for a question.
#[utoipa::path(
    put,
    path = "/api/questions/{id}/progress",
    request_body = UpdateProgressPayload,
    responses(
        (status = 200, description = "Progress saved", body = QuestionProgress),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 404, description = "Question not found", body = ErrorResponse)
    ),
    params(("id" = i64, Path, description = "Question ID"))
)]
pub async fn update_progress(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateProgressPayload>,
) -> Result<Json<QuestionProgress>, ApiError> {
    let user = require_user(&state, &headers).await?;

    if !state.db.question_exists(id).await? {
        return Err(ApiError::NotFound(format!(
            "Question with id '{}' not found",
            id
        )));
    }

    let progress = state.db.set_progress(user.id, id, payload.status).await?;
    info!(user_id = user.id, question_id = id, status = %payload.status, "Progress updated");
    Ok(Json(progress))
}

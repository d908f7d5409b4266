//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the relay WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        Contest, Difficulty, ErrorResponse, HealthResponse, LlmHealth, ProgressStatus, Question,
        QuestionProgress, Reminder, SetReminderPayload, UpdateProgressPayload, User,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::llm_health,
        handlers::me,
        handlers::logout,
        handlers::list_contests,
        handlers::list_reminders,
        handlers::set_reminder,
        handlers::delete_reminder,
        handlers::list_questions,
        handlers::list_progress,
        handlers::update_progress,
    ),
    components(
        schemas(HealthResponse, LlmHealth, User, Contest, Reminder, SetReminderPayload, Question, QuestionProgress, UpdateProgressPayload, Difficulty, ProgressStatus, ErrorResponse)
    ),
    tags(
        (name = "CodePrep API", description = "Contests, reminders, question progress and the streaming assistant")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/api/llm/health", get(handlers::llm_health))
        .route("/api/auth/me", get(handlers::me))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/contests", get(handlers::list_contests))
        .route(
            "/api/contests/{id}/reminder",
            put(handlers::set_reminder).delete(handlers::delete_reminder),
        )
        .route("/api/reminders", get(handlers::list_reminders))
        .route("/api/questions", get(handlers::list_questions))
        .route("/api/questions/progress", get(handlers::list_progress))
        .route("/api/questions/{id}/progress", put(handlers::update_progress))
        .route("/ws/llm", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI and the liveness probe).
    Router::new()
        .route("/health", get(handlers::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        AccessResponse, CreateSessionPayload, ErrorResponse, EvaluationEvent, FeedbackResponse,
        MessagePayload, MessageResponse, ProgressResponse, ScoreInfo, Session,
        SessionCreatedResponse, StartRoleplayResponse, Turn,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::get_session,
        handlers::get_turns,
        handlers::post_message,
        handlers::start_roleplay,
        handlers::session_feedback,
        handlers::reset_session,
        handlers::end_session,
        handlers::user_progress,
        handlers::technique_access,
    ),
    components(
        schemas(
            Session, Turn, EvaluationEvent, CreateSessionPayload, MessagePayload,
            MessageResponse, ScoreInfo, SessionCreatedResponse, StartRoleplayResponse,
            FeedbackResponse, AccessResponse, ProgressResponse, ErrorResponse
        )
    ),
    tags(
        (name = "Dealcoach API", description = "Session orchestration for the sales roleplay coach")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/turns", get(handlers::get_turns))
        .route("/sessions/{id}/message", post(handlers::post_message))
        .route(
            "/sessions/{id}/start-roleplay",
            post(handlers::start_roleplay),
        )
        .route("/sessions/{id}/feedback", post(handlers::session_feedback))
        .route("/sessions/{id}/reset", post(handlers::reset_session))
        .route("/sessions/{id}/end", post(handlers::end_session))
        .route("/users/{user_id}/progress", get(handlers::user_progress))
        .route(
            "/users/{user_id}/access/{technique_id}",
            get(handlers::technique_access),
        )
        .route("/ws", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for session
//! management, messaging, progress and feedback. It uses `utoipa` doc
//! comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use dealcoach_core::context::ContextState;
use dealcoach_core::conversation::TurnRole;
use dealcoach_core::sequence;
use dealcoach_core::state_machine::SessionMode;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{
        AccessResponse, CreateSessionPayload, ErrorResponse, FeedbackResponse, MessagePayload,
        MessageResponse, ProgressResponse, ScoreInfo, Session, SessionCreatedResponse,
        StartRoleplayResponse, Turn,
    },
    prompts,
    state::AppState,
    turn::{self, roleplay_already_started},
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// The message as it may be shown to a client; internal errors are
    /// masked the same way the HTTP responses mask them.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Forbidden(m)
            | ApiError::Conflict(m) => m.clone(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                "An internal server error occurred.".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Forbidden(message) => {
                (StatusCode::FORBIDDEN, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
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

/// The mode a fresh session starts in. With every slot already known (or
/// none required) a capable technique goes straight into roleplay;
/// roleplay-incapable techniques land in coach chat regardless.
fn initial_session_mode(context_complete: bool, roleplay_capable: bool) -> SessionMode {
    if !context_complete {
        SessionMode::ContextGathering
    } else if roleplay_capable {
        SessionMode::Roleplay
    } else {
        SessionMode::CoachChat
    }
}

async fn load_session(state: &Arc<AppState>, id: Uuid) -> Result<Session, ApiError> {
    state
        .db
        .get_session(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{id}' not found")))
}

/// Create a new coaching session for a technique.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created successfully", body = SessionCreatedResponse),
        (status = 403, description = "Technique locked by the sequence gate", body = AccessResponse),
        (status = 404, description = "Unknown technique", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    let technique = state
        .catalog
        .get(&payload.technique_id)
        .ok_or_else(|| {
            ApiError::NotFound(format!("Unknown technique '{}'", payload.technique_id))
        })?;
    if technique.is_phase_header {
        return Err(ApiError::BadRequest(format!(
            "'{}' is a phase, not a trainable technique",
            payload.technique_id
        )));
    }

    let access = sequence::check_access(
        &state.catalog,
        state.db.as_ref(),
        &payload.user_id,
        &payload.technique_id,
        payload.expert_mode,
    )
    .await?;
    if !access.can_access {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(serde_json::to_value(AccessResponse {
                technique_id: payload.technique_id.clone(),
                can_access: false,
                missing_techniques: access.missing_techniques,
                next_in_sequence: access.next_in_sequence,
            })
            .map_err(anyhow::Error::from)?),
        )
            .into_response());
    }

    // Context known from earlier sessions pre-fills the protocol.
    let known = state.db.get_user_context(&payload.user_id).await?;
    let phase = state.catalog.phase_of(&payload.technique_id);
    let slots = state.catalog.slots_for_phase(phase);
    let context = ContextState::with_prefilled(slots, &known);

    let initial_mode = initial_session_mode(context.is_complete, technique.roleplay_capable);

    let session = state
        .db
        .create_session(
            &payload.user_id,
            &payload.technique_id,
            initial_mode,
            phase as i32,
            serde_json::to_value(&context).map_err(anyhow::Error::from)?,
        )
        .await?;
    info!(session_id = %session.id, technique = %session.technique_id, mode = %initial_mode, "session created");

    let opening = match initial_mode {
        SessionMode::ContextGathering => format!(
            "Welkom! Voordat we '{}' gaan oefenen wil ik je situatie beter begrijpen. {}",
            technique.name,
            slots
                .iter()
                .find(|s| !context.gathered.contains_key(&s.key))
                .map(|s| s.question.clone())
                .unwrap_or_default()
        ),
        SessionMode::Roleplay => generate_or(
            &state,
            prompts::roleplay_opening_system(
                &session.technique_id,
                &technique.name,
                &context.gathered,
            ),
            prompts::ROLEPLAY_OPENING_FALLBACK,
        )
        .await,
        _ => generate_or(
            &state,
            prompts::coach_system(&session.technique_id, &technique.name, &context.gathered),
            prompts::COACH_OPENING_FALLBACK,
        )
        .await,
    };
    // A ContextGathering opening counts as the first question being asked.
    if initial_mode == SessionMode::ContextGathering {
        let mut opened = context.clone();
        // Advance past the trigger so the next message is an answer.
        opened.advance(slots, "");
        state
            .db
            .update_session(
                session.id,
                crate::db::SessionPatch {
                    context: Some(serde_json::to_value(&opened).map_err(anyhow::Error::from)?),
                    ..Default::default()
                },
            )
            .await?;
    }
    state
        .db
        .append_turn(session.id, TurnRole::Customer, initial_mode, &opening)
        .await?;

    let session = load_session(&state, session.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(
            serde_json::to_value(SessionCreatedResponse { session, opening })
                .map_err(anyhow::Error::from)?,
        ),
    )
        .into_response())
}

/// Generates an opening line, falling back to fixed text on any failure.
async fn generate_or(state: &Arc<AppState>, system: String, fallback: &str) -> String {
    let messages = match prompts::build_messages(system, &[]) {
        Ok(m) => m,
        Err(_) => return fallback.to_string(),
    };
    match tokio::time::timeout(state.config.turn_timeout, state.generator.complete(messages)).await
    {
        Ok(Ok(text)) if !text.trim().is_empty() => text,
        _ => fallback.to_string(),
    }
}

/// Get a specific session by its ID.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = Session),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = load_session(&state, id).await?;
    Ok((StatusCode::OK, Json(session)))
}

/// Full transcript of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}/turns",
    responses(
        (status = 200, description = "Session transcript", body = [Turn]),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
pub async fn get_turns(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Turn>>, ApiError> {
    let _ = load_session(&state, id).await?;
    Ok(Json(state.db.get_turns(id).await?))
}

/// Send one message to the session and receive the reply synchronously.
#[utoipa::path(
    post,
    path = "/sessions/{id}/message",
    request_body = MessagePayload,
    responses(
        (status = 200, description = "Message processed", body = MessageResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session has ended", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MessagePayload>,
) -> Result<Json<MessageResponse>, ApiError> {
    let outcome = turn::handle_message(&state, id, &payload.message, payload.action).await?;
    Ok(Json(MessageResponse {
        assistant: outcome.assistant,
        mode: outcome.mode,
        phase: outcome.phase,
        score: ScoreInfo {
            delta: outcome.score_delta,
            total: outcome.total_score,
        },
        warnings: outcome.warnings,
        is_duplicate: outcome.is_duplicate,
    }))
}

/// Start the roleplay explicitly. Tolerant of the session already being
/// in roleplay: that is a success, not a conflict.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start-roleplay",
    responses(
        (status = 200, description = "Roleplay running", body = StartRoleplayResponse),
        (status = 400, description = "Technique cannot be roleplayed, or session not ready", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session has ended", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
pub async fn start_roleplay(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StartRoleplayResponse>, ApiError> {
    let session = load_session(&state, id).await?;
    if !state.catalog.roleplay_capable(&session.technique_id) {
        return Err(ApiError::BadRequest(format!(
            "Technique '{}' has no roleplay practice",
            session.technique_id
        )));
    }
    turn::check_roleplay_start(&session)?;
    let turns = state.db.get_turns(id).await?;
    if roleplay_already_started(session.mode(), &turns) {
        return Ok(Json(StartRoleplayResponse {
            mode: SessionMode::Roleplay,
            opening: None,
            already_started: true,
        }));
    }

    let session = state
        .db
        .update_session(
            id,
            crate::db::SessionPatch {
                mode: Some(SessionMode::Roleplay),
                ..Default::default()
            },
        )
        .await?;
    let opening = generate_or(
        &state,
        prompts::roleplay_opening_system(
            &session.technique_id,
            state.catalog.display_name(&session.technique_id),
            &session.context_state().gathered,
        ),
        prompts::ROLEPLAY_OPENING_FALLBACK,
    )
    .await;
    state
        .db
        .append_turn(id, TurnRole::Customer, SessionMode::Roleplay, &opening)
        .await?;
    Ok(Json(StartRoleplayResponse {
        mode: SessionMode::Roleplay,
        opening: Some(opening),
        already_started: false,
    }))
}

/// Produce the session debrief and switch to coach feedback.
#[utoipa::path(
    post,
    path = "/sessions/{id}/feedback",
    responses(
        (status = 200, description = "Session feedback", body = FeedbackResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
pub async fn session_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let session = load_session(&state, id).await?;
    let feedback = turn::render_feedback(
        &session.events(),
        session.total_score,
        state.catalog.display_name(&session.technique_id),
    );
    let session = state
        .db
        .update_session(
            id,
            crate::db::SessionPatch {
                mode: Some(SessionMode::CoachFeedback),
                ..Default::default()
            },
        )
        .await?;
    state
        .db
        .append_turn(id, TurnRole::Customer, SessionMode::CoachFeedback, &feedback)
        .await?;
    Ok(Json(FeedbackResponse {
        feedback,
        mode: SessionMode::CoachFeedback,
        total_score: session.total_score,
    }))
}

/// Reset a session back to its starting point for the same technique.
#[utoipa::path(
    post,
    path = "/sessions/{id}/reset",
    responses(
        (status = 200, description = "Session reset", body = Session),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, ApiError> {
    let session = load_session(&state, id).await?;
    let phase = state.catalog.phase_of(&session.technique_id);
    let slots = state.catalog.slots_for_phase(phase);
    let known = state.db.get_user_context(&session.user_id).await?;
    let context = ContextState::with_prefilled(slots, &known);
    let mode = if !context.is_complete {
        SessionMode::ContextGathering
    } else if state.catalog.roleplay_capable(&session.technique_id) {
        SessionMode::RoleplayReady
    } else {
        SessionMode::CoachChat
    };
    let session = state
        .db
        .update_session(
            id,
            crate::db::SessionPatch {
                mode: Some(mode),
                phase: Some(phase as i32),
                context: Some(serde_json::to_value(&context).map_err(anyhow::Error::from)?),
                events: Some(serde_json::json!([])),
                used_techniques: Some(serde_json::json!([])),
                total_score: Some(0),
                is_active: Some(true),
            },
        )
        .await?;
    state
        .db
        .append_turn(
            id,
            TurnRole::Customer,
            mode,
            "We beginnen opnieuw met een schone lei. Zeg het maar als je er klaar voor bent!",
        )
        .await?;
    Ok(Json(session))
}

/// End a session and record the practice attempt.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    responses(
        (status = 200, description = "Session ended", body = Session),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(("id" = Uuid, Path, description = "Session ID"))
)]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, ApiError> {
    let session = load_session(&state, id).await?;
    if session.is_active {
        // Any real practice counts towards mastery, even an early stop.
        state
            .db
            .record_attempt(&session.user_id, &session.technique_id)
            .await?;
    }
    let session = state
        .db
        .update_session(
            id,
            crate::db::SessionPatch {
                mode: Some(SessionMode::Ended),
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?;
    info!(session_id = %id, "session ended");
    Ok(Json(session))
}

/// Curriculum progress for a user.
#[utoipa::path(
    get,
    path = "/users/{user_id}/progress",
    responses(
        (status = 200, description = "Progress summary", body = ProgressResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(("user_id" = String, Path, description = "User ID"))
)]
pub async fn user_progress(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let summary = sequence::progress_summary(&state.catalog, state.db.as_ref(), &user_id).await?;
    Ok(Json(ProgressResponse {
        user_id,
        completed: summary.completed,
        completed_count: summary.completed_count,
        total_count: summary.total_count,
        next_in_sequence: summary.next_in_sequence,
        progress_percent: summary.progress_percent,
    }))
}

/// Whether a user may start a given technique.
#[utoipa::path(
    get,
    path = "/users/{user_id}/access/{technique_id}",
    responses(
        (status = 200, description = "Access check result", body = AccessResponse),
        (status = 404, description = "Unknown technique", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("user_id" = String, Path, description = "User ID"),
        ("technique_id" = String, Path, description = "Technique ID")
    )
)]
pub async fn technique_access(
    State(state): State<Arc<AppState>>,
    Path((user_id, technique_id)): Path<(String, String)>,
) -> Result<Json<AccessResponse>, ApiError> {
    if !state.catalog.contains(&technique_id) {
        return Err(ApiError::NotFound(format!(
            "Unknown technique '{technique_id}'"
        )));
    }
    let access = sequence::check_access(
        &state.catalog,
        state.db.as_ref(),
        &user_id,
        &technique_id,
        false,
    )
    .await?;
    Ok(Json(AccessResponse {
        technique_id,
        can_access: access.can_access,
        missing_techniques: access.missing_techniques,
        next_in_sequence: access.next_in_sequence,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn creation_mode_per_capability_and_context() {
        assert_eq!(
            initial_session_mode(false, true),
            SessionMode::ContextGathering
        );
        assert_eq!(initial_session_mode(true, true), SessionMode::Roleplay);
        assert_eq!(initial_session_mode(true, false), SessionMode::CoachChat);
    }

    #[test]
    fn no_required_slots_counts_as_complete_context() {
        // A phase without context slots skips gathering entirely; the
        // technique's capability alone decides where the session starts.
        let context = ContextState::with_prefilled(&[], &BTreeMap::new());
        assert!(context.is_complete);
        assert_eq!(
            initial_session_mode(context.is_complete, false),
            SessionMode::CoachChat
        );
        assert_eq!(
            initial_session_mode(context.is_complete, true),
            SessionMode::Roleplay
        );
    }
}

//! API and Database Models
//!
//! This module defines the core data structures used for both database mapping
//! with `sqlx` and for generating OpenAPI documentation with `utoipa`.

use chrono::{DateTime, Utc};
use dealcoach_core::context::ContextState;
use dealcoach_core::conversation::TurnRole;
use dealcoach_core::evaluation::Quality;
use dealcoach_core::state_machine::{ClientAction, SessionMode};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// A coaching session row. `mode` and turn roles are stored as plain text
/// and parsed through the domain enums on access.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct Session {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub user_id: String,
    pub technique_id: String,
    #[schema(value_type = String, example = "CONTEXT_GATHERING")]
    pub mode: String,
    pub phase: i32,
    /// Serialized `ContextState`.
    #[schema(value_type = Object)]
    pub context: serde_json::Value,
    /// Append-only list of per-turn evaluation events.
    #[schema(value_type = Object)]
    pub events: serde_json::Value,
    /// Technique ids credited so far, in detection order.
    #[schema(value_type = Object)]
    pub used_techniques: serde_json::Value,
    pub total_score: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn mode(&self) -> SessionMode {
        self.mode
            .parse()
            .unwrap_or(SessionMode::ContextGathering)
    }

    pub fn context_state(&self) -> ContextState {
        serde_json::from_value(self.context.clone()).unwrap_or_default()
    }

    pub fn used_techniques(&self) -> Vec<String> {
        serde_json::from_value(self.used_techniques.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<EvaluationEvent> {
        serde_json::from_value(self.events.clone()).unwrap_or_default()
    }
}

/// One message of a session, trainee or model side.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct Turn {
    pub id: i64,
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    #[schema(value_type = String, example = "seller")]
    pub role: String,
    /// The session mode this turn was produced under.
    #[schema(value_type = String, example = "ROLEPLAY")]
    pub mode: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn role(&self) -> TurnRole {
        TurnRole::parse(&self.role).unwrap_or(TurnRole::Customer)
    }

    pub fn mode(&self) -> SessionMode {
        self.mode.parse().unwrap_or(SessionMode::ContextGathering)
    }
}

/// A per-turn scoring event, appended to `Session::events`.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct EvaluationEvent {
    pub applied_technique: Option<String>,
    #[schema(value_type = String, example = "goed")]
    pub quality: Quality,
    pub score_delta: i32,
    #[serde(default)]
    pub feedback_points: Vec<String>,
    #[serde(default)]
    pub mistakes_detected: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateSessionPayload {
    #[schema(example = "user_123")]
    pub user_id: String,
    #[schema(example = "2.1")]
    pub technique_id: String,
    /// Skips the sequence gate; granted by the caller's authorization
    /// layer for expert and demo accounts.
    #[serde(default)]
    pub expert_mode: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct MessagePayload {
    #[schema(example = "Goedemiddag, fijn dat u tijd heeft.")]
    pub message: String,
    #[schema(value_type = Option<String>, example = "start_roleplay")]
    pub action: Option<ClientAction>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ScoreInfo {
    pub delta: i32,
    pub total: i32,
}

/// The response to one processed message.
#[derive(Serialize, ToSchema, Debug)]
pub struct MessageResponse {
    /// The assistant's reply, absent when nothing new was generated.
    pub assistant: Option<String>,
    #[schema(value_type = String, example = "ROLEPLAY")]
    pub mode: SessionMode,
    pub phase: i32,
    pub score: ScoreInfo,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
    /// True when the message was an exact repeat inside the dedup window.
    #[serde(default)]
    pub is_duplicate: bool,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SessionCreatedResponse {
    pub session: Session,
    /// The session's opening assistant line.
    pub opening: String,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct StartRoleplayResponse {
    #[schema(value_type = String, example = "ROLEPLAY")]
    pub mode: SessionMode,
    /// The customer's opening line; absent when roleplay was already running.
    pub opening: Option<String>,
    pub already_started: bool,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct FeedbackResponse {
    pub feedback: String,
    #[schema(value_type = String, example = "COACH_FEEDBACK")]
    pub mode: SessionMode,
    pub total_score: i32,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct AccessResponse {
    pub technique_id: String,
    pub can_access: bool,
    pub missing_techniques: Vec<String>,
    pub next_in_sequence: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ProgressResponse {
    pub user_id: String,
    pub completed: Vec<String>,
    pub completed_count: usize,
    pub total_count: usize,
    pub next_in_sequence: Option<String>,
    pub progress_percent: u8,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

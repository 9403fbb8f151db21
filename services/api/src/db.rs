//! Data Access Layer
//!
//! This module contains all the functions for interacting with the PostgreSQL
//! database. Queries use the runtime `sqlx` API; session mutations are
//! read-modify-write with no explicit locking, so race-sensitive callers
//! re-read state and decide with pure predicates.

use anyhow::Result;
use async_trait::async_trait;
use dealcoach_core::conversation::TurnRole;
use dealcoach_core::sequence::ProgressStore;
use dealcoach_core::state_machine::SessionMode;
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{Session, Turn};

const SESSION_COLUMNS: &str = "id, user_id, technique_id, mode, phase, context, events, \
     used_techniques, total_score, is_active, created_at, updated_at";

/// A partial update of a session's mutable fields. `None` leaves a field
/// untouched.
#[derive(Debug, Default, Clone)]
pub struct SessionPatch {
    pub mode: Option<SessionMode>,
    pub phase: Option<i32>,
    pub context: Option<serde_json::Value>,
    pub events: Option<serde_json::Value>,
    pub used_techniques: Option<serde_json::Value>,
    pub total_score: Option<i32>,
    pub is_active: Option<bool>,
}

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

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Creates a new session in its initial mode.
    pub async fn create_session(
        &self,
        user_id: &str,
        technique_id: &str,
        mode: SessionMode,
        phase: i32,
        context: serde_json::Value,
    ) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "INSERT INTO sessions (user_id, technique_id, mode, phase, context) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(user_id)
        .bind(technique_id)
        .bind(mode.as_str())
        .bind(phase)
        .bind(context)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    /// Retrieves a single session by its ID.
    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Applies a partial update; untouched fields keep their value.
    pub async fn update_session(&self, session_id: Uuid, patch: SessionPatch) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "UPDATE sessions SET \
                mode = COALESCE($2, mode), \
                phase = COALESCE($3, phase), \
                context = COALESCE($4, context), \
                events = COALESCE($5, events), \
                used_techniques = COALESCE($6, used_techniques), \
                total_score = COALESCE($7, total_score), \
                is_active = COALESCE($8, is_active), \
                updated_at = now() \
             WHERE id = $1 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session_id)
        .bind(patch.mode.map(|m| m.as_str()))
        .bind(patch.phase)
        .bind(patch.context)
        .bind(patch.events)
        .bind(patch.used_techniques)
        .bind(patch.total_score)
        .bind(patch.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    /// Appends one turn to a session's transcript.
    pub async fn append_turn(
        &self,
        session_id: Uuid,
        role: TurnRole,
        mode: SessionMode,
        text: &str,
    ) -> Result<Turn> {
        let turn = sqlx::query_as::<_, Turn>(
            "INSERT INTO turns (session_id, role, mode, text) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, session_id, role, mode, text, created_at",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(mode.as_str())
        .bind(text)
        .fetch_one(&self.pool)
        .await?;
        Ok(turn)
    }

    /// Retrieves the full transcript for a session, ordered chronologically.
    pub async fn get_turns(&self, session_id: Uuid) -> Result<Vec<Turn>> {
        let turns = sqlx::query_as::<_, Turn>(
            "SELECT id, session_id, role, mode, text, created_at \
             FROM turns WHERE session_id = $1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(turns)
    }

    /// How often the user has practiced a technique. Zero means the
    /// technique does not count as completed yet.
    pub async fn get_attempt_count(&self, user_id: &str, technique_id: &str) -> Result<u32> {
        let count: Option<(i32,)> = sqlx::query_as(
            "SELECT attempt_count FROM technique_mastery \
             WHERE user_id = $1 AND technique_id = $2",
        )
        .bind(user_id)
        .bind(technique_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.map(|(c,)| c.max(0) as u32).unwrap_or(0))
    }

    /// Records one completed practice attempt.
    pub async fn record_attempt(&self, user_id: &str, technique_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO technique_mastery (user_id, technique_id, attempt_count) \
             VALUES ($1, $2, 1) \
             ON CONFLICT (user_id, technique_id) \
             DO UPDATE SET attempt_count = technique_mastery.attempt_count + 1, \
                           updated_at = now()",
        )
        .bind(user_id)
        .bind(technique_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The user's cross-session selling context (sector, product, ...).
    pub async fn get_user_context(&self, user_id: &str) -> Result<BTreeMap<String, String>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT context FROM user_contexts WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row
            .and_then(|(v,)| serde_json::from_value(v).ok())
            .unwrap_or_default())
    }

    /// Merges freshly gathered slots into the user's stored context.
    pub async fn upsert_user_context(
        &self,
        user_id: &str,
        gathered: &BTreeMap<String, String>,
    ) -> Result<()> {
        let value = serde_json::to_value(gathered)?;
        sqlx::query(
            "INSERT INTO user_contexts (user_id, context) VALUES ($1, $2) \
             ON CONFLICT (user_id) \
             DO UPDATE SET context = user_contexts.context || EXCLUDED.context, \
                           updated_at = now()",
        )
        .bind(user_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for Db {
    async fn attempt_count(&self, user_id: &str, technique_id: &str) -> Result<u32> {
        self.get_attempt_count(user_id, technique_id).await
    }
}

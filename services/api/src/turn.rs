//! Turn orchestration: everything that happens between receiving a trainee
//! message and having an assistant reply persisted.
//!
//! The flow is split in two so the REST handler and the streaming
//! WebSocket path share it: `prepare_turn` resolves dedup, context
//! gathering and mode transitions and either finishes the turn outright
//! or hands back a generation job; `complete_turn` persists the generated
//! reply and runs evaluation for roleplay turns.

use crate::handlers::ApiError;
use crate::models::{EvaluationEvent, Session, Turn};
use crate::prompts;
use crate::state::AppState;
use async_openai::types::ChatCompletionRequestMessage;
use chrono::{DateTime, Utc};
use dealcoach_core::context::{AnswerIssue, ContextStep, validate_answer};
use dealcoach_core::conversation::{ConversationTurn, TurnRole};
use dealcoach_core::evaluation::{EvalContext, advance_phase};
use dealcoach_core::state_machine::{
    ClientAction, SessionMode, TransitionInput, next_mode,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// The result of one fully processed message.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub assistant: Option<String>,
    pub mode: SessionMode,
    pub phase: i32,
    pub score_delta: i32,
    pub total_score: i32,
    pub warnings: Vec<String>,
    pub is_duplicate: bool,
}

impl TurnOutcome {
    fn settled(session: &Session, assistant: Option<String>) -> Self {
        Self {
            assistant,
            mode: session.mode(),
            phase: session.phase,
            score_delta: 0,
            total_score: session.total_score,
            warnings: Vec::new(),
            is_duplicate: false,
        }
    }
}

/// A reply that still has to be generated by the model.
pub struct GenerationJob {
    pub session_id: Uuid,
    pub messages: Vec<ChatCompletionRequestMessage>,
    /// The mode the generated turn will be tagged with.
    pub mode: SessionMode,
    pub seller_message: String,
    /// Roleplay turns get graded after generation.
    pub evaluate: bool,
    /// Replace a failed generation with this text instead of erroring.
    pub fallback: Option<&'static str>,
}

/// Either the turn is already settled, or a model call is still needed.
pub enum TurnPlan {
    Settled(TurnOutcome),
    Generate(GenerationJob),
}

/// Finds the cached assistant reply for an exact repeat of the last
/// seller message inside the dedup window.
pub fn duplicate_reply(
    turns: &[Turn],
    message: &str,
    window: Duration,
    now: DateTime<Utc>,
) -> Option<String> {
    let last_seller_pos = turns
        .iter()
        .rposition(|t| t.role() == TurnRole::Seller)?;
    let last_seller = &turns[last_seller_pos];
    if last_seller.text != message {
        return None;
    }
    let age = now.signed_duration_since(last_seller.created_at);
    if age < chrono::Duration::zero() || age.to_std().ok()? > window {
        return None;
    }
    turns[last_seller_pos + 1..]
        .iter()
        .find(|t| t.role() == TurnRole::Customer)
        .map(|t| t.text.clone())
}

/// Whether the roleplay opening already happened, judged against freshly
/// read state. Used to resolve the ready-to-roleplay race: two racing
/// requests may both try to open the scene, only one may. Either signal
/// counts — a re-read can land between the winner's mode write and its
/// opening insert, and the mode advancing alone already means the opening
/// is owed by someone else.
pub fn roleplay_already_started(mode: SessionMode, turns: &[Turn]) -> bool {
    mode == SessionMode::Roleplay
        || turns
            .iter()
            .any(|t| t.role() == TurnRole::Customer && t.mode() == SessionMode::Roleplay)
}

/// Gate for explicitly starting the roleplay: ended sessions take no
/// further transitions, and only a session that is ready (or already in
/// the scene) may open one.
pub fn check_roleplay_start(session: &Session) -> Result<(), ApiError> {
    if !session.is_active || session.mode() == SessionMode::Ended {
        return Err(ApiError::Conflict(format!(
            "Session has ended (mode {})",
            session.mode()
        )));
    }
    match session.mode() {
        SessionMode::RoleplayReady | SessionMode::Roleplay => Ok(()),
        mode => Err(ApiError::BadRequest(format!(
            "Session is not ready for roleplay (mode {mode})"
        ))),
    }
}

/// Projects stored turns onto the dialogue the model sees. With a mode
/// filter, only turns produced under that mode are included, so coaching
/// chatter never leaks into the roleplay scene.
pub fn conversation_history(turns: &[Turn], mode: Option<SessionMode>) -> Vec<ConversationTurn> {
    turns
        .iter()
        .filter(|t| mode.map(|m| t.mode() == m).unwrap_or(true))
        .map(|t| ConversationTurn {
            role: t.role(),
            text: t.text.clone(),
        })
        .collect()
}

fn reask_text(issue: AnswerIssue, question: &str) -> String {
    let nudge = match issue {
        AnswerIssue::TooShort => "Je antwoord is wat kort.",
        AnswerIssue::TooLong => "Dat is een heel verhaal, kun je het korter samenvatten?",
        AnswerIssue::Gibberish => "Dat antwoord begrijp ik niet helemaal.",
    };
    format!("{nudge} {question}")
}

/// Renders the deterministic debrief from the session's evaluation events.
pub fn render_feedback(events: &[EvaluationEvent], total_score: i32, technique_name: &str) -> String {
    if events.is_empty() {
        return format!(
            "We hebben nog geen beoordeelde beurten voor '{technique_name}'. \
             Speel eerst een rollenspel, dan kan ik je gerichte feedback geven."
        );
    }
    let mut lines = vec![format!(
        "Feedback op je rollenspel rond '{technique_name}' ({} beurten, {} punten totaal):",
        events.len(),
        total_score
    )];
    let applied: Vec<&str> = events
        .iter()
        .filter_map(|e| e.applied_technique.as_deref())
        .collect();
    if !applied.is_empty() {
        lines.push(format!("Herkende technieken: {}.", applied.join(", ")));
    }
    for point in events.iter().flat_map(|e| e.feedback_points.iter()).take(5) {
        lines.push(format!("+ {point}"));
    }
    for mistake in events
        .iter()
        .flat_map(|e| e.mistakes_detected.iter())
        .take(5)
    {
        lines.push(format!("- {mistake}"));
    }
    for warning in events.iter().flat_map(|e| e.warnings.iter()).take(3) {
        lines.push(format!("! {warning}"));
    }
    lines.join("\n")
}

/// Resolves one incoming message up to the point where a model call is
/// needed, if one is needed at all.
#[instrument(skip(state, message), fields(%session_id))]
pub async fn prepare_turn(
    state: &Arc<AppState>,
    session_id: Uuid,
    message: &str,
    action: Option<ClientAction>,
) -> Result<TurnPlan, ApiError> {
    let session = state
        .db
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{session_id}' not found")))?;

    if !session.is_active || session.mode() == SessionMode::Ended {
        return Err(ApiError::Conflict(format!(
            "Session has ended (mode {})",
            session.mode()
        )));
    }

    let turns = state.db.get_turns(session_id).await?;
    let message = message.trim();

    // Exact repeat of the previous message inside the window: hand back
    // the reply we already computed, generate nothing. An explicit retry
    // asks for a fresh reply and skips the guard.
    if !message.is_empty() && action != Some(ClientAction::Retry) {
        if let Some(reply) =
            duplicate_reply(&turns, message, state.config.dedup_window, Utc::now())
        {
            info!("duplicate message inside dedup window, replaying cached reply");
            let mut outcome = TurnOutcome::settled(&session, Some(reply));
            outcome.is_duplicate = true;
            return Ok(TurnPlan::Settled(outcome));
        }
    }

    let current = session.mode();
    if !message.is_empty() {
        state
            .db
            .append_turn(session_id, TurnRole::Seller, current, message)
            .await?;
    }

    // Context gathering consumes the message before any transition.
    let mut context = session.context_state();
    let slots = state.catalog.slots_for_phase(state.catalog.phase_of(&session.technique_id));
    if current == SessionMode::ContextGathering
        && !context.is_complete
        && action != Some(ClientAction::SkipContext)
        && !matches!(action, Some(ClientAction::Stop) | Some(ClientAction::End))
    {
        // An outstanding question means this message is an answer; junk
        // answers get the question again instead of being stored.
        if context.next_slot_index > 0 {
            if let Err(issue) = validate_answer(message) {
                let question = context
                    .outstanding_question(slots)
                    .map(|s| s.question.clone())
                    .unwrap_or_default();
                let text = reask_text(issue, &question);
                state
                    .db
                    .append_turn(session_id, TurnRole::Customer, current, &text)
                    .await?;
                return Ok(TurnPlan::Settled(TurnOutcome::settled(
                    &session,
                    Some(text),
                )));
            }
        }
        let step = context.advance(slots, message);
        let session = state
            .db
            .update_session(
                session_id,
                crate::db::SessionPatch {
                    context: Some(serde_json::to_value(&context).map_err(anyhow::Error::from)?),
                    ..Default::default()
                },
            )
            .await?;
        match step {
            ContextStep::Ask { question, .. } => {
                state
                    .db
                    .append_turn(session_id, TurnRole::Customer, current, &question)
                    .await?;
                return Ok(TurnPlan::Settled(TurnOutcome::settled(
                    &session,
                    Some(question),
                )));
            }
            ContextStep::Complete => {
                // Gathered slots outlive the session.
                state
                    .db
                    .upsert_user_context(&session.user_id, &context.gathered)
                    .await?;
            }
        }
    }

    let roleplay_capable = state.catalog.roleplay_capable(&session.technique_id);
    let transition = next_mode(
        TransitionInput {
            current,
            action,
            roleplay_capable,
            context_complete: context.is_complete,
            message,
        },
        &state.lexicon,
    );

    // Entering COACH_FEEDBACK settles deterministically: announcement
    // plus the rendered debrief, no model call.
    if transition.next == SessionMode::CoachFeedback && current != SessionMode::CoachFeedback {
        let feedback = render_feedback(
            &session.events(),
            session.total_score,
            state.catalog.display_name(&session.technique_id),
        );
        let text = format!(
            "{}\n\n{}",
            dealcoach_core::state_machine::FEEDBACK_ANNOUNCEMENT,
            feedback
        );
        let session = state
            .db
            .update_session(
                session_id,
                crate::db::SessionPatch {
                    mode: Some(SessionMode::CoachFeedback),
                    ..Default::default()
                },
            )
            .await?;
        state
            .db
            .append_turn(
                session_id,
                TurnRole::Customer,
                SessionMode::CoachFeedback,
                &text,
            )
            .await?;
        return Ok(TurnPlan::Settled(TurnOutcome::settled(&session, Some(text))));
    }

    // Entering ROLEPLAY_READY settles with the fixed announcement.
    if transition.next == SessionMode::RoleplayReady && current != SessionMode::RoleplayReady {
        let text = transition
            .announcement
            .unwrap_or(dealcoach_core::state_machine::ROLEPLAY_READY_ANNOUNCEMENT);
        let session = state
            .db
            .update_session(
                session_id,
                crate::db::SessionPatch {
                    mode: Some(SessionMode::RoleplayReady),
                    ..Default::default()
                },
            )
            .await?;
        state
            .db
            .append_turn(
                session_id,
                TurnRole::Customer,
                SessionMode::RoleplayReady,
                text,
            )
            .await?;
        return Ok(TurnPlan::Settled(TurnOutcome::settled(
            &session,
            Some(text.to_string()),
        )));
    }

    // Starting roleplay: re-read and re-check, because a racing request
    // may already have opened the scene. The loser keeps its message but
    // must not produce a second opening line.
    if current == SessionMode::RoleplayReady && transition.next == SessionMode::Roleplay {
        let fresh = state
            .db
            .get_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Session with id '{session_id}' not found")))?;
        let fresh_turns = state.db.get_turns(session_id).await?;
        if roleplay_already_started(fresh.mode(), &fresh_turns) {
            info!("roleplay already opened by a concurrent request, skipping opening");
            return Ok(TurnPlan::Settled(TurnOutcome::settled(&fresh, None)));
        }
        let session = state
            .db
            .update_session(
                session_id,
                crate::db::SessionPatch {
                    mode: Some(SessionMode::Roleplay),
                    ..Default::default()
                },
            )
            .await?;
        let system = prompts::roleplay_opening_system(
            &session.technique_id,
            state.catalog.display_name(&session.technique_id),
            &context.gathered,
        );
        return Ok(TurnPlan::Generate(GenerationJob {
            session_id,
            messages: prompts::build_messages(system, &[]).map_err(anyhow::Error::from)?,
            mode: SessionMode::Roleplay,
            seller_message: message.to_string(),
            evaluate: false,
            fallback: Some(prompts::ROLEPLAY_OPENING_FALLBACK),
        }));
    }

    if message.is_empty() {
        // Action-only request that did not change anything visible.
        return Ok(TurnPlan::Settled(TurnOutcome::settled(&session, None)));
    }

    let turns = state.db.get_turns(session_id).await?;
    let technique_name = state.catalog.display_name(&session.technique_id);
    let job = match transition.next {
        SessionMode::Roleplay => {
            let system = prompts::roleplay_system(
                &session.technique_id,
                technique_name,
                session.phase.clamp(1, 4) as u8,
                &context.gathered,
            );
            let history = conversation_history(&turns, Some(SessionMode::Roleplay));
            GenerationJob {
                session_id,
                messages: prompts::build_messages(system, &history)
                    .map_err(anyhow::Error::from)?,
                mode: SessionMode::Roleplay,
                seller_message: message.to_string(),
                evaluate: true,
                fallback: None,
            }
        }
        SessionMode::CoachFeedback => {
            let feedback = render_feedback(&session.events(), session.total_score, technique_name);
            let system = prompts::feedback_chat_system(technique_name, &feedback);
            let history = conversation_history(&turns, Some(SessionMode::CoachFeedback));
            GenerationJob {
                session_id,
                messages: prompts::build_messages(system, &history)
                    .map_err(anyhow::Error::from)?,
                mode: SessionMode::CoachFeedback,
                seller_message: message.to_string(),
                evaluate: false,
                fallback: None,
            }
        }
        _ => {
            let system =
                prompts::coach_system(&session.technique_id, technique_name, &context.gathered);
            let history = conversation_history(&turns, None);
            GenerationJob {
                session_id,
                messages: prompts::build_messages(system, &history)
                    .map_err(anyhow::Error::from)?,
                mode: SessionMode::CoachChat,
                seller_message: message.to_string(),
                evaluate: false,
                fallback: None,
            }
        }
    };
    if transition.next != current {
        state
            .db
            .update_session(
                session_id,
                crate::db::SessionPatch {
                    mode: Some(transition.next),
                    ..Default::default()
                },
            )
            .await?;
    }
    Ok(TurnPlan::Generate(job))
}

/// Persists a generated reply and, for roleplay turns, grades the seller's
/// message and folds the verdict into the session.
pub async fn complete_turn(
    state: &Arc<AppState>,
    job: &GenerationJob,
    assistant_text: &str,
) -> Result<TurnOutcome, ApiError> {
    state
        .db
        .append_turn(job.session_id, TurnRole::Customer, job.mode, assistant_text)
        .await?;

    let session = state
        .db
        .get_session(job.session_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Session with id '{}' not found", job.session_id))
        })?;

    if !job.evaluate {
        return Ok(TurnOutcome::settled(&session, Some(assistant_text.to_string())));
    }

    let turns = state.db.get_turns(job.session_id).await?;
    let history = conversation_history(&turns, Some(SessionMode::Roleplay));
    let used = session.used_techniques();
    let ctx = EvalContext {
        phase: session.phase.clamp(1, 4) as u8,
        technique_id: session.technique_id.clone(),
        technique_name: state
            .catalog
            .display_name(&session.technique_id)
            .to_string(),
        used_techniques: used.clone(),
    };
    let verdict = state
        .aggregator
        .assess(&job.seller_message, &history, &ctx)
        .await;

    let evaluation = &verdict.evaluation;
    let mut events = session.events();
    events.push(EvaluationEvent {
        applied_technique: evaluation.applied_technique.clone(),
        quality: evaluation.quality,
        score_delta: evaluation.score_delta,
        feedback_points: evaluation.feedback_points.clone(),
        mistakes_detected: evaluation.mistakes_detected.clone(),
        warnings: verdict.warnings.clone(),
    });
    let mut used = used;
    if let Some(applied) = evaluation.applied_technique.clone() {
        if !used.contains(&applied) {
            used.push(applied);
        }
    }
    let phase = advance_phase(
        session.phase.clamp(1, 4) as u8,
        evaluation.applied_technique.as_deref(),
    );
    let total_score = session.total_score + evaluation.score_delta;

    let session = state
        .db
        .update_session(
            job.session_id,
            crate::db::SessionPatch {
                phase: Some(phase as i32),
                events: Some(serde_json::to_value(&events).map_err(anyhow::Error::from)?),
                used_techniques: Some(serde_json::to_value(&used).map_err(anyhow::Error::from)?),
                total_score: Some(total_score),
                ..Default::default()
            },
        )
        .await?;

    Ok(TurnOutcome {
        assistant: Some(assistant_text.to_string()),
        mode: session.mode(),
        phase: session.phase,
        score_delta: evaluation.score_delta,
        total_score: session.total_score,
        warnings: verdict.warnings,
        is_duplicate: false,
    })
}

/// Non-streaming path: prepare, generate if needed, complete.
pub async fn handle_message(
    state: &Arc<AppState>,
    session_id: Uuid,
    message: &str,
    action: Option<ClientAction>,
) -> Result<TurnOutcome, ApiError> {
    match prepare_turn(state, session_id, message, action).await? {
        TurnPlan::Settled(outcome) => Ok(outcome),
        TurnPlan::Generate(job) => {
            let generated = tokio::time::timeout(
                state.config.turn_timeout,
                state.generator.complete(job.messages.clone()),
            )
            .await;
            let text = match generated {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => match job.fallback {
                    Some(fallback) => {
                        tracing::warn!(error = ?e, "generation failed, using static fallback");
                        fallback.to_string()
                    }
                    None => return Err(ApiError::InternalServerError(e)),
                },
                Err(_) => match job.fallback {
                    Some(fallback) => {
                        tracing::warn!("generation timed out, using static fallback");
                        fallback.to_string()
                    }
                    None => {
                        return Err(ApiError::InternalServerError(anyhow::anyhow!(
                            "reply generation timed out"
                        )));
                    }
                },
            };
            complete_turn(state, &job, &text).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn turn(id: i64, role: &str, mode: &str, text: &str, age_secs: i64) -> Turn {
        Turn {
            id,
            session_id: Uuid::nil(),
            role: role.to_string(),
            mode: mode.to_string(),
            text: text.to_string(),
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[test]
    fn duplicate_inside_window_returns_cached_reply() {
        let turns = vec![
            turn(1, "seller", "ROLEPLAY", "mag ik u iets vragen?", 10),
            turn(2, "customer", "ROLEPLAY", "Natuurlijk, ga uw gang.", 9),
        ];
        let reply = duplicate_reply(
            &turns,
            "mag ik u iets vragen?",
            Duration::from_secs(30),
            Utc::now(),
        );
        assert_eq!(reply.as_deref(), Some("Natuurlijk, ga uw gang."));
    }

    #[test]
    fn duplicate_outside_window_is_a_new_turn() {
        let turns = vec![
            turn(1, "seller", "ROLEPLAY", "mag ik u iets vragen?", 45),
            turn(2, "customer", "ROLEPLAY", "Natuurlijk.", 44),
        ];
        let reply = duplicate_reply(
            &turns,
            "mag ik u iets vragen?",
            Duration::from_secs(30),
            Utc::now(),
        );
        assert!(reply.is_none());
    }

    #[test]
    fn different_text_is_never_a_duplicate() {
        let turns = vec![
            turn(1, "seller", "ROLEPLAY", "eerste bericht", 1),
            turn(2, "customer", "ROLEPLAY", "antwoord", 1),
        ];
        assert!(duplicate_reply(&turns, "tweede bericht", Duration::from_secs(30), Utc::now()).is_none());
    }

    #[test]
    fn duplicate_without_cached_reply_regenerates() {
        let turns = vec![turn(1, "seller", "ROLEPLAY", "hallo", 5)];
        assert!(duplicate_reply(&turns, "hallo", Duration::from_secs(30), Utc::now()).is_none());
    }

    #[test]
    fn race_predicate_skips_opening_on_either_signal() {
        let opened = vec![turn(1, "customer", "ROLEPLAY", "Goedemiddag.", 1)];
        assert!(roleplay_already_started(SessionMode::Roleplay, &opened));
        // Mode advanced alone: the winner wrote the mode but its opening
        // insert has not landed yet. The loser must still back off.
        assert!(roleplay_already_started(SessionMode::Roleplay, &[]));
        // Opening turn alone: the winner inserted the line but the mode
        // read predates its mode write.
        assert!(roleplay_already_started(SessionMode::RoleplayReady, &opened));
        assert!(!roleplay_already_started(SessionMode::RoleplayReady, &[]));
    }

    #[test]
    fn roleplay_history_excludes_coaching_turns() {
        let turns = vec![
            turn(1, "customer", "CONTEXT_GATHERING", "In welke sector verkoop je?", 30),
            turn(2, "seller", "CONTEXT_GATHERING", "retail", 29),
            turn(3, "customer", "ROLEPLAY", "Goedemiddag.", 10),
            turn(4, "seller", "ROLEPLAY", "Hallo!", 9),
        ];
        let history = conversation_history(&turns, Some(SessionMode::Roleplay));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "Goedemiddag.");
    }

    #[test]
    fn feedback_rendering_summarizes_events() {
        let events = vec![
            EvaluationEvent {
                applied_technique: Some("2.1".to_string()),
                quality: dealcoach_core::evaluation::Quality::Goed,
                score_delta: 10,
                feedback_points: vec!["sterke open vraag".to_string()],
                mistakes_detected: vec![],
                warnings: vec![],
            },
            EvaluationEvent {
                applied_technique: Some("2.3".to_string()),
                quality: dealcoach_core::evaluation::Quality::Bijna,
                score_delta: 5,
                feedback_points: vec![],
                mistakes_detected: vec!["te snel naar de prijs".to_string()],
                warnings: vec![],
            },
        ];
        let feedback = render_feedback(&events, 15, "Vraagtechnieken");
        assert!(feedback.contains("2 beurten"));
        assert!(feedback.contains("15 punten"));
        assert!(feedback.contains("2.1, 2.3"));
        assert!(feedback.contains("+ sterke open vraag"));
        assert!(feedback.contains("- te snel naar de prijs"));
    }

    #[test]
    fn feedback_without_events_invites_a_roleplay() {
        let feedback = render_feedback(&[], 0, "Begroeting");
        assert!(feedback.contains("geen beoordeelde beurten"));
    }

    fn session(mode: &str, is_active: bool) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            technique_id: "2.1".to_string(),
            mode: mode.to_string(),
            phase: 2,
            context: json!({}),
            events: json!([]),
            used_techniques: json!([]),
            total_score: 25,
            is_active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn roleplay_start_gate_rejects_unready_sessions() {
        assert!(check_roleplay_start(&session("ROLEPLAY_READY", true)).is_ok());
        assert!(check_roleplay_start(&session("ROLEPLAY", true)).is_ok());
        assert!(matches!(
            check_roleplay_start(&session("CONTEXT_GATHERING", true)),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            check_roleplay_start(&session("COACH_CHAT", true)),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            check_roleplay_start(&session("ENDED", false)),
            Err(ApiError::Conflict(_))
        ));
        // Deactivated but mode not yet flipped: still a conflict.
        assert!(matches!(
            check_roleplay_start(&session("ROLEPLAY_READY", false)),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn settled_outcome_reflects_session_row() {
        let outcome = TurnOutcome::settled(&session("COACH_CHAT", true), None);
        assert_eq!(outcome.mode, SessionMode::CoachChat);
        assert_eq!(outcome.total_score, 25);
        assert_eq!(outcome.score_delta, 0);
    }
}

//! Manages the WebSocket connection lifecycle for a coaching session.

use super::{
    pipeline::stream_reply,
    protocol::{ClientMessage, ServerMessage},
    tts::{ElevenLabsSpeech, NoopSpeech, SpeechChannel},
};
use crate::{
    state::AppState,
    turn::{TurnPlan, complete_turn, prepare_turn},
};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use dealcoach_core::state_machine::ClientAction;
use futures_util::{SinkExt, StreamExt, stream::SplitStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;

/// How long we wait after the last text for trailing audio to arrive.
const SPEECH_DRAIN_GRACE: Duration = Duration::from_secs(3);

/// Everything one connection owns. Created by the handler task after a
/// successful init and dropped with it on disconnect; there is no global
/// registry of connections.
struct ConnectionContext {
    state: Arc<AppState>,
    session_id: Uuid,
    events: mpsc::Sender<ServerMessage>,
    /// Set on disconnect; the pipeline checks it between chunks.
    cancelled: Arc<AtomicBool>,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// The first client message must be `init` with a session id; afterwards
/// each `user_message` is processed as one streamed turn.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection. Awaiting initialization...");
    let (mut socket_tx, mut socket_rx) = socket.split();

    // One forwarder task owns the sink; the pipeline, the speech reader
    // and the session loop all publish through the same channel.
    let (events, mut events_rx) = mpsc::channel::<ServerMessage>(256);
    let forwarder = tokio::spawn(async move {
        while let Some(msg) = events_rx.recv().await {
            let serialized = match serde_json::to_string(&msg) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = ?e, "failed to serialize server message");
                    continue;
                }
            };
            if socket_tx.send(Message::Text(serialized.into())).await.is_err() {
                break;
            }
        }
    });

    let session_id = match await_init(&mut socket_rx, &state, &events).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            forwarder.abort();
            return;
        }
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = events
                .send(ServerMessage::Error {
                    message: e.to_string(),
                })
                .await;
            // Give the forwarder a moment to deliver the error.
            drop(events);
            let _ = forwarder.await;
            return;
        }
    };
    tracing::Span::current().record("session_id", session_id.to_string());

    let ctx = ConnectionContext {
        state: state.clone(),
        session_id,
        events,
        cancelled: Arc::new(AtomicBool::new(false)),
    };

    let session_span = tracing::info_span!("session_runtime", %session_id);
    run_session(ctx, socket_rx).instrument(session_span).await;
    forwarder.abort();
    info!("WebSocket connection closed.");
}

/// Reads the `init` message and verifies the session exists.
async fn await_init(
    socket_rx: &mut SplitStream<WebSocket>,
    state: &Arc<AppState>,
    events: &mpsc::Sender<ServerMessage>,
) -> anyhow::Result<Option<Uuid>> {
    let text = loop {
        match socket_rx.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Close(_))) | None => {
                info!("Client disconnected before sending init message.");
                return Ok(None);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    };
    let msg: ClientMessage = serde_json::from_str(&text)?;
    let ClientMessage::Init { session_id } = msg else {
        anyhow::bail!("First message must be `init`");
    };
    let session = state
        .db
        .get_session(session_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Session with id '{session_id}' not found"))?;
    events
        .send(ServerMessage::Initialized {
            session_id,
            mode: session.mode(),
        })
        .await?;
    Ok(Some(session_id))
}

/// The main event loop: one turn at a time, watching for disconnect while
/// a turn is in flight so the pipeline can stop between chunks.
async fn run_session(ctx: ConnectionContext, mut socket_rx: SplitStream<WebSocket>) {
    loop {
        let frame = match socket_rx.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(error = ?e, "error receiving from client WebSocket");
                break;
            }
            None => break,
        };
        let (text, action) = match frame {
            Message::Text(raw) => match serde_json::from_str::<ClientMessage>(&raw) {
                Ok(ClientMessage::UserMessage { text, action }) => (text, action),
                Ok(ClientMessage::Init { .. }) => {
                    warn!("Ignoring repeated init message.");
                    continue;
                }
                Err(e) => {
                    let _ = ctx
                        .events
                        .send(ServerMessage::Error {
                            message: format!("Unparseable message: {e}"),
                        })
                        .await;
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        ctx.cancelled.store(false, Ordering::Relaxed);
        let turn = process_streamed_turn(&ctx, text, action);
        tokio::pin!(turn);
        let mut disconnected = false;
        loop {
            if disconnected {
                (&mut turn).await;
                break;
            }
            tokio::select! {
                _ = &mut turn => break,
                frame = socket_rx.next() => {
                    match frame {
                        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {
                            ctx.cancelled.store(true, Ordering::Relaxed);
                            disconnected = true;
                        }
                        // Messages arriving mid-turn are dropped; one turn
                        // at a time per connection.
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
        if disconnected {
            break;
        }
    }
    info!("Session loop finished.");
}

/// Opens the speech channel for one turn, before any token exists.
async fn open_speech(ctx: &ConnectionContext) -> Box<dyn SpeechChannel> {
    let config = &ctx.state.config;
    let Some(api_key) = config.elevenlabs_api_key.as_deref() else {
        return Box::new(NoopSpeech);
    };
    match ElevenLabsSpeech::connect(api_key, &config.elevenlabs_voice_id, ctx.events.clone()).await
    {
        Ok(speech) => Box::new(speech),
        Err(e) => {
            // Text streaming continues without audio rather than failing
            // the turn.
            warn!(error = ?e, "speech synthesizer unavailable for this turn");
            Box::new(NoopSpeech)
        }
    }
}

/// Processes one trainee message as a streamed turn.
async fn process_streamed_turn(
    ctx: &ConnectionContext,
    text: String,
    action: Option<ClientAction>,
) {
    let _ = ctx.events.send(ServerMessage::ProcessingStart).await;

    let plan = match prepare_turn(&ctx.state, ctx.session_id, &text, action).await {
        Ok(plan) => plan,
        Err(e) => {
            let _ = ctx
                .events
                .send(ServerMessage::Error {
                    message: e.public_message(),
                })
                .await;
            return;
        }
    };

    let outcome = match plan {
        TurnPlan::Settled(outcome) => {
            // Deterministic replies still stream out as one delta plus
            // synthesized speech, so the client handles them uniformly.
            if let Some(reply) = &outcome.assistant {
                let _ = ctx
                    .events
                    .send(ServerMessage::TextDelta {
                        text: reply.clone(),
                    })
                    .await;
                let mut speech = open_speech(ctx).await;
                if speak(&mut *speech, reply).await.is_ok() {
                    let _ = speech.drain(SPEECH_DRAIN_GRACE).await;
                }
            }
            outcome
        }
        TurnPlan::Generate(job) => {
            let mut speech = open_speech(ctx).await;
            let streamed = stream_reply(
                &ctx.state.generator,
                job.messages.clone(),
                &mut *speech,
                &ctx.events,
                &ctx.cancelled,
                ctx.state.config.turn_timeout,
            )
            .await;
            match streamed {
                Ok(Some(reply)) => {
                    let _ = speech.drain(SPEECH_DRAIN_GRACE).await;
                    match complete_turn(&ctx.state, &job, &reply).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            let _ = ctx
                                .events
                                .send(ServerMessage::Error {
                                    message: e.public_message(),
                                })
                                .await;
                            return;
                        }
                    }
                }
                Ok(None) => {
                    info!("turn cancelled by client disconnect");
                    return;
                }
                Err(e) => match job.fallback {
                    // Openings must happen; a static line replaces a failed
                    // generation.
                    Some(fallback) => {
                        warn!(error = ?e, "generation failed, streaming static fallback");
                        let _ = ctx
                            .events
                            .send(ServerMessage::TextDelta {
                                text: fallback.to_string(),
                            })
                            .await;
                        if speak(&mut *speech, fallback).await.is_ok() {
                            let _ = speech.drain(SPEECH_DRAIN_GRACE).await;
                        }
                        match complete_turn(&ctx.state, &job, fallback).await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                let _ = ctx
                                    .events
                                    .send(ServerMessage::Error {
                                        message: e.public_message(),
                                    })
                                    .await;
                                return;
                            }
                        }
                    }
                    None => {
                        // Timeout or stream failure: nothing is committed,
                        // the client hears about it on the same channel.
                        warn!(error = ?e, "streamed turn failed");
                        let _ = ctx
                            .events
                            .send(ServerMessage::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                },
            }
        }
    };

    let _ = ctx
        .events
        .send(ServerMessage::Done {
            assistant: outcome.assistant,
            mode: outcome.mode,
            phase: outcome.phase,
            score_delta: outcome.score_delta,
            total_score: outcome.total_score,
            warnings: outcome.warnings,
            is_duplicate: outcome.is_duplicate,
        })
        .await;
}

async fn speak(speech: &mut dyn SpeechChannel, text: &str) -> anyhow::Result<()> {
    speech.send_text(text, true).await?;
    speech.finish().await
}

//! Duplex speech synthesis over the ElevenLabs `stream-input` WebSocket.
//!
//! The channel is opened before the first model token exists so synthesis
//! can start the moment prose arrives. Text goes out as JSON frames with
//! an optional `flush`; audio comes back base64-encoded and is forwarded
//! to the client as-is.

use super::protocol::ServerMessage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Chunk sizes the synthesizer may buffer before producing audio; small
/// leading chunks keep time-to-first-audio low.
const CHUNK_LENGTH_SCHEDULE: [u32; 5] = [50, 90, 120, 150, 200];

/// One synthesis session. Text in, audio out (via the connection's event
/// channel). Implementations must tolerate `send_text("", true)`.
#[async_trait]
pub trait SpeechChannel: Send {
    async fn send_text(&mut self, text: &str, flush: bool) -> Result<()>;
    /// Ends the synthesis session; remaining audio and the completion
    /// event still arrive afterwards.
    async fn finish(&mut self) -> Result<()>;
    /// Waits (bounded) for the synthesizer to deliver its trailing audio
    /// and the completion event.
    async fn drain(&mut self, timeout: Duration) -> Result<()>;
}

/// Used when no synthesizer is configured: the turn streams text only.
pub struct NoopSpeech;

#[async_trait]
impl SpeechChannel for NoopSpeech {
    async fn send_text(&mut self, _text: &str, _flush: bool) -> Result<()> {
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    async fn drain(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

pub struct ElevenLabsSpeech {
    sink: WsSink,
    reader: Option<JoinHandle<()>>,
}

impl ElevenLabsSpeech {
    /// Opens the synthesis socket and starts forwarding audio frames to
    /// `events`. Connection setup is bounded so a slow synthesizer cannot
    /// stall the whole turn.
    pub async fn connect(
        api_key: &str,
        voice_id: &str,
        events: mpsc::Sender<ServerMessage>,
    ) -> Result<Self> {
        let url = format!(
            "wss://api.elevenlabs.io/v1/text-to-speech/{voice_id}/stream-input\
             ?model_id=eleven_flash_v2_5&output_format=pcm_16000"
        );
        let (socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .context("speech synthesizer connection timed out")?
            .context("failed to connect to speech synthesizer")?;
        let (mut sink, mut source) = socket.split();

        // Voice settings and the chunk schedule must be the first frame.
        let init = json!({
            "text": " ",
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.8,
                "speed": 1.0,
            },
            "generation_config": {
                "chunk_length_schedule": CHUNK_LENGTH_SCHEDULE,
            },
            "xi_api_key": api_key,
        });
        sink.send(WsMessage::Text(init.to_string().into())).await?;

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let frame = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let value: serde_json::Value = match serde_json::from_str(frame.as_str()) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = ?e, "unparseable frame from speech synthesizer");
                        continue;
                    }
                };
                if let Some(audio) = value.get("audio").and_then(|a| a.as_str()) {
                    if !audio.is_empty()
                        && events
                            .send(ServerMessage::AudioChunk {
                                data: audio.to_string(),
                            })
                            .await
                            .is_err()
                    {
                        break;
                    }
                }
                if value
                    .get("isFinal")
                    .and_then(|f| f.as_bool())
                    .unwrap_or(false)
                {
                    let _ = events.send(ServerMessage::AudioComplete).await;
                    break;
                }
            }
            debug!("speech synthesizer reader finished");
        });

        Ok(Self {
            sink,
            reader: Some(reader),
        })
    }
}

#[async_trait]
impl SpeechChannel for ElevenLabsSpeech {
    async fn send_text(&mut self, text: &str, flush: bool) -> Result<()> {
        if text.is_empty() && !flush {
            return Ok(());
        }
        let frame = if flush {
            json!({"text": text, "flush": true})
        } else {
            // Trailing space: the synthesizer treats it as a word boundary.
            json!({"text": format!("{text} ")})
        };
        self.sink
            .send(WsMessage::Text(frame.to_string().into()))
            .await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        // An empty text frame closes the synthesis session.
        self.sink
            .send(WsMessage::Text(json!({"text": ""}).to_string().into()))
            .await?;
        Ok(())
    }

    async fn drain(&mut self, timeout: Duration) -> Result<()> {
        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(timeout, &mut reader).await.is_err() {
                warn!("speech synthesizer did not finish in time");
                reader.abort();
            }
        }
        Ok(())
    }
}

impl Drop for ElevenLabsSpeech {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

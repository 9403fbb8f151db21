//! The low-latency text→speech pipeline for one streamed turn.
//!
//! Tokens flow through the inline-data filter and fan out two ways the
//! moment they arrive: prose goes to the client as `text_delta` events,
//! and to the speech channel in synthesis-friendly chunks. The whole turn
//! is bounded by a wall-clock timeout; a client disconnect is observed
//! between chunks through a cooperative flag.

use super::filter::InlineDataFilter;
use super::protocol::ServerMessage;
use super::tts::SpeechChannel;
use anyhow::{Result, anyhow};
use async_openai::types::ChatCompletionRequestMessage;
use dealcoach_core::generator::TextGenerator;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Flush to the synthesizer once this much prose is buffered.
const SPEECH_CHUNK_CHARS: usize = 50;

/// Buffers prose and decides when a chunk is worth synthesizing: at the
/// size threshold or on sentence-ending punctuation.
#[derive(Debug, Default)]
pub struct SpeechChunker {
    buf: String,
}

impl SpeechChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds prose; returns a chunk when one should be flushed.
    pub fn push(&mut self, prose: &str) -> Option<String> {
        self.buf.push_str(prose);
        let ends_sentence = prose.chars().any(|c| matches!(c, '.' | '!' | '?'));
        if self.buf.len() >= SPEECH_CHUNK_CHARS || ends_sentence {
            return self.take();
        }
        None
    }

    /// Whatever is left at stream end.
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }
}

/// Streams one reply. Returns the full prose text, or `None` when the
/// client disconnected mid-turn. Expiry of `timeout` is an error; the
/// caller reports it on the event channel and commits nothing.
pub async fn stream_reply(
    generator: &Arc<dyn TextGenerator>,
    messages: Vec<ChatCompletionRequestMessage>,
    speech: &mut dyn SpeechChannel,
    events: &mpsc::Sender<ServerMessage>,
    cancelled: &AtomicBool,
    timeout: Duration,
) -> Result<Option<String>> {
    let run = async {
        let mut stream = generator.stream(messages).await?;
        let mut filter = InlineDataFilter::new();
        let mut chunker = SpeechChunker::new();
        let mut prose_full = String::new();

        while let Some(token) = stream.next().await {
            if cancelled.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let token = token?;
            let prose = filter.push(&token);
            if prose.is_empty() {
                continue;
            }
            prose_full.push_str(&prose);
            // A lagging client must not stall synthesis; losing a delta is
            // recoverable, losing lip-sync latency is not.
            let _ = events
                .send(ServerMessage::TextDelta {
                    text: prose.clone(),
                })
                .await;
            if let Some(chunk) = chunker.push(&prose) {
                speech.send_text(&chunk, false).await?;
            }
        }

        let tail = filter.finish();
        if !tail.is_empty() {
            prose_full.push_str(&tail);
            let _ = events
                .send(ServerMessage::TextDelta { text: tail.clone() })
                .await;
            if let Some(chunk) = chunker.push(&tail) {
                speech.send_text(&chunk, false).await?;
            }
        }
        if cancelled.load(Ordering::Relaxed) {
            return Ok(None);
        }
        // The final chunk carries the flush so trailing audio is emitted.
        match chunker.finish() {
            Some(rest) => speech.send_text(&rest, true).await?,
            None => speech.send_text("", true).await?,
        }
        speech.finish().await?;
        Ok(Some(prose_full))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("turn timed out after {}ms", timeout.as_millis())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dealcoach_core::generator::TokenStream;

    struct FakeGenerator {
        tokens: Vec<String>,
        hang: bool,
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn complete(&self, _m: Vec<ChatCompletionRequestMessage>) -> Result<String> {
            Ok(self.tokens.join(""))
        }

        async fn stream(&self, _m: Vec<ChatCompletionRequestMessage>) -> Result<TokenStream> {
            if self.hang {
                return Ok(Box::pin(futures::stream::pending()));
            }
            let tokens: Vec<Result<String, async_openai::error::OpenAIError>> =
                self.tokens.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures::stream::iter(tokens)))
        }
    }

    #[derive(Default)]
    struct RecordingSpeech {
        sent: Vec<(String, bool)>,
        finished: bool,
    }

    #[async_trait]
    impl SpeechChannel for RecordingSpeech {
        async fn send_text(&mut self, text: &str, flush: bool) -> Result<()> {
            self.sent.push((text.to_string(), flush));
            Ok(())
        }

        async fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }

        async fn drain(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    fn generator(tokens: &[&str]) -> Arc<dyn TextGenerator> {
        Arc::new(FakeGenerator {
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            hang: false,
        })
    }

    fn drain_events(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn streams_text_and_flushes_speech() {
        let generator = generator(&["Goedemiddag", ", waar gaat", " het over?", " Vertel."]);
        let mut speech = RecordingSpeech::default();
        let (tx, mut rx) = mpsc::channel(64);
        let cancelled = AtomicBool::new(false);

        let result = stream_reply(
            &generator,
            vec![],
            &mut speech,
            &tx,
            &cancelled,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(
            result.as_deref(),
            Some("Goedemiddag, waar gaat het over? Vertel.")
        );
        // Sentence punctuation triggered intermediate flushes and the last
        // chunk carried the flush flag.
        assert!(!speech.sent.is_empty());
        assert!(speech.sent.last().unwrap().1);
        assert!(speech.finished);
        let full: String = speech.sent.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(full, "Goedemiddag, waar gaat het over? Vertel.");

        let deltas: Vec<String> = drain_events(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::TextDelta { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(deltas.join(""), "Goedemiddag, waar gaat het over? Vertel.");
    }

    #[tokio::test]
    async fn machine_data_blocks_never_reach_client_or_speech() {
        let generator = generator(&[
            "Prima verhaal. ``",
            "`json{\"score\":10}``",
            "` Gaat u verder.",
        ]);
        let mut speech = RecordingSpeech::default();
        let (tx, mut rx) = mpsc::channel(64);
        let cancelled = AtomicBool::new(false);

        let result = stream_reply(
            &generator,
            vec![],
            &mut speech,
            &tx,
            &cancelled,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let text = result.unwrap();
        assert!(!text.contains("json"));
        assert!(!text.contains("score"));
        for (sent, _) in &speech.sent {
            assert!(!sent.contains("score"));
        }
        for msg in drain_events(&mut rx) {
            if let ServerMessage::TextDelta { text } = msg {
                assert!(!text.contains("score"));
            }
        }
    }

    #[tokio::test]
    async fn timeout_aborts_the_turn() {
        let generator: Arc<dyn TextGenerator> = Arc::new(FakeGenerator {
            tokens: vec![],
            hang: true,
        });
        let mut speech = RecordingSpeech::default();
        let (tx, _rx) = mpsc::channel(64);
        let cancelled = AtomicBool::new(false);

        let err = stream_reply(
            &generator,
            vec![],
            &mut speech,
            &tx,
            &cancelled,
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(!speech.finished);
    }

    #[tokio::test]
    async fn cancellation_stops_between_chunks() {
        let generator = generator(&["een", "twee", "drie"]);
        let mut speech = RecordingSpeech::default();
        let (tx, _rx) = mpsc::channel(64);
        let cancelled = AtomicBool::new(true);

        let result = stream_reply(
            &generator,
            vec![],
            &mut speech,
            &tx,
            &cancelled,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(result.is_none());
        assert!(speech.sent.is_empty());
        assert!(!speech.finished);
    }

    #[test]
    fn chunker_flushes_at_threshold_or_punctuation() {
        let mut chunker = SpeechChunker::new();
        assert!(chunker.push("korte tekst zonder einde").is_none());
        let chunk = chunker.push(" en nog wat.").unwrap();
        assert_eq!(chunk, "korte tekst zonder einde en nog wat.");

        let mut chunker = SpeechChunker::new();
        let long = "a".repeat(SPEECH_CHUNK_CHARS);
        assert!(chunker.push(&long).is_some());
    }

    #[test]
    fn chunker_finish_returns_remainder_once() {
        let mut chunker = SpeechChunker::new();
        chunker.push("rest");
        assert_eq!(chunker.finish().as_deref(), Some("rest"));
        assert!(chunker.finish().is_none());
    }
}

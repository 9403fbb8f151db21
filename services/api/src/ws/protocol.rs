//! Defines the WebSocket message protocol between the browser client and the API server.

use dealcoach_core::state_machine::{ClientAction, SessionMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Attaches this connection to a session. Must be the first message.
    #[serde(rename = "init")]
    Init { session_id: Uuid },
    /// A trainee message, optionally carrying an explicit action.
    #[serde(rename = "user_message")]
    UserMessage {
        text: String,
        action: Option<ClientAction>,
    },
}

/// Messages sent from the server to the client (browser). Errors travel
/// on this same channel; there is no side channel.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the connection is attached to the session.
    Initialized {
        session_id: Uuid,
        #[serde(with = "mode_as_str")]
        mode: SessionMode,
    },
    /// The turn is being processed; deltas will follow.
    ProcessingStart,
    /// A chunk of prose as it streams out of the model.
    TextDelta { text: String },
    /// A chunk of synthesized speech (base64 PCM).
    AudioChunk { data: String },
    /// The synthesizer has emitted all audio for this turn.
    AudioComplete,
    /// The turn is fully processed.
    Done {
        assistant: Option<String>,
        #[serde(with = "mode_as_str")]
        mode: SessionMode,
        phase: i32,
        score_delta: i32,
        total_score: i32,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
        is_duplicate: bool,
    },
    /// Reports an error to the client.
    Error { message: String },
}

mod mode_as_str {
    use dealcoach_core::state_machine::SessionMode;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(mode: &SessionMode, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(mode.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_message_parses() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"init","session_id":"{id}"}}"#);
        let msg: ClientMessage = serde_json::from_str(&raw).unwrap();
        assert!(matches!(msg, ClientMessage::Init { session_id } if session_id == id));
    }

    #[test]
    fn user_message_action_is_optional() {
        let raw = r#"{"type":"user_message","text":"hallo"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientMessage::UserMessage { action: None, .. }));

        let raw = r#"{"type":"user_message","text":"","action":"stop"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::UserMessage {
                action: Some(ClientAction::Stop),
                ..
            }
        ));
    }

    #[test]
    fn server_messages_tag_and_snake_case() {
        let msg = ServerMessage::TextDelta {
            text: "Goede".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"text_delta","text":"Goede"}"#);

        let msg = ServerMessage::Done {
            assistant: Some("Goedemiddag.".to_string()),
            mode: SessionMode::Roleplay,
            phase: 2,
            score_delta: 10,
            total_score: 25,
            warnings: vec![],
            is_duplicate: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""mode":"ROLEPLAY""#));
        assert!(!json.contains("warnings"));
    }
}

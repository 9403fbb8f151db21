use serde::{Deserialize, Serialize};

/// Who produced a conversation turn.
///
/// The trainee is always the seller; the model plays the customer (and,
/// outside roleplay, the coach speaking in the customer slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Seller,
    Customer,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::Seller => "seller",
            TurnRole::Customer => "customer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "seller" => Some(TurnRole::Seller),
            "customer" => Some(TurnRole::Customer),
            _ => None,
        }
    }
}

/// A single turn of dialogue, as fed to prompts and evaluators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn seller(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Seller,
            text: text.into(),
        }
    }

    pub fn customer(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Customer,
            text: text.into(),
        }
    }
}

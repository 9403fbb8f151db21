//! Prompt assembly for the coach, the roleplay customer and the debrief.
//!
//! All trainee-facing text is Dutch; the prompts pin the model to the
//! technique being practiced and the trainee's own selling context.

use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};
use dealcoach_core::conversation::{ConversationTurn, TurnRole};
use std::collections::BTreeMap;

/// Static opening used when generating the roleplay scene fails; the
/// session must start either way.
pub const ROLEPLAY_OPENING_FALLBACK: &str =
    "Goedemiddag. U had een afspraak met mij aangevraagd, toch? Vertel, waar gaat het over?";

/// Static opening for coach chat when generation fails.
pub const COACH_OPENING_FALLBACK: &str =
    "Welkom terug! We gaan samen aan de slag met deze techniek. Waar wil je mee beginnen?";

fn context_lines(context: &BTreeMap<String, String>) -> String {
    if context.is_empty() {
        return "Er is nog geen context over de verkoper bekend.".to_string();
    }
    context
        .iter()
        .map(|(k, v)| format!("- {k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt for the customer persona during roleplay.
pub fn roleplay_system(
    technique_id: &str,
    technique_name: &str,
    phase: u8,
    context: &BTreeMap<String, String>,
) -> String {
    format!(
        "Je speelt een potentiële klant in een verkooprollenspel. De verkoper \
         oefent techniek {technique_id} ({technique_name}), fase {phase}. \
         Situatie van de verkoper:\n{}\n\
         Blijf volledig in je rol als klant. Reageer kort en natuurlijk, in het \
         Nederlands, zoals een echte klant aan de telefoon. Wees licht kritisch \
         maar niet onmogelijk. Geef nooit feedback op de techniek en verwijs \
         nooit naar dit rollenspel.",
        context_lines(context)
    )
}

/// System prompt for the roleplay opening line: the customer speaks first.
pub fn roleplay_opening_system(
    technique_id: &str,
    technique_name: &str,
    context: &BTreeMap<String, String>,
) -> String {
    format!(
        "Je speelt een potentiële klant in een verkooprollenspel waarin de \
         verkoper techniek {technique_id} ({technique_name}) oefent. \
         Situatie van de verkoper:\n{}\n\
         Open het gesprek met één korte, natuurlijke zin als klant, alsof de \
         verkoper net belt of binnenloopt. Nederlands, geen uitleg.",
        context_lines(context)
    )
}

/// System prompt for coaching conversation outside roleplay.
pub fn coach_system(
    technique_id: &str,
    technique_name: &str,
    context: &BTreeMap<String, String>,
) -> String {
    format!(
        "Je bent een ervaren Nederlandse verkoopcoach. De verkoper werkt aan \
         techniek {technique_id} ({technique_name}). \
         Situatie van de verkoper:\n{}\n\
         Coach concreet en bemoedigend, met voorbeelden uit de situatie van de \
         verkoper. Houd antwoorden beknopt.",
        context_lines(context)
    )
}

/// System prompt for chatting about the debrief after a roleplay.
pub fn feedback_chat_system(technique_name: &str, feedback: &str) -> String {
    format!(
        "Je bent een verkoopcoach die net een rollenspel rond '{technique_name}' \
         heeft afgerond. Dit was je feedback:\n{feedback}\n\
         Beantwoord vervolgvragen van de verkoper over deze feedback, concreet \
         en in het Nederlands."
    )
}

/// Builds the chat message list: one system message followed by the
/// dialogue, seller turns as user and customer turns as assistant.
pub fn build_messages(
    system: String,
    history: &[ConversationTurn],
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len() + 1);
    messages.push(
        ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()?
            .into(),
    );
    for turn in history {
        let msg: ChatCompletionRequestMessage = match turn.role {
            TurnRole::Seller => ChatCompletionRequestUserMessageArgs::default()
                .content(turn.text.clone())
                .build()?
                .into(),
            TurnRole::Customer => ChatCompletionRequestAssistantMessageArgs::default()
                .content(turn.text.clone())
                .build()?
                .into(),
        };
        messages.push(msg);
    }
    Ok(messages)
}

//! Context gathering: before roleplay the coach asks a fixed, ordered list
//! of questions about the trainee's selling situation. One message, one
//! answer; the very first message only triggers the first question.

use crate::technique::ContextSlot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gathering progress, persisted on the session as JSON.
///
/// `next_slot_index` counts questions asked so far; the outstanding
/// question belongs to slot `next_slot_index - 1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextState {
    pub gathered: BTreeMap<String, String>,
    pub is_complete: bool,
    pub next_slot_index: usize,
}

/// What the coach should do after consuming a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextStep {
    /// Ask the question for this slot.
    Ask { key: String, question: String },
    /// Everything is gathered; the session can move on.
    Complete,
}

/// Rejections from the answer guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerIssue {
    TooShort,
    TooLong,
    Gibberish,
}

const MIN_ANSWER_CHARS: usize = 2;
const MAX_ANSWER_CHARS: usize = 500;

/// Rejects answers that are too short, too long, or mostly non-letters.
/// The caller re-asks the outstanding question instead of storing junk.
pub fn validate_answer(answer: &str) -> Result<(), AnswerIssue> {
    let trimmed = answer.trim();
    let chars = trimmed.chars().count();
    if chars < MIN_ANSWER_CHARS {
        return Err(AnswerIssue::TooShort);
    }
    if chars > MAX_ANSWER_CHARS {
        return Err(AnswerIssue::TooLong);
    }
    if chars > 3 {
        let wordlike = trimmed
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
            .count();
        if (wordlike as f64) / (chars as f64) < 0.8 {
            return Err(AnswerIssue::Gibberish);
        }
        // A long run of one character is keyboard mashing.
        let mut run = 1usize;
        let mut prev = None;
        for c in trimmed.chars() {
            if Some(c) == prev {
                run += 1;
                if run >= 5 {
                    return Err(AnswerIssue::Gibberish);
                }
            } else {
                run = 1;
                prev = Some(c);
            }
        }
    }
    Ok(())
}

impl ContextState {
    /// Starts gathering for `slots`, pre-filling answers already known from
    /// earlier sessions. The cursor skips pre-filled slots so only the
    /// genuinely open questions get asked.
    pub fn with_prefilled(slots: &[ContextSlot], known: &BTreeMap<String, String>) -> Self {
        let mut state = ContextState::default();
        for slot in slots {
            if let Some(value) = known.get(&slot.key) {
                if !value.trim().is_empty() {
                    state.gathered.insert(slot.key.clone(), value.clone());
                }
            }
        }
        if slots.iter().all(|s| state.gathered.contains_key(&s.key)) {
            state.is_complete = true;
            state.next_slot_index = slots.len();
        }
        state
    }

    /// The question currently awaiting an answer, if any.
    pub fn outstanding_question<'a>(&self, slots: &'a [ContextSlot]) -> Option<&'a ContextSlot> {
        if self.is_complete || self.next_slot_index == 0 {
            return None;
        }
        slots.get(self.next_slot_index - 1)
    }

    /// Consumes one trainee message.
    ///
    /// The first message of a session opens the protocol and is never
    /// recorded as an answer; every later message answers the outstanding
    /// question. Returns the next question to ask, or `Complete`.
    pub fn advance(&mut self, slots: &[ContextSlot], message: &str) -> ContextStep {
        if self.is_complete {
            return ContextStep::Complete;
        }
        if self.next_slot_index > 0 {
            if let Some(slot) = slots.get(self.next_slot_index - 1) {
                self.gathered
                    .insert(slot.key.clone(), message.trim().to_string());
            }
        }
        // Skip slots answered in an earlier session.
        let mut idx = self.next_slot_index;
        while idx < slots.len() && self.gathered.contains_key(&slots[idx].key) {
            idx += 1;
        }
        if idx >= slots.len() {
            self.next_slot_index = idx;
            self.is_complete = true;
            return ContextStep::Complete;
        }
        let slot = &slots[idx];
        self.next_slot_index = idx + 1;
        ContextStep::Ask {
            key: slot.key.clone(),
            question: slot.question.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> Vec<ContextSlot> {
        [
            ("sector", "In welke sector verkoop je?"),
            ("product", "Wat verkoop je precies?"),
            ("klant_type", "Aan wat voor klanten verkoop je?"),
        ]
        .iter()
        .map(|(k, q)| ContextSlot {
            key: k.to_string(),
            question: q.to_string(),
        })
        .collect()
    }

    #[test]
    fn first_message_is_never_an_answer() {
        let slots = slots();
        let mut state = ContextState::default();
        let step = state.advance(&slots, "Hoi, ik wil graag oefenen");
        assert!(matches!(step, ContextStep::Ask { ref key, .. } if key == "sector"));
        assert!(state.gathered.is_empty());
    }

    #[test]
    fn gathers_exactly_n_answers_then_completes() {
        let slots = slots();
        let mut state = ContextState::default();
        state.advance(&slots, "hoi");
        let step = state.advance(&slots, "retail");
        assert!(matches!(step, ContextStep::Ask { ref key, .. } if key == "product"));
        let step = state.advance(&slots, "CRM software");
        assert!(matches!(step, ContextStep::Ask { ref key, .. } if key == "klant_type"));
        let step = state.advance(&slots, "SME");
        assert_eq!(step, ContextStep::Complete);
        assert!(state.is_complete);
        assert_eq!(state.gathered.len(), 3);
        assert_eq!(state.gathered["sector"], "retail");
        assert_eq!(state.gathered["product"], "CRM software");
        assert_eq!(state.gathered["klant_type"], "SME");
    }

    #[test]
    fn prefilled_slots_are_skipped() {
        let slots = slots();
        let mut known = BTreeMap::new();
        known.insert("sector".to_string(), "retail".to_string());
        let mut state = ContextState::with_prefilled(&slots, &known);
        assert!(!state.is_complete);
        let step = state.advance(&slots, "hoi");
        assert!(matches!(step, ContextStep::Ask { ref key, .. } if key == "product"));
    }

    #[test]
    fn fully_prefilled_state_is_complete_at_init() {
        let slots = slots();
        let mut known = BTreeMap::new();
        for s in &slots {
            known.insert(s.key.clone(), "bekend".to_string());
        }
        let state = ContextState::with_prefilled(&slots, &known);
        assert!(state.is_complete);
    }

    #[test]
    fn empty_slot_list_completes_on_first_message() {
        let mut state = ContextState::default();
        let step = state.advance(&[], "hoi");
        assert_eq!(step, ContextStep::Complete);
        assert!(state.is_complete);
    }

    #[test]
    fn answer_guard_rejects_junk() {
        assert_eq!(validate_answer("x"), Err(AnswerIssue::TooShort));
        assert_eq!(validate_answer(&"a ".repeat(300)), Err(AnswerIssue::TooLong));
        assert_eq!(validate_answer("!@#$%^&*"), Err(AnswerIssue::Gibberish));
        assert_eq!(validate_answer("aaaaaaa"), Err(AnswerIssue::Gibberish));
        assert!(validate_answer("retail").is_ok());
        assert!(validate_answer("CRM software voor mkb").is_ok());
    }
}

//! The session mode machine and end-intent detection.
//!
//! A session is always in exactly one mode; every trainee message is
//! resolved to a next mode before any text is generated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionMode {
    ContextGathering,
    CoachChat,
    RoleplayReady,
    Roleplay,
    CoachFeedback,
    Ended,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::ContextGathering => "CONTEXT_GATHERING",
            SessionMode::CoachChat => "COACH_CHAT",
            SessionMode::RoleplayReady => "ROLEPLAY_READY",
            SessionMode::Roleplay => "ROLEPLAY",
            SessionMode::CoachFeedback => "COACH_FEEDBACK",
            SessionMode::Ended => "ENDED",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONTEXT_GATHERING" => Ok(SessionMode::ContextGathering),
            "COACH_CHAT" => Ok(SessionMode::CoachChat),
            "ROLEPLAY_READY" => Ok(SessionMode::RoleplayReady),
            "ROLEPLAY" => Ok(SessionMode::Roleplay),
            "COACH_FEEDBACK" => Ok(SessionMode::CoachFeedback),
            "ENDED" => Ok(SessionMode::Ended),
            other => Err(format!("unknown session mode: {other}")),
        }
    }
}

/// Explicit actions a client can attach to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAction {
    Stop,
    End,
    Retry,
    SkipContext,
    StartRoleplay,
}

/// Everything the machine looks at to resolve one message.
#[derive(Debug, Clone, Copy)]
pub struct TransitionInput<'a> {
    pub current: SessionMode,
    pub action: Option<ClientAction>,
    pub roleplay_capable: bool,
    pub context_complete: bool,
    pub message: &'a str,
}

/// The resolved transition. `announcement` is the deterministic assistant
/// line appended when entering a mode that has one; no model call is made
/// for it.
#[derive(Debug, Clone)]
pub struct Transition {
    pub next: SessionMode,
    pub announcement: Option<&'static str>,
}

/// Spoken when a session becomes ready for roleplay.
pub const ROLEPLAY_READY_ANNOUNCEMENT: &str =
    "Top, ik heb genoeg context. Zeg het maar als je wilt beginnen, dan speel ik de klant.";

/// Spoken when a roleplay wraps up into the feedback debrief.
pub const FEEDBACK_ANNOUNCEMENT: &str =
    "Oké, we ronden het rollenspel af. Ik zet de feedback voor je op een rij.";

/// Free-text vocabulary that signals the trainee wants to wrap up.
/// The default carries the Dutch vocabulary this coach ships with;
/// deployments can supply their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndIntentLexicon {
    pub keywords: Vec<String>,
    pub phrases: Vec<String>,
}

impl Default for EndIntentLexicon {
    fn default() -> Self {
        let keywords = [
            "feedback",
            "stop",
            "einde",
            "afsluiten",
            "beëindig",
            "klaar",
            "stoppen",
            "eindigen",
        ];
        let phrases = [
            "wil stoppen",
            "wil eindigen",
            "graag stoppen",
            "geef feedback",
            "ontvang feedback",
            "sessie beëindigen",
        ];
        Self {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            phrases: phrases.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl EndIntentLexicon {
    /// Word-boundary match for keywords, containment for phrases, over the
    /// lowercased message. Only consulted when no explicit action came in.
    pub fn detect(&self, message: &str) -> bool {
        let text = message.trim().to_lowercase();
        if text.is_empty() {
            return false;
        }
        for kw in &self.keywords {
            if text == *kw
                || text.starts_with(&format!("{kw} "))
                || text.ends_with(&format!(" {kw}"))
                || text.contains(&format!(" {kw} "))
            {
                return true;
            }
        }
        self.phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

/// Resolves one trainee message to the session's next mode.
pub fn next_mode(input: TransitionInput<'_>, lexicon: &EndIntentLexicon) -> Transition {
    use SessionMode::*;

    if input.current == Ended {
        return Transition {
            next: Ended,
            announcement: None,
        };
    }

    // Explicit stop/end beats everything else.
    if matches!(
        input.action,
        Some(ClientAction::Stop) | Some(ClientAction::End)
    ) {
        return enter(input.current, CoachFeedback);
    }

    // Free-text end intent only counts mid-roleplay without an action.
    if input.current == Roleplay && input.action.is_none() && lexicon.detect(input.message) {
        return enter(input.current, CoachFeedback);
    }

    let next = match input.current {
        ContextGathering | CoachChat => {
            let complete =
                input.context_complete || input.action == Some(ClientAction::SkipContext);
            if !complete {
                ContextGathering
            } else if input.roleplay_capable {
                // A technique without roleplay practice stays in coaching,
                // no matter how complete the context is.
                RoleplayReady
            } else {
                CoachChat
            }
        }
        RoleplayReady => {
            if input.action == Some(ClientAction::StartRoleplay) || !input.message.trim().is_empty()
            {
                Roleplay
            } else {
                RoleplayReady
            }
        }
        Roleplay => Roleplay,
        CoachFeedback => CoachFeedback,
        Ended => Ended,
    };
    enter(input.current, next)
}

fn enter(current: SessionMode, next: SessionMode) -> Transition {
    let announcement = if next != current {
        match next {
            SessionMode::RoleplayReady => Some(ROLEPLAY_READY_ANNOUNCEMENT),
            SessionMode::CoachFeedback => Some(FEEDBACK_ANNOUNCEMENT),
            _ => None,
        }
    } else {
        None
    };
    Transition { next, announcement }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(current: SessionMode) -> TransitionInput<'static> {
        TransitionInput {
            current,
            action: None,
            roleplay_capable: true,
            context_complete: false,
            message: "gewoon een bericht",
        }
    }

    #[test]
    fn mode_round_trips_through_strings() {
        for mode in [
            SessionMode::ContextGathering,
            SessionMode::CoachChat,
            SessionMode::RoleplayReady,
            SessionMode::Roleplay,
            SessionMode::CoachFeedback,
            SessionMode::Ended,
        ] {
            assert_eq!(mode.as_str().parse::<SessionMode>().unwrap(), mode);
        }
    }

    #[test]
    fn context_completion_routes_to_roleplay_ready() {
        let lex = EndIntentLexicon::default();
        let mut i = input(SessionMode::ContextGathering);
        i.context_complete = true;
        let t = next_mode(i, &lex);
        assert_eq!(t.next, SessionMode::RoleplayReady);
        assert_eq!(t.announcement, Some(ROLEPLAY_READY_ANNOUNCEMENT));
    }

    #[test]
    fn incapable_technique_never_reaches_roleplay_ready() {
        let lex = EndIntentLexicon::default();
        let mut i = input(SessionMode::ContextGathering);
        i.context_complete = true;
        i.roleplay_capable = false;
        let t = next_mode(i, &lex);
        assert_eq!(t.next, SessionMode::CoachChat);
        assert!(t.announcement.is_none());
    }

    #[test]
    fn skip_context_acts_as_completion() {
        let lex = EndIntentLexicon::default();
        let mut i = input(SessionMode::ContextGathering);
        i.action = Some(ClientAction::SkipContext);
        assert_eq!(next_mode(i, &lex).next, SessionMode::RoleplayReady);
    }

    #[test]
    fn ready_plus_message_starts_roleplay() {
        let lex = EndIntentLexicon::default();
        let t = next_mode(input(SessionMode::RoleplayReady), &lex);
        assert_eq!(t.next, SessionMode::Roleplay);
        assert!(t.announcement.is_none());
    }

    #[test]
    fn stop_action_wins_from_any_mode() {
        let lex = EndIntentLexicon::default();
        for mode in [
            SessionMode::ContextGathering,
            SessionMode::CoachChat,
            SessionMode::Roleplay,
        ] {
            let mut i = input(mode);
            i.action = Some(ClientAction::Stop);
            let t = next_mode(i, &lex);
            assert_eq!(t.next, SessionMode::CoachFeedback);
            assert_eq!(t.announcement, Some(FEEDBACK_ANNOUNCEMENT));
        }
    }

    #[test]
    fn end_intent_fires_only_mid_roleplay() {
        let lex = EndIntentLexicon::default();
        let mut i = input(SessionMode::Roleplay);
        i.message = "ik wil stoppen nu";
        assert_eq!(next_mode(i, &lex).next, SessionMode::CoachFeedback);

        let mut i = input(SessionMode::CoachChat);
        i.message = "ik wil stoppen nu";
        i.context_complete = true;
        assert_ne!(next_mode(i, &lex).next, SessionMode::CoachFeedback);
    }

    #[test]
    fn keyword_matching_respects_word_boundaries() {
        let lex = EndIntentLexicon::default();
        assert!(lex.detect("stop"));
        assert!(lex.detect("Stop maar"));
        assert!(lex.detect("we zijn klaar"));
        assert!(lex.detect("dat was het, geef feedback graag"));
        // Substring inside a word is not an end signal.
        assert!(!lex.detect("de stopwatch loopt nog"));
        assert!(!lex.detect("klaarblijkelijk werkt dit"));
    }

    #[test]
    fn ended_is_terminal() {
        let lex = EndIntentLexicon::default();
        let mut i = input(SessionMode::Ended);
        i.action = Some(ClientAction::Stop);
        assert_eq!(next_mode(i, &lex).next, SessionMode::Ended);
    }
}

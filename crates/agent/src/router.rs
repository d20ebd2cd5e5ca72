use haven_core::domain::risk::RiskState;
use haven_core::domain::routing::{RiskSignal, RoutingDecision};
use haven_core::domain::session::{Role, Turn};
use tracing::debug;

/// Crisis phrases that always score 1.0.
const SEVERE_PHRASES: &[&str] = &[
    "end my life",
    "kill myself",
    "killing myself",
    "suicide",
    "suicidal",
    "take my own life",
    "end it all",
    "better off dead",
    "don't want to be alive",
    "dont want to be alive",
];

/// Strong self-harm signals, above the default threshold but short of certainty.
const STRONG_PHRASES: &[&str] = &[
    "want to die",
    "wish i was dead",
    "wish i were dead",
    "hurt myself",
    "hurting myself",
    "harm myself",
    "self-harm",
    "self harm",
    "no reason to live",
    "can't go on",
    "cant go on",
];

/// Low-grade signals that only escalate with corroboration.
const MODERATE_PHRASES: &[&str] = &[
    "hopeless",
    "worthless",
    "no way out",
    "giving up on everything",
    "better without me",
];

const SEVERE_SCORE: f32 = 1.0;
const STRONG_SCORE: f32 = 0.8;
const MODERATE_SCORE: f32 = 0.5;

const REFERRAL_CUES: &[&str] = &[
    "therapist",
    "counselor",
    "counsellor",
    "psychologist",
    "psychiatrist",
    "support group",
    "professional help",
    "referral",
];

/// Location tails that name the speaker rather than a place.
const NON_LOCATIONS: &[&str] = &["me", "here", "my area", "my city", "us", "them"];

/// Stateless classifier. Risk outranks every other intent: a message that
/// both asks for a referral and carries a credible self-harm signal routes
/// to escalation, never to the directory.
#[derive(Clone, Debug)]
pub struct IntentRouter {
    risk_threshold: f32,
    history_window: usize,
}

impl IntentRouter {
    pub fn new(risk_threshold: f32, history_window: usize) -> Self {
        Self { risk_threshold, history_window }
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// Classifies one message against the session's prior turns and risk
    /// state. Callers reject empty messages before routing; `history` is the
    /// full turn log and is windowed here.
    pub fn route(&self, message: &str, history: &[Turn], risk: RiskState) -> RoutingDecision {
        let normalized = normalize(message);
        let signal = risk_signal(&normalized);
        let wants_referral = REFERRAL_CUES.iter().any(|cue| normalized.contains(cue));

        if self.is_credible(&signal, history, risk) {
            if wants_referral {
                debug!(
                    event_name = "router.risk_outranks_referral",
                    matched = %signal.matched,
                    "message asked for a referral but carried a risk signal"
                );
            }
            return RoutingDecision::Escalate { signal };
        }

        if wants_referral {
            if let Some(location) = extract_location(message) {
                return RoutingDecision::Refer { location };
            }
        }

        RoutingDecision::Respond
    }

    /// A signal is credible when it exceeds the threshold outright, or when a
    /// sub-threshold signal is corroborated by the session being past Normal
    /// or by another signal inside the history window.
    fn is_credible(&self, signal: &RiskSignal, history: &[Turn], risk: RiskState) -> bool {
        if signal.score > self.risk_threshold {
            return true;
        }
        let corroboration_bar = self.risk_threshold / 2.0;
        if signal.score < corroboration_bar {
            return false;
        }
        risk != RiskState::Normal || self.window_has_prior_signal(history, corroboration_bar)
    }

    fn window_has_prior_signal(&self, history: &[Turn], bar: f32) -> bool {
        let start = history.len().saturating_sub(self.history_window);
        history[start..]
            .iter()
            .filter(|turn| turn.role == Role::User)
            .any(|turn| risk_signal(&normalize(&turn.text)).score >= bar)
    }
}

fn normalize(message: &str) -> String {
    message.trim().to_ascii_lowercase()
}

/// Scans the phrase tiers from most to least severe and reports the first hit.
fn risk_signal(normalized: &str) -> RiskSignal {
    let tiers: [(&[&str], f32); 3] = [
        (SEVERE_PHRASES, SEVERE_SCORE),
        (STRONG_PHRASES, STRONG_SCORE),
        (MODERATE_PHRASES, MODERATE_SCORE),
    ];
    for (phrases, score) in tiers {
        if let Some(matched) = phrases.iter().find(|phrase| normalized.contains(*phrase)) {
            return RiskSignal { score, matched: (*matched).to_string() };
        }
    }
    RiskSignal { score: 0.0, matched: String::new() }
}

/// Pulls a place name out of "... in <place>" or "... near <place>",
/// preserving the user's casing. Tails that point back at the speaker
/// ("near me") are not locations; the agent should ask for a city instead.
fn extract_location(message: &str) -> Option<String> {
    let lowered = message.to_ascii_lowercase();
    let start = [" in ", " near "]
        .iter()
        .filter_map(|marker| lowered.rfind(marker).map(|index| index + marker.len()))
        .max()?;

    let tail = message[start..]
        .trim()
        .trim_end_matches(['.', '!', '?', ','])
        .trim();
    let tail = tail.strip_prefix("the ").unwrap_or(tail);

    if tail.is_empty() || tail.len() > 60 {
        return None;
    }
    if NON_LOCATIONS.contains(&tail.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some(tail.to_string())
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupToken(pub String);

impl DedupToken {
    /// Deterministic per (session, episode) so every retry of an episode and
    /// every re-entry into an interrupted dispatch loop carries the same
    /// token, letting the dispatcher collapse duplicates.
    pub fn for_episode(session: &SessionId, episode: u32) -> Self {
        Self(format!("{}:{episode}", session.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationAttempt {
    pub episode: u32,
    pub sequence: u32,
    pub outcome: AttemptOutcome,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl EscalationAttempt {
    pub fn new(episode: u32, sequence: u32, outcome: AttemptOutcome) -> Self {
        Self { episode, sequence, outcome, detail: None, occurred_at: Utc::now() }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Dispatcher acknowledgement for an accepted emergency dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub receipt_id: String,
    pub token: DedupToken,
    pub accepted_at: DateTime<Utc>,
}

/// How the escalation path resolved within one processed turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationOutcome {
    Succeeded,
    DispatchExhausted,
    ConfirmationRequested,
    AlreadyEscalated,
}

impl EscalationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::DispatchExhausted => "dispatch_exhausted",
            Self::ConfirmationRequested => "confirmation_requested",
            Self::AlreadyEscalated => "already_escalated",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::session::SessionId;

    use super::{AttemptOutcome, DedupToken};

    #[test]
    fn token_is_deterministic_within_an_episode() {
        let session = SessionId("s-42".to_string());
        assert_eq!(DedupToken::for_episode(&session, 1), DedupToken::for_episode(&session, 1));
    }

    #[test]
    fn token_differs_across_episodes_and_sessions() {
        let first = SessionId("s-42".to_string());
        let second = SessionId("s-43".to_string());

        assert_ne!(DedupToken::for_episode(&first, 1), DedupToken::for_episode(&first, 2));
        assert_ne!(DedupToken::for_episode(&first, 1), DedupToken::for_episode(&second, 1));
    }

    #[test]
    fn attempt_outcome_round_trips_from_storage_encoding() {
        let cases = [AttemptOutcome::Pending, AttemptOutcome::Succeeded, AttemptOutcome::Failed];

        for outcome in cases {
            assert_eq!(AttemptOutcome::parse(outcome.as_str()), Some(outcome));
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::escalation::{DedupToken, EscalationAttempt};
use crate::domain::risk::{self, RiskEvent, RiskState, RiskTransition, TransitionError};
use crate::domain::routing::Capability;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub capability_used: Option<Capability>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into(), timestamp: Utc::now(), capability_used: None }
    }

    pub fn agent(text: impl Into<String>, capability: Capability) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
            timestamp: Utc::now(),
            capability_used: Some(capability),
        }
    }
}

/// Per-session conversation state. Turns and escalation attempts are
/// append-only; the risk field moves only through [`risk::transition`].
#[derive(Clone, Debug)]
pub struct SessionState {
    id: SessionId,
    turns: Vec<Turn>,
    risk: RiskState,
    episode: u32,
    attempts: Vec<EscalationAttempt>,
    created_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            turns: Vec::new(),
            risk: RiskState::Normal,
            episode: 1,
            attempts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn risk(&self) -> RiskState {
        self.risk
    }

    pub fn episode(&self) -> u32 {
        self.episode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn recent_turns(&self, window: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }

    /// Appends a turn and returns its index in the log.
    pub fn append_turn(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    /// Applies a risk event through the transition table. The escalation
    /// guard is the only production caller; an operator reset that leaves a
    /// non-normal state starts a new episode.
    pub fn apply_risk(&mut self, event: RiskEvent) -> Result<RiskTransition, TransitionError> {
        let transition = risk::transition(self.risk, event)?;
        if transition.event == RiskEvent::OperatorReset && transition.from != RiskState::Normal {
            self.episode += 1;
        }
        self.risk = transition.to;
        Ok(transition)
    }

    pub fn record_attempt(&mut self, attempt: EscalationAttempt) {
        self.attempts.push(attempt);
    }

    pub fn attempts(&self) -> &[EscalationAttempt] {
        &self.attempts
    }

    /// The attempt log may hold several records per sequence (a pending entry
    /// plus its outcome), so the next sequence comes from the highest one seen
    /// in the current episode.
    pub fn next_attempt_sequence(&self) -> u32 {
        self.attempts
            .iter()
            .filter(|attempt| attempt.episode == self.episode)
            .map(|attempt| attempt.sequence)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Idempotency token for the current episode. Stable across retries and
    /// across re-entry into an interrupted dispatch loop.
    pub fn dedup_token(&self) -> DedupToken {
        DedupToken::for_episode(&self.id, self.episode)
    }
}

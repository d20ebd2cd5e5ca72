use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signals scoring at or above this floor are treated as unambiguous:
/// under the double-signal policy they authorize dispatch without waiting
/// for a corroborating message.
pub const SEVERE_SIGNAL_FLOOR: f32 = 0.95;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskState {
    Normal,
    Suspected,
    Escalating,
    Escalated,
}

impl RiskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Suspected => "suspected",
            Self::Escalating => "escalating",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "suspected" => Some(Self::Suspected),
            "escalating" => Some(Self::Escalating),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// Terminal for the episode; only an operator reset leaves it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Escalated)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskEvent {
    SignalDetected,
    DispatchAuthorized,
    DispatchSucceeded,
    DispatchFailed,
    AttemptsExhausted,
    OperatorReset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RiskTransition {
    pub from: RiskState,
    pub to: RiskState,
    pub event: RiskEvent,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid risk transition from {from:?} on {event:?}")]
    InvalidTransition { from: RiskState, event: RiskEvent },
}

pub fn transition(
    current: RiskState,
    event: RiskEvent,
) -> Result<RiskTransition, TransitionError> {
    use RiskEvent::{
        AttemptsExhausted, DispatchAuthorized, DispatchFailed, DispatchSucceeded, OperatorReset,
        SignalDetected,
    };
    use RiskState::{Escalated, Escalating, Normal, Suspected};

    let to = match (current, event) {
        (Normal, SignalDetected) => Suspected,
        (Suspected, DispatchAuthorized) => Escalating,
        (Escalating, DispatchSucceeded) => Escalated,
        (Escalating, DispatchFailed) => Escalating,
        (Escalating, AttemptsExhausted) => Escalated,
        (_, OperatorReset) => Normal,
        _ => return Err(TransitionError::InvalidTransition { from: current, event }),
    };

    Ok(RiskTransition { from: current, to, event })
}

#[cfg(test)]
mod tests {
    use super::{transition, RiskEvent, RiskState, TransitionError};

    #[test]
    fn escalation_happy_path_walks_every_stage() {
        let suspected = transition(RiskState::Normal, RiskEvent::SignalDetected)
            .expect("normal -> suspected")
            .to;
        let escalating = transition(suspected, RiskEvent::DispatchAuthorized)
            .expect("suspected -> escalating")
            .to;
        let escalated = transition(escalating, RiskEvent::DispatchSucceeded)
            .expect("escalating -> escalated")
            .to;

        assert_eq!(escalated, RiskState::Escalated);
        assert!(escalated.is_terminal());
    }

    #[test]
    fn retryable_failure_stays_escalating() {
        let outcome = transition(RiskState::Escalating, RiskEvent::DispatchFailed)
            .expect("retry keeps the episode live");
        assert_eq!(outcome.to, RiskState::Escalating);
    }

    #[test]
    fn exhausted_attempts_still_consume_the_episode() {
        let outcome = transition(RiskState::Escalating, RiskEvent::AttemptsExhausted)
            .expect("ceiling resolves the episode");
        assert_eq!(outcome.to, RiskState::Escalated);
    }

    #[test]
    fn dispatch_cannot_be_authorized_from_normal() {
        let error = transition(RiskState::Normal, RiskEvent::DispatchAuthorized)
            .expect_err("authorization requires a prior signal");
        assert!(matches!(
            error,
            TransitionError::InvalidTransition {
                from: RiskState::Normal,
                event: RiskEvent::DispatchAuthorized
            }
        ));
    }

    #[test]
    fn terminal_state_rejects_new_signals() {
        let error = transition(RiskState::Escalated, RiskEvent::SignalDetected)
            .expect_err("escalated is terminal for the episode");
        assert!(matches!(error, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn repeated_signal_without_authorization_is_rejected() {
        let error = transition(RiskState::Suspected, RiskEvent::SignalDetected)
            .expect_err("a second signal must arrive as an authorization");
        assert!(matches!(error, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn operator_reset_returns_to_normal_from_any_state() {
        for state in [
            RiskState::Normal,
            RiskState::Suspected,
            RiskState::Escalating,
            RiskState::Escalated,
        ] {
            let outcome =
                transition(state, RiskEvent::OperatorReset).expect("reset is always legal");
            assert_eq!(outcome.to, RiskState::Normal);
        }
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let events = [
            RiskEvent::SignalDetected,
            RiskEvent::DispatchAuthorized,
            RiskEvent::DispatchFailed,
            RiskEvent::DispatchSucceeded,
        ];

        let run = || {
            let mut state = RiskState::Normal;
            let mut trace = Vec::new();
            for event in events {
                let outcome = transition(state, event).expect("deterministic run");
                trace.push((outcome.from, outcome.to));
                state = outcome.to;
            }
            (state, trace)
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn risk_state_round_trips_from_storage_encoding() {
        let cases = [
            RiskState::Normal,
            RiskState::Suspected,
            RiskState::Escalating,
            RiskState::Escalated,
        ];

        for state in cases {
            assert_eq!(RiskState::parse(state.as_str()), Some(state));
        }
    }
}

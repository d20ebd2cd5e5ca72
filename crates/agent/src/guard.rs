use std::sync::Arc;
use std::time::Duration;

use haven_core::config::{AppConfig, ConfirmationPolicy};
use haven_core::domain::escalation::{
    AttemptOutcome, DedupToken, DispatchReceipt, EscalationAttempt,
};
use haven_core::domain::risk::{RiskEvent, RiskState, TransitionError, SEVERE_SIGNAL_FLOOR};
use haven_core::domain::routing::RiskSignal;
use haven_core::domain::session::SessionState;
use haven_core::errors::AdapterError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::EmergencyDispatcher;

#[derive(Clone, Debug)]
pub struct EscalationPolicy {
    pub confirmation_policy: ConfirmationPolicy,
    pub max_dispatch_attempts: u32,
    pub backoff_base_ms: u64,
    pub attempt_timeout_secs: u64,
}

impl EscalationPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            confirmation_policy: config.escalation.confirmation_policy,
            max_dispatch_attempts: config.escalation.max_dispatch_attempts,
            backoff_base_ms: config.escalation.backoff_base_ms,
            attempt_timeout_secs: config.adapters.timeout_secs,
        }
    }
}

/// How the guard resolved a credible signal.
#[derive(Clone, Debug)]
pub enum EscalationResolution {
    /// The dispatcher accepted the alert.
    Dispatched(DispatchReceipt),
    /// Every attempt up to the ceiling failed; the episode is closed and the
    /// reply must carry the helpline fallback.
    Exhausted { last_error: String },
    /// Double-signal policy is holding for a corroborating message.
    AwaitingConfirmation,
    /// The episode already reached Escalated; nothing left to dispatch.
    AlreadyEscalated,
}

/// Sole owner of risk-state mutation. The router only proposes `Escalate`;
/// this guard decides whether a dispatch is authorized, drives the retry
/// loop, and records every attempt on the session.
pub struct EscalationGuard {
    dispatcher: Arc<dyn EmergencyDispatcher>,
    policy: EscalationPolicy,
}

impl EscalationGuard {
    pub fn new(dispatcher: Arc<dyn EmergencyDispatcher>, policy: EscalationPolicy) -> Self {
        Self { dispatcher, policy }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Advances the session through the risk machine for one credible signal.
    /// Callers hold the session lock for the duration.
    pub async fn handle_signal(
        &self,
        session: &mut SessionState,
        signal: &RiskSignal,
    ) -> Result<EscalationResolution, TransitionError> {
        match session.risk() {
            RiskState::Escalated => {
                info!(
                    event_name = "escalation.already_escalated",
                    session_id = session.id().as_str(),
                    episode = session.episode(),
                    "signal arrived after the episode was resolved"
                );
                return Ok(EscalationResolution::AlreadyEscalated);
            }
            RiskState::Escalating => {
                // An earlier turn was interrupted mid-dispatch. Re-enter the
                // loop with the same token; the dispatcher collapses any
                // duplicate delivery.
                warn!(
                    event_name = "escalation.reentry",
                    session_id = session.id().as_str(),
                    episode = session.episode(),
                    "resuming an interrupted dispatch loop"
                );
            }
            RiskState::Normal => {
                session.apply_risk(RiskEvent::SignalDetected)?;
                if !self.authorizes_first_signal(signal) {
                    info!(
                        event_name = "escalation.confirmation_hold",
                        session_id = session.id().as_str(),
                        score = signal.score,
                        "holding for a corroborating signal"
                    );
                    return Ok(EscalationResolution::AwaitingConfirmation);
                }
                session.apply_risk(RiskEvent::DispatchAuthorized)?;
            }
            RiskState::Suspected => {
                // Any credible signal corroborates the earlier one.
                session.apply_risk(RiskEvent::DispatchAuthorized)?;
            }
        }

        self.run_dispatch(session).await
    }

    /// An operator reset returns the session to Normal and opens a new
    /// episode, which in turn mints a fresh dedup token.
    pub fn reset(&self, session: &mut SessionState) -> Result<RiskState, TransitionError> {
        let transition = session.apply_risk(RiskEvent::OperatorReset)?;
        info!(
            event_name = "escalation.operator_reset",
            session_id = session.id().as_str(),
            from = transition.from.as_str(),
            episode = session.episode(),
            "risk state reset"
        );
        Ok(transition.to)
    }

    fn authorizes_first_signal(&self, signal: &RiskSignal) -> bool {
        match self.policy.confirmation_policy {
            ConfirmationPolicy::SingleSignal => true,
            ConfirmationPolicy::DoubleSignal => signal.score >= SEVERE_SIGNAL_FLOOR,
        }
    }

    async fn run_dispatch(
        &self,
        session: &mut SessionState,
    ) -> Result<EscalationResolution, TransitionError> {
        let token = session.dedup_token();
        let episode = session.episode();
        let starting_sequence = session.next_attempt_sequence();

        // Re-entry spends what is left of the episode's attempt ceiling, not
        // a fresh ceiling.
        let attempt_budget =
            self.policy.max_dispatch_attempts.saturating_sub(starting_sequence.saturating_sub(1));
        if attempt_budget == 0 {
            session.apply_risk(RiskEvent::AttemptsExhausted)?;
            warn!(
                event_name = "escalation.ceiling_already_spent",
                session_id = session.id().as_str(),
                episode,
                "recorded attempts already reached the ceiling"
            );
            return Ok(EscalationResolution::Exhausted {
                last_error: "attempt ceiling already reached".to_string(),
            });
        }

        session.record_attempt(EscalationAttempt::new(
            episode,
            starting_sequence,
            AttemptOutcome::Pending,
        ));
        info!(
            event_name = "escalation.dispatch_started",
            session_id = session.id().as_str(),
            episode,
            token = token.as_str(),
            starting_sequence,
            "starting emergency dispatch loop"
        );

        // The loop runs on its own task so that a caller dropped mid-turn
        // cannot cancel an emergency dispatch; we only await its handle.
        let dispatcher = Arc::clone(&self.dispatcher);
        let policy = self.policy.clone();
        let loop_token = token.clone();
        let handle: JoinHandle<DispatchLoop> = tokio::spawn(async move {
            dispatch_loop(dispatcher, loop_token, episode, starting_sequence, attempt_budget, policy)
                .await
        });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => DispatchLoop {
                attempts: Vec::new(),
                resolution: LoopResolution::Exhausted {
                    last_error: format!("dispatch task failed: {join_error}"),
                },
            },
        };

        for attempt in outcome.attempts {
            if attempt.outcome == AttemptOutcome::Failed {
                session.apply_risk(RiskEvent::DispatchFailed)?;
            }
            session.record_attempt(attempt);
        }

        match outcome.resolution {
            LoopResolution::Dispatched(receipt) => {
                session.apply_risk(RiskEvent::DispatchSucceeded)?;
                info!(
                    event_name = "escalation.resolved",
                    session_id = session.id().as_str(),
                    episode,
                    receipt_id = %receipt.receipt_id,
                    "episode resolved with an accepted dispatch"
                );
                Ok(EscalationResolution::Dispatched(receipt))
            }
            LoopResolution::Exhausted { last_error } => {
                session.apply_risk(RiskEvent::AttemptsExhausted)?;
                warn!(
                    event_name = "escalation.exhausted",
                    session_id = session.id().as_str(),
                    episode,
                    error = %last_error,
                    "dispatch attempts exhausted without an acceptance"
                );
                Ok(EscalationResolution::Exhausted { last_error })
            }
        }
    }
}

struct DispatchLoop {
    attempts: Vec<EscalationAttempt>,
    resolution: LoopResolution,
}

enum LoopResolution {
    Dispatched(DispatchReceipt),
    Exhausted { last_error: String },
}

async fn dispatch_loop(
    dispatcher: Arc<dyn EmergencyDispatcher>,
    token: DedupToken,
    episode: u32,
    starting_sequence: u32,
    attempt_budget: u32,
    policy: EscalationPolicy,
) -> DispatchLoop {
    let mut attempts = Vec::new();
    let mut last_error = String::from("no dispatch attempt was made");
    let attempt_timeout = Duration::from_secs(policy.attempt_timeout_secs);

    for retry in 0..attempt_budget {
        let sequence = starting_sequence + retry;
        if retry > 0 {
            tokio::time::sleep(backoff_delay(policy.backoff_base_ms, retry)).await;
            attempts.push(EscalationAttempt::new(episode, sequence, AttemptOutcome::Pending));
        }

        let result = match tokio::time::timeout(attempt_timeout, dispatcher.dispatch(&token)).await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(AdapterError::Timeout { secs: policy.attempt_timeout_secs }),
        };

        match result {
            Ok(receipt) => {
                info!(
                    event_name = "escalation.dispatch_accepted",
                    token = token.as_str(),
                    sequence,
                    receipt_id = %receipt.receipt_id,
                    "emergency dispatch accepted"
                );
                attempts.push(EscalationAttempt::new(episode, sequence, AttemptOutcome::Succeeded));
                return DispatchLoop {
                    attempts,
                    resolution: LoopResolution::Dispatched(receipt),
                };
            }
            Err(error) => {
                attempts.push(
                    EscalationAttempt::new(episode, sequence, AttemptOutcome::Failed)
                        .with_detail(error.to_string()),
                );
                last_error = error.to_string();

                if !error.is_retryable() {
                    warn!(
                        event_name = "escalation.dispatch_rejected",
                        token = token.as_str(),
                        sequence,
                        error = %error,
                        "dispatcher rejected the request; not retrying"
                    );
                    break;
                }
                if retry + 1 < attempt_budget {
                    warn!(
                        event_name = "escalation.dispatch_retry",
                        token = token.as_str(),
                        sequence,
                        max_attempts = policy.max_dispatch_attempts,
                        backoff_ms = backoff_delay(policy.backoff_base_ms, retry + 1).as_millis()
                            as u64,
                        error = %error,
                        "dispatch attempt failed; backing off"
                    );
                } else {
                    warn!(
                        event_name = "escalation.dispatch_ceiling",
                        token = token.as_str(),
                        sequence,
                        max_attempts = policy.max_dispatch_attempts,
                        error = %error,
                        "dispatch attempt failed at the retry ceiling"
                    );
                }
            }
        }
    }

    DispatchLoop { attempts, resolution: LoopResolution::Exhausted { last_error } }
}

/// Exponential backoff before retry `n` (1-based): base * 2^(n-1), with the
/// shift clamped so large ceilings cannot overflow.
fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use haven_core::config::ConfirmationPolicy;
    use haven_core::domain::escalation::{AttemptOutcome, DedupToken, DispatchReceipt};
    use haven_core::domain::risk::RiskState;
    use haven_core::domain::routing::RiskSignal;
    use haven_core::domain::session::{SessionId, SessionState};
    use haven_core::errors::AdapterError;
    use tokio::sync::Notify;

    use crate::adapters::{EmergencyDispatcher, ScriptedDispatcher};

    use super::{backoff_delay, EscalationGuard, EscalationPolicy, EscalationResolution};

    fn policy(confirmation: ConfirmationPolicy) -> EscalationPolicy {
        EscalationPolicy {
            confirmation_policy: confirmation,
            max_dispatch_attempts: 3,
            backoff_base_ms: 1,
            attempt_timeout_secs: 5,
        }
    }

    fn guard(
        dispatcher: Arc<ScriptedDispatcher>,
        confirmation: ConfirmationPolicy,
    ) -> EscalationGuard {
        EscalationGuard::new(dispatcher, policy(confirmation))
    }

    fn session() -> SessionState {
        SessionState::new(SessionId("s-guard".to_string()))
    }

    fn signal(score: f32) -> RiskSignal {
        RiskSignal { score, matched: "hurt myself".to_string() }
    }

    #[tokio::test]
    async fn single_signal_policy_dispatches_on_the_first_signal() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let guard = guard(Arc::clone(&dispatcher), ConfirmationPolicy::SingleSignal);
        let mut session = session();

        let resolution =
            guard.handle_signal(&mut session, &signal(0.8)).await.expect("valid transitions");

        assert!(matches!(resolution, EscalationResolution::Dispatched(_)));
        assert_eq!(session.risk(), RiskState::Escalated);
        assert_eq!(dispatcher.dispatch_count(), 1);

        let outcomes: Vec<AttemptOutcome> =
            session.attempts().iter().map(|attempt| attempt.outcome).collect();
        assert_eq!(outcomes, vec![AttemptOutcome::Pending, AttemptOutcome::Succeeded]);
    }

    #[tokio::test]
    async fn double_signal_policy_holds_an_ambiguous_first_signal() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let guard = guard(Arc::clone(&dispatcher), ConfirmationPolicy::DoubleSignal);
        let mut session = session();

        let resolution =
            guard.handle_signal(&mut session, &signal(0.8)).await.expect("valid transitions");

        assert!(matches!(resolution, EscalationResolution::AwaitingConfirmation));
        assert_eq!(session.risk(), RiskState::Suspected);
        assert_eq!(dispatcher.dispatch_count(), 0);
        assert!(session.attempts().is_empty());
    }

    #[tokio::test]
    async fn corroborating_signal_triggers_exactly_one_dispatch() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let guard = guard(Arc::clone(&dispatcher), ConfirmationPolicy::DoubleSignal);
        let mut session = session();

        guard.handle_signal(&mut session, &signal(0.8)).await.expect("first signal holds");
        let resolution =
            guard.handle_signal(&mut session, &signal(0.8)).await.expect("second signal fires");

        assert!(matches!(resolution, EscalationResolution::Dispatched(_)));
        assert_eq!(session.risk(), RiskState::Escalated);
        assert_eq!(dispatcher.dispatch_count(), 1);
        assert_eq!(dispatcher.receipt_count(), 1);
    }

    #[tokio::test]
    async fn severe_signal_bypasses_double_signal_confirmation() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let guard = guard(Arc::clone(&dispatcher), ConfirmationPolicy::DoubleSignal);
        let mut session = session();

        let resolution =
            guard.handle_signal(&mut session, &signal(1.0)).await.expect("valid transitions");

        assert!(matches!(resolution, EscalationResolution::Dispatched(_)));
        assert_eq!(session.risk(), RiskState::Escalated);
        assert_eq!(dispatcher.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn retryable_failures_walk_to_the_ceiling_then_close_the_episode() {
        let dispatcher =
            Arc::new(ScriptedDispatcher::failing(AdapterError::Unavailable("line down".into())));
        let guard = guard(Arc::clone(&dispatcher), ConfirmationPolicy::SingleSignal);
        let mut session = session();

        let resolution =
            guard.handle_signal(&mut session, &signal(0.9)).await.expect("valid transitions");

        match resolution {
            EscalationResolution::Exhausted { last_error } => {
                assert!(last_error.contains("line down"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(session.risk(), RiskState::Escalated);
        assert_eq!(dispatcher.dispatch_count(), 3);
        assert_eq!(dispatcher.receipt_count(), 0);

        let failed_sequences: Vec<u32> = session
            .attempts()
            .iter()
            .filter(|attempt| attempt.outcome == AttemptOutcome::Failed)
            .map(|attempt| attempt.sequence)
            .collect();
        assert_eq!(failed_sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn transient_failures_recover_with_the_same_token() {
        let dispatcher = Arc::new(ScriptedDispatcher::with_script(vec![
            Err(AdapterError::Unavailable("line busy".into())),
            Err(AdapterError::Unavailable("line busy".into())),
        ]));
        let guard = guard(Arc::clone(&dispatcher), ConfirmationPolicy::SingleSignal);
        let mut session = session();

        let resolution =
            guard.handle_signal(&mut session, &signal(0.9)).await.expect("valid transitions");

        assert!(matches!(resolution, EscalationResolution::Dispatched(_)));
        assert_eq!(session.risk(), RiskState::Escalated);
        assert_eq!(dispatcher.dispatch_count(), 3);
        assert_eq!(dispatcher.accepted_tokens(), vec![session.dedup_token()]);
    }

    #[tokio::test]
    async fn invalid_input_is_not_retried() {
        let dispatcher =
            Arc::new(ScriptedDispatcher::failing(AdapterError::InvalidInput("bad token".into())));
        let guard = guard(Arc::clone(&dispatcher), ConfirmationPolicy::SingleSignal);
        let mut session = session();

        let resolution =
            guard.handle_signal(&mut session, &signal(0.9)).await.expect("valid transitions");

        assert!(matches!(resolution, EscalationResolution::Exhausted { .. }));
        assert_eq!(session.risk(), RiskState::Escalated);
        assert_eq!(dispatcher.dispatch_count(), 1, "invalid input must not be retried");
    }

    #[tokio::test]
    async fn resolved_episode_reports_already_escalated() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let guard = guard(Arc::clone(&dispatcher), ConfirmationPolicy::SingleSignal);
        let mut session = session();

        guard.handle_signal(&mut session, &signal(0.9)).await.expect("first signal dispatches");
        let resolution =
            guard.handle_signal(&mut session, &signal(1.0)).await.expect("terminal episode");

        assert!(matches!(resolution, EscalationResolution::AlreadyEscalated));
        assert_eq!(dispatcher.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn operator_reset_opens_a_new_episode_with_a_new_token() {
        let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
        let guard = guard(Arc::clone(&dispatcher), ConfirmationPolicy::SingleSignal);
        let mut session = session();

        guard.handle_signal(&mut session, &signal(0.9)).await.expect("first episode");
        let first_token = session.dedup_token();

        guard.reset(&mut session).expect("reset is always legal");
        assert_eq!(session.risk(), RiskState::Normal);

        guard.handle_signal(&mut session, &signal(0.9)).await.expect("second episode");

        assert_eq!(session.risk(), RiskState::Escalated);
        assert_eq!(dispatcher.receipt_count(), 2);
        assert_ne!(session.dedup_token(), first_token);
    }

    #[test]
    fn backoff_doubles_per_retry_from_the_base() {
        assert_eq!(backoff_delay(250, 1), Duration::from_millis(250));
        assert_eq!(backoff_delay(250, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(250, 3), Duration::from_millis(1000));
        assert_eq!(backoff_delay(u64::MAX, 9), Duration::from_millis(u64::MAX));
    }

    /// Dispatcher that parks every call until the gate opens, so a test can
    /// abort the calling task while a dispatch is in flight.
    struct GatedDispatcher {
        gate: Notify,
        inner: ScriptedDispatcher,
    }

    #[async_trait]
    impl EmergencyDispatcher for GatedDispatcher {
        async fn dispatch(&self, token: &DedupToken) -> Result<DispatchReceipt, AdapterError> {
            self.gate.notified().await;
            self.inner.dispatch(token).await
        }
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_an_inflight_dispatch() {
        let dispatcher =
            Arc::new(GatedDispatcher { gate: Notify::new(), inner: ScriptedDispatcher::succeeding() });
        let guard = Arc::new(EscalationGuard::new(
            Arc::clone(&dispatcher) as Arc<dyn EmergencyDispatcher>,
            policy(ConfirmationPolicy::SingleSignal),
        ));

        let turn = tokio::spawn({
            let guard = Arc::clone(&guard);
            async move {
                let mut session = session();
                guard.handle_signal(&mut session, &signal(0.9)).await
            }
        });

        // Let the turn reach the gated dispatch, then drop the caller.
        tokio::time::sleep(Duration::from_millis(50)).await;
        turn.abort();
        assert!(turn.await.is_err(), "caller was aborted mid-dispatch");
        assert_eq!(dispatcher.inner.receipt_count(), 0);

        // The spawned dispatch loop is still parked on the gate; opening it
        // lets the dispatch complete even though the caller is gone.
        dispatcher.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.inner.receipt_count(), 1);
        assert_eq!(dispatcher.inner.dispatch_count(), 1);
    }
}

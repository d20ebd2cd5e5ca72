use std::sync::Arc;
use std::time::Duration;

use haven_core::config::AppConfig;
use haven_core::domain::escalation::{EscalationAttempt, EscalationOutcome};
use haven_core::domain::reply::AgentReply;
use haven_core::domain::risk::RiskState;
use haven_core::domain::routing::{Capability, ReferralEntry, RiskSignal, RoutingDecision};
use haven_core::domain::session::{SessionId, SessionState, Turn};
use haven_core::errors::TurnError;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{EmergencyDispatcher, ReferralDirectory, ResponseGenerator};
use crate::guard::{EscalationGuard, EscalationPolicy, EscalationResolution};
use crate::router::IntentRouter;
use crate::store::ConversationStore;

/// Read-model of one session, taken under its lock so turns, risk state, and
/// the attempt log are mutually consistent.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub risk: RiskState,
    pub episode: u32,
    pub turns: Vec<Turn>,
    pub attempts: Vec<EscalationAttempt>,
}

/// Coordinates one turn end to end: validate, classify, advance the risk
/// machine, call at most one capability adapter, and append both sides of
/// the exchange. Holds the session lock for the whole turn so concurrent
/// callers on the same session are serialized.
pub struct Orchestrator {
    store: ConversationStore,
    router: IntentRouter,
    guard: EscalationGuard,
    generator: Arc<dyn ResponseGenerator>,
    directory: Arc<dyn ReferralDirectory>,
    adapter_timeout: Duration,
    helpline: String,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        generator: Arc<dyn ResponseGenerator>,
        directory: Arc<dyn ReferralDirectory>,
        dispatcher: Arc<dyn EmergencyDispatcher>,
    ) -> Self {
        Self {
            store: ConversationStore::new(),
            router: IntentRouter::new(
                config.routing.risk_threshold,
                config.routing.history_window as usize,
            ),
            guard: EscalationGuard::new(dispatcher, EscalationPolicy::from_config(config)),
            generator,
            directory,
            adapter_timeout: Duration::from_secs(config.adapters.timeout_secs),
            helpline: config.escalation.helpline.clone(),
        }
    }

    /// Processes one user message and returns the agent's reply. Invalid
    /// input is rejected before any session state is touched: no turn is
    /// appended, no session is created, no risk transition happens.
    pub async fn process_turn(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<AgentReply, TurnError> {
        if session_id.trim().is_empty() {
            return Err(TurnError::InvalidInput("session id is empty".to_string()));
        }
        let message = message.trim();
        if message.is_empty() {
            return Err(TurnError::InvalidInput(
                "message is empty or whitespace-only".to_string(),
            ));
        }

        let correlation_id = Uuid::new_v4().to_string();
        let id = SessionId(session_id.trim().to_string());
        let handle = self.store.open(&id).await;
        let mut session = handle.lock().await;

        info!(
            event_name = "turn.received",
            correlation_id = %correlation_id,
            session_id = id.as_str(),
            risk = session.risk().as_str(),
            "processing user turn"
        );

        // Classify against history as it stood before this message, then
        // append so the generation prompt can include it.
        let decision = self.router.route(message, session.turns(), session.risk());
        session.append_turn(Turn::user(message));

        info!(
            event_name = "turn.routed",
            correlation_id = %correlation_id,
            session_id = id.as_str(),
            capability = decision.capability().as_str(),
            "routing decision made"
        );

        let reply = match decision {
            RoutingDecision::Respond => self.respond(&session, message, &correlation_id).await,
            RoutingDecision::Refer { location } => self.refer(&location, &correlation_id).await,
            RoutingDecision::Escalate { signal } => {
                self.escalate(&mut session, &signal, &correlation_id).await
            }
        };

        session.append_turn(Turn::agent(reply.text.clone(), reply.capability_used));
        info!(
            event_name = "turn.completed",
            correlation_id = %correlation_id,
            session_id = id.as_str(),
            capability = reply.capability_used.as_str(),
            risk = session.risk().as_str(),
            "turn resolved"
        );
        Ok(reply)
    }

    async fn respond(
        &self,
        session: &SessionState,
        message: &str,
        correlation_id: &str,
    ) -> AgentReply {
        let history = session.recent_turns(self.router.history_window());
        let generated =
            timeout(self.adapter_timeout, self.generator.generate(message, history)).await;

        match generated {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                AgentReply::new(text, Capability::GenerateResponse)
            }
            Ok(Ok(_)) => {
                warn!(
                    event_name = "adapter.generate_empty",
                    correlation_id = %correlation_id,
                    "generator returned empty text"
                );
                self.degraded_reply(Capability::GenerateResponse)
            }
            Ok(Err(error)) => {
                warn!(
                    event_name = "adapter.generate_failed",
                    correlation_id = %correlation_id,
                    error_class = error.class(),
                    error = %error,
                    "response generation failed"
                );
                self.degraded_reply(Capability::GenerateResponse)
            }
            Err(_elapsed) => {
                warn!(
                    event_name = "adapter.generate_timeout",
                    correlation_id = %correlation_id,
                    timeout_secs = self.adapter_timeout.as_secs(),
                    "response generation timed out"
                );
                self.degraded_reply(Capability::GenerateResponse)
            }
        }
    }

    async fn refer(&self, location: &str, correlation_id: &str) -> AgentReply {
        let found = timeout(self.adapter_timeout, self.directory.find(location)).await;

        match found {
            Ok(Ok(entries)) if entries.is_empty() => AgentReply::new(
                format!(
                    "I couldn't find a professional listed for {location}. A good next step \
                     is calling {} - they can connect you with support close to you.",
                    self.helpline
                ),
                Capability::FindReferral,
            ),
            Ok(Ok(entries)) => {
                AgentReply::new(format_referrals(location, &entries), Capability::FindReferral)
            }
            Ok(Err(error)) => {
                warn!(
                    event_name = "adapter.referral_failed",
                    correlation_id = %correlation_id,
                    error_class = error.class(),
                    error = %error,
                    "referral lookup failed"
                );
                self.degraded_reply(Capability::FindReferral)
            }
            Err(_elapsed) => {
                warn!(
                    event_name = "adapter.referral_timeout",
                    correlation_id = %correlation_id,
                    timeout_secs = self.adapter_timeout.as_secs(),
                    "referral lookup timed out"
                );
                self.degraded_reply(Capability::FindReferral)
            }
        }
    }

    async fn escalate(
        &self,
        session: &mut SessionState,
        signal: &RiskSignal,
        correlation_id: &str,
    ) -> AgentReply {
        info!(
            event_name = "escalation.signal",
            correlation_id = %correlation_id,
            session_id = session.id().as_str(),
            score = signal.score,
            matched = %signal.matched,
            risk = session.risk().as_str(),
            "credible risk signal routed to the guard"
        );

        match self.guard.handle_signal(session, signal).await {
            Ok(EscalationResolution::Dispatched(receipt)) => AgentReply::new(
                format!(
                    "You are not alone, and I'm taking what you said seriously. I have \
                     alerted an emergency responder who will reach out to you right away \
                     (reference {}). If you can, stay where you are and keep talking to me.",
                    receipt.receipt_id
                ),
                Capability::DispatchEmergency,
            )
            .with_escalation_outcome(EscalationOutcome::Succeeded),
            Ok(EscalationResolution::Exhausted { .. }) => AgentReply::new(
                format!(
                    "I tried to reach our emergency responder but could not confirm the \
                     alert went through. Please call {} right now, or dial your local \
                     emergency number. People there are ready to help you immediately.",
                    self.helpline
                ),
                Capability::DispatchEmergency,
            )
            .with_escalation_outcome(EscalationOutcome::DispatchExhausted),
            Ok(EscalationResolution::AwaitingConfirmation) => AgentReply::new(
                format!(
                    "I'm concerned about what you just shared, and I want to make sure I \
                     understand. Are you thinking about hurting yourself? If you are in \
                     immediate danger, please call {} now.",
                    self.helpline
                ),
                Capability::DispatchEmergency,
            )
            .with_escalation_outcome(EscalationOutcome::ConfirmationRequested),
            Ok(EscalationResolution::AlreadyEscalated) => AgentReply::new(
                format!(
                    "Help is already on the way. Stay with me if you can, and if anything \
                     changes call {} immediately.",
                    self.helpline
                ),
                Capability::DispatchEmergency,
            )
            .with_escalation_outcome(EscalationOutcome::AlreadyEscalated),
            Err(transition_error) => {
                error!(
                    event_name = "escalation.transition_rejected",
                    correlation_id = %correlation_id,
                    session_id = session.id().as_str(),
                    risk = session.risk().as_str(),
                    error = %transition_error,
                    "risk machine rejected an event"
                );
                AgentReply::new(
                    format!(
                        "Something went wrong on my side, but your safety comes first: \
                         please call {} right now if you are in danger.",
                        self.helpline
                    ),
                    Capability::DispatchEmergency,
                )
            }
        }
    }

    /// User-safe text for a failed or timed-out non-escalation adapter.
    /// Internal detail stays in the logs.
    fn degraded_reply(&self, capability: Capability) -> AgentReply {
        AgentReply::new(
            format!(
                "I'm having trouble reaching part of my support tools right now, but I'm \
                 still here with you. If you are in immediate danger, please call {}.",
                self.helpline
            ),
            capability,
        )
    }

    /// Full turn history for a session; empty when the session is unknown.
    pub async fn history(&self, session_id: &str) -> Vec<Turn> {
        let id = SessionId(session_id.trim().to_string());
        match self.store.get(&id).await {
            Some(handle) => handle.lock().await.turns().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn risk_state(&self, session_id: &str) -> Option<RiskState> {
        let id = SessionId(session_id.trim().to_string());
        match self.store.get(&id).await {
            Some(handle) => Some(handle.lock().await.risk()),
            None => None,
        }
    }

    pub async fn attempts(&self, session_id: &str) -> Vec<EscalationAttempt> {
        let id = SessionId(session_id.trim().to_string());
        match self.store.get(&id).await {
            Some(handle) => handle.lock().await.attempts().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let id = SessionId(session_id.trim().to_string());
        let handle = self.store.get(&id).await?;
        let session = handle.lock().await;
        Some(SessionSnapshot {
            id: session.id().clone(),
            risk: session.risk(),
            episode: session.episode(),
            turns: session.turns().to_vec(),
            attempts: session.attempts().to_vec(),
        })
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.store.session_ids().await
    }

    /// Operator action: close out the current episode and return the session
    /// to Normal. `None` when the session is unknown.
    pub async fn reset_episode(&self, session_id: &str) -> Option<RiskState> {
        let id = SessionId(session_id.trim().to_string());
        let handle = self.store.get(&id).await?;
        let mut session = handle.lock().await;
        match self.guard.reset(&mut session) {
            Ok(state) => Some(state),
            Err(error) => {
                error!(
                    event_name = "escalation.reset_rejected",
                    session_id = id.as_str(),
                    error = %error,
                    "operator reset rejected"
                );
                None
            }
        }
    }
}

fn format_referrals(location: &str, entries: &[ReferralEntry]) -> String {
    let mut text = format!("Here are professionals near {location} who can help:\n");
    for entry in entries {
        text.push_str(&format!("- {} ({}): {}\n", entry.name, entry.specialty, entry.contact));
    }
    text.push_str("Reaching out is a strong step. Would you like help figuring out what to say?");
    text
}

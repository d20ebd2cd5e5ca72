use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use haven_core::domain::escalation::{DedupToken, DispatchReceipt};
use haven_core::domain::routing::ReferralEntry;
use haven_core::domain::session::{Role, Turn};
use haven_core::errors::AdapterError;

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, history: &[Turn]) -> Result<String, AdapterError>;
}

#[async_trait]
pub trait ReferralDirectory: Send + Sync {
    async fn find(&self, location: &str) -> Result<Vec<ReferralEntry>, AdapterError>;
}

#[async_trait]
pub trait EmergencyDispatcher: Send + Sync {
    /// Must be idempotent per token: a token that was already accepted
    /// returns the original receipt instead of dialing again.
    async fn dispatch(&self, token: &DedupToken) -> Result<DispatchReceipt, AdapterError>;
}

/// Deterministic responder used by smoke runs and tests. Real deployments
/// plug an LLM-backed implementation in behind the same trait.
#[derive(Clone, Debug, Default)]
pub struct SupportiveResponder;

impl SupportiveResponder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseGenerator for SupportiveResponder {
    async fn generate(&self, prompt: &str, history: &[Turn]) -> Result<String, AdapterError> {
        if prompt.trim().is_empty() {
            return Err(AdapterError::InvalidInput("prompt is empty".to_string()));
        }

        let user_turns = history.iter().filter(|turn| turn.role == Role::User).count();
        let opener = if user_turns > 1 {
            "Thank you for staying with me."
        } else {
            "Thank you for telling me."
        };
        Ok(format!(
            "{opener} That sounds really heavy, and it makes sense that it weighs on you. \
             I'm here with you - what has been the hardest part?"
        ))
    }
}

/// Fixed in-memory directory keyed by location.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    entries: Vec<ReferralEntry>,
}

impl StaticDirectory {
    pub fn new(entries: Vec<ReferralEntry>) -> Self {
        Self { entries }
    }

    pub fn with_defaults() -> Self {
        Self::new(vec![
            ReferralEntry {
                name: "Maya Chen, LCSW".to_string(),
                specialty: "Anxiety and depression".to_string(),
                contact: "+1-555-0142".to_string(),
                location: "Springfield".to_string(),
            },
            ReferralEntry {
                name: "Daniel Okafor, PhD".to_string(),
                specialty: "Trauma and grief counseling".to_string(),
                contact: "+1-555-0187".to_string(),
                location: "Springfield".to_string(),
            },
            ReferralEntry {
                name: "Priya Raman, LMFT".to_string(),
                specialty: "Family and relationship therapy".to_string(),
                contact: "+1-555-0119".to_string(),
                location: "Riverton".to_string(),
            },
        ])
    }
}

#[async_trait]
impl ReferralDirectory for StaticDirectory {
    async fn find(&self, location: &str) -> Result<Vec<ReferralEntry>, AdapterError> {
        let needle = location.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return Err(AdapterError::InvalidInput("location is empty".to_string()));
        }

        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.location.to_ascii_lowercase() == needle)
            .cloned()
            .collect())
    }
}

/// Dispatcher with programmable outcomes and token-level deduplication.
/// Smoke runs and tests script failures; the accepted-token map mirrors the
/// dedup contract a real telephony provider offers.
#[derive(Debug)]
pub struct ScriptedDispatcher {
    state: Mutex<DispatcherState>,
}

#[derive(Debug)]
struct DispatcherState {
    script: Vec<Result<(), AdapterError>>,
    default_outcome: Result<(), AdapterError>,
    accepted: HashMap<DedupToken, DispatchReceipt>,
    dispatch_calls: u32,
    next_receipt: u32,
}

impl ScriptedDispatcher {
    /// Every call is accepted.
    pub fn succeeding() -> Self {
        Self::with_script(Vec::new())
    }

    /// Outcomes are consumed in order; once exhausted, calls are accepted.
    pub fn with_script(script: Vec<Result<(), AdapterError>>) -> Self {
        Self {
            state: Mutex::new(DispatcherState {
                script,
                default_outcome: Ok(()),
                accepted: HashMap::new(),
                dispatch_calls: 0,
                next_receipt: 1,
            }),
        }
    }

    /// Every call fails with the given error.
    pub fn failing(error: AdapterError) -> Self {
        Self {
            state: Mutex::new(DispatcherState {
                script: Vec::new(),
                default_outcome: Err(error),
                accepted: HashMap::new(),
                dispatch_calls: 0,
                next_receipt: 1,
            }),
        }
    }

    pub fn dispatch_count(&self) -> u32 {
        self.state.lock().expect("dispatcher state lock").dispatch_calls
    }

    pub fn receipt_count(&self) -> usize {
        self.state.lock().expect("dispatcher state lock").accepted.len()
    }

    pub fn accepted_tokens(&self) -> Vec<DedupToken> {
        let mut tokens: Vec<DedupToken> = self
            .state
            .lock()
            .expect("dispatcher state lock")
            .accepted
            .keys()
            .cloned()
            .collect();
        tokens.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        tokens
    }
}

#[async_trait]
impl EmergencyDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, token: &DedupToken) -> Result<DispatchReceipt, AdapterError> {
        let mut state = self.state.lock().expect("dispatcher state lock");
        state.dispatch_calls += 1;

        if let Some(receipt) = state.accepted.get(token) {
            return Ok(receipt.clone());
        }

        let outcome = if state.script.is_empty() {
            state.default_outcome.clone()
        } else {
            state.script.remove(0)
        };
        outcome?;

        let receipt = DispatchReceipt {
            receipt_id: format!("rcpt-{:04}", state.next_receipt),
            token: token.clone(),
            accepted_at: Utc::now(),
        };
        state.next_receipt += 1;
        state.accepted.insert(token.clone(), receipt.clone());
        Ok(receipt)
    }
}

use serde::{Deserialize, Serialize};

use crate::domain::escalation::EscalationOutcome;
use crate::domain::routing::Capability;

/// Response envelope for one processed turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub text: String,
    pub capability_used: Capability,
    pub escalation_outcome: Option<EscalationOutcome>,
}

impl AgentReply {
    pub fn new(text: impl Into<String>, capability_used: Capability) -> Self {
        Self { text: text.into(), capability_used, escalation_outcome: None }
    }

    pub fn with_escalation_outcome(mut self, outcome: EscalationOutcome) -> Self {
        self.escalation_outcome = Some(outcome);
        self
    }
}

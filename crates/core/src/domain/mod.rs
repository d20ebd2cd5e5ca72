pub mod escalation;
pub mod reply;
pub mod risk;
pub mod routing;
pub mod session;

pub use escalation::{
    AttemptOutcome, DedupToken, DispatchReceipt, EscalationAttempt, EscalationOutcome,
};
pub use reply::AgentReply;
pub use risk::{RiskEvent, RiskState, RiskTransition, TransitionError, SEVERE_SIGNAL_FLOOR};
pub use routing::{Capability, ReferralEntry, RiskSignal, RoutingDecision};
pub use session::{Role, SessionId, SessionState, Turn};

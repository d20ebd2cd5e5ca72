pub mod config;
pub mod domain;
pub mod errors;

pub use config::{
    AppConfig, ConfigError, ConfigOverrides, ConfirmationPolicy, LoadOptions, LogFormat,
};
pub use domain::escalation::{
    AttemptOutcome, DedupToken, DispatchReceipt, EscalationAttempt, EscalationOutcome,
};
pub use domain::reply::AgentReply;
pub use domain::risk::{RiskEvent, RiskState, RiskTransition, TransitionError};
pub use domain::routing::{Capability, ReferralEntry, RiskSignal, RoutingDecision};
pub use domain::session::{Role, SessionId, SessionState, Turn};
pub use errors::{AdapterError, TurnError};

//! Agent runtime - message routing, escalation control, and conversation state
//!
//! This crate is the decision layer of the haven system - the runtime that:
//! - Classifies free-text messages into {respond, refer, escalate}
//! - Serializes concurrent turns per conversation session
//! - Drives the risk state machine and the emergency dispatch loop
//! - Calls capability adapters (generation, referral directory, dispatch)
//!
//! # Architecture
//!
//! Every turn runs the same constrained loop:
//! 1. **Validation** - empty input is rejected before any state is touched
//! 2. **Classification** (`router`) - pure keyword-tier scoring, risk first
//! 3. **Risk control** (`guard`) - the only code allowed to move `RiskState`
//! 4. **Capability call** (`adapters`) - at most one adapter per turn
//! 5. **Reply assembly** (`runtime`) - both turns appended under one lock
//!
//! # Key Types
//!
//! - `Orchestrator` - per-turn coordinator (see `runtime` module)
//! - `ResponseGenerator` / `ReferralDirectory` / `EmergencyDispatcher` -
//!   pluggable capability traits with typed failures
//! - `EscalationGuard` - retry loop with backoff, ceiling, and dedup token
//!
//! # Safety Principle
//!
//! The language model never decides whether to escalate. Crisis detection and
//! the dispatch decision are deterministic code paths in `router` and `guard`;
//! generation only ever produces the empathetic text around them.

pub mod adapters;
pub mod guard;
pub mod router;
pub mod runtime;
pub mod store;

pub use adapters::{
    EmergencyDispatcher, ReferralDirectory, ResponseGenerator, ScriptedDispatcher,
    StaticDirectory, SupportiveResponder,
};
pub use guard::{EscalationGuard, EscalationPolicy, EscalationResolution};
pub use router::IntentRouter;
pub use runtime::{Orchestrator, SessionSnapshot};
pub use store::ConversationStore;

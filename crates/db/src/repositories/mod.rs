use async_trait::async_trait;
use thiserror::Error;

use haven_core::domain::escalation::EscalationAttempt;
use haven_core::domain::risk::RiskState;
use haven_core::domain::session::{SessionId, Turn};

pub mod memory;
pub mod transcript;

pub use memory::InMemoryTranscriptRepository;
pub use transcript::SqlTranscriptRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable archive for conversation transcripts, escalation attempt logs,
/// and the last known risk state per session. Writers key on natural ids
/// (session + turn index, session + episode + sequence + outcome), so
/// archiving the same snapshot twice lands each row exactly once.
#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    /// Archives a full turn log; the index of each turn in `turns` is its
    /// position in the session. Rows already present are left untouched.
    async fn record_turns(
        &self,
        session_id: &SessionId,
        turns: &[Turn],
    ) -> Result<(), RepositoryError>;

    async fn list_turns(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError>;

    /// The history query: up to `limit` most recent turns, newest first.
    async fn recent_turns(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<Turn>, RepositoryError>;

    async fn turn_count(&self, session_id: &SessionId) -> Result<u64, RepositoryError>;

    async fn record_attempts(
        &self,
        session_id: &SessionId,
        attempts: &[EscalationAttempt],
    ) -> Result<(), RepositoryError>;

    async fn list_attempts(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<EscalationAttempt>, RepositoryError>;

    async fn record_risk(
        &self,
        session_id: &SessionId,
        risk: RiskState,
        episode: u32,
    ) -> Result<(), RepositoryError>;

    async fn load_risk(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<(RiskState, u32)>, RepositoryError>;

    async fn session_ids(&self) -> Result<Vec<SessionId>, RepositoryError>;
}

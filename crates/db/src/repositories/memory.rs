use std::collections::HashMap;

use tokio::sync::RwLock;

use haven_core::domain::escalation::EscalationAttempt;
use haven_core::domain::risk::RiskState;
use haven_core::domain::session::{SessionId, Turn};

use super::{RepositoryError, TranscriptRepository};

/// Archive double for tests and smoke runs; mirrors the SQL repository's
/// idempotency semantics without a database file.
#[derive(Default)]
pub struct InMemoryTranscriptRepository {
    turns: RwLock<HashMap<String, Vec<Turn>>>,
    attempts: RwLock<HashMap<String, Vec<EscalationAttempt>>>,
    risk: RwLock<HashMap<String, (RiskState, u32)>>,
}

#[async_trait::async_trait]
impl TranscriptRepository for InMemoryTranscriptRepository {
    async fn record_turns(
        &self,
        session_id: &SessionId,
        turns: &[Turn],
    ) -> Result<(), RepositoryError> {
        let mut all = self.turns.write().await;
        let log = all.entry(session_id.0.clone()).or_default();
        for (index, turn) in turns.iter().enumerate() {
            if index >= log.len() {
                log.push(turn.clone());
            }
        }
        Ok(())
    }

    async fn list_turns(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError> {
        let all = self.turns.read().await;
        Ok(all.get(&session_id.0).cloned().unwrap_or_default())
    }

    async fn recent_turns(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<Turn>, RepositoryError> {
        let all = self.turns.read().await;
        let log = all.get(&session_id.0).cloned().unwrap_or_default();
        Ok(log.into_iter().rev().take(limit as usize).collect())
    }

    async fn turn_count(&self, session_id: &SessionId) -> Result<u64, RepositoryError> {
        let all = self.turns.read().await;
        Ok(all.get(&session_id.0).map(|log| log.len() as u64).unwrap_or(0))
    }

    async fn record_attempts(
        &self,
        session_id: &SessionId,
        attempts: &[EscalationAttempt],
    ) -> Result<(), RepositoryError> {
        let mut all = self.attempts.write().await;
        let log = all.entry(session_id.0.clone()).or_default();
        for attempt in attempts {
            let seen = log.iter().any(|existing| {
                existing.episode == attempt.episode
                    && existing.sequence == attempt.sequence
                    && existing.outcome == attempt.outcome
            });
            if !seen {
                log.push(attempt.clone());
            }
        }
        Ok(())
    }

    async fn list_attempts(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<EscalationAttempt>, RepositoryError> {
        let all = self.attempts.read().await;
        Ok(all.get(&session_id.0).cloned().unwrap_or_default())
    }

    async fn record_risk(
        &self,
        session_id: &SessionId,
        risk: RiskState,
        episode: u32,
    ) -> Result<(), RepositoryError> {
        let mut all = self.risk.write().await;
        all.insert(session_id.0.clone(), (risk, episode));
        Ok(())
    }

    async fn load_risk(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<(RiskState, u32)>, RepositoryError> {
        let all = self.risk.read().await;
        Ok(all.get(&session_id.0).copied())
    }

    async fn session_ids(&self) -> Result<Vec<SessionId>, RepositoryError> {
        let all = self.turns.read().await;
        let mut ids: Vec<SessionId> = all.keys().cloned().map(SessionId).collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ids)
    }
}

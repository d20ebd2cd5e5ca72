use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use haven_core::domain::escalation::{AttemptOutcome, EscalationAttempt};
use haven_core::domain::risk::RiskState;
use haven_core::domain::routing::Capability;
use haven_core::domain::session::{Role, SessionId, Turn};

use super::{RepositoryError, TranscriptRepository};
use crate::DbPool;

pub struct SqlTranscriptRepository {
    pool: DbPool,
}

impl SqlTranscriptRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TranscriptRepository for SqlTranscriptRepository {
    async fn record_turns(
        &self,
        session_id: &SessionId,
        turns: &[Turn],
    ) -> Result<(), RepositoryError> {
        for (index, turn) in turns.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_turns (
                    session_id,
                    turn_index,
                    role,
                    text,
                    capability_used,
                    created_at
                 ) VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(session_id, turn_index) DO NOTHING",
            )
            .bind(&session_id.0)
            .bind(index as i64)
            .bind(turn.role.as_str())
            .bind(&turn.text)
            .bind(turn.capability_used.map(|capability| capability.as_str()))
            .bind(turn.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn list_turns(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                role,
                text,
                capability_used,
                created_at
             FROM conversation_turns
             WHERE session_id = ?
             ORDER BY turn_index ASC",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(turn_from_row).collect()
    }

    async fn recent_turns(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                role,
                text,
                capability_used,
                created_at
             FROM conversation_turns
             WHERE session_id = ?
             ORDER BY turn_index DESC
             LIMIT ?",
        )
        .bind(&session_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(turn_from_row).collect()
    }

    async fn turn_count(&self, session_id: &SessionId) -> Result<u64, RepositoryError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM conversation_turns WHERE session_id = ?")
                .bind(&session_id.0)
                .fetch_one(&self.pool)
                .await?;

        u64::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("negative turn count `{count}`")))
    }

    async fn record_attempts(
        &self,
        session_id: &SessionId,
        attempts: &[EscalationAttempt],
    ) -> Result<(), RepositoryError> {
        for attempt in attempts {
            sqlx::query(
                "INSERT INTO escalation_attempts (
                    session_id,
                    episode,
                    attempt_seq,
                    outcome,
                    detail,
                    occurred_at
                 ) VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(session_id, episode, attempt_seq, outcome) DO NOTHING",
            )
            .bind(&session_id.0)
            .bind(i64::from(attempt.episode))
            .bind(i64::from(attempt.sequence))
            .bind(attempt.outcome.as_str())
            .bind(attempt.detail.as_deref())
            .bind(attempt.occurred_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn list_attempts(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<EscalationAttempt>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                episode,
                attempt_seq,
                outcome,
                detail,
                occurred_at
             FROM escalation_attempts
             WHERE session_id = ?
             ORDER BY episode ASC, attempt_seq ASC, occurred_at ASC",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(attempt_from_row).collect()
    }

    async fn record_risk(
        &self,
        session_id: &SessionId,
        risk: RiskState,
        episode: u32,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO session_risk (session_id, risk_state, episode, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                risk_state = excluded.risk_state,
                episode = excluded.episode,
                updated_at = excluded.updated_at",
        )
        .bind(&session_id.0)
        .bind(risk.as_str())
        .bind(i64::from(episode))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_risk(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<(RiskState, u32)>, RepositoryError> {
        let row = sqlx::query(
            "SELECT risk_state, episode FROM session_risk WHERE session_id = ?",
        )
        .bind(&session_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let raw = row.try_get::<String, _>("risk_state")?;
            let risk = RiskState::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown risk state `{raw}`")))?;
            let episode = parse_u32("episode", row.try_get("episode")?)?;
            Ok((risk, episode))
        })
        .transpose()
    }

    async fn session_ids(&self) -> Result<Vec<SessionId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT session_id FROM conversation_turns ORDER BY session_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(SessionId(row.try_get("session_id")?)))
            .collect()
    }
}

fn turn_from_row(row: SqliteRow) -> Result<Turn, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown turn role `{role_raw}`")))?;

    let capability_used = row
        .try_get::<Option<String>, _>("capability_used")?
        .map(|value| {
            Capability::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown capability `{value}`")))
        })
        .transpose()?;

    Ok(Turn {
        role,
        text: row.try_get("text")?,
        timestamp: parse_timestamp("created_at", row.try_get("created_at")?)?,
        capability_used,
    })
}

fn attempt_from_row(row: SqliteRow) -> Result<EscalationAttempt, RepositoryError> {
    let outcome_raw = row.try_get::<String, _>("outcome")?;
    let outcome = AttemptOutcome::parse(&outcome_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown attempt outcome `{outcome_raw}`"))
    })?;

    Ok(EscalationAttempt {
        episode: parse_u32("episode", row.try_get("episode")?)?,
        sequence: parse_u32("attempt_seq", row.try_get("attempt_seq")?)?,
        outcome,
        detail: row.try_get("detail")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

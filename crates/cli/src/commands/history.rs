use haven_core::config::{AppConfig, LoadOptions};
use haven_core::domain::session::{SessionId, Turn};
use haven_db::{connect_from_config, SqlTranscriptRepository, TranscriptRepository};

use crate::commands::CommandResult;

pub fn run(session: &str, limit: u32) -> CommandResult {
    let session = session.trim();
    if session.is_empty() {
        return CommandResult::failure("history", "invalid_input", "session id must not be empty", 2);
    }
    if limit == 0 {
        return CommandResult::failure("history", "invalid_input", "limit must be at least 1", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "history",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "history",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.archive)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let repo = SqlTranscriptRepository::new(pool.clone());
        let id = SessionId(session.to_string());
        let outcome = async {
            let total = repo.turn_count(&id).await?;
            let turns = repo.recent_turns(&id, limit).await?;
            Ok::<_, haven_db::RepositoryError>((total, turns))
        }
        .await;

        pool.close().await;
        outcome.map_err(|error| ("archive_read", error.to_string(), 5u8))
    });

    match result {
        Ok((total, turns)) => CommandResult::success("history", render_history(session, total, &turns)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("history", error_class, message, exit_code)
        }
    }
}

fn render_history(session: &str, total: u64, turns: &[Turn]) -> String {
    if turns.is_empty() {
        return format!("no archived turns for session `{session}`");
    }

    let mut lines = vec![format!(
        "showing {} of {total} archived turns for `{session}` (newest first):",
        turns.len()
    )];
    for turn in turns {
        let capability = turn
            .capability_used
            .map(|capability| format!(" [{}]", capability.as_str()))
            .unwrap_or_default();
        lines.push(format!(
            "  {} {}{}: {}",
            turn.timestamp.to_rfc3339(),
            turn.role.as_str(),
            capability,
            turn.text
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use haven_core::domain::routing::Capability;
    use haven_core::domain::session::{Role, Turn};

    use super::render_history;

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[test]
    fn empty_history_reads_as_a_sentence_not_an_error() {
        assert_eq!(render_history("ghost", 0, &[]), "no archived turns for session `ghost`");
    }

    #[test]
    fn rendered_history_labels_roles_and_capabilities() {
        let turns = vec![
            Turn {
                role: Role::Agent,
                text: "That sounds really heavy.".to_string(),
                timestamp: parse_ts("2026-02-23T12:00:02Z"),
                capability_used: Some(Capability::GenerateResponse),
            },
            Turn {
                role: Role::User,
                text: "I feel anxious about work".to_string(),
                timestamp: parse_ts("2026-02-23T12:00:00Z"),
                capability_used: None,
            },
        ];

        let rendered = render_history("alex", 6, &turns);
        assert!(rendered.starts_with("showing 2 of 6 archived turns for `alex` (newest first):"));
        assert!(rendered.contains("agent [generate_response]: That sounds really heavy."));
        assert!(rendered.contains("user: I feel anxious about work"));
    }
}

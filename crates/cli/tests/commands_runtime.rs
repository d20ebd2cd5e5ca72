use std::env;
use std::sync::{Mutex, OnceLock};

use haven_cli::commands::{config, doctor, history, migrate, smoke};
use haven_core::domain::routing::Capability;
use haven_core::domain::session::{SessionId, Turn};
use haven_db::{connect, migrations, SqlTranscriptRepository, TranscriptRepository};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_memory_archive() {
    with_env(&[("HAVEN_ARCHIVE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("applied 1 pending"), "unexpected message: {message}");
    });
}

#[test]
fn migrate_reports_config_failure_for_invalid_threshold() {
    with_env(
        &[
            ("HAVEN_ROUTING_RISK_THRESHOLD", "1.5"),
            ("HAVEN_ARCHIVE_URL", "sqlite::memory:"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn smoke_full_report_passes_with_memory_archive() {
    with_env(&[("HAVEN_ARCHIVE_URL", "sqlite::memory:")], || {
        let result = smoke::run(false);
        assert_eq!(result.exit_code, 0, "expected successful smoke report: {}", result.output);

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");

        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks.len(), 7);
        for check in checks {
            assert_eq!(
                check["status"], "pass",
                "check `{}` should pass: {}",
                check["name"], check["message"]
            );
        }

        let names: Vec<&str> =
            checks.iter().map(|check| check["name"].as_str().unwrap_or("")).collect();
        assert!(names.contains(&"crisis_escalation"));
        assert!(names.contains(&"archive_round_trip"));
    });
}

#[test]
fn smoke_emits_json_only_when_requested() {
    with_env(&[("HAVEN_ARCHIVE_URL", "sqlite::memory:")], || {
        let result = smoke::run(true);
        assert_eq!(result.exit_code, 0, "expected successful smoke report: {}", result.output);
        assert_eq!(result.output.lines().count(), 1, "expected a single JSON line");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");
    });
}

#[test]
fn smoke_fails_fast_when_config_invalid() {
    with_env(&[("HAVEN_ROUTING_RISK_THRESHOLD", "1.5")], || {
        let result = smoke::run(false);
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["status"], "fail");

        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks.len(), 7);
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        for check in &checks[1..] {
            assert_eq!(check["status"], "skipped", "check `{}` should be skipped", check["name"]);
        }
    });
}

#[test]
fn doctor_passes_after_migrate_on_file_archive() {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}/archive.db?mode=rwc", dir.path().display());

    with_env(&[("HAVEN_ARCHIVE_URL", url.as_str())], || {
        let migrate_result = migrate::run();
        assert_eq!(migrate_result.exit_code, 0, "expected migrate to succeed first");

        let output = doctor::run(true);
        let payload: Value = serde_json::from_str(&output).expect("doctor should emit valid JSON");
        assert_eq!(payload["overall_status"], "pass", "doctor output: {output}");

        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks.len(), 5);
        for check in checks {
            assert_eq!(
                check["status"], "pass",
                "check `{}` should pass: {}",
                check["name"], check["details"]
            );
        }
    });
}

#[test]
fn doctor_reports_config_failure_as_structured_output() {
    with_env(&[("HAVEN_ESCALATION_CONFIRMATION_POLICY", "triple-signal")], || {
        let output = doctor::run(true);
        let payload: Value = serde_json::from_str(&output).expect("doctor should emit valid JSON");

        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        for check in &checks[1..] {
            assert_eq!(check["status"], "skipped");
        }
    });
}

#[test]
fn config_summary_redacts_and_attributes_sources() {
    with_env(
        &[
            ("HAVEN_ESCALATION_HELPLINE", "116 123"),
            ("HAVEN_TELEPHONY_ENABLED", "true"),
            ("HAVEN_TELEPHONY_ACCOUNT_SID", "AC-smoke"),
            ("HAVEN_TELEPHONY_AUTH_TOKEN", "tok-secret-123"),
        ],
        || {
            let output = config::run();

            assert!(
                output.contains("- escalation.helpline = 116 123 (source: env (HAVEN_ESCALATION_HELPLINE))"),
                "helpline line missing: {output}"
            );
            assert!(
                output.contains("- routing.risk_threshold = 0.75 (source: default)"),
                "default threshold line missing: {output}"
            );
            assert!(output.contains("telephony.auth_token = tok-***"));
            assert!(!output.contains("tok-secret-123"), "secret leaked into summary");
        },
    );
}

#[test]
fn history_rejects_blank_session_id() {
    with_env(&[], || {
        let result = history::run("   ", 5);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "history");
        assert_eq!(payload["error_class"], "invalid_input");
    });
}

#[test]
fn history_reads_newest_first_with_limit() {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}/archive.db?mode=rwc", dir.path().display());
    seed_archive(&url);

    with_env(&[("HAVEN_ARCHIVE_URL", url.as_str())], || {
        let result = history::run("alex", 2);
        assert_eq!(result.exit_code, 0, "expected history to succeed: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("showing 2 of 3 archived turns"), "unexpected: {message}");

        let newest = message.find("third message").expect("newest turn shown");
        let older = message.find("second message").expect("older turn shown");
        assert!(newest < older, "turns should render newest first");
        assert!(!message.contains("first message"), "limit should drop the oldest turn");
    });
}

#[test]
fn history_reports_empty_for_unknown_session() {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}/archive.db?mode=rwc", dir.path().display());
    seed_archive(&url);

    with_env(&[("HAVEN_ARCHIVE_URL", url.as_str())], || {
        let result = history::run("ghost", 5);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "no archived turns for session `ghost`");
    });
}

#[test]
fn history_fails_with_archive_read_before_migrations() {
    with_env(&[("HAVEN_ARCHIVE_URL", "sqlite::memory:")], || {
        let result = history::run("alex", 5);
        assert_eq!(result.exit_code, 5, "reading an unmigrated archive should fail");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "archive_read");
    });
}

fn seed_archive(url: &str) {
    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    runtime.block_on(async {
        let pool = connect(url).await.expect("connect seed pool");
        migrations::run_pending(&pool).await.expect("run migrations");

        let repo = SqlTranscriptRepository::new(pool.clone());
        let turns = vec![
            Turn::user("first message"),
            Turn::agent("second message", Capability::GenerateResponse),
            Turn::user("third message"),
        ];
        repo.record_turns(&SessionId("alex".to_string()), &turns).await.expect("seed turns");

        pool.close().await;
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "HAVEN_ROUTING_RISK_THRESHOLD",
        "HAVEN_ROUTING_HISTORY_WINDOW",
        "HAVEN_ESCALATION_CONFIRMATION_POLICY",
        "HAVEN_ESCALATION_MAX_DISPATCH_ATTEMPTS",
        "HAVEN_ESCALATION_BACKOFF_BASE_MS",
        "HAVEN_ESCALATION_HELPLINE",
        "HAVEN_ADAPTERS_TIMEOUT_SECS",
        "HAVEN_TELEPHONY_ENABLED",
        "HAVEN_TELEPHONY_ACCOUNT_SID",
        "HAVEN_TELEPHONY_AUTH_TOKEN",
        "HAVEN_ARCHIVE_URL",
        "HAVEN_ARCHIVE_MAX_CONNECTIONS",
        "HAVEN_ARCHIVE_TIMEOUT_SECS",
        "HAVEN_LOGGING_LEVEL",
        "HAVEN_LOGGING_FORMAT",
        "HAVEN_LOG_LEVEL",
        "HAVEN_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

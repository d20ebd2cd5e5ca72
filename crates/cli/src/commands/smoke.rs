use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{ensure, Context};
use serde::Serialize;

use haven_agent::{Orchestrator, ScriptedDispatcher, StaticDirectory, SupportiveResponder};
use haven_core::config::{AppConfig, LoadOptions};
use haven_core::domain::escalation::{AttemptOutcome, EscalationOutcome};
use haven_core::domain::risk::RiskState;
use haven_core::domain::routing::Capability;
use haven_core::domain::session::Role;
use haven_db::{
    connect_from_config, connect_with_settings, migrations, SqlTranscriptRepository,
    TranscriptRepository,
};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            for name in [
                "db_connectivity",
                "migration_visibility",
                "routine_reply",
                "referral_lookup",
                "crisis_escalation",
                "archive_round_trip",
            ] {
                checks.push(skipped(name));
            }
            return finalize_report(checks, started.elapsed().as_millis() as u64, json_output);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            for name in
                ["migration_visibility", "routine_reply", "referral_lookup", "crisis_escalation", "archive_round_trip"]
            {
                checks.push(skipped(name));
            }
            return finalize_report(checks, started.elapsed().as_millis() as u64, json_output);
        }
    };

    let db_started = Instant::now();
    match runtime.block_on(connect_from_config(&config.archive)) {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected using `{}`", config.archive.url),
            });

            let migration_started = Instant::now();
            let migration_result = runtime.block_on(async {
                let result = migrations::run_pending(&pool).await;
                pool.close().await;
                result
            });
            checks.push(match migration_result {
                Ok(()) => SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Pass,
                    elapsed_ms: migration_started.elapsed().as_millis() as u64,
                    message: "migrations are visible and executable".to_string(),
                },
                Err(error) => SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Fail,
                    elapsed_ms: migration_started.elapsed().as_millis() as u64,
                    message: format!("migration execution failed: {error}"),
                },
            });
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
        }
    }

    // Conversation scenarios run against in-process adapters and an
    // in-memory archive, so they still execute when the configured archive
    // is unreachable.
    checks.extend(runtime.block_on(conversation_scenarios(&config)));

    finalize_report(checks, started.elapsed().as_millis() as u64, json_output)
}

async fn conversation_scenarios(config: &AppConfig) -> Vec<SmokeCheck> {
    let dispatcher = Arc::new(ScriptedDispatcher::succeeding());
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(SupportiveResponder::new()),
        Arc::new(StaticDirectory::with_defaults()),
        dispatcher.clone(),
    );

    vec![
        run_scenario("routine_reply", routine_reply(&orchestrator)).await,
        run_scenario("referral_lookup", referral_lookup(&orchestrator)).await,
        run_scenario("crisis_escalation", crisis_escalation(&orchestrator, &dispatcher)).await,
        run_scenario("archive_round_trip", archive_round_trip(&orchestrator)).await,
    ]
}

async fn run_scenario(
    name: &'static str,
    scenario: impl Future<Output = anyhow::Result<String>>,
) -> SmokeCheck {
    let started = Instant::now();
    match scenario.await {
        Ok(message) => SmokeCheck {
            name,
            status: SmokeStatus::Pass,
            elapsed_ms: started.elapsed().as_millis() as u64,
            message,
        },
        Err(error) => SmokeCheck {
            name,
            status: SmokeStatus::Fail,
            elapsed_ms: started.elapsed().as_millis() as u64,
            message: format!("{error:#}"),
        },
    }
}

async fn routine_reply(orchestrator: &Orchestrator) -> anyhow::Result<String> {
    let reply = orchestrator.process_turn("smoke-routine", "I feel anxious about work").await?;
    ensure!(
        reply.capability_used == Capability::GenerateResponse,
        "expected generate_response, got {}",
        reply.capability_used.as_str()
    );
    ensure!(
        reply.escalation_outcome.is_none(),
        "routine turn must not carry an escalation outcome"
    );

    let risk = orchestrator.risk_state("smoke-routine").await;
    ensure!(risk == Some(RiskState::Normal), "routine turn should leave risk normal, got {risk:?}");
    Ok("routine message answered with risk still normal".to_string())
}

async fn referral_lookup(orchestrator: &Orchestrator) -> anyhow::Result<String> {
    let reply = orchestrator
        .process_turn("smoke-referral", "Can you recommend a therapist in Springfield?")
        .await?;
    ensure!(
        reply.capability_used == Capability::FindReferral,
        "expected find_referral, got {}",
        reply.capability_used.as_str()
    );
    ensure!(
        reply.text.contains("Maya Chen"),
        "referral reply should list the Springfield directory"
    );
    Ok("referral request answered from the directory".to_string())
}

async fn crisis_escalation(
    orchestrator: &Orchestrator,
    dispatcher: &ScriptedDispatcher,
) -> anyhow::Result<String> {
    let reply = orchestrator.process_turn("smoke-crisis", "I want to end my life").await?;
    ensure!(
        reply.capability_used == Capability::DispatchEmergency,
        "expected dispatch_emergency, got {}",
        reply.capability_used.as_str()
    );
    ensure!(
        reply.escalation_outcome == Some(EscalationOutcome::Succeeded),
        "expected a successful dispatch, got {:?}",
        reply.escalation_outcome
    );
    ensure!(
        dispatcher.receipt_count() == 1,
        "exactly one receipt expected, got {}",
        dispatcher.receipt_count()
    );

    let attempts = orchestrator.attempts("smoke-crisis").await;
    let outcomes: Vec<AttemptOutcome> = attempts.iter().map(|attempt| attempt.outcome).collect();
    ensure!(
        outcomes == [AttemptOutcome::Pending, AttemptOutcome::Succeeded],
        "attempt log should hold one pending and one succeeded record, got {outcomes:?}"
    );

    let risk = orchestrator.risk_state("smoke-crisis").await;
    ensure!(
        risk == Some(RiskState::Escalated),
        "crisis session should end escalated, got {risk:?}"
    );
    Ok("crisis message dispatched exactly once and logged".to_string())
}

async fn archive_round_trip(orchestrator: &Orchestrator) -> anyhow::Result<String> {
    let snapshot = orchestrator
        .snapshot("smoke-crisis")
        .await
        .context("crisis scenario must run before the archive round trip")?;

    // One connection keeps the whole round trip on a single in-memory
    // database; every pool connection to `sqlite::memory:` is its own.
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await?;
    migrations::run_pending(&pool).await?;
    let repo = SqlTranscriptRepository::new(pool.clone());

    repo.record_turns(&snapshot.id, &snapshot.turns).await?;
    repo.record_attempts(&snapshot.id, &snapshot.attempts).await?;
    repo.record_risk(&snapshot.id, snapshot.risk, snapshot.episode).await?;

    let archived_turns = repo.list_turns(&snapshot.id).await?;
    ensure!(archived_turns == snapshot.turns, "archived turns should round trip unchanged");

    let newest = repo.recent_turns(&snapshot.id, 1).await?;
    ensure!(
        newest.first().map(|turn| turn.role) == Some(Role::Agent),
        "newest archived turn should be the agent reply"
    );

    let archived_attempts = repo.list_attempts(&snapshot.id).await?;
    ensure!(
        archived_attempts.len() == snapshot.attempts.len(),
        "attempt log should archive every record"
    );
    ensure!(
        repo.load_risk(&snapshot.id).await? == Some((snapshot.risk, snapshot.episode)),
        "risk state should round trip"
    );

    pool.close().await;
    Ok(format!(
        "session archived and read back ({} turns, {} attempt records)",
        archived_turns.len(),
        archived_attempts.len()
    ))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped after an earlier failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64, json_output: bool) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    let output = if json_output { machine } else { format!("{}\n{machine}", report.summary) };
    CommandResult { exit_code: if failed { 6 } else { 0 }, output }
}

use haven_core::config::{AppConfig, LoadOptions};
use haven_db::{connect_from_config, migrations};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_escalation_policy(&config));
            checks.push(check_telephony(&config));
            checks.extend(archive_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in
                ["escalation_policy", "telephony_readiness", "archive_connectivity", "migration_status"]
            {
                checks.push(skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_escalation_policy(config: &AppConfig) -> DoctorCheck {
    // Signals score at most 1.0 and escalation requires strictly exceeding
    // the threshold, so 1.0 disables first-contact escalation entirely.
    if config.routing.risk_threshold >= 1.0 {
        return DoctorCheck {
            name: "escalation_policy",
            status: CheckStatus::Fail,
            details: "routing.risk_threshold is 1.0; no signal can score above it".to_string(),
        };
    }

    DoctorCheck {
        name: "escalation_policy",
        status: CheckStatus::Pass,
        details: format!(
            "{} confirmation, dispatch ceiling {}, helpline {}",
            config.escalation.confirmation_policy.as_str(),
            config.escalation.max_dispatch_attempts,
            config.escalation.helpline
        ),
    }
}

fn check_telephony(config: &AppConfig) -> DoctorCheck {
    if !config.telephony.enabled {
        return DoctorCheck {
            name: "telephony_readiness",
            status: CheckStatus::Pass,
            details: "telephony disabled; dispatch stays on the built-in adapter".to_string(),
        };
    }

    DoctorCheck {
        name: "telephony_readiness",
        status: CheckStatus::Pass,
        details: format!(
            "credentials present for account `{}` (validated by config contract)",
            config.telephony.account_sid
        ),
    }
}

fn archive_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "archive_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("migration_status", "skipped because the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.archive).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "archive_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to archive: {error}"),
                    },
                    skipped("migration_status", "skipped because the archive is unreachable"),
                ];
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "archive_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.archive.url),
        }];

        checks.push(match migrations::pending_count(&pool).await {
            Ok(0) => DoctorCheck {
                name: "migration_status",
                status: CheckStatus::Pass,
                details: "archive schema is current".to_string(),
            },
            Ok(pending) => DoctorCheck {
                name: "migration_status",
                status: CheckStatus::Fail,
                details: format!("{pending} migration(s) pending; run `haven migrate`"),
            },
            Err(error) => DoctorCheck {
                name: "migration_status",
                status: CheckStatus::Fail,
                details: format!("could not read migration state: {error}"),
            },
        });

        pool.close().await;
        checks
    })
}

fn skipped(name: &'static str, details: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: details.to_string() }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

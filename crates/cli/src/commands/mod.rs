pub mod config;
pub mod doctor;
pub mod history;
pub mod migrate;
pub mod smoke;

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum OutcomeStatus {
    Ok,
    Error,
}

/// One-line JSON envelope every subcommand emits, so operators and scripts
/// parse the same shape regardless of which command ran.
#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: &'static str,
    status: OutcomeStatus,
    error_class: Option<&'static str>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &'static str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command,
            status: OutcomeStatus::Ok,
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &'static str,
        error_class: &'static str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command,
            status: OutcomeStatus::Error,
            error_class: Some(error_class),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

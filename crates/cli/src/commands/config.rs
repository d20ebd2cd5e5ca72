use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use haven_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let line = |key: &str, value: &str, env_key: &str| -> String {
        let source = field_source(
            key,
            Some(env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        render_line(key, value, source)
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(line(
        "routing.risk_threshold",
        &config.routing.risk_threshold.to_string(),
        "HAVEN_ROUTING_RISK_THRESHOLD",
    ));
    lines.push(line(
        "routing.history_window",
        &config.routing.history_window.to_string(),
        "HAVEN_ROUTING_HISTORY_WINDOW",
    ));

    lines.push(line(
        "escalation.confirmation_policy",
        config.escalation.confirmation_policy.as_str(),
        "HAVEN_ESCALATION_CONFIRMATION_POLICY",
    ));
    lines.push(line(
        "escalation.max_dispatch_attempts",
        &config.escalation.max_dispatch_attempts.to_string(),
        "HAVEN_ESCALATION_MAX_DISPATCH_ATTEMPTS",
    ));
    lines.push(line(
        "escalation.backoff_base_ms",
        &config.escalation.backoff_base_ms.to_string(),
        "HAVEN_ESCALATION_BACKOFF_BASE_MS",
    ));
    lines.push(line(
        "escalation.helpline",
        &config.escalation.helpline,
        "HAVEN_ESCALATION_HELPLINE",
    ));

    lines.push(line(
        "adapters.timeout_secs",
        &config.adapters.timeout_secs.to_string(),
        "HAVEN_ADAPTERS_TIMEOUT_SECS",
    ));

    lines.push(line(
        "telephony.enabled",
        &config.telephony.enabled.to_string(),
        "HAVEN_TELEPHONY_ENABLED",
    ));
    let account_sid = if config.telephony.account_sid.trim().is_empty() {
        "<unset>"
    } else {
        config.telephony.account_sid.as_str()
    };
    lines.push(line("telephony.account_sid", account_sid, "HAVEN_TELEPHONY_ACCOUNT_SID"));
    let auth_token = match &config.telephony.auth_token {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };
    lines.push(line("telephony.auth_token", &auth_token, "HAVEN_TELEPHONY_AUTH_TOKEN"));

    lines.push(line("archive.url", &config.archive.url, "HAVEN_ARCHIVE_URL"));
    lines.push(line(
        "archive.max_connections",
        &config.archive.max_connections.to_string(),
        "HAVEN_ARCHIVE_MAX_CONNECTIONS",
    ));
    lines.push(line(
        "archive.timeout_secs",
        &config.archive.timeout_secs.to_string(),
        "HAVEN_ARCHIVE_TIMEOUT_SECS",
    ));

    lines.push(line("logging.level", &config.logging.level, "HAVEN_LOGGING_LEVEL"));
    lines.push(line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        "HAVEN_LOGGING_FORMAT",
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("haven.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/haven.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub routing: RoutingConfig,
    pub escalation: EscalationConfig,
    pub adapters: AdaptersConfig,
    pub telephony: TelephonyConfig,
    pub archive: ArchiveConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub risk_threshold: f32,
    pub history_window: u32,
}

#[derive(Clone, Debug)]
pub struct EscalationConfig {
    pub confirmation_policy: ConfirmationPolicy,
    pub max_dispatch_attempts: u32,
    pub backoff_base_ms: u64,
    pub helpline: String,
}

#[derive(Clone, Debug)]
pub struct AdaptersConfig {
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelephonyConfig {
    pub enabled: bool,
    pub account_sid: String,
    pub auth_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct ArchiveConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmationPolicy {
    SingleSignal,
    DoubleSignal,
}

impl ConfirmationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleSignal => "single-signal",
            Self::DoubleSignal => "double-signal",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub archive_url: Option<String>,
    pub log_level: Option<String>,
    pub risk_threshold: Option<f32>,
    pub confirmation_policy: Option<ConfirmationPolicy>,
    pub helpline: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig { risk_threshold: 0.75, history_window: 8 },
            escalation: EscalationConfig {
                confirmation_policy: ConfirmationPolicy::DoubleSignal,
                max_dispatch_attempts: 3,
                backoff_base_ms: 250,
                helpline: "988".to_string(),
            },
            adapters: AdaptersConfig { timeout_secs: 20 },
            telephony: TelephonyConfig {
                enabled: false,
                account_sid: String::new(),
                auth_token: None,
            },
            archive: ArchiveConfig {
                url: "sqlite://haven.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ConfirmationPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single-signal" | "single_signal" => Ok(Self::SingleSignal),
            "double-signal" | "double_signal" => Ok(Self::DoubleSignal),
            other => Err(ConfigError::Validation(format!(
                "unsupported confirmation policy `{other}` (expected single-signal|double-signal)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("haven.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(routing) = patch.routing {
            if let Some(risk_threshold) = routing.risk_threshold {
                self.routing.risk_threshold = risk_threshold;
            }
            if let Some(history_window) = routing.history_window {
                self.routing.history_window = history_window;
            }
        }

        if let Some(escalation) = patch.escalation {
            if let Some(confirmation_policy) = escalation.confirmation_policy {
                self.escalation.confirmation_policy = confirmation_policy;
            }
            if let Some(max_dispatch_attempts) = escalation.max_dispatch_attempts {
                self.escalation.max_dispatch_attempts = max_dispatch_attempts;
            }
            if let Some(backoff_base_ms) = escalation.backoff_base_ms {
                self.escalation.backoff_base_ms = backoff_base_ms;
            }
            if let Some(helpline) = escalation.helpline {
                self.escalation.helpline = helpline;
            }
        }

        if let Some(adapters) = patch.adapters {
            if let Some(timeout_secs) = adapters.timeout_secs {
                self.adapters.timeout_secs = timeout_secs;
            }
        }

        if let Some(telephony) = patch.telephony {
            if let Some(enabled) = telephony.enabled {
                self.telephony.enabled = enabled;
            }
            if let Some(account_sid) = telephony.account_sid {
                self.telephony.account_sid = account_sid;
            }
            if let Some(auth_token_value) = telephony.auth_token {
                self.telephony.auth_token = Some(secret_value(auth_token_value));
            }
        }

        if let Some(archive) = patch.archive {
            if let Some(url) = archive.url {
                self.archive.url = url;
            }
            if let Some(max_connections) = archive.max_connections {
                self.archive.max_connections = max_connections;
            }
            if let Some(timeout_secs) = archive.timeout_secs {
                self.archive.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HAVEN_ROUTING_RISK_THRESHOLD") {
            self.routing.risk_threshold = parse_f32("HAVEN_ROUTING_RISK_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("HAVEN_ROUTING_HISTORY_WINDOW") {
            self.routing.history_window = parse_u32("HAVEN_ROUTING_HISTORY_WINDOW", &value)?;
        }

        if let Some(value) = read_env("HAVEN_ESCALATION_CONFIRMATION_POLICY") {
            self.escalation.confirmation_policy = value.parse()?;
        }
        if let Some(value) = read_env("HAVEN_ESCALATION_MAX_DISPATCH_ATTEMPTS") {
            self.escalation.max_dispatch_attempts =
                parse_u32("HAVEN_ESCALATION_MAX_DISPATCH_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("HAVEN_ESCALATION_BACKOFF_BASE_MS") {
            self.escalation.backoff_base_ms =
                parse_u64("HAVEN_ESCALATION_BACKOFF_BASE_MS", &value)?;
        }
        if let Some(value) = read_env("HAVEN_ESCALATION_HELPLINE") {
            self.escalation.helpline = value;
        }

        if let Some(value) = read_env("HAVEN_ADAPTERS_TIMEOUT_SECS") {
            self.adapters.timeout_secs = parse_u64("HAVEN_ADAPTERS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HAVEN_TELEPHONY_ENABLED") {
            self.telephony.enabled = parse_bool("HAVEN_TELEPHONY_ENABLED", &value)?;
        }
        if let Some(value) = read_env("HAVEN_TELEPHONY_ACCOUNT_SID") {
            self.telephony.account_sid = value;
        }
        if let Some(value) = read_env("HAVEN_TELEPHONY_AUTH_TOKEN") {
            self.telephony.auth_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("HAVEN_ARCHIVE_URL") {
            self.archive.url = value;
        }
        if let Some(value) = read_env("HAVEN_ARCHIVE_MAX_CONNECTIONS") {
            self.archive.max_connections = parse_u32("HAVEN_ARCHIVE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HAVEN_ARCHIVE_TIMEOUT_SECS") {
            self.archive.timeout_secs = parse_u64("HAVEN_ARCHIVE_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("HAVEN_LOGGING_LEVEL").or_else(|| read_env("HAVEN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("HAVEN_LOGGING_FORMAT").or_else(|| read_env("HAVEN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(archive_url) = overrides.archive_url {
            self.archive.url = archive_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(risk_threshold) = overrides.risk_threshold {
            self.routing.risk_threshold = risk_threshold;
        }
        if let Some(confirmation_policy) = overrides.confirmation_policy {
            self.escalation.confirmation_policy = confirmation_policy;
        }
        if let Some(helpline) = overrides.helpline {
            self.escalation.helpline = helpline;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_routing(&self.routing)?;
        validate_escalation(&self.escalation)?;
        validate_adapters(&self.adapters)?;
        validate_telephony(&self.telephony)?;
        validate_archive(&self.archive)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("haven.toml"), PathBuf::from("config/haven.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if !(routing.risk_threshold > 0.0 && routing.risk_threshold <= 1.0) {
        return Err(ConfigError::Validation(
            "routing.risk_threshold must be within (0.0, 1.0]".to_string(),
        ));
    }

    if routing.history_window == 0 || routing.history_window > 100 {
        return Err(ConfigError::Validation(
            "routing.history_window must be in range 1..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_escalation(escalation: &EscalationConfig) -> Result<(), ConfigError> {
    if escalation.max_dispatch_attempts == 0 || escalation.max_dispatch_attempts > 10 {
        return Err(ConfigError::Validation(
            "escalation.max_dispatch_attempts must be in range 1..=10".to_string(),
        ));
    }

    if escalation.backoff_base_ms == 0 || escalation.backoff_base_ms > 60_000 {
        return Err(ConfigError::Validation(
            "escalation.backoff_base_ms must be in range 1..=60000".to_string(),
        ));
    }

    if escalation.helpline.trim().is_empty() {
        return Err(ConfigError::Validation(
            "escalation.helpline must not be empty; degraded replies depend on it".to_string(),
        ));
    }

    Ok(())
}

fn validate_adapters(adapters: &AdaptersConfig) -> Result<(), ConfigError> {
    if adapters.timeout_secs == 0 || adapters.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "adapters.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_telephony(telephony: &TelephonyConfig) -> Result<(), ConfigError> {
    if !telephony.enabled {
        return Ok(());
    }

    if telephony.account_sid.trim().is_empty() {
        return Err(ConfigError::Validation(
            "telephony.account_sid is required when telephony.enabled is true".to_string(),
        ));
    }

    let token_missing = telephony
        .auth_token
        .as_ref()
        .map(|token| token.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if token_missing {
        return Err(ConfigError::Validation(
            "telephony.auth_token is required when telephony.enabled is true".to_string(),
        ));
    }

    Ok(())
}

fn validate_archive(archive: &ArchiveConfig) -> Result<(), ConfigError> {
    let url = archive.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "archive.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if archive.max_connections == 0 {
        return Err(ConfigError::Validation(
            "archive.max_connections must be greater than zero".to_string(),
        ));
    }

    if archive.timeout_secs == 0 || archive.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "archive.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    routing: Option<RoutingPatch>,
    escalation: Option<EscalationPatch>,
    adapters: Option<AdaptersPatch>,
    telephony: Option<TelephonyPatch>,
    archive: Option<ArchivePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    risk_threshold: Option<f32>,
    history_window: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EscalationPatch {
    confirmation_policy: Option<ConfirmationPolicy>,
    max_dispatch_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    helpline: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AdaptersPatch {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelephonyPatch {
    enabled: Option<bool>,
    account_sid: Option<String>,
    auth_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

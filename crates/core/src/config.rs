use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schedule::{BusinessHours, TimeOfDay};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub ai: AiConfig,
    pub bot: BotConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub session_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct AiConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub fallback: Option<AiEndpointConfig>,
}

#[derive(Clone, Debug)]
pub struct AiEndpointConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct BotConfig {
    pub name: String,
    pub brand_name: String,
    pub hours_start: String,
    pub hours_end: String,
    pub working_days: Vec<u8>,
    pub slot_interval_minutes: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub session_path: Option<PathBuf>,
    pub ai_api_key: Option<String>,
    pub ai_base_url: Option<String>,
    pub ai_model: Option<String>,
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
            database: DatabaseConfig {
                url: "sqlite://leadflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            whatsapp: WhatsAppConfig { session_path: PathBuf::from("./.wwebjs_auth") },
            ai: AiConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
                fallback: None,
            },
            bot: BotConfig {
                name: "LeadFlow".to_string(),
                brand_name: "LeadFlow".to_string(),
                hours_start: "09:00".to_string(),
                hours_end: "18:00".to_string(),
                working_days: vec![1, 2, 3, 4, 5, 6],
                slot_interval_minutes: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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

impl BotConfig {
    /// The validated attendance window. Call only after `AppConfig::load`
    /// (or `validate`) succeeded; falls back to the defaults otherwise.
    pub fn business_hours(&self) -> BusinessHours {
        let defaults = BusinessHours::default();
        BusinessHours {
            start: self.hours_start.parse().unwrap_or(defaults.start),
            end: self.hours_end.parse().unwrap_or(defaults.end),
            working_days: self.working_days.clone(),
            slot_interval_minutes: self.slot_interval_minutes,
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(session_path) = whatsapp.session_path {
                self.whatsapp.session_path = session_path;
            }
        }

        if let Some(ai) = patch.ai {
            if let Some(api_key_value) = ai.api_key {
                self.ai.api_key = Some(api_key_value.into());
            }
            if let Some(base_url) = ai.base_url {
                self.ai.base_url = base_url;
            }
            if let Some(model) = ai.model {
                self.ai.model = model;
            }
            if let Some(timeout_secs) = ai.timeout_secs {
                self.ai.timeout_secs = timeout_secs;
            }
            if let Some(fallback) = ai.fallback {
                self.ai.fallback = Some(AiEndpointConfig {
                    api_key: fallback.api_key.map(SecretString::from),
                    base_url: fallback
                        .base_url
                        .unwrap_or_else(|| self.ai.base_url.clone()),
                    model: fallback.model.unwrap_or_else(|| self.ai.model.clone()),
                });
            }
        }

        if let Some(bot) = patch.bot {
            if let Some(name) = bot.name {
                self.bot.name = name;
            }
            if let Some(brand_name) = bot.brand_name {
                self.bot.brand_name = brand_name;
            }
            if let Some(hours_start) = bot.hours_start {
                self.bot.hours_start = hours_start;
            }
            if let Some(hours_end) = bot.hours_end {
                self.bot.hours_end = hours_end;
            }
            if let Some(working_days) = bot.working_days {
                self.bot.working_days = working_days;
            }
            if let Some(slot_interval_minutes) = bot.slot_interval_minutes {
                self.bot.slot_interval_minutes = slot_interval_minutes;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("LEADFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_WHATSAPP_SESSION_PATH") {
            self.whatsapp.session_path = PathBuf::from(value);
        }

        if let Some(value) = read_env("LEADFLOW_AI_API_KEY") {
            self.ai.api_key = Some(value.into());
        }
        if let Some(value) = read_env("LEADFLOW_AI_BASE_URL") {
            self.ai.base_url = value;
        }
        if let Some(value) = read_env("LEADFLOW_AI_MODEL") {
            self.ai.model = value;
        }
        if let Some(value) = read_env("LEADFLOW_AI_TIMEOUT_SECS") {
            self.ai.timeout_secs = parse_u64("LEADFLOW_AI_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_BOT_NAME") {
            self.bot.name = value;
        }
        if let Some(value) = read_env("LEADFLOW_BOT_BRAND_NAME") {
            self.bot.brand_name = value;
        }
        if let Some(value) = read_env("LEADFLOW_BUSINESS_HOURS_START") {
            self.bot.hours_start = value;
        }
        if let Some(value) = read_env("LEADFLOW_BUSINESS_HOURS_END") {
            self.bot.hours_end = value;
        }
        if let Some(value) = read_env("LEADFLOW_WORKING_DAYS") {
            self.bot.working_days = parse_working_days("LEADFLOW_WORKING_DAYS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADFLOW_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("LEADFLOW_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        let log_level =
            read_env("LEADFLOW_LOGGING_LEVEL").or_else(|| read_env("LEADFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADFLOW_LOGGING_FORMAT").or_else(|| read_env("LEADFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(session_path) = overrides.session_path {
            self.whatsapp.session_path = session_path;
        }
        if let Some(ai_api_key) = overrides.ai_api_key {
            self.ai.api_key = Some(ai_api_key.into());
        }
        if let Some(ai_base_url) = overrides.ai_base_url {
            self.ai.base_url = ai_base_url;
        }
        if let Some(ai_model) = overrides.ai_model {
            self.ai.model = ai_model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_ai(&self.ai)?;
        validate_bot(&self.bot)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadflow.toml"), PathBuf::from("config/leadflow.toml")]
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_ai(ai: &AiConfig) -> Result<(), ConfigError> {
    if ai.timeout_secs == 0 || ai.timeout_secs > 300 {
        return Err(ConfigError::Validation("ai.timeout_secs must be in range 1..=300".to_string()));
    }

    if ai.base_url.trim().is_empty() {
        return Err(ConfigError::Validation("ai.base_url must not be empty".to_string()));
    }

    if let Some(api_key) = &ai.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation("ai.api_key must not be blank".to_string()));
        }
    }

    Ok(())
}

fn validate_bot(bot: &BotConfig) -> Result<(), ConfigError> {
    let start: TimeOfDay = bot.hours_start.parse().map_err(|_| {
        ConfigError::Validation(format!("bot.hours_start is not a valid HH:MM time: `{}`", bot.hours_start))
    })?;
    let end: TimeOfDay = bot.hours_end.parse().map_err(|_| {
        ConfigError::Validation(format!("bot.hours_end is not a valid HH:MM time: `{}`", bot.hours_end))
    })?;

    if start >= end {
        return Err(ConfigError::Validation(
            "bot.hours_start must be earlier than bot.hours_end".to_string(),
        ));
    }

    if bot.working_days.is_empty() {
        return Err(ConfigError::Validation(
            "bot.working_days must list at least one day (0=Sunday..6=Saturday)".to_string(),
        ));
    }
    if bot.working_days.iter().any(|day| *day > 6) {
        return Err(ConfigError::Validation(
            "bot.working_days entries must be in range 0..=6".to_string(),
        ));
    }

    if bot.slot_interval_minutes == 0 || bot.slot_interval_minutes > 240 {
        return Err(ConfigError::Validation(
            "bot.slot_interval_minutes must be in range 1..=240".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
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

fn parse_working_days(key: &str, value: &str) -> Result<Vec<u8>, ConfigError> {
    value
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value: value.to_string(),
        })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    whatsapp: Option<WhatsAppPatch>,
    ai: Option<AiPatch>,
    bot: Option<BotPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    session_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct AiPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    fallback: Option<AiEndpointPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AiEndpointPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BotPatch {
    name: Option<String>,
    brand_name: Option<String>,
    hours_start: Option<String>,
    hours_end: Option<String>,
    working_days: Option<Vec<u8>>,
    slot_interval_minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

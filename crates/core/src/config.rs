use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reservation::slots::{SlotError, TimeSlotGrid};

pub const DEFAULT_CONFIG_FILE: &str = "maitre.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub bridge: BridgeConfig,
    pub dialogue: DialogueConfig,
    pub reservation: ReservationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub seed_demo_tables: bool,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
}

/// External interpreter/executor service.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub metadata_ttl_secs: u64,
    /// Actions that always go through the token handshake, merged with the
    /// service's own metadata.
    pub confirmation_actions: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    pub pacing_enabled: bool,
    pub read_ack_max_ms: u64,
    pub reading_ms_per_char: u64,
    pub thinking_max_ms: u64,
    pub typing_ms_per_char: u64,
    pub max_history_turns: usize,
    pub session_idle_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ReservationConfig {
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub utc_offset_hours: i32,
    pub service_windows: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
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
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub bridge_enabled: Option<bool>,
    pub bridge_base_url: Option<String>,
    pub pacing_enabled: Option<bool>,
    pub server_port: Option<u16>,
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
                url: "sqlite://maitre.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                seed_demo_tables: true,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                max_tokens: 1024,
            },
            bridge: BridgeConfig {
                enabled: false,
                base_url: None,
                api_key: None,
                timeout_secs: 10,
                metadata_ttl_secs: 60,
                confirmation_actions: vec!["assign_table".to_string(), "close_order".to_string()],
            },
            dialogue: DialogueConfig {
                pacing_enabled: true,
                read_ack_max_ms: 1_500,
                reading_ms_per_char: 60,
                thinking_max_ms: 4_000,
                typing_ms_per_char: 80,
                max_history_turns: 20,
                session_idle_secs: 1_800,
            },
            reservation: ReservationConfig {
                restaurant_id: "main".to_string(),
                restaurant_name: "Maitre Bistro".to_string(),
                utc_offset_hours: 8,
                service_windows: vec!["11:00-14:00".to_string(), "17:00-21:00".to_string()],
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
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

impl ReservationConfig {
    pub fn grid(&self) -> Result<TimeSlotGrid, SlotError> {
        TimeSlotGrid::parse(&self.service_windows)
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3_600).unwrap_or_else(|| Utc.fix())
    }

    /// Calendar date at the restaurant.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.utc_offset()).date_naive()
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            set(&mut self.database.url, database.url);
            set(&mut self.database.max_connections, database.max_connections);
            set(&mut self.database.timeout_secs, database.timeout_secs);
            set(&mut self.database.seed_demo_tables, database.seed_demo_tables);
        }

        if let Some(llm) = patch.llm {
            set(&mut self.llm.provider, llm.provider);
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            set(&mut self.llm.model, llm.model);
            set(&mut self.llm.timeout_secs, llm.timeout_secs);
            set(&mut self.llm.max_retries, llm.max_retries);
            set(&mut self.llm.max_tokens, llm.max_tokens);
        }

        if let Some(bridge) = patch.bridge {
            set(&mut self.bridge.enabled, bridge.enabled);
            if let Some(base_url) = bridge.base_url {
                self.bridge.base_url = Some(base_url);
            }
            if let Some(bridge_api_key_value) = bridge.api_key {
                self.bridge.api_key = Some(secret_value(bridge_api_key_value));
            }
            set(&mut self.bridge.timeout_secs, bridge.timeout_secs);
            set(&mut self.bridge.metadata_ttl_secs, bridge.metadata_ttl_secs);
            set(&mut self.bridge.confirmation_actions, bridge.confirmation_actions);
        }

        if let Some(dialogue) = patch.dialogue {
            set(&mut self.dialogue.pacing_enabled, dialogue.pacing_enabled);
            set(&mut self.dialogue.read_ack_max_ms, dialogue.read_ack_max_ms);
            set(&mut self.dialogue.reading_ms_per_char, dialogue.reading_ms_per_char);
            set(&mut self.dialogue.thinking_max_ms, dialogue.thinking_max_ms);
            set(&mut self.dialogue.typing_ms_per_char, dialogue.typing_ms_per_char);
            set(&mut self.dialogue.max_history_turns, dialogue.max_history_turns);
            set(&mut self.dialogue.session_idle_secs, dialogue.session_idle_secs);
        }

        if let Some(reservation) = patch.reservation {
            set(&mut self.reservation.restaurant_id, reservation.restaurant_id);
            set(&mut self.reservation.restaurant_name, reservation.restaurant_name);
            set(&mut self.reservation.utc_offset_hours, reservation.utc_offset_hours);
            set(&mut self.reservation.service_windows, reservation.service_windows);
        }

        if let Some(server) = patch.server {
            set(&mut self.server.bind_address, server.bind_address);
            set(&mut self.server.port, server.port);
            set(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }

        if let Some(logging) = patch.logging {
            set(&mut self.logging.level, logging.level);
            set(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MAITRE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("MAITRE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("MAITRE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("MAITRE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("MAITRE_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MAITRE_DATABASE_SEED_DEMO_TABLES") {
            self.database.seed_demo_tables = parse_bool("MAITRE_DATABASE_SEED_DEMO_TABLES", &value)?;
        }

        if let Some(value) = read_env("MAITRE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("MAITRE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("MAITRE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("MAITRE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("MAITRE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("MAITRE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MAITRE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("MAITRE_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("MAITRE_BRIDGE_ENABLED") {
            self.bridge.enabled = parse_bool("MAITRE_BRIDGE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("MAITRE_BRIDGE_BASE_URL") {
            self.bridge.base_url = Some(value);
        }
        if let Some(value) = read_env("MAITRE_BRIDGE_API_KEY") {
            self.bridge.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("MAITRE_BRIDGE_TIMEOUT_SECS") {
            self.bridge.timeout_secs = parse_u64("MAITRE_BRIDGE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MAITRE_BRIDGE_METADATA_TTL_SECS") {
            self.bridge.metadata_ttl_secs = parse_u64("MAITRE_BRIDGE_METADATA_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("MAITRE_BRIDGE_CONFIRMATION_ACTIONS") {
            self.bridge.confirmation_actions = split_list(&value);
        }

        if let Some(value) = read_env("MAITRE_DIALOGUE_PACING_ENABLED") {
            self.dialogue.pacing_enabled = parse_bool("MAITRE_DIALOGUE_PACING_ENABLED", &value)?;
        }
        if let Some(value) = read_env("MAITRE_DIALOGUE_READ_ACK_MAX_MS") {
            self.dialogue.read_ack_max_ms = parse_u64("MAITRE_DIALOGUE_READ_ACK_MAX_MS", &value)?;
        }
        if let Some(value) = read_env("MAITRE_DIALOGUE_READING_MS_PER_CHAR") {
            self.dialogue.reading_ms_per_char =
                parse_u64("MAITRE_DIALOGUE_READING_MS_PER_CHAR", &value)?;
        }
        if let Some(value) = read_env("MAITRE_DIALOGUE_THINKING_MAX_MS") {
            self.dialogue.thinking_max_ms = parse_u64("MAITRE_DIALOGUE_THINKING_MAX_MS", &value)?;
        }
        if let Some(value) = read_env("MAITRE_DIALOGUE_MAX_HISTORY_TURNS") {
            self.dialogue.max_history_turns =
                parse_u64("MAITRE_DIALOGUE_MAX_HISTORY_TURNS", &value)? as usize;
        }
        if let Some(value) = read_env("MAITRE_DIALOGUE_SESSION_IDLE_SECS") {
            self.dialogue.session_idle_secs =
                parse_u64("MAITRE_DIALOGUE_SESSION_IDLE_SECS", &value)?;
        }

        if let Some(value) = read_env("MAITRE_RESERVATION_RESTAURANT_ID") {
            self.reservation.restaurant_id = value;
        }
        if let Some(value) = read_env("MAITRE_RESERVATION_UTC_OFFSET_HOURS") {
            self.reservation.utc_offset_hours =
                parse_i32("MAITRE_RESERVATION_UTC_OFFSET_HOURS", &value)?;
        }
        if let Some(value) = read_env("MAITRE_RESERVATION_SERVICE_WINDOWS") {
            self.reservation.service_windows = split_list(&value);
        }

        if let Some(value) = read_env("MAITRE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("MAITRE_SERVER_PORT") {
            self.server.port = parse_u16("MAITRE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("MAITRE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("MAITRE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("MAITRE_LOGGING_LEVEL").or_else(|| read_env("MAITRE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("MAITRE_LOGGING_FORMAT").or_else(|| read_env("MAITRE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        set(&mut self.database.url, overrides.database_url);
        set(&mut self.logging.level, overrides.log_level);
        set(&mut self.llm.provider, overrides.llm_provider);
        set(&mut self.llm.model, overrides.llm_model);
        set(&mut self.bridge.enabled, overrides.bridge_enabled);
        if let Some(base_url) = overrides.bridge_base_url {
            self.bridge.base_url = Some(base_url);
        }
        set(&mut self.dialogue.pacing_enabled, overrides.pacing_enabled);
        set(&mut self.server.port, overrides.server_port);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_bridge(&self.bridge)?;
        validate_dialogue(&self.dialogue)?;
        validate_reservation(&self.reservation)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_bridge(bridge: &BridgeConfig) -> Result<(), ConfigError> {
    if bridge.enabled {
        let base_url = bridge.base_url.as_deref().map(str::trim).unwrap_or_default();
        if base_url.is_empty() {
            return Err(ConfigError::Validation(
                "bridge.base_url is required when bridge.enabled is true".to_string(),
            ));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "bridge.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if bridge.timeout_secs == 0 || bridge.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "bridge.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if dialogue.max_history_turns < 2 {
        return Err(ConfigError::Validation(
            "dialogue.max_history_turns must be at least 2".to_string(),
        ));
    }

    if dialogue.session_idle_secs < 60 {
        return Err(ConfigError::Validation(
            "dialogue.session_idle_secs must be at least 60".to_string(),
        ));
    }

    if dialogue.read_ack_max_ms > 60_000 || dialogue.thinking_max_ms > 60_000 {
        return Err(ConfigError::Validation(
            "dialogue pacing delays must not exceed 60000 ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_reservation(reservation: &ReservationConfig) -> Result<(), ConfigError> {
    if reservation.restaurant_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "reservation.restaurant_id must not be empty".to_string(),
        ));
    }

    if !(-12..=14).contains(&reservation.utc_offset_hours) {
        return Err(ConfigError::Validation(
            "reservation.utc_offset_hours must be in range -12..=14".to_string(),
        ));
    }

    if reservation.service_windows.is_empty() {
        return Err(ConfigError::Validation(
            "reservation.service_windows must list at least one window".to_string(),
        ));
    }

    reservation
        .grid()
        .map(|_| ())
        .map_err(|error| ConfigError::Validation(format!("reservation.service_windows: {error}")))
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
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

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_i32(key: &str, value: &str) -> Result<i32, ConfigError> {
    value.parse::<i32>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    bridge: Option<BridgePatch>,
    dialogue: Option<DialoguePatch>,
    reservation: Option<ReservationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    seed_demo_tables: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct BridgePatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    metadata_ttl_secs: Option<u64>,
    confirmation_actions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct DialoguePatch {
    pacing_enabled: Option<bool>,
    read_ack_max_ms: Option<u64>,
    reading_ms_per_char: Option<u64>,
    thinking_max_ms: Option<u64>,
    typing_ms_per_char: Option<u64>,
    max_history_turns: Option<usize>,
    session_idle_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReservationPatch {
    restaurant_id: Option<String>,
    restaurant_name: Option<String>,
    utc_offset_hours: Option<i32>,
    service_windows: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_any_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        ensure(config.reservation.restaurant_id == "main", "default restaurant should be main")?;
        ensure(config.reservation.utc_offset_hours == 8, "default offset should be +8")?;
        ensure(config.bridge.metadata_ttl_secs == 60, "metadata ttl should default to 60s")?;
        ensure(!config.bridge.enabled, "bridge should be disabled by default")?;
        let grid = config.reservation.grid().map_err(|err| err.to_string())?;
        ensure(grid.slots().len() == 16, "default grid should expose 16 half-hour slots")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_MAITRE_LLM_KEY", "sk-from-env");
        env::set_var("TEST_MAITRE_BRIDGE_URL", "https://bridge.internal");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("maitre.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "open_ai"
api_key = "${TEST_MAITRE_LLM_KEY}"
model = "gpt-4o-mini"

[bridge]
enabled = true
base_url = "${TEST_MAITRE_BRIDGE_URL}"
confirmation_actions = ["close_order"]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "llm api key should be interpolated from environment",
            )?;
            ensure(
                config.bridge.base_url.as_deref() == Some("https://bridge.internal"),
                "bridge url should be interpolated from environment",
            )?;
            ensure(
                config.bridge.confirmation_actions == vec!["close_order".to_string()],
                "confirmation actions should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_MAITRE_LLM_KEY", "TEST_MAITRE_BRIDGE_URL"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MAITRE_LOG_LEVEL", "warn");
        env::set_var("MAITRE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["MAITRE_LOG_LEVEL", "MAITRE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MAITRE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("MAITRE_DIALOGUE_THINKING_MAX_MS", "2500");
        env::set_var("MAITRE_RESERVATION_SERVICE_WINDOWS", "11:30-13:30, 18:00-20:00");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("maitre.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[dialogue]
thinking_max_ms = 1000
max_history_turns = 12
session_idle_secs = 600

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.dialogue.thinking_max_ms == 2500, "env should win over file")?;
            ensure(config.dialogue.max_history_turns == 12, "file should win over defaults")?;
            ensure(config.dialogue.session_idle_secs == 600, "idle timeout should come from file")?;
            ensure(
                config.reservation.service_windows.len() == 2
                    && config.reservation.service_windows[0] == "11:30-13:30",
                "service windows should be split from env list",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "MAITRE_DATABASE_URL",
            "MAITRE_DIALOGUE_THINKING_MAX_MS",
            "MAITRE_RESERVATION_SERVICE_WINDOWS",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MAITRE_BRIDGE_ENABLED", "true");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("bridge.base_url")
            );
            ensure(has_message, "validation failure should mention bridge.base_url")
        })();

        clear_vars(&["MAITRE_BRIDGE_ENABLED"]);
        result
    }

    #[test]
    fn malformed_service_window_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MAITRE_RESERVATION_SERVICE_WINDOWS", "dinner");

        let result = (|| -> Result<(), String> {
            let rejected = matches!(
                AppConfig::load(LoadOptions::default()),
                Err(ConfigError::Validation(ref message)) if message.contains("service_windows")
            );
            ensure(rejected, "a window without HH:MM-HH:MM should fail validation")
        })();

        clear_vars(&["MAITRE_RESERVATION_SERVICE_WINDOWS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MAITRE_LLM_API_KEY", "sk-secret-value");
        env::set_var("MAITRE_BRIDGE_API_KEY", "bridge-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain llm key")?;
            ensure(
                !debug.contains("bridge-secret-value"),
                "debug output should not contain bridge key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["MAITRE_LLM_API_KEY", "MAITRE_BRIDGE_API_KEY"]);
        result
    }
}

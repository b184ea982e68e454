use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use maitre_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file = ConfigFile::detect();
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut push = |key: &str, value: &str, env_keys: &[&str]| {
        lines.push(render_line(key, value, file.source(key, env_keys)));
    };

    push("database.url", &config.database.url, &["MAITRE_DATABASE_URL"]);
    push(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        &["MAITRE_DATABASE_MAX_CONNECTIONS"],
    );
    push(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        &["MAITRE_DATABASE_TIMEOUT_SECS"],
    );
    push(
        "database.seed_demo_tables",
        &config.database.seed_demo_tables.to_string(),
        &["MAITRE_DATABASE_SEED_DEMO_TABLES"],
    );

    push("llm.provider", &format!("{:?}", config.llm.provider), &["MAITRE_LLM_PROVIDER"]);
    push("llm.model", &config.llm.model, &["MAITRE_LLM_MODEL"]);
    push(
        "llm.base_url",
        config.llm.base_url.as_deref().unwrap_or("<unset>"),
        &["MAITRE_LLM_BASE_URL"],
    );
    push("llm.api_key", &redact_secret(config.llm.api_key.as_ref()), &["MAITRE_LLM_API_KEY"]);
    push("llm.timeout_secs", &config.llm.timeout_secs.to_string(), &["MAITRE_LLM_TIMEOUT_SECS"]);

    push("bridge.enabled", &config.bridge.enabled.to_string(), &["MAITRE_BRIDGE_ENABLED"]);
    push(
        "bridge.base_url",
        config.bridge.base_url.as_deref().unwrap_or("<unset>"),
        &["MAITRE_BRIDGE_BASE_URL"],
    );
    push(
        "bridge.api_key",
        &redact_secret(config.bridge.api_key.as_ref()),
        &["MAITRE_BRIDGE_API_KEY"],
    );
    push(
        "bridge.metadata_ttl_secs",
        &config.bridge.metadata_ttl_secs.to_string(),
        &["MAITRE_BRIDGE_METADATA_TTL_SECS"],
    );
    push(
        "bridge.confirmation_actions",
        &config.bridge.confirmation_actions.join(","),
        &["MAITRE_BRIDGE_CONFIRMATION_ACTIONS"],
    );

    push(
        "dialogue.pacing_enabled",
        &config.dialogue.pacing_enabled.to_string(),
        &["MAITRE_DIALOGUE_PACING_ENABLED"],
    );
    push(
        "dialogue.max_history_turns",
        &config.dialogue.max_history_turns.to_string(),
        &["MAITRE_DIALOGUE_MAX_HISTORY_TURNS"],
    );
    push(
        "dialogue.session_idle_secs",
        &config.dialogue.session_idle_secs.to_string(),
        &["MAITRE_DIALOGUE_SESSION_IDLE_SECS"],
    );

    push(
        "reservation.restaurant_id",
        &config.reservation.restaurant_id,
        &["MAITRE_RESERVATION_RESTAURANT_ID"],
    );
    push(
        "reservation.utc_offset_hours",
        &config.reservation.utc_offset_hours.to_string(),
        &["MAITRE_RESERVATION_UTC_OFFSET_HOURS"],
    );
    push(
        "reservation.service_windows",
        &config.reservation.service_windows.join(","),
        &["MAITRE_RESERVATION_SERVICE_WINDOWS"],
    );

    push("server.bind_address", &config.server.bind_address, &["MAITRE_SERVER_BIND_ADDRESS"]);
    push("server.port", &config.server.port.to_string(), &["MAITRE_SERVER_PORT"]);

    push("logging.level", &config.logging.level, &["MAITRE_LOGGING_LEVEL", "MAITRE_LOG_LEVEL"]);
    push(
        "logging.format",
        &format!("{:?}", config.logging.format),
        &["MAITRE_LOGGING_FORMAT", "MAITRE_LOG_FORMAT"],
    );

    lines.join("\n")
}

struct ConfigFile {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

impl ConfigFile {
    fn detect() -> Self {
        let path = resolve_config_path(None);
        let doc = load_doc(path.as_deref());
        Self { path, doc }
    }

    fn source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn load_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
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

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim()) {
        None => "<unset>".to_string(),
        Some("") => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ragdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: Option<&'static str>,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: Option<&'static str>, value: impl ToString) -> Self {
        Self { key, env_key, value: value.to_string() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    vec![
        Field::new("database.url", Some("RAGDESK_DATABASE_URL"), &config.database.url),
        Field::new(
            "database.max_connections",
            Some("RAGDESK_DATABASE_MAX_CONNECTIONS"),
            config.database.max_connections,
        ),
        Field::new("llm.provider", Some("RAGDESK_LLM_PROVIDER"), format!("{:?}", config.llm.provider)),
        Field::new("llm.model", Some("RAGDESK_LLM_MODEL"), &config.llm.model),
        Field::new(
            "llm.base_url",
            Some("RAGDESK_LLM_BASE_URL"),
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("llm.api_key", Some("RAGDESK_LLM_API_KEY"), api_key),
        Field::new("llm.timeout_secs", Some("RAGDESK_LLM_TIMEOUT_SECS"), config.llm.timeout_secs),
        Field::new("llm.temperature", Some("RAGDESK_LLM_TEMPERATURE"), config.llm.temperature),
        Field::new("llm.max_tokens", Some("RAGDESK_LLM_MAX_TOKENS"), config.llm.max_tokens),
        Field::new("server.bind_address", Some("RAGDESK_SERVER_BIND_ADDRESS"), &config.server.bind_address),
        Field::new("server.port", Some("RAGDESK_SERVER_PORT"), config.server.port),
        Field::new(
            "server.default_company_id",
            Some("RAGDESK_SERVER_DEFAULT_COMPANY_ID"),
            &config.server.default_company_id,
        ),
        Field::new(
            "retrieval.default_threshold",
            Some("RAGDESK_RETRIEVAL_DEFAULT_THRESHOLD"),
            config.retrieval.default_threshold,
        ),
        Field::new("retrieval.top_k", Some("RAGDESK_RETRIEVAL_TOP_K"), config.retrieval.top_k),
        Field::new("validation.enabled", Some("RAGDESK_VALIDATION_ENABLED"), config.validation.enabled),
        Field::new(
            "validation.max_retries",
            Some("RAGDESK_VALIDATION_MAX_RETRIES"),
            config.validation.max_retries,
        ),
        Field::new("memory.enabled", Some("RAGDESK_MEMORY_ENABLED"), config.memory.enabled),
        Field::new(
            "embedding.dimensions",
            Some("RAGDESK_EMBEDDING_DIMENSIONS"),
            config.embedding.dimensions,
        ),
        Field::new("tools.webhooks", None, config.tools.webhooks.keys().cloned().collect::<Vec<_>>().join(",")),
        Field::new("learning.enabled", Some("RAGDESK_LEARNING_ENABLED"), config.learning.enabled),
        Field::new(
            "learning.interval_hours",
            Some("RAGDESK_LEARNING_INTERVAL_HOURS"),
            config.learning.interval_hours,
        ),
        Field::new("logging.level", Some("RAGDESK_LOGGING_LEVEL"), &config.logging.level),
        Field::new(
            "logging.format",
            Some("RAGDESK_LOGGING_FORMAT"),
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("ragdesk.toml"), PathBuf::from("config/ragdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
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

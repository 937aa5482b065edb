use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::preprocess::BrandAlias;

/// Immutable runtime configuration. Built once at startup and passed to
/// components at construction; nothing mutates it afterwards.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub retrieval: RetrievalConfig,
    pub validation: ValidationConfig,
    pub memory: MemoryConfig,
    pub conversation: ConversationConfig,
    pub knowledge_base: KnowledgeBaseConfig,
    pub embedding: EmbeddingConfig,
    pub tools: ToolsConfig,
    pub learning: LearningConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub default_company_id: String,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub default_threshold: f64,
    pub top_k: usize,
    pub widened_top_k: usize,
    pub email_location_threshold: f64,
    pub factual_threshold: f64,
    pub fan_out_multiplier: usize,
    pub address_keywords: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ValidationConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub min_confidence: f64,
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub extraction_enabled: bool,
    pub threshold: f64,
    pub top_k: usize,
    pub min_fact_confidence: f64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub history_limit: usize,
}

#[derive(Clone, Debug, Default)]
pub struct KnowledgeBaseConfig {
    pub brand_aliases: Vec<BrandAlias>,
}

#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
}

/// Tool name to webhook URL. Tools without an entry are not registered.
#[derive(Clone, Debug)]
pub struct ToolsConfig {
    pub webhooks: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LearningConfig {
    pub enabled: bool,
    pub interval_hours: u64,
    pub window_days: u32,
    pub min_confidence: f64,
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
    pub llm_base_url: Option<String>,
    pub server_port: Option<u16>,
    pub default_company_id: Option<String>,
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

pub const DEFAULT_ADDRESS_KEYWORDS: &[&str] =
    &["street", "london", "uk", "uae", "city", "mailing address", "office:"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://ragdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                temperature: 0.7,
                max_tokens: 500,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                default_company_id: "default".to_string(),
                graceful_shutdown_secs: 15,
            },
            retrieval: RetrievalConfig {
                default_threshold: 0.5,
                top_k: 5,
                widened_top_k: 10,
                email_location_threshold: 0.20,
                factual_threshold: 0.25,
                fan_out_multiplier: 2,
                address_keywords: DEFAULT_ADDRESS_KEYWORDS
                    .iter()
                    .map(|keyword| keyword.to_string())
                    .collect(),
            },
            validation: ValidationConfig { enabled: true, max_retries: 2, min_confidence: 0.7 },
            memory: MemoryConfig {
                enabled: true,
                extraction_enabled: true,
                threshold: 0.5,
                top_k: 3,
                min_fact_confidence: 0.5,
            },
            conversation: ConversationConfig { history_limit: 5 },
            knowledge_base: KnowledgeBaseConfig::default(),
            embedding: EmbeddingConfig { dimensions: 384 },
            tools: ToolsConfig { webhooks: BTreeMap::new(), timeout_secs: 10 },
            learning: LearningConfig {
                enabled: true,
                interval_hours: 168,
                window_days: 7,
                min_confidence: 0.6,
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("ragdesk.toml"));
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

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(default_company_id) = server.default_company_id {
                self.server.default_company_id = default_company_id;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(default_threshold) = retrieval.default_threshold {
                self.retrieval.default_threshold = default_threshold;
            }
            if let Some(top_k) = retrieval.top_k {
                self.retrieval.top_k = top_k;
            }
            if let Some(widened_top_k) = retrieval.widened_top_k {
                self.retrieval.widened_top_k = widened_top_k;
            }
            if let Some(threshold) = retrieval.email_location_threshold {
                self.retrieval.email_location_threshold = threshold;
            }
            if let Some(threshold) = retrieval.factual_threshold {
                self.retrieval.factual_threshold = threshold;
            }
            if let Some(multiplier) = retrieval.fan_out_multiplier {
                self.retrieval.fan_out_multiplier = multiplier;
            }
            if let Some(address_keywords) = retrieval.address_keywords {
                self.retrieval.address_keywords = address_keywords;
            }
        }

        if let Some(validation) = patch.validation {
            if let Some(enabled) = validation.enabled {
                self.validation.enabled = enabled;
            }
            if let Some(max_retries) = validation.max_retries {
                self.validation.max_retries = max_retries;
            }
            if let Some(min_confidence) = validation.min_confidence {
                self.validation.min_confidence = min_confidence;
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(enabled) = memory.enabled {
                self.memory.enabled = enabled;
            }
            if let Some(extraction_enabled) = memory.extraction_enabled {
                self.memory.extraction_enabled = extraction_enabled;
            }
            if let Some(threshold) = memory.threshold {
                self.memory.threshold = threshold;
            }
            if let Some(top_k) = memory.top_k {
                self.memory.top_k = top_k;
            }
            if let Some(min_fact_confidence) = memory.min_fact_confidence {
                self.memory.min_fact_confidence = min_fact_confidence;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(history_limit) = conversation.history_limit {
                self.conversation.history_limit = history_limit;
            }
        }

        if let Some(knowledge_base) = patch.knowledge_base {
            if let Some(brand_aliases) = knowledge_base.brand_aliases {
                self.knowledge_base.brand_aliases = brand_aliases;
            }
        }

        if let Some(embedding) = patch.embedding {
            if let Some(dimensions) = embedding.dimensions {
                self.embedding.dimensions = dimensions;
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(webhooks) = tools.webhooks {
                self.tools.webhooks.extend(webhooks);
            }
            if let Some(timeout_secs) = tools.timeout_secs {
                self.tools.timeout_secs = timeout_secs;
            }
        }

        if let Some(learning) = patch.learning {
            if let Some(enabled) = learning.enabled {
                self.learning.enabled = enabled;
            }
            if let Some(interval_hours) = learning.interval_hours {
                self.learning.interval_hours = interval_hours;
            }
            if let Some(window_days) = learning.window_days {
                self.learning.window_days = window_days;
            }
            if let Some(min_confidence) = learning.min_confidence {
                self.learning.min_confidence = min_confidence;
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
        if let Some(value) = read_env("RAGDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RAGDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("RAGDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RAGDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("RAGDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RAGDESK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("RAGDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("RAGDESK_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("RAGDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("RAGDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("RAGDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RAGDESK_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("RAGDESK_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("RAGDESK_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("RAGDESK_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("RAGDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RAGDESK_SERVER_PORT") {
            self.server.port = parse_u16("RAGDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("RAGDESK_SERVER_DEFAULT_COMPANY_ID") {
            self.server.default_company_id = value;
        }

        if let Some(value) = read_env("RAGDESK_RETRIEVAL_DEFAULT_THRESHOLD") {
            self.retrieval.default_threshold =
                parse_f64("RAGDESK_RETRIEVAL_DEFAULT_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("RAGDESK_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_usize("RAGDESK_RETRIEVAL_TOP_K", &value)?;
        }

        if let Some(value) = read_env("RAGDESK_VALIDATION_ENABLED") {
            self.validation.enabled = parse_bool("RAGDESK_VALIDATION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("RAGDESK_VALIDATION_MAX_RETRIES") {
            self.validation.max_retries = parse_u32("RAGDESK_VALIDATION_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("RAGDESK_MEMORY_ENABLED") {
            self.memory.enabled = parse_bool("RAGDESK_MEMORY_ENABLED", &value)?;
        }
        if let Some(value) = read_env("RAGDESK_EMBEDDING_DIMENSIONS") {
            self.embedding.dimensions = parse_usize("RAGDESK_EMBEDDING_DIMENSIONS", &value)?;
        }

        if let Some(value) = read_env("RAGDESK_LEARNING_ENABLED") {
            self.learning.enabled = parse_bool("RAGDESK_LEARNING_ENABLED", &value)?;
        }
        if let Some(value) = read_env("RAGDESK_LEARNING_INTERVAL_HOURS") {
            self.learning.interval_hours = parse_u64("RAGDESK_LEARNING_INTERVAL_HOURS", &value)?;
        }

        let log_level =
            read_env("RAGDESK_LOGGING_LEVEL").or_else(|| read_env("RAGDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RAGDESK_LOGGING_FORMAT").or_else(|| read_env("RAGDESK_LOG_FORMAT"));
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
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(default_company_id) = overrides.default_company_id {
            self.server.default_company_id = default_company_id;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_retrieval(&self.retrieval)?;
        validate_validation(&self.validation)?;
        validate_memory(&self.memory)?;
        validate_embedding(&self.embedding)?;
        validate_tools(&self.tools)?;
        validate_learning(&self.learning)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ragdesk.toml"), PathBuf::from("config/ragdesk.toml")]
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

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.default_company_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "server.default_company_id must not be empty".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_unit(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{name} must be in range 0.0..=1.0")))
    }
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    validate_unit("retrieval.default_threshold", retrieval.default_threshold)?;
    validate_unit("retrieval.email_location_threshold", retrieval.email_location_threshold)?;
    validate_unit("retrieval.factual_threshold", retrieval.factual_threshold)?;

    if retrieval.top_k == 0 {
        return Err(ConfigError::Validation(
            "retrieval.top_k must be greater than zero".to_string(),
        ));
    }
    if retrieval.widened_top_k < retrieval.top_k {
        return Err(ConfigError::Validation(
            "retrieval.widened_top_k must be at least retrieval.top_k".to_string(),
        ));
    }
    if retrieval.fan_out_multiplier == 0 {
        return Err(ConfigError::Validation(
            "retrieval.fan_out_multiplier must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_validation(validation: &ValidationConfig) -> Result<(), ConfigError> {
    validate_unit("validation.min_confidence", validation.min_confidence)?;
    if validation.max_retries > 5 {
        return Err(ConfigError::Validation(
            "validation.max_retries must be in range 0..=5".to_string(),
        ));
    }
    Ok(())
}

fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
    validate_unit("memory.threshold", memory.threshold)?;
    validate_unit("memory.min_fact_confidence", memory.min_fact_confidence)?;
    if memory.top_k == 0 {
        return Err(ConfigError::Validation("memory.top_k must be greater than zero".to_string()));
    }
    Ok(())
}

fn validate_embedding(embedding: &EmbeddingConfig) -> Result<(), ConfigError> {
    if embedding.dimensions == 0 || embedding.dimensions > 4096 {
        return Err(ConfigError::Validation(
            "embedding.dimensions must be in range 1..=4096".to_string(),
        ));
    }
    Ok(())
}

fn validate_tools(tools: &ToolsConfig) -> Result<(), ConfigError> {
    for (name, url) in &tools.webhooks {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "tools.webhooks.{name} must start with http:// or https://"
            )));
        }
    }
    if tools.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "tools.timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_learning(learning: &LearningConfig) -> Result<(), ConfigError> {
    validate_unit("learning.min_confidence", learning.min_confidence)?;
    if learning.interval_hours == 0 {
        return Err(ConfigError::Validation(
            "learning.interval_hours must be greater than zero".to_string(),
        ));
    }
    if learning.window_days == 0 {
        return Err(ConfigError::Validation(
            "learning.window_days must be greater than zero".to_string(),
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

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    retrieval: Option<RetrievalPatch>,
    validation: Option<ValidationPatch>,
    memory: Option<MemoryPatch>,
    conversation: Option<ConversationPatch>,
    knowledge_base: Option<KnowledgeBasePatch>,
    embedding: Option<EmbeddingPatch>,
    tools: Option<ToolsPatch>,
    learning: Option<LearningPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    default_company_id: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    default_threshold: Option<f64>,
    top_k: Option<usize>,
    widened_top_k: Option<usize>,
    email_location_threshold: Option<f64>,
    factual_threshold: Option<f64>,
    fan_out_multiplier: Option<usize>,
    address_keywords: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ValidationPatch {
    enabled: Option<bool>,
    max_retries: Option<u32>,
    min_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    enabled: Option<bool>,
    extraction_enabled: Option<bool>,
    threshold: Option<f64>,
    top_k: Option<usize>,
    min_fact_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    history_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgeBasePatch {
    brand_aliases: Option<Vec<BrandAlias>>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingPatch {
    dimensions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    webhooks: Option<BTreeMap<String, String>>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LearningPatch {
    enabled: Option<bool>,
    interval_hours: Option<u64>,
    window_days: Option<u32>,
    min_confidence: Option<f64>,
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

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

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

    fn write_config(dir: &TempDir, body: &str) -> Result<std::path::PathBuf, String> {
        let path = dir.path().join("ragdesk.toml");
        fs::write(&path, body).map_err(|err| err.to_string())?;
        Ok(path)
    }

    #[test]
    fn defaults_match_documented_pipeline_values() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.retrieval.default_threshold == 0.5, "default threshold should be 0.5")?;
        ensure(config.retrieval.top_k == 5, "default top_k should be 5")?;
        ensure(config.retrieval.widened_top_k == 10, "widened top_k should be 10")?;
        ensure(config.validation.max_retries == 2, "max retries should be 2")?;
        ensure(config.validation.min_confidence == 0.7, "validation floor should be 0.7")?;
        ensure(config.memory.threshold == 0.5, "memory threshold should be 0.5")?;
        ensure(config.memory.top_k == 3, "memory recall should return 3 facts")?;
        ensure(config.conversation.history_limit == 5, "history limit should be 5")?;
        ensure(config.embedding.dimensions == 384, "embedding dimensions should be 384")?;
        ensure(config.learning.interval_hours == 168, "learning should run weekly")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_RAGDESK_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[llm]
provider = "open_ai"
api_key = "${TEST_RAGDESK_LLM_KEY}"
model = "gpt-4o-mini"

[[knowledge_base.brand_aliases]]
alias = "Githaf"
full_name = "Githaf Consulting"

[tools.webhooks]
send_email = "https://hooks.example.com/email"
"#,
            )?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(
                config.knowledge_base.brand_aliases.len() == 1,
                "brand alias table should be loaded",
            )?;
            ensure(
                config.tools.webhooks.get("send_email").map(String::as_str)
                    == Some("https://hooks.example.com/email"),
                "webhook url should be loaded",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_RAGDESK_LLM_KEY"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_RAGDESK_UNSET"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(&dir, "[llm]\nmodel = \"${TEST_RAGDESK_UNSET}\"\n")?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected interpolation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_RAGDESK_UNSET"),
            "error should name the missing variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RAGDESK_LOG_LEVEL", "warn");
        env::set_var("RAGDESK_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["RAGDESK_LOG_LEVEL", "RAGDESK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RAGDESK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("RAGDESK_RETRIEVAL_TOP_K", "7");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[database]
url = "sqlite://from-file.db"

[retrieval]
top_k = 4
widened_top_k = 12

[logging]
level = "warn"
"#,
            )?;

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
            ensure(config.retrieval.top_k == 7, "env top_k should win over file")?;
            ensure(config.retrieval.widened_top_k == 12, "file value should win over default")?;
            Ok(())
        })();

        clear_vars(&["RAGDESK_DATABASE_URL", "RAGDESK_RETRIEVAL_TOP_K"]);
        result
    }

    #[test]
    fn invalid_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RAGDESK_VALIDATION_MAX_RETRIES", "many");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected invalid override to fail".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "RAGDESK_VALIDATION_MAX_RETRIES"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["RAGDESK_VALIDATION_MAX_RETRIES"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RAGDESK_LLM_PROVIDER", "anthropic");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["RAGDESK_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn out_of_range_threshold_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(&dir, "[retrieval]\ndefault_threshold = 1.5\n")?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected threshold validation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("retrieval.default_threshold")),
            "validation failure should mention the threshold",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RAGDESK_LLM_PROVIDER", "openai");
        env::set_var("RAGDESK_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")
        })();

        clear_vars(&["RAGDESK_LLM_PROVIDER", "RAGDESK_LLM_API_KEY"]);
        result
    }
}

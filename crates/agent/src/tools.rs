use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ragdesk_core::config::ToolsConfig;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool `{0}` is not registered")]
    NotRegistered(String),
    #[error("invalid tool input: {0}")]
    InvalidInput(String),
    #[error("tool call failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, input: Value) -> Result<Value, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registers one webhook-backed tool per configured entry.
    pub fn from_config(config: &ToolsConfig) -> Result<Self, ToolError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| ToolError::Failed(error.to_string()))?;

        let mut registry = Self::default();
        for (name, url) in &config.webhooks {
            registry.register(WebhookTool::new(name.clone(), url.clone(), http.clone()));
        }
        Ok(registry)
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self.tools.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub async fn execute_tool(&self, name: &str, params: Value) -> Result<Value, ToolError> {
        let Some(tool) = self.tools.get(name) else {
            warn!(event_name = "agent.tool.not_registered", tool = name, "tool is not registered");
            return Err(ToolError::NotRegistered(name.to_string()));
        };

        let result = tool.execute(params).await;
        match &result {
            Ok(_) => info!(event_name = "agent.tool.executed", tool = name, "tool call succeeded"),
            Err(error) => warn!(
                event_name = "agent.tool.failed",
                tool = name,
                error = %error,
                "tool call failed"
            ),
        }
        result
    }
}

/// Posts the action params as JSON and returns the JSON reply, or
/// `{"status": <code>}` when the endpoint answers without a JSON body.
pub struct WebhookTool {
    name: String,
    url: String,
    http: Client,
}

impl WebhookTool {
    pub fn new(name: String, url: String, http: Client) -> Self {
        Self { name, url, http }
    }
}

#[async_trait]
impl Tool for WebhookTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        if !input.is_object() {
            return Err(ToolError::InvalidInput("params must be a JSON object".to_string()));
        }

        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "tool": self.name, "params": input }))
            .send()
            .await
            .map_err(|error| ToolError::Failed(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!("webhook answered {}", status.as_u16())));
        }

        let body = response.text().await.map_err(|error| ToolError::Failed(error.to_string()))?;
        Ok(serde_json::from_str(&body)
            .unwrap_or_else(|_| serde_json::json!({ "status": status.as_u16() })))
    }
}

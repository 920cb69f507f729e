//! Browser Use cloud API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{CreatedTask, ProviderError, ProviderTask, TaskProvider};
use crate::task::LogEntry;

pub const DEFAULT_BASE_URL: &str = "https://api.browser-use.com/api/v2";

const API_KEY_HEADER: &str = "X-Browser-Use-API-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the Browser Use task API.
#[derive(Clone)]
pub struct BrowserUseClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl BrowserUseClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> anyhow::Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            anyhow::bail!("BROWSER_USE_API_KEY is not set");
        }
        let mut base_url = base_url.unwrap_or(DEFAULT_BASE_URL).to_string();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn task_url(&self, task_id: &str, suffix: &str) -> String {
        format!(
            "{}/tasks/{}{}",
            self.base_url,
            urlencoding::encode(task_id),
            suffix
        )
    }

    /// Send a request and return the body of a successful response.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, ProviderError> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::http(status.as_u16(), body));
        }
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
}

/// The logs endpoint answers either with a bare list or a wrapper object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogsResponse {
    List(Vec<Value>),
    Wrapped { logs: Vec<Value> },
}

impl LogsResponse {
    fn into_entries(self) -> Vec<LogEntry> {
        let raw = match self {
            Self::List(items) | Self::Wrapped { logs: items } => items,
        };
        raw.into_iter().map(LogEntry::from_provider).collect()
    }
}

#[async_trait]
impl TaskProvider for BrowserUseClient {
    async fn create_task(
        &self,
        prompt: &str,
        callback_url: Option<&str>,
    ) -> Result<CreatedTask, ProviderError> {
        let mut body = serde_json::Map::new();
        body.insert("task".to_string(), Value::String(prompt.to_string()));
        if let Some(url) = callback_url {
            body.insert("webhook_url".to_string(), Value::String(url.to_string()));
        }

        let text = self
            .send(self.client.post(format!("{}/tasks", self.base_url)).json(&body))
            .await?;
        let parsed: CreateTaskResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::parse(format!("Failed to parse create response: {}, body: {}", e, text))
        })?;

        parsed
            .task_id
            .or(parsed.id)
            .filter(|id| !id.is_empty())
            .map(|task_id| CreatedTask { task_id })
            .ok_or_else(|| ProviderError::parse(format!("No task id in create response: {}", text)))
    }

    async fn get_task(&self, task_id: &str) -> Result<ProviderTask, ProviderError> {
        let text = self.send(self.client.get(self.task_url(task_id, ""))).await?;
        serde_json::from_str(&text).map_err(|e| {
            ProviderError::parse(format!("Failed to parse task {}: {}", task_id, e))
        })
    }

    async fn get_task_logs(&self, task_id: &str) -> Result<Vec<LogEntry>, ProviderError> {
        let text = self
            .send(self.client.get(self.task_url(task_id, "/logs")))
            .await?;
        let parsed: LogsResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::parse(format!("Failed to parse logs for {}: {}", task_id, e))
        })?;
        Ok(parsed.into_entries())
    }
}

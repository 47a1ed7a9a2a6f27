//! OpenAI-compatible chat client (LiteLLM proxy) shared by generation and grading

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use uibench_common::EvalConfig;

use crate::error::{HarnessError, HarnessResult};

/// One part of a multimodal message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Inline PNG as a `data:` URL
    pub fn png(bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/png;base64,{}", encoded),
            },
        }
    }

    pub async fn png_file(path: &Path) -> HarnessResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::png(&bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(parts),
        }
    }

    /// Text portions of the message, images omitted
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A chat-completion backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send `messages` to `model` and return the first choice's text
    async fn complete(&self, model: &str, messages: Vec<ChatMessage>) -> HarnessResult<String>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct ChatClient {
    api_base: String,
    api_key: Option<String>,
    aws_region: Option<String>,
    aws_profile: Option<String>,
    max_tokens: u32,
    http_client: Client,
}

impl ChatClient {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>, timeout: Duration) -> HarnessResult<Self> {
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            aws_region: None,
            aws_profile: None,
            max_tokens: 8192,
            http_client: Client::builder().timeout(timeout).build()?,
        })
    }

    /// Build from configuration. Fails when no endpoint is configured.
    pub fn from_config(config: &EvalConfig) -> HarnessResult<Self> {
        let api_base = config
            .llm
            .api_base
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .ok_or(HarnessError::MissingApiBase)?;

        let mut client = Self::new(
            api_base,
            config.llm.api_key.clone(),
            Duration::from_secs(config.llm.request_timeout_secs),
        )?;
        client.aws_region = config.aws_region.clone();
        client.aws_profile = config.aws_profile.clone();
        client.max_tokens = config.llm.max_tokens;
        Ok(client)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    aws_region_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aws_profile_name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl ChatModel for ChatClient {
    async fn complete(&self, model: &str, messages: Vec<ChatMessage>) -> HarnessResult<String> {
        let api_request = ApiRequest {
            model,
            messages,
            max_tokens: self.max_tokens,
            aws_region_name: self.aws_region.as_deref(),
            aws_profile_name: self.aws_profile.as_deref(),
        };

        let url = format!("{}/chat/completions", self.api_base);
        debug!("POST {} (model: {})", url, model);

        let mut http_request = self.http_client.post(&url).json(&api_request);
        if let Some(ref api_key) = self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let http_response = http_request.send().await?;
        let status = http_response.status();

        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(HarnessError::Model(format!(
                "{} returned {}: {}",
                model,
                status.as_u16(),
                message
            )));
        }

        let api_response: ApiResponse = http_response.json().await?;
        api_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| HarnessError::Model(format!("{} returned no choices", model)))
    }
}

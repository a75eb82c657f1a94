//! Azure OpenAI Chat Completions

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::{AzureSettings, ChatProvider, ProviderFailure};
use crate::error::TestSpecError;

const PROVIDER_NAME: &str = "AZURE";

pub(crate) struct AzureProvider {
    http: Client,
    url: String,
    api_key: String,
}

impl AzureProvider {
    pub fn new(http: Client, settings: &AzureSettings) -> Result<Self, TestSpecError> {
        let (Some(api_key), Some(endpoint), Some(api_version), Some(deployment)) = (
            settings.api_key.as_deref(),
            settings.endpoint.as_deref(),
            settings.api_version.as_deref(),
            settings.deployment.as_deref(),
        ) else {
            return Err(TestSpecError::Config(
                "Azure OpenAI settings are incomplete".to_string(),
            ));
        };

        Ok(Self {
            http,
            url: completions_url(endpoint, deployment, api_version),
            api_key: api_key.to_string(),
        })
    }
}

impl ChatProvider for AzureProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderFailure> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens,
        };

        let response = self
            .http
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&request)
            .send()
            .map_err(|e| ProviderFailure::Other(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| ProviderFailure::Other(format!("failed to read response: {}", e)))?;

        if let Some(failure) = classify_status(status, &body) {
            return Err(failure);
        }

        parse_response(&body).map_err(|e| {
            error!(provider = PROVIDER_NAME, body = %body, "Unexpected response structure");
            ProviderFailure::Other(e)
        })
    }
}

/// 成功以外のステータスを分類する（429のみリトライ対象）
fn classify_status(status: StatusCode, body: &str) -> Option<ProviderFailure> {
    if status.is_success() {
        return None;
    }
    let detail = format!("HTTP {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(ProviderFailure::Throttled(detail))
    } else {
        Some(ProviderFailure::Other(detail))
    }
}

/// `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={version}`
fn completions_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        deployment,
        api_version
    )
}

/// `choices[0].message.content`を取り出す
fn parse_response(body: &str) -> Result<String, String> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| format!("invalid response body: {}", e))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| "response has no message content".to_string())
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

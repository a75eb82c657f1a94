//! Amazon Bedrock Converse API

use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::sigv4::{self, Credentials, SigningRequest};
use super::{AwsSettings, ChatProvider, ProviderFailure};
use crate::error::TestSpecError;
use crate::formatter::percent_encode;

const PROVIDER_NAME: &str = "AWS";
const SERVICE: &str = "bedrock";
const CONTENT_TYPE: &str = "application/json";
const THROTTLING_EXCEPTION: &str = "ThrottlingException";

pub(crate) struct BedrockProvider {
    http: Client,
    region: String,
    host: String,
    path: String,
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl BedrockProvider {
    pub fn new(http: Client, settings: &AwsSettings) -> Result<Self, TestSpecError> {
        let (Some(region), Some(access_key_id), Some(secret_access_key), Some(model_id)) = (
            settings.region.as_deref(),
            settings.access_key_id.as_deref(),
            settings.secret_access_key.as_deref(),
            settings.model_id.as_deref(),
        ) else {
            return Err(TestSpecError::Config(
                "AWS Bedrock settings are incomplete".to_string(),
            ));
        };

        Ok(Self {
            http,
            region: region.to_string(),
            host: format!("bedrock-runtime.{}.amazonaws.com", region),
            path: format!("/model/{}/converse", percent_encode(model_id)),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: settings.session_token.clone(),
        })
    }
}

impl ChatProvider for BedrockProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderFailure> {
        let payload = serde_json::to_vec(&converse_request(system_prompt, user_prompt, max_tokens))
            .map_err(|e| ProviderFailure::Other(format!("failed to encode request: {}", e)))?;

        let signature = sigv4::sign(
            &SigningRequest {
                method: "POST",
                host: &self.host,
                path: &self.path,
                content_type: CONTENT_TYPE,
                payload: &payload,
                region: &self.region,
                service: SERVICE,
            },
            &Credentials {
                access_key_id: &self.access_key_id,
                secret_access_key: &self.secret_access_key,
                session_token: self.session_token.as_deref(),
            },
            Utc::now(),
        )
        .map_err(ProviderFailure::Other)?;

        let mut request = self
            .http
            .post(format!("https://{}{}", self.host, self.path))
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-date", &signature.amz_date)
            .header("authorization", &signature.authorization);
        if let Some(token) = &self.session_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request
            .body(payload)
            .send()
            .map_err(|e| ProviderFailure::Other(format!("request failed: {}", e)))?;

        let status = response.status();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .map_err(|e| ProviderFailure::Other(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_error(status, error_type.as_deref(), &body));
        }

        parse_response(&body).map_err(|e| {
            error!(provider = PROVIDER_NAME, body = %body, "Unexpected response structure");
            ProviderFailure::Other(e)
        })
    }
}

fn converse_request<'a>(system_prompt: &'a str, user_prompt: &'a str, max_tokens: u32) -> ConverseRequest<'a> {
    ConverseRequest {
        messages: vec![Message {
            role: "user",
            content: vec![TextBlock { text: user_prompt }],
        }],
        system: vec![TextBlock {
            text: system_prompt,
        }],
        inference_config: InferenceConfig { max_tokens },
    }
}

/// エラー応答を分類する
///
/// HTTP 429、`x-amzn-ErrorType`ヘッダー、本文の`__type`のいずれかが
/// スロットリングを示していればリトライ対象にします。
fn classify_error(status: StatusCode, error_type: Option<&str>, body: &str) -> ProviderFailure {
    let body_type = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error_type);

    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || error_type.is_some_and(|t| t.contains(THROTTLING_EXCEPTION))
        || body_type
            .as_deref()
            .is_some_and(|t| t.contains(THROTTLING_EXCEPTION));

    let detail = format!("HTTP {}: {}", status, body);
    if throttled {
        ProviderFailure::Throttled(detail)
    } else {
        ProviderFailure::Other(detail)
    }
}

/// `output.message.content`の最初のテキストブロックを取り出す
fn parse_response(body: &str) -> Result<String, String> {
    let response: ConverseResponse =
        serde_json::from_str(body).map_err(|e| format!("invalid response body: {}", e))?;
    response
        .output
        .and_then(|output| output.message)
        .and_then(|message| message.content.into_iter().find_map(|block| block.text))
        .ok_or_else(|| "response has no output text".to_string())
}

#[derive(Serialize)]
struct ConverseRequest<'a> {
    messages: Vec<Message<'a>>,
    system: Vec<TextBlock<'a>>,
    #[serde(rename = "inferenceConfig")]
    inference_config: InferenceConfig,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<TextBlock<'a>>,
}

#[derive(Serialize)]
struct TextBlock<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct InferenceConfig {
    #[serde(rename = "maxTokens")]
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ConverseResponse {
    output: Option<Output>,
}

#[derive(Deserialize)]
struct Output {
    message: Option<OutputMessage>,
}

#[derive(Deserialize)]
struct OutputMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let json = serde_json::to_value(converse_request("sys", "usr", 16_384)).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"][0]["text"], "usr");
        assert_eq!(json["system"][0]["text"], "sys");
        assert_eq!(json["inferenceConfig"]["maxTokens"], 16_384);
    }

    #[test]
    fn test_parse_response() {
        let body = r###"{"output":{"message":{"role":"assistant","content":[{"text":"## 機能A"}]}},"stopReason":"end_turn"}"###;
        assert_eq!(parse_response(body).unwrap(), "## 機能A");
    }

    #[test]
    fn test_parse_response_skips_non_text_blocks() {
        let body = r#"{"output":{"message":{"content":[{"toolUse":{}},{"text":"answer"}]}}}"#;
        assert_eq!(parse_response(body).unwrap(), "answer");
    }

    #[test]
    fn test_parse_response_malformed() {
        assert!(parse_response(r#"{"stopReason":"end_turn"}"#).is_err());
        assert!(parse_response(r#"{"output":{"message":{"content":[]}}}"#).is_err());
        assert!(parse_response("<html>").is_err());
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, None, "{}"),
            ProviderFailure::Throttled(_)
        ));
        assert!(matches!(
            classify_error(
                StatusCode::BAD_REQUEST,
                Some("ThrottlingException:http://internal.amazon.com/coral/com.amazon.bedrock/"),
                "{}"
            ),
            ProviderFailure::Throttled(_)
        ));
        assert!(matches!(
            classify_error(
                StatusCode::BAD_REQUEST,
                None,
                r#"{"__type":"com.amazon.bedrock#ThrottlingException","message":"Too many requests"}"#
            ),
            ProviderFailure::Throttled(_)
        ));
        assert!(matches!(
            classify_error(
                StatusCode::BAD_REQUEST,
                Some("ValidationException"),
                r#"{"message":"Too many requests"}"#
            ),
            ProviderFailure::Other(_)
        ));
    }

    #[test]
    fn test_new_encodes_model_id() {
        let settings = AwsSettings {
            region: Some("us-east-1".to_string()),
            access_key_id: Some("AKID".to_string()),
            secret_access_key: Some("secret".to_string()),
            session_token: None,
            model_id: Some("anthropic.claude-3-5-sonnet-20240620-v1:0".to_string()),
        };
        let provider = BedrockProvider::new(Client::new(), &settings).unwrap();
        assert_eq!(provider.host, "bedrock-runtime.us-east-1.amazonaws.com");
        assert_eq!(
            provider.path,
            "/model/anthropic.claude-3-5-sonnet-20240620-v1%3A0/converse"
        );
    }
}

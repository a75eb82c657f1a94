//! LLM接続設定
//!
//! 環境変数から読み込み、選択されたサービスに必要な項目がそろっているかを検証する。

use std::time::Duration;

use crate::error::TestSpecError;

const DEFAULT_MAX_TOKENS: u32 = 16_384;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 600;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// LLMサービスの種別
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LlmService {
    /// Azure OpenAI（デフォルト）
    #[default]
    Azure,
    /// Amazon Bedrock
    Aws,
    /// 未対応の値（検証時にエラーになる）
    Unknown(String),
}

impl LlmService {
    /// `LLM_SERVICE`の値を解釈する
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "AZURE" => LlmService::Azure,
            "AWS" => LlmService::Aws,
            _ => LlmService::Unknown(value.to_string()),
        }
    }

    /// サービス名
    pub fn as_str(&self) -> &str {
        match self {
            LlmService::Azure => "AZURE",
            LlmService::Aws => "AWS",
            LlmService::Unknown(name) => name,
        }
    }
}

/// Azure OpenAIの接続情報
#[derive(Clone, Default)]
pub struct AzureSettings {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub api_version: Option<String>,
    pub deployment: Option<String>,
}

/// Amazon Bedrockの接続情報
#[derive(Clone, Default)]
pub struct AwsSettings {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// 一時認証情報を使う場合のみ
    pub session_token: Option<String>,
    pub model_id: Option<String>,
}

// 認証情報をログに出さない
impl std::fmt::Debug for AzureSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("deployment", &self.deployment)
            .finish()
    }
}

impl std::fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("model_id", &self.model_id)
            .finish()
    }
}

/// LLM Gatewayの設定
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// 使用するサービス
    pub service: LlmService,

    /// Azure OpenAIの接続情報
    pub azure: AzureSettings,

    /// Amazon Bedrockの接続情報
    pub aws: AwsSettings,

    /// 出力トークン数の上限
    /// デフォルト: 16384
    pub max_tokens: u32,

    /// スロットリング時の最大試行回数
    /// デフォルト: 5
    pub max_retries: u32,

    /// 応答待ちのタイムアウト
    /// デフォルト: 600秒
    pub read_timeout: Duration,

    /// 接続のタイムアウト
    /// デフォルト: 60秒
    pub connect_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            service: LlmService::default(),
            azure: AzureSettings::default(),
            aws: AwsSettings::default(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_retries: DEFAULT_MAX_RETRIES,
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl LlmConfig {
    /// プロセスの環境変数から読み込む
    ///
    /// 接続情報の有無はここでは検証しません（[`LlmConfig::validate`]で検証します）。
    /// 数値項目が数値として読めない場合のみエラーになります。
    pub fn from_env() -> Result<Self, TestSpecError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の取得関数から読み込む
    ///
    /// 空文字列の値は未設定として扱います。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TestSpecError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            service: get("LLM_SERVICE")
                .map(|v| LlmService::parse(&v))
                .unwrap_or_default(),
            azure: AzureSettings {
                api_key: get("AZURE_OPENAI_API_KEY"),
                endpoint: get("AZURE_OPENAI_ENDPOINT"),
                api_version: get("AZURE_OPENAI_API_VERSION"),
                deployment: get("AZURE_OPENAI_DEPLOYMENT"),
            },
            aws: AwsSettings {
                region: get("AWS_REGION"),
                access_key_id: get("AWS_ACCESS_KEY_ID"),
                secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
                session_token: get("AWS_SESSION_TOKEN"),
                model_id: get("AWS_BEDROCK_MODEL_ID"),
            },
            max_tokens: parse_number(get("LLM_MAX_TOKENS"), "LLM_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            max_retries: parse_number(get("LLM_MAX_RETRIES"), "LLM_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            read_timeout: Duration::from_secs(parse_number(
                get("LLM_READ_TIMEOUT_SECS"),
                "LLM_READ_TIMEOUT_SECS",
                DEFAULT_READ_TIMEOUT_SECS,
            )?),
            connect_timeout: Duration::from_secs(parse_number(
                get("LLM_CONNECT_TIMEOUT_SECS"),
                "LLM_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
        })
    }

    /// 選択されたサービスに必要な項目がそろっているかを検証
    ///
    /// # 戻り値
    ///
    /// * `Ok(())` - 検証に成功した場合
    /// * `Err(TestSpecError::Config)` - サービス名が不正、または必須項目が未設定の場合
    ///   （未設定の環境変数名をすべて含む）
    pub fn validate(&self) -> Result<(), TestSpecError> {
        let missing: Vec<&str> = match &self.service {
            LlmService::Azure => [
                ("AZURE_OPENAI_API_KEY", &self.azure.api_key),
                ("AZURE_OPENAI_ENDPOINT", &self.azure.endpoint),
                ("AZURE_OPENAI_API_VERSION", &self.azure.api_version),
                ("AZURE_OPENAI_DEPLOYMENT", &self.azure.deployment),
            ]
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect(),
            LlmService::Aws => [
                ("AWS_REGION", &self.aws.region),
                ("AWS_ACCESS_KEY_ID", &self.aws.access_key_id),
                ("AWS_SECRET_ACCESS_KEY", &self.aws.secret_access_key),
                ("AWS_BEDROCK_MODEL_ID", &self.aws.model_id),
            ]
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect(),
            LlmService::Unknown(name) => {
                return Err(TestSpecError::Config(format!(
                    "Unsupported LLM service: '{}' (expected AZURE or AWS)",
                    name
                )));
            }
        };

        if !missing.is_empty() {
            return Err(TestSpecError::Config(format!(
                "Required settings for {} are not set: {}",
                self.service.as_str(),
                missing.join(", ")
            )));
        }

        if self.max_tokens == 0 {
            return Err(TestSpecError::Config(
                "LLM_MAX_TOKENS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> Result<T, TestSpecError> {
    match value {
        Some(v) => v.trim().parse().map_err(|_| {
            TestSpecError::Config(format!("{} must be a non-negative integer: '{}'", key, v))
        }),
        None => Ok(default),
    }
}

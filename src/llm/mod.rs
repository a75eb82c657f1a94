//! LLM Gateway Module
//!
//! システムプロンプトとユーザープロンプトを送り、応答テキストを受け取る。
//! Azure OpenAIとAmazon Bedrockの2つのプロバイダーを同じ契約で扱い、
//! スロットリング時のみ指数バックオフでリトライする。

mod azure;
mod bedrock;
mod config;
mod gateway;
mod sigv4;

pub use config::{AwsSettings, AzureSettings, LlmConfig, LlmService};
pub use gateway::{backoff_delay, LlmGateway};

use crate::error::TestSpecError;

/// パイプラインから見たLLMの呼び出し口
///
/// 実装は`LlmGateway`ですが、テストでは固定の応答を返す実装に差し替えます。
pub trait CompletionService: Send + Sync {
    /// 1往復のチャット（システム1件、ユーザー1件）を送り、応答テキストを返す
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, TestSpecError>;

    /// 最初のステージを呼ぶ前の準備（設定の検証、クライアントの生成）
    fn ready(&self) -> Result<(), TestSpecError> {
        Ok(())
    }
}

/// プロバイダー呼び出しの失敗分類
///
/// リトライの判断はエラーメッセージではなくこの分類で行います。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderFailure {
    /// レート制限（HTTP 429、`ThrottlingException`）
    Throttled(String),
    /// それ以外の失敗（リトライしない）
    Other(String),
}

/// 具体的なプロバイダーの呼び出し
pub trait ChatProvider: Send + Sync {
    /// ログとエラーに使うプロバイダー名（`AZURE` / `AWS`）
    fn name(&self) -> &str;

    /// 1往復のチャットを送る
    fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderFailure>;
}

/// 設定からプロバイダーを生成
pub(crate) fn build_provider(config: &LlmConfig) -> Result<Box<dyn ChatProvider>, TestSpecError> {
    let http = reqwest::blocking::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.read_timeout)
        .use_rustls_tls()
        .build()
        .map_err(|e| TestSpecError::Config(format!("Failed to build HTTP client: {}", e)))?;

    match &config.service {
        LlmService::Azure => Ok(Box::new(azure::AzureProvider::new(http, &config.azure)?)),
        LlmService::Aws => Ok(Box::new(bedrock::BedrockProvider::new(http, &config.aws)?)),
        LlmService::Unknown(name) => Err(TestSpecError::Config(format!(
            "Unsupported LLM service: '{}'",
            name
        ))),
    }
}

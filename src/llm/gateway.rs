//! LLM Gateway
//!
//! プロバイダーのクライアントを初回利用時に1度だけ生成し、以降は共有する。

use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::{build_provider, ChatProvider, CompletionService, LlmConfig, ProviderFailure};
use crate::error::TestSpecError;

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

/// スロットリング後、次の試行までの待ち時間
///
/// `attempt`回目（0始まり）の試行が失敗した後に`2^attempt + attempt * 2`秒待ちます。
///
/// ```rust
/// use std::time::Duration;
/// use xlsxtestspec::backoff_delay;
///
/// assert_eq!(backoff_delay(0), Duration::from_secs(1));
/// assert_eq!(backoff_delay(3), Duration::from_secs(14));
/// ```
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponential = 2u64.saturating_pow(attempt);
    Duration::from_secs(exponential.saturating_add(u64::from(attempt) * 2))
}

/// LLM Gateway
///
/// プロバイダーの選択、設定の検証、クライアントの遅延生成、リトライをまとめて扱います。
/// クライアントは生成後に変更されないため、複数スレッドから共有できます。
///
/// # 使用例
///
/// ```rust,no_run
/// use xlsxtestspec::{CompletionService, LlmConfig, LlmGateway};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = LlmGateway::new(LlmConfig::from_env()?);
/// gateway.ready()?;
/// let answer = gateway.complete("あなたはテストの専門家です。", "観点を挙げてください。")?;
/// println!("{}", answer);
/// # Ok(())
/// # }
/// ```
pub struct LlmGateway {
    config: LlmConfig,
    client: OnceCell<Box<dyn ChatProvider>>,
    sleeper: Sleeper,
}

impl LlmGateway {
    /// 設定からGatewayを生成（クライアントはまだ作らない）
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
            sleeper: Box::new(std::thread::sleep),
        }
    }

    /// 環境変数の設定からGatewayを生成
    pub fn from_env() -> Result<Self, TestSpecError> {
        Ok(Self::new(LlmConfig::from_env()?))
    }

    /// 生成済みのプロバイダーを使うGatewayを生成
    ///
    /// 設定の検証とクライアント生成は行われません。
    pub fn with_provider(config: LlmConfig, provider: Box<dyn ChatProvider>) -> Self {
        Self {
            config,
            client: OnceCell::with_value(provider),
            sleeper: Box::new(std::thread::sleep),
        }
    }

    /// バックオフの待機処理を差し替える
    pub fn with_sleeper<F>(mut self, sleeper: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// 現在の設定
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// 設定を検証する
    pub fn validate_config(&self) -> Result<(), TestSpecError> {
        self.config.validate()
    }

    /// クライアントを生成する（2回目以降は何もしない）
    ///
    /// 同時に初回呼び出しが起きた場合も、生成されるクライアントは1つです。
    pub fn ensure_client(&self) -> Result<&dyn ChatProvider, TestSpecError> {
        let client = self.client.get_or_try_init(|| {
            self.validate_config()?;
            let provider = build_provider(&self.config)?;
            info!(provider = provider.name(), "LLM client initialized");
            Ok::<_, TestSpecError>(provider)
        })?;
        Ok(&**client)
    }
}

impl CompletionService for LlmGateway {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, TestSpecError> {
        let provider = self.ensure_client()?;
        let max_attempts = self.config.max_retries.max(1);

        let mut attempt = 0u32;
        loop {
            debug!(
                provider = provider.name(),
                attempt,
                max_tokens = self.config.max_tokens,
                "Calling LLM"
            );

            match provider.chat(system_prompt, user_prompt, self.config.max_tokens) {
                Ok(text) => return Ok(text),
                Err(ProviderFailure::Throttled(detail)) => {
                    if attempt + 1 >= max_attempts {
                        error!(
                            provider = provider.name(),
                            attempts = max_attempts,
                            detail = %detail,
                            "Rate limit retries exhausted"
                        );
                        return Err(TestSpecError::RateLimitExceeded {
                            provider: provider.name().to_string(),
                            attempts: max_attempts,
                        });
                    }

                    let wait = backoff_delay(attempt);
                    warn!(
                        provider = provider.name(),
                        attempt,
                        wait_secs = wait.as_secs(),
                        detail = %detail,
                        "Rate limited; retrying"
                    );
                    (self.sleeper)(wait);
                    attempt += 1;
                }
                Err(ProviderFailure::Other(message)) => {
                    error!(provider = provider.name(), error = %message, "LLM call failed");
                    return Err(TestSpecError::Provider {
                        provider: provider.name().to_string(),
                        message,
                    });
                }
            }
        }
    }

    fn ready(&self) -> Result<(), TestSpecError> {
        self.ensure_client().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmService;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// 応答を順番に返すプロバイダー
    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<String, ProviderFailure>>>,
        calls: Arc<Mutex<u32>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, ProviderFailure>>, calls: Arc<Mutex<u32>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls,
            }
        }
    }

    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "AWS"
        }

        fn chat(&self, _: &str, _: &str, _: u32) -> Result<String, ProviderFailure> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderFailure::Other("script exhausted".to_string())))
        }
    }

    fn gateway(
        responses: Vec<Result<String, ProviderFailure>>,
        max_retries: u32,
    ) -> (LlmGateway, Arc<Mutex<u32>>, Arc<Mutex<Vec<Duration>>>) {
        let calls = Arc::new(Mutex::new(0));
        let waits = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&waits);
        let config = LlmConfig {
            max_retries,
            ..Default::default()
        };
        let gateway = LlmGateway::with_provider(
            config,
            Box::new(ScriptedProvider::new(responses, Arc::clone(&calls))),
        )
        .with_sleeper(move |d| recorded.lock().unwrap().push(d));
        (gateway, calls, waits)
    }

    fn throttled() -> Result<String, ProviderFailure> {
        Err(ProviderFailure::Throttled("429".to_string()))
    }

    #[test]
    fn test_backoff_delay() {
        let secs: Vec<u64> = (0..5).map(|k| backoff_delay(k).as_secs()).collect();
        assert_eq!(secs, vec![1, 4, 8, 14, 24]);
    }

    #[test]
    fn test_success_without_retry() {
        let (gateway, calls, waits) = gateway(vec![Ok("ok".to_string())], 5);
        assert_eq!(gateway.complete("s", "u").unwrap(), "ok");
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(waits.lock().unwrap().is_empty());
    }

    #[test]
    fn test_retries_throttling_then_succeeds() {
        let (gateway, calls, waits) =
            gateway(vec![throttled(), throttled(), Ok("done".to_string())], 5);
        assert_eq!(gateway.complete("s", "u").unwrap(), "done");
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(
            *waits.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(4)]
        );
    }

    #[test]
    fn test_throttling_exhausts_attempts() {
        let (gateway, calls, waits) = gateway(vec![throttled(); 5], 5);
        match gateway.complete("s", "u") {
            Err(TestSpecError::RateLimitExceeded { provider, attempts }) => {
                assert_eq!(provider, "AWS");
                assert_eq!(attempts, 5);
            }
            other => panic!("Unexpected result: {:?}", other),
        }
        assert_eq!(*calls.lock().unwrap(), 5);
        // 最後の試行の後は待たない
        assert_eq!(waits.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let (gateway, calls, waits) = gateway(
            vec![
                Err(ProviderFailure::Other("HTTP 400".to_string())),
                Ok("unused".to_string()),
            ],
            5,
        );
        match gateway.complete("s", "u") {
            Err(TestSpecError::Provider { message, .. }) => assert!(message.contains("400")),
            other => panic!("Unexpected result: {:?}", other),
        }
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(waits.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_retries_still_calls_once() {
        let (gateway, calls, _) = gateway(vec![throttled()], 0);
        assert!(matches!(
            gateway.complete("s", "u"),
            Err(TestSpecError::RateLimitExceeded { attempts: 1, .. })
        ));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_ready_fails_on_missing_configuration() {
        let gateway = LlmGateway::new(LlmConfig::default());
        assert!(matches!(gateway.ready(), Err(TestSpecError::Config(_))));

        let gateway = LlmGateway::new(LlmConfig {
            service: LlmService::Unknown("GCP".to_string()),
            ..Default::default()
        });
        match gateway.complete("s", "u") {
            Err(TestSpecError::Config(msg)) => assert!(msg.contains("GCP")),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_ready_with_preset_provider() {
        let (gateway, calls, _) = gateway(vec![], 5);
        assert!(gateway.ready().is_ok());
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}

//! # LLM 集成模块
//!
//! 提供统一的 [`LlmClient`] 接口 (OpenRouter、OpenAI、Anthropic)，以及在其之上
//! 负责 max_tokens 裁剪、重试和错误分类的 [`LlmGateway`]。

pub mod providers;
pub mod retry;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ExtractorConfig, LlmConfig, ModelsConfig};
use crate::error::LlmError;
use crate::types::RawModelReply;

pub use providers::{AnthropicClient, OpenAiCompatibleClient};
pub use retry::{RetryExhausted, RetryPolicy, call_with_retry};

/// LLM 客户端 trait
///
/// 一次调用只发送一条提示词和一份文档，返回模型的原始文本。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        document_text: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<RawModelReply, LlmError>;
}

/// 模型输出上限表
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    default_max_tokens: u32,
    ceilings: BTreeMap<String, u32>,
}

impl ModelCatalog {
    pub fn new(default_max_tokens: u32, ceilings: BTreeMap<String, u32>) -> Self {
        Self {
            default_max_tokens,
            ceilings,
        }
    }

    pub fn from_config(config: &ModelsConfig) -> Self {
        Self::new(config.default_max_tokens, config.ceilings.clone())
    }

    pub fn ceiling(&self, model: &str) -> u32 {
        self.ceilings
            .get(model)
            .copied()
            .unwrap_or(self.default_max_tokens)
    }

    /// 将请求的 max_tokens 限制在模型上限以内
    pub fn clamp(&self, model: &str, requested: u32) -> u32 {
        let ceiling = self.ceiling(model);
        if requested > ceiling {
            debug!(model = model, requested, ceiling, "max_tokens 超过模型上限，已裁剪");
            ceiling
        } else {
            requested
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::from_config(&ExtractorConfig::default().models)
    }
}

/// 网关调用结果
///
/// `Failure` 是预期内的 API 错误 (状态码、超时、响应损坏)，调用方应将其视为空结果。
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    Reply(RawModelReply),
    Failure { attempts: u32, last_error: LlmError },
}

/// LLM 网关
pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    model: String,
    catalog: ModelCatalog,
    retry: RetryPolicy,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, catalog: ModelCatalog, retry: RetryPolicy) -> Self {
        Self {
            client,
            model: model.into(),
            catalog,
            retry,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 发送一次请求
    ///
    /// 只有传输层失败、缺少密钥、不支持的提供商以及取消会以 `Err` 返回。
    pub async fn call(
        &self,
        prompt: &str,
        document_text: &str,
        max_tokens: u32,
        temperature: f32,
        cancel: &CancellationToken,
    ) -> Result<GatewayOutcome, LlmError> {
        let max_tokens = self.catalog.clamp(&self.model, max_tokens);
        let client = self.client.clone();

        info!(model = %self.model, max_tokens, "🔧 发送 LLM 请求");

        let result = call_with_retry(&self.retry, cancel, &self.model, |attempt| {
            let client = client.clone();
            async move {
                debug!(attempt, "LLM 请求尝试");
                client.complete(prompt, document_text, max_tokens, temperature).await
            }
        })
        .await;

        match result {
            Ok(reply) => {
                info!(elapsed_ms = reply.elapsed_ms, chars = reply.text.chars().count(), "✅ LLM 请求完成");
                Ok(GatewayOutcome::Reply(reply))
            }
            Err(RetryExhausted { attempts, last_error }) if last_error.is_api_envelope() => {
                warn!(attempts, "❌ LLM 请求失败，按空结果处理: {}", last_error);
                Ok(GatewayOutcome::Failure { attempts, last_error })
            }
            Err(RetryExhausted { last_error, .. }) => Err(last_error),
        }
    }
}

/// LLM 客户端工厂
pub struct LlmClientFactory;

impl LlmClientFactory {
    /// 根据配置创建客户端，API 密钥优先取配置，其次取提供商对应的环境变量
    pub fn create(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        let provider = config.provider.to_lowercase();

        let client: Arc<dyn LlmClient> = match provider.as_str() {
            "openrouter" => Arc::new(OpenAiCompatibleClient::openrouter(
                &config.model,
                Self::api_key(config, "OPENROUTER_API_KEY")?,
                config.base_url.clone(),
                config.timeout_seconds,
                config.app_url.clone(),
            )?),
            "openai" => Arc::new(OpenAiCompatibleClient::openai(
                &config.model,
                Self::api_key(config, "OPENAI_API_KEY")?,
                config.base_url.clone(),
                config.timeout_seconds,
            )?),
            "anthropic" => Arc::new(AnthropicClient::new(
                &config.model,
                Self::api_key(config, "ANTHROPIC_API_KEY")?,
                config.base_url.clone(),
                config.timeout_seconds,
            )?),
            _ => {
                return Err(LlmError::UnsupportedProvider {
                    provider: config.provider.clone(),
                });
            }
        };

        info!(provider = %provider, model = %config.model, "🚀 LLM 客户端已创建");
        Ok(client)
    }

    fn api_key(config: &LlmConfig, env_var: &str) -> Result<String, LlmError> {
        config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(env_var).ok().filter(|key| !key.trim().is_empty()))
            .ok_or_else(|| LlmError::MissingApiKey {
                provider: config.provider.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use std::time::Duration;

    fn reply(text: &str) -> RawModelReply {
        RawModelReply {
            text: text.to_string(),
            elapsed_ms: 1,
        }
    }

    fn gateway(mock: MockLlmClient) -> LlmGateway {
        LlmGateway::new(
            Arc::new(mock),
            "claude-3-5-haiku-20241022",
            ModelCatalog::default(),
            RetryPolicy::new(3, Duration::ZERO),
        )
    }

    #[test]
    fn test_catalog_clamps_to_ceiling() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.clamp("claude-3-5-haiku-20241022", 30_000), 8192);
        assert_eq!(catalog.clamp("claude-3-5-haiku-20241022", 4000), 4000);
        assert_eq!(catalog.clamp("unknown-model", 30_000), 8000);
    }

    #[tokio::test]
    async fn test_gateway_clamps_and_returns_reply() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete()
            .withf(|_, _, max_tokens, _| *max_tokens == 8192)
            .times(1)
            .returning(|_, _, _, _| Ok(reply("{}")));

        let outcome = gateway(mock)
            .call("prompt", "doc", 30_000, 0.1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, GatewayOutcome::Reply(reply("{}")));
    }

    #[tokio::test]
    async fn test_gateway_retries_rate_limit() {
        let mut seq = Sequence::new();
        let mut mock = MockLlmClient::new();
        mock.expect_complete()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| {
                Err(LlmError::ApiStatus {
                    provider: "openrouter".to_string(),
                    status: 429,
                    body: "rate limited".to_string(),
                })
            });
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(reply("ok")));

        let outcome = gateway(mock)
            .call("prompt", "doc", 100, 0.1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, GatewayOutcome::Reply(reply("ok")));
    }

    #[tokio::test]
    async fn test_gateway_degrades_client_error_to_failure() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete().times(1).returning(|_, _, _, _| {
            Err(LlmError::ApiStatus {
                provider: "openrouter".to_string(),
                status: 400,
                body: "bad request".to_string(),
            })
        });

        let outcome = gateway(mock)
            .call("prompt", "doc", 100, 0.1, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, GatewayOutcome::Failure { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_gateway_exhausted_timeouts_become_failure() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete().times(3).returning(|_, _, _, _| {
            Err(LlmError::Timeout {
                provider: "anthropic".to_string(),
            })
        });

        let outcome = gateway(mock)
            .call("prompt", "doc", 100, 0.1, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, GatewayOutcome::Failure { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_gateway_propagates_transport_failure() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete().times(3).returning(|_, _, _, _| {
            Err(LlmError::Transport {
                provider: "openrouter".to_string(),
                error: "connection reset".to_string(),
            })
        });

        let result = gateway(mock)
            .call("prompt", "doc", 100, 0.1, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(LlmError::Transport { .. })));
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let mut config = ExtractorConfig::default().llm;
        config.provider = "cohere".to_string();
        config.api_key = Some("key".to_string());

        assert!(matches!(
            LlmClientFactory::create(&config),
            Err(LlmError::UnsupportedProvider { .. })
        ));
    }

    #[test]
    fn test_factory_uses_configured_key() {
        let mut config = ExtractorConfig::default().llm;
        config.provider = "anthropic".to_string();
        config.api_key = Some("sk-test".to_string());

        assert!(LlmClientFactory::create(&config).is_ok());
    }
}

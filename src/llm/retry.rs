//! 固定间隔重试策略

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::LlmError;

/// 重试策略：最大尝试次数 + 固定间隔
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_secs(config.delay_seconds))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

/// 重试结束仍未成功
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: LlmError,
}

/// 按策略反复调用 `op`，直到成功、遇到不可重试错误或次数耗尽
///
/// 每次尝试和每次等待都会响应取消信号。`op` 接收当前尝试序号 (从 1 开始)。
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = op(attempt) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error == LlmError::Cancelled {
            return Err(RetryExhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        if !error.is_transient() || attempt >= policy.max_attempts {
            warn!(
                label = label,
                attempt = attempt,
                "❌ 调用失败，不再重试: {}", error
            );
            return Err(RetryExhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        warn!(
            label = label,
            attempt = attempt,
            max_attempts = policy.max_attempts,
            "⚠️ 调用失败，{:?} 后重试: {}", policy.delay, error
        );

        if !policy.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(label = label, "重试等待被取消");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: LlmError::Cancelled,
                    });
                }
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> LlmError {
        LlmError::ApiStatus {
            provider: "openrouter".to_string(),
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_errors() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let cancel = CancellationToken::new();

        let result = call_with_retry(&policy, &cancel, "test", |attempt| async move {
            if attempt < 3 { Err(server_error()) } else { Ok(attempt) }
        })
        .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = call_with_retry(&policy, &cancel, "test", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error, server_error());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = call_with_retry(&policy, &cancel, "test", |_| async {
            Err(LlmError::ApiStatus {
                provider: "openai".to_string(),
                status: 401,
                body: "unauthorized".to_string(),
            })
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = call_with_retry(&policy, &cancel, "test", |_| async {
            Err(server_error())
        })
        .await;

        assert_eq!(result.unwrap_err().last_error, LlmError::Cancelled);
    }
}

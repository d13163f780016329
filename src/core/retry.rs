//! 通用有界重试组合子
//!
//! 按 RetryPolicy（最大尝试次数 + 退避函数）重复执行异步操作，直到成功、遇到不可重试错误或次数耗尽。
//! 文件写入校验（线性退避）与 LLM 调用（指数退避）共用同一实现。

use std::future::Future;
use std::time::Duration;

/// 退避策略：第 n 次失败后等待多久再发起第 n+1 次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// 不等待
    None,
    /// attempt × step
    Linear { step: Duration },
    /// base × 2^(attempt-1)，上限 max
    Exponential { base: Duration, max: Duration },
}

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Linear { step },
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                base,
                max: max.max(base),
            },
        }
    }

    /// 只尝试一次
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// 第 `attempt` 次（从 1 开始）失败后的等待时间
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Linear { step } => step.saturating_mul(attempt.max(1)),
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(31);
                base.saturating_mul(1_u32 << shift).min(max)
            }
        }
    }
}

/// 成功结果及其所用的尝试次数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// 重试耗尽（或遇到不可重试错误）时的最后一个错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// 按策略执行 `op`；`op` 收到当前尝试序号（从 1 开始），`is_retriable` 为 false 时立即返回错误。
/// 最后一次尝试失败后不再等待。
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: RetryPolicy,
    mut op: F,
    mut is_retriable: R,
) -> Result<Attempted<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1_u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(Attempted { value, attempts: attempt }),
            Err(error) => {
                if attempt >= max_attempts || !is_retriable(&error) {
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failed attempt"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_delay_grows_with_attempt() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(250), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_attempts_normalized_to_one() {
        assert_eq!(RetryPolicy::linear(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_first_success_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            RetryPolicy::linear(3, Duration::from_millis(1)),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>("ok") }
            },
            |_| true,
        )
        .await
        .unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let result = retry_with_backoff(
            RetryPolicy::linear(3, Duration::from_millis(1)),
            |attempt| async move {
                if attempt < 3 {
                    Err(format!("fail {attempt}"))
                } else {
                    Ok(attempt)
                }
            },
            |_| true,
        )
        .await
        .unwrap();
        assert_eq!(result.value, 3);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let err = retry_with_backoff(
            RetryPolicy::linear(3, Duration::from_millis(1)),
            |attempt| async move { Err::<(), _>(format!("fail {attempt}")) },
            |_| true,
        )
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "fail 3");
    }

    #[tokio::test]
    async fn test_non_retriable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff(
            RetryPolicy::linear(5, Duration::from_millis(1)),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("fatal") }
            },
            |_| false,
        )
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

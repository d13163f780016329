//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Scripted）实现 LlmClient：给定完整消息列表（含 system）返回一段文本。
//! 工具调用以 JSON 形式嵌在文本里，由 react::planner 解析。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::retry::{retry_with_backoff, RetryPolicy};
use crate::memory::Message;

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// 限流 / 网络 / 超时视为瞬时错误，可重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Network(_) | LlmError::Timeout
        )
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 带重试的 LLM 客户端：瞬时错误按指数退避重试，其余错误直接返回
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let inner = &self.inner;
        retry_with_backoff(
            self.policy,
            |attempt| async move {
                let result = inner.complete(messages).await;
                if let Err(e) = &result {
                    if e.is_transient() {
                        tracing::warn!(attempt, error = %e, "transient LLM failure");
                    }
                }
                result
            },
            LlmError::is_transient,
        )
        .await
        .map(|ok| ok.value)
        .map_err(|e| e.last_error)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

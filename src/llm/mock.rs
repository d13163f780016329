//! Scripted LLM 客户端（用于测试，无需 API）
//!
//! 按顺序回放预设输出；脚本耗尽后返回 fallback（若设置），否则报错。记录每次收到的消息，便于断言 prompt。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
    failures: Mutex<VecDeque<LlmError>>,
    fallback: Option<String>,
    requests: Mutex<Vec<Vec<Message>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// 脚本耗尽后一直返回该文本
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// 下一次调用返回指定错误（可叠加多次）
    pub fn fail_next(&self, error: LlmError) {
        lock(&self.failures).push_back(error);
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// 历次调用收到的完整消息列表
    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        lock(&self.requests).push(messages.to_vec());
        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }
        if let Some(next) = lock(&self.responses).pop_front() {
            return Ok(next);
        }
        self.fallback
            .clone()
            .ok_or_else(|| LlmError::ApiError("scripted responses exhausted".to_string()))
    }
}

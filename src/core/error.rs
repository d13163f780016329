//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / Abort。
//! 工具层的可恢复错误（命令失败、读失败）不会走到这里，它们被转成 Observation 交给模型。

use thiserror::Error;

use crate::llm::LlmError;
use crate::sandbox::SandboxError;
use crate::store::StoreError;

/// 编排核心运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型输出中的工具调用 JSON 无法解析
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    /// 模型请求了不存在的工具
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 工具参数与 schema 不匹配
    #[error("Invalid tool arguments for {tool}: {reason}")]
    InvalidToolArgs { tool: String, reason: String },

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    /// 沙箱创建 / 恢复失败（基础设施错误，直接上抛）
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// 持久化失败（基础设施错误，直接上抛）
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误、幻觉工具）
    RetryWithPrompt(String),
    /// 终止当前运行，错误上抛
    Abort,
}

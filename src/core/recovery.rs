//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供单步执行器决定是注入重试提示还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：把模型的格式错误变成下一轮的提示，其余错误一律终止
#[derive(Debug, Default)]
pub struct RecoveryEngine {
    tool_names: Vec<String>,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置可用工具名，幻觉工具时提示给模型
    pub fn with_tool_names(mut self, names: Vec<String>) -> Self {
        self.tool_names = names;
        self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output contained malformed tool-call JSON: {raw}. \
                 When calling a tool you must output exactly one JSON object of the form \
                 {{\"tool\": \"<name>\", \"args\": {{...}}}} and nothing else."
            )),
            AgentError::UnknownTool(name) => RecoveryAction::RetryWithPrompt(format!(
                "Tool '{name}' does not exist. Available tools: {}.",
                self.tool_names.join(", ")
            )),
            AgentError::InvalidToolArgs { tool, reason } => RecoveryAction::RetryWithPrompt(
                format!("Arguments for tool '{tool}' were invalid: {reason}. Check the tool schema and try again."),
            ),
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_recovery_json_parse_error() {
        let engine = RecoveryEngine::new();
        let err = AgentError::JsonParseError("invalid json".to_string());
        match engine.handle(&err) {
            RecoveryAction::RetryWithPrompt(msg) => assert!(msg.contains("JSON")),
            _ => panic!("Expected RetryWithPrompt"),
        }
    }

    #[test]
    fn test_recovery_unknown_tool_lists_available() {
        let engine = RecoveryEngine::new()
            .with_tool_names(vec!["terminal".into(), "readFiles".into()]);
        let err = AgentError::UnknownTool("deploy".to_string());
        match engine.handle(&err) {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains("deploy"));
                assert!(msg.contains("terminal, readFiles"));
            }
            _ => panic!("Expected RetryWithPrompt"),
        }
    }

    #[test]
    fn test_recovery_invalid_args() {
        let engine = RecoveryEngine::new();
        let err = AgentError::InvalidToolArgs {
            tool: "terminal".into(),
            reason: "missing field `command`".into(),
        };
        assert!(matches!(engine.handle(&err), RecoveryAction::RetryWithPrompt(_)));
    }

    #[test]
    fn test_recovery_llm_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::LlmError(LlmError::RateLimited { retry_after_ms: 1000 });
        assert!(matches!(engine.handle(&err), RecoveryAction::Abort));
    }

    #[test]
    fn test_recovery_cancelled() {
        let engine = RecoveryEngine::new();
        assert!(matches!(engine.handle(&AgentError::Cancelled), RecoveryAction::Abort));
    }
}

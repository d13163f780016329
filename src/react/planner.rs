//! Planner：调用代码模型与 Tool Call 解析
//!
//! 模型回复要么是普通文本，要么包含 JSON 形式的工具调用：
//! 单个 `{"tool": "...", "args": {...}}`，或它们组成的数组，可放在 ```json 代码块中。

use std::sync::Arc;

use serde_json::Value;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::ToolCall;

/// Planner 输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 普通文本回复
    Response(String),
    /// 按顺序执行的工具调用
    ToolCalls(Vec<ToolCall>),
}

/// 提取候选 JSON：优先 ```json 代码块，其次整段以 `[` 开头的数组，再次第一个 `{` 到最后一个 `}`
fn extract_json(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if trimmed.starts_with('[') {
        return Some(trimmed);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析模型输出：含有效工具调用 JSON 则为 ToolCalls，否则为 Response
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();
    let Some(json_str) = extract_json(trimmed) else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;
    let calls: Vec<ToolCall> = match value {
        Value::Array(_) => serde_json::from_value(value),
        other => serde_json::from_value(other).map(|c| vec![c]),
    }
    .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    let calls: Vec<ToolCall> = calls.into_iter().filter(|c| !c.tool.is_empty()).collect();
    if calls.is_empty() {
        Ok(PlannerOutput::Response(trimmed.to_string()))
    } else {
        Ok(PlannerOutput::ToolCalls(calls))
    }
}

/// Planner：持有模型与 system prompt，每次调用把 system 拼在对话历史之前
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn plan(&self, messages: &[Message]) -> Result<String, AgentError> {
        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(Message::system(self.system_prompt.clone()));
        full_messages.extend_from_slice(messages);
        Ok(self.llm.complete(&full_messages).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::Role;

    #[test]
    fn test_parse_plain_response() {
        assert_eq!(
            parse_llm_output("  I need more details.  ").unwrap(),
            PlannerOutput::Response("I need more details.".into())
        );
    }

    #[test]
    fn test_parse_single_call_with_prose() {
        let out = parse_llm_output(
            r#"Let me install it. {"tool": "terminal", "args": {"command": "npm i zod"}}"#,
        )
        .unwrap();
        match out {
            PlannerOutput::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].tool, "terminal");
                assert_eq!(calls[0].args["command"], "npm i zod");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_fenced_array() {
        let text = "```json\n[{\"tool\": \"readFiles\", \"args\": {\"files\": [\"a\"]}}, {\"tool\": \"terminal\", \"args\": {\"command\": \"ls\"}}]\n```";
        match parse_llm_output(text).unwrap() {
            PlannerOutput::ToolCalls(calls) => {
                let names: Vec<_> = calls.iter().map(|c| c.tool.as_str()).collect();
                assert_eq!(names, vec!["readFiles", "terminal"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_json() {
        assert!(matches!(
            parse_llm_output(r#"{"tool": "terminal", "args": "#),
            Ok(PlannerOutput::Response(_)) | Err(AgentError::JsonParseError(_))
        ));
        assert!(matches!(
            parse_llm_output(r#"{"tool": "terminal" "args": {}}"#),
            Err(AgentError::JsonParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_plan_prepends_system_prompt() {
        let llm = Arc::new(ScriptedLlmClient::new(["ok"]));
        let planner = Planner::new(llm.clone(), "you are a coder");
        let reply = planner.plan(&[Message::user("build a button")]).await.unwrap();
        assert_eq!(reply, "ok");
        let requests = llm.requests();
        assert_eq!(requests[0][0].role, Role::System);
        assert_eq!(requests[0][0].content, "you are a coder");
        assert_eq!(requests[0][1].content, "build a button");
    }
}

//! 一次性辅助代理：基于最终摘要生成 Fragment 标题与面向用户的回复
//!
//! 不参与迭代、不调用工具；模型返回空文本时使用固定兜底文案。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

pub const TITLE_FALLBACK: &str = "Fragment";
pub const RESPONSE_FALLBACK: &str = "Generated response";

pub struct OneShotAgent {
    name: &'static str,
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    fallback: &'static str,
}

impl OneShotAgent {
    pub fn new(
        name: &'static str,
        llm: Arc<dyn LlmClient>,
        system_prompt: impl Into<String>,
        fallback: &'static str,
    ) -> Self {
        Self {
            name,
            llm,
            system_prompt: system_prompt.into(),
            fallback,
        }
    }

    /// 标题生成代理
    pub fn title_generator(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self::new("fragment-title-generator", llm, system_prompt, TITLE_FALLBACK)
    }

    /// 回复生成代理
    pub fn response_generator(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self::new("response-generator", llm, system_prompt, RESPONSE_FALLBACK)
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub async fn run(&self, input: &str) -> Result<String, AgentError> {
        let messages = [Message::system(self.system_prompt.clone()), Message::user(input)];
        let output = self.llm.complete(&messages).await?;
        let output = output.trim();
        if output.is_empty() {
            tracing::warn!(agent = self.name, "empty auxiliary output, using fallback");
            Ok(self.fallback.to_string())
        } else {
            Ok(output.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[tokio::test]
    async fn test_title_from_summary() {
        let llm = Arc::new(ScriptedLlmClient::new(["  Button Component \n"]));
        let agent = OneShotAgent::title_generator(llm.clone(), "title prompt");
        assert_eq!(agent.run("<task_summary>x</task_summary>").await.unwrap(), "Button Component");
        let req = &llm.requests()[0];
        assert_eq!(req[0].content, "title prompt");
        assert_eq!(req[1].content, "<task_summary>x</task_summary>");
    }

    #[tokio::test]
    async fn test_empty_output_uses_fallback() {
        let llm = Arc::new(ScriptedLlmClient::new(["", "   "]));
        let title = OneShotAgent::title_generator(llm.clone(), "t");
        let response = OneShotAgent::response_generator(llm, "r");
        assert_eq!(title.run("s").await.unwrap(), TITLE_FALLBACK);
        assert_eq!(response.run("s").await.unwrap(), RESPONSE_FALLBACK);
    }
}

//! Agent Step Executor：一次模型调用 + 其请求的全部工具调用
//!
//! 本身无跨步状态，所有记忆都在传入的 `&mut RunState` 中：
//! assistant 回复与工具 Observation 依次追加到对话历史，文件写入由工具层记入 `state.files`。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::core::state::RunState;
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::Message;
use crate::react::events::{preview, send_event, AgentEvent};
use crate::react::planner::{parse_llm_output, Planner, PlannerOutput};
use crate::react::termination::TerminationDetector;
use crate::tools::{ToolCall, ToolExecutor, ToolInvocation, ToolOutput};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 单步结束时的情况
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// 普通文本回复（可能含完成标记）
    Responded,
    /// 执行了 n 个工具调用
    ToolsExecuted(usize),
    /// 模型输出有格式问题，已注入重试提示
    Recovered,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    /// 模型本轮原始文本
    pub text: String,
    pub outcome: StepOutcome,
}

pub struct StepExecutor {
    planner: Arc<Planner>,
    tools: Arc<ToolExecutor>,
    recovery: Arc<RecoveryEngine>,
    detector: TerminationDetector,
}

impl StepExecutor {
    pub fn new(
        planner: Arc<Planner>,
        tools: Arc<ToolExecutor>,
        recovery: Arc<RecoveryEngine>,
        detector: TerminationDetector,
    ) -> Self {
        Self {
            planner,
            tools,
            recovery,
            detector,
        }
    }

    pub fn detector(&self) -> &TerminationDetector {
        &self.detector
    }

    /// 执行一步；模型调用失败等不可恢复错误直接返回 Err
    pub async fn run(
        &self,
        sandbox_id: &str,
        state: &mut RunState,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<StepResult, AgentError> {
        let text = self.planner.plan(&state.messages).await?;
        state.push_message(Message::assistant(text.clone()));

        // 含完成标记的回复一律视为最终文本，不再解析工具调用
        if self.detector.detect(&text).is_some() {
            return Ok(StepResult {
                text,
                outcome: StepOutcome::Responded,
            });
        }

        let outcome = match parse_llm_output(&text) {
            Ok(PlannerOutput::Response(_)) => StepOutcome::Responded,
            Ok(PlannerOutput::ToolCalls(calls)) => {
                self.run_tool_calls(sandbox_id, calls, state, events).await?
            }
            Err(e) => {
                self.recover(e, state, events)?;
                StepOutcome::Recovered
            }
        };
        Ok(StepResult { text, outcome })
    }

    async fn run_tool_calls(
        &self,
        sandbox_id: &str,
        calls: Vec<ToolCall>,
        state: &mut RunState,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<StepOutcome, AgentError> {
        let mut executed = 0;
        for call in calls {
            let invocation = match ToolInvocation::from_call(&call) {
                Ok(inv) => inv,
                Err(e) => {
                    self.recover(e, state, events)?;
                    continue;
                }
            };

            send_event(
                events,
                AgentEvent::ToolCall {
                    tool: call.tool.clone(),
                    args: call.args.clone(),
                },
            );
            let is_write = matches!(invocation, ToolInvocation::CreateOrUpdateFiles(_));
            let output = self.tools.execute(sandbox_id, invocation, state).await;
            executed += 1;

            let observation = output.observation();
            send_event(
                events,
                AgentEvent::Observation {
                    tool: call.tool.clone(),
                    ok: output.is_ok(),
                    preview: preview(&observation, OBSERVATION_PREVIEW_CHARS),
                },
            );
            if is_write {
                send_event(
                    events,
                    AgentEvent::FilesWritten {
                        total: state.files.len(),
                    },
                );
            }
            if let ToolOutput::Failure(_) = &output {
                tracing::warn!(tool = %call.tool, "tool returned failure observation");
            }
            state.push_message(Message::user(format!(
                "Observation from {}: {}",
                call.tool, observation
            )));
        }
        if executed == 0 {
            return Ok(StepOutcome::Recovered);
        }
        Ok(StepOutcome::ToolsExecuted(executed))
    }

    /// 可恢复错误注入为下一轮的 user 提示；其余错误上抛
    fn recover(
        &self,
        error: AgentError,
        state: &mut RunState,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<(), AgentError> {
        match self.recovery.handle(&error) {
            RecoveryAction::RetryWithPrompt(prompt) => {
                tracing::warn!(error = %error, "recoverable model output error");
                send_event(
                    events,
                    AgentEvent::Recovery {
                        detail: error.to_string(),
                    },
                );
                state.push_message(Message::user(prompt));
                Ok(())
            }
            RecoveryAction::Abort => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::Role;
    use crate::sandbox::{LocalSandboxProvider, SandboxProvider};
    use crate::tools::ToolKind;

    async fn fixture(
        script: Vec<&str>,
    ) -> (tempfile::TempDir, StepExecutor, String) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("templates/base")).unwrap();
        let provider = LocalSandboxProvider::new(tmp.path().join("sandboxes"), tmp.path().join("templates"));
        let id = provider.create("base").await.unwrap().id().to_string();
        let llm = Arc::new(ScriptedLlmClient::new(script));
        let names = ToolKind::ALL.iter().map(|k| k.name().to_string()).collect();
        let step = StepExecutor::new(
            Arc::new(Planner::new(llm, "system")),
            Arc::new(ToolExecutor::new(Arc::new(provider), 30)),
            Arc::new(RecoveryEngine::new().with_tool_names(names)),
            TerminationDetector::default(),
        );
        (tmp, step, id)
    }

    #[tokio::test]
    async fn test_tool_call_folds_files_and_observation() {
        let (_tmp, step, id) = fixture(vec![
            r#"{"tool": "createOrUpdateFiles", "args": {"files": [{"path": "index.html", "content": "<button/>"}]}}"#,
        ])
        .await;
        let mut state = RunState::with_history(vec![Message::user("build a button")]);
        let result = step.run(&id, &mut state, None).await.unwrap();

        assert_eq!(result.outcome, StepOutcome::ToolsExecuted(1));
        assert_eq!(state.files["index.html"], "<button/>");
        let last = state.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.starts_with("Observation from createOrUpdateFiles"));
    }

    #[tokio::test]
    async fn test_marker_text_is_not_parsed_as_tool_call() {
        let (_tmp, step, id) = fixture(vec![
            "<task_summary>wrote {\"tool\": \"terminal\"}</task_summary>",
        ])
        .await;
        let mut state = RunState::new();
        let result = step.run(&id, &mut state, None).await.unwrap();
        assert_eq!(result.outcome, StepOutcome::Responded);
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_injects_retry_prompt() {
        let (_tmp, step, id) = fixture(vec![r#"{"tool": "deploy", "args": {}}"#]).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut state = RunState::new();
        let result = step.run(&id, &mut state, Some(&tx)).await.unwrap();

        assert_eq!(result.outcome, StepOutcome::Recovered);
        let prompt = &state.messages.last().unwrap().content;
        assert!(prompt.contains("deploy"));
        assert!(prompt.contains("createOrUpdateFiles"));
        assert!(matches!(rx.try_recv().unwrap(), AgentEvent::Recovery { .. }));
    }

    #[tokio::test]
    async fn test_failed_command_is_observation_not_error() {
        let (_tmp, step, id) = fixture(vec![r#"{"tool": "terminal", "args": {"command": "exit 1"}}"#]).await;
        let mut state = RunState::new();
        let result = step.run(&id, &mut state, None).await.unwrap();
        assert_eq!(result.outcome, StepOutcome::ToolsExecuted(1));
        assert!(state.messages.last().unwrap().content.contains("exit status 1"));
    }

    #[tokio::test]
    async fn test_llm_failure_aborts_step() {
        let (_tmp, step, id) = fixture(vec![]).await;
        let mut state = RunState::new();
        assert!(matches!(
            step.run(&id, &mut state, None).await,
            Err(AgentError::LlmError(_))
        ));
    }
}

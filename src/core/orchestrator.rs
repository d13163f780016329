//! Run Orchestrator：一次运行的完整流程
//!
//! get-sandbox-id -> get-previous-messages -> agent-network -> generate-title / generate-response
//! -> get-sandbox-url -> save-result。持久化只在最后写一次；沙箱与存储错误直接上抛给宿主。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::Instrument;

use crate::core::state::RunState;
use crate::core::AgentError;
use crate::memory::{Message, Role};
use crate::react::{AgentEvent, AgentNetwork, OneShotAgent};
use crate::sandbox::SandboxProvider;
use crate::store::{MessageRole, MessageStore, NewFragment, NewMessage, StoredMessage};

/// 失败时持久化的统一提示，不区分具体原因
pub const GENERIC_ERROR_MESSAGE: &str = "something went wrong. Please try again.";

/// 入站运行请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub project_id: String,
    /// 用户 prompt
    pub value: String,
}

/// 运行失败的具体原因（只用于日志与返回值，持久化时统一为 GENERIC_ERROR_MESSAGE）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 迭代结束仍没有摘要
    Incomplete,
    /// 有摘要但没有写入任何文件
    NoFiles,
}

/// 成功条件：摘要非空且至少有一个文件
pub fn classify(state: &RunState) -> Result<(), FailureReason> {
    if !state.has_summary() {
        Err(FailureReason::Incomplete)
    } else if state.files.is_empty() {
        Err(FailureReason::NoFiles)
    } else {
        Ok(())
    }
}

/// 返回给上层的运行结果投影
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success {
        message_id: String,
        url: String,
        title: String,
        summary: String,
    },
    Failed {
        message_id: String,
        reason: FailureReason,
        message: String,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }
}

/// 把最近消息（最新在前）转换为按时间正序的对话历史
pub fn seed_history(recent: Vec<StoredMessage>) -> Vec<Message> {
    recent
        .into_iter()
        .rev()
        .map(|m| Message {
            role: match m.role {
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
            },
            content: m.content,
        })
        .collect()
}

/// 编排参数
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub template: String,
    pub sandbox_timeout: Duration,
    pub preview_port: u16,
    pub url_scheme: String,
    pub history_limit: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            template: "devcook-nextjs-test-2".to_string(),
            sandbox_timeout: Duration::from_secs(1800),
            preview_port: 3000,
            url_scheme: "https".to_string(),
            history_limit: 5,
        }
    }
}

pub struct RunOrchestrator {
    provider: Arc<dyn SandboxProvider>,
    store: Arc<dyn MessageStore>,
    network: AgentNetwork,
    title_agent: OneShotAgent,
    response_agent: OneShotAgent,
    settings: OrchestratorSettings,
}

impl RunOrchestrator {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        store: Arc<dyn MessageStore>,
        network: AgentNetwork,
        title_agent: OneShotAgent,
        response_agent: OneShotAgent,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            provider,
            store,
            network,
            title_agent,
            response_agent,
            settings,
        }
    }

    pub fn store(&self) -> Arc<dyn MessageStore> {
        self.store.clone()
    }

    pub fn provider(&self) -> Arc<dyn SandboxProvider> {
        self.provider.clone()
    }

    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome, AgentError> {
        self.run_with_events(request, None).await
    }

    /// 执行一次运行；`events` 接收迭代过程事件
    pub async fn run_with_events(
        &self,
        request: &RunRequest,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<RunOutcome, AgentError> {
        let span = tracing::info_span!("run", project_id = %request.project_id);
        self.run_inner(request, events).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: &RunRequest,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<RunOutcome, AgentError> {
        tracing::info!(step = "get-sandbox-id", template = %self.settings.template, "step started");
        let sandbox = self.provider.create(&self.settings.template).await?;
        sandbox.set_timeout(self.settings.sandbox_timeout).await?;
        let sandbox_id = sandbox.id().to_string();
        tracing::info!(step = "get-sandbox-id", sandbox_id = %sandbox_id, "step finished");

        tracing::info!(step = "get-previous-messages", "step started");
        let recent = self
            .store
            .recent_messages(&request.project_id, self.settings.history_limit)
            .await?;
        let history = seed_history(recent);
        tracing::info!(step = "get-previous-messages", count = history.len(), "step finished");

        let mut state = RunState::with_history(history);
        // 提交入口已持久化本条 prompt 时，历史末尾就是它，不再重复追加
        let already_seeded = state
            .messages
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == request.value);
        if !already_seeded {
            state.push_message(Message::user(request.value.clone()));
        }

        tracing::info!(step = "agent-network", sandbox_id = %sandbox_id, "step started");
        let network_outcome = self.network.run(&sandbox_id, &mut state, events).await?;
        tracing::info!(
            step = "agent-network",
            iterations = network_outcome.iterations,
            exit = ?network_outcome.exit,
            files = state.files.len(),
            "step finished"
        );

        let verdict = classify(&state);
        let generated = match (&verdict, state.summary()) {
            (Ok(()), Some(summary)) => {
                tracing::info!(step = "generate-title", "step started");
                let title = self.title_agent.run(summary).await?;
                tracing::info!(step = "generate-response", "step started");
                let response = self.response_agent.run(summary).await?;
                Some((title, response))
            }
            _ => None,
        };

        tracing::info!(step = "get-sandbox-url", "step started");
        // 沿用本次运行创建的句柄；运行超过沙箱存活时间时按 id 重连会得到 Expired
        let host = sandbox.host(self.settings.preview_port);
        let url = format!("{}://{}", self.settings.url_scheme, host);
        tracing::info!(step = "get-sandbox-url", url = %url, "step finished");

        tracing::info!(step = "save-result", "step started");
        let outcome = match (verdict, generated) {
            (Ok(()), Some((title, response))) => {
                let saved = self
                    .store
                    .append_message(NewMessage::assistant_result(
                        request.project_id.clone(),
                        response,
                        NewFragment {
                            sandbox_url: url.clone(),
                            title: title.clone(),
                            files: state.files.clone(),
                        },
                    ))
                    .await?;
                RunOutcome::Success {
                    message_id: saved.id,
                    url,
                    title,
                    summary: state.summary().unwrap_or_default().to_string(),
                }
            }
            (verdict, _) => {
                let reason = verdict.err().unwrap_or(FailureReason::Incomplete);
                tracing::warn!(reason = ?reason, "run failed");
                let saved = self
                    .store
                    .append_message(NewMessage::assistant_error(
                        request.project_id.clone(),
                        GENERIC_ERROR_MESSAGE,
                    ))
                    .await?;
                RunOutcome::Failed {
                    message_id: saved.id,
                    reason,
                    message: GENERIC_ERROR_MESSAGE.to_string(),
                }
            }
        };
        tracing::info!(step = "save-result", success = outcome.is_success(), "step finished");
        Ok(outcome)
    }
}

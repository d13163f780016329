//! Orchestrator 构建器：按配置组装模型、沙箱、存储、工具与代理
//!
//! 各组件都可以用 with_* 注入替身，测试与 CLI 共用同一套装配逻辑。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::orchestrator::{OrchestratorSettings, RunOrchestrator};
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::{LlmClient, OpenAiClient, RetryingLlmClient, ScriptedLlmClient};
use crate::react::{AgentNetwork, OneShotAgent, Planner, Prompts, StepExecutor, TerminationDetector};
use crate::sandbox::{LocalSandboxProvider, SandboxProvider};
use crate::store::{InMemoryStore, MessageStore, SqliteStore};
use crate::tools::{ToolExecutor, ToolKind};

/// mock 后端的代码代理输出：直接结束，不写文件
const MOCK_CODE_AGENT_REPLY: &str = "<task_summary>\nMock provider: no changes were made.\n</task_summary>";

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock），外层包一层重试
pub(crate) fn create_llm_from_config(
    cfg: &AppConfig,
    model: &str,
    temperature: Option<f32>,
    mock_reply: &str,
) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    let inner: Arc<dyn LlmClient> = if provider == "openai" && api_key.is_some() {
        tracing::info!("Using OpenAI LLM ({})", model);
        let mut client = OpenAiClient::new(cfg.llm.base_url.as_deref(), model, api_key.as_deref())
            .with_timeout(Duration::from_secs(cfg.llm.request_timeout_secs));
        if let Some(t) = temperature {
            client = client.with_temperature(t);
        }
        Arc::new(client)
    } else {
        if provider != "mock" {
            tracing::warn!("No API key set or provider unknown, using Mock LLM");
        }
        Arc::new(ScriptedLlmClient::default().with_fallback(mock_reply))
    };
    Arc::new(RetryingLlmClient::new(inner, cfg.llm.retry.policy()))
}

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    auxiliary_llm: Option<Arc<dyn LlmClient>>,
    provider: Option<Arc<dyn SandboxProvider>>,
    store: Option<Arc<dyn MessageStore>>,
    prompts: Option<Prompts>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            auxiliary_llm: None,
            provider: None,
            store: None,
            prompts: None,
        }
    }

    /// 代码代理使用的模型
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 标题 / 回复代理使用的模型
    pub fn with_auxiliary_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.auxiliary_llm = Some(llm);
        self
    }

    pub fn with_sandbox_provider(mut self, provider: Arc<dyn SandboxProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 按配置构建本地沙箱提供方
    pub fn build_sandbox_provider(&self) -> LocalSandboxProvider {
        LocalSandboxProvider::new(self.config.sandbox_root(), self.config.templates_dir())
            .with_host_template(self.config.sandbox.host_template.clone())
            .with_command_timeout(Duration::from_secs(self.config.sandbox.command_timeout_secs))
    }

    pub fn build_store(&self) -> Result<Arc<dyn MessageStore>, AgentError> {
        if self.config.store.memory {
            tracing::info!("Using in-memory message store");
            return Ok(Arc::new(InMemoryStore::new()));
        }
        let path = self.config.store_path();
        tracing::info!(path = %path.display(), "Using SQLite message store");
        Ok(Arc::new(SqliteStore::open(path)?))
    }

    pub fn build(self) -> Result<RunOrchestrator, AgentError> {
        let cfg = &self.config;
        let prompts = self
            .prompts
            .clone()
            .unwrap_or_else(|| Prompts::load(&cfg.prompts_dir()));

        let llm = match &self.llm {
            Some(llm) => llm.clone(),
            None => create_llm_from_config(cfg, &cfg.llm.model, Some(cfg.llm.temperature), MOCK_CODE_AGENT_REPLY),
        };
        let auxiliary_llm = match &self.auxiliary_llm {
            Some(llm) => llm.clone(),
            None => create_llm_from_config(cfg, &cfg.llm.auxiliary_model, None, ""),
        };
        let provider: Arc<dyn SandboxProvider> = match &self.provider {
            Some(p) => p.clone(),
            None => Arc::new(self.build_sandbox_provider()),
        };
        let store = match &self.store {
            Some(s) => s.clone(),
            None => self.build_store()?,
        };

        let marker = cfg.agent.completion_marker.clone();
        if marker.is_empty() {
            return Err(AgentError::ConfigError("agent.completion_marker must not be empty".into()));
        }
        if cfg.agent.tool_timeout_secs < cfg.sandbox.command_timeout_secs {
            return Err(AgentError::ConfigError(format!(
                "agent.tool_timeout_secs ({}) must be >= sandbox.command_timeout_secs ({})",
                cfg.agent.tool_timeout_secs, cfg.sandbox.command_timeout_secs
            )));
        }
        let tool_names = ToolKind::ALL.iter().map(|k| k.name().to_string()).collect();
        let executor = ToolExecutor::new(provider.clone(), cfg.agent.tool_timeout_secs)
            .with_write_policy(cfg.agent.write_retry.policy());
        let planner = Planner::new(llm, prompts.code_agent_system(&marker));
        let step = StepExecutor::new(
            Arc::new(planner),
            Arc::new(executor),
            Arc::new(RecoveryEngine::new().with_tool_names(tool_names)),
            TerminationDetector::new(marker),
        );
        let network = AgentNetwork::new(step).with_max_iterations(cfg.agent.max_iterations);

        let settings = OrchestratorSettings {
            template: cfg.sandbox.template.clone(),
            sandbox_timeout: Duration::from_secs(cfg.sandbox.timeout_secs),
            preview_port: cfg.sandbox.preview_port,
            url_scheme: cfg.sandbox.url_scheme.clone(),
            history_limit: cfg.agent.history_limit,
        };

        Ok(RunOrchestrator::new(
            provider,
            store,
            network,
            OneShotAgent::title_generator(auxiliary_llm.clone(), prompts.fragment_title),
            OneShotAgent::response_generator(auxiliary_llm, prompts.response),
            settings,
        ))
    }
}

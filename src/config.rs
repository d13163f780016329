//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DEVCOOK__*` 覆盖（双下划线表示嵌套，如 `DEVCOOK__AGENT__MAX_ITERATIONS=20`）。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::retry::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub sandbox: SandboxSection,
    pub store: StoreSection,
    pub worker: WorkerSection,
}

/// [app] 段：应用名、数据目录、提示词目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱、模板、数据库的默认根目录
    pub data_dir: PathBuf,
    pub prompts_dir: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: PathBuf::from("./data"),
            prompts_dir: None,
        }
    }
}

/// [llm] 段：后端选择、模型、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock
    pub provider: String,
    /// 代码代理模型
    pub model: String,
    /// 标题 / 回复生成模型
    pub auxiliary_model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4.1".to_string(),
            auxiliary_model: "gpt-4o".to_string(),
            base_url: None,
            temperature: 0.1,
            request_timeout_secs: 120,
            retry: LlmRetrySection::default(),
        }
    }
}

/// [llm.retry] 段：瞬时错误的指数退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmRetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

impl LlmRetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// [agent] 段：迭代上限、历史条数、工具超时、完成标记
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    /// 载入的历史消息条数
    pub history_limit: usize,
    /// 单次工具调用超时（秒），不得小于 sandbox.command_timeout_secs
    pub tool_timeout_secs: u64,
    pub completion_marker: String,
    pub write_retry: WriteRetrySection,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            history_limit: 5,
            tool_timeout_secs: 300,
            completion_marker: crate::react::COMPLETION_MARKER.to_string(),
            write_retry: WriteRetrySection::default(),
        }
    }
}

/// [agent.write_retry] 段：文件写入校验的线性退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriteRetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for WriteRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl WriteRetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// [sandbox] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub template: String,
    /// 未设置时为 `<data_dir>/sandboxes`
    pub root: Option<PathBuf>,
    /// 未设置时为 `<data_dir>/templates`
    pub templates_dir: Option<PathBuf>,
    pub preview_port: u16,
    /// 沙箱存活时间（秒）
    pub timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// 支持 `{port}` 与 `{id}` 占位
    pub host_template: String,
    pub url_scheme: String,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            template: "devcook-nextjs-test-2".to_string(),
            root: None,
            templates_dir: None,
            preview_port: 3000,
            timeout_secs: 1800,
            command_timeout_secs: 300,
            host_template: "{port}-{id}.localhost".to_string(),
            url_scheme: "https".to_string(),
        }
    }
}

/// [store] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreSection {
    /// 未设置时为 `<data_dir>/devcook.db`
    pub path: Option<PathBuf>,
    /// 使用内存存储（进程退出即丢失）
    pub memory: bool,
}

/// [worker] 段：并发运行数与队列容量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub max_concurrent_runs: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            queue_capacity: 64,
        }
    }
}

impl AppConfig {
    pub fn sandbox_root(&self) -> PathBuf {
        self.sandbox
            .root
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("sandboxes"))
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.sandbox
            .templates_dir
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("templates"))
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("devcook.db"))
    }

    /// 提示词目录：配置 > config/prompts > ../config/prompts
    pub fn prompts_dir(&self) -> PathBuf {
        if let Some(dir) = &self.app.prompts_dir {
            return dir.clone();
        }
        ["config/prompts", "../config/prompts"]
            .into_iter()
            .map(Path::new)
            .find(|p| p.is_dir())
            .unwrap_or(Path::new("config/prompts"))
            .to_path_buf()
    }
}

/// 从 config 目录加载配置，环境变量 DEVCOOK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DEVCOOK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DEVCOOK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

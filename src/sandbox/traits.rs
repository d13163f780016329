//! 沙箱能力抽象
//!
//! SandboxProvider 负责创建与按 id 恢复；Sandbox 提供文件读写、命令执行、对外地址与存活时间设置。
//! 恢复失败直接返回错误，本层不做重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Sandbox expired: {0}")]
    Expired(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    /// 命令以非零状态退出；输出已写入调用方传入的 CommandBuffers
    #[error("exit status {exit_code}")]
    CommandExit { exit_code: i32 },

    #[error("Command timed out after {0}s")]
    CommandTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),
}

/// 命令执行期间分别累积的 stdout / stderr（失败时仍保留已产生的部分）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandBuffers {
    pub stdout: String,
    pub stderr: String,
}

impl CommandBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stdout(&mut self, data: &str) {
        self.stdout.push_str(data);
    }

    pub fn push_stderr(&mut self, data: &str) {
        self.stderr.push_str(data);
    }
}

/// 成功执行（退出码 0）的命令结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// 单个沙箱句柄
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// 稳定标识，运行期间不变
    fn id(&self) -> &str;

    /// 覆盖写入文件（父目录自动创建）
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    /// 执行 shell 命令，输出实时累积到 `buffers`；非零退出返回 CommandExit
    async fn run_command(
        &self,
        command: &str,
        buffers: &mut CommandBuffers,
    ) -> Result<CommandOutput, SandboxError>;

    /// 指定端口的对外 host（不含 scheme）
    fn host(&self, port: u16) -> String;

    /// 设置沙箱剩余存活时间
    async fn set_timeout(&self, timeout: Duration) -> Result<(), SandboxError>;
}

/// 沙箱提供方
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, template: &str) -> Result<Arc<dyn Sandbox>, SandboxError>;

    /// 按 id 恢复已有沙箱
    async fn connect(&self, id: &str) -> Result<Arc<dyn Sandbox>, SandboxError>;
}

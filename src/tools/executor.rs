//! 工具执行器
//!
//! 持有 SandboxProvider、写入重试策略与全局超时；execute 对 ToolInvocation 做穷尽匹配分发，
//! 超时转为失败 Observation；每次调用输出结构化审计日志（JSON）。
//! terminal 不套全局超时：命令截止时间由沙箱的 command timeout 负责，超时后仍带回两路输出。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::retry::RetryPolicy;
use crate::core::state::RunState;
use crate::sandbox::SandboxProvider;
use crate::tools::{files, terminal, ToolInvocation, ToolOutput};

/// 工具执行器：三种工具共享同一个沙箱提供方
pub struct ToolExecutor {
    provider: Arc<dyn SandboxProvider>,
    write_policy: RetryPolicy,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(provider: Arc<dyn SandboxProvider>, timeout_secs: u64) -> Self {
        Self {
            provider,
            write_policy: RetryPolicy::default(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// createOrUpdateFiles 的逐文件重试策略
    pub fn with_write_policy(mut self, policy: RetryPolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn provider(&self) -> Arc<dyn SandboxProvider> {
        self.provider.clone()
    }

    /// 在沙箱 `sandbox_id` 内执行工具；工具失败与超时都作为 ToolOutput 返回，不中断运行
    pub async fn execute(
        &self,
        sandbox_id: &str,
        invocation: ToolInvocation,
        state: &mut RunState,
    ) -> ToolOutput {
        let start = Instant::now();
        let kind = invocation.kind();
        let args_preview = args_preview(&invocation);
        let provider = self.provider.as_ref();

        let result = match invocation {
            ToolInvocation::Terminal(args) => {
                Ok(terminal::run_command(provider, sandbox_id, &args.command).await)
            }
            ToolInvocation::CreateOrUpdateFiles(args) => {
                timeout(
                    self.timeout,
                    files::write_files(provider, sandbox_id, &args.files, self.write_policy, state),
                )
                .await
                .map(ToolOutput::Files)
            }
            ToolInvocation::ReadFiles(args) => {
                timeout(self.timeout, files::read_files(provider, sandbox_id, &args.files)).await
            }
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(out) if out.is_ok() => (true, "ok"),
            Ok(_) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": kind.name(),
            "sandbox_id": sandbox_id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(output) => output,
            Err(_) => ToolOutput::Failure(format!(
                "Error: tool {} timed out after {}s",
                kind.name(),
                self.timeout.as_secs()
            )),
        }
    }
}

fn args_preview(invocation: &ToolInvocation) -> String {
    let s = match invocation {
        ToolInvocation::Terminal(args) => args.command.clone(),
        ToolInvocation::CreateOrUpdateFiles(args) => args
            .files
            .iter()
            .map(|f| f.path.as_str())
            .collect::<Vec<_>>()
            .join(","),
        ToolInvocation::ReadFiles(args) => args.files.join(","),
    };
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

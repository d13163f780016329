//! terminal 工具：在沙箱中执行 shell 命令
//!
//! 命令失败（非零退出、超时、沙箱无法连接）不会抛出，而是返回带错误与两路输出的诊断文本，
//! 让模型在下一步自行修正。

use crate::sandbox::{CommandBuffers, SandboxError, SandboxProvider};
use crate::tools::ToolOutput;

pub async fn run_command(provider: &dyn SandboxProvider, sandbox_id: &str, command: &str) -> ToolOutput {
    let mut buffers = CommandBuffers::new();
    let result = async {
        let sandbox = provider.connect(sandbox_id).await?;
        sandbox.run_command(command, &mut buffers).await
    }
    .await;

    match result {
        Ok(output) => ToolOutput::Success(output.stdout),
        Err(e) => ToolOutput::Failure(failure_report(&e, &buffers)),
    }
}

fn failure_report(error: &SandboxError, buffers: &CommandBuffers) -> String {
    let report = format!(
        "command failed: {error} \n stdout: {}\n stderr: {}",
        buffers.stdout, buffers.stderr
    );
    tracing::error!(error = %error, stderr = %buffers.stderr, "terminal command failed");
    report
}

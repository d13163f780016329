//! createOrUpdateFiles / readFiles 工具
//!
//! 批量写入：每个文件 写入 -> 回读 -> 比对，失败按线性退避重试；单个文件失败只记录结果，不中断整批。
//! 只有校验通过的内容才会进入 RunState.files，失败路径保留原值。

use serde::Serialize;

use crate::core::retry::{retry_with_backoff, RetryError, RetryPolicy};
use crate::core::state::{FileOperationReport, FileWriteResult, FileWriteStatus, RunState};
use crate::sandbox::{Sandbox, SandboxError, SandboxProvider};
use crate::tools::{FileInput, ToolOutput};

/// 单次写入尝试的失败原因
#[derive(Debug)]
enum WriteAttemptError {
    Mismatch { expected: usize, actual: usize },
    Sandbox(SandboxError),
}

async fn write_and_verify(
    sandbox: &dyn Sandbox,
    file: &FileInput,
    attempt: u32,
) -> Result<(), WriteAttemptError> {
    if let Err(e) = sandbox.write_file(&file.path, &file.content).await {
        tracing::warn!(path = %file.path, attempt, error = %e, "file write attempt failed");
        return Err(WriteAttemptError::Sandbox(e));
    }
    let written = match sandbox.read_file(&file.path).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %file.path, attempt, error = %e, "file read-back failed");
            return Err(WriteAttemptError::Sandbox(e));
        }
    };
    if written == file.content {
        Ok(())
    } else {
        tracing::warn!(path = %file.path, attempt, "file verification failed");
        Err(WriteAttemptError::Mismatch {
            expected: file.content.len(),
            actual: written.len(),
        })
    }
}

/// 批量写入并更新 RunState；返回本批诊断记录（同时存入 state.last_file_operation）
pub async fn write_files(
    provider: &dyn SandboxProvider,
    sandbox_id: &str,
    files: &[FileInput],
    policy: RetryPolicy,
    state: &mut RunState,
) -> FileOperationReport {
    let sandbox = match provider.connect(sandbox_id).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(sandbox_id, error = %e, "createOrUpdateFiles error");
            let report = FileOperationReport::Failed { error: e.to_string() };
            state.last_file_operation = Some(report.clone());
            return report;
        }
    };

    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let sandbox = sandbox.as_ref();
        let outcome = retry_with_backoff(
            policy,
            |attempt| write_and_verify(sandbox, file, attempt),
            |_| true,
        )
        .await;

        let result = match outcome {
            Ok(done) => {
                state.record_file(file.path.clone(), file.content.clone());
                FileWriteResult {
                    path: file.path.clone(),
                    status: FileWriteStatus::Success,
                    attempts: done.attempts,
                }
            }
            Err(RetryError { attempts, last_error }) => {
                let status = match last_error {
                    WriteAttemptError::Mismatch { expected, actual } => {
                        FileWriteStatus::VerificationFailed {
                            expected_length: expected,
                            actual_length: actual,
                        }
                    }
                    WriteAttemptError::Sandbox(e) => FileWriteStatus::WriteFailed {
                        error: e.to_string(),
                    },
                };
                FileWriteResult {
                    path: file.path.clone(),
                    status,
                    attempts,
                }
            }
        };
        results.push(result);
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    tracing::info!(
        sandbox_id,
        written = results.len() - failed,
        failed,
        results = %serde_json::to_string(&results).unwrap_or_default(),
        "file operation results"
    );
    let report = FileOperationReport::Completed { results };
    state.last_file_operation = Some(report.clone());
    report
}

#[derive(Debug, Serialize)]
struct FileContent<'a> {
    path: &'a str,
    content: String,
}

/// 批量读取；任一文件失败则整批返回 "Error: ..." 文本
pub async fn read_files(provider: &dyn SandboxProvider, sandbox_id: &str, paths: &[String]) -> ToolOutput {
    let result = async {
        let sandbox = provider.connect(sandbox_id).await?;
        let mut contents = Vec::with_capacity(paths.len());
        for path in paths {
            let content = sandbox.read_file(path).await?;
            contents.push(FileContent { path, content });
        }
        Ok::<_, SandboxError>(contents)
    }
    .await;

    match result {
        Ok(contents) => match serde_json::to_string(&contents) {
            Ok(json) => ToolOutput::Success(json),
            Err(e) => ToolOutput::Failure(format!("Error: {e}")),
        },
        Err(e) => ToolOutput::Failure(format!("Error: {e}")),
    }
}

//! 核心编排层：错误与恢复、通用重试、运行状态、编排流程、构建器、运行队列

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod state;
pub mod worker;

pub use builder::OrchestratorBuilder;
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{
    classify, seed_history, FailureReason, OrchestratorSettings, RunOrchestrator, RunOutcome,
    RunRequest, GENERIC_ERROR_MESSAGE,
};
pub use recovery::RecoveryEngine;
pub use retry::{retry_with_backoff, Backoff, RetryPolicy};
pub use state::{FileOperationReport, FileWriteResult, FileWriteStatus, RunState};
pub use worker::{run_queue, RunQueue, RunReport, RunWorker};

//! 运行队列与后台 worker
//!
//! RunQueue::submit 校验 prompt、先持久化用户消息，再把 RunRequest 放入有界队列；
//! RunWorker 从队列取请求，每个运行一个 task（JoinSet，结束即回收），用信号量限制并发；
//! 取消后关闭队列，记录并丢弃仍在排队的请求，等待在途运行结束。

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerSection;
use crate::core::orchestrator::{RunOrchestrator, RunOutcome, RunRequest};
use crate::core::AgentError;
use crate::store::{MessageStore, NewMessage, StoredMessage};

pub const MAX_PROMPT_CHARS: usize = 10_000;

/// 单次运行的结果（错误已转为文本）
pub type RunReport = (RunRequest, Result<RunOutcome, String>);

/// 校验提交内容
pub fn validate_request(project_id: &str, value: &str) -> Result<(), AgentError> {
    if project_id.trim().is_empty() {
        return Err(AgentError::InvalidRequest("Project ID is required".into()));
    }
    if value.trim().is_empty() {
        return Err(AgentError::InvalidRequest("Value is required".into()));
    }
    if value.chars().count() > MAX_PROMPT_CHARS {
        return Err(AgentError::InvalidRequest("Value is too long".into()));
    }
    Ok(())
}

/// 提交端，可克隆
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<RunRequest>,
    store: Arc<dyn MessageStore>,
}

impl RunQueue {
    /// 持久化用户消息并排队；返回已保存的消息
    pub async fn submit(
        &self,
        project_id: &str,
        value: &str,
    ) -> Result<StoredMessage, AgentError> {
        validate_request(project_id, value)?;
        if self.tx.is_closed() {
            return Err(AgentError::Cancelled);
        }
        let saved = self
            .store
            .append_message(NewMessage::user(project_id, value))
            .await?;
        self.tx
            .send(RunRequest {
                project_id: project_id.to_string(),
                value: value.to_string(),
            })
            .await
            .map_err(|_| AgentError::Cancelled)?;
        tracing::info!(project_id, message_id = %saved.id, "run request queued");
        Ok(saved)
    }
}

pub struct RunWorker {
    orchestrator: Arc<RunOrchestrator>,
    rx: mpsc::Receiver<RunRequest>,
    max_concurrent: usize,
    cancel: CancellationToken,
    results: Option<mpsc::UnboundedSender<RunReport>>,
}

/// 创建队列与 worker
pub fn run_queue(
    orchestrator: Arc<RunOrchestrator>,
    settings: &WorkerSection,
    cancel: CancellationToken,
) -> (RunQueue, RunWorker) {
    let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
    let queue = RunQueue {
        tx,
        store: orchestrator.store(),
    };
    let worker = RunWorker {
        orchestrator,
        rx,
        max_concurrent: settings.max_concurrent_runs.max(1),
        cancel,
        results: None,
    };
    (queue, worker)
}

impl RunWorker {
    /// 每个运行结束后把结果发到该通道
    pub fn with_results(mut self, tx: mpsc::UnboundedSender<RunReport>) -> Self {
        self.results = Some(tx);
        self
    }

    /// 消费队列直到取消或所有提交端关闭；返回处理的运行数
    pub async fn run(mut self) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut processed = 0;

        loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }

            let request = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                req = self.rx.recv() => match req {
                    Some(r) => r,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    drop_request(&request);
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let orchestrator = self.orchestrator.clone();
            let results = self.results.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = orchestrator.run(&request).await;
                match &outcome {
                    Ok(o) => tracing::info!(project_id = %request.project_id, success = o.is_success(), "run finished"),
                    Err(e) => tracing::error!(project_id = %request.project_id, error = %e, "run errored"),
                }
                if let Some(tx) = results {
                    let _ = tx.send((request, outcome.map_err(|e| e.to_string())));
                }
            });
            processed += 1;
        }

        if self.cancel.is_cancelled() {
            tracing::info!(in_flight = tasks.len(), "run worker cancelled, no longer accepting requests");
            self.rx.close();
            while let Ok(request) = self.rx.try_recv() {
                drop_request(&request);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        processed
    }
}

/// 已持久化用户消息但不会再执行的请求
fn drop_request(request: &RunRequest) {
    tracing::warn!(project_id = %request.project_id, "dropping queued run request after cancellation");
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "run task panicked");
    }
}

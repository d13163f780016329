//! Iteration Controller（Agent Network）
//!
//! RUNNING -> RUNNING：执行一步，再做完成检测；未完成且未到上限则继续。
//! RUNNING -> DONE：已有摘要（路由返回 Stop），或迭代数到达上限（此时没有摘要）。
//! RunState 由调用方持有，每步以 `&mut` 借出。

use tokio::sync::mpsc::UnboundedSender;

use crate::core::state::RunState;
use crate::core::AgentError;
use crate::react::events::{send_event, AgentEvent};
use crate::react::step::StepExecutor;

pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// 路由结果：是否还要再调度代码代理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Continue,
    Stop,
}

/// 网络退出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkExit {
    /// 检测到完成标记
    Completed,
    /// 迭代上限耗尽
    IterationCeiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkOutcome {
    pub iterations: usize,
    pub exit: NetworkExit,
}

pub struct AgentNetwork {
    step: StepExecutor,
    max_iterations: usize,
}

impl AgentNetwork {
    pub fn new(step: StepExecutor) -> Self {
        Self {
            step,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// 已有摘要就不再选择代理
    pub fn route(state: &RunState) -> Route {
        if state.has_summary() {
            Route::Stop
        } else {
            Route::Continue
        }
    }

    pub async fn run(
        &self,
        sandbox_id: &str,
        state: &mut RunState,
        events: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<NetworkOutcome, AgentError> {
        let mut iterations = 0;
        loop {
            if Self::route(state) == Route::Stop {
                tracing::info!(iterations, "agent network completed");
                send_event(events, AgentEvent::Completed { iterations });
                return Ok(NetworkOutcome {
                    iterations,
                    exit: NetworkExit::Completed,
                });
            }
            if iterations >= self.max_iterations {
                tracing::warn!(iterations, "agent network hit iteration ceiling without summary");
                send_event(events, AgentEvent::IterationCeiling { iterations });
                return Ok(NetworkOutcome {
                    iterations,
                    exit: NetworkExit::IterationCeiling,
                });
            }

            iterations += 1;
            send_event(
                events,
                AgentEvent::Iteration {
                    iteration: iterations,
                    max_iterations: self.max_iterations,
                },
            );
            let result = self.step.run(sandbox_id, state, events).await?;
            tracing::debug!(iteration = iterations, outcome = ?result.outcome, "agent step finished");
            self.step.detector().inspect(state);
        }
    }
}

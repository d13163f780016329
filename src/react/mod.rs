//! 代理层：Planner、单步执行、完成检测、迭代控制、一次性辅助代理、提示词与过程事件

pub mod auxiliary;
pub mod events;
pub mod network;
pub mod planner;
pub mod prompt;
pub mod step;
pub mod termination;

pub use auxiliary::OneShotAgent;
pub use events::AgentEvent;
pub use network::{AgentNetwork, NetworkExit, NetworkOutcome, Route};
pub use planner::{parse_llm_output, Planner, PlannerOutput};
pub use prompt::Prompts;
pub use step::{StepExecutor, StepOutcome, StepResult};
pub use termination::{TerminationDetector, COMPLETION_MARKER};

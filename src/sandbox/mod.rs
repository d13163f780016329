//! 沙箱层：隔离执行环境的能力接口与本地目录实现
//!
//! 每次运行只创建一个沙箱；工具每次调用按 id 重新连接（connect），而不是重建环境。

pub mod local;
pub mod traits;

pub use local::LocalSandboxProvider;
pub use traits::{CommandBuffers, CommandOutput, Sandbox, SandboxError, SandboxProvider};

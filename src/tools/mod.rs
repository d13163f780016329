//! 代码代理可用的工具：terminal / createOrUpdateFiles / readFiles

pub mod executor;
pub mod files;
pub mod invocation;
pub mod schema;
pub mod terminal;

pub use executor::ToolExecutor;
pub use invocation::{
    FileInput, ReadFilesArgs, TerminalArgs, ToolCall, ToolInvocation, ToolKind, ToolOutput,
    WriteFilesArgs,
};
pub use schema::{tool_call_schema_json, tool_catalog_json};

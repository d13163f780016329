//! 工具调用的类型化表示
//!
//! 模型输出的 `{"tool": "...", "args": {...}}` 先解析为松散的 ToolCall，
//! 再按工具名转换为 ToolInvocation（每种工具一个变体，参数为静态类型），执行时做穷尽匹配。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::state::FileOperationReport;
use crate::core::AgentError;

/// 模型请求的工具调用（未校验）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolCall {
    /// 工具名：terminal / createOrUpdateFiles / readFiles
    pub tool: String,
    /// 工具参数，结构见各工具 schema
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TerminalArgs {
    /// Shell command to run inside the sandbox
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileInput {
    /// Sandbox-relative file path
    pub path: String,
    /// Full file content
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WriteFilesArgs {
    pub files: Vec<FileInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReadFilesArgs {
    /// Sandbox-relative paths to read
    pub files: Vec<String>,
}

/// 工具种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Terminal,
    CreateOrUpdateFiles,
    ReadFiles,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::Terminal,
        ToolKind::CreateOrUpdateFiles,
        ToolKind::ReadFiles,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Terminal => "terminal",
            ToolKind::CreateOrUpdateFiles => "createOrUpdateFiles",
            ToolKind::ReadFiles => "readFiles",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::Terminal => "Use the terminal to run commands in the sandbox",
            ToolKind::CreateOrUpdateFiles => {
                "Create or update files in the sandbox with force overwrite and verification"
            }
            ToolKind::ReadFiles => "Read files from the sandbox",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// 参数 JSON Schema（schemars 生成）
    pub fn parameters_schema(&self) -> Value {
        let schema = match self {
            ToolKind::Terminal => schemars::schema_for!(TerminalArgs),
            ToolKind::CreateOrUpdateFiles => schemars::schema_for!(WriteFilesArgs),
            ToolKind::ReadFiles => schemars::schema_for!(ReadFilesArgs),
        };
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }
}

/// 已校验的工具调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    Terminal(TerminalArgs),
    CreateOrUpdateFiles(WriteFilesArgs),
    ReadFiles(ReadFilesArgs),
}

impl ToolInvocation {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolInvocation::Terminal(_) => ToolKind::Terminal,
            ToolInvocation::CreateOrUpdateFiles(_) => ToolKind::CreateOrUpdateFiles,
            ToolInvocation::ReadFiles(_) => ToolKind::ReadFiles,
        }
    }

    /// 按工具名把参数反序列化为对应的类型
    pub fn from_call(call: &ToolCall) -> Result<Self, AgentError> {
        let kind = ToolKind::from_name(&call.tool)
            .ok_or_else(|| AgentError::UnknownTool(call.tool.clone()))?;
        let invalid = |e: serde_json::Error| AgentError::InvalidToolArgs {
            tool: call.tool.clone(),
            reason: e.to_string(),
        };
        let args = call.args.clone();
        Ok(match kind {
            ToolKind::Terminal => ToolInvocation::Terminal(serde_json::from_value(args).map_err(invalid)?),
            ToolKind::CreateOrUpdateFiles => {
                ToolInvocation::CreateOrUpdateFiles(serde_json::from_value(args).map_err(invalid)?)
            }
            ToolKind::ReadFiles => ToolInvocation::ReadFiles(serde_json::from_value(args).map_err(invalid)?),
        })
    }
}

/// 工具执行结果；失败也是结果，会作为 Observation 交给模型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Success(String),
    Failure(String),
    Files(FileOperationReport),
}

impl ToolOutput {
    pub fn is_ok(&self) -> bool {
        match self {
            ToolOutput::Success(_) => true,
            ToolOutput::Failure(_) => false,
            ToolOutput::Files(FileOperationReport::Completed { results }) => {
                results.iter().all(|r| r.is_success())
            }
            ToolOutput::Files(FileOperationReport::Failed { .. }) => false,
        }
    }

    /// 回填给模型的文本
    pub fn observation(&self) -> String {
        match self {
            ToolOutput::Success(s) | ToolOutput::Failure(s) => s.clone(),
            ToolOutput::Files(FileOperationReport::Failed { error }) => format!("Error: {error}"),
            ToolOutput::Files(report) => serde_json::to_string(report)
                .unwrap_or_else(|e| format!("Error: cannot encode file results: {e}")),
        }
    }
}

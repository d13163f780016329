//! 工具调用 JSON Schema 生成（schemars）
//!
//! 拼入 system prompt：调用格式 + 每个工具的名称、描述与参数 schema，减少模型输出格式错误。

use schemars::schema_for;

use crate::tools::{ToolCall, ToolKind};

/// 工具调用格式 `{"tool": "...", "args": {...}}` 的 JSON Schema
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCall);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 可用工具目录（JSON 数组），每项含 name / description / parameters
pub fn tool_catalog_json() -> String {
    let catalog: Vec<_> = ToolKind::ALL
        .iter()
        .map(|kind| {
            serde_json::json!({
                "name": kind.name(),
                "description": kind.description(),
                "parameters": kind.parameters_schema(),
            })
        })
        .collect();
    serde_json::to_string_pretty(&catalog).unwrap_or_default()
}

//! 运行过程事件：供 CLI / 上层服务展示迭代、工具调用、观察与终止

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 第几轮迭代（从 1 开始）
    Iteration { iteration: usize, max_iterations: usize },
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, ok: bool, preview: String },
    /// 本次写入后 Run State 中的文件数
    FilesWritten { total: usize },
    /// 错误恢复：格式错误等被转为下一轮的提示
    Recovery { detail: String },
    /// 检测到完成标记
    Completed { iterations: usize },
    /// 达到迭代上限仍未完成
    IterationCeiling { iterations: usize },
}

pub(crate) fn send_event(
    tx: Option<&tokio::sync::mpsc::UnboundedSender<AgentEvent>>,
    event: AgentEvent,
) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}

/// 截断到 `max` 个字符
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

//! 单次运行的共享状态（Run State）
//!
//! 由迭代控制器独占持有，每一步以 `&mut RunState` 借给单步执行器与工具，不跨运行共享。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::memory::Message;

/// 单个文件写入的最终状态
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileWriteStatus {
    Success,
    /// 写入成功但回读内容不一致
    VerificationFailed {
        expected_length: usize,
        actual_length: usize,
    },
    /// 写入或回读过程中抛出异常
    WriteFailed { error: String },
}

/// 单个文件的写入结果（路径 + 状态 + 尝试次数）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileWriteResult {
    pub path: String,
    #[serde(flatten)]
    pub status: FileWriteStatus,
    pub attempts: u32,
}

impl FileWriteResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, FileWriteStatus::Success)
    }
}

/// 最近一次批量写入的诊断记录，只用于观测，不参与控制流
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FileOperationReport {
    Completed { results: Vec<FileWriteResult> },
    Failed { error: String },
}

/// 运行状态：累计文件、终止摘要、最近一次写入诊断、对话历史
#[derive(Clone, Debug, Default)]
pub struct RunState {
    /// 沙箱相对路径 -> 完整内容；只增或按路径覆盖
    pub files: BTreeMap<String, String>,
    summary: Option<String>,
    pub last_file_operation: Option<FileOperationReport>,
    /// 发给模型的对话历史（不含 system）
    pub messages: Vec<Message>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以历史消息（已按时间正序）初始化
    pub fn with_history(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn has_summary(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// 写入摘要；只接受第一次非空写入，返回是否生效
    pub fn set_summary(&mut self, summary: impl Into<String>) -> bool {
        if self.has_summary() {
            return false;
        }
        let summary = summary.into();
        if summary.is_empty() {
            return false;
        }
        self.summary = Some(summary);
        true
    }

    pub fn record_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// 最后一条 assistant 消息的文本
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::memory::Role::Assistant))
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_set_once() {
        let mut state = RunState::new();
        assert!(!state.has_summary());
        assert!(!state.set_summary(""));
        assert!(state.set_summary("<task_summary>first</task_summary>"));
        assert!(!state.set_summary("<task_summary>second</task_summary>"));
        assert_eq!(state.summary(), Some("<task_summary>first</task_summary>"));
    }

    #[test]
    fn test_record_file_overwrites_per_path() {
        let mut state = RunState::new();
        state.record_file("a.txt", "1");
        state.record_file("b.txt", "2");
        state.record_file("a.txt", "3");
        assert_eq!(state.files.len(), 2);
        assert_eq!(state.files["a.txt"], "3");
        assert_eq!(state.files["b.txt"], "2");
    }

    #[test]
    fn test_write_result_serializes_flat() {
        let result = FileWriteResult {
            path: "index.html".into(),
            status: FileWriteStatus::VerificationFailed {
                expected_length: 9,
                actual_length: 4,
            },
            attempts: 3,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "verification_failed");
        assert_eq!(json["expected_length"], 9);
        assert_eq!(json["attempts"], 3);
    }

    #[test]
    fn test_last_assistant_text() {
        let mut state = RunState::with_history(vec![Message::user("build"), Message::assistant("ok")]);
        state.push_message(Message::user("Observation"));
        assert_eq!(state.last_assistant_text(), Some("ok"));
    }
}

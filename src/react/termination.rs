//! 完成检测
//!
//! 模型在任务完成时输出包含完成标记的消息；检测只做子串匹配，命中时整条消息原样作为摘要。
//! 约定集中在这一个谓词里，控制器不直接接触标记字符串。

use crate::core::state::RunState;

pub const COMPLETION_MARKER: &str = "<task_summary>";

#[derive(Debug, Clone)]
pub struct TerminationDetector {
    marker: String,
}

impl Default for TerminationDetector {
    fn default() -> Self {
        Self::new(COMPLETION_MARKER)
    }
}

impl TerminationDetector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// 文本含完成标记时返回整段文本
    pub fn detect<'a>(&self, text: &'a str) -> Option<&'a str> {
        if !self.marker.is_empty() && text.contains(&self.marker) {
            Some(text)
        } else {
            None
        }
    }

    /// 检查最后一条 assistant 消息，命中则写入摘要；返回摘要是否已存在
    pub fn inspect(&self, state: &mut RunState) -> bool {
        if let Some(summary) = state.last_assistant_text().and_then(|t| self.detect(t)) {
            let summary = summary.to_string();
            state.set_summary(summary);
        }
        state.has_summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[test]
    fn test_detect_returns_whole_text() {
        let detector = TerminationDetector::default();
        let text = "Done.\n<task_summary>\nCreated a button component\n</task_summary>";
        assert_eq!(detector.detect(text), Some(text));
        assert_eq!(detector.detect("still working on it"), None);
    }

    #[test]
    fn test_inspect_uses_last_assistant_message() {
        let detector = TerminationDetector::default();
        let mut state = RunState::new();
        state.push_message(Message::assistant("<task_summary>old</task_summary>"));
        state.push_message(Message::assistant("not yet"));
        assert!(!detector.inspect(&mut state));

        state.push_message(Message::assistant("<task_summary>Created a button component</task_summary>"));
        assert!(detector.inspect(&mut state));
        assert_eq!(state.summary(), Some("<task_summary>Created a button component</task_summary>"));
    }

    #[test]
    fn test_custom_marker() {
        let detector = TerminationDetector::new("[[DONE]]");
        assert!(detector.detect("ok [[DONE]]").is_some());
        assert!(detector.detect("<task_summary>x</task_summary>").is_none());
    }
}

//! 记忆层：单次运行内的对话消息

pub mod conversation;

pub use conversation::{Message, Role};

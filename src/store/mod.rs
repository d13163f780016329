//! 持久化层：消息与 Fragment 记录
//!
//! 编排核心只需要三件事：追加消息（可附带 Fragment）、读取项目最近 N 条消息、按时间正序列出全部消息。
//! 提供 SQLite（rusqlite）与内存两种实现。

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// 持久化消息的角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "USER",
            MessageRole::Assistant => "ASSISTANT",
        }
    }
}

impl FromStr for MessageRole {
    type Err = StoreError;

    /// 大小写不敏感
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(MessageRole::User),
            "ASSISTANT" => Ok(MessageRole::Assistant),
            other => Err(StoreError::InvalidRecord(format!("unknown role: {other}"))),
        }
    }
}

/// 持久化消息的类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Result,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Result => "RESULT",
            MessageType::Error => "ERROR",
        }
    }
}

impl FromStr for MessageType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RESULT" => Ok(MessageType::Result),
            "ERROR" => Ok(MessageType::Error),
            other => Err(StoreError::InvalidRecord(format!("unknown message type: {other}"))),
        }
    }
}

/// 成功运行的产物：预览地址、标题、终止时的文件快照。创建后不再修改
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub message_id: String,
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewFragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub role: MessageRole,
    pub message_type: MessageType,
    pub fragment: Option<Fragment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    pub project_id: String,
    pub content: String,
    pub role: MessageRole,
    pub message_type: MessageType,
    pub fragment: Option<NewFragment>,
}

impl NewMessage {
    pub fn user(project_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            content: content.into(),
            role: MessageRole::User,
            message_type: MessageType::Result,
            fragment: None,
        }
    }

    pub fn assistant_error(project_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            content: content.into(),
            role: MessageRole::Assistant,
            message_type: MessageType::Error,
            fragment: None,
        }
    }

    pub fn assistant_result(
        project_id: impl Into<String>,
        content: impl Into<String>,
        fragment: NewFragment,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            content: content.into(),
            role: MessageRole::Assistant,
            message_type: MessageType::Result,
            fragment: Some(fragment),
        }
    }
}

/// 消息存储接口
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 追加一条消息（与其 Fragment 一起原子写入）
    async fn append_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// 项目最近 `limit` 条消息，按更新时间倒序（最新在前）
    async fn recent_messages(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// 项目全部消息（含 Fragment），按更新时间正序
    async fn list_messages(&self, project_id: &str) -> Result<Vec<StoredMessage>, StoreError>;
}

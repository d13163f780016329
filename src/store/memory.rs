//! 内存消息存储（测试与无数据库部署用）

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::store::{Fragment, MessageStore, NewMessage, StoreError, StoredMessage};

/// 按插入顺序保存全部消息
#[derive(Debug, Default)]
pub struct InMemoryStore {
    messages: RwLock<Vec<StoredMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let fragment = message.fragment.map(|f| Fragment {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: id.clone(),
            sandbox_url: f.sandbox_url,
            title: f.title,
            files: f.files,
            created_at: now,
        });
        let stored = StoredMessage {
            id,
            project_id: message.project_id,
            content: message.content,
            role: message.role,
            message_type: message.message_type,
            fragment,
            created_at: now,
            updated_at: now,
        };
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .rev()
            .filter(|m| m.project_id == project_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_messages(&self, project_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect())
    }
}

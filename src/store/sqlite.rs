//! SQLite 消息存储
//!
//! rusqlite 为同步接口：连接放在 Arc<Mutex<_>> 中，每次操作经 spawn_blocking 执行，避免阻塞 async 运行时。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::store::{
    Fragment, MessageRole, MessageStore, MessageType, NewMessage, StoreError, StoredMessage,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    content TEXT NOT NULL,
    role TEXT NOT NULL,
    type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_project ON messages(project_id, updated_at);
CREATE TABLE IF NOT EXISTS fragments (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL UNIQUE REFERENCES messages(id) ON DELETE CASCADE,
    sandbox_url TEXT NOT NULL,
    title TEXT NOT NULL,
    files TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

const SELECT_WITH_FRAGMENT: &str = "
SELECT m.id, m.project_id, m.content, m.role, m.type, m.created_at, m.updated_at,
       f.id, f.sandbox_url, f.title, f.files, f.created_at
FROM messages m
LEFT JOIN fragments f ON f.message_id = m.id
WHERE m.project_id = ?1";

/// 数据库原始行，转换为 StoredMessage 时再校验枚举字段
struct RawRow {
    id: String,
    project_id: String,
    content: String,
    role: String,
    message_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    fragment_id: Option<String>,
    sandbox_url: Option<String>,
    title: Option<String>,
    files: Option<String>,
    fragment_created_at: Option<DateTime<Utc>>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            content: row.get(2)?,
            role: row.get(3)?,
            message_type: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            fragment_id: row.get(7)?,
            sandbox_url: row.get(8)?,
            title: row.get(9)?,
            files: row.get(10)?,
            fragment_created_at: row.get(11)?,
        })
    }

    fn into_message(self) -> Result<StoredMessage, StoreError> {
        let fragment = match (self.fragment_id, self.sandbox_url, self.title, self.files) {
            (Some(fid), Some(url), Some(title), Some(files)) => Some(Fragment {
                id: fid,
                message_id: self.id.clone(),
                sandbox_url: url,
                title,
                files: serde_json::from_str(&files)?,
                created_at: self.fragment_created_at.unwrap_or(self.created_at),
            }),
            _ => None,
        };
        Ok(StoredMessage {
            id: self.id,
            project_id: self.project_id,
            content: self.content,
            role: self.role.parse::<MessageRole>()?,
            message_type: self.message_type.parse::<MessageType>()?,
            fragment,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SQLite 存储
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件并初始化表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::InvalidRecord(format!("cannot create db dir: {e}")))?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("connection lock poisoned: {e}")))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn query_messages(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<StoredMessage>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, RawRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RawRow::into_message).collect()
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        self.with_conn(move |conn| {
            let now = Utc::now();
            let id = uuid::Uuid::new_v4().to_string();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, project_id, content, role, type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    message.project_id,
                    message.content,
                    message.role.as_str(),
                    message.message_type.as_str(),
                    now,
                    now
                ],
            )?;
            let fragment = match message.fragment {
                Some(f) => {
                    let fid = uuid::Uuid::new_v4().to_string();
                    let files_json = serde_json::to_string(&f.files)?;
                    tx.execute(
                        "INSERT INTO fragments (id, message_id, sandbox_url, title, files, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![fid, id, f.sandbox_url, f.title, files_json, now],
                    )?;
                    Some(Fragment {
                        id: fid,
                        message_id: id.clone(),
                        sandbox_url: f.sandbox_url,
                        title: f.title,
                        files: f.files,
                        created_at: now,
                    })
                }
                None => None,
            };
            tx.commit()?;
            Ok(StoredMessage {
                id,
                project_id: message.project_id,
                content: message.content,
                role: message.role,
                message_type: message.message_type,
                fragment,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn recent_messages(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let project_id = project_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let sql = format!(
                "{SELECT_WITH_FRAGMENT} ORDER BY m.updated_at DESC, m.rowid DESC LIMIT ?2"
            );
            query_messages(conn, &sql, params![project_id, limit])
        })
        .await
    }

    async fn list_messages(&self, project_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let project_id = project_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("{SELECT_WITH_FRAGMENT} ORDER BY m.updated_at ASC, m.rowid ASC");
            query_messages(conn, &sql, params![project_id])
        })
        .await
    }
}

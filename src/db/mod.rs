//! 本地缓存模块
//!
//! 使用 rusqlite 保存会话列表快照和消息历史，离线时可以先展示缓存数据。
//! 缓存只在成功拉取后整体写入，永远以服务端数据为准。
//!
//! ## 模块结构
//!
//! - `conversations`: 会话快照读写
//! - `messages`: 单个会话的消息历史读写
//!
//! ## 数据库路径
//!
//! 数据库按用户分隔存储：
//! ```text
//! {app_root}/{user_id}_{server}/chat/messaging.db
//! ```

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

use crate::user_data::UserContext;

pub mod conversations;
pub mod messages;

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("数据库操作失败: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("创建数据库目录失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("缓存数据编码失败: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("缓存数据损坏: {0}")]
    Corrupted(String),
}

// ============================================================================
// 数据库连接管理
// ============================================================================

/// 会话/消息缓存
pub struct ConversationCache {
    conn: Mutex<Connection>,
}

impl ConversationCache {
    /// 打开（必要时创建）数据库并建表
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("[DB] 初始化数据库: {:?}", path);
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// 打开用户专属数据库
    pub fn open_for_user(user: &UserContext) -> Result<Self, CacheError> {
        Self::open(&crate::user_data::get_user_db_path(&user.user_id, &user.server_url))
    }

    /// 内存数据库（测试和无磁盘环境）
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                participant_one TEXT NOT NULL,
                participant_two TEXT NOT NULL,
                other_participant_name TEXT,
                other_participant_avatar TEXT,
                last_message TEXT,
                last_message_at TEXT,
                unread_count INTEGER NOT NULL DEFAULT 0,
                context TEXT NOT NULL CHECK(context IN ('connection', 'marketplace')),
                listing TEXT,
                cached_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                message_type TEXT NOT NULL CHECK(message_type IN ('text', 'image', 'video', 'audio')),
                media_url TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                sender_name TEXT,
                sender_avatar TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conv_pos ON messages(conversation_id, position)",
            [],
        )
        .ok();

        tracing::debug!("[DB] 数据库初始化完成");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    // ========================================================================
    // 清理操作
    // ========================================================================

    /// 清空所有缓存（登出时调用）
    pub fn clear_all(&self) -> Result<(), CacheError> {
        self.lock().execute_batch(
            "DELETE FROM messages;
             DELETE FROM conversations;",
        )?;
        tracing::info!("[DB] 已清空所有本地缓存");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u1_example").join("chat").join("messaging.db");
        let cache = ConversationCache::open(&path).unwrap();
        assert!(path.exists());
        cache.clear_all().unwrap();
    }
}

//! 消息历史操作
//!
//! - `save_messages`: 整体替换某个会话的消息历史（事务）
//! - `load_messages`: 按时间顺序读取某个会话的消息历史
//!
//! 聊天窗口每次都重新拉取完整历史，缓存跟随整体替换，不做增量合并。

use rusqlite::params;

use super::{CacheError, ConversationCache};
use crate::types::{Message, MessageKind};

impl ConversationCache {
    /// 保存会话的消息历史
    pub fn save_messages(&self, conversation_id: &str, messages: &[Message]) -> Result<(), CacheError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?",
            params![conversation_id],
        )?;

        for (position, msg) in messages.iter().enumerate() {
            tx.execute(
                "INSERT OR REPLACE INTO messages
                 (id, conversation_id, position, sender_id, content, message_type,
                  media_url, is_read, created_at, sender_name, sender_avatar)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    msg.id,
                    conversation_id,
                    position as i64,
                    msg.sender_id,
                    msg.content,
                    msg.message_type.as_str(),
                    msg.media_url,
                    if msg.is_read { 1 } else { 0 },
                    msg.created_at,
                    msg.sender_name,
                    msg.sender_avatar,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 读取会话的消息历史
    pub fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, CacheError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sender_id, content, message_type, media_url,
             is_read, created_at, sender_name, sender_avatar
             FROM messages WHERE conversation_id = ? ORDER BY position ASC",
        )?;

        let rows = stmt.query_map([conversation_id], |row| {
            Ok((
                Message {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    content: row.get(3)?,
                    message_type: MessageKind::Text,
                    media_url: row.get(5)?,
                    is_read: row.get::<_, i64>(6)? != 0,
                    created_at: row.get(7)?,
                    sender_name: row.get(8)?,
                    sender_avatar: row.get(9)?,
                },
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (mut msg, kind) = row?;
            msg.message_type = MessageKind::parse(&kind)
                .ok_or_else(|| CacheError::Corrupted(format!("未知的消息类型: {}", kind)))?;
            messages.push(msg);
        }

        Ok(messages)
    }
}

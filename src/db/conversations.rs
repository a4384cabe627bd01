//! 会话快照操作
//!
//! - `save_conversations`: 整体替换会话快照（事务内先删后插，保留服务端顺序）
//! - `load_conversations`: 按原顺序读取快照

use rusqlite::params;

use super::{CacheError, ConversationCache};
use crate::types::{Conversation, ConversationContext, ListingRef};

fn context_to_str(context: ConversationContext) -> &'static str {
    match context {
        ConversationContext::Connection => "connection",
        ConversationContext::Marketplace => "marketplace",
    }
}

fn context_from_str(value: &str) -> Result<ConversationContext, CacheError> {
    match value {
        "connection" => Ok(ConversationContext::Connection),
        "marketplace" => Ok(ConversationContext::Marketplace),
        other => Err(CacheError::Corrupted(format!("未知的会话上下文: {}", other))),
    }
}

impl ConversationCache {
    /// 保存会话快照
    pub fn save_conversations(&self, conversations: &[Conversation]) -> Result<(), CacheError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM conversations", [])?;
        for (position, conv) in conversations.iter().enumerate() {
            let listing = conv
                .listing
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT OR REPLACE INTO conversations
                 (id, position, participant_one, participant_two, other_participant_name,
                  other_participant_avatar, last_message, last_message_at, unread_count,
                  context, listing)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    conv.id,
                    position as i64,
                    conv.participant_one,
                    conv.participant_two,
                    conv.other_participant_name,
                    conv.other_participant_avatar,
                    conv.last_message,
                    conv.last_message_at,
                    conv.unread_count,
                    context_to_str(conv.context),
                    listing,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 读取会话快照
    pub fn load_conversations(&self) -> Result<Vec<Conversation>, CacheError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, participant_one, participant_two, other_participant_name,
             other_participant_avatar, last_message, last_message_at, unread_count,
             context, listing
             FROM conversations ORDER BY position ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                Conversation {
                    id: row.get(0)?,
                    participant_one: row.get(1)?,
                    participant_two: row.get(2)?,
                    other_participant_name: row.get(3)?,
                    other_participant_avatar: row.get(4)?,
                    last_message: row.get(5)?,
                    last_message_at: row.get(6)?,
                    unread_count: row.get(7)?,
                    context: ConversationContext::Connection,
                    listing: None,
                },
                row.get::<_, String>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })?;

        let mut conversations = Vec::new();
        for row in rows {
            let (mut conv, context, listing) = row?;
            conv.context = context_from_str(&context)?;
            conv.listing = listing
                .map(|json| serde_json::from_str::<ListingRef>(&json))
                .transpose()?;
            conversations.push(conv);
        }

        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::ConversationCache;
    use crate::filter::fixtures::conversation;
    use crate::types::ConversationContext;

    #[test]
    fn test_snapshot_replaces_previous_and_keeps_order() {
        let cache = ConversationCache::open_in_memory().unwrap();

        let first = vec![
            conversation("a", "Ada", ConversationContext::Connection, 1, Some("hi"), None),
            conversation("b", "Bob", ConversationContext::Marketplace, 0, None, Some("Lamp")),
        ];
        cache.save_conversations(&first).unwrap();
        assert_eq!(cache.load_conversations().unwrap(), first);

        let second = vec![
            conversation("c", "Cy", ConversationContext::Connection, 4, Some("yo"), None),
            conversation("b", "Bob", ConversationContext::Marketplace, 2, Some("ok"), Some("Lamp")),
        ];
        cache.save_conversations(&second).unwrap();
        assert_eq!(cache.load_conversations().unwrap(), second);
    }

    #[test]
    fn test_clear_all_empties_snapshot() {
        let cache = ConversationCache::open_in_memory().unwrap();
        cache
            .save_conversations(&[conversation("a", "Ada", ConversationContext::Connection, 1, None, None)])
            .unwrap();
        cache.clear_all().unwrap();
        assert!(cache.load_conversations().unwrap().is_empty());
    }
}

//! 消息数据类型定义
//!
//! 定义后端返回的数据结构，包括：
//! - `Conversation`: 会话摘要（含对方信息、最后消息、未读数、来源上下文）
//! - `Message`: 单条消息
//! - `Connection`: 好友/人脉关系
//! - `ConnectedUser`: 可发起会话的已连接用户
//! - `ProfilePresence`: 用户最后活跃时间
//!
//! 字段名与后端 RPC 返回一致（snake_case）

use serde::{Deserialize, Serialize};

// ============================================================================
// 会话
// ============================================================================

/// 会话来源上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationContext {
    /// 人脉好友之间的会话
    Connection,
    /// 由市场商品发起的会话
    Marketplace,
}

/// 会话关联的市场商品
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRef {
    pub id: String,
    pub title: String,
    pub price: Option<f64>,
}

/// 会话摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant_one: String,
    pub participant_two: String,
    pub other_participant_name: Option<String>,
    pub other_participant_avatar: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    #[serde(default)]
    pub unread_count: i64,
    pub context: ConversationContext,
    #[serde(default)]
    pub listing: Option<ListingRef>,
}

impl Conversation {
    /// 会话中的另一方用户 ID
    pub fn other_participant(&self, current_user_id: &str) -> &str {
        if self.participant_one == current_user_id {
            &self.participant_two
        } else {
            &self.participant_one
        }
    }
}

// ============================================================================
// 消息
// ============================================================================

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "video" => Some(MessageKind::Video),
            "audio" => Some(MessageKind::Audio),
            _ => None,
        }
    }

    /// 是否为带媒体 URL 的消息
    pub fn is_media(&self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

/// 单条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageKind,
    pub media_url: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: String,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
}

/// 待发送消息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub content: String,
    pub message_type: MessageKind,
    pub media_url: Option<String>,
}

// ============================================================================
// 人脉关系
// ============================================================================

/// 人脉关系状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Rejected,
}

/// 人脉关系（发起方/接收方）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub sender_id: String,
    pub receiver_id: String,
    pub status: ConnectionStatus,
}

impl Connection {
    /// 是否连接了这两个用户（不区分方向）
    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

/// 已连接用户（新建会话时的候选人）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedUser {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// 用户最后活跃时间（资料表中的 `id, last_seen` 两列）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePresence {
    #[serde(alias = "id")]
    pub user_id: String,
    pub last_seen: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_decodes_backend_row() {
        let json = r#"{
            "id": "c1",
            "participant_one": "u1",
            "participant_two": "u2",
            "other_participant_name": "Ada",
            "other_participant_avatar": null,
            "last_message": "hi",
            "last_message_at": "2026-10-19T10:00:00Z",
            "unread_count": 2,
            "context": "marketplace",
            "listing": {"id": "l1", "title": "Desk", "price": 120.0}
        }"#;
        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conv.context, ConversationContext::Marketplace);
        assert_eq!(conv.listing.unwrap().title, "Desk");
        assert_eq!(conv.unread_count, 2);
    }

    #[test]
    fn test_unknown_context_is_rejected() {
        let json = r#"{"id":"c1","participant_one":"u1","participant_two":"u2",
            "other_participant_name":null,"other_participant_avatar":null,
            "last_message":null,"last_message_at":null,"context":"group"}"#;
        assert!(serde_json::from_str::<Conversation>(json).is_err());
    }

    #[test]
    fn test_other_participant() {
        let json = r#"{"id":"c1","participant_one":"u1","participant_two":"u2",
            "other_participant_name":null,"other_participant_avatar":null,
            "last_message":null,"last_message_at":null,"context":"connection"}"#;
        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conv.other_participant("u1"), "u2");
        assert_eq!(conv.other_participant("u2"), "u1");
    }

    #[test]
    fn test_connection_links_both_directions() {
        let conn = Connection {
            sender_id: "a".into(),
            receiver_id: "b".into(),
            status: ConnectionStatus::Accepted,
        };
        assert!(conn.links("a", "b"));
        assert!(conn.links("b", "a"));
        assert!(!conn.links("a", "c"));
    }

    #[test]
    fn test_profile_presence_decodes_profile_row() {
        let row: ProfilePresence =
            serde_json::from_str(r#"{"id":"u2","last_seen":null}"#).unwrap();
        assert_eq!(row.user_id, "u2");
        assert_eq!(row.last_seen, None);
    }

    #[test]
    fn test_message_kind_parse() {
        assert_eq!(MessageKind::parse("image"), Some(MessageKind::Image));
        assert_eq!(MessageKind::parse("sticker"), None);
        assert!(!MessageKind::Text.is_media());
        assert!(MessageKind::Audio.is_media());
    }
}

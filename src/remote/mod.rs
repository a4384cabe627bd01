//! 远程服务边界
//!
//! 消息核心只通过这里的两个 trait 与后端交互：
//! - `MessagingBackend`: 会话/消息 RPC、在线状态读写、人脉关系查询
//! - `RealtimeSource`: 按主题订阅行级变更事件
//!
//! ## 模块结构
//!
//! - `http`: 基于 reqwest 的 RPC 客户端（PostgREST 风格接口）
//! - `realtime`: 基于 HTTP 流的实时事件订阅（逐行 JSON）
//!
//! 实时事件按"至少一次"投递处理：收到事件后由调用方重新拉取数据，
//! 不信任事件负载的完整性。

pub mod http;
pub mod realtime;
#[cfg(test)]
pub(crate) mod test_server;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::types::{Connection, ConnectedUser, Conversation, Message, OutgoingMessage};

pub use http::HttpBackend;
pub use realtime::HttpRealtime;

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("请求失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("服务器返回错误: HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("响应解析失败: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("无效的服务地址: {0}")]
    InvalidEndpoint(String),
    #[error("服务返回了意外的数据: {0}")]
    Unexpected(String),
    #[error("条目校验失败: {0}")]
    InvalidItem(#[from] crate::items::ItemError),
}

// ============================================================================
// 后端 RPC 接口
// ============================================================================

/// 消息后端
///
/// 对应服务端存储过程，内部实现不在本仓库范围内。
pub trait MessagingBackend: Send + Sync + 'static {
    /// 当前用户的全部会话
    fn get_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<Conversation>, ServiceError>> + Send;

    /// 会话的完整消息历史
    fn get_messages(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, ServiceError>> + Send;

    /// 发送消息，返回消息 ID
    fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    /// 获取或创建与对方的会话，返回会话 ID
    fn get_or_create_conversation(
        &self,
        other_user_id: &str,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    /// 已连接用户（可选搜索词）
    fn get_connected_users(
        &self,
        search_term: Option<&str>,
    ) -> impl Future<Output = Result<Vec<ConnectedUser>, ServiceError>> + Send;

    /// 用户参与的人脉关系
    fn get_connections(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<Connection>, ServiceError>> + Send;

    /// 写入用户最后活跃时间
    fn update_last_seen(
        &self,
        user_id: &str,
        timestamp: &str,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// 读取用户最后活跃时间
    fn get_last_seen(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<String>, ServiceError>> + Send;
}

// ============================================================================
// 实时事件
// ============================================================================

/// 订阅主题
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RealtimeTopic {
    /// 当前用户的会话变更（会话列表）
    Conversations { user_id: String },
    /// 某个会话的新消息
    Messages { conversation_id: String },
    /// 某个用户资料的更新（在线状态）
    Profile { user_id: String },
}

impl RealtimeTopic {
    /// 频道名称
    pub fn channel_name(&self) -> String {
        match self {
            RealtimeTopic::Conversations { user_id } => format!("conversations:{}", user_id),
            RealtimeTopic::Messages { conversation_id } => format!("messages:{}", conversation_id),
            RealtimeTopic::Profile { user_id } => format!("profile:{}", user_id),
        }
    }

    /// 监听的数据表
    pub fn table(&self) -> &'static str {
        match self {
            RealtimeTopic::Conversations { .. } => "conversations",
            RealtimeTopic::Messages { .. } => "messages",
            RealtimeTopic::Profile { .. } => "profiles",
        }
    }

    /// 行过滤条件
    pub fn filter(&self) -> Option<String> {
        match self {
            RealtimeTopic::Conversations { .. } => None,
            RealtimeTopic::Messages { conversation_id } => {
                Some(format!("conversation_id=eq.{}", conversation_id))
            }
            RealtimeTopic::Profile { user_id } => Some(format!("id=eq.{}", user_id)),
        }
    }

    /// 关心的变更类型，None 表示全部
    pub fn change_kind(&self) -> Option<ChangeKind> {
        match self {
            RealtimeTopic::Conversations { .. } => None,
            RealtimeTopic::Messages { .. } => Some(ChangeKind::Insert),
            RealtimeTopic::Profile { .. } => Some(ChangeKind::Update),
        }
    }
}

/// 行变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// 行变更事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub table: String,
    #[serde(default)]
    pub record: serde_json::Value,
}

impl RealtimeEvent {
    /// 读取记录中的字符串字段
    pub fn record_str(&self, field: &str) -> Option<&str> {
        self.record.get(field).and_then(|v| v.as_str())
    }
}

/// 一次订阅
///
/// `confirmed` 在服务端确认订阅后完成；发送端被丢弃表示订阅失败。
/// 丢弃订阅会停止后台读取任务。
pub struct Subscription {
    pub confirmed: oneshot::Receiver<()>,
    pub events: async_channel::Receiver<RealtimeEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        confirmed: oneshot::Receiver<()>,
        events: async_channel::Receiver<RealtimeEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            confirmed,
            events,
            cancel,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 实时事件源
pub trait RealtimeSource: Send + Sync + 'static {
    fn subscribe(
        &self,
        topic: &RealtimeTopic,
    ) -> impl Future<Output = Result<Subscription, ServiceError>> + Send;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_filters() {
        let topic = RealtimeTopic::Messages {
            conversation_id: "c9".to_string(),
        };
        assert_eq!(topic.table(), "messages");
        assert_eq!(topic.filter().as_deref(), Some("conversation_id=eq.c9"));
        assert_eq!(topic.change_kind(), Some(ChangeKind::Insert));

        let profile = RealtimeTopic::Profile {
            user_id: "u1".to_string(),
        };
        assert_eq!(profile.channel_name(), "profile:u1");
        assert_eq!(profile.change_kind(), Some(ChangeKind::Update));
    }

    #[test]
    fn test_event_decodes() {
        let event: RealtimeEvent = serde_json::from_str(
            r#"{"type":"UPDATE","table":"profiles","record":{"id":"u1","last_seen":"2026-10-19T10:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.record_str("last_seen"), Some("2026-10-19T10:00:00Z"));
        assert_eq!(event.record_str("missing"), None);
    }
}

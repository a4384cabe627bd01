//! 新建会话流程
//!
//! - 搜索已连接用户（带防抖，过期的搜索结果被丢弃）
//! - 只有已接受的人脉关系（任一方向）才能发起好友会话
//! - 市场咨询不要求人脉关系
//! - 打开会话：获取或创建与对方的会话

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::remote::{MessagingBackend, ServiceError};
use crate::types::{ConnectedUser, Connection, ConnectionStatus};

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("尚未与该用户建立人脉关系: {0}")]
    NotConnected(String),
    #[error("不能与自己创建会话")]
    SelfConversation,
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// 两个用户之间是否存在已接受的人脉关系
pub fn can_message(connections: &[Connection], current_user_id: &str, other_user_id: &str) -> bool {
    connections
        .iter()
        .any(|c| c.status == ConnectionStatus::Accepted && c.links(current_user_id, other_user_id))
}

/// 新建会话流程
pub struct ComposeFlow<B: MessagingBackend> {
    backend: Arc<B>,
    current_user_id: String,
    debounce: Duration,
    generation: AtomicU64,
}

impl<B: MessagingBackend> ComposeFlow<B> {
    pub fn new(backend: Arc<B>, current_user_id: impl Into<String>, debounce: Duration) -> Self {
        Self {
            backend,
            current_user_id: current_user_id.into(),
            debounce,
            generation: AtomicU64::new(0),
        }
    }

    /// 搜索已连接用户，空白搜索词返回全部
    pub async fn search(&self, term: &str) -> Result<Vec<ConnectedUser>, ServiceError> {
        let term = term.trim();
        let search_term = (!term.is_empty()).then_some(term);

        let users = self.backend.get_connected_users(search_term).await?;
        Ok(users
            .into_iter()
            .filter(|u| u.id != self.current_user_id)
            .collect())
    }

    /// 防抖搜索
    ///
    /// 等待防抖时间后再请求；期间或请求返回前有新的搜索时返回 None。
    pub async fn search_debounced(
        &self,
        term: &str,
    ) -> Option<Result<Vec<ConnectedUser>, ServiceError>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::time::sleep(self.debounce).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }

        let result = self.search(term).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("[Compose] 丢弃过期的搜索结果: {}", term);
            return None;
        }
        Some(result)
    }

    /// 打开与好友的会话（要求已接受的人脉关系）
    pub async fn open_conversation(&self, other_user_id: &str) -> Result<String, ComposeError> {
        if other_user_id == self.current_user_id {
            return Err(ComposeError::SelfConversation);
        }

        let connections = self.backend.get_connections(&self.current_user_id).await?;
        if !can_message(&connections, &self.current_user_id, other_user_id) {
            tracing::warn!("[Compose] 未建立人脉关系，拒绝创建会话: {}", other_user_id);
            return Err(ComposeError::NotConnected(other_user_id.to_string()));
        }

        self.get_or_create(other_user_id).await
    }

    /// 打开与卖家的市场咨询会话
    pub async fn open_listing_conversation(&self, seller_id: &str) -> Result<String, ComposeError> {
        if seller_id == self.current_user_id {
            return Err(ComposeError::SelfConversation);
        }
        self.get_or_create(seller_id).await
    }

    async fn get_or_create(&self, other_user_id: &str) -> Result<String, ComposeError> {
        let conversation_id = self.backend.get_or_create_conversation(other_user_id).await?;
        tracing::info!("[Compose] 打开会话 {} (对方 {})", conversation_id, other_user_id);
        Ok(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockBackend;

    fn connection(sender: &str, receiver: &str, status: ConnectionStatus) -> Connection {
        Connection {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            status,
        }
    }

    fn user(id: &str, name: &str) -> ConnectedUser {
        ConnectedUser {
            id: id.to_string(),
            name: name.to_string(),
            avatar_url: None,
        }
    }

    fn flow() -> (ComposeFlow<MockBackend>, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::default());
        *backend.connections.lock() = vec![
            connection("ada", "me", ConnectionStatus::Accepted),
            connection("me", "bob", ConnectionStatus::Pending),
            connection("me", "cy", ConnectionStatus::Rejected),
        ];
        *backend.connected_users.lock() = vec![user("ada", "Ada Lovelace"), user("me", "Me"), user("dan", "Dan Abramov")];
        (
            ComposeFlow::new(backend.clone(), "me", Duration::from_millis(300)),
            backend,
        )
    }

    #[test]
    fn test_only_accepted_connections_permit_messaging() {
        let connections = vec![
            connection("ada", "me", ConnectionStatus::Accepted),
            connection("me", "bob", ConnectionStatus::Pending),
        ];
        assert!(can_message(&connections, "me", "ada"));
        assert!(can_message(&connections, "ada", "me"));
        assert!(!can_message(&connections, "me", "bob"));
        assert!(!can_message(&connections, "me", "zed"));
    }

    #[tokio::test]
    async fn test_open_conversation_requires_connection() {
        let (flow, _backend) = flow();
        assert_eq!(flow.open_conversation("ada").await.unwrap(), "conv-ada");
        assert!(matches!(
            flow.open_conversation("bob").await,
            Err(ComposeError::NotConnected(_))
        ));
        assert!(matches!(
            flow.open_conversation("me").await,
            Err(ComposeError::SelfConversation)
        ));
        assert_eq!(flow.open_listing_conversation("cy").await.unwrap(), "conv-cy");
    }

    #[tokio::test]
    async fn test_search_excludes_self() {
        let (flow, _backend) = flow();
        let all = flow.search("  ").await.unwrap();
        let ids: Vec<_> = all.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["ada", "dan"]);

        let matched = flow.search("ada").await.unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_search_drops_superseded_terms() {
        let (flow, _backend) = flow();
        let flow = Arc::new(flow);

        let first = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.search_debounced("a").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.search_debounced("dan").await })
        };

        assert!(first.await.unwrap().is_none());
        let users = second.await.unwrap().unwrap().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "dan");
    }
}

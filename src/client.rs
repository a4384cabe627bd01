//! 消息客户端入口
//!
//! 持有后端、实时事件源、配置和本地缓存，按页面创建控制器：
//! - `/messages` → `ConversationList`
//! - `/messages/new` → `ComposeFlow`
//! - `/messages/:id` → `ChatWindow`

use std::sync::Arc;
use thiserror::Error;

use crate::chat_window::{ChatTarget, ChatWindow};
use crate::compose::ComposeFlow;
use crate::config::MessagingConfig;
use crate::conversation_list::ConversationList;
use crate::db::ConversationCache;
use crate::presence;
use crate::remote::{HttpBackend, HttpRealtime, MessagingBackend, RealtimeSource, ServiceError};
use crate::types::Conversation;
use crate::user_data::{self, UserContext};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("创建用户目录失败: {0}")]
    UserDirectory(#[from] std::io::Error),
}

/// 消息客户端
pub struct MessagingClient<B: MessagingBackend, R: RealtimeSource> {
    backend: Arc<B>,
    realtime: Arc<R>,
    config: MessagingConfig,
    user_id: String,
    cache: Option<Arc<ConversationCache>>,
}

impl MessagingClient<HttpBackend, HttpRealtime> {
    /// 使用 HTTP 后端连接，并打开当前用户的本地缓存
    ///
    /// 缓存打开失败不影响使用，只是不再写入缓存。
    pub fn connect(
        config: MessagingConfig,
        user_id: &str,
        access_token: Option<String>,
    ) -> Result<Self, ClientError> {
        let backend = HttpBackend::new(&config.backend, access_token.clone())?;
        let realtime = HttpRealtime::new(&config.backend, access_token)?;

        let user = user_data::set_current_user(user_id, &config.backend.base_url)?;
        let cache = match ConversationCache::open_for_user(&user) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                tracing::warn!("[Client] 打开本地缓存失败，继续运行: {}", e);
                None
            }
        };

        tracing::info!("[Client] 已连接 {} @ {}", user_id, config.backend.base_url);
        Ok(Self::new(Arc::new(backend), Arc::new(realtime), config, user_id, cache))
    }

    /// 登录令牌刷新后同步到 RPC 和实时订阅，已建立的订阅不受影响
    pub fn set_access_token(&self, token: Option<String>) {
        self.backend.set_access_token(token.clone());
        self.realtime.set_access_token(token);
    }
}

impl<B: MessagingBackend, R: RealtimeSource> MessagingClient<B, R> {
    pub fn new(
        backend: Arc<B>,
        realtime: Arc<R>,
        config: MessagingConfig,
        user_id: impl Into<String>,
        cache: Option<Arc<ConversationCache>>,
    ) -> Self {
        Self {
            backend,
            realtime,
            config,
            user_id: user_id.into(),
            cache,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// 会话列表控制器
    pub fn conversation_list(&self) -> ConversationList<B, R> {
        let backend = Arc::clone(&self.backend);
        let realtime = Arc::clone(&self.realtime);
        let timings = self.config.timings.clone();
        match &self.cache {
            Some(cache) => ConversationList::with_cache(
                backend,
                realtime,
                self.user_id.clone(),
                timings,
                Arc::clone(cache),
            ),
            None => ConversationList::new(backend, realtime, self.user_id.clone(), timings),
        }
    }

    /// 聊天窗口控制器
    pub fn chat_window(&self, conversation_id: &str, other_user_id: &str) -> ChatWindow<B, R> {
        let target = ChatTarget {
            conversation_id: conversation_id.to_string(),
            current_user_id: self.user_id.clone(),
            other_user_id: other_user_id.to_string(),
        };
        let window = ChatWindow::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.realtime),
            target,
            self.config.timings.clone(),
        );
        match &self.cache {
            Some(cache) => window.with_cache(Arc::clone(cache)),
            None => window,
        }
    }

    /// 从会话摘要打开聊天窗口
    pub fn chat_window_for(&self, conversation: &Conversation) -> ChatWindow<B, R> {
        self.chat_window(&conversation.id, conversation.other_participant(&self.user_id))
    }

    /// 新建会话流程
    pub fn compose(&self) -> ComposeFlow<B> {
        ComposeFlow::new(
            Arc::clone(&self.backend),
            self.user_id.clone(),
            self.config.timings.search_debounce(),
        )
    }

    /// 用户活跃心跳（进程级节流）
    pub async fn touch_presence(&self) -> Result<bool, ServiceError> {
        presence::touch_presence(self.backend.as_ref(), &self.user_id).await
    }

    /// 登出：清空本地缓存和当前用户
    pub fn logout(&self) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache.clear_all()
        {
            tracing::warn!("[Client] 清空本地缓存失败: {}", e);
        }
        if user_data::get_current_user().is_some_and(|u: UserContext| u.user_id == self.user_id) {
            user_data::clear_current_user();
        }
    }
}

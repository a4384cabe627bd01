//! 聊天窗口控制器
//!
//! 负责单个会话的消息历史、发送和对方在线状态：
//! - 打开时拉取完整历史和对方最后活跃时间，订阅新消息和资料更新
//! - 每次收到新消息信号都重新拉取完整历史（不做本地增量合并，
//!   以服务端的顺序和已读状态为准）
//! - 历史按 `created_at` 稳定排序；时间无法解析的消息排在最后，彼此保持服务端顺序
//! - 发送：空白内容不发送；发送中拒绝重复提交；失败时保留输入
//! - 点击/按键触发节流的活跃心跳（进程级，20 分钟）
//! - 消息列表变化后请求平滑滚动到最新消息
//! - `close` / Drop: 取消订阅和轮询，之后不再发起任何请求

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Timings;
use crate::db::ConversationCache;
use crate::notifier::{ConnectionState, UpdateNotifier, UpdateSignal, UpdateSink};
use crate::presence::{self, HeartbeatThrottle, OFFLINE_LABEL, global_heartbeat, parse_timestamp};
use crate::remote::{MessagingBackend, RealtimeSource, RealtimeTopic, ServiceError};
use crate::render::{MessageBubble, render_message};
use crate::types::{Message, MessageKind, OutgoingMessage};

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("消息发送失败: {0}")]
    SendFailed(#[source] ServiceError),
    #[error("无效的媒体消息: {0}")]
    InvalidMedia(String),
    #[error("聊天窗口已关闭")]
    Closed,
}

// ============================================================================
// 类型定义
// ============================================================================

/// 聊天对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub conversation_id: String,
    pub current_user_id: String,
    pub other_user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollBehavior {
    Smooth,
}

/// 滚动请求，`seq` 单调递增
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrollRequest {
    pub seq: u64,
    pub target_message_id: Option<String>,
    pub behavior: ScrollBehavior,
}

/// 发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    /// 内容为空白，未发送
    Empty,
    /// 另一条消息正在发送
    AlreadySending,
    /// 相同内容正在发送
    Duplicate,
}

/// 聊天窗口状态快照
#[derive(Debug, Clone, Serialize)]
pub struct ChatWindowState {
    pub messages: Vec<Message>,
    pub loading: bool,
    pub draft: String,
    /// 发送中（禁用发送按钮）
    pub sending: bool,
    pub other_last_seen: Option<String>,
    /// 在线状态是否可用，失败时显示 Offline
    pub presence_available: bool,
    pub connection: ConnectionState,
    pub scroll: Option<ScrollRequest>,
    #[serde(skip)]
    in_flight: Option<String>,
}

impl Default for ChatWindowState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            loading: true,
            draft: String::new(),
            sending: false,
            other_last_seen: None,
            presence_available: false,
            connection: ConnectionState::Connecting,
            scroll: None,
            in_flight: None,
        }
    }
}

impl ChatWindowState {
    fn request_scroll(&mut self) {
        let seq = self.scroll.as_ref().map_or(1, |s| s.seq + 1);
        self.scroll = Some(ScrollRequest {
            seq,
            target_message_id: self.messages.last().map(|m| m.id.clone()),
            behavior: ScrollBehavior::Smooth,
        });
    }
}

// ============================================================================
// 控制器
// ============================================================================

struct ChatInner<B> {
    backend: Arc<B>,
    target: ChatTarget,
    state: RwLock<ChatWindowState>,
    heartbeat: &'static HeartbeatThrottle,
    cache: Option<Arc<ConversationCache>>,
    open: AtomicBool,
    cancel: CancellationToken,
}

struct LiveUpdates {
    messages: UpdateNotifier,
    profile: UpdateNotifier,
    driver: JoinHandle<()>,
}

/// 聊天窗口控制器
pub struct ChatWindow<B: MessagingBackend, R: RealtimeSource> {
    inner: Arc<ChatInner<B>>,
    realtime: Arc<R>,
    timings: Timings,
    live: Mutex<Option<LiveUpdates>>,
}

impl<B: MessagingBackend, R: RealtimeSource> ChatWindow<B, R> {
    pub fn new(backend: Arc<B>, realtime: Arc<R>, target: ChatTarget, timings: Timings) -> Self {
        Self {
            inner: Arc::new(ChatInner {
                backend,
                target,
                state: RwLock::new(ChatWindowState::default()),
                heartbeat: global_heartbeat(),
                cache: None,
                open: AtomicBool::new(true),
                cancel: CancellationToken::new(),
            }),
            realtime,
            timings,
            live: Mutex::new(None),
        }
    }

    /// 使用指定的心跳节流器（默认为进程级节流器）
    pub fn with_heartbeat(mut self, throttle: &'static HeartbeatThrottle) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.heartbeat = throttle,
            None => tracing::warn!("[ChatWindow] 窗口已打开，忽略心跳节流器设置"),
        }
        self
    }

    /// 附带本地缓存，拉取历史后写入
    pub fn with_cache(mut self, cache: Arc<ConversationCache>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.cache = Some(cache),
            None => tracing::warn!("[ChatWindow] 窗口已打开，忽略缓存设置"),
        }
        self
    }

    pub fn target(&self) -> &ChatTarget {
        &self.inner.target
    }

    /// 当前状态
    pub fn state(&self) -> ChatWindowState {
        self.inner.state.read().clone()
    }

    /// 打开窗口：拉取历史和在线状态，启动实时更新
    pub async fn open(&self) {
        if !self.inner.is_open() {
            return;
        }

        if let Some(cache) = &self.inner.cache {
            match cache.load_messages(&self.inner.target.conversation_id) {
                Ok(messages) if !messages.is_empty() => {
                    let mut state = self.inner.state.write();
                    state.messages = messages;
                    state.request_scroll();
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("[ChatWindow] 读取消息缓存失败: {}", e),
            }
        }

        tokio::join!(self.inner.load_messages(), self.inner.load_presence());
        self.start_live_updates();
    }

    /// 重新拉取完整消息历史
    pub async fn load_messages(&self) -> bool {
        self.inner.load_messages().await
    }

    /// 重新拉取对方的最后活跃时间
    pub async fn load_presence(&self) -> bool {
        self.inner.load_presence().await
    }

    fn start_live_updates(&self) {
        if !self.inner.is_open() {
            return;
        }

        let mut live = self.live.lock();
        if live.is_some() {
            return;
        }

        let timings = self.timings.notifier();
        let (message_tx, message_rx) = async_channel::unbounded();
        let (profile_tx, profile_rx) = async_channel::unbounded();

        let messages = UpdateNotifier::start(
            Arc::clone(&self.realtime),
            RealtimeTopic::Messages {
                conversation_id: self.inner.target.conversation_id.clone(),
            },
            timings,
            UpdateSink::new(message_tx),
        );
        let profile = UpdateNotifier::start(
            Arc::clone(&self.realtime),
            RealtimeTopic::Profile {
                user_id: self.inner.target.other_user_id.clone(),
            },
            timings,
            UpdateSink::new(profile_tx),
        );

        let status = messages.watch_status();
        self.inner.state.write().connection = *status.borrow();

        let driver = tokio::spawn(drive(
            Arc::clone(&self.inner),
            message_rx,
            profile_rx,
            status,
            self.inner.cancel.child_token(),
        ));

        *live = Some(LiveUpdates {
            messages,
            profile,
            driver,
        });
    }

    /// 更新输入框内容
    pub fn set_draft(&self, text: impl Into<String>) {
        self.inner.state.write().draft = text.into();
    }

    /// 发送输入框中的文本
    pub async fn submit(&self) -> Result<SendOutcome, ChatError> {
        let content = {
            let mut state = self.inner.state.write();
            let content = state.draft.trim().to_string();
            match self.inner.begin_send(&mut state, &content) {
                Ok(()) => content,
                Err(outcome) => return outcome,
            }
        };

        let message = OutgoingMessage {
            conversation_id: self.inner.target.conversation_id.clone(),
            content: content.clone(),
            message_type: MessageKind::Text,
            media_url: None,
        };

        let message_id = self.inner.send(&message, &content).await?;

        {
            let mut state = self.inner.state.write();
            // 发送期间输入框未被修改时才清空
            if state.draft.trim() == content {
                state.draft.clear();
            }
        }

        self.inner.after_send().await;
        Ok(SendOutcome::Sent { message_id })
    }

    /// 发送媒体消息（图片/视频/音频），`caption` 可为空
    pub async fn send_media(
        &self,
        kind: MessageKind,
        media_url: &str,
        caption: &str,
    ) -> Result<SendOutcome, ChatError> {
        if !kind.is_media() {
            return Err(ChatError::InvalidMedia(format!("{} 不是媒体类型", kind.as_str())));
        }
        let media_url = media_url.trim();
        if media_url.is_empty() {
            return Err(ChatError::InvalidMedia("缺少媒体 URL".to_string()));
        }

        {
            let mut state = self.inner.state.write();
            if let Err(outcome) = self.inner.begin_send(&mut state, media_url) {
                return outcome;
            }
        }

        let message = OutgoingMessage {
            conversation_id: self.inner.target.conversation_id.clone(),
            content: caption.trim().to_string(),
            message_type: kind,
            media_url: Some(media_url.to_string()),
        };

        let message_id = self.inner.send(&message, media_url).await?;
        self.inner.after_send().await;
        Ok(SendOutcome::Sent { message_id })
    }

    /// 用户活跃（点击/按键），节流更新自己的最后活跃时间
    ///
    /// 返回是否真的写入了后端。
    pub async fn record_activity(&self) -> bool {
        self.inner.touch_presence().await
    }

    /// 对方在线状态文案
    pub fn presence_label(&self, now: DateTime<Utc>) -> String {
        let state = self.inner.state.read();
        if !state.presence_available {
            return OFFLINE_LABEL.to_string();
        }
        presence::presence_label(state.other_last_seen.as_deref(), now)
    }

    /// 对方是否在线
    pub fn is_other_online(&self, now: DateTime<Utc>) -> bool {
        let state = self.inner.state.read();
        state.presence_available && presence::is_online(state.other_last_seen.as_deref(), now)
    }

    /// 渲染后的消息气泡
    pub fn bubbles(&self) -> Vec<MessageBubble> {
        let state = self.inner.state.read();
        state
            .messages
            .iter()
            .map(|m| render_message(m, &self.inner.target.current_user_id))
            .collect()
    }

    /// 关闭窗口：停止订阅、轮询和后台任务
    pub fn close(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        if let Some(live) = self.live.lock().take() {
            live.messages.cancel();
            live.profile.cancel();
            live.driver.abort();
        }
        tracing::debug!("[ChatWindow] 已关闭: {}", self.inner.target.conversation_id);
    }
}

impl<B: MessagingBackend, R: RealtimeSource> Drop for ChatWindow<B, R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: MessagingBackend> ChatInner<B> {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// 占用发送槽位，失败时返回应立即交给调用方的结果
    fn begin_send(
        &self,
        state: &mut ChatWindowState,
        key: &str,
    ) -> Result<(), Result<SendOutcome, ChatError>> {
        if !self.is_open() {
            return Err(Err(ChatError::Closed));
        }
        if key.is_empty() {
            return Err(Ok(SendOutcome::Empty));
        }
        if let Some(in_flight) = &state.in_flight {
            return Err(Ok(if in_flight == key {
                SendOutcome::Duplicate
            } else {
                SendOutcome::AlreadySending
            }));
        }
        state.in_flight = Some(key.to_string());
        state.sending = true;
        Ok(())
    }

    async fn send(&self, message: &OutgoingMessage, key: &str) -> Result<String, ChatError> {
        let request_id = Uuid::new_v4();
        tracing::debug!(
            "[ChatWindow] 发送消息 request_id={} conversation={} type={}",
            request_id,
            message.conversation_id,
            message.message_type.as_str()
        );

        let result = self.backend.send_message(message).await;

        {
            let mut state = self.state.write();
            if state.in_flight.as_deref() == Some(key) {
                state.in_flight = None;
            }
            state.sending = state.in_flight.is_some();
        }

        match result {
            Ok(message_id) => {
                tracing::info!(
                    "[ChatWindow] 消息已发送 request_id={} message_id={}",
                    request_id,
                    message_id
                );
                Ok(message_id)
            }
            Err(e) => {
                tracing::warn!("[ChatWindow] 消息发送失败 request_id={}: {}", request_id, e);
                Err(ChatError::SendFailed(e))
            }
        }
    }

    async fn after_send(&self) {
        self.touch_presence().await;
        self.load_messages().await;
    }

    async fn touch_presence(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        match presence::touch_presence_with(
            self.heartbeat,
            self.backend.as_ref(),
            &self.target.current_user_id,
        )
        .await
        {
            Ok(written) => written,
            Err(e) => {
                tracing::warn!("[ChatWindow] 活跃心跳失败: {}", e);
                false
            }
        }
    }

    async fn load_messages(&self) -> bool {
        if !self.is_open() {
            return false;
        }

        let result = self.backend.get_messages(&self.target.conversation_id).await;

        if !self.is_open() {
            return false;
        }

        let mut messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("[ChatWindow] 加载消息失败: {}", e);
                self.state.write().loading = false;
                return false;
            }
        };

        messages.sort_by_key(|m| {
            let at = parse_timestamp(&m.created_at);
            (at.is_none(), at)
        });

        if let Some(cache) = &self.cache
            && let Err(e) = cache.save_messages(&self.target.conversation_id, &messages)
        {
            tracing::warn!("[ChatWindow] 写入消息缓存失败: {}", e);
        }

        let mut state = self.state.write();
        state.loading = false;
        if state.messages != messages {
            state.messages = messages;
            state.request_scroll();
        }
        true
    }

    async fn load_presence(&self) -> bool {
        if !self.is_open() {
            return false;
        }

        let result = self.backend.get_last_seen(&self.target.other_user_id).await;

        if !self.is_open() {
            return false;
        }

        let mut state = self.state.write();
        match result {
            Ok(last_seen) => {
                state.other_last_seen = last_seen;
                state.presence_available = true;
                true
            }
            Err(e) => {
                tracing::warn!("[ChatWindow] 获取在线状态失败: {}", e);
                state.presence_available = false;
                false
            }
        }
    }

    fn apply_profile_signal(&self, signal: &UpdateSignal) -> bool {
        let Some(last_seen) = signal
            .event
            .as_ref()
            .and_then(|event| event.record_str("last_seen"))
        else {
            return false;
        };

        let mut state = self.state.write();
        state.other_last_seen = Some(last_seen.to_string());
        state.presence_available = true;
        true
    }
}

/// 消费两路更新信号：新消息重新拉取历史，资料更新刷新在线状态
async fn drive<B: MessagingBackend>(
    inner: Arc<ChatInner<B>>,
    message_signals: async_channel::Receiver<UpdateSignal>,
    profile_signals: async_channel::Receiver<UpdateSignal>,
    mut status: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut status_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = status.changed(), if status_open => {
                if changed.is_err() {
                    status_open = false;
                    continue;
                }
                let current = *status.borrow_and_update();
                inner.state.write().connection = current;
            }
            signal = message_signals.recv() => {
                if signal.is_err() {
                    break;
                }
                while message_signals.try_recv().is_ok() {}
                if !inner.load_messages().await && !inner.is_open() {
                    break;
                }
            }
            signal = profile_signals.recv() => {
                let Ok(signal) = signal else { break };
                if !inner.apply_profile_signal(&signal) {
                    inner.load_presence().await;
                }
            }
        }
    }
}

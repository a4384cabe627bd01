//! 会话列表控制器
//!
//! 负责会话列表的加载、后台刷新和实时更新：
//! - `load`: 首次加载，成功后启动实时更新
//! - `refresh`: 静默/手动刷新，序列化快照对比，未变化时不更新状态
//! - 未读总数增加时显示新消息提示，3 秒后自动消失
//! - 实时订阅 3 秒内未确认时降级为每 15 秒轮询
//! - `unmount` / Drop: 同步取消订阅、轮询和提示定时器
//!
//! 多个刷新重叠时，以最后返回的结果为准，对比对象始终是最后保存的快照。

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Timings;
use crate::db::ConversationCache;
use crate::filter::{ConversationTab, TabBadges, filter_conversations, total_unread, unread_badges};
use crate::notifier::{ConnectionState, UpdateNotifier, UpdateSignal, UpdateSink};
use crate::remote::{MessagingBackend, RealtimeSource, RealtimeTopic, ServiceError};
use crate::types::Conversation;

// ============================================================================
// 状态
// ============================================================================

/// 会话列表状态快照（供界面渲染）
#[derive(Debug, Clone, Serialize)]
pub struct ConversationListState {
    pub conversations: Vec<Conversation>,
    /// 当前标签页和搜索词下的会话
    pub filtered: Vec<Conversation>,
    pub badges: TabBadges,
    pub tab: ConversationTab,
    pub query: String,
    /// 首次加载中（显示骨架屏）
    pub initial_loading: bool,
    /// 手动刷新中（显示可见的加载指示）
    pub manual_refreshing: bool,
    /// 后台刷新中（仅环境指示）
    pub background_refreshing: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub connection: ConnectionState,
    /// 新消息提示
    pub new_message_toast: bool,
}

impl Default for ConversationListState {
    fn default() -> Self {
        Self {
            conversations: Vec::new(),
            filtered: Vec::new(),
            badges: TabBadges::default(),
            tab: ConversationTab::All,
            query: String::new(),
            initial_loading: true,
            manual_refreshing: false,
            background_refreshing: false,
            last_updated: None,
            connection: ConnectionState::Connecting,
            new_message_toast: false,
        }
    }
}

impl ConversationListState {
    fn recompute(&mut self) {
        self.filtered = filter_conversations(&self.conversations, self.tab, &self.query);
        self.badges = unread_badges(&self.conversations);
    }

    fn replace(&mut self, conversations: Vec<Conversation>, at: DateTime<Utc>) {
        self.conversations = conversations;
        self.last_updated = Some(at);
        self.recompute();
    }
}

/// 刷新方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// 后台刷新（实时事件或轮询触发）
    Silent,
    /// 用户手动刷新
    Manual,
}

/// 刷新结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// 数据未变化，未更新状态
    Unchanged,
    /// 数据已替换
    Replaced { unread_increased: bool },
    /// 拉取失败，保留旧数据
    Failed,
    /// 已卸载，未执行
    Skipped,
}

// ============================================================================
// 控制器
// ============================================================================

struct ListInner<B> {
    backend: Arc<B>,
    user_id: String,
    timings: Timings,
    state: RwLock<ConversationListState>,
    /// 最后保存的序列化快照
    snapshot: Mutex<String>,
    cache: Option<Arc<ConversationCache>>,
    mounted: AtomicBool,
    cancel: CancellationToken,
    toast_generation: AtomicU64,
    manual_in_flight: AtomicUsize,
    background_in_flight: AtomicUsize,
}

struct LiveUpdates {
    notifier: UpdateNotifier,
    driver: JoinHandle<()>,
}

/// 会话列表控制器
pub struct ConversationList<B: MessagingBackend, R: RealtimeSource> {
    inner: Arc<ListInner<B>>,
    realtime: Arc<R>,
    live: Mutex<Option<LiveUpdates>>,
}

impl<B: MessagingBackend, R: RealtimeSource> ConversationList<B, R> {
    pub fn new(backend: Arc<B>, realtime: Arc<R>, user_id: impl Into<String>, timings: Timings) -> Self {
        Self::build(backend, realtime, user_id.into(), timings, None)
    }

    /// 附带本地缓存，成功拉取后写入缓存
    pub fn with_cache(
        backend: Arc<B>,
        realtime: Arc<R>,
        user_id: impl Into<String>,
        timings: Timings,
        cache: Arc<ConversationCache>,
    ) -> Self {
        Self::build(backend, realtime, user_id.into(), timings, Some(cache))
    }

    fn build(
        backend: Arc<B>,
        realtime: Arc<R>,
        user_id: String,
        timings: Timings,
        cache: Option<Arc<ConversationCache>>,
    ) -> Self {
        Self {
            inner: Arc::new(ListInner {
                backend,
                user_id,
                timings,
                state: RwLock::new(ConversationListState::default()),
                snapshot: Mutex::new(String::new()),
                cache,
                mounted: AtomicBool::new(true),
                cancel: CancellationToken::new(),
                toast_generation: AtomicU64::new(0),
                manual_in_flight: AtomicUsize::new(0),
                background_in_flight: AtomicUsize::new(0),
            }),
            realtime,
            live: Mutex::new(None),
        }
    }

    /// 当前状态
    pub fn state(&self) -> ConversationListState {
        self.inner.state.read().clone()
    }

    /// 用缓存数据填充列表（首次加载前离线展示）
    ///
    /// 不更新快照，首次加载的结果总会替换缓存数据。
    pub fn hydrate_from_cache(&self) -> usize {
        let Some(cache) = &self.inner.cache else {
            return 0;
        };
        match cache.load_conversations() {
            Ok(conversations) if !conversations.is_empty() => {
                let count = conversations.len();
                let mut state = self.inner.state.write();
                state.conversations = conversations;
                state.recompute();
                tracing::debug!("[ConversationList] 从缓存加载 {} 个会话", count);
                count
            }
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!("[ConversationList] 读取会话缓存失败: {}", e);
                0
            }
        }
    }

    /// 首次加载
    ///
    /// 失败时列表保持为空，加载状态结束，不重试。
    pub async fn load(&self) -> Result<usize, ServiceError> {
        if !self.inner.is_mounted() {
            return Ok(0);
        }

        let result = self.inner.backend.get_conversations().await;

        if !self.inner.is_mounted() {
            return Ok(0);
        }

        let conversations = match result {
            Ok(conversations) => conversations,
            Err(e) => {
                tracing::error!("[ConversationList] 加载会话失败: {}", e);
                let mut state = self.inner.state.write();
                state.conversations.clear();
                state.recompute();
                state.initial_loading = false;
                return Err(e);
            }
        };

        let count = conversations.len();
        let serialized = serde_json::to_string(&conversations)?;
        self.inner.store(conversations, serialized, true);
        tracing::info!("[ConversationList] 已加载 {} 个会话", count);

        self.start_live_updates();
        Ok(count)
    }

    /// 刷新会话列表
    pub async fn refresh(&self, mode: RefreshMode) -> RefreshOutcome {
        self.inner.refresh(mode).await
    }

    /// 启动实时更新（重复调用无效果）
    pub fn start_live_updates(&self) {
        if !self.inner.is_mounted() {
            return;
        }

        let mut live = self.live.lock();
        if live.is_some() {
            return;
        }

        let (tx, rx) = async_channel::unbounded();
        let notifier = UpdateNotifier::start(
            Arc::clone(&self.realtime),
            RealtimeTopic::Conversations {
                user_id: self.inner.user_id.clone(),
            },
            self.inner.timings.notifier(),
            UpdateSink::new(tx),
        );
        let status = notifier.watch_status();
        self.inner.state.write().connection = *status.borrow();

        let driver = tokio::spawn(drive(
            Arc::clone(&self.inner),
            rx,
            status,
            self.inner.cancel.child_token(),
        ));

        *live = Some(LiveUpdates { notifier, driver });
    }

    /// 切换标签页
    pub fn set_tab(&self, tab: ConversationTab) {
        let mut state = self.inner.state.write();
        state.tab = tab;
        state.recompute();
    }

    /// 设置搜索词
    pub fn set_query(&self, query: impl Into<String>) {
        let mut state = self.inner.state.write();
        state.query = query.into();
        state.recompute();
    }

    /// 关闭新消息提示
    pub fn dismiss_toast(&self) {
        self.inner.toast_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.state.write().new_message_toast = false;
    }

    /// 卸载：停止订阅、轮询和所有定时器
    pub fn unmount(&self) {
        if !self.inner.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        if let Some(live) = self.live.lock().take() {
            live.notifier.cancel();
            live.driver.abort();
        }
        tracing::debug!("[ConversationList] 已卸载");
    }
}

impl<B: MessagingBackend, R: RealtimeSource> Drop for ConversationList<B, R> {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<B: MessagingBackend> ListInner<B> {
    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn in_flight(&self, mode: RefreshMode) -> &AtomicUsize {
        match mode {
            RefreshMode::Manual => &self.manual_in_flight,
            RefreshMode::Silent => &self.background_in_flight,
        }
    }

    fn begin_refresh(&self, mode: RefreshMode) {
        self.in_flight(mode).fetch_add(1, Ordering::SeqCst);
        self.sync_indicators();
    }

    fn end_refresh(&self, mode: RefreshMode) {
        self.in_flight(mode).fetch_sub(1, Ordering::SeqCst);
        self.sync_indicators();
    }

    fn sync_indicators(&self) {
        let mut state = self.state.write();
        state.manual_refreshing = self.manual_in_flight.load(Ordering::SeqCst) > 0;
        state.background_refreshing = self.background_in_flight.load(Ordering::SeqCst) > 0;
    }

    async fn refresh(self: &Arc<Self>, mode: RefreshMode) -> RefreshOutcome {
        if !self.is_mounted() {
            return RefreshOutcome::Skipped;
        }

        self.begin_refresh(mode);
        let result = self.backend.get_conversations().await;
        self.end_refresh(mode);

        if !self.is_mounted() {
            return RefreshOutcome::Skipped;
        }

        let conversations = match result {
            Ok(conversations) => conversations,
            Err(e) => {
                tracing::warn!("[ConversationList] 刷新会话失败 ({:?}): {}", mode, e);
                return RefreshOutcome::Failed;
            }
        };

        let serialized = match serde_json::to_string(&conversations) {
            Ok(serialized) => serialized,
            Err(e) => {
                tracing::warn!("[ConversationList] 会话序列化失败: {}", e);
                return RefreshOutcome::Failed;
            }
        };

        let Some(unread_increased) = self.store(conversations, serialized, false) else {
            return RefreshOutcome::Unchanged;
        };

        if unread_increased {
            self.show_toast();
        }

        tracing::debug!(
            "[ConversationList] 会话已更新 ({:?}), 未读增加: {}",
            mode,
            unread_increased
        );
        RefreshOutcome::Replaced { unread_increased }
    }

    /// 保存拉取结果，返回未读总数是否增加；与快照相同时返回 None
    ///
    /// 快照锁持有到状态替换完成，快照、缓存和状态按同一顺序更新。
    /// 加锁顺序：先快照，后状态。
    fn store(&self, conversations: Vec<Conversation>, serialized: String, initial: bool) -> Option<bool> {
        let mut snapshot = self.snapshot.lock();
        if !initial && *snapshot == serialized {
            return None;
        }
        *snapshot = serialized;
        self.persist(&conversations);

        let mut state = self.state.write();
        let previous = total_unread(&state.conversations);
        let current = total_unread(&conversations);
        state.replace(conversations, Utc::now());
        if initial {
            state.initial_loading = false;
        }
        Some(current > previous)
    }

    /// 显示新消息提示，新的提示会重新计时
    fn show_toast(self: &Arc<Self>) {
        let generation = self.toast_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.write().new_message_toast = true;

        let inner = Arc::clone(self);
        let cancel = self.cancel.child_token();
        let duration = self.timings.toast();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    if inner.toast_generation.load(Ordering::SeqCst) == generation {
                        inner.state.write().new_message_toast = false;
                    }
                }
            }
        });
    }

    fn persist(&self, conversations: &[Conversation]) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache.save_conversations(conversations)
        {
            tracing::warn!("[ConversationList] 写入会话缓存失败: {}", e);
        }
    }
}

/// 消费更新信号：每个信号执行一次静默刷新，同时同步连接状态
async fn drive<B: MessagingBackend>(
    inner: Arc<ListInner<B>>,
    signals: async_channel::Receiver<UpdateSignal>,
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
                tracing::debug!("[ConversationList] 连接状态: {:?}", current);
            }
            signal = signals.recv() => {
                let Ok(signal) = signal else { break };
                // 排队中的信号合并为一次刷新
                while signals.try_recv().is_ok() {}
                tracing::debug!("[ConversationList] 收到更新信号: {:?}", signal.trigger);
                if inner.refresh(RefreshMode::Silent).await == RefreshOutcome::Skipped {
                    break;
                }
            }
        }
    }
}

/*!
 * 更新通知模块
 *
 * 实时订阅 + 降级轮询，两种来源统一通过 `UpdateSink` 发出更新信号。
 *
 * 工作流程：
 * 1. 启动后状态为 `Connecting`，向实时事件源订阅主题
 * 2. 确认超时（默认 3 秒）内收到确认：状态变为 `Connected`，转发实时事件
 * 3. 订阅失败或超时：状态变为 `Disconnected`，启动轮询（默认每 15 秒）
 * 4. 降级期间若迟到的实时事件到达：状态变为 `Connected`，停止轮询
 * 5. 实时事件流结束：重新降级为轮询
 *
 * 取消：`UpdateNotifier::cancel` 或丢弃句柄会同步停止订阅和轮询定时器，
 * 之后不会再发出任何信号。
 */

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::remote::{RealtimeEvent, RealtimeSource, RealtimeTopic, Subscription};

// ============================================================================
// 类型定义
// ============================================================================

/// 实时连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// 更新来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTrigger {
    Realtime,
    Poll,
}

/// 更新信号
#[derive(Debug, Clone)]
pub struct UpdateSignal {
    pub trigger: UpdateTrigger,
    /// 实时事件负载（轮询信号为 None）
    pub event: Option<RealtimeEvent>,
}

/// 时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierTimings {
    /// 订阅确认超时
    pub confirm_timeout: Duration,
    /// 降级轮询间隔
    pub poll_interval: Duration,
}

impl Default for NotifierTimings {
    fn default() -> Self {
        Self {
            confirm_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(15),
        }
    }
}

/// 更新信号接收端
#[derive(Clone)]
pub struct UpdateSink {
    sender: async_channel::Sender<UpdateSignal>,
}

impl UpdateSink {
    pub fn new(sender: async_channel::Sender<UpdateSignal>) -> Self {
        Self { sender }
    }

    /// 发出信号，接收方已关闭时返回 false
    pub async fn notify(&self, signal: UpdateSignal) -> bool {
        self.sender.send(signal).await.is_ok()
    }
}

/// 来源退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceExit {
    Cancelled,
    SinkClosed,
    StreamEnded,
}

/// 更新来源：实时推送或轮询定时器
pub trait UpdateSource: Send {
    fn run(
        self,
        sink: UpdateSink,
        cancel: CancellationToken,
    ) -> impl Future<Output = SourceExit> + Send;
}

// ============================================================================
// 实时推送
// ============================================================================

/// 实时推送来源，持有订阅直到退出
pub struct PushSubscriber {
    subscription: Subscription,
}

impl PushSubscriber {
    pub fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }
}

impl UpdateSource for PushSubscriber {
    async fn run(self, sink: UpdateSink, cancel: CancellationToken) -> SourceExit {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SourceExit::Cancelled,
                event = self.subscription.events.recv() => match event {
                    Ok(event) => {
                        let signal = UpdateSignal {
                            trigger: UpdateTrigger::Realtime,
                            event: Some(event),
                        };
                        if !sink.notify(signal).await {
                            return SourceExit::SinkClosed;
                        }
                    }
                    Err(_) => return SourceExit::StreamEnded,
                },
            }
        }
    }
}

// ============================================================================
// 轮询
// ============================================================================

/// 轮询定时器，第一次触发在一个周期之后
pub struct PollTimer {
    interval: Duration,
}

impl PollTimer {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl UpdateSource for PollTimer {
    async fn run(self, sink: UpdateSink, cancel: CancellationToken) -> SourceExit {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SourceExit::Cancelled,
                _ = ticker.tick() => {
                    let signal = UpdateSignal {
                        trigger: UpdateTrigger::Poll,
                        event: None,
                    };
                    if !sink.notify(signal).await {
                        return SourceExit::SinkClosed;
                    }
                }
            }
        }
    }
}

// ============================================================================
// 监督者
// ============================================================================

/// 更新通知句柄
pub struct UpdateNotifier {
    status: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl UpdateNotifier {
    /// 启动通知（必须在 tokio 运行时内调用）
    pub fn start<R: RealtimeSource>(
        realtime: Arc<R>,
        topic: RealtimeTopic,
        timings: NotifierTimings,
        sink: UpdateSink,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(supervise(
            realtime,
            topic,
            timings,
            sink,
            status_tx,
            cancel.clone(),
        ));

        Self {
            status: status_rx,
            cancel,
            task,
        }
    }

    /// 当前连接状态
    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// 订阅连接状态变化
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// 停止订阅和轮询
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

impl Drop for UpdateNotifier {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn supervise<R: RealtimeSource>(
    realtime: Arc<R>,
    topic: RealtimeTopic,
    timings: NotifierTimings,
    sink: UpdateSink,
    status: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let channel = topic.channel_name();
    let deadline = Instant::now() + timings.confirm_timeout;

    let subscribed = tokio::select! {
        _ = cancel.cancelled() => return,
        result = tokio::time::timeout_at(deadline, realtime.subscribe(&topic)) => result,
    };

    let mut subscription = match subscribed {
        Ok(Ok(subscription)) => Some(subscription),
        Ok(Err(e)) => {
            tracing::warn!("[Notifier] 订阅失败，降级为轮询 {}: {}", channel, e);
            None
        }
        Err(_) => {
            tracing::warn!("[Notifier] 订阅超时，降级为轮询: {}", channel);
            None
        }
    };

    let confirmed = match subscription.as_mut() {
        Some(sub) => tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout_at(deadline, &mut sub.confirmed) => {
                matches!(result, Ok(Ok(())))
            }
        },
        None => false,
    };

    let mut pending: Option<RealtimeEvent> = None;

    if confirmed {
        tracing::info!("[Notifier] 实时订阅已连接: {}", channel);
    } else {
        let _ = status.send(ConnectionState::Disconnected);
        tracing::info!(
            "[Notifier] 实时订阅未确认，每 {:?} 轮询一次: {}",
            timings.poll_interval,
            channel
        );

        match degrade(subscription.take(), &timings, &sink, &cancel).await {
            Degraded::Recovered(sub, event) => {
                subscription = Some(sub);
                pending = Some(event);
                tracing::info!("[Notifier] 收到实时事件，停止轮询: {}", channel);
            }
            Degraded::Stopped => return,
        }
    }

    let Some(subscription) = subscription else {
        return;
    };
    let _ = status.send(ConnectionState::Connected);

    if let Some(event) = pending {
        let signal = UpdateSignal {
            trigger: UpdateTrigger::Realtime,
            event: Some(event),
        };
        if !sink.notify(signal).await {
            return;
        }
    }

    let exit = PushSubscriber::new(subscription)
        .run(sink.clone(), cancel.clone())
        .await;

    if exit == SourceExit::StreamEnded {
        let _ = status.send(ConnectionState::Disconnected);
        tracing::warn!("[Notifier] 实时事件流已结束，降级为轮询: {}", channel);
        PollTimer::new(timings.poll_interval)
            .run(sink, cancel)
            .await;
    }
}

enum Degraded {
    /// 迟到的实时事件到达
    Recovered(Subscription, RealtimeEvent),
    /// 已取消或接收方关闭
    Stopped,
}

/// 降级模式：轮询，同时继续等待迟到的实时事件
async fn degrade(
    subscription: Option<Subscription>,
    timings: &NotifierTimings,
    sink: &UpdateSink,
    cancel: &CancellationToken,
) -> Degraded {
    let poll_cancel = cancel.child_token();
    let poll = PollTimer::new(timings.poll_interval).run(sink.clone(), poll_cancel.clone());
    tokio::pin!(poll);

    let Some(subscription) = subscription else {
        poll.await;
        return Degraded::Stopped;
    };

    let late_event = async move {
        // 事件流关闭后不再等待
        let received = subscription.events.recv().await;
        match received {
            Ok(event) => (subscription, event),
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = &mut poll => Degraded::Stopped,
        (subscription, event) = late_event => {
            poll_cancel.cancel();
            Degraded::Recovered(subscription, event)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::{MockRealtime, event};
    use crate::remote::ChangeKind;

    fn topic() -> RealtimeTopic {
        RealtimeTopic::Conversations {
            user_id: "u1".to_string(),
        }
    }

    fn drain(rx: &async_channel::Receiver<UpdateSignal>) -> Vec<UpdateTrigger> {
        let mut triggers = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            triggers.push(signal.trigger);
        }
        triggers
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_subscription_never_polls() {
        let realtime = Arc::new(MockRealtime::confirming());
        let (tx, rx) = async_channel::unbounded();
        let notifier = UpdateNotifier::start(
            realtime.clone(),
            topic(),
            NotifierTimings::default(),
            UpdateSink::new(tx),
        );
        assert_eq!(notifier.status(), ConnectionState::Connecting);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(notifier.status(), ConnectionState::Connected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(drain(&rx).is_empty());

        realtime
            .push(&topic(), event(ChangeKind::Insert, "conversations", serde_json::json!({})))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(drain(&rx), vec![UpdateTrigger::Realtime]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_subscription_falls_back_to_polling() {
        let realtime = Arc::new(MockRealtime::silent());
        let (tx, rx) = async_channel::unbounded();
        let notifier = UpdateNotifier::start(
            realtime,
            topic(),
            NotifierTimings::default(),
            UpdateSink::new(tx),
        );

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(notifier.status(), ConnectionState::Connecting);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(notifier.status(), ConnectionState::Disconnected);
        assert!(drain(&rx).is_empty());

        // 3s + 15s 后第一次轮询
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(drain(&rx), vec![UpdateTrigger::Poll]);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(drain(&rx), vec![UpdateTrigger::Poll]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_error_degrades_immediately() {
        let realtime = Arc::new(MockRealtime::failing());
        let (tx, rx) = async_channel::unbounded();
        let notifier = UpdateNotifier::start(
            realtime,
            topic(),
            NotifierTimings::default(),
            UpdateSink::new(tx),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(notifier.status(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(drain(&rx), vec![UpdateTrigger::Poll]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_event_stops_polling() {
        let realtime = Arc::new(MockRealtime::silent());
        let (tx, rx) = async_channel::unbounded();
        let notifier = UpdateNotifier::start(
            realtime.clone(),
            topic(),
            NotifierTimings::default(),
            UpdateSink::new(tx),
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(notifier.status(), ConnectionState::Disconnected);

        realtime
            .push(&topic(), event(ChangeKind::Update, "conversations", serde_json::json!({})))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(notifier.status(), ConnectionState::Connected);
        assert_eq!(drain(&rx), vec![UpdateTrigger::Realtime]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(drain(&rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let realtime = Arc::new(MockRealtime::silent());
        let (tx, rx) = async_channel::unbounded();
        let notifier = UpdateNotifier::start(
            realtime,
            topic(),
            NotifierTimings::default(),
            UpdateSink::new(tx),
        );

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(drain(&rx), vec![UpdateTrigger::Poll]);

        notifier.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(drain(&rx).is_empty());
    }
}

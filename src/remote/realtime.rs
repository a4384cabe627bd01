//! HTTP 流式实时事件源
//!
//! 订阅流程：
//! 1. `GET {realtime_url}/v1/stream?channel=..&table=..&filter=..&event=..`
//! 2. 服务器返回 2xx 视为订阅确认
//! 3. 响应体是逐行 JSON（兼容 `data:` 前缀，`:` 开头的行是心跳）
//!
//! 读取任务在后台运行，`Subscription` 被丢弃时停止。
//! 订阅失败不会返回错误：确认通道直接关闭，由调用方降级为轮询。
//! 单行超过 1 MiB 仍未结束时丢弃该行，直到下一个换行符。

use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::http::normalize_base_url;
use super::{RealtimeEvent, RealtimeSource, RealtimeTopic, ServiceError, Subscription};
use crate::config::BackendConfig;

/// 事件通道容量
const EVENT_BUFFER: usize = 64;

/// 未结束的单行最大字节数
const MAX_PENDING_LINE: usize = 1024 * 1024;

/// HTTP 实时事件源
pub struct HttpRealtime {
    client: Client,
    realtime_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
}

impl HttpRealtime {
    pub fn new(config: &BackendConfig, access_token: Option<String>) -> Result<Self, ServiceError> {
        Self::with_client(config, access_token, Client::new())
    }

    /// 使用自定义的 reqwest 客户端（代理、超时等）
    pub fn with_client(
        config: &BackendConfig,
        access_token: Option<String>,
        client: Client,
    ) -> Result<Self, ServiceError> {
        let realtime_url = normalize_base_url(config.realtime_endpoint())?;
        Ok(Self {
            client,
            realtime_url,
            api_key: config.api_key.clone(),
            access_token: RwLock::new(access_token),
        })
    }

    /// 更新登录令牌，只影响之后的订阅
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn stream_request(&self, topic: &RealtimeTopic) -> reqwest::RequestBuilder {
        let mut query = vec![
            ("channel", topic.channel_name()),
            ("table", topic.table().to_string()),
        ];
        if let Some(filter) = topic.filter() {
            query.push(("filter", filter));
        }
        query.push((
            "event",
            topic
                .change_kind()
                .map(|k| k.as_str().to_string())
                .unwrap_or_else(|| "*".to_string()),
        ));

        let token = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.api_key.clone());
        self.client
            .get(format!("{}/v1/stream", self.realtime_url))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .query(&query)
    }
}

impl RealtimeSource for HttpRealtime {
    async fn subscribe(&self, topic: &RealtimeTopic) -> Result<Subscription, ServiceError> {
        let (confirm_tx, confirm_rx) = oneshot::channel();
        let (event_tx, event_rx) = async_channel::bounded(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let request = self.stream_request(topic);
        let channel = topic.channel_name();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    tracing::debug!("[Realtime] 订阅已取消: {}", channel);
                }
                _ = read_stream(request, confirm_tx, event_tx, &channel) => {}
            }
        });

        Ok(Subscription::new(confirm_rx, event_rx, cancel))
    }
}

/// 按换行符切分字节流
///
/// 多字节字符可能跨块，按完整行解码。`scanned` 之前的数据已确认没有换行符。
struct LineBuffer {
    buf: Vec<u8>,
    scanned: usize,
    limit: usize,
    /// 正在丢弃超长行的剩余部分
    discarding: bool,
}

impl LineBuffer {
    fn new() -> Self {
        Self::with_limit(MAX_PENDING_LINE)
    }

    fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            limit,
            discarding: false,
        }
    }

    /// 追加一块数据，返回其中已完整的行（不含换行符）
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut input = bytes;
        if self.discarding {
            match input.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    input = &input[pos + 1..];
                }
                None => return Vec::new(),
            }
        }
        self.buf.extend_from_slice(input);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            lines.push(String::from_utf8_lossy(&self.buf[start..end]).into_owned());
            start = end + 1;
            self.scanned = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.limit {
            tracing::warn!(
                "[Realtime] 单行超过 {} 字节仍未结束，已丢弃",
                self.limit
            );
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }
}

/// 读取事件流直到连接断开或接收方关闭
async fn read_stream(
    request: reqwest::RequestBuilder,
    confirm_tx: oneshot::Sender<()>,
    event_tx: async_channel::Sender<RealtimeEvent>,
    channel: &str,
) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("[Realtime] 连接失败 {}: {}", channel, e);
            return;
        }
    };

    if !response.status().is_success() {
        tracing::warn!(
            "[Realtime] 订阅被拒绝 {}: HTTP {}",
            channel,
            response.status()
        );
        return;
    }

    let _ = confirm_tx.send(());
    tracing::info!("[Realtime] 订阅已确认: {}", channel);

    let mut stream = response.bytes_stream();
    let mut lines = LineBuffer::new();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("[Realtime] 事件流中断 {}: {}", channel, e);
                return;
            }
        };

        for line in lines.push(&bytes) {
            match parse_event_line(&line) {
                Some(Ok(event)) => {
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("[Realtime] 无法解析事件 {}: {}", channel, e);
                }
                None => {}
            }
        }
    }

    tracing::info!("[Realtime] 事件流已结束: {}", channel);
}

/// 解析一行事件，空行和心跳行返回 None
pub(crate) fn parse_event_line(line: &str) -> Option<Result<RealtimeEvent, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    Some(serde_json::from_str(payload))
}

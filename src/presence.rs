//! 在线状态模块
//!
//! - `is_online` / `format_last_seen` / `presence_label`: 纯函数，
//!   给定最后活跃时间和当前时刻判断在线状态，不依赖任何隐藏状态
//! - `HeartbeatThrottle`: 活跃心跳节流，两次写入至少间隔 20 分钟
//! - `touch_presence`: 使用进程级节流器写入当前用户的最后活跃时间
//!
//! ## 时间分档
//!
//! | 距今 | 文案 |
//! |---|---|
//! | < 1 分钟 | Online |
//! | < 60 分钟 | Last seen N min ago |
//! | < 1440 分钟 | Last seen N hours ago |
//! | 其他 | Last seen N days ago |
//!
//! 15 分钟内视为在线。

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::remote::{MessagingBackend, ServiceError};

/// 在线判定窗口（分钟）
pub const ONLINE_WINDOW_MINUTES: i64 = 15;

/// 心跳最小写入间隔
pub const HEARTBEAT_MIN_GAP: Duration = Duration::from_secs(20 * 60);

pub const OFFLINE_LABEL: &str = "Offline";
pub const ONLINE_LABEL: &str = "Online";

// ============================================================================
// 时间解析
// ============================================================================

/// 解析后端时间戳
///
/// 支持 RFC 3339 和 Postgres 文本格式（`2026-10-19 10:00:00.123+00`），
/// 没有时区的时间按 UTC 处理。
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// 距今分钟数（向下取整，未来时间按 0 处理）
fn elapsed_minutes(last_seen: Option<&str>, now: DateTime<Utc>) -> Option<i64> {
    let seen = parse_timestamp(last_seen?)?;
    Some((now - seen).num_minutes().max(0))
}

// ============================================================================
// 在线判定
// ============================================================================

/// 15 分钟内活跃视为在线
pub fn is_online(last_seen: Option<&str>, now: DateTime<Utc>) -> bool {
    matches!(elapsed_minutes(last_seen, now), Some(m) if m < ONLINE_WINDOW_MINUTES)
}

/// 最后活跃时间文案
pub fn format_last_seen(last_seen: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(minutes) = elapsed_minutes(last_seen, now) else {
        return OFFLINE_LABEL.to_string();
    };

    if minutes < 1 {
        ONLINE_LABEL.to_string()
    } else if minutes < 60 {
        format!("Last seen {} min ago", minutes)
    } else if minutes < 1440 {
        format!("Last seen {} hours ago", minutes / 60)
    } else {
        format!("Last seen {} days ago", minutes / 1440)
    }
}

/// 聊天窗口顶部显示的状态：在线窗口内为 "Online"，否则为最后活跃文案
pub fn presence_label(last_seen: Option<&str>, now: DateTime<Utc>) -> String {
    if is_online(last_seen, now) {
        ONLINE_LABEL.to_string()
    } else {
        format_last_seen(last_seen, now)
    }
}

// ============================================================================
// 活跃心跳
// ============================================================================

/// 心跳节流器
///
/// 记录最后一次写入时刻（单调时钟）。先占位再写入，
/// 同时触发的多次心跳只有第一次拿到写入权。
pub struct HeartbeatThrottle {
    min_gap: Duration,
    last_write: Mutex<Option<Instant>>,
}

/// 写入许可，写入失败时交还
#[derive(Debug)]
pub struct HeartbeatPermit {
    acquired_at: Instant,
    previous: Option<Instant>,
}

impl HeartbeatThrottle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_write: Mutex::new(None),
        }
    }

    /// 尝试获取写入许可
    pub fn try_acquire(&self, now: Instant) -> Option<HeartbeatPermit> {
        let mut last = self.last_write.lock();
        if let Some(previous) = *last
            && now.saturating_duration_since(previous) < self.min_gap
        {
            return None;
        }
        let permit = HeartbeatPermit {
            acquired_at: now,
            previous: *last,
        };
        *last = Some(now);
        Some(permit)
    }

    /// 交还许可（写入失败），下一次交互可以重试
    pub fn release(&self, permit: HeartbeatPermit) {
        let mut last = self.last_write.lock();
        if *last == Some(permit.acquired_at) {
            *last = permit.previous;
        }
    }
}

/// 进程级心跳节流器，进程重启才会重置
static HEARTBEAT: Lazy<HeartbeatThrottle> = Lazy::new(|| HeartbeatThrottle::new(HEARTBEAT_MIN_GAP));

/// 获取进程级心跳节流器
pub fn global_heartbeat() -> &'static HeartbeatThrottle {
    &HEARTBEAT
}

/// 写入当前用户的最后活跃时间（进程级节流）
///
/// 返回是否真的发生了写入。
pub async fn touch_presence<B: MessagingBackend>(
    backend: &B,
    user_id: &str,
) -> Result<bool, ServiceError> {
    touch_presence_with(global_heartbeat(), backend, user_id).await
}

/// 使用指定节流器写入最后活跃时间
pub async fn touch_presence_with<B: MessagingBackend>(
    throttle: &HeartbeatThrottle,
    backend: &B,
    user_id: &str,
) -> Result<bool, ServiceError> {
    let Some(permit) = throttle.try_acquire(Instant::now()) else {
        return Ok(false);
    };

    let timestamp = Utc::now().to_rfc3339();
    match backend.update_last_seen(user_id, &timestamp).await {
        Ok(()) => {
            tracing::debug!("[Presence] 已更新最后活跃时间: {}", user_id);
            Ok(true)
        }
        Err(e) => {
            throttle.release(permit);
            tracing::warn!("[Presence] 更新最后活跃时间失败: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockBackend;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::Ordering;

    fn now() -> DateTime<Utc> {
        parse_timestamp("2026-10-19T12:00:00Z").unwrap()
    }

    fn ago(minutes: i64) -> String {
        (now() - ChronoDuration::minutes(minutes)).to_rfc3339()
    }

    #[test]
    fn test_is_online_window() {
        assert!(is_online(Some(&ago(10)), now()));
        assert!(!is_online(Some(&ago(20)), now()));
        assert!(!is_online(Some(&ago(15)), now()));
        assert!(is_online(Some(&ago(14)), now()));
        assert!(!is_online(None, now()));
    }

    #[test]
    fn test_format_last_seen_buckets() {
        assert_eq!(format_last_seen(None, now()), "Offline");
        assert_eq!(format_last_seen(Some(&ago(0)), now()), "Online");
        assert_eq!(format_last_seen(Some(&ago(5)), now()), "Last seen 5 min ago");
        assert_eq!(format_last_seen(Some(&ago(90)), now()), "Last seen 1 hours ago");
        assert_eq!(format_last_seen(Some(&ago(1439)), now()), "Last seen 23 hours ago");
        assert_eq!(format_last_seen(Some(&ago(3 * 1440 + 5)), now()), "Last seen 3 days ago");
    }

    #[test]
    fn test_presence_label_prefers_online_window() {
        assert_eq!(presence_label(Some(&ago(10)), now()), "Online");
        assert_eq!(presence_label(Some(&ago(20)), now()), "Last seen 20 min ago");
        assert_eq!(presence_label(None, now()), "Offline");
    }

    #[test]
    fn test_unparseable_and_future_timestamps() {
        assert_eq!(format_last_seen(Some("yesterday"), now()), "Offline");
        assert!(!is_online(Some("yesterday"), now()));

        let future = (now() + ChronoDuration::minutes(3)).to_rfc3339();
        assert!(is_online(Some(&future), now()));
        assert_eq!(format_last_seen(Some(&future), now()), "Online");
    }

    #[test]
    fn test_parse_postgres_formats() {
        let expected = now() - ChronoDuration::minutes(30);
        assert_eq!(parse_timestamp("2026-10-19 11:30:00+00"), Some(expected));
        assert_eq!(parse_timestamp("2026-10-19 11:30:00.000000+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-10-19T11:30:00"), Some(expected));
    }

    #[test]
    fn test_throttle_blocks_within_gap() {
        let throttle = HeartbeatThrottle::new(HEARTBEAT_MIN_GAP);
        let start = Instant::now();
        assert!(throttle.try_acquire(start).is_some());
        assert!(throttle.try_acquire(start + Duration::from_secs(5 * 60)).is_none());
        assert!(throttle.try_acquire(start + Duration::from_secs(19 * 60)).is_none());
        assert!(throttle.try_acquire(start + Duration::from_secs(20 * 60)).is_some());
    }

    #[test]
    fn test_release_restores_previous_slot() {
        let throttle = HeartbeatThrottle::new(HEARTBEAT_MIN_GAP);
        let start = Instant::now();
        let permit = throttle.try_acquire(start).unwrap();
        throttle.release(permit);
        assert!(throttle.try_acquire(start + Duration::from_secs(1)).is_some());
    }

    #[tokio::test]
    async fn test_two_heartbeats_within_five_minutes_write_once() {
        let backend = MockBackend::default();
        let throttle = HeartbeatThrottle::new(HEARTBEAT_MIN_GAP);

        assert!(touch_presence_with(&throttle, &backend, "u1").await.unwrap());
        assert!(!touch_presence_with(&throttle, &backend, "u1").await.unwrap());
        assert_eq!(backend.last_seen_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_global_heartbeat_is_shared_across_call_sites() {
        let backend = MockBackend::default();
        let first = touch_presence(&backend, "u1").await.unwrap();
        let second = touch_presence(&backend, "u2").await.unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(backend.last_seen_writes.load(Ordering::SeqCst), 1);
    }
}

//! 消息气泡渲染规则
//!
//! - 自己发送的消息在右侧，对方的在左侧
//! - 文本消息按换行拆分，保留空行
//! - 图片/视频/音频消息使用媒体 URL 渲染，缺少 URL 时退化为文本
//! - 自己的消息显示已读回执：未读 ✓，已读 ✓✓

use serde::Serialize;

use crate::types::{Message, MessageKind};

/// 气泡位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleSide {
    Own,
    Other,
}

/// 气泡内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BubbleBody {
    Text { lines: Vec<String> },
    Image { url: String, caption: Option<String> },
    Video { url: String, caption: Option<String> },
    Audio { url: String },
}

/// 已读回执
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadReceipt {
    Sent,
    Read,
}

impl ReadReceipt {
    pub fn glyph(&self) -> &'static str {
        match self {
            ReadReceipt::Sent => "✓",
            ReadReceipt::Read => "✓✓",
        }
    }
}

/// 渲染后的消息气泡
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageBubble {
    pub message_id: String,
    pub side: BubbleSide,
    pub body: BubbleBody,
    /// 仅自己的消息有回执
    pub receipt: Option<ReadReceipt>,
    pub sender_name: Option<String>,
    pub created_at: String,
}

fn text_lines(content: &str) -> Vec<String> {
    content
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

fn caption(content: &str) -> Option<String> {
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn body_for(message: &Message) -> BubbleBody {
    let url = message
        .media_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string);

    match (message.message_type, url) {
        (MessageKind::Image, Some(url)) => BubbleBody::Image {
            url,
            caption: caption(&message.content),
        },
        (MessageKind::Video, Some(url)) => BubbleBody::Video {
            url,
            caption: caption(&message.content),
        },
        (MessageKind::Audio, Some(url)) => BubbleBody::Audio { url },
        (kind, None) if kind.is_media() => {
            tracing::debug!("[Render] 媒体消息缺少 URL，按文本显示: {}", message.id);
            BubbleBody::Text {
                lines: text_lines(&message.content),
            }
        }
        _ => BubbleBody::Text {
            lines: text_lines(&message.content),
        },
    }
}

/// 渲染单条消息
pub fn render_message(message: &Message, current_user_id: &str) -> MessageBubble {
    let own = message.sender_id == current_user_id;

    MessageBubble {
        message_id: message.id.clone(),
        side: if own { BubbleSide::Own } else { BubbleSide::Other },
        body: body_for(message),
        receipt: own.then(|| {
            if message.is_read {
                ReadReceipt::Read
            } else {
                ReadReceipt::Sent
            }
        }),
        sender_name: message.sender_name.clone(),
        created_at: message.created_at.clone(),
    }
}

//! 消息页面路由
//!
//! - `/messages`: 会话列表
//! - `/messages/new`: 新建会话
//! - `/messages/:conversationId`: 聊天窗口
//!
//! 解析时忽略查询字符串、片段和末尾斜杠。

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Inbox,
    NewConversation,
    Conversation { id: String },
}

impl Route {
    /// 解析路径，不属于消息页面时返回 None
    pub fn parse(path: &str) -> Option<Route> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let mut segments = path.split('/').filter(|s| !s.is_empty());

        if segments.next()? != "messages" {
            return None;
        }

        let route = match segments.next() {
            None => Route::Inbox,
            Some("new") => Route::NewConversation,
            Some(id) => Route::Conversation { id: id.to_string() },
        };

        if segments.next().is_some() {
            return None;
        }
        Some(route)
    }

    pub fn path(&self) -> String {
        match self {
            Route::Inbox => "/messages".to_string(),
            Route::NewConversation => "/messages/new".to_string(),
            Route::Conversation { id } => format!("/messages/{}", id),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes() {
        assert_eq!(Route::parse("/messages"), Some(Route::Inbox));
        assert_eq!(Route::parse("/messages/"), Some(Route::Inbox));
        assert_eq!(Route::parse("/messages/new"), Some(Route::NewConversation));
        assert_eq!(
            Route::parse("/messages/8d1f?from=list#bottom"),
            Some(Route::Conversation {
                id: "8d1f".to_string()
            })
        );
    }

    #[test]
    fn test_rejects_other_paths() {
        assert_eq!(Route::parse("/"), None);
        assert_eq!(Route::parse("/marketplace/1"), None);
        assert_eq!(Route::parse("/messages/a/b"), None);
    }

    #[test]
    fn test_path_round_trip() {
        for route in [
            Route::Inbox,
            Route::NewConversation,
            Route::Conversation {
                id: "c-42".to_string(),
            },
        ] {
            assert_eq!(Route::parse(&route.to_string()), Some(route));
        }
    }
}

//! BizLink 消息核心
//!
//! 商务社交平台客户端的消息子系统，界面层读取控制器状态快照并调用控制器操作。
//!
//! ## 功能模块
//! - 会话列表：首次加载、静默/手动刷新、新消息提示、标签页筛选和未读角标
//! - 聊天窗口：消息历史、发送（防重复提交）、对方在线状态、活跃心跳、自动滚动
//! - 在线状态：15 分钟在线窗口、最后活跃文案、进程级心跳节流（20 分钟）
//! - 更新通知：实时订阅，3 秒未确认时降级为每 15 秒轮询
//! - 新建会话：已连接用户搜索、人脉关系校验、获取或创建会话
//! - 本地缓存：SQLite 保存会话快照和消息历史
//! - 可编辑条目：个人资料/商品/商家/职位/活动的字段结构和校验
//!
//! ## 后端
//! `remote` 中的 `MessagingBackend` / `RealtimeSource` 是与服务端交互的唯一边界，
//! 默认实现基于 reqwest（RPC + HTTP 流式事件）。

pub mod chat_window;
pub mod client;
pub mod compose;
pub mod config;
pub mod conversation_list;
pub mod db;
pub mod filter;
pub mod items;
pub mod logging;
pub mod notifier;
pub mod presence;
pub mod remote;
pub mod render;
pub mod routes;
pub mod types;
pub mod user_data;

pub use chat_window::{ChatError, ChatTarget, ChatWindow, ChatWindowState, SendOutcome};
pub use client::{ClientError, MessagingClient};
pub use compose::{ComposeError, ComposeFlow};
pub use config::MessagingConfig;
pub use conversation_list::{ConversationList, ConversationListState, RefreshMode, RefreshOutcome};
pub use db::{CacheError, ConversationCache};
pub use filter::ConversationTab;
pub use notifier::{ConnectionState, UpdateNotifier};
pub use remote::{HttpBackend, HttpRealtime, MessagingBackend, RealtimeSource, ServiceError};
pub use routes::Route;
pub use types::{Conversation, ConversationContext, Message, MessageKind};

//! 用户数据目录管理模块
//!
//! 按用户和服务器分隔本地缓存：
//!
//! ```text
//! {data_local_dir}/bizlink/
//!   ├── messaging.json          # 客户端配置
//!   └── {用户ID}_{服务器地址}/
//!       └── chat/               # 聊天缓存（SQLite数据库）
//!           └── messaging.db
//! ```
//!
//! 设置 `BIZLINK_DATA_DIR` 环境变量可以覆盖根目录。

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// 根目录覆盖变量
pub const DATA_DIR_ENV: &str = "BIZLINK_DATA_DIR";

const APP_DIR_NAME: &str = "bizlink";

// ============================================================================
// 当前用户上下文
// ============================================================================

/// 用户上下文信息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// 用户 ID
    pub user_id: String,
    /// 服务器地址
    pub server_url: String,
}

/// 全局当前用户上下文（线程安全）
static CURRENT_USER: Lazy<RwLock<Option<UserContext>>> = Lazy::new(|| RwLock::new(None));

// ============================================================================
// 目录路径管理
// ============================================================================

/// 获取应用数据根目录
///
/// 优先使用环境变量，其次是系统本地数据目录，最后回退到工作目录下的 data
pub fn get_app_root() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    match dirs::data_local_dir() {
        Some(dir) => dir.join(APP_DIR_NAME),
        None => PathBuf::from("data"),
    }
}

/// 清理服务器地址，生成安全的目录名
fn sanitize_server_url(server_url: &str) -> String {
    server_url
        .replace("https://", "")
        .replace("http://", "")
        .replace(['/', ':', '.', '?', '&', '='], "_")
        .trim_matches('_')
        .to_string()
}

/// 生成用户数据目录名
/// 格式: {user_id}_{server}
fn make_user_dir_name(user_id: &str, server_url: &str) -> String {
    let server_clean = sanitize_server_url(server_url);
    format!("{}_{}", user_id, server_clean)
}

/// 获取用户数据根目录
pub fn get_user_data_dir(user_id: &str, server_url: &str) -> PathBuf {
    get_app_root().join(make_user_dir_name(user_id, server_url))
}

/// 获取用户聊天缓存目录
pub fn get_user_chat_dir(user_id: &str, server_url: &str) -> PathBuf {
    get_user_data_dir(user_id, server_url).join("chat")
}

/// 获取用户数据库文件路径
pub fn get_user_db_path(user_id: &str, server_url: &str) -> PathBuf {
    get_user_chat_dir(user_id, server_url).join("messaging.db")
}

// ============================================================================
// 用户上下文管理
// ============================================================================

/// 设置当前用户上下文，并创建用户目录
pub fn set_current_user(user_id: &str, server_url: &str) -> std::io::Result<UserContext> {
    fs::create_dir_all(get_user_chat_dir(user_id, server_url))?;

    let context = UserContext {
        user_id: user_id.to_string(),
        server_url: server_url.to_string(),
    };
    *CURRENT_USER.write() = Some(context.clone());

    tracing::info!(
        "[UserData] 设置当前用户: {} @ {}",
        user_id,
        sanitize_server_url(server_url)
    );

    Ok(context)
}

/// 获取当前用户上下文
pub fn get_current_user() -> Option<UserContext> {
    CURRENT_USER.read().clone()
}

/// 清除当前用户上下文（登出时调用）
pub fn clear_current_user() {
    *CURRENT_USER.write() = None;
    tracing::info!("[UserData] 已清除当前用户");
}

/*!
 * 消息客户端配置管理模块
 *
 * 管理消息客户端的配置，包括：
 * - 后端地址（RPC、实时事件）与匿名 key
 * - 实时订阅确认超时、降级轮询间隔
 * - 新消息提示显示时长、联系人搜索防抖
 *
 * 配置以 JSON 文件保存，读取失败时使用默认值。
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::notifier::NotifierTimings;

// ============================================================================
// 错误类型
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件写入失败: {0}")]
    WriteFailed(String),
    #[error("目录创建失败: {0}")]
    DirectoryCreationFailed(String),
    #[error("配置序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// 配置结构
// ============================================================================

/// 消息客户端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingConfig {
    /// 后端地址
    pub backend: BackendConfig,
    /// 时间参数
    #[serde(default)]
    pub timings: Timings,
    /// 配置版本
    pub version: String,
}

/// 后端地址配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// RPC 服务地址
    pub base_url: String,
    /// 实时事件地址，未设置时使用 `base_url`
    #[serde(default)]
    pub realtime_url: Option<String>,
    /// 匿名 key
    pub api_key: String,
}

impl BackendConfig {
    pub fn realtime_endpoint(&self) -> &str {
        self.realtime_url.as_deref().unwrap_or(&self.base_url)
    }
}

/// 时间参数（毫秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timings {
    /// 实时订阅确认超时
    pub realtime_confirm_ms: u64,
    /// 降级轮询间隔
    pub poll_interval_ms: u64,
    /// 新消息提示显示时长
    pub toast_ms: u64,
    /// 联系人搜索防抖
    pub search_debounce_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            realtime_confirm_ms: 3_000,
            poll_interval_ms: 15_000,
            toast_ms: 3_000,
            search_debounce_ms: 300,
        }
    }
}

impl Timings {
    pub fn notifier(&self) -> NotifierTimings {
        NotifierTimings {
            confirm_timeout: Duration::from_millis(self.realtime_confirm_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn toast(&self) -> Duration {
        Duration::from_millis(self.toast_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                base_url: "http://localhost:54321".to_string(),
                realtime_url: None,
                api_key: String::new(),
            },
            timings: Timings::default(),
            version: "1.0".to_string(),
        }
    }
}

// ============================================================================
// 读写
// ============================================================================

impl MessagingConfig {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        crate::user_data::get_app_root().join("messaging.json")
    }

    /// 加载配置或使用默认值
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => {
                        tracing::info!("[Config] 配置已加载: {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("[Config] 配置解析失败，使用默认配置: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("[Config] 配置读取失败，使用默认配置: {}", e);
                }
            }
        }

        tracing::info!("[Config] 使用默认配置");
        Self::default()
    }

    /// 保存配置
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::DirectoryCreationFailed(format!("{:?}: {}", parent, e)))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| ConfigError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

//! HTTP 后端
//!
//! 通过 PostgREST 风格接口调用服务端存储过程：
//! - RPC: `POST {base}/rest/v1/rpc/{name}`，参数以 JSON 对象传入
//! - 资料表: `GET/PATCH {base}/rest/v1/profiles?id=eq.{id}`
//! - 人脉表: `GET {base}/rest/v1/connections?or=(...)`
//! - 可编辑条目: `PATCH/DELETE {base}/rest/v1/{table}?id=eq.{id}`
//!
//! 请求头携带 `apikey` 与 `Authorization: Bearer`（有登录令牌时使用令牌，
//! 否则使用匿名 key）。请求超时交给传输层，不额外设置。

use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{MessagingBackend, ServiceError};
use crate::config::BackendConfig;
use crate::items::{EditableItem, ItemKind};
use crate::types::{
    Connection, ConnectedUser, Conversation, Message, OutgoingMessage, ProfilePresence,
};

/// HTTP 消息后端
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, access_token: Option<String>) -> Result<Self, ServiceError> {
        Self::with_client(config, access_token, Client::new())
    }

    /// 使用自定义的 reqwest 客户端（代理、超时等）
    pub fn with_client(
        config: &BackendConfig,
        access_token: Option<String>,
        client: Client,
    ) -> Result<Self, ServiceError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            access_token: RwLock::new(access_token),
        })
    }

    /// 更新登录令牌（令牌刷新后调用）
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.api_key.clone());
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    /// 调用存储过程
    async fn rpc<T: DeserializeOwned>(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<T, ServiceError> {
        let url = self.rest_url(&format!("rpc/{}", name));
        let response = self
            .authorized(self.client.post(&url))
            .json(&params)
            .send()
            .await?;
        read_json(response).await
    }

    /// 保存编辑后的条目（先校验）
    pub async fn update_item(&self, item: &EditableItem) -> Result<(), ServiceError> {
        item.validate()?;
        let payload = item.update_payload()?;
        let id_filter = format!("eq.{}", item.id);
        let response = self
            .authorized(self.client.patch(self.rest_url(item.kind().table())))
            .query(&[("id", id_filter.as_str())])
            .json(&payload)
            .send()
            .await?;
        ensure_success(response).await
    }

    /// 删除条目
    pub async fn delete_item(&self, kind: ItemKind, id: &str) -> Result<(), ServiceError> {
        let id_filter = format!("eq.{}", id);
        let response = self
            .authorized(self.client.delete(self.rest_url(kind.table())))
            .query(&[("id", id_filter.as_str())])
            .send()
            .await?;
        ensure_success(response).await?;
        tracing::info!("[Http] 已删除{} {}", kind.as_str(), id);
        Ok(())
    }
}

/// 非 2xx 返回 `ServiceError::Status`，忽略成功响应体
async fn ensure_success(response: reqwest::Response) -> Result<(), ServiceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ServiceError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

/// 读取响应体并解析 JSON，非 2xx 返回 `ServiceError::Status`
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ServiceError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ServiceError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(serde_json::from_str(&body)?)
}

/// 校验并去掉末尾斜杠
pub(crate) fn normalize_base_url(raw: &str) -> Result<String, ServiceError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(ServiceError::InvalidEndpoint(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

impl MessagingBackend for HttpBackend {
    async fn get_conversations(&self) -> Result<Vec<Conversation>, ServiceError> {
        self.rpc("get_conversations", json!({})).await
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ServiceError> {
        self.rpc(
            "get_messages",
            json!({ "p_conversation_id": conversation_id }),
        )
        .await
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<String, ServiceError> {
        let value: serde_json::Value = self
            .rpc(
                "send_message",
                json!({
                    "p_conversation_id": message.conversation_id,
                    "p_content": message.content,
                    "p_message_type": message.message_type.as_str(),
                    "p_media_url": message.media_url,
                }),
            )
            .await?;
        id_from_value(value)
    }

    async fn get_or_create_conversation(&self, other_user_id: &str) -> Result<String, ServiceError> {
        let value: serde_json::Value = self
            .rpc(
                "get_or_create_conversation",
                json!({ "p_other_user_id": other_user_id }),
            )
            .await?;
        id_from_value(value)
    }

    async fn get_connected_users(
        &self,
        search_term: Option<&str>,
    ) -> Result<Vec<ConnectedUser>, ServiceError> {
        self.rpc(
            "get_connected_users",
            json!({ "p_search_term": search_term }),
        )
        .await
    }

    async fn get_connections(&self, user_id: &str) -> Result<Vec<Connection>, ServiceError> {
        let filter = format!("(sender_id.eq.{0},receiver_id.eq.{0})", user_id);
        let response = self
            .authorized(self.client.get(self.rest_url("connections")))
            .query(&[
                ("select", "sender_id,receiver_id,status"),
                ("or", filter.as_str()),
            ])
            .send()
            .await?;
        read_json(response).await
    }

    async fn update_last_seen(&self, user_id: &str, timestamp: &str) -> Result<(), ServiceError> {
        let id_filter = format!("eq.{}", user_id);
        let response = self
            .authorized(self.client.patch(self.rest_url("profiles")))
            .query(&[("id", id_filter.as_str())])
            .json(&json!({ "last_seen": timestamp }))
            .send()
            .await?;
        ensure_success(response).await
    }

    async fn get_last_seen(&self, user_id: &str) -> Result<Option<String>, ServiceError> {
        let id_filter = format!("eq.{}", user_id);
        let response = self
            .authorized(self.client.get(self.rest_url("profiles")))
            .query(&[("select", "id,last_seen"), ("id", id_filter.as_str())])
            .send()
            .await?;
        let rows: Vec<ProfilePresence> = read_json(response).await?;
        Ok(rows.into_iter().next().and_then(|row| row.last_seen))
    }
}

/// RPC 返回的 ID 可能是裸字符串，也可能是 `{ "id": ... }`
fn id_from_value(value: serde_json::Value) -> Result<String, ServiceError> {
    match value {
        serde_json::Value::String(id) => Ok(id),
        serde_json::Value::Object(ref map) => match map.get("id") {
            Some(serde_json::Value::String(id)) => Ok(id.clone()),
            _ => Err(ServiceError::Unexpected(value.to_string())),
        },
        serde_json::Value::Array(mut items) if items.len() == 1 => id_from_value(items.remove(0)),
        other => Err(ServiceError::Unexpected(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{ItemFields, JobFields};
    use crate::remote::test_server::serve_once;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn backend(base_url: &str) -> HttpBackend {
        let config = BackendConfig {
            base_url: base_url.to_string(),
            realtime_url: None,
            api_key: "anon-key".to_string(),
        };
        let client = Client::builder().no_proxy().build().unwrap();
        HttpBackend::with_client(&config, Some("tok-1".to_string()), client).unwrap()
    }

    #[tokio::test]
    async fn test_rpc_error_status_keeps_body() {
        let server = serve_once(
            "500 Internal Server Error",
            vec![br#"{"message":"boom"}"#.to_vec()],
        )
        .await;

        let result = backend(&server.base_url).get_conversations().await;
        match result {
            Err(ServiceError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("boom"));
            }
            other => panic!("unexpected result: {:?}", other.map(|c| c.len())),
        }

        let request = server.request.await.unwrap();
        assert!(request.starts_with("POST /rest/v1/rpc/get_conversations "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer tok-1"));
    }

    #[tokio::test]
    async fn test_get_last_seen_empty_rows() {
        let server = serve_once("200 OK", vec![b"[]".to_vec()]).await;

        let last_seen = backend(&server.base_url).get_last_seen("u2").await.unwrap();
        assert_eq!(last_seen, None);

        let request = server.request.await.unwrap();
        assert!(request.starts_with("GET /rest/v1/profiles?"));
        assert!(request.contains("id=eq.u2"));
    }

    #[tokio::test]
    async fn test_get_last_seen_reads_first_row() {
        let server = serve_once(
            "200 OK",
            vec![
                br#"[{"id":"u2","#.to_vec(),
                br#""last_seen":"2026-10-19T08:00:00Z"}]"#.to_vec(),
            ],
        )
        .await;

        let last_seen = backend(&server.base_url).get_last_seen("u2").await.unwrap();
        assert_eq!(last_seen.as_deref(), Some("2026-10-19T08:00:00Z"));
    }

    #[tokio::test]
    async fn test_update_item_validates_before_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let item = EditableItem::new(
            "j1",
            ItemFields::Job(JobFields {
                title: "Rust engineer".to_string(),
                ..Default::default()
            }),
        );
        let result = backend(&base_url).update_item(&item).await;
        assert!(matches!(result, Err(ServiceError::InvalidItem(_))));

        // 校验失败时不应发出任何请求
        let accepted = timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://api.bizlink.example/").unwrap(),
            "https://api.bizlink.example"
        );
        assert!(normalize_base_url("api.bizlink.example").is_err());
    }

    #[test]
    fn test_id_from_value_shapes() {
        assert_eq!(id_from_value(json!("abc")).unwrap(), "abc");
        assert_eq!(id_from_value(json!({ "id": "def" })).unwrap(), "def");
        assert_eq!(id_from_value(json!([{ "id": "ghi" }])).unwrap(), "ghi");
        assert!(id_from_value(json!(42)).is_err());
    }
}

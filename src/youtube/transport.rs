//! HTTPトランスポート境界
//!
//! セッションはこのトレイト越しにのみ通信する。
//! Cookie等の認証情報は外部から `Credentials` として渡される。

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::errors::YouTubeError;
use crate::config::{http_timeout, USER_AGENT};
use crate::util::mask_secret;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// 認証情報（ログイン済みセッションのCookieなど）
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub cookie: String,
    /// SAPISIDHASH等の認可ヘッダー
    pub authorization: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("cookie", &mask_secret(&self.cookie))
            .field(
                "authorization",
                &self.authorization.as_deref().map(mask_secret),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub credentials: Option<Credentials>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            credentials: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body),
            credentials: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// HTTPレスポンス（ステータスの解釈は呼び出し側が行う）
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Retry-Afterヘッダー（秒指定のみ対応）
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// リクエストを送信
    ///
    /// # Errors
    /// ネットワークエラーのみ `YouTubeError::Transport` を返す。
    /// 2xx以外のステータスは `Ok` として返す。
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, YouTubeError>;
}

/// reqwestによる標準トランスポート
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// # Errors
    /// HTTPクライアントのビルドに失敗した場合にエラーを返す
    pub fn new() -> Result<Self, YouTubeError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(http_timeout())
            .build()
            .map_err(|e| YouTubeError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, YouTubeError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(credentials) = &request.credentials {
            log::debug!("Attaching credentials: {:?}", credentials);
            builder = builder.header("Cookie", credentials.cookie.as_str());
            if let Some(authorization) = &credentials.authorization {
                builder = builder.header("Authorization", authorization.as_str());
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| YouTubeError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .text()
            .await
            .map_err(|e| YouTubeError::Transport(e.to_string()))?;

        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reqwest_transport_post() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/youtubei/v1/live_chat/get_live_chat")
            .match_header("content-type", "application/json")
            .match_header("cookie", "SID=abc")
            .match_body(mockito::Matcher::PartialJson(json!({"continuation": "tok"})))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let request = HttpRequest::post_json(
            format!("{}/youtubei/v1/live_chat/get_live_chat", server.url()),
            json!({"continuation": "tok"}),
        )
        .with_credentials(Some(Credentials {
            cookie: "SID=abc".to_string(),
            authorization: None,
        }));

        let response = transport.send(request).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, r#"{"ok":true}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reqwest_transport_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/live_chat")
            .with_status(429)
            .with_header("retry-after", "12")
            .create_async()
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .send(HttpRequest::get(format!("{}/live_chat", server.url())))
            .await
            .unwrap();

        assert_eq!(response.status, 429);
        assert_eq!(response.retry_after, Some(Duration::from_secs(12)));
    }

    #[tokio::test]
    async fn test_reqwest_transport_connection_error() {
        let transport = ReqwestTransport::new().unwrap();
        // 予約済みポートへの接続は失敗する
        let result = transport.send(HttpRequest::get("http://127.0.0.1:1/")).await;
        assert!(matches!(result, Err(YouTubeError::Transport(_))));
    }

    #[test]
    fn test_credentials_debug_is_masked() {
        let credentials = Credentials {
            cookie: "SAPISID=verysecretvalue".to_string(),
            authorization: None,
        };
        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("verysecretvalue"));
        assert!(debug.contains("SAPI***alue"));
    }
}

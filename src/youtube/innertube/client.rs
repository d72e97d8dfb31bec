//! InnerTube API クライアント実装

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::parser::{parse_action, parse_actions};
use super::types::{InnerTubeChatResponse, InnerTubeErrorResponse, NextContinuation};
use crate::config::ClientConfig;
use crate::youtube::errors::{ContextErrorKind, YouTubeError};
use crate::youtube::transport::{Credentials, HttpRequest, HttpResponse, Transport};
use crate::youtube::types::ChatAction;

const GET_LIVE_CHAT_PATH: &str = "/youtubei/v1/live_chat/get_live_chat";
const GET_LIVE_CHAT_REPLAY_PATH: &str = "/youtubei/v1/live_chat/get_live_chat_replay";
const SEND_MESSAGE_PATH: &str = "/youtubei/v1/live_chat/send_message";
const MODERATE_PATH: &str = "/youtubei/v1/live_chat/moderate";

/// エラーメッセージに含めるレスポンス本文の最大長
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// 1回分のチャット取得結果
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub actions: Vec<ChatAction>,
    /// 次回用continuation（Noneならチャット終了）
    pub continuation: Option<NextContinuation>,
}

/// InnerTube APIクライアント
///
/// 1配信分のリクエストを組み立てて `Transport` に渡す。状態は持たない。
pub struct InnerTubeClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    video_id: String,
    api_key: Option<String>,
    credentials: Option<Credentials>,
}

impl InnerTubeClient {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig, video_id: String) -> Self {
        let api_key = config.api_key.clone();
        Self {
            transport,
            config,
            video_id,
            api_key,
            credentials: None,
        }
    }

    /// APIキーを設定（Noneなら設定ファイルの値を維持）
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if api_key.is_some() {
            self.api_key = api_key;
        }
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// チャットを取得
    ///
    /// # Errors
    /// - チャット無効の通知: `ContextResolution(ChatDisabled)`
    /// - メンバー限定: `ContextResolution(MembersOnly)`
    /// - HTTP/APIエラー: `Api` / `RateLimited` / `Transport`
    pub async fn get_live_chat(
        &self,
        continuation: &str,
        replay: bool,
    ) -> Result<ChatResponse, YouTubeError> {
        let path = if replay {
            GET_LIVE_CHAT_REPLAY_PATH
        } else {
            GET_LIVE_CHAT_PATH
        };

        let mut body = Map::new();
        body.insert("continuation".to_string(), json!(continuation));
        let mut response: InnerTubeChatResponse = self.post(path, body).await?;

        if response.continuation_contents.is_none() {
            return match response.contents_message() {
                Some(message) if message.contains("disabled") => {
                    log::info!("Live chat is disabled for {}: {}", self.video_id, message);
                    Err(YouTubeError::ContextResolution(ContextErrorKind::ChatDisabled))
                }
                Some(message) if message.contains("currently unavailable") => {
                    Err(YouTubeError::ContextResolution(ContextErrorKind::MembersOnly))
                }
                Some(message) => Err(YouTubeError::Api {
                    status: 200,
                    code: "UNKNOWN".to_string(),
                    message,
                }),
                None => {
                    // continuationContentsもcontentsもない: チャット終了
                    log::info!("No continuation contents for {}: chat has ended", self.video_id);
                    Ok(ChatResponse {
                        actions: Vec::new(),
                        continuation: None,
                    })
                }
            };
        }

        let continuation = response.get_next_continuation();
        let actions = parse_actions(response.take_actions());
        log::debug!(
            "Fetched {} actions (next: {:?})",
            actions.len(),
            continuation.as_ref().map(|c| c.kind)
        );

        Ok(ChatResponse {
            actions,
            continuation,
        })
    }

    /// メッセージを送信し、投稿されたアイテムを返す
    ///
    /// # Errors
    /// - 認証情報なし: `AuthRequired`
    /// - BAN/タイムアウト中: `BannedOrTimedOut`
    /// - 権限なし: `PermissionDenied`
    pub async fn send_message(&self, params: &str, text: &str) -> Result<ChatAction, YouTubeError> {
        self.require_credentials()?;

        let mut body = Map::new();
        body.insert("params".to_string(), json!(params));
        body.insert(
            "richMessage".to_string(),
            json!({"textSegments": [{"text": text}]}),
        );
        let response: Value = self.post(SEND_MESSAGE_PATH, body).await.map_err(one_shot_error)?;

        let Some(actions) = response.get("actions").and_then(Value::as_array) else {
            if let Some(usec) = response.get("timeoutDurationUsec") {
                let duration = usec
                    .as_str()
                    .and_then(|s| s.parse::<u64>().ok())
                    .or_else(|| usec.as_u64())
                    .map(Duration::from_micros);
                log::warn!("Message rejected for {}: banned or timed out", self.video_id);
                return Err(YouTubeError::BannedOrTimedOut { duration });
            }
            return Err(YouTubeError::ParseError(
                "send_message response has no actions".to_string(),
            ));
        };

        actions
            .first()
            .and_then(|action| parse_action(action).into_iter().next())
            .ok_or_else(|| {
                YouTubeError::ParseError("send_message response has no chat item".to_string())
            })
    }

    /// メッセージを削除し、サーバーの応答アクションを返す
    pub async fn remove_message(&self, params: &str) -> Result<Vec<ChatAction>, YouTubeError> {
        self.require_credentials()?;

        let mut body = Map::new();
        body.insert("params".to_string(), json!(params));
        let response: Value = self.post(MODERATE_PATH, body).await.map_err(one_shot_error)?;
        ensure_success(&response, "remove request was not accepted")?;

        let actions = parse_actions(
            response
                .get("actions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        );
        if !matches!(actions.first(), Some(ChatAction::MarkChatItemAsDeleted { .. })) {
            return Err(YouTubeError::ParseError(
                "remove response has no deletion action".to_string(),
            ));
        }
        Ok(actions)
    }

    /// ユーザー単位のモデレーション（タイムアウト・非表示・再表示）
    pub async fn moderate(&self, params: &str) -> Result<(), YouTubeError> {
        self.require_credentials()?;

        let mut body = Map::new();
        body.insert("params".to_string(), json!(params));
        let response: Value = self.post(MODERATE_PATH, body).await.map_err(one_shot_error)?;

        ensure_success(&response, "moderation request was not accepted")
    }

    fn require_credentials(&self) -> Result<(), YouTubeError> {
        if self.credentials.is_none() {
            return Err(YouTubeError::AuthRequired);
        }
        Ok(())
    }

    fn endpoint_url(&self, path: &str) -> String {
        match &self.api_key {
            Some(key) => format!("{}{}?key={}&prettyPrint=false", self.config.origin, path, key),
            None => format!("{}{}?prettyPrint=false", self.config.origin, path),
        }
    }

    /// リクエストボディを構築
    fn build_request_body(&self, mut fields: Map<String, Value>) -> Value {
        fields.insert(
            "context".to_string(),
            json!({
                "client": {
                    "clientName": "WEB",
                    "clientVersion": self.config.client_version,
                    "hl": self.config.hl,
                    "gl": self.config.gl
                }
            }),
        );
        Value::Object(fields)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: Map<String, Value>,
    ) -> Result<T, YouTubeError> {
        let request = HttpRequest::post_json(self.endpoint_url(path), self.build_request_body(fields))
            .header("Origin", self.config.origin.as_str())
            .header(
                "Referer",
                format!("{}/watch?v={}", self.config.origin, self.video_id),
            )
            .with_credentials(self.credentials.clone());

        log::debug!("POST {} ({})", path, self.video_id);
        let response = self.transport.send(request).await?;
        check_status(&response)?;

        serde_json::from_str(&response.body)
            .map_err(|e| YouTubeError::ParseError(format!("InnerTube parse error: {}", e)))
    }
}

impl std::fmt::Debug for InnerTubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InnerTubeClient")
            .field("video_id", &self.video_id)
            .field("api_key", &self.api_key.as_deref().map(crate::util::mask_secret))
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// `success: true` でない応答は拒否として扱う
fn ensure_success(response: &Value, message: &str) -> Result<(), YouTubeError> {
    if response.get("success").and_then(Value::as_bool) == Some(true) {
        Ok(())
    } else {
        Err(YouTubeError::PermissionDenied(message.to_string()))
    }
}

/// HTTPステータスとエラー本文をYouTubeErrorに変換
fn check_status(response: &HttpResponse) -> Result<(), YouTubeError> {
    if response.status == 429 {
        return Err(YouTubeError::RateLimited {
            retry_after: response.retry_after,
        });
    }
    if response.is_success() {
        return Ok(());
    }

    let error = match serde_json::from_str::<InnerTubeErrorResponse>(&response.body) {
        Ok(parsed) => YouTubeError::Api {
            status: parsed.error.code,
            code: parsed.error.status,
            message: parsed.error.message,
        },
        Err(_) => YouTubeError::Api {
            status: response.status,
            code: String::new(),
            message: response.body.chars().take(MAX_ERROR_BODY_LENGTH).collect(),
        },
    };
    log::error!("InnerTube API error: {}", error);
    Err(error)
}

/// 送信・削除系のエラーを呼び出し側向けに変換
fn one_shot_error(error: YouTubeError) -> YouTubeError {
    match error {
        YouTubeError::Api { status: 401, .. } => YouTubeError::AuthRequired,
        YouTubeError::Api {
            status: 403,
            message,
            ..
        } => YouTubeError::PermissionDenied(message),
        YouTubeError::Api { code, message, .. } if code == "PERMISSION_DENIED" => {
            YouTubeError::PermissionDenied(message)
        }
        other => other,
    }
}

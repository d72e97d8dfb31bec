//! テスト用のスクリプト化トランスポート・リゾルバー

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::context::{ChatContext, ContextResolver};
use super::errors::YouTubeError;
use super::state::ChatMode;
use super::transport::{Credentials, HttpRequest, HttpResponse, Transport};

enum Scripted {
    Respond(Result<HttpResponse, YouTubeError>),
    /// 応答を返さずに待ち続ける（キャンセル確認用）
    Hang,
}

/// 登録した順に応答を返すトランスポート
///
/// スクリプトが尽きたらフォールバック（未設定ならTransportエラー）を返す。
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Result<HttpResponse, YouTubeError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: Scripted) {
        self.script.lock().unwrap().push_back(entry);
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.push(Scripted::Respond(Ok(response)));
    }

    pub fn push_status(&self, status: u16, body: impl Into<String>) {
        self.push_response(HttpResponse {
            status,
            body: body.into(),
            retry_after: None,
        });
    }

    pub fn push_ok(&self, body: impl Into<String>) {
        self.push_status(200, body);
    }

    pub fn push_json(&self, body: Value) {
        self.push_ok(body.to_string());
    }

    pub fn push_error(&self, error: YouTubeError) {
        self.push(Scripted::Respond(Err(error)));
    }

    pub fn push_hang(&self) {
        self.push(Scripted::Hang);
    }

    /// スクリプトが尽きた後に返し続ける応答
    pub fn set_fallback(&self, result: Result<HttpResponse, YouTubeError>) {
        *self.fallback.lock().unwrap() = Some(result);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, YouTubeError> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Respond(result)) => result,
            Some(Scripted::Hang) => std::future::pending().await,
            None => self
                .fallback
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(YouTubeError::Transport("no scripted response".to_string()))),
        }
    }
}

/// 固定のコンテキストを返すリゾルバー
pub struct StaticResolver {
    result: Result<ChatContext, YouTubeError>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new(result: Result<ChatContext, YouTubeError>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }

    /// continuation付きのライブ配信コンテキスト
    pub fn live(video_id: &str) -> Self {
        Self::new(Ok(ChatContext {
            video_id: video_id.to_string(),
            channel_id: "UCabcdefghijklmnopqrstuv".to_string(),
            title: Some("test stream".to_string()),
            channel_name: Some("tester".to_string()),
            mode: ChatMode::Live,
            is_live: Some(true),
            continuation: Some("initial-token".to_string()),
            api_key: None,
        }))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextResolver for StaticResolver {
    async fn resolve(
        &self,
        _video_id: &str,
        _credentials: Option<&Credentials>,
    ) -> Result<ChatContext, YouTubeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// 指定IDのテキストメッセージを含むチャット応答
pub fn chat_page(ids: &[&str], next: Option<&str>) -> Value {
    let actions: Vec<Value> = ids
        .iter()
        .map(|id| {
            serde_json::json!({"addChatItemAction": {"item": {"liveChatTextMessageRenderer": {
                "id": id,
                "message": {"runs": [{"text": format!("message {}", id)}]}
            }}}})
        })
        .collect();
    let continuations: Vec<Value> = next
        .map(|token| {
            serde_json::json!({"timedContinuationData": {"continuation": token, "timeoutMs": 1000}})
        })
        .into_iter()
        .collect();

    serde_json::json!({
        "continuationContents": {"liveChatContinuation": {
            "actions": actions,
            "continuations": continuations
        }}
    })
}

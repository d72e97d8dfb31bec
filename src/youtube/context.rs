//! チャットコンテキスト解決
//!
//! 動画IDからチャンネルID・タイトル・ライブ/アーカイブ種別・初期continuationを得る。

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

use super::errors::{ContextErrorKind, YouTubeError};
use super::state::ChatMode;
use super::transport::{Credentials, HttpRequest, Transport};
use crate::config::ClientConfig;

/// continuationトークン抽出用の最小長さ
/// 短いトークン（ページネーション以外の用途）を除外するための閾値
const MIN_CONTINUATION_LENGTH: usize = 50;

/// 解決済みのチャットコンテキスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    pub video_id: String,
    pub channel_id: String,
    pub title: Option<String>,
    pub channel_name: Option<String>,
    pub mode: ChatMode,
    /// ライブ配信中か（不明な場合はNone）
    pub is_live: Option<bool>,
    /// 初期continuation（なければクライアント側で生成）
    pub continuation: Option<String>,
    pub api_key: Option<String>,
}

impl ChatContext {
    /// IDのみから作成（ライブ/アーカイブ種別は不明）
    pub fn from_ids(video_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            channel_id: channel_id.into(),
            title: None,
            channel_name: None,
            mode: ChatMode::Live,
            is_live: None,
            continuation: None,
            api_key: None,
        }
    }
}

#[async_trait]
pub trait ContextResolver: Send + Sync {
    /// # Errors
    /// 動画が存在しない・非公開・チャット無効の場合は
    /// `YouTubeError::ContextResolution` を返す
    async fn resolve(
        &self,
        video_id: &str,
        credentials: Option<&Credentials>,
    ) -> Result<ChatContext, YouTubeError>;
}

// 正規表現のシングルトン（OnceLockで初回のみコンパイル）
static CONTINUATION_RE: OnceLock<Regex> = OnceLock::new();
static RELOAD_CONTINUATION_RE: OnceLock<Regex> = OnceLock::new();
static API_KEY_RE: OnceLock<Regex> = OnceLock::new();
static PLAYABILITY_RE: OnceLock<Regex> = OnceLock::new();
static CHANNEL_ID_RE: OnceLock<Regex> = OnceLock::new();
static TITLE_RE: OnceLock<Regex> = OnceLock::new();
static OWNER_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn get_continuation_regex() -> &'static Regex {
    CONTINUATION_RE.get_or_init(|| {
        Regex::new(r#""continuation"\s*:\s*"([^"]+)""#)
            .expect("Failed to compile continuation regex")
    })
}

fn get_reload_continuation_regex() -> &'static Regex {
    RELOAD_CONTINUATION_RE.get_or_init(|| {
        Regex::new(r#""reloadContinuationData"\s*:\s*\{\s*"continuation"\s*:\s*"([^"]+)""#)
            .expect("Failed to compile reloadContinuationData regex")
    })
}

fn get_api_key_regex() -> &'static Regex {
    API_KEY_RE.get_or_init(|| {
        Regex::new(r#""INNERTUBE_API_KEY"\s*:\s*"([^"]+)""#)
            .expect("Failed to compile API key regex")
    })
}

fn get_playability_regex() -> &'static Regex {
    PLAYABILITY_RE.get_or_init(|| {
        Regex::new(r#""playabilityStatus"\s*:\s*\{\s*"status"\s*:\s*"([A-Z_]+)""#)
            .expect("Failed to compile playability regex")
    })
}

fn get_channel_id_regex() -> &'static Regex {
    CHANNEL_ID_RE.get_or_init(|| {
        Regex::new(r#""channelId"\s*:\s*"(UC[\w-]{22})""#)
            .expect("Failed to compile channel id regex")
    })
}

fn get_title_regex() -> &'static Regex {
    TITLE_RE.get_or_init(|| {
        Regex::new(r#""videoDetails"\s*:\s*\{\s*"videoId"\s*:\s*"[^"]+"\s*,\s*"title"\s*:\s*"((?:[^"\\]|\\.)*)""#)
            .expect("Failed to compile title regex")
    })
}

fn get_owner_name_regex() -> &'static Regex {
    OWNER_NAME_RE.get_or_init(|| {
        Regex::new(r#""ownerChannelName"\s*:\s*"((?:[^"\\]|\\.)*)""#)
            .expect("Failed to compile owner name regex")
    })
}

/// 視聴ページから文脈を抽出する標準リゾルバー
pub struct LiveChatPageResolver {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl LiveChatPageResolver {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// ページHTMLからコンテキストを組み立てる
    fn parse_page(&self, video_id: &str, html: &str) -> Result<ChatContext, YouTubeError> {
        check_playability(html)?;

        if html.contains("Chat is disabled for this live stream") {
            return Err(YouTubeError::ContextResolution(ContextErrorKind::ChatDisabled));
        }
        if !html.contains(r#""isLiveContent":true"#) {
            // 通常の動画にはチャットがない
            return Err(YouTubeError::ContextResolution(ContextErrorKind::ChatDisabled));
        }

        let channel_id = capture(get_channel_id_regex(), html).ok_or_else(|| {
            YouTubeError::ParseError(format!("channelId not found in page for {}", video_id))
        })?;

        let mode = if html.contains(r#""isUpcoming":true"#) {
            ChatMode::Upcoming
        } else if html.contains(r#""isLive":true"#) {
            ChatMode::Live
        } else {
            ChatMode::Replay
        };

        Ok(ChatContext {
            video_id: video_id.to_string(),
            channel_id,
            title: capture(get_title_regex(), html).map(|t| unescape_json_string(&t)),
            channel_name: capture(get_owner_name_regex(), html).map(|n| unescape_json_string(&n)),
            mode,
            is_live: Some(mode != ChatMode::Replay),
            continuation: extract_continuation(html),
            api_key: capture(get_api_key_regex(), html),
        })
    }
}

#[async_trait]
impl ContextResolver for LiveChatPageResolver {
    async fn resolve(
        &self,
        video_id: &str,
        credentials: Option<&Credentials>,
    ) -> Result<ChatContext, YouTubeError> {
        let url = format!("{}/watch?v={}", self.config.origin, video_id);
        log::info!("Fetching watch page: {}", url);

        let request = HttpRequest::get(url)
            .header("Accept-Language", self.config.hl.as_str())
            .with_credentials(credentials.cloned());
        let response = self.transport.send(request).await?;

        if response.status == 404 {
            return Err(YouTubeError::ContextResolution(ContextErrorKind::NotFound));
        }
        if !response.is_success() {
            return Err(YouTubeError::Api {
                status: response.status,
                code: String::new(),
                message: "Failed to fetch watch page".to_string(),
            });
        }

        let context = self.parse_page(video_id, &response.body)?;
        log::info!(
            "Resolved chat context: video={} channel={} mode={:?}",
            context.video_id,
            context.channel_id,
            context.mode
        );
        Ok(context)
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// playabilityStatusから再生不可の理由を判定
fn check_playability(html: &str) -> Result<(), YouTubeError> {
    let Some(status) = capture(get_playability_regex(), html) else {
        log::debug!("playabilityStatus not found in page");
        return Ok(());
    };

    let kind = match status.as_str() {
        "ERROR" => ContextErrorKind::NotFound,
        "LOGIN_REQUIRED" => ContextErrorKind::Private,
        "UNPLAYABLE" if html.contains("playerLegacyDesktopYpcOfferRenderer") => {
            ContextErrorKind::MembersOnly
        }
        "UNPLAYABLE" => ContextErrorKind::Unarchived,
        _ => return Ok(()),
    };
    Err(YouTubeError::ContextResolution(kind))
}

/// continuationトークンを抽出
fn extract_continuation(html: &str) -> Option<String> {
    // reloadContinuationDataを優先（チャット欄の初期トークン）
    for re in [get_reload_continuation_regex(), get_continuation_regex()] {
        if let Some(continuation) = capture(re, html) {
            // MIN_CONTINUATION_LENGTH以下の短いトークンを除外
            if continuation.len() > MIN_CONTINUATION_LENGTH {
                log::debug!("Found continuation token (length: {})", continuation.len());
                return Some(continuation);
            }
        }
    }

    log::debug!("No valid continuation token found in page");
    None
}

/// JSON文字列リテラルの中身をデコード（失敗時はそのまま）
fn unescape_json_string(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

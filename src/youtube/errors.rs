use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::protobuf::CodecError;

/// コンテキスト解決の失敗理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextErrorKind {
    /// 動画が存在しない・削除済み
    NotFound,
    /// 非公開
    Private,
    /// チャット無効
    ChatDisabled,
    /// メンバー限定
    MembersOnly,
    /// アーカイブなし
    Unarchived,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum YouTubeError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to resolve chat context: {0:?}")]
    ContextResolution(ContextErrorKind),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Rate limit exceeded - retrying with backoff")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Credentials are required for this operation")]
    AuthRequired,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Live chat has ended")]
    ChatEnded,

    #[error("Live stream has ended")]
    StreamEnded,

    #[error("Banned or placed in timeout")]
    BannedOrTimedOut { duration: Option<Duration> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation aborted")]
    Aborted,
}

/// セッション終了理由
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EndReason {
    /// 配信者がチャットを終了した
    ChatEnded,
    /// 配信終了（アーカイブも末尾まで到達）
    StreamEnded,
    Privated,
    Deleted,
    Disabled,
    MembersOnly,
    Unarchived,
    BannedOrTimedOut,
    CredentialsRejected,
    Invalid,
    /// リトライ上限に到達
    RetriesExhausted { last_error: String },
    /// stop()による停止
    Aborted,
}

impl EndReason {
    /// プール側で再起動を試みてよい終了かどうか
    pub fn is_restartable(&self) -> bool {
        matches!(self, EndReason::RetriesExhausted { .. })
    }
}

impl From<ContextErrorKind> for EndReason {
    fn from(kind: ContextErrorKind) -> Self {
        match kind {
            ContextErrorKind::NotFound => EndReason::Deleted,
            ContextErrorKind::Private => EndReason::Privated,
            ContextErrorKind::ChatDisabled => EndReason::Disabled,
            ContextErrorKind::MembersOnly => EndReason::MembersOnly,
            ContextErrorKind::Unarchived => EndReason::Unarchived,
        }
    }
}

//! エラー分類ポリシー
//!
//! ポーリング中のエラーを「リトライ可能」か「終了」かに振り分ける。
//! セッションに差し替え可能なトレイトとして注入する。

use std::time::Duration;

use super::errors::{EndReason, YouTubeError};

/// エラーの分類結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// バックオフ後にリトライ（サーバー指定の待機時間があれば優先）
    Recoverable { retry_after: Option<Duration> },
    /// セッションを終了
    Terminal(EndReason),
}

pub trait ErrorPolicy: Send + Sync {
    fn classify(&self, error: &YouTubeError) -> ErrorClass;
}

/// 標準のエラー分類
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorPolicy;

impl DefaultErrorPolicy {
    fn classify_api(status: u16, code: &str) -> ErrorClass {
        // APIのステータス文字列を優先し、なければHTTPステータスで判定
        match code {
            "PERMISSION_DENIED" => return ErrorClass::Terminal(EndReason::Privated),
            "NOT_FOUND" => return ErrorClass::Terminal(EndReason::Deleted),
            "INVALID_ARGUMENT" => return ErrorClass::Terminal(EndReason::Invalid),
            "UNAUTHENTICATED" => return ErrorClass::Terminal(EndReason::CredentialsRejected),
            "UNAVAILABLE" | "INTERNAL" | "RESOURCE_EXHAUSTED" => {
                return ErrorClass::Recoverable { retry_after: None }
            }
            _ => {}
        }

        match status {
            400 => ErrorClass::Terminal(EndReason::Invalid),
            401 => ErrorClass::Terminal(EndReason::CredentialsRejected),
            403 => ErrorClass::Terminal(EndReason::Privated),
            404 => ErrorClass::Terminal(EndReason::Deleted),
            429 | 500..=599 => ErrorClass::Recoverable { retry_after: None },
            _ => ErrorClass::Terminal(EndReason::Invalid),
        }
    }
}

impl ErrorPolicy for DefaultErrorPolicy {
    fn classify(&self, error: &YouTubeError) -> ErrorClass {
        match error {
            YouTubeError::Transport(_) | YouTubeError::ParseError(_) => {
                ErrorClass::Recoverable { retry_after: None }
            }
            YouTubeError::RateLimited { retry_after } => ErrorClass::Recoverable {
                retry_after: *retry_after,
            },
            YouTubeError::Api { status, code, .. } => Self::classify_api(*status, code),
            YouTubeError::ContextResolution(kind) => ErrorClass::Terminal((*kind).into()),
            YouTubeError::AuthRequired => ErrorClass::Terminal(EndReason::CredentialsRejected),
            YouTubeError::PermissionDenied(_) => ErrorClass::Terminal(EndReason::Privated),
            YouTubeError::ChatEnded => ErrorClass::Terminal(EndReason::ChatEnded),
            YouTubeError::StreamEnded => ErrorClass::Terminal(EndReason::StreamEnded),
            YouTubeError::BannedOrTimedOut { .. } => {
                ErrorClass::Terminal(EndReason::BannedOrTimedOut)
            }
            YouTubeError::Codec(_)
            | YouTubeError::InvalidArgument(_)
            | YouTubeError::Config(_) => ErrorClass::Terminal(EndReason::Invalid),
            YouTubeError::Aborted => ErrorClass::Terminal(EndReason::Aborted),
        }
    }
}

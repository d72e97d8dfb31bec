// =============================================================================
// 共通設定・定数モジュール
// =============================================================================
// クライアント全体で使用する設定値・定数を定義
// =============================================================================

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::youtube::errors::YouTubeError;

/// HTTPリクエストのデフォルトタイムアウト（秒）
///
/// コンテキスト解決・ポーリング・送信のすべてのリクエストで使用。
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// プラットフォームのオリジン
pub const DEFAULT_ORIGIN: &str = "https://www.youtube.com";

/// InnerTube APIクライアントバージョン
pub const DEFAULT_CLIENT_VERSION: &str = "2.20240101.00.00";

/// リクエストに付与するUser-Agent
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTPリクエストのデフォルトタイムアウト（Duration）
pub fn http_timeout() -> Duration {
    Duration::from_secs(HTTP_TIMEOUT_SECS)
}

/// リトライ設定（ポーリング失敗時のバックオフ）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 連続失敗の上限（これを超えると終了扱い）
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            max_attempts: 10,
        }
    }
}

/// ポーリング間隔の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollConfig {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    /// アーカイブ再生時のポーリング間隔
    pub replay_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            max_interval_ms: 30_000,
            replay_interval_ms: 500,
        }
    }
}

impl PollConfig {
    /// サーバー指定の待機時間を範囲内に収める
    pub fn clamp(&self, suggested: Duration) -> Duration {
        let min = Duration::from_millis(self.min_interval_ms);
        let max = Duration::from_millis(self.max_interval_ms.max(self.min_interval_ms));
        suggested.clamp(min, max)
    }
}

/// APIクライアント設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub origin: String,
    pub client_version: String,
    pub hl: String,
    pub gl: String,
    /// ページから取得できなかった場合に使うAPIキー
    pub api_key: Option<String>,
    pub retry: RetryConfig,
    pub poll: PollConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
            hl: "en".to_string(),
            gl: "US".to_string(),
            api_key: None,
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl ClientConfig {
    /// JSON文字列から設定を読み込む（省略項目はデフォルト値）
    pub fn from_json_str(json: &str) -> Result<Self, YouTubeError> {
        serde_json::from_str(json).map_err(|e| YouTubeError::Config(e.to_string()))
    }

    /// JSONファイルから設定を読み込む
    pub fn load(path: impl AsRef<Path>) -> Result<Self, YouTubeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            YouTubeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json_str(&content)?;
        log::info!("Loaded client config from {}", path.display());
        Ok(config)
    }
}

/// プール（複数セッション管理）の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// 再起動可能な終了に対する再起動回数の上限
    pub max_restarts: u32,
    pub restart_base_delay_ms: u64,
    pub restart_max_delay_ms: u64,
    /// ensureループの実行間隔
    pub ensure_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_base_delay_ms: 5000,
            restart_max_delay_ms: 60_000,
            ensure_interval_ms: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn ensure_interval(&self) -> Duration {
        Duration::from_millis(self.ensure_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_http_timeout_duration() {
        assert_eq!(http_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.origin, "https://www.youtube.com");
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.poll.min_interval_ms, 500);
        assert_eq!(PoolConfig::default().max_restarts, 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            ClientConfig::from_json_str(r#"{"hl":"ja","retry":{"maxAttempts":3}}"#).unwrap();
        assert_eq!(config.hl, "ja");
        assert_eq!(config.gl, "US");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_invalid_json() {
        let result = ClientConfig::from_json_str("{not json");
        assert!(matches!(result, Err(YouTubeError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"apiKey":"AIzaTest","poll":{{"maxIntervalMs":10000}}}}"#).unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("AIzaTest"));
        assert_eq!(config.poll.max_interval_ms, 10_000);
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load("/nonexistent/ytlivechat.json");
        assert!(matches!(result, Err(YouTubeError::Config(_))));
    }

    #[test]
    fn test_poll_clamp() {
        let poll = PollConfig::default();
        assert_eq!(poll.clamp(Duration::from_millis(10)), Duration::from_millis(500));
        assert_eq!(poll.clamp(Duration::from_secs(60)), Duration::from_secs(30));
        assert_eq!(poll.clamp(Duration::from_secs(5)), Duration::from_secs(5));
    }
}

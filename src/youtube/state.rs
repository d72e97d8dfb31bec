use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use super::context::ChatContext;
use super::errors::EndReason;

/// チャットモード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatMode {
    Live,
    Replay,
    /// 配信開始前（待機所）
    Upcoming,
}

/// セッションのライフサイクル
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum SessionPhase {
    Uninitialized,
    Resolving,
    Polling,
    Stopping,
    Stopped,
    Errored { reason: EndReason },
}

impl SessionPhase {
    /// これ以上イベントを発行しない状態か
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionPhase::Stopped | SessionPhase::Errored { .. })
    }
}

/// 1配信分のセッション状態
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub video_id: String,
    pub channel_id: Option<String>,
    pub title: Option<String>,
    pub channel_name: Option<String>,
    pub mode: Option<ChatMode>,
    /// 現在のcontinuationトークン（ポーリング成功ごとに更新）
    pub continuation: Option<String>,
    pub consecutive_errors: u32,
    pub last_activity: Option<DateTime<Utc>>,
    /// ライブ配信中か（不明な場合はNone）
    pub is_live: Option<bool>,
    pub phase: SessionPhase,
    pub poll_count: u64,
}

impl SessionState {
    pub fn new(video_id: String) -> Self {
        Self {
            video_id,
            channel_id: None,
            title: None,
            channel_name: None,
            mode: None,
            continuation: None,
            consecutive_errors: 0,
            last_activity: None,
            is_live: None,
            phase: SessionPhase::Uninitialized,
            poll_count: 0,
        }
    }

    /// 解決済みコンテキストを反映
    pub fn apply_context(&mut self, context: &ChatContext) {
        self.channel_id = Some(context.channel_id.clone());
        self.title = context.title.clone();
        self.channel_name = context.channel_name.clone();
        self.mode = Some(context.mode);
        self.is_live = context.is_live;
        if self.continuation.is_none() {
            self.continuation = context.continuation.clone();
        }
    }

    /// ポーリング成功後に呼び出す
    pub fn record_success(&mut self, continuation: Option<String>) {
        self.continuation = continuation;
        self.consecutive_errors = 0;
        self.poll_count += 1;
        self.last_activity = Some(Utc::now());
    }

    pub fn record_error(&mut self) -> u32 {
        self.consecutive_errors += 1;
        self.consecutive_errors
    }
}

/// スレッドセーフなセッション状態ハンドル
///
/// 書き込みはセッション自身のポーリングループと stop() のみが行う。
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<SessionState>>,
}

impl SharedState {
    pub fn new(video_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState::new(video_id))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // ロック保持中にパニックしても状態自体は壊れないため、そのまま使う
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 現在の状態のスナップショット
    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase.clone()
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.lock().phase = phase;
    }

    /// 終了状態でなければフェーズを更新（更新できたらtrue）
    pub fn transition_unless_finished(&self, phase: SessionPhase) -> bool {
        let mut state = self.lock();
        if state.phase.is_finished() {
            return false;
        }
        state.phase = phase;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ChatContext {
        ChatContext {
            video_id: "vid".to_string(),
            channel_id: "UCxyz".to_string(),
            title: Some("title".to_string()),
            channel_name: Some("channel".to_string()),
            mode: ChatMode::Live,
            is_live: Some(true),
            continuation: Some("token-1".to_string()),
            api_key: None,
        }
    }

    #[test]
    fn test_session_state_creation() {
        let state = SessionState::new("vid".to_string());
        assert_eq!(state.phase, SessionPhase::Uninitialized);
        assert_eq!(state.continuation, None);
        assert_eq!(state.consecutive_errors, 0);
    }

    #[test]
    fn test_apply_context_keeps_resume_token() {
        let mut state = SessionState::new("vid".to_string());
        state.continuation = Some("resume".to_string());
        state.apply_context(&context());

        assert_eq!(state.channel_id.as_deref(), Some("UCxyz"));
        assert_eq!(state.continuation.as_deref(), Some("resume"));
        assert_eq!(state.mode, Some(ChatMode::Live));
    }

    #[test]
    fn test_record_success_resets_errors() {
        let mut state = SessionState::new("vid".to_string());
        state.record_error();
        state.record_error();
        assert_eq!(state.consecutive_errors, 2);

        state.record_success(Some("next".to_string()));
        assert_eq!(state.consecutive_errors, 0);
        assert_eq!(state.poll_count, 1);
        assert!(state.last_activity.is_some());
    }

    #[test]
    fn test_transition_unless_finished() {
        let shared = SharedState::new("vid".to_string());
        assert!(shared.transition_unless_finished(SessionPhase::Polling));
        shared.set_phase(SessionPhase::Stopped);
        assert!(!shared.transition_unless_finished(SessionPhase::Polling));
        assert_eq!(shared.phase(), SessionPhase::Stopped);
    }
}

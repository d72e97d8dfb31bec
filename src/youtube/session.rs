//! ライブチャットセッション
//!
//! 1配信分のチャットを取得し続けるポーリングエンジン。
//!
//! ## ライフサイクル
//! `Uninitialized → Resolving → Polling → (Stopping → Stopped) | Errored`
//!
//! ## イベント配信
//! `listen()` が返すチャネルに以下の順で配信する:
//! 1. 取得したアクションを1件ずつ `Chat`
//! 2. 同じ取得分をまとめて `Chats`（0件でも送る）
//! 3. リトライ時は `Error`、終了時は `End` を1回だけ

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::backoff::ExponentialBackoff;
use super::context::{ChatContext, ContextResolver};
use super::errors::{ContextErrorKind, EndReason, YouTubeError};
use super::innertube::{ChatResponse, InnerTubeClient};
use super::policy::{DefaultErrorPolicy, ErrorClass, ErrorPolicy};
use super::state::{ChatMode, SessionPhase, SessionState, SharedState};
use super::transport::{Credentials, Transport};
use super::types::ChatAction;
use crate::config::{ClientConfig, PollConfig, RetryConfig};
use crate::protobuf::params::{self, ChatTarget, ModerationOp};
use crate::protobuf::{B64Variant, ChatOrder, ContinuationToken};

/// ポーリング戦略（エンドポイントと待機時間の決め方）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStrategy {
    Live,
    Replay,
    Upcoming,
}

impl PollStrategy {
    fn from_mode(mode: ChatMode) -> Self {
        match mode {
            ChatMode::Live => PollStrategy::Live,
            ChatMode::Replay => PollStrategy::Replay,
            ChatMode::Upcoming => PollStrategy::Upcoming,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, PollStrategy::Replay)
    }
}

/// セッション設定
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// トップチャットのみ取得する
    pub top_chat: bool,
    pub credentials: Option<Credentials>,
    /// 既知のチャンネルID（指定時はコンテキスト解決を省略）
    pub channel_id: Option<String>,
    /// 再開用のcontinuation
    pub continuation: Option<String>,
    /// 最初の取得結果を配信しない（再開時の重複防止）
    pub ignore_first_response: bool,
    pub config: ClientConfig,
}

/// セッションイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// 単一のアクション
    Chat { action: ChatAction },
    /// 1回の取得分のアクション
    Chats { actions: Vec<ChatAction> },
    /// リトライ可能なエラー（自動再試行する）
    Error { message: String, retry_in_ms: u64 },
    /// セッション終了
    End { reason: EndReason },
}

/// イベント送信口
///
/// `End` は1つのlistenにつき1回だけ送られ、それ以降は何も送らない。
#[derive(Clone)]
struct EventSink {
    tx: UnboundedSender<SessionEvent>,
    ended: Arc<AtomicBool>,
}

impl EventSink {
    fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self {
            tx,
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.ended.load(Ordering::SeqCst) {
            return;
        }
        if self.tx.send(event).is_err() {
            log::debug!("Session event receiver dropped");
        }
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// 終了イベントを送信（初回のみtrue）
    fn end(&self, reason: EndReason) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(SessionEvent::End { reason });
        true
    }
}

/// 1配信分のチャットセッション
pub struct ChatSession {
    video_id: String,
    options: SessionOptions,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn ContextResolver>,
    policy: Arc<dyn ErrorPolicy>,
    state: SharedState,
    context: Mutex<Option<ChatContext>>,
    /// 実行中フラグ
    running: Arc<AtomicBool>,
    /// ポーリングタスクハンドル
    task_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    sink: Mutex<Option<EventSink>>,
}

impl ChatSession {
    pub fn new(
        video_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn ContextResolver>,
        options: SessionOptions,
    ) -> Self {
        let video_id = video_id.into();
        let state = SharedState::new(video_id.clone());
        if let Some(continuation) = &options.continuation {
            state.update(|s| s.continuation = Some(continuation.clone()));
        }

        Self {
            video_id,
            options,
            transport,
            resolver,
            policy: Arc::new(DefaultErrorPolicy),
            state,
            context: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            task_handle: tokio::sync::Mutex::new(None),
            sink: Mutex::new(None),
        }
    }

    /// エラー分類ポリシーを差し替える
    pub fn with_policy(mut self, policy: Arc<dyn ErrorPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// 現在の状態のスナップショット
    pub fn state(&self) -> SessionState {
        self.state.snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// ポーリング中かどうか
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn cached_context(&self) -> Option<ChatContext> {
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// チャットコンテキストを解決する
    ///
    /// 解決済みの場合はキャッシュを返す。
    ///
    /// # Errors
    /// 動画が存在しない・非公開・チャット無効の場合は
    /// `ContextResolution` を返し、セッションは `Errored` になる（再試行しない）
    pub async fn initialize(&self) -> Result<ChatContext, YouTubeError> {
        if let Some(context) = self.cached_context() {
            return Ok(context);
        }

        self.state.set_phase(SessionPhase::Resolving);
        let resolved = match &self.options.channel_id {
            Some(channel_id) => Ok(ChatContext::from_ids(self.video_id.clone(), channel_id.clone())),
            None => {
                self.resolver
                    .resolve(&self.video_id, self.options.credentials.as_ref())
                    .await
            }
        };

        let context = match resolved {
            Ok(context) => context,
            Err(e) => {
                let phase = match self.policy.classify(&e) {
                    ErrorClass::Terminal(reason) => SessionPhase::Errored { reason },
                    ErrorClass::Recoverable { .. } => SessionPhase::Uninitialized,
                };
                log::error!("Failed to initialize session {}: {}", self.video_id, e);
                self.state.set_phase(phase);
                return Err(e);
            }
        };

        self.state.update(|s| s.apply_context(&context));
        self.state.set_phase(SessionPhase::Polling);
        *self
            .context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(context.clone());

        log::info!(
            "Session initialized: video={} channel={} mode={:?}",
            self.video_id,
            context.channel_id,
            context.mode
        );
        Ok(context)
    }

    fn client(&self, context: &ChatContext) -> InnerTubeClient {
        InnerTubeClient::new(
            self.transport.clone(),
            self.options.config.clone(),
            self.video_id.clone(),
        )
        .with_api_key(context.api_key.clone())
        .with_credentials(self.options.credentials.clone())
    }

    /// ポーリングを開始し、イベント受信チャネルを返す
    ///
    /// 終了後に再度呼び出すと、最後のcontinuationから再開する。
    ///
    /// # Errors
    /// コンテキスト解決に失敗した場合、またはすでにポーリング中の場合
    pub async fn listen(&self) -> Result<UnboundedReceiver<SessionEvent>, YouTubeError> {
        let context = self.initialize().await?;

        let mut task_handle = self.task_handle.lock().await;
        if let Some(handle) = task_handle.as_mut() {
            if !handle.is_finished() {
                let ending = self
                    .sink
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .as_ref()
                    .is_some_and(EventSink::is_ended);
                if !ending {
                    return Err(YouTubeError::InvalidArgument(format!(
                        "session {} is already listening",
                        self.video_id
                    )));
                }
                // 終了イベント送信済みのタスクは完了を待ってから再開する
                let _ = handle.await;
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        *self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sink.clone());

        self.state.set_phase(SessionPhase::Polling);
        self.running.store(true, Ordering::SeqCst);

        let poll_loop = PollLoop {
            target: ChatTarget::new(self.video_id.clone(), context.channel_id.clone()),
            client: self.client(&context),
            strategy: PollStrategy::from_mode(context.mode),
            fallback_to_replay: context.is_live.is_none(),
            order: ChatOrder::from_top(self.options.top_chat),
            top_chat: self.options.top_chat,
            ignore_first_response: self.options.ignore_first_response,
            poll: self.options.config.poll.clone(),
            retry: self.options.config.retry.clone(),
            policy: self.policy.clone(),
            state: self.state.clone(),
            sink,
            running: self.running.clone(),
        };
        *task_handle = Some(tokio::spawn(poll_loop.run()));

        log::info!("Polling started for {}", self.video_id);
        Ok(rx)
    }

    /// アクションを順に返す非同期ストリーム
    ///
    /// 最初にpollされた時点でポーリングを開始する。終了理由を `Err` で返して終わる。
    /// 開始に失敗した場合もその理由を `Err` で返す。
    pub fn stream(&self) -> impl Stream<Item = Result<ChatAction, EndReason>> + '_ {
        enum Cursor {
            Pending,
            Running(UnboundedReceiver<SessionEvent>),
            Done,
        }

        stream::unfold(Cursor::Pending, move |cursor| async move {
            let mut rx = match cursor {
                Cursor::Done => return None,
                Cursor::Running(rx) => rx,
                Cursor::Pending => match self.listen().await {
                    Ok(rx) => rx,
                    Err(e) => {
                        let reason = match self.policy.classify(&e) {
                            ErrorClass::Terminal(reason) => reason,
                            ErrorClass::Recoverable { .. } => EndReason::RetriesExhausted {
                                last_error: e.to_string(),
                            },
                        };
                        return Some((Err(reason), Cursor::Done));
                    }
                },
            };

            loop {
                match rx.recv().await? {
                    SessionEvent::Chat { action } => return Some((Ok(action), Cursor::Running(rx))),
                    SessionEvent::End { reason } => return Some((Err(reason), Cursor::Done)),
                    SessionEvent::Chats { .. } | SessionEvent::Error { .. } => continue,
                }
            }
        })
    }

    /// ポーリングを停止
    ///
    /// この関数は冪等であり、複数回呼び出しても安全です。
    /// 停止後はイベントを一切送信しない。
    pub async fn stop(&self) {
        let handle = self.task_handle.lock().await.take();
        let Some(handle) = handle else {
            self.state.transition_unless_finished(SessionPhase::Stopped);
            log::debug!("Session {} already stopped", self.video_id);
            return;
        };

        let stopping = self.state.transition_unless_finished(SessionPhase::Stopping);
        self.running.store(false, Ordering::SeqCst);
        handle.abort();
        let _ = handle.await;

        let sink = self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if stopping {
            if let Some(sink) = sink {
                sink.end(EndReason::Aborted);
            }
            self.state.transition_unless_finished(SessionPhase::Stopped);
        }

        log::info!("Polling stopped for {}", self.video_id);
    }

    fn target(context: &ChatContext) -> ChatTarget {
        ChatTarget::new(context.video_id.clone(), context.channel_id.clone())
    }

    fn require_credentials(&self) -> Result<(), YouTubeError> {
        if self.options.credentials.is_none() {
            return Err(YouTubeError::AuthRequired);
        }
        Ok(())
    }

    /// メッセージを送信
    ///
    /// # Errors
    /// `AuthRequired` / `PermissionDenied` / `BannedOrTimedOut` / `Transport`。
    /// ポーリングの状態には影響しない。
    pub async fn send_message(&self, text: &str) -> Result<ChatAction, YouTubeError> {
        self.require_credentials()?;
        let context = self.initialize().await?;
        let params = params::send_message_params(&Self::target(&context));
        self.client(&context).send_message(&params, text).await
    }

    /// メッセージを削除
    pub async fn remove(&self, chat_id: &str) -> Result<Vec<ChatAction>, YouTubeError> {
        self.require_credentials()?;
        let context = self.initialize().await?;
        let params = params::remove_message_params(chat_id, &Self::target(&context));
        self.client(&context).remove_message(&params).await
    }

    /// ユーザーをタイムアウト
    pub async fn timeout(&self, channel_id: &str) -> Result<(), YouTubeError> {
        self.moderate(ModerationOp::Timeout, channel_id).await
    }

    /// ユーザーを非表示
    pub async fn hide(&self, channel_id: &str) -> Result<(), YouTubeError> {
        self.moderate(ModerationOp::Hide, channel_id).await
    }

    /// 非表示を解除
    pub async fn unhide(&self, channel_id: &str) -> Result<(), YouTubeError> {
        self.moderate(ModerationOp::Unhide, channel_id).await
    }

    async fn moderate(&self, op: ModerationOp, channel_id: &str) -> Result<(), YouTubeError> {
        self.require_credentials()?;
        let context = self.initialize().await?;
        let params = params::moderation_params(op, channel_id, &Self::target(&context));
        log::info!("Moderation {:?} on {} in {}", op, channel_id, self.video_id);
        self.client(&context).moderate(&params).await
    }
}

impl Drop for ChatSession {
    /// ドロップ時にタスクを確実に停止する
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task_handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("video_id", &self.video_id)
            .field("phase", &self.state.phase())
            .field("running", &self.is_running())
            .finish()
    }
}

/// ポーリングタスク本体
struct PollLoop {
    target: ChatTarget,
    client: InnerTubeClient,
    strategy: PollStrategy,
    /// ライブ/アーカイブ不明時、チャット無効ならアーカイブに切り替える
    fallback_to_replay: bool,
    order: ChatOrder,
    top_chat: bool,
    ignore_first_response: bool,
    poll: PollConfig,
    retry: RetryConfig,
    policy: Arc<dyn ErrorPolicy>,
    state: SharedState,
    sink: EventSink,
    running: Arc<AtomicBool>,
}

impl PollLoop {
    async fn run(mut self) {
        let reason = self.poll_until_end().await;
        self.running.store(false, Ordering::SeqCst);

        match &reason {
            EndReason::ChatEnded | EndReason::StreamEnded => {
                log::info!("Chat finished for {}: {:?}", self.target.video_id, reason)
            }
            _ => log::error!("Session {} ended: {:?}", self.target.video_id, reason),
        }

        if self.sink.end(reason.clone()) {
            self.state
                .transition_unless_finished(SessionPhase::Errored { reason });
        }
    }

    /// 初回のcontinuationを決める
    ///
    /// 戻り値の2つ目は自前で生成したトークンかどうか。
    fn initial_continuation(&self) -> (String, bool) {
        match self.state.snapshot().continuation {
            Some(token) => (self.apply_chat_order(token), false),
            None => (self.generate_continuation(), true),
        }
    }

    fn generate_continuation(&self) -> String {
        if self.strategy.is_replay() {
            let now_usec = chrono::Utc::now().timestamp_micros().max(0) as u64;
            params::replay_timed_continuation(&self.target, self.order, 0, now_usec)
        } else {
            params::live_reload_continuation(&self.target, self.order)
        }
    }

    /// トップチャット指定がトークンと異なる場合は書き換える
    fn apply_chat_order(&self, token: String) -> String {
        match ContinuationToken::parse(&token, B64Variant::UrlEncoded) {
            Ok(parsed) if parsed.chat_order().is_some() && parsed.chat_order() != Some(self.order) => {
                log::debug!("Rewriting continuation chat order (top_chat={})", self.top_chat);
                parsed.with_chat_order(self.order).encode()
            }
            Ok(_) => token,
            Err(e) => {
                log::debug!("Continuation is not decodable, using as is: {}", e);
                token
            }
        }
    }

    async fn poll_until_end(&mut self) -> EndReason {
        let (mut continuation, mut generated) = self.initial_continuation();
        let mut backoff = ExponentialBackoff::from_config(&self.retry);
        let mut skip_response = self.ignore_first_response;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return EndReason::Aborted;
            }

            let started = Instant::now();
            let result = self
                .client
                .get_live_chat(&continuation, self.strategy.is_replay())
                .await;

            let error = match result {
                Ok(ChatResponse {
                    actions,
                    continuation: next,
                }) => {
                    backoff.reset();
                    if skip_response {
                        log::debug!("Ignoring first response ({} actions)", actions.len());
                        skip_response = false;
                    } else {
                        self.deliver(actions);
                    }

                    let Some(next) = next else {
                        return if self.strategy.is_replay() {
                            EndReason::StreamEnded
                        } else {
                            EndReason::ChatEnded
                        };
                    };

                    self.state
                        .update(|s| s.record_success(Some(next.token.clone())));
                    continuation = next.token;
                    generated = false;

                    let delay = self.next_delay(next.timeout_ms, started.elapsed());
                    log::debug!("Next poll in {:?} ({:?})", delay, next.kind);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(error) => error,
            };

            if error == YouTubeError::ContextResolution(ContextErrorKind::ChatDisabled)
                && self.fallback_to_replay
                && !self.strategy.is_replay()
            {
                log::info!("Switching {} to replay endpoint", self.target.video_id);
                self.fallback_to_replay = false;
                self.strategy = PollStrategy::Replay;
                self.state.update(|s| {
                    s.mode = Some(ChatMode::Replay);
                    s.is_live = Some(false);
                });
                if generated {
                    continuation = self.generate_continuation();
                }
                continue;
            }

            match self.policy.classify(&error) {
                ErrorClass::Terminal(reason) => return reason,
                ErrorClass::Recoverable { retry_after } => {
                    let errors = self.state.update(|s| s.record_error());
                    if backoff.has_exceeded_max_attempts() {
                        return EndReason::RetriesExhausted {
                            last_error: error.to_string(),
                        };
                    }

                    let mut delay = backoff.next_delay();
                    if let Some(retry_after) = retry_after {
                        delay = delay.max(retry_after);
                    }
                    log::warn!(
                        "Poll failed for {} ({} consecutive): {}. Retrying in {:?}",
                        self.target.video_id,
                        errors,
                        error,
                        delay
                    );
                    self.sink.emit(SessionEvent::Error {
                        message: error.to_string(),
                        retry_in_ms: delay.as_millis() as u64,
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 取得したアクションを配信（個別 → まとめて）
    fn deliver(&self, actions: Vec<ChatAction>) {
        log::debug!("Delivering {} actions for {}", actions.len(), self.target.video_id);
        for action in &actions {
            self.sink.emit(SessionEvent::Chat {
                action: action.clone(),
            });
        }
        self.sink.emit(SessionEvent::Chats { actions });
    }

    /// 次回ポーリングまでの待機時間
    ///
    /// サーバー指定値からリクエストにかかった時間を差し引き、設定範囲に収める。
    fn next_delay(&self, timeout_ms: Option<u64>, elapsed: Duration) -> Duration {
        let suggested = match timeout_ms {
            Some(ms) => Duration::from_millis(ms).saturating_sub(elapsed),
            None if self.strategy.is_replay() => Duration::from_millis(self.poll.replay_interval_ms),
            None => Duration::from_millis(self.poll.min_interval_ms),
        };
        self.poll.clamp(suggested)
    }
}

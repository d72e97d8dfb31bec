//! 複数セッションの管理
//!
//! 動画IDごとに `ChatSession` を起動し、各セッションのイベントを
//! 動画IDを付けて1本のチャネルに集約する。
//!
//! - あるセッションの終了・エラーは他のセッションに影響しない
//! - 再起動可能な終了（リトライ上限到達）は `ensure()` で回数制限付きで再起動する
//! - 購読テーブルの更新はすべて1つのMutex越しに行う

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::backoff::ExponentialBackoff;
use super::context::ContextResolver;
use super::errors::{EndReason, YouTubeError};
use super::session::{ChatSession, SessionEvent, SessionOptions};
use super::transport::Transport;
use super::types::ChatAction;
use crate::config::PoolConfig;

/// プールが配信するイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PoolEvent {
    Chats {
        video_id: String,
        actions: Vec<ChatAction>,
    },
    End {
        video_id: String,
        reason: EndReason,
    },
    Error {
        video_id: String,
        message: String,
    },
}

impl PoolEvent {
    pub fn video_id(&self) -> &str {
        match self {
            PoolEvent::Chats { video_id, .. }
            | PoolEvent::End { video_id, .. }
            | PoolEvent::Error { video_id, .. } => video_id,
        }
    }
}

/// 購読状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionStatus {
    Starting,
    Active,
    /// unsubscribe中
    Stopping,
    /// ensure()による再起動待ち
    PendingRestart,
}

struct SubscriptionEntry {
    channel_id: String,
    session: Arc<ChatSession>,
    status: SubscriptionStatus,
    restart_count: u32,
    restart_backoff: ExponentialBackoff,
    next_restart_at: Option<Instant>,
    /// 古いセッションからの終了通知を無視するための世代番号
    generation: u64,
}

struct PoolInner {
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn ContextResolver>,
    options: SessionOptions,
    config: PoolConfig,
    entries: Mutex<HashMap<String, SubscriptionEntry>>,
    events: UnboundedSender<PoolEvent>,
    next_generation: AtomicU64,
    emptied: Notify,
}

impl PoolInner {
    fn emit(&self, event: PoolEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Pool event receiver dropped");
        }
    }

    fn generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    fn remove_entry(&self, entries: &mut HashMap<String, SubscriptionEntry>, video_id: &str) {
        entries.remove(video_id);
        if entries.is_empty() {
            self.emptied.notify_waiters();
        }
    }

    /// セッション終了時の処理（再起動待ちにするか削除するか）
    async fn on_session_end(&self, video_id: &str, generation: u64, reason: EndReason) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(video_id) else {
            return;
        };
        if entry.generation != generation || entry.status == SubscriptionStatus::Stopping {
            log::debug!("Ignoring end of {} ({:?}): superseded", video_id, reason);
            return;
        }

        if reason.is_restartable() && entry.restart_count < self.config.max_restarts {
            entry.restart_count += 1;
            let delay = entry.restart_backoff.next_delay();
            entry.status = SubscriptionStatus::PendingRestart;
            entry.next_restart_at = Some(Instant::now() + delay);
            log::warn!(
                "Session {} ended ({:?}); restart {}/{} in {:?}",
                video_id,
                reason,
                entry.restart_count,
                self.config.max_restarts,
                delay
            );
            self.emit(PoolEvent::Error {
                video_id: video_id.to_string(),
                message: format!("session ended, restarting in {}ms", delay.as_millis()),
            });
            return;
        }

        log::info!("Subscription {} removed: {:?}", video_id, reason);
        self.remove_entry(&mut entries, video_id);
        drop(entries);
        self.emit(PoolEvent::End {
            video_id: video_id.to_string(),
            reason,
        });
    }
}

/// セッションイベントをプールイベントに変換して転送する
async fn forward_events(
    inner: Arc<PoolInner>,
    video_id: String,
    generation: u64,
    mut rx: UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Chat { .. } => {}
            SessionEvent::Chats { actions } => inner.emit(PoolEvent::Chats {
                video_id: video_id.clone(),
                actions,
            }),
            SessionEvent::Error { message, .. } => inner.emit(PoolEvent::Error {
                video_id: video_id.clone(),
                message,
            }),
            SessionEvent::End { reason } => {
                inner.on_session_end(&video_id, generation, reason).await;
                return;
            }
        }
    }
}

/// 複数配信のチャットセッションを束ねるプール
#[derive(Clone)]
pub struct ChatPool {
    inner: Arc<PoolInner>,
}

impl ChatPool {
    /// プールとイベント受信チャネルを作成
    ///
    /// `options` は各セッションのテンプレート（`channel_id` は購読時に上書きされる）。
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn ContextResolver>,
        options: SessionOptions,
        config: PoolConfig,
    ) -> (Self, UnboundedReceiver<PoolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = PoolInner {
            transport,
            resolver,
            options,
            config,
            entries: Mutex::new(HashMap::new()),
            events: tx,
            next_generation: AtomicU64::new(1),
            emptied: Notify::new(),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    fn restart_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::with_config(
            Duration::from_millis(self.inner.config.restart_base_delay_ms),
            Duration::from_millis(self.inner.config.restart_max_delay_ms),
            self.inner.config.max_restarts,
        )
    }

    /// 購読を開始
    ///
    /// 同じ動画IDがすでに購読中なら何もしない。
    ///
    /// # Errors
    /// セッションの開始に失敗した場合（購読は登録されない）
    pub async fn subscribe(
        &self,
        video_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Result<(), YouTubeError> {
        let video_id = video_id.into();
        let channel_id = channel_id.into();

        let mut entries = self.inner.entries.lock().await;
        if entries.contains_key(&video_id) {
            log::debug!("Already subscribed to {}", video_id);
            return Ok(());
        }

        let options = SessionOptions {
            channel_id: Some(channel_id.clone()),
            ..self.inner.options.clone()
        };
        let session = Arc::new(ChatSession::new(
            video_id.clone(),
            self.inner.transport.clone(),
            self.inner.resolver.clone(),
            options,
        ));
        let generation = self.inner.generation();
        entries.insert(
            video_id.clone(),
            SubscriptionEntry {
                channel_id,
                session: session.clone(),
                status: SubscriptionStatus::Starting,
                restart_count: 0,
                restart_backoff: self.restart_backoff(),
                next_restart_at: None,
                generation,
            },
        );

        match session.listen().await {
            Ok(rx) => {
                if let Some(entry) = entries.get_mut(&video_id) {
                    entry.status = SubscriptionStatus::Active;
                }
                tokio::spawn(forward_events(
                    self.inner.clone(),
                    video_id.clone(),
                    generation,
                    rx,
                ));
                log::info!("Subscribed to {}", video_id);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to subscribe to {}: {}", video_id, e);
                self.inner.remove_entry(&mut entries, &video_id);
                Err(e)
            }
        }
    }

    /// 購読を解除（セッション停止後にエントリを削除）
    ///
    /// 購読していなかった場合は `false` を返す。
    pub async fn unsubscribe(&self, video_id: &str) -> bool {
        let (session, generation) = {
            let mut entries = self.inner.entries.lock().await;
            let Some(entry) = entries.get_mut(video_id) else {
                return false;
            };
            if entry.status == SubscriptionStatus::Stopping {
                return true;
            }
            entry.status = SubscriptionStatus::Stopping;
            (entry.session.clone(), entry.generation)
        };

        session.stop().await;

        let mut entries = self.inner.entries.lock().await;
        if entries
            .get(video_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            self.inner.remove_entry(&mut entries, video_id);
            drop(entries);
            self.inner.emit(PoolEvent::End {
                video_id: video_id.to_string(),
                reason: EndReason::Aborted,
            });
            log::info!("Unsubscribed from {}", video_id);
        }
        true
    }

    /// 再起動待ちの購読を再起動する
    ///
    /// 待機時間を過ぎたものだけが対象。再起動した件数を返す。
    /// 再起動に失敗しても他の購読には影響せず、イベントとして通知する。
    pub async fn ensure(&self) -> usize {
        let now = Instant::now();
        let mut restarted = 0;
        let mut ended = Vec::new();
        let mut entries = self.inner.entries.lock().await;

        for (video_id, entry) in entries.iter_mut() {
            if entry.status != SubscriptionStatus::PendingRestart
                || entry.next_restart_at.is_some_and(|at| at > now)
            {
                continue;
            }

            let generation = self.inner.generation();
            entry.generation = generation;
            entry.next_restart_at = None;

            match entry.session.listen().await {
                Ok(rx) => {
                    entry.status = SubscriptionStatus::Active;
                    tokio::spawn(forward_events(
                        self.inner.clone(),
                        video_id.clone(),
                        generation,
                        rx,
                    ));
                    restarted += 1;
                    log::info!("Restarted session {} ({} restarts)", video_id, entry.restart_count);
                }
                Err(e) => {
                    log::error!("Failed to restart {}: {}", video_id, e);
                    ended.push((video_id.clone(), e));
                }
            }
        }

        for (video_id, error) in ended {
            self.inner.remove_entry(&mut entries, &video_id);
            self.inner.emit(PoolEvent::End {
                video_id,
                reason: EndReason::RetriesExhausted {
                    last_error: error.to_string(),
                },
            });
        }
        restarted
    }

    /// 一定間隔で `ensure()` を実行するタスクを起動
    ///
    /// プールがすべて破棄されるとタスクも終了する。
    pub fn spawn_ensure_loop(&self) -> JoinHandle<()> {
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.ensure_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    log::debug!("Pool dropped, ensure loop exiting");
                    return;
                };
                let restarted = ChatPool { inner }.ensure().await;
                if restarted > 0 {
                    log::info!("Ensure restarted {} sessions", restarted);
                }
            }
        })
    }

    pub async fn has(&self, video_id: &str) -> bool {
        self.inner.entries.lock().await.contains_key(video_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.entries.lock().await.is_empty()
    }

    pub async fn video_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.entries.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn status(&self, video_id: &str) -> Option<SubscriptionStatus> {
        self.inner
            .entries
            .lock()
            .await
            .get(video_id)
            .map(|entry| entry.status)
    }

    pub async fn channel_id(&self, video_id: &str) -> Option<String> {
        self.inner
            .entries
            .lock()
            .await
            .get(video_id)
            .map(|entry| entry.channel_id.clone())
    }

    /// 購読中のセッション（送信・モデレーション用）
    pub async fn session(&self, video_id: &str) -> Option<Arc<ChatSession>> {
        self.inner
            .entries
            .lock()
            .await
            .get(video_id)
            .map(|entry| entry.session.clone())
    }

    /// すべての購読がなくなるまで待つ
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.inner.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.entries.lock().await.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::youtube::test_support::{chat_page, MockTransport, StaticResolver};
    use crate::youtube::transport::{HttpRequest, HttpResponse};
    use async_trait::async_trait;

    const CHANNEL: &str = "UCabcdefghijklmnopqrstuv";

    /// Refererの動画IDで応答を振り分けるトランスポート
    #[derive(Default)]
    struct RoutingTransport {
        routes: std::sync::Mutex<HashMap<String, Arc<MockTransport>>>,
    }

    impl RoutingTransport {
        fn route(&self, video_id: &str) -> Arc<MockTransport> {
            self.routes
                .lock()
                .unwrap()
                .entry(video_id.to_string())
                .or_default()
                .clone()
        }
    }

    #[async_trait]
    impl Transport for RoutingTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, YouTubeError> {
            let video_id = request
                .headers
                .iter()
                .find(|(name, _)| name == "Referer")
                .and_then(|(_, value)| value.split("v=").nth(1))
                .unwrap_or_default()
                .to_string();
            self.route(&video_id).send(request).await
        }
    }

    fn pool(transport: Arc<dyn Transport>, config: PoolConfig) -> (ChatPool, UnboundedReceiver<PoolEvent>) {
        ChatPool::new(
            transport,
            Arc::new(StaticResolver::live("unused")),
            SessionOptions::default(),
            config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated_per_subscription() {
        let transport = Arc::new(RoutingTransport::default());
        transport.route("bad").push_status(
            404,
            r#"{"error":{"code":404,"message":"gone","status":"NOT_FOUND"}}"#,
        );
        let good = transport.route("good");
        good.push_json(chat_page(&["a"], Some("t2")));
        good.push_json(chat_page(&["b", "c"], None));

        let (pool, mut rx) = pool(transport.clone(), PoolConfig::default());
        pool.subscribe("bad", CHANNEL).await.unwrap();
        pool.subscribe("good", CHANNEL).await.unwrap();

        let mut good_ids = Vec::new();
        let mut ends = HashMap::new();
        while ends.len() < 2 {
            match rx.recv().await.unwrap() {
                PoolEvent::Chats { video_id, actions } => {
                    assert_eq!(video_id, "good");
                    good_ids.extend(actions.iter().filter_map(|a| a.id().map(str::to_string)));
                }
                PoolEvent::End { video_id, reason } => {
                    ends.insert(video_id, reason);
                }
                PoolEvent::Error { .. } => {}
            }
        }

        assert_eq!(good_ids, vec!["a", "b", "c"]);
        assert_eq!(ends["bad"], EndReason::Deleted);
        assert_eq!(ends["good"], EndReason::ChatEnded);

        pool.wait_until_empty().await;
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_is_idempotent() {
        let mock = Arc::new(MockTransport::new());
        mock.push_hang();

        let (pool, _rx) = pool(mock.clone(), PoolConfig::default());
        pool.subscribe("vid", CHANNEL).await.unwrap();
        pool.subscribe("vid", CHANNEL).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.video_ids().await, vec!["vid"]);
        assert_eq!(pool.channel_id("vid").await.as_deref(), Some(CHANNEL));
        assert_eq!(pool.status("vid").await, Some(SubscriptionStatus::Active));
        assert_eq!(mock.request_count(), 1);

        pool.unsubscribe("vid").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_session() {
        let mock = Arc::new(MockTransport::new());
        mock.push_hang();

        let (pool, mut rx) = pool(mock.clone(), PoolConfig::default());
        pool.subscribe("vid", CHANNEL).await.unwrap();
        let session = pool.session("vid").await.unwrap();
        tokio::task::yield_now().await;

        assert!(pool.unsubscribe("vid").await);
        assert!(!pool.unsubscribe("vid").await);
        assert!(!pool.has("vid").await);
        assert!(!session.is_running());

        assert_eq!(
            rx.recv().await,
            Some(PoolEvent::End {
                video_id: "vid".to_string(),
                reason: EndReason::Aborted
            })
        );
        pool.wait_until_empty().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_restarts_with_bounded_attempts() {
        let mock = Arc::new(MockTransport::new());
        mock.set_fallback(Err(YouTubeError::Transport("unreachable".to_string())));

        let mut options = SessionOptions::default();
        options.config.retry.max_attempts = 1;
        let config = PoolConfig {
            max_restarts: 1,
            restart_base_delay_ms: 1000,
            ..Default::default()
        };
        let (pool, mut rx) = ChatPool::new(
            mock.clone(),
            Arc::new(StaticResolver::live("unused")),
            options,
            config,
        );

        pool.subscribe("vid", CHANNEL).await.unwrap();
        while pool.status("vid").await != Some(SubscriptionStatus::PendingRestart) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        // 初回 + リトライ1回
        assert_eq!(mock.request_count(), 2);

        // 待機時間前は再起動しない
        assert_eq!(pool.ensure().await, 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(pool.ensure().await, 1);

        let end = loop {
            match rx.recv().await.unwrap() {
                PoolEvent::End { reason, .. } => break reason,
                _ => continue,
            }
        };
        assert!(matches!(end, EndReason::RetriesExhausted { .. }));
        assert_eq!(mock.request_count(), 4);
        assert!(!pool.has("vid").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_leaves_active_entries_alone() {
        let mock = Arc::new(MockTransport::new());
        mock.push_hang();

        let (pool, _rx) = pool(mock.clone(), PoolConfig::default());
        pool.subscribe("vid", CHANNEL).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(pool.ensure().await, 0);
        assert_eq!(pool.status("vid").await, Some(SubscriptionStatus::Active));
        assert_eq!(mock.request_count(), 1);

        pool.unsubscribe("vid").await;
    }

    #[test]
    fn test_pool_event_serialization() {
        let event = PoolEvent::End {
            video_id: "vid".to_string(),
            reason: EndReason::ChatEnded,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "end");
        assert_eq!(json["video_id"], "vid");
        assert_eq!(event.video_id(), "vid");
    }
}

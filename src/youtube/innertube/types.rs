//! InnerTube API 固有の型定義
//!
//! アクション本体は種類が多く変化も激しいため `Value` のまま受け取り、
//! パーサー側でレンダラーごとの型に変換する。

use serde::Deserialize;
use serde_json::Value;

/// Continuation種別
///
/// InnerTube APIは複数種類のContinuationデータを返す:
/// - `invalidationContinuationData`: ライブ（プッシュ通知型）
/// - `timedContinuationData`: ライブ（明示的な待機時間）
/// - `reloadContinuationData`: 初期化用
/// - `liveChatReplayContinuationData`: アーカイブ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationType {
    Invalidation,
    Timed,
    Reload,
    Replay,
}

/// 次回リクエスト用のcontinuation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextContinuation {
    pub token: String,
    /// サーバー推奨の待機時間（指定がなければNone）
    pub timeout_ms: Option<u64>,
    pub kind: ContinuationType,
}

/// get_live_chat / get_live_chat_replay のレスポンス
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerTubeChatResponse {
    pub continuation_contents: Option<ContinuationContents>,
    /// continuationContentsがない場合のメッセージ（チャット無効など）
    pub contents: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationContents {
    pub live_chat_continuation: Option<LiveChatContinuation>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LiveChatContinuation {
    pub actions: Option<Vec<Value>>,
    pub continuations: Option<Vec<Continuation>>,
}

/// Continuation（次回取得用トークン）
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Continuation {
    pub invalidation_continuation_data: Option<ContinuationData>,
    pub timed_continuation_data: Option<ContinuationData>,
    pub reload_continuation_data: Option<ContinuationData>,
    pub live_chat_replay_continuation_data: Option<ContinuationData>,
    /// アーカイブ末尾に到達したときのみ現れる
    pub player_seek_continuation_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationData {
    pub continuation: String,
    pub timeout_ms: Option<u64>,
}

/// APIエラーレスポンス（`{"error": {...}}`）
#[derive(Debug, Deserialize)]
pub struct InnerTubeErrorResponse {
    pub error: InnerTubeErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct InnerTubeErrorBody {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

impl InnerTubeChatResponse {
    /// 次回取得用のcontinuationを抽出
    ///
    /// アーカイブ末尾（playerSeekContinuationData）の場合はNone。
    pub fn get_next_continuation(&self) -> Option<NextContinuation> {
        let continuation = self
            .continuation_contents
            .as_ref()?
            .live_chat_continuation
            .as_ref()?
            .continuations
            .as_ref()?
            .first()?;

        if continuation.player_seek_continuation_data.is_some() {
            return None;
        }

        // 優先順位: invalidation > timed > reload > replay
        let candidates = [
            (&continuation.invalidation_continuation_data, ContinuationType::Invalidation),
            (&continuation.timed_continuation_data, ContinuationType::Timed),
            (&continuation.reload_continuation_data, ContinuationType::Reload),
            (&continuation.live_chat_replay_continuation_data, ContinuationType::Replay),
        ];
        candidates.into_iter().find_map(|(data, kind)| {
            data.as_ref().map(|d| NextContinuation {
                token: d.continuation.clone(),
                timeout_ms: d.timeout_ms,
                kind,
            })
        })
    }

    /// 生のアクション配列を取り出す
    pub fn take_actions(&mut self) -> Vec<Value> {
        self.continuation_contents
            .as_mut()
            .and_then(|c| c.live_chat_continuation.as_mut())
            .and_then(|c| c.actions.take())
            .unwrap_or_default()
    }

    /// contentsに含まれるメッセージ文字列（チャット無効の通知など）
    pub fn contents_message(&self) -> Option<String> {
        let runs = self
            .contents
            .as_ref()?
            .pointer("/messageRenderer/text/runs")?
            .as_array()?;
        Some(
            runs.iter()
                .filter_map(|r| r.get("text").and_then(Value::as_str))
                .collect(),
        )
    }
}

// ========================================
// レンダラー
// ========================================

/// メッセージ内容（runs配列を含む）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub simple_text: Option<String>,
    pub runs: Option<Vec<RunItem>>,
}

impl MessageContent {
    /// テキスト内容を取得（絵文字は除外）
    pub fn get_text(&self) -> String {
        if let Some(text) = &self.simple_text {
            return text.clone();
        }
        self.runs
            .iter()
            .flatten()
            .filter_map(|r| r.text.as_deref())
            .collect()
    }

    /// n番目のrunのテキスト
    pub fn run_text(&self, index: usize) -> Option<&str> {
        self.runs.as_ref()?.get(index)?.text.as_deref()
    }
}

/// runs配列の要素（テキストまたは絵文字）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunItem {
    pub text: Option<String>,
    #[serde(default)]
    pub bold: bool,
    pub emoji: Option<InnerTubeEmoji>,
}

/// InnerTube絵文字情報
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerTubeEmoji {
    pub emoji_id: String,
    pub shortcuts: Option<Vec<String>>,
    pub image: Option<ThumbnailContainer>,
    pub is_custom_emoji: Option<bool>,
}

/// サムネイルコンテナ
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailContainer {
    pub thumbnails: Vec<Thumbnail>,
    pub accessibility: Option<Accessibility>,
}

impl ThumbnailContainer {
    pub fn first_url(&self) -> Option<String> {
        self.thumbnails.first().map(|t| t.url.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessibility {
    pub accessibility_data: AccessibilityData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessibilityData {
    pub label: String,
}

/// 投稿者バッジ
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorBadge {
    pub live_chat_author_badge_renderer: Option<BadgeRenderer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeRenderer {
    pub custom_thumbnail: Option<ThumbnailContainer>,
    pub icon: Option<Icon>,
    pub tooltip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Icon {
    pub icon_type: String,
}

/// チャットアイテム共通の投稿者フィールド
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorFields {
    pub author_name: Option<MessageContent>,
    pub author_photo: Option<ThumbnailContainer>,
    pub author_external_channel_id: Option<String>,
    pub author_badges: Option<Vec<AuthorBadge>>,
}

/// テキストメッセージ・モデレーション通知など、本文のみを持つレンダラー
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatTextMessageRenderer {
    pub id: String,
    pub timestamp_usec: Option<String>,
    #[serde(flatten)]
    pub author: AuthorFields,
    pub message: Option<MessageContent>,
}

/// スーパーチャットレンダラー
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatPaidMessageRenderer {
    pub id: String,
    pub timestamp_usec: Option<String>,
    #[serde(flatten)]
    pub author: AuthorFields,
    pub message: Option<MessageContent>,
    pub purchase_amount_text: MessageContent,
    pub header_background_color: u64,
    pub header_text_color: u64,
    pub body_background_color: u64,
    pub body_text_color: u64,
}

/// スーパーステッカーレンダラー
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatPaidStickerRenderer {
    pub id: String,
    pub timestamp_usec: Option<String>,
    #[serde(flatten)]
    pub author: AuthorFields,
    pub purchase_amount_text: Option<MessageContent>,
    pub sticker: Option<ThumbnailContainer>,
}

/// メンバーシップレンダラー
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMembershipItemRenderer {
    pub id: String,
    pub timestamp_usec: Option<String>,
    #[serde(flatten)]
    pub author: AuthorFields,
    pub message: Option<MessageContent>,
    /// マイルストーン（例: "Member for 12 months"）
    pub header_primary_text: Option<MessageContent>,
    pub header_sub_text: Option<MessageContent>,
}

/// メンバーシップギフト購入レンダラー
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatSponsorshipsGiftPurchaseAnnouncementRenderer {
    pub id: String,
    pub timestamp_usec: Option<String>,
    pub author_external_channel_id: Option<String>,
    pub header: SponsorshipsHeader,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipsHeader {
    pub live_chat_sponsorships_header_renderer: LiveChatSponsorshipsHeaderRenderer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatSponsorshipsHeaderRenderer {
    #[serde(flatten)]
    pub author: AuthorFields,
    pub primary_text: Option<MessageContent>,
}

/// ビューアーエンゲージメント（システムメッセージ）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatViewerEngagementMessageRenderer {
    pub id: String,
    pub timestamp_usec: Option<String>,
    pub message: Option<MessageContent>,
    pub icon: Option<Icon>,
}

/// プレースホルダー
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatPlaceholderItemRenderer {
    pub id: String,
    pub timestamp_usec: Option<String>,
}

/// チャットモード変更
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatModeChangeMessageRenderer {
    pub id: String,
    pub timestamp_usec: Option<String>,
    pub text: MessageContent,
    pub subtext: Option<MessageContent>,
}

// ========================================
// アクション
// ========================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkChatItemAsDeletedAction {
    pub deleted_state_message: MessageContent,
    pub target_item_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalChannelAction {
    pub external_channel_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetItemAction {
    pub target_item_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceChatItemAction {
    pub target_item_id: String,
    pub replacement_item: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayChatItemAction {
    pub actions: Vec<Value>,
    pub video_offset_time_msec: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBannerToLiveChatCommand {
    pub banner_renderer: BannerRenderer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerRenderer {
    pub live_chat_banner_renderer: LiveChatBannerRenderer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatBannerRenderer {
    pub action_id: String,
    pub target_id: Option<String>,
    pub header: Option<Value>,
    /// バナー内のチャットアイテム
    pub contents: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveBannerForLiveChatCommand {
    pub target_action_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLiveChatTickerItemAction {
    /// `{ "<rendererName>": { ... } }`
    pub item: serde_json::Map<String, Value>,
    pub duration_sec: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerItemRenderer {
    pub id: Option<String>,
    pub author_external_channel_id: Option<String>,
    pub full_duration_sec: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLiveChatPollAction {
    pub poll_to_update: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowLiveChatActionPanelAction {
    pub panel_to_show: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseLiveChatActionPanelAction {
    pub target_panel_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowLiveChatTooltipCommand {
    pub tooltip: Value,
}

//! 正規化済みチャットアクションの型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::superchat::SuperChat;

/// メッセージのruns要素（テキストまたは絵文字）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageRun {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        bold: bool,
    },
    Emoji { emoji: EmojiInfo },
}

impl MessageRun {
    pub fn text(text: impl Into<String>) -> Self {
        MessageRun::Text {
            text: text.into(),
            bold: false,
        }
    }
}

/// 絵文字情報
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiInfo {
    pub emoji_id: String,
    pub shortcuts: Vec<String>,
    pub image_url: Option<String>,
    pub is_custom_emoji: bool,
}

/// 投稿者情報
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: Option<String>,
    pub channel_id: Option<String>,
    pub photo_url: Option<String>,
    pub is_owner: bool,
    pub is_moderator: bool,
    pub is_verified: bool,
    /// メンバーバッジのツールチップ（例: "Member (6 months)"）
    pub membership: Option<String>,
}

/// チャットアイテム共通のメタ情報
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMeta {
    pub id: String,
    pub author: Author,
    pub timestamp: Option<DateTime<Utc>>,
    /// アーカイブ再生時の動画内オフセット（ミリ秒）
    pub video_offset_ms: Option<u64>,
}

/// チャットモード変更の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LiveChatMode {
    Slow,
    MembersOnly,
    SubscribersOnly,
    Unknown,
}

/// 正規化済みチャットアクション
///
/// 認識できないアクションも `Unknown` として生のペイロードごと保持する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChatAction {
    /// 通常のチャットメッセージ
    AddChatItem {
        #[serde(flatten)]
        meta: ItemMeta,
        message: Vec<MessageRun>,
    },
    /// スーパーチャット
    AddSuperChatItem {
        #[serde(flatten)]
        meta: ItemMeta,
        message: Vec<MessageRun>,
        superchat: SuperChat,
    },
    /// スーパーステッカー
    AddSuperStickerItem {
        #[serde(flatten)]
        meta: ItemMeta,
        sticker_url: Option<String>,
        sticker_label: Option<String>,
        amount: Option<f64>,
        currency: Option<String>,
    },
    /// メンバーシップ加入・継続
    AddMembershipItem {
        #[serde(flatten)]
        meta: ItemMeta,
        level: Option<String>,
        /// マイルストーン（継続）メッセージの場合の本文
        message: Vec<MessageRun>,
        /// マイルストーンの期間表示（例: "12 months"）
        milestone: Option<String>,
    },
    /// メンバーシップギフト購入
    MembershipGiftPurchase {
        #[serde(flatten)]
        meta: ItemMeta,
        amount: u32,
    },
    /// メンバーシップギフト受け取り
    MembershipGiftRedemption {
        #[serde(flatten)]
        meta: ItemMeta,
        sender_name: Option<String>,
    },
    /// システムメッセージ（投票結果など）
    ViewerEngagement {
        #[serde(flatten)]
        meta: ItemMeta,
        message: Vec<MessageRun>,
        icon_type: Option<String>,
    },
    /// 削除待ちのプレースホルダー
    Placeholder {
        #[serde(flatten)]
        meta: ItemMeta,
    },
    /// モデレーション通知
    ModerationMessage {
        #[serde(flatten)]
        meta: ItemMeta,
        message: Vec<MessageRun>,
    },
    /// チャットモード変更（低速モードなど）
    ModeChange {
        #[serde(flatten)]
        meta: ItemMeta,
        mode: LiveChatMode,
        enabled: bool,
        description: String,
    },
    /// 単一メッセージの削除・撤回
    MarkChatItemAsDeleted {
        target_id: String,
        retracted: bool,
        executor: Option<String>,
    },
    /// 特定ユーザーの全メッセージ削除（BAN・タイムアウト）
    MarkChatItemsByAuthorAsDeleted { channel_id: String },
    /// メッセージの差し替え
    ReplaceChatItem {
        target_id: String,
        replacement: Box<ChatAction>,
    },
    RemoveChatItem { target_id: String },
    RemoveChatItemByAuthor { channel_id: String },
    /// ピン留め
    AddBanner {
        action_id: String,
        target_id: Option<String>,
        title: Option<String>,
        item: Option<Box<ChatAction>>,
    },
    RemoveBanner { target_action_id: String },
    /// ティッカー（画面上部の固定表示）
    AddTicker {
        id: Option<String>,
        author_channel_id: Option<String>,
        duration_sec: Option<u64>,
        full_duration_sec: Option<u64>,
        renderer: String,
    },
    UpdatePoll { payload: Value },
    ShowPanel {
        panel_id: Option<String>,
        payload: Value,
    },
    ClosePanel { target_panel_id: String },
    ShowTooltip { target_id: Option<String> },
    /// 未対応のアクション
    Unknown { payload: Value },
}

impl ChatAction {
    fn meta(&self) -> Option<&ItemMeta> {
        match self {
            ChatAction::AddChatItem { meta, .. }
            | ChatAction::AddSuperChatItem { meta, .. }
            | ChatAction::AddSuperStickerItem { meta, .. }
            | ChatAction::AddMembershipItem { meta, .. }
            | ChatAction::MembershipGiftPurchase { meta, .. }
            | ChatAction::MembershipGiftRedemption { meta, .. }
            | ChatAction::ViewerEngagement { meta, .. }
            | ChatAction::Placeholder { meta }
            | ChatAction::ModerationMessage { meta, .. }
            | ChatAction::ModeChange { meta, .. } => Some(meta),
            _ => None,
        }
    }

    fn meta_mut(&mut self) -> Option<&mut ItemMeta> {
        match self {
            ChatAction::AddChatItem { meta, .. }
            | ChatAction::AddSuperChatItem { meta, .. }
            | ChatAction::AddSuperStickerItem { meta, .. }
            | ChatAction::AddMembershipItem { meta, .. }
            | ChatAction::MembershipGiftPurchase { meta, .. }
            | ChatAction::MembershipGiftRedemption { meta, .. }
            | ChatAction::ViewerEngagement { meta, .. }
            | ChatAction::Placeholder { meta }
            | ChatAction::ModerationMessage { meta, .. }
            | ChatAction::ModeChange { meta, .. } => Some(meta),
            _ => None,
        }
    }

    /// アイテムID（チャットアイテム系のみ）
    pub fn id(&self) -> Option<&str> {
        self.meta().map(|m| m.id.as_str())
    }

    pub fn author_name(&self) -> Option<&str> {
        self.meta().and_then(|m| m.author.name.as_deref())
    }

    pub fn author_channel_id(&self) -> Option<&str> {
        match self {
            ChatAction::MarkChatItemsByAuthorAsDeleted { channel_id }
            | ChatAction::RemoveChatItemByAuthor { channel_id } => Some(channel_id),
            _ => self.meta().and_then(|m| m.author.channel_id.as_deref()),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.meta().and_then(|m| m.timestamp)
    }

    pub fn video_offset_ms(&self) -> Option<u64> {
        self.meta().and_then(|m| m.video_offset_ms)
    }

    pub(crate) fn set_video_offset_ms(&mut self, offset: Option<u64>) {
        if let Some(meta) = self.meta_mut() {
            meta.video_offset_ms = offset;
        }
    }

    /// メッセージ本文のruns（本文を持たないアクションはNone）
    pub fn message_runs(&self) -> Option<&[MessageRun]> {
        match self {
            ChatAction::AddChatItem { message, .. }
            | ChatAction::AddSuperChatItem { message, .. }
            | ChatAction::AddMembershipItem { message, .. }
            | ChatAction::ViewerEngagement { message, .. }
            | ChatAction::ModerationMessage { message, .. } => Some(message),
            _ => None,
        }
    }

    /// 通常のチャットメッセージか（スパチャ含む）
    pub fn is_chat(&self) -> bool {
        matches!(
            self,
            ChatAction::AddChatItem { .. } | ChatAction::AddSuperChatItem { .. }
        )
    }

    /// ログ出力用にrunsを平文化
    pub fn plain_text(&self) -> String {
        self.message_runs().map(runs_to_text).unwrap_or_default()
    }
}

/// runsをプレーンテキストに変換（絵文字は最初のショートカット）
pub fn runs_to_text(runs: &[MessageRun]) -> String {
    runs.iter()
        .map(|run| match run {
            MessageRun::Text { text, .. } => text.clone(),
            MessageRun::Emoji { emoji } => emoji
                .shortcuts
                .first()
                .cloned()
                .unwrap_or_else(|| emoji.emoji_id.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(text: &str) -> ChatAction {
        ChatAction::AddChatItem {
            meta: ItemMeta {
                id: "id-1".to_string(),
                author: Author {
                    name: Some("Alice".to_string()),
                    channel_id: Some("UCalice".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            message: vec![MessageRun::text(text)],
        }
    }

    #[test]
    fn test_plain_text_with_emoji() {
        let runs = vec![
            MessageRun::text("Hello "),
            MessageRun::Emoji {
                emoji: EmojiInfo {
                    emoji_id: "test".to_string(),
                    shortcuts: vec![":wave:".to_string()],
                    image_url: None,
                    is_custom_emoji: false,
                },
            },
            MessageRun::text(" World"),
        ];
        assert_eq!(runs_to_text(&runs), "Hello :wave: World");
    }

    #[test]
    fn test_accessors() {
        let action = chat("hi");
        assert_eq!(action.id(), Some("id-1"));
        assert_eq!(action.author_name(), Some("Alice"));
        assert_eq!(action.author_channel_id(), Some("UCalice"));
        assert_eq!(action.plain_text(), "hi");
        assert!(action.is_chat());

        let deleted = ChatAction::MarkChatItemsByAuthorAsDeleted {
            channel_id: "UCbob".to_string(),
        };
        assert_eq!(deleted.author_channel_id(), Some("UCbob"));
        assert_eq!(deleted.plain_text(), "");
    }

    #[test]
    fn test_video_offset_only_for_items() {
        let mut action = chat("hi");
        action.set_video_offset_ms(Some(1500));
        assert_eq!(action.video_offset_ms(), Some(1500));

        let mut removed = ChatAction::RemoveChatItem {
            target_id: "x".to_string(),
        };
        removed.set_video_offset_ms(Some(1500));
        assert_eq!(removed.video_offset_ms(), None);
    }

    #[test]
    fn test_serialization_tag() {
        let json = serde_json::to_value(chat("hi")).unwrap();
        assert_eq!(json["type"], "addChatItem");
        assert_eq!(json["id"], "id-1");
        assert_eq!(json["message"][0]["type"], "text");
    }
}

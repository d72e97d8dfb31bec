//! InnerTube レスポンスパーサー
//!
//! 生のアクション（`Value`）を `ChatAction` に正規化する。
//! 解釈できなかったアクションは `ChatAction::Unknown` として元のペイロードごと残す。

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::types::*;
use crate::superchat::{parse_amount_text, SuperChat};
use crate::youtube::types::{
    Author, ChatAction, EmojiInfo, ItemMeta, LiveChatMode, MessageRun,
};

static SLOW_MODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Slow mode").expect("Failed to compile slow mode regex"));

static MEMBERS_ONLY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Members-only mode").expect("Failed to compile members-only regex")
});

static SUBSCRIBERS_ONLY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"subscribers-only").expect("Failed to compile subscribers-only regex")
});

static MODE_ENABLED_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(is|turned) on").expect("Failed to compile mode enabled regex"));

/// アクション配列を正規化（サーバーの順序を保持）
pub fn parse_actions(actions: Vec<Value>) -> Vec<ChatAction> {
    actions.iter().flat_map(parse_action).collect()
}

/// 単一のアクションをパース
///
/// リプレイアクションには複数のアクションが含まれる場合があるため、
/// Vec<ChatAction>を返す。
pub fn parse_action(action: &Value) -> Vec<ChatAction> {
    let Some((name, body)) = action_entry(action) else {
        return vec![unknown(action)];
    };

    if name == "replayChatItemAction" {
        return match decode::<ReplayChatItemAction>(body) {
            Some(replay) => parse_replay_action(replay),
            None => vec![unknown(action)],
        };
    }

    let parsed = match name {
        "addChatItemAction" => body.get("item").and_then(parse_chat_item),
        "markChatItemAsDeletedAction" => decode(body).map(parse_deleted_action),
        "markChatItemsByAuthorAsDeletedAction" => decode::<ExternalChannelAction>(body)
            .map(|a| ChatAction::MarkChatItemsByAuthorAsDeleted {
                channel_id: a.external_channel_id,
            }),
        "replaceChatItemAction" => decode::<ReplaceChatItemAction>(body).and_then(|a| {
            parse_chat_item(&a.replacement_item).map(|replacement| ChatAction::ReplaceChatItem {
                target_id: a.target_item_id,
                replacement: Box::new(replacement),
            })
        }),
        "removeChatItemAction" => decode::<TargetItemAction>(body).map(|a| {
            ChatAction::RemoveChatItem {
                target_id: a.target_item_id,
            }
        }),
        "removeChatItemByAuthorAction" => decode::<ExternalChannelAction>(body).map(|a| {
            ChatAction::RemoveChatItemByAuthor {
                channel_id: a.external_channel_id,
            }
        }),
        "addBannerToLiveChatCommand" => decode(body).map(parse_banner),
        "removeBannerForLiveChatCommand" => decode::<RemoveBannerForLiveChatCommand>(body)
            .map(|c| ChatAction::RemoveBanner {
                target_action_id: c.target_action_id,
            }),
        "addLiveChatTickerItemAction" => decode(body).and_then(parse_ticker),
        "updateLiveChatPollAction" => decode::<UpdateLiveChatPollAction>(body).map(|a| {
            ChatAction::UpdatePoll {
                payload: a.poll_to_update,
            }
        }),
        "showLiveChatActionPanelAction" => {
            decode::<ShowLiveChatActionPanelAction>(body).map(|a| ChatAction::ShowPanel {
                panel_id: a
                    .panel_to_show
                    .pointer("/liveChatActionPanelRenderer/id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                payload: a.panel_to_show,
            })
        }
        "closeLiveChatActionPanelAction" => decode::<CloseLiveChatActionPanelAction>(body)
            .map(|a| ChatAction::ClosePanel {
                target_panel_id: a.target_panel_id,
            }),
        "showLiveChatTooltipCommand" => {
            decode::<ShowLiveChatTooltipCommand>(body).map(|c| ChatAction::ShowTooltip {
                target_id: c
                    .tooltip
                    .pointer("/tooltipRenderer/targetId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        }
        _ => None,
    };

    match parsed {
        Some(parsed) => vec![parsed],
        None => {
            log::debug!("Unrecognized chat action: {}", name);
            vec![unknown(action)]
        }
    }
}

/// アクション名と本体を取り出す（clickTrackingParamsは無視）
fn action_entry(action: &Value) -> Option<(&str, &Value)> {
    action
        .as_object()?
        .iter()
        .find(|(key, _)| key.as_str() != "clickTrackingParams")
        .map(|(key, value)| (key.as_str(), value))
}

fn unknown(action: &Value) -> ChatAction {
    ChatAction::Unknown {
        payload: action.clone(),
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value)
        .map_err(|e| log::debug!("Failed to decode chat payload: {}", e))
        .ok()
}

/// リプレイアクションを展開し、動画内オフセットを付与
fn parse_replay_action(replay: ReplayChatItemAction) -> Vec<ChatAction> {
    let offset = replay
        .video_offset_time_msec
        .as_deref()
        .and_then(|ms| ms.parse::<u64>().ok());

    replay
        .actions
        .iter()
        .flat_map(parse_action)
        .map(|mut action| {
            action.set_video_offset_ms(offset);
            action
        })
        .collect()
}

/// チャットアイテムをパース
fn parse_chat_item(item: &Value) -> Option<ChatAction> {
    let (name, renderer) = action_entry(item)?;

    match name {
        "liveChatTextMessageRenderer" => {
            let r: LiveChatTextMessageRenderer = decode(renderer)?;
            Some(ChatAction::AddChatItem {
                meta: meta(r.id, &r.timestamp_usec, r.author),
                message: parse_runs(r.message.as_ref()),
            })
        }
        "liveChatPaidMessageRenderer" => parse_paid_message(decode(renderer)?),
        "liveChatPaidStickerRenderer" => Some(parse_sticker_message(decode(renderer)?)),
        "liveChatMembershipItemRenderer" => Some(parse_membership_message(decode(renderer)?)),
        "liveChatSponsorshipsGiftPurchaseAnnouncementRenderer" => {
            Some(parse_gift_purchase(decode(renderer)?))
        }
        "liveChatSponsorshipsGiftRedemptionAnnouncementRenderer" => {
            let r: LiveChatTextMessageRenderer = decode(renderer)?;
            // "received a gift membership by " + 送り主
            let sender_name = r
                .message
                .as_ref()
                .and_then(|m| m.run_text(1))
                .map(str::to_string);
            Some(ChatAction::MembershipGiftRedemption {
                meta: meta(r.id, &r.timestamp_usec, r.author),
                sender_name,
            })
        }
        "liveChatViewerEngagementMessageRenderer" => {
            let r: LiveChatViewerEngagementMessageRenderer = decode(renderer)?;
            Some(ChatAction::ViewerEngagement {
                meta: meta(r.id, &r.timestamp_usec, AuthorFields::default()),
                message: parse_runs(r.message.as_ref()),
                icon_type: r.icon.map(|i| i.icon_type),
            })
        }
        "liveChatPlaceholderItemRenderer" => {
            let r: LiveChatPlaceholderItemRenderer = decode(renderer)?;
            Some(ChatAction::Placeholder {
                meta: meta(r.id, &r.timestamp_usec, AuthorFields::default()),
            })
        }
        "liveChatModerationMessageRenderer" => {
            let r: LiveChatTextMessageRenderer = decode(renderer)?;
            Some(ChatAction::ModerationMessage {
                meta: meta(r.id, &r.timestamp_usec, r.author),
                message: parse_runs(r.message.as_ref()),
            })
        }
        "liveChatModeChangeMessageRenderer" => Some(parse_mode_change(decode(renderer)?)),
        _ => None,
    }
}

/// スーパーチャットをパース（金額が解析できなければNone）
fn parse_paid_message(msg: LiveChatPaidMessageRenderer) -> Option<ChatAction> {
    let amount_text = msg.purchase_amount_text.get_text();
    let superchat = SuperChat::from_parts(
        &amount_text,
        msg.header_background_color,
        msg.header_text_color,
        msg.body_background_color,
        msg.body_text_color,
    )?;

    Some(ChatAction::AddSuperChatItem {
        meta: meta(msg.id, &msg.timestamp_usec, msg.author),
        message: parse_runs(msg.message.as_ref()),
        superchat,
    })
}

/// スーパーステッカーをパース
fn parse_sticker_message(msg: LiveChatPaidStickerRenderer) -> ChatAction {
    let amount = msg
        .purchase_amount_text
        .as_ref()
        .and_then(|t| parse_amount_text(&t.get_text()));

    ChatAction::AddSuperStickerItem {
        meta: meta(msg.id, &msg.timestamp_usec, msg.author),
        sticker_url: msg.sticker.as_ref().and_then(ThumbnailContainer::first_url),
        sticker_label: msg
            .sticker
            .and_then(|s| s.accessibility)
            .map(|a| a.accessibility_data.label),
        amount: amount.as_ref().map(|(value, _)| *value),
        currency: amount.map(|(_, currency)| currency),
    }
}

/// メンバーシップメッセージをパース
fn parse_membership_message(msg: LiveChatMembershipItemRenderer) -> ChatAction {
    let level = msg
        .header_sub_text
        .as_ref()
        .map(MessageContent::get_text)
        .filter(|t| !t.is_empty());
    let milestone = msg
        .header_primary_text
        .as_ref()
        .map(MessageContent::get_text)
        .filter(|t| !t.is_empty());

    ChatAction::AddMembershipItem {
        meta: meta(msg.id, &msg.timestamp_usec, msg.author),
        level,
        message: parse_runs(msg.message.as_ref()),
        milestone,
    }
}

/// メンバーシップギフト購入をパース
fn parse_gift_purchase(msg: LiveChatSponsorshipsGiftPurchaseAnnouncementRenderer) -> ChatAction {
    let header = msg.header.live_chat_sponsorships_header_renderer;

    // 例: ["Sent ", "5", " Channel gift memberships"]
    let amount = header
        .primary_text
        .as_ref()
        .and_then(|t| {
            t.run_text(1)
                .and_then(|n| n.trim().parse::<u32>().ok())
                .or_else(|| {
                    t.get_text()
                        .chars()
                        .filter(|c| c.is_ascii_digit())
                        .collect::<String>()
                        .parse()
                        .ok()
                })
        })
        .unwrap_or(1);

    let mut author = header.author;
    if author.author_external_channel_id.is_none() {
        author.author_external_channel_id = msg.author_external_channel_id;
    }

    ChatAction::MembershipGiftPurchase {
        meta: meta(msg.id, &msg.timestamp_usec, author),
        amount,
    }
}

fn parse_mode_change(msg: LiveChatModeChangeMessageRenderer) -> ChatAction {
    let text = msg.text.get_text();
    let description = msg
        .subtext
        .as_ref()
        .map(MessageContent::get_text)
        .unwrap_or_default();

    let mode = if SLOW_MODE_REGEX.is_match(&text) {
        LiveChatMode::Slow
    } else if MEMBERS_ONLY_REGEX.is_match(&text) {
        LiveChatMode::MembersOnly
    } else if SUBSCRIBERS_ONLY_REGEX.is_match(&text) {
        LiveChatMode::SubscribersOnly
    } else {
        LiveChatMode::Unknown
    };

    ChatAction::ModeChange {
        meta: meta(msg.id, &msg.timestamp_usec, AuthorFields::default()),
        mode,
        enabled: MODE_ENABLED_REGEX.is_match(&text),
        description,
    }
}

/// 削除通知をパース
///
/// - "[message retracted]": 投稿者自身による撤回
/// - "[message deleted]": 削除（実行者不明）
/// - "Message deleted by " + 実行者
fn parse_deleted_action(action: MarkChatItemAsDeletedAction) -> ChatAction {
    let status = action.deleted_state_message.run_text(0).unwrap_or_default();
    let retracted = status == "[message retracted]";
    let executor = if status.starts_with("Message deleted by") {
        action.deleted_state_message.run_text(1).map(str::to_string)
    } else {
        None
    };

    ChatAction::MarkChatItemAsDeleted {
        target_id: action.target_item_id,
        retracted,
        executor,
    }
}

fn parse_banner(command: AddBannerToLiveChatCommand) -> ChatAction {
    let banner = command.banner_renderer.live_chat_banner_renderer;
    let title = banner
        .header
        .as_ref()
        .and_then(|h| h.pointer("/liveChatBannerHeaderRenderer/text"))
        .and_then(decode::<MessageContent>)
        .map(|t| t.get_text());
    let item = banner.contents.as_ref().and_then(parse_chat_item).map(Box::new);

    ChatAction::AddBanner {
        action_id: banner.action_id,
        target_id: banner.target_id,
        title,
        item,
    }
}

fn parse_ticker(action: AddLiveChatTickerItemAction) -> Option<ChatAction> {
    let (renderer_name, renderer) = action.item.iter().next()?;
    let ticker: TickerItemRenderer = decode(renderer)?;

    Some(ChatAction::AddTicker {
        id: ticker.id,
        author_channel_id: ticker.author_external_channel_id,
        duration_sec: action.duration_sec.as_ref().and_then(value_as_u64),
        full_duration_sec: ticker.full_duration_sec.as_ref().and_then(value_as_u64),
        renderer: renderer_name.clone(),
    })
}

/// 数値または数値文字列をu64に変換
fn value_as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn meta(id: String, timestamp_usec: &Option<String>, author: AuthorFields) -> ItemMeta {
    ItemMeta {
        id,
        author: parse_author(author),
        timestamp: parse_timestamp(timestamp_usec),
        video_offset_ms: None,
    }
}

/// 投稿者情報とバッジをパース
fn parse_author(fields: AuthorFields) -> Author {
    let mut author = Author {
        name: fields
            .author_name
            .map(|n| n.get_text())
            .filter(|n| !n.is_empty()),
        channel_id: fields.author_external_channel_id,
        photo_url: fields.author_photo.as_ref().and_then(ThumbnailContainer::first_url),
        ..Default::default()
    };

    for badge in fields.author_badges.iter().flatten() {
        let Some(renderer) = &badge.live_chat_author_badge_renderer else {
            continue;
        };
        if let Some(icon) = &renderer.icon {
            match icon.icon_type.as_str() {
                "OWNER" => author.is_owner = true,
                "MODERATOR" => author.is_moderator = true,
                "VERIFIED" => author.is_verified = true,
                _ => {}
            }
        }
        // カスタムサムネイルがある場合はメンバー
        if renderer.custom_thumbnail.is_some() {
            author.membership = Some(renderer.tooltip.clone().unwrap_or_default());
        }
    }

    author
}

/// runs配列をMessageRunリストに変換
fn parse_runs(content: Option<&MessageContent>) -> Vec<MessageRun> {
    let Some(content) = content else {
        return Vec::new();
    };
    if let Some(text) = &content.simple_text {
        return vec![MessageRun::text(text.clone())];
    }

    let mut parsed = Vec::new();
    for run in content.runs.iter().flatten() {
        if let Some(emoji) = &run.emoji {
            // 空のemoji_idは無効なのでスキップ
            if emoji.emoji_id.is_empty() {
                log::debug!("Skipping emoji with empty emoji_id");
                continue;
            }
            parsed.push(MessageRun::Emoji {
                emoji: EmojiInfo {
                    emoji_id: emoji.emoji_id.clone(),
                    shortcuts: emoji.shortcuts.clone().unwrap_or_default(),
                    image_url: emoji.image.as_ref().and_then(ThumbnailContainer::first_url),
                    is_custom_emoji: emoji.is_custom_emoji.unwrap_or(false),
                },
            });
        } else if let Some(text) = &run.text {
            parsed.push(MessageRun::Text {
                text: text.clone(),
                bold: run.bold,
            });
        }
    }
    parsed
}

/// タイムスタンプをパース（マイクロ秒 -> DateTime<Utc>）
/// 頻繁に呼ばれるため、パース失敗時のログはdebugレベル
fn parse_timestamp(timestamp_usec: &Option<String>) -> Option<DateTime<Utc>> {
    let ts = timestamp_usec.as_ref()?;
    match ts.parse::<i64>() {
        Ok(usec) => Utc.timestamp_micros(usec).single(),
        Err(e) => {
            log::debug!("Failed to parse timestamp '{}': {}", ts, e);
            None
        }
    }
}

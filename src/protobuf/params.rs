//! リクエストパラメータ / continuationトークンの組み立て
//!
//! 送信・削除・モデレーションのパラメータや、コンテキスト解決で
//! continuationが得られなかった場合の初期トークンをクライアント側で生成する。

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::b64::{b64encode, B64Variant};
use super::codec;
use super::token::{
    ChatOrder, FIELD_CURSOR, FIELD_ENVELOPE, FIELD_HEADER, FIELD_ORDER, FIELD_RELOAD,
};
use super::value::{PbField, PbValue};

/// チャット対象（動画IDとチャンネルIDの組）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub video_id: String,
    pub channel_id: String,
}

impl ChatTarget {
    pub fn new(video_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// モデレーション操作の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationOp {
    /// ユーザーを非表示
    Hide,
    /// 非表示を解除
    Unhide,
    /// 一時的なタイムアウト（300秒）
    Timeout,
}

impl ModerationOp {
    fn field(&self) -> u64 {
        match self {
            ModerationOp::Unhide => 4,
            ModerationOp::Hide => 5,
            ModerationOp::Timeout => 6,
        }
    }
}

fn ld(number: u64, fields: Vec<PbField>) -> PbField {
    PbField::new(number, PbValue::Message(fields))
}

fn st(number: u64, text: &str) -> PbField {
    PbField::new(number, PbValue::String(text.to_string()))
}

fn vt(number: u64, n: u64) -> PbField {
    PbField::new(number, PbValue::Varint(n))
}

fn encode_fields(fields: Vec<PbField>) -> Vec<u8> {
    codec::encode(&PbValue::Message(fields))
}

/// {1: {5: {1: channelId, 2: videoId}}}
fn target_field(target: &ChatTarget) -> PbField {
    ld(
        1,
        vec![ld(
            5,
            vec![st(1, &target.channel_id), st(2, &target.video_id)],
        )],
    )
}

/// continuationに埋め込むチャット対象ヘッダー（標準base64）
pub fn header(target: &ChatTarget) -> String {
    let bytes = encode_fields(vec![
        target_field(target),
        ld(3, vec![ld(48_687_757, vec![st(1, &target.video_id)])]),
        vt(4, 1),
    ]);
    STANDARD.encode(bytes)
}

/// ライブ配信用のreload continuation
pub fn live_reload_continuation(target: &ChatTarget, order: ChatOrder) -> String {
    let bytes = encode_fields(vec![ld(
        FIELD_ENVELOPE,
        vec![
            st(FIELD_HEADER, &header(target)),
            vt(FIELD_RELOAD, 1),
            ld(FIELD_ORDER, vec![vt(1, order.code())]),
        ],
    )]);
    b64encode(&bytes, B64Variant::UrlEncoded)
}

/// アーカイブ用のtimed continuation
///
/// `since_usec` 以降のチャットを要求する。`now_usec` はカーソルとして埋め込まれる。
pub fn replay_timed_continuation(
    target: &ChatTarget,
    order: ChatOrder,
    since_usec: u64,
    now_usec: u64,
) -> String {
    let bytes = encode_fields(vec![ld(
        FIELD_ENVELOPE,
        vec![
            st(FIELD_HEADER, &header(target)),
            vt(FIELD_CURSOR, now_usec),
            vt(FIELD_RELOAD, 0),
            vt(8, 1),
            ld(
                9,
                vec![
                    vt(1, 1),
                    vt(3, 0),
                    vt(4, 0),
                    vt(10, now_usec),
                    vt(11, 3),
                    vt(15, 0),
                ],
            ),
            vt(10, now_usec),
            vt(11, since_usec),
            ld(FIELD_ORDER, vec![vt(1, order.code())]),
            vt(17, 0),
            vt(20, now_usec),
        ],
    )]);
    b64encode(&bytes, B64Variant::UrlEncoded)
}

/// メッセージ送信パラメータ
pub fn send_message_params(target: &ChatTarget) -> String {
    let bytes = encode_fields(vec![target_field(target), vt(2, 1), vt(3, 4)]);
    b64encode(&bytes, B64Variant::DoubleEncoded)
}

/// メッセージ削除パラメータ
pub fn remove_message_params(chat_id: &str, target: &ChatTarget) -> String {
    let bytes = encode_fields(vec![
        target_field(target),
        ld(2, vec![st(1, chat_id)]),
        vt(10, 2),
        vt(11, 1),
    ]);
    b64encode(&bytes, B64Variant::DoubleEncoded)
}

/// ユーザーに対するモデレーションパラメータ
///
/// チャンネルIDの `UC` プレフィックスは取り除いて埋め込む。
pub fn moderation_params(op: ModerationOp, channel_id: &str, target: &ChatTarget) -> String {
    let stripped = channel_id.strip_prefix("UC").unwrap_or(channel_id);
    let bytes = encode_fields(vec![
        target_field(target),
        ld(op.field(), vec![st(1, stripped)]),
        vt(10, 2),
        vt(11, 1),
    ]);
    b64encode(&bytes, B64Variant::DoubleEncoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protobuf::b64::b64decode;

    fn target() -> ChatTarget {
        ChatTarget::new("foo", "bar")
    }

    #[test]
    fn test_header() {
        assert_eq!(header(&target()), "CgwqCgoDYmFyEgNmb28aC+qo3bkBBQoDZm9vIAE=");
    }

    #[test]
    fn test_live_reload_continuation_top() {
        assert_eq!(
            live_reload_continuation(&target(), ChatOrder::Top),
            "0ofMyAMxGihDZ3dxQ2dvRFltRnlFZ05tYjI4YUMrcW8zYmtCQlFvRFptOXZJQUU9MAGCAQIIBA%3D%3D"
        );
    }

    #[test]
    fn test_send_message_params_structure() {
        let params = send_message_params(&target());
        let bytes = b64decode(&params, B64Variant::DoubleEncoded).unwrap();
        let value = codec::decode(&bytes).unwrap();

        assert_eq!(value.get_path(&[1, 5, 1]).and_then(|v| v.as_text()).as_deref(), Some("bar"));
        assert_eq!(value.get_path(&[1, 5, 2]).and_then(|v| v.as_text()).as_deref(), Some("foo"));
        assert_eq!(value.get(2).and_then(|v| v.as_u64()), Some(1));
        assert_eq!(value.get(3).and_then(|v| v.as_u64()), Some(4));
    }

    #[test]
    fn test_moderation_params_strip_channel_prefix() {
        let params = moderation_params(ModerationOp::Hide, "UCabc", &target());
        let bytes = b64decode(&params, B64Variant::DoubleEncoded).unwrap();
        let value = codec::decode(&bytes).unwrap();

        assert_eq!(value.get_path(&[5, 1]).and_then(|v| v.as_text()).as_deref(), Some("abc"));
        assert_eq!(value.get(10).and_then(|v| v.as_u64()), Some(2));
    }

    #[test]
    fn test_remove_message_params_carries_chat_id() {
        let params = remove_message_params("chat-1", &target());
        let bytes = b64decode(&params, B64Variant::DoubleEncoded).unwrap();
        let value = codec::decode(&bytes).unwrap();
        assert_eq!(
            value.get_path(&[2, 1]).and_then(|v| v.as_text()).as_deref(),
            Some("chat-1")
        );
    }
}

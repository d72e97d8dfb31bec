//! continuationトークンの型付きビュー
//!
//! トークン内部は外側フィールド（119693434）に包まれたメッセージで、
//! このクライアントが意味を持つのは次のフィールドのみ:
//! - 3: チャット対象ヘッダー（標準base64文字列）
//! - 5: カーソル（マイクロ秒タイムスタンプ）
//! - 6: reload(1) / timed(0) の判別子
//! - 16.1: 並び順（4 = トップチャット, 1 = すべてのチャット）
//!
//! それ以外のフィールドは変更せずにそのまま再エンコードされる。

use super::b64::{b64decode, b64encode, B64Variant};
use super::codec;
use super::value::PbValue;
use super::CodecError;

pub(crate) const FIELD_ENVELOPE: u64 = 119_693_434;
pub(crate) const FIELD_HEADER: u64 = 3;
pub(crate) const FIELD_CURSOR: u64 = 5;
pub(crate) const FIELD_RELOAD: u64 = 6;
pub(crate) const FIELD_ORDER: u64 = 16;

/// continuation種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationKind {
    Reload,
    Timed,
}

/// チャットの並び順
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatOrder {
    /// トップチャット（フィルタ済み）
    Top,
    /// すべてのチャット
    #[default]
    All,
}

impl ChatOrder {
    pub fn from_top(top: bool) -> Self {
        if top {
            ChatOrder::Top
        } else {
            ChatOrder::All
        }
    }

    pub(crate) fn code(&self) -> u64 {
        match self {
            ChatOrder::Top => 4,
            ChatOrder::All => 1,
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            4 => Some(ChatOrder::Top),
            1 => Some(ChatOrder::All),
            _ => None,
        }
    }
}

/// デコード済みcontinuationトークン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken {
    root: PbValue,
    variant: B64Variant,
}

impl ContinuationToken {
    /// トークン文字列をデコード
    pub fn parse(token: &str, variant: B64Variant) -> Result<Self, CodecError> {
        let bytes = b64decode(token, variant)?;
        let root = codec::decode(&bytes)?;
        Ok(Self { root, variant })
    }

    pub fn from_value(root: PbValue, variant: B64Variant) -> Self {
        Self { root, variant }
    }

    pub fn root(&self) -> &PbValue {
        &self.root
    }

    pub fn variant(&self) -> B64Variant {
        self.variant
    }

    fn envelope(&self) -> Option<&PbValue> {
        self.root.get(FIELD_ENVELOPE)
    }

    /// reload / timed の判別（外側フィールドがないトークンはNone）
    pub fn kind(&self) -> Option<ContinuationKind> {
        let envelope = self.envelope()?;
        match envelope.get(FIELD_RELOAD).and_then(|v| v.as_u64()) {
            Some(1) => Some(ContinuationKind::Reload),
            Some(_) => Some(ContinuationKind::Timed),
            None if envelope.get(FIELD_CURSOR).is_some() => Some(ContinuationKind::Timed),
            None => None,
        }
    }

    pub fn cursor_usec(&self) -> Option<u64> {
        self.envelope()?.get(FIELD_CURSOR)?.as_u64()
    }

    pub fn chat_order(&self) -> Option<ChatOrder> {
        self.envelope()?
            .get_path(&[FIELD_ORDER, 1])?
            .as_u64()
            .and_then(ChatOrder::from_code)
    }

    /// ヘッダー文字列（標準base64）
    pub fn header(&self) -> Option<String> {
        self.envelope()?.get(FIELD_HEADER)?.as_text()
    }

    /// カーソルを差し替えた新しいトークン
    pub fn with_cursor(&self, usec: u64) -> Self {
        self.with_envelope_path(&[FIELD_CURSOR], PbValue::Varint(usec))
    }

    /// 並び順を差し替えた新しいトークン
    pub fn with_chat_order(&self, order: ChatOrder) -> Self {
        self.with_envelope_path(&[FIELD_ORDER, 1], PbValue::Varint(order.code()))
    }

    fn with_envelope_path(&self, path: &[u64], value: PbValue) -> Self {
        let mut full = vec![FIELD_ENVELOPE];
        full.extend_from_slice(path);
        Self {
            root: self.root.with_path(&full, value),
            variant: self.variant,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode(&self.root)
    }

    /// 元のバリアントでエンコード
    pub fn encode(&self) -> String {
        b64encode(&self.to_bytes(), self.variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protobuf::params::{live_reload_continuation, replay_timed_continuation, ChatTarget};

    fn target() -> ChatTarget {
        ChatTarget::new("foo", "bar")
    }

    #[test]
    fn test_reload_token_fields() {
        let raw = live_reload_continuation(&target(), ChatOrder::Top);
        let token = ContinuationToken::parse(&raw, B64Variant::UrlEncoded).unwrap();

        assert_eq!(token.kind(), Some(ContinuationKind::Reload));
        assert_eq!(token.chat_order(), Some(ChatOrder::Top));
        assert_eq!(token.cursor_usec(), None);
        assert_eq!(
            token.header().as_deref(),
            Some("CgwqCgoDYmFyEgNmb28aC+qo3bkBBQoDZm9vIAE=")
        );
        // 無変更なら同じ文字列に戻る
        assert_eq!(token.encode(), raw);
    }

    #[test]
    fn test_timed_token_cursor_splice() {
        let raw = replay_timed_continuation(&target(), ChatOrder::All, 1_000_000, 2_000_000);
        let token = ContinuationToken::parse(&raw, B64Variant::UrlEncoded).unwrap();

        assert_eq!(token.kind(), Some(ContinuationKind::Timed));
        assert_eq!(token.cursor_usec(), Some(2_000_000));

        let moved = token.with_cursor(5_000_000);
        assert_eq!(moved.cursor_usec(), Some(5_000_000));
        assert_eq!(token.cursor_usec(), Some(2_000_000));

        // カーソル以外のフィールドは同一
        let before = token.root().get(FIELD_ENVELOPE).unwrap().fields();
        let after = moved.root().get(FIELD_ENVELOPE).unwrap().fields();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after) {
            if b.number != FIELD_CURSOR {
                assert_eq!(b, a);
            }
        }
    }

    #[test]
    fn test_chat_order_splice_round_trips() {
        let raw = live_reload_continuation(&target(), ChatOrder::All);
        let token = ContinuationToken::parse(&raw, B64Variant::UrlEncoded).unwrap();
        let top = token.with_chat_order(ChatOrder::Top);

        assert_eq!(top.encode(), live_reload_continuation(&target(), ChatOrder::Top));
        let reparsed = ContinuationToken::parse(&top.encode(), B64Variant::UrlEncoded).unwrap();
        assert_eq!(reparsed, top);
    }

    #[test]
    fn test_foreign_token_has_no_fields() {
        let token = ContinuationToken::parse("CgNhYmMQKg", B64Variant::UrlSafe).unwrap();
        assert_eq!(token.kind(), None);
        assert_eq!(token.chat_order(), None);
        assert_eq!(token.encode(), "CgNhYmMQKg");

        let bytes = b64decode("CgNhYmMQKg", B64Variant::UrlSafe).unwrap();
        let root = codec::decode(&bytes).unwrap();
        assert_eq!(root.get(1).and_then(|v| v.as_text()).as_deref(), Some("abc"));
        assert_eq!(root.get(2).and_then(|v| v.as_u64()), Some(42));
        assert_eq!(token.root(), &root);
    }
}

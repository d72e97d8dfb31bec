//! バイナリパラメータコーデック
//!
//! continuationトークンやリクエストパラメータに埋め込まれた
//! protobuf互換のバイナリ形式を、スキーマなしでデコード・エンコードする。
//!
//! ## 注意事項
//! - 汎用protobufライブラリではない（スキーマ駆動のデコードは行わない）
//! - length-delimitedの中身はネストしたメッセージとして解釈を試み、
//!   失敗した場合は文字列/バイト列として保持する（ベストエフォート）
//! - `encode(decode(b)) == b` を常に保証する

pub mod b64;
pub mod codec;
pub mod params;
pub mod pretty;
pub mod token;
pub mod value;

pub use b64::{b64decode, b64encode, B64Variant};
pub use codec::{decode, encode};
pub use pretty::pretty;
pub use token::{ChatOrder, ContinuationKind, ContinuationToken};
pub use value::{PbField, PbValue, WireType};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed buffer: {0}")]
    MalformedBuffer(String),

    #[error("Unknown base64 variant: {0}")]
    UnknownVariant(String),

    #[error("Invalid base64 input: {0}")]
    InvalidBase64(String),

    #[error("Invalid UTF-8 in encoded token")]
    InvalidUtf8,
}

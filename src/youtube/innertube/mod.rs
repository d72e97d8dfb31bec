//! InnerTube API
//!
//! YouTubeの内部APIでライブチャットを取得・送信する。
//! レスポンスは `parser` で `ChatAction` に正規化する。
//!
//! ## 注意事項
//! - 非公式APIのため、仕様変更のリスクあり

pub mod client;
pub mod parser;
pub mod types;

pub use client::{ChatResponse, InnerTubeClient};
pub use parser::{parse_action, parse_actions};
pub use types::{ContinuationType, NextContinuation};

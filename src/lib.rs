//! YouTubeライブチャットクライアント
//!
//! - `protobuf`: continuationトークン・リクエストパラメータのコーデック
//! - `youtube`: セッション（ポーリング）とプール（複数配信の管理）
//! - `superchat`: スーパーチャットの金額・色の解析

pub mod config;
pub mod protobuf;
pub mod superchat;
pub mod util; // doctestのためpubにする
pub mod youtube;

pub use youtube::{
    ChatAction, ChatPool, ChatSession, EndReason, PoolEvent, SessionEvent, SessionOptions,
    YouTubeError,
};

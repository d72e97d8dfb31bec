//! YouTubeライブチャット
//!
//! - `session`: 1配信分のポーリングエンジン
//! - `pool`: 複数セッションの管理
//! - `innertube`: 内部APIクライアントとレスポンス正規化
//! - `context`: 視聴ページからのチャットコンテキスト解決

pub mod backoff;
pub mod context;
pub mod errors;
pub mod innertube;
pub mod policy;
pub mod pool;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{ChatContext, ContextResolver, LiveChatPageResolver};
pub use errors::{ContextErrorKind, EndReason, YouTubeError};
pub use policy::{DefaultErrorPolicy, ErrorClass, ErrorPolicy};
pub use pool::{ChatPool, PoolEvent, SubscriptionStatus};
pub use session::{ChatSession, PollStrategy, SessionEvent, SessionOptions};
pub use state::{ChatMode, SessionPhase, SessionState};
pub use transport::{Credentials, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use types::ChatAction;

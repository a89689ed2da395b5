//! Client for the reverse-engineered Messenger mobile protocols.
//!
//! Two halves, sharing one [`state::AndroidState`]:
//!
//! * [`http`] — request/response operations over `api.facebook.com` and
//!   friends: login, GraphQL doc-id calls, media upload.
//! * [`realtime`] — the long-lived MQTToT connection carrying
//!   Thrift-Compact-encoded messages, receipts, typing and the
//!   sequence-id-based delta sync queue.

pub mod http;
pub mod realtime;
pub mod state;
pub mod types;

pub use http::HttpClient;
pub use realtime::RealtimeClient;
pub use state::AndroidState;

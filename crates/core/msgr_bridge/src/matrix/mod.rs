//! The collaborator interface towards the Matrix appservice.
//!
//! The orchestrators only know this trait; the HTTP implementation in
//! [`http`] talks to the homeserver's client-server API with appservice
//! impersonation. Tests use a mock.

pub mod http;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }
    };
}

string_id!(
    /// A Matrix user id (`@local:domain`).
    UserId
);
string_id!(
    /// A Matrix room id (`!opaque:domain`).
    RoomId
);
string_id!(
    /// A Matrix event id (`$opaque`).
    EventId
);
string_id!(
    /// An `mxc://` content URI.
    ContentUri
);

/// Connection-state updates pushed into the out-of-band bridge-state channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeStateEvent {
    Connecting,
    Backfilling,
    Connected,
    TransientDisconnect,
    BadCredentials,
    UnknownError,
    LoggedOut,
}

/// Message content sent into a room on behalf of a puppet or the bot.
#[derive(Debug, Clone, PartialEq)]
pub enum EventContent {
    Text {
        body: String,
        html: Option<String>,
    },
    Notice {
        body: String,
    },
    Emote {
        body: String,
    },
    Media {
        msgtype: MediaType,
        body: String,
        uri: ContentUri,
        mimetype: Option<String>,
        size: Option<i64>,
        duration_ms: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
    Audio,
    File,
    Sticker,
}

impl MediaType {
    pub fn msgtype(self) -> &'static str {
        match self {
            MediaType::Image => "m.image",
            MediaType::Video => "m.video",
            MediaType::Audio => "m.audio",
            MediaType::File => "m.file",
            MediaType::Sticker => "m.sticker",
        }
    }

    pub fn from_mimetype(mimetype: &str) -> MediaType {
        if mimetype.starts_with("image/") {
            MediaType::Image
        } else if mimetype.starts_with("video/") {
            MediaType::Video
        } else if mimetype.starts_with("audio/") {
            MediaType::Audio
        } else {
            MediaType::File
        }
    }
}

/// A message event received from Matrix, normalized by the appservice layer.
#[derive(Debug, Clone, Default)]
pub struct MatrixMessage {
    pub msgtype: String,
    pub body: String,
    pub formatted_body: Option<String>,
    pub reply_to: Option<EventId>,
    pub is_edit: bool,
    pub media_uri: Option<ContentUri>,
    pub mimetype: Option<String>,
    pub filename: Option<String>,
    pub duration_ms: Option<i64>,
}

/// Room creation parameters.
#[derive(Debug, Clone, Default)]
pub struct CreateRoomRequest {
    pub name: Option<String>,
    pub is_direct: bool,
    pub invite: Vec<UserId>,
    pub creator: UserId,
    pub encrypted: bool,
    pub initial_state: Vec<(String, String, Value)>,
}

/// One event of an MSC2716-style history batch.
#[derive(Debug, Clone)]
pub struct BatchEvent {
    pub sender: UserId,
    pub content: EventContent,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSendResponse {
    pub event_ids: Vec<EventId>,
    /// The base insertion event, referenced by the post-backfill marker.
    pub base_insertion_event_id: Option<EventId>,
    pub next_batch_id: Option<String>,
}

/// Delivery status reported back onto the Matrix origin event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    Success,
    RetriableFailure { reason: String },
    PermanentFailure { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("homeserver request failed: {0}")]
    Http(String),

    #[error("rate limit exceeded, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: i64 },

    #[error("{0} is not supported by the homeserver")]
    Unsupported(&'static str),

    #[error("event not found")]
    NotFound,
}

/// Everything the bridge engine needs from the appservice.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatrixApi: Send + Sync {
    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomId, MatrixError>;

    async fn invite(&self, room: &RoomId, user: &UserId) -> Result<(), MatrixError>;

    async fn ensure_joined(&self, room: &RoomId, user: &UserId) -> Result<(), MatrixError>;

    async fn leave(&self, room: &RoomId, user: &UserId) -> Result<(), MatrixError>;

    async fn set_room_name(&self, room: &RoomId, name: &str) -> Result<(), MatrixError>;

    async fn set_room_avatar<'a>(&self, room: &RoomId, uri: Option<&'a ContentUri>)
        -> Result<(), MatrixError>;

    async fn send_state_event(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<EventId, MatrixError>;

    async fn send_message_event<'a>(
        &self,
        room: &RoomId,
        as_user: &UserId,
        content: &EventContent,
        in_reply_to: Option<&'a EventId>,
        timestamp: Option<i64>,
    ) -> Result<EventId, MatrixError>;

    async fn send_reaction(
        &self,
        room: &RoomId,
        as_user: &UserId,
        target: &EventId,
        key: &str,
    ) -> Result<EventId, MatrixError>;

    async fn redact(
        &self,
        room: &RoomId,
        as_user: &UserId,
        event: &EventId,
        timestamp: Option<i64>,
    ) -> Result<EventId, MatrixError>;

    async fn mark_read(
        &self,
        room: &RoomId,
        as_user: &UserId,
        event: &EventId,
    ) -> Result<(), MatrixError>;

    async fn set_typing(
        &self,
        room: &RoomId,
        as_user: &UserId,
        typing: bool,
    ) -> Result<(), MatrixError>;

    async fn set_presence(&self, user: &UserId, online: bool) -> Result<(), MatrixError>;

    async fn set_displayname(&self, user: &UserId, name: &str) -> Result<(), MatrixError>;

    async fn set_avatar_url(&self, user: &UserId, uri: &ContentUri) -> Result<(), MatrixError>;

    async fn register_puppet(&self, localpart: &str) -> Result<UserId, MatrixError>;

    async fn upload_media(
        &self,
        data: Vec<u8>,
        mimetype: &str,
        filename: &str,
    ) -> Result<ContentUri, MatrixError>;

    async fn download_media(&self, uri: &ContentUri) -> Result<Vec<u8>, MatrixError>;

    /// Whether [`MatrixApi::batch_send`] may be used.
    fn supports_batch_send(&self) -> bool;

    async fn batch_send<'a>(
        &self,
        room: &RoomId,
        prev_event: &EventId,
        batch_id: Option<&'a str>,
        events: Vec<BatchEvent>,
    ) -> Result<BatchSendResponse, MatrixError>;

    /// Report delivery status of a Matrix-origin event.
    async fn send_message_status(
        &self,
        room: &RoomId,
        event: &EventId,
        status: SendStatus,
    ) -> Result<(), MatrixError>;

    /// Push a connection-state ping into the bridge-state channel.
    async fn send_bridge_state(
        &self,
        user: &UserId,
        state: BridgeStateEvent,
        message: Option<String>,
    ) -> Result<(), MatrixError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_from_mimetype() {
        assert_eq!(MediaType::from_mimetype("image/png"), MediaType::Image);
        assert_eq!(MediaType::from_mimetype("video/mp4"), MediaType::Video);
        assert_eq!(MediaType::from_mimetype("audio/ogg"), MediaType::Audio);
        assert_eq!(MediaType::from_mimetype("application/zip"), MediaType::File);
    }

    #[test]
    fn ids_serialize_transparently()  {
        let user = UserId::new("@facebook_123:example.com");
        assert_eq!(
            serde_json::to_string(&user).unwrap(),
            "\"@facebook_123:example.com\"",
        );
    }
}

use crate::types::AddMember;
use crate::types::AvatarChange;
use crate::types::DeliveryReceipt;
use crate::types::ExtendedMessage;
use crate::types::ForcedFetch;
use crate::types::Message;
use crate::types::MessageSyncError;
use crate::types::NameChange;
use crate::types::OwnReadReceipt;
use crate::types::Presence;
use crate::types::Reaction;
use crate::types::ReadReceipt;
use crate::types::RemoveMember;
use crate::types::ThreadChange;
use crate::types::TypingNotification;
use crate::types::UnsendMessage;

/// A typed event delivered by the realtime listener.
///
/// Delta events preserve the order in which they appeared in the sync
/// payload; the dispatcher consumes them strictly in sequence.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// The connection is up and the sync queue has been requested.
    Connected,
    /// The connection dropped; the listener will retry unless stopped.
    Disconnected { reason: String },
    /// The server advanced the delta queue sequence id.
    SeqIdUpdated(i64),
    /// A fresh region hint to persist into the session.
    RegionHintUpdated(String),
    Message(Message),
    ExtendedMessage(Box<ExtendedMessage>),
    Reaction(Reaction),
    UnsendMessage(UnsendMessage),
    ReadReceipt(ReadReceipt),
    OwnReadReceipt(OwnReadReceipt),
    AddMember(AddMember),
    RemoveMember(RemoveMember),
    NameChange(NameChange),
    AvatarChange(AvatarChange),
    ThreadChange(ThreadChange),
    ForcedFetch(ForcedFetch),
    DeliveryReceipt(DeliveryReceipt),
    Typing(TypingNotification),
    Presence(Presence),
    /// Terminal error of the server-side delta queue; the listener stops.
    SyncError(MessageSyncError),
}

/// Errors terminating or refusing a realtime session.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("MQTT connection refused: not logged in")]
    NotLoggedIn,

    #[error("connection failed {0} times")]
    NotConnected(u32),

    #[error("realtime client is not connected")]
    NotRunning,

    #[error("no response received before the connection closed")]
    ResponseLost,

    #[error(transparent)]
    Transport(#[from] mqttot::MqttotError),

    #[error(transparent)]
    Thrift(#[from] thrift_compact::ThriftError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

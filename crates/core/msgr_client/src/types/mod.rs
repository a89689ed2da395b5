pub mod client_info;
pub mod graphql;
pub mod login;
pub mod message_sync;
pub mod requests;

pub use client_info::PhpOverride;
pub use client_info::RealtimeClientInfo;
pub use client_info::RealtimeConfig;
pub use login::LoginResponse;
pub use login::MobileConfig;
pub use login::PasswordKeyResponse;
pub use message_sync::AddMember;
pub use message_sync::AddMemberParticipant;
pub use message_sync::Attachment;
pub use message_sync::AudioInfo;
pub use message_sync::AvatarChange;
pub use message_sync::DeliveryReceipt;
pub use message_sync::ExtendedMessage;
pub use message_sync::ForcedFetch;
pub use message_sync::ImageInfo;
pub use message_sync::Mention;
pub use message_sync::Message;
pub use message_sync::MessageMetadata;
pub use message_sync::MessageSyncError;
pub use message_sync::MessageSyncEvent;
pub use message_sync::MessageSyncPayload;
pub use message_sync::NameChange;
pub use message_sync::OwnReadReceipt;
pub use message_sync::Presence;
pub use message_sync::PresenceInfo;
pub use message_sync::Reaction;
pub use message_sync::ReadReceipt;
pub use message_sync::RegionHint;
pub use message_sync::RegionHintPayload;
pub use message_sync::RemoveMember;
pub use message_sync::SendMessageResponse;
pub use message_sync::ThreadChange;
pub use message_sync::ThreadKey;
pub use message_sync::TypingNotification;
pub use message_sync::UnsendMessage;
pub use message_sync::VideoInfo;
pub use requests::MarkReadRequest;
pub use requests::ResumeQueueRequest;
pub use requests::SendMessageRequest;
pub use requests::SetTypingRequest;

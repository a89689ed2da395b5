//! Thrift payloads delivered on the message-sync topic.
//!
//! One [`MessageSyncPayload`] carries a batch of [`MessageSyncEvent`]s; each
//! event has exactly one of its delta fields set. Reactions, replies and
//! unsends arrive wrapped in an inner Thrift blob (`client_payload`).

use serde::Deserialize;
use serde::Serialize;
use thrift_compact::require;
use thrift_compact::Fields;
use thrift_compact::FieldSpec;
use thrift_compact::Kind;
use thrift_compact::StructSpec;
use thrift_compact::ThriftError;
use thrift_compact::ThriftStruct;
use thrift_compact::ThriftWriter;

/// Key of a thread: either a DM peer or a group thread id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadKey {
    pub other_user_id: Option<i64>,
    pub thread_fbid: Option<i64>,
}

static THREAD_KEY_SPEC: StructSpec = StructSpec {
    name: "ThreadKey",
    fields: &[
        FieldSpec { id: 1, name: "other_user_id", kind: &Kind::I64 },
        FieldSpec { id: 2, name: "thread_fbid", kind: &Kind::I64 },
    ],
};

impl ThreadKey {
    pub fn id(&self) -> Option<i64> {
        self.other_user_id.or(self.thread_fbid)
    }

    pub fn is_group(&self) -> bool {
        self.thread_fbid.is_some()
    }
}

impl ThriftStruct for ThreadKey {
    fn spec() -> &'static StructSpec {
        &THREAD_KEY_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(ThreadKey {
            other_user_id: fields.take_i64(1),
            thread_fbid: fields.take_i64(2),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        if let Some(id) = self.other_user_id {
            writer.field_i64(1, id);
        }
        if let Some(id) = self.thread_fbid {
            writer.field_i64(2, id);
        }
    }
}

/// Whether the sender may unsend a message, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsendability {
    CanUnsend,
    DenyForNonSender,
    DenyLogMessage,
    Unknown(String),
}

impl From<String> for Unsendability {
    fn from(value: String) -> Self {
        match value.as_str() {
            "can_unsend" => Unsendability::CanUnsend,
            "deny_for_non_sender" => Unsendability::DenyForNonSender,
            "deny_log_message" => Unsendability::DenyLogMessage,
            _ => Unsendability::Unknown(value),
        }
    }
}

/// Common metadata shared by every message-like delta.
#[derive(Debug, Clone, Default)]
pub struct MessageMetadata {
    pub thread: ThreadKey,
    pub id: String,
    pub offline_threading_id: Option<i64>,
    pub sender: i64,
    pub timestamp: i64,
    pub should_buzz_device: bool,
    pub admin_text: Option<String>,
    pub tags: Vec<String>,
    pub message_unsendability: Option<Unsendability>,
    pub snippet: Option<String>,
}

static MESSAGE_METADATA_SPEC: StructSpec = StructSpec {
    name: "MessageMetadata",
    fields: &[
        FieldSpec { id: 1, name: "thread", kind: &Kind::Struct(ThreadKey::spec) },
        FieldSpec { id: 2, name: "id", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "offline_threading_id", kind: &Kind::I64 },
        FieldSpec { id: 4, name: "sender", kind: &Kind::I64 },
        FieldSpec { id: 5, name: "timestamp", kind: &Kind::I64 },
        FieldSpec { id: 6, name: "should_buzz_device", kind: &Kind::Bool },
        FieldSpec { id: 7, name: "admin_text", kind: &Kind::Utf8 },
        FieldSpec { id: 8, name: "tags", kind: &Kind::List(&Kind::Utf8) },
        FieldSpec { id: 9, name: "thread_read_state_effect", kind: &Kind::I32 },
        FieldSpec { id: 10, name: "skip_bump_thread", kind: &Kind::Bool },
        FieldSpec { id: 11, name: "skip_snippet_update", kind: &Kind::Bool },
        FieldSpec { id: 12, name: "message_unsendability", kind: &Kind::Utf8 },
        FieldSpec { id: 13, name: "snippet", kind: &Kind::Utf8 },
    ],
};

impl ThriftStruct for MessageMetadata {
    fn spec() -> &'static StructSpec {
        &MESSAGE_METADATA_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(MessageMetadata {
            thread: fields.take_struct(1)?.unwrap_or_default(),
            id: require(fields.take_str(2), "MessageMetadata", "id")?,
            offline_threading_id: fields.take_i64(3),
            sender: fields.take_i64(4).unwrap_or_default(),
            timestamp: fields.take_i64(5).unwrap_or_default(),
            should_buzz_device: fields.take_bool(6).unwrap_or_default(),
            admin_text: fields.take_str(7),
            tags: fields.take_str_list(8).unwrap_or_default(),
            message_unsendability: fields.take_str(12).map(Unsendability::from),
            snippet: fields.take_str(13),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.thread);
        writer.field_string(2, &self.id);
        if let Some(oti) = self.offline_threading_id {
            writer.field_i64(3, oti);
        }
        writer.field_i64(4, self.sender);
        writer.field_i64(5, self.timestamp);
        writer.field_bool(6, self.should_buzz_device);
        if let Some(text) = &self.admin_text {
            writer.field_string(7, text);
        }
        writer.field_str_list(8, &self.tags);
        if let Some(snippet) = &self.snippet {
            writer.field_string(13, snippet);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageInfo {
    pub original_width: i32,
    pub original_height: i32,
    pub uri_map: Vec<(i32, String)>,
    pub raw_image_uri: Option<String>,
    pub animated_uri_map: Vec<(i32, String)>,
    pub image_type: Option<String>,
    pub render_as_sticker: bool,
    pub mini_preview: Option<Vec<u8>>,
}

static IMAGE_INFO_SPEC: StructSpec = StructSpec {
    name: "ImageInfo",
    fields: &[
        FieldSpec { id: 1, name: "original_width", kind: &Kind::I32 },
        FieldSpec { id: 2, name: "original_height", kind: &Kind::I32 },
        FieldSpec { id: 3, name: "uri_map", kind: &Kind::Map(&Kind::I32, &Kind::Utf8) },
        FieldSpec { id: 4, name: "image_source", kind: &Kind::I32 },
        FieldSpec { id: 5, name: "raw_image_uri", kind: &Kind::Utf8 },
        FieldSpec { id: 6, name: "raw_image_uri_format", kind: &Kind::Utf8 },
        FieldSpec { id: 7, name: "animated_uri_map", kind: &Kind::Map(&Kind::I32, &Kind::Utf8) },
        FieldSpec { id: 8, name: "image_type", kind: &Kind::Utf8 },
        FieldSpec { id: 9, name: "animated_image_type", kind: &Kind::Utf8 },
        FieldSpec { id: 10, name: "render_as_sticker", kind: &Kind::Bool },
        FieldSpec { id: 11, name: "mini_preview", kind: &Kind::Bytes },
        FieldSpec { id: 12, name: "blurred_image_uri", kind: &Kind::Utf8 },
    ],
};

impl ImageInfo {
    /// The largest image variant the server offered.
    pub fn best_uri(&self) -> Option<&str> {
        self.uri_map
            .iter()
            .max_by_key(|(size, _)| *size)
            .map(|(_, uri)| uri.as_str())
            .or(self.raw_image_uri.as_deref())
    }
}

impl ThriftStruct for ImageInfo {
    fn spec() -> &'static StructSpec {
        &IMAGE_INFO_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(ImageInfo {
            original_width: fields.take_i32(1).unwrap_or_default(),
            original_height: fields.take_i32(2).unwrap_or_default(),
            uri_map: fields.take_i32_str_map(3).unwrap_or_default(),
            raw_image_uri: fields.take_str(5),
            animated_uri_map: fields.take_i32_str_map(7).unwrap_or_default(),
            image_type: fields.take_str(8),
            render_as_sticker: fields.take_bool(10).unwrap_or_default(),
            mini_preview: fields.take_bytes(11),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_i32(1, self.original_width);
        writer.field_i32(2, self.original_height);
        if let Some(uri) = &self.raw_image_uri {
            writer.field_string(5, uri);
        }
        writer.field_bool(10, self.render_as_sticker);
    }
}

#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
    pub original_width: i32,
    pub original_height: i32,
    pub duration_ms: i32,
    pub thumbnail_url: Option<String>,
    pub download_url: Option<String>,
}

static VIDEO_INFO_SPEC: StructSpec = StructSpec {
    name: "VideoInfo",
    fields: &[
        FieldSpec { id: 1, name: "original_width", kind: &Kind::I32 },
        FieldSpec { id: 2, name: "original_height", kind: &Kind::I32 },
        FieldSpec { id: 3, name: "duration_ms", kind: &Kind::I32 },
        FieldSpec { id: 4, name: "thumbnail_url", kind: &Kind::Utf8 },
        FieldSpec { id: 5, name: "download_url", kind: &Kind::Utf8 },
        FieldSpec { id: 6, name: "source", kind: &Kind::I32 },
        FieldSpec { id: 7, name: "rotation", kind: &Kind::I32 },
        FieldSpec { id: 8, name: "loop_count", kind: &Kind::I32 },
    ],
};

impl ThriftStruct for VideoInfo {
    fn spec() -> &'static StructSpec {
        &VIDEO_INFO_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(VideoInfo {
            original_width: fields.take_i32(1).unwrap_or_default(),
            original_height: fields.take_i32(2).unwrap_or_default(),
            duration_ms: fields.take_i32(3).unwrap_or_default(),
            thumbnail_url: fields.take_str(4),
            download_url: fields.take_str(5),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_i32(1, self.original_width);
        writer.field_i32(2, self.original_height);
        writer.field_i32(3, self.duration_ms);
        if let Some(url) = &self.thumbnail_url {
            writer.field_string(4, url);
        }
        if let Some(url) = &self.download_url {
            writer.field_string(5, url);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AudioInfo {
    pub is_voicemail: bool,
    pub call_id: Option<String>,
    pub url: Option<String>,
    pub duration_ms: i32,
    pub sampling_frequency_hz: i32,
    /// Waveform samples use the vendor FLOAT extension.
    pub waveform: Vec<f32>,
}

static AUDIO_INFO_SPEC: StructSpec = StructSpec {
    name: "AudioInfo",
    fields: &[
        FieldSpec { id: 1, name: "is_voicemail", kind: &Kind::Bool },
        FieldSpec { id: 2, name: "call_id", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "url", kind: &Kind::Utf8 },
        FieldSpec { id: 4, name: "duration_ms", kind: &Kind::I32 },
        FieldSpec { id: 5, name: "sampling_frequency_hz", kind: &Kind::I32 },
        FieldSpec { id: 6, name: "waveform", kind: &Kind::List(&Kind::Float) },
    ],
};

impl ThriftStruct for AudioInfo {
    fn spec() -> &'static StructSpec {
        &AUDIO_INFO_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(AudioInfo {
            is_voicemail: fields.take_bool(1).unwrap_or_default(),
            call_id: fields.take_str(2),
            url: fields.take_str(3),
            duration_ms: fields.take_i32(4).unwrap_or_default(),
            sampling_frequency_hz: fields.take_i32(5).unwrap_or_default(),
            waveform: fields.take_f32_list(6).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_bool(1, self.is_voicemail);
        if let Some(call_id) = &self.call_id {
            writer.field_string(2, call_id);
        }
        if let Some(url) = &self.url {
            writer.field_string(3, url);
        }
        writer.field_i32(4, self.duration_ms);
        writer.field_i32(5, self.sampling_frequency_hz);
        writer.field_f32_list(6, &self.waveform);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub media_id_str: String,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub media_id: Option<i64>,
    pub file_size: Option<i64>,
    pub extensible_media: Option<String>,
    pub image_info: Option<ImageInfo>,
    pub video_info: Option<VideoInfo>,
    pub audio_info: Option<AudioInfo>,
    pub extra_metadata: Vec<(String, String)>,
}

static ATTACHMENT_SPEC: StructSpec = StructSpec {
    name: "Attachment",
    fields: &[
        FieldSpec { id: 1, name: "media_id_str", kind: &Kind::Utf8 },
        FieldSpec { id: 2, name: "mime_type", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "file_name", kind: &Kind::Utf8 },
        FieldSpec { id: 4, name: "media_id", kind: &Kind::I64 },
        FieldSpec { id: 5, name: "file_size", kind: &Kind::I64 },
        FieldSpec { id: 7, name: "extensible_media", kind: &Kind::Utf8 },
        FieldSpec { id: 10, name: "image_info", kind: &Kind::Struct(ImageInfo::spec) },
        FieldSpec { id: 11, name: "video_info", kind: &Kind::Struct(VideoInfo::spec) },
        FieldSpec { id: 12, name: "audio_info", kind: &Kind::Struct(AudioInfo::spec) },
        FieldSpec { id: 13, name: "extra_metadata", kind: &Kind::Map(&Kind::Utf8, &Kind::Utf8) },
    ],
};

impl ThriftStruct for Attachment {
    fn spec() -> &'static StructSpec {
        &ATTACHMENT_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(Attachment {
            media_id_str: fields.take_str(1).unwrap_or_default(),
            mime_type: fields.take_str(2),
            file_name: fields.take_str(3),
            media_id: fields.take_i64(4),
            file_size: fields.take_i64(5),
            extensible_media: fields.take_str(7),
            image_info: fields.take_struct(10)?,
            video_info: fields.take_struct(11)?,
            audio_info: fields.take_struct(12)?,
            extra_metadata: fields.take_str_map(13).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_string(1, &self.media_id_str);
        if let Some(mime) = &self.mime_type {
            writer.field_string(2, mime);
        }
        if let Some(name) = &self.file_name {
            writer.field_string(3, name);
        }
        if let Some(id) = self.media_id {
            writer.field_i64(4, id);
        }
        if let Some(size) = self.file_size {
            writer.field_i64(5, size);
        }
        if let Some(media) = &self.extensible_media {
            writer.field_string(7, media);
        }
        if let Some(info) = &self.image_info {
            writer.field_struct(10, info);
        }
        if let Some(info) = &self.video_info {
            writer.field_struct(11, info);
        }
        if let Some(info) = &self.audio_info {
            writer.field_struct(12, info);
        }
        if !self.extra_metadata.is_empty() {
            writer.field_str_map(13, &self.extra_metadata);
        }
    }
}

/// A user mention inside a message body, serialized as JSON in
/// `extra_metadata["prng"]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mention {
    #[serde(rename = "o")]
    pub offset: i32,
    #[serde(rename = "l")]
    pub length: i32,
    #[serde(rename = "i")]
    pub user_id: String,
    #[serde(rename = "t", default = "Mention::default_type")]
    pub mention_type: String,
}

impl Mention {
    fn default_type() -> String {
        "p".to_string()
    }

    pub fn new(offset: i32, length: i32, user_id: i64) -> Self {
        Mention {
            offset,
            length,
            user_id: user_id.to_string(),
            mention_type: Self::default_type(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Message {
    pub metadata: MessageMetadata,
    pub text: Option<String>,
    pub sticker: Option<i64>,
    pub attachments: Vec<Attachment>,
    pub extra_metadata: Vec<(String, Vec<u8>)>,
}

static MESSAGE_SPEC: StructSpec = StructSpec {
    name: "Message",
    fields: &[
        FieldSpec { id: 1, name: "metadata", kind: &Kind::Struct(MessageMetadata::spec) },
        FieldSpec { id: 2, name: "text", kind: &Kind::Utf8 },
        FieldSpec { id: 4, name: "sticker", kind: &Kind::I64 },
        FieldSpec { id: 5, name: "attachments", kind: &Kind::List(&Kind::Struct(Attachment::spec)) },
        FieldSpec { id: 7, name: "extra_metadata", kind: &Kind::Map(&Kind::Utf8, &Kind::Bytes) },
    ],
};

impl Message {
    /// Mentions riding along in the `prng` metadata entry.
    pub fn mentions(&self) -> Vec<Mention> {
        self.extra_metadata
            .iter()
            .find(|(key, _)| key == "prng")
            .and_then(|(_, raw)| serde_json::from_slice(raw).ok())
            .unwrap_or_default()
    }
}

impl ThriftStruct for Message {
    fn spec() -> &'static StructSpec {
        &MESSAGE_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(Message {
            metadata: require(fields.take_struct(1)?, "Message", "metadata")?,
            text: fields.take_str(2),
            sticker: fields.take_i64(4),
            attachments: fields.take_struct_list(5)?.unwrap_or_default(),
            extra_metadata: fields.take_bytes_map(7).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.metadata);
        if let Some(text) = &self.text {
            writer.field_string(2, text);
        }
        if let Some(sticker) = self.sticker {
            writer.field_i64(4, sticker);
        }
        writer.field_struct_list(5, &self.attachments);
    }
}

/// A reply: the quoted message plus the new one.
#[derive(Debug, Clone)]
pub struct ExtendedMessage {
    pub reply_to_message: Option<Message>,
    pub message: Message,
}

static EXTENDED_MESSAGE_SPEC: StructSpec = StructSpec {
    name: "ExtendedMessage",
    fields: &[
        FieldSpec { id: 1, name: "reply_to_message", kind: &Kind::Struct(Message::spec) },
        FieldSpec { id: 2, name: "message", kind: &Kind::Struct(Message::spec) },
    ],
};

impl ThriftStruct for ExtendedMessage {
    fn spec() -> &'static StructSpec {
        &EXTENDED_MESSAGE_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(ExtendedMessage {
            reply_to_message: fields.take_struct(1)?,
            message: require(fields.take_struct(2)?, "ExtendedMessage", "message")?,
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        if let Some(reply_to) = &self.reply_to_message {
            writer.field_struct(1, reply_to);
        }
        writer.field_struct(2, &self.message);
    }
}

#[derive(Debug, Clone)]
pub struct Reaction {
    pub thread: ThreadKey,
    pub message_id: String,
    pub reaction_sender_id: i64,
    pub reaction: Option<String>,
    pub message_sender_id: i64,
}

static REACTION_SPEC: StructSpec = StructSpec {
    name: "Reaction",
    fields: &[
        FieldSpec { id: 1, name: "thread", kind: &Kind::Struct(ThreadKey::spec) },
        FieldSpec { id: 2, name: "message_id", kind: &Kind::Utf8 },
        FieldSpec { id: 4, name: "reaction_sender_id", kind: &Kind::I64 },
        FieldSpec { id: 5, name: "reaction", kind: &Kind::Utf8 },
        FieldSpec { id: 6, name: "message_sender_id", kind: &Kind::I64 },
    ],
};

impl ThriftStruct for Reaction {
    fn spec() -> &'static StructSpec {
        &REACTION_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(Reaction {
            thread: fields.take_struct(1)?.unwrap_or_default(),
            message_id: require(fields.take_str(2), "Reaction", "message_id")?,
            reaction_sender_id: fields.take_i64(4).unwrap_or_default(),
            reaction: fields.take_str(5),
            message_sender_id: fields.take_i64(6).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.thread);
        writer.field_string(2, &self.message_id);
        writer.field_i64(4, self.reaction_sender_id);
        if let Some(reaction) = &self.reaction {
            writer.field_string(5, reaction);
        }
        writer.field_i64(6, self.message_sender_id);
    }
}

#[derive(Debug, Clone)]
pub struct UnsendMessage {
    pub thread: ThreadKey,
    pub message_id: String,
    pub timestamp: i64,
    pub user_id: i64,
}

static UNSEND_MESSAGE_SPEC: StructSpec = StructSpec {
    name: "UnsendMessage",
    fields: &[
        FieldSpec { id: 1, name: "thread", kind: &Kind::Struct(ThreadKey::spec) },
        FieldSpec { id: 2, name: "message_id", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "timestamp", kind: &Kind::I64 },
        FieldSpec { id: 4, name: "user_id", kind: &Kind::I64 },
    ],
};

impl ThriftStruct for UnsendMessage {
    fn spec() -> &'static StructSpec {
        &UNSEND_MESSAGE_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(UnsendMessage {
            thread: fields.take_struct(1)?.unwrap_or_default(),
            message_id: require(fields.take_str(2), "UnsendMessage", "message_id")?,
            timestamp: fields.take_i64(3).unwrap_or_default(),
            user_id: fields.take_i64(4).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.thread);
        writer.field_string(2, &self.message_id);
        writer.field_i64(3, self.timestamp);
        writer.field_i64(4, self.user_id);
    }
}

#[derive(Debug, Clone)]
pub struct ReadReceipt {
    pub thread: ThreadKey,
    pub user_id: i64,
    pub read_at: i64,
    pub read_to: i64,
}

static READ_RECEIPT_SPEC: StructSpec = StructSpec {
    name: "ReadReceipt",
    fields: &[
        FieldSpec { id: 1, name: "thread", kind: &Kind::Struct(ThreadKey::spec) },
        FieldSpec { id: 2, name: "user_id", kind: &Kind::I64 },
        FieldSpec { id: 3, name: "read_at", kind: &Kind::I64 },
        FieldSpec { id: 4, name: "read_to", kind: &Kind::I64 },
    ],
};

impl ThriftStruct for ReadReceipt {
    fn spec() -> &'static StructSpec {
        &READ_RECEIPT_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(ReadReceipt {
            thread: fields.take_struct(1)?.unwrap_or_default(),
            user_id: fields.take_i64(2).unwrap_or_default(),
            read_at: fields.take_i64(3).unwrap_or_default(),
            read_to: fields.take_i64(4).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.thread);
        writer.field_i64(2, self.user_id);
        writer.field_i64(3, self.read_at);
        writer.field_i64(4, self.read_to);
    }
}

/// The account's own read marker, synced from another device.
#[derive(Debug, Clone)]
pub struct OwnReadReceipt {
    pub threads: Vec<ThreadKey>,
    pub read_to: i64,
    pub read_at: i64,
}

static OWN_READ_RECEIPT_SPEC: StructSpec = StructSpec {
    name: "OwnReadReceipt",
    fields: &[
        FieldSpec { id: 1, name: "threads", kind: &Kind::List(&Kind::Struct(ThreadKey::spec)) },
        FieldSpec { id: 3, name: "read_to", kind: &Kind::I64 },
        FieldSpec { id: 4, name: "read_at", kind: &Kind::I64 },
    ],
};

impl ThriftStruct for OwnReadReceipt {
    fn spec() -> &'static StructSpec {
        &OWN_READ_RECEIPT_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(OwnReadReceipt {
            threads: fields.take_struct_list(1)?.unwrap_or_default(),
            read_to: fields.take_i64(3).unwrap_or_default(),
            read_at: fields.take_i64(4).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct_list(1, &self.threads);
        writer.field_i64(3, self.read_to);
        writer.field_i64(4, self.read_at);
    }
}

#[derive(Debug, Clone)]
pub struct NameChange {
    pub metadata: MessageMetadata,
    pub new_name: String,
}

static NAME_CHANGE_SPEC: StructSpec = StructSpec {
    name: "NameChange",
    fields: &[
        FieldSpec { id: 1, name: "metadata", kind: &Kind::Struct(MessageMetadata::spec) },
        FieldSpec { id: 2, name: "new_name", kind: &Kind::Utf8 },
    ],
};

impl ThriftStruct for NameChange {
    fn spec() -> &'static StructSpec {
        &NAME_CHANGE_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(NameChange {
            metadata: require(fields.take_struct(1)?, "NameChange", "metadata")?,
            new_name: fields.take_str(2).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.metadata);
        writer.field_string(2, &self.new_name);
    }
}

#[derive(Debug, Clone)]
pub struct AvatarChange {
    pub metadata: MessageMetadata,
    pub new_avatar: Attachment,
}

static AVATAR_CHANGE_SPEC: StructSpec = StructSpec {
    name: "AvatarChange",
    fields: &[
        FieldSpec { id: 1, name: "metadata", kind: &Kind::Struct(MessageMetadata::spec) },
        FieldSpec { id: 2, name: "new_avatar", kind: &Kind::Struct(Attachment::spec) },
    ],
};

impl ThriftStruct for AvatarChange {
    fn spec() -> &'static StructSpec {
        &AVATAR_CHANGE_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(AvatarChange {
            metadata: require(fields.take_struct(1)?, "AvatarChange", "metadata")?,
            new_avatar: require(fields.take_struct(2)?, "AvatarChange", "new_avatar")?,
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.metadata);
        writer.field_struct(2, &self.new_avatar);
    }
}

/// Admin-text style changes: icon, theme, nicknames, admins.
#[derive(Debug, Clone)]
pub struct ThreadChange {
    pub metadata: MessageMetadata,
    pub action: String,
    pub action_data: Vec<(String, String)>,
}

impl ThreadChange {
    pub const ACTION_NICKNAME: &'static str = "change_thread_nickname";
    pub const ACTION_ICON: &'static str = "change_thread_icon";
    pub const ACTION_THEME: &'static str = "change_thread_theme";
    pub const ACTION_ADMINS: &'static str = "change_thread_admins";

    pub fn action_value(&self, key: &str) -> Option<&str> {
        self.action_data
            .iter()
            .find(|(data_key, _)| data_key == key)
            .map(|(_, value)| value.as_str())
    }
}

static THREAD_CHANGE_SPEC: StructSpec = StructSpec {
    name: "ThreadChange",
    fields: &[
        FieldSpec { id: 1, name: "metadata", kind: &Kind::Struct(MessageMetadata::spec) },
        FieldSpec { id: 2, name: "action", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "action_data", kind: &Kind::Map(&Kind::Utf8, &Kind::Utf8) },
    ],
};

impl ThriftStruct for ThreadChange {
    fn spec() -> &'static StructSpec {
        &THREAD_CHANGE_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(ThreadChange {
            metadata: require(fields.take_struct(1)?, "ThreadChange", "metadata")?,
            action: fields.take_str(2).unwrap_or_default(),
            action_data: fields.take_str_map(3).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.metadata);
        writer.field_string(2, &self.action);
        writer.field_str_map(3, &self.action_data);
    }
}

#[derive(Debug, Clone)]
pub struct AddMemberParticipant {
    pub id: i64,
    pub first_name: Option<String>,
    pub name: Option<String>,
}

static ADD_MEMBER_PARTICIPANT_SPEC: StructSpec = StructSpec {
    name: "AddMemberParticipant",
    fields: &[
        FieldSpec { id: 1, name: "id", kind: &Kind::I64 },
        FieldSpec { id: 2, name: "first_name", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "name", kind: &Kind::Utf8 },
    ],
};

impl ThriftStruct for AddMemberParticipant {
    fn spec() -> &'static StructSpec {
        &ADD_MEMBER_PARTICIPANT_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(AddMemberParticipant {
            id: require(fields.take_i64(1), "AddMemberParticipant", "id")?,
            first_name: fields.take_str(2),
            name: fields.take_str(3),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_i64(1, self.id);
        if let Some(first_name) = &self.first_name {
            writer.field_string(2, first_name);
        }
        if let Some(name) = &self.name {
            writer.field_string(3, name);
        }
    }
}

#[derive(Debug, Clone)]
pub struct AddMember {
    pub metadata: MessageMetadata,
    pub users: Vec<AddMemberParticipant>,
}

static ADD_MEMBER_SPEC: StructSpec = StructSpec {
    name: "AddMember",
    fields: &[
        FieldSpec { id: 1, name: "metadata", kind: &Kind::Struct(MessageMetadata::spec) },
        FieldSpec {
            id: 2,
            name: "users",
            kind: &Kind::List(&Kind::Struct(AddMemberParticipant::spec)),
        },
    ],
};

impl ThriftStruct for AddMember {
    fn spec() -> &'static StructSpec {
        &ADD_MEMBER_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(AddMember {
            metadata: require(fields.take_struct(1)?, "AddMember", "metadata")?,
            users: fields.take_struct_list(2)?.unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.metadata);
        writer.field_struct_list(2, &self.users);
    }
}

#[derive(Debug, Clone)]
pub struct RemoveMember {
    pub metadata: MessageMetadata,
    pub user_id: i64,
}

static REMOVE_MEMBER_SPEC: StructSpec = StructSpec {
    name: "RemoveMember",
    fields: &[
        FieldSpec { id: 1, name: "metadata", kind: &Kind::Struct(MessageMetadata::spec) },
        FieldSpec { id: 2, name: "user_id", kind: &Kind::I64 },
    ],
};

impl ThriftStruct for RemoveMember {
    fn spec() -> &'static StructSpec {
        &REMOVE_MEMBER_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(RemoveMember {
            metadata: require(fields.take_struct(1)?, "RemoveMember", "metadata")?,
            user_id: fields.take_i64(2).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.metadata);
        writer.field_i64(2, self.user_id);
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub thread: ThreadKey,
    pub user_id: Option<i64>,
    pub message_id_list: Vec<String>,
    pub timestamp: i64,
}

static DELIVERY_RECEIPT_SPEC: StructSpec = StructSpec {
    name: "DeliveryReceipt",
    fields: &[
        FieldSpec { id: 1, name: "thread", kind: &Kind::Struct(ThreadKey::spec) },
        FieldSpec { id: 2, name: "user_id", kind: &Kind::I64 },
        FieldSpec { id: 6, name: "message_id_list", kind: &Kind::List(&Kind::Utf8) },
        FieldSpec { id: 7, name: "timestamp", kind: &Kind::I64 },
    ],
};

impl ThriftStruct for DeliveryReceipt {
    fn spec() -> &'static StructSpec {
        &DELIVERY_RECEIPT_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(DeliveryReceipt {
            thread: fields.take_struct(1)?.unwrap_or_default(),
            user_id: fields.take_i64(2),
            message_id_list: fields.take_str_list(6).unwrap_or_default(),
            timestamp: fields.take_i64(7).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.thread);
        if let Some(user_id) = self.user_id {
            writer.field_i64(2, user_id);
        }
        writer.field_str_list(6, &self.message_id_list);
        writer.field_i64(7, self.timestamp);
    }
}

/// The server asking the client to refetch a thread over GraphQL.
#[derive(Debug, Clone, Default)]
pub struct ForcedFetch {
    pub thread: ThreadKey,
}

static FORCED_FETCH_SPEC: StructSpec = StructSpec {
    name: "ForcedFetch",
    fields: &[FieldSpec { id: 1, name: "thread", kind: &Kind::Struct(ThreadKey::spec) }],
};

impl ThriftStruct for ForcedFetch {
    fn spec() -> &'static StructSpec {
        &FORCED_FETCH_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(ForcedFetch {
            thread: fields.take_struct(1)?.unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct(1, &self.thread);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageSyncClientEvent {
    pub reaction: Option<Reaction>,
    pub extended_message: Option<ExtendedMessage>,
    pub unsend_message: Option<UnsendMessage>,
}

static MESSAGE_SYNC_CLIENT_EVENT_SPEC: StructSpec = StructSpec {
    name: "MessageSyncClientEvent",
    fields: &[
        FieldSpec { id: 10, name: "reaction", kind: &Kind::Struct(Reaction::spec) },
        FieldSpec { id: 55, name: "extended_message", kind: &Kind::Struct(ExtendedMessage::spec) },
        FieldSpec { id: 67, name: "unsend_message", kind: &Kind::Struct(UnsendMessage::spec) },
    ],
};

impl ThriftStruct for MessageSyncClientEvent {
    fn spec() -> &'static StructSpec {
        &MESSAGE_SYNC_CLIENT_EVENT_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(MessageSyncClientEvent {
            reaction: fields.take_struct(10)?,
            extended_message: fields.take_struct(55)?,
            unsend_message: fields.take_struct(67)?,
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        if let Some(reaction) = &self.reaction {
            writer.field_struct(10, reaction);
        }
        if let Some(extended) = &self.extended_message {
            writer.field_struct(55, extended);
        }
        if let Some(unsend) = &self.unsend_message {
            writer.field_struct(67, unsend);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageSyncClientPayload {
    pub items: Vec<MessageSyncClientEvent>,
}

static MESSAGE_SYNC_CLIENT_PAYLOAD_SPEC: StructSpec = StructSpec {
    name: "MessageSyncClientPayload",
    fields: &[FieldSpec {
        id: 1,
        name: "items",
        kind: &Kind::List(&Kind::Struct(MessageSyncClientEvent::spec)),
    }],
};

impl ThriftStruct for MessageSyncClientPayload {
    fn spec() -> &'static StructSpec {
        &MESSAGE_SYNC_CLIENT_PAYLOAD_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(MessageSyncClientPayload {
            items: fields.take_struct_list(1)?.unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct_list(1, &self.items);
    }
}

/// Wrapper holding the inner client payload as an opaque Thrift blob.
#[derive(Debug, Clone, Default)]
pub struct MessageSyncClientWrapper {
    pub data: Vec<u8>,
}

static MESSAGE_SYNC_CLIENT_WRAPPER_SPEC: StructSpec = StructSpec {
    name: "MessageSyncClientWrapper",
    fields: &[FieldSpec { id: 1, name: "data", kind: &Kind::Bytes }],
};

impl MessageSyncClientWrapper {
    pub fn parse(&self) -> Result<MessageSyncClientPayload, ThriftError> {
        MessageSyncClientPayload::from_thrift(&self.data)
    }
}

impl ThriftStruct for MessageSyncClientWrapper {
    fn spec() -> &'static StructSpec {
        &MESSAGE_SYNC_CLIENT_WRAPPER_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(MessageSyncClientWrapper {
            data: require(fields.take_bytes(1), "MessageSyncClientWrapper", "data")?,
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_bytes(1, &self.data);
    }
}

/// One delta in a sync payload; only one field is set per event.
#[derive(Debug, Clone, Default)]
pub struct MessageSyncEvent {
    pub message: Option<Message>,
    pub own_read_receipt: Option<OwnReadReceipt>,
    pub add_member: Option<AddMember>,
    pub remove_member: Option<RemoveMember>,
    pub name_change: Option<NameChange>,
    pub avatar_change: Option<AvatarChange>,
    pub thread_change: Option<ThreadChange>,
    pub forced_fetch: Option<ForcedFetch>,
    pub read_receipt: Option<ReadReceipt>,
    pub delivery_receipt: Option<DeliveryReceipt>,
    pub client_payload: Option<MessageSyncClientWrapper>,
}

static MESSAGE_SYNC_EVENT_SPEC: StructSpec = StructSpec {
    name: "MessageSyncEvent",
    fields: &[
        FieldSpec { id: 2, name: "message", kind: &Kind::Struct(Message::spec) },
        FieldSpec { id: 4, name: "own_read_receipt", kind: &Kind::Struct(OwnReadReceipt::spec) },
        FieldSpec { id: 8, name: "add_member", kind: &Kind::Struct(AddMember::spec) },
        FieldSpec { id: 9, name: "remove_member", kind: &Kind::Struct(RemoveMember::spec) },
        FieldSpec { id: 10, name: "name_change", kind: &Kind::Struct(NameChange::spec) },
        FieldSpec { id: 11, name: "avatar_change", kind: &Kind::Struct(AvatarChange::spec) },
        FieldSpec { id: 17, name: "thread_change", kind: &Kind::Struct(ThreadChange::spec) },
        FieldSpec { id: 18, name: "forced_fetch", kind: &Kind::Struct(ForcedFetch::spec) },
        FieldSpec { id: 19, name: "read_receipt", kind: &Kind::Struct(ReadReceipt::spec) },
        FieldSpec { id: 25, name: "delivery_receipt", kind: &Kind::Struct(DeliveryReceipt::spec) },
        FieldSpec {
            id: 42,
            name: "client_payload",
            kind: &Kind::Struct(MessageSyncClientWrapper::spec),
        },
    ],
};

impl ThriftStruct for MessageSyncEvent {
    fn spec() -> &'static StructSpec {
        &MESSAGE_SYNC_EVENT_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(MessageSyncEvent {
            message: fields.take_struct(2)?,
            own_read_receipt: fields.take_struct(4)?,
            add_member: fields.take_struct(8)?,
            remove_member: fields.take_struct(9)?,
            name_change: fields.take_struct(10)?,
            avatar_change: fields.take_struct(11)?,
            thread_change: fields.take_struct(17)?,
            forced_fetch: fields.take_struct(18)?,
            read_receipt: fields.take_struct(19)?,
            delivery_receipt: fields.take_struct(25)?,
            client_payload: fields.take_struct(42)?,
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        if let Some(message) = &self.message {
            writer.field_struct(2, message);
        }
        if let Some(receipt) = &self.own_read_receipt {
            writer.field_struct(4, receipt);
        }
        if let Some(add_member) = &self.add_member {
            writer.field_struct(8, add_member);
        }
        if let Some(remove_member) = &self.remove_member {
            writer.field_struct(9, remove_member);
        }
        if let Some(name_change) = &self.name_change {
            writer.field_struct(10, name_change);
        }
        if let Some(avatar_change) = &self.avatar_change {
            writer.field_struct(11, avatar_change);
        }
        if let Some(thread_change) = &self.thread_change {
            writer.field_struct(17, thread_change);
        }
        if let Some(forced_fetch) = &self.forced_fetch {
            writer.field_struct(18, forced_fetch);
        }
        if let Some(read_receipt) = &self.read_receipt {
            writer.field_struct(19, read_receipt);
        }
        if let Some(delivery_receipt) = &self.delivery_receipt {
            writer.field_struct(25, delivery_receipt);
        }
        if let Some(client_payload) = &self.client_payload {
            writer.field_struct(42, client_payload);
        }
    }
}

/// Terminal errors of the server-side delta queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSyncError {
    QueueOverflow,
    QueueUnderflow,
    QueueNotFound,
    Unknown(String),
}

impl From<String> for MessageSyncError {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ERROR_QUEUE_OVERFLOW" => MessageSyncError::QueueOverflow,
            "ERROR_QUEUE_UNDERFLOW" => MessageSyncError::QueueUnderflow,
            "ERROR_QUEUE_NOT_FOUND" => MessageSyncError::QueueNotFound,
            _ => MessageSyncError::Unknown(value),
        }
    }
}

impl std::fmt::Display for MessageSyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageSyncError::QueueOverflow => write!(f, "ERROR_QUEUE_OVERFLOW"),
            MessageSyncError::QueueUnderflow => write!(f, "ERROR_QUEUE_UNDERFLOW"),
            MessageSyncError::QueueNotFound => write!(f, "ERROR_QUEUE_NOT_FOUND"),
            MessageSyncError::Unknown(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageSyncPayload {
    pub items: Vec<MessageSyncEvent>,
    pub first_seq_id: Option<i64>,
    pub last_seq_id: Option<i64>,
    pub viewer: Option<i64>,
    pub subscribe_ok: Option<String>,
    pub error: Option<MessageSyncError>,
}

static MESSAGE_SYNC_PAYLOAD_SPEC: StructSpec = StructSpec {
    name: "MessageSyncPayload",
    fields: &[
        FieldSpec { id: 1, name: "items", kind: &Kind::List(&Kind::Struct(MessageSyncEvent::spec)) },
        FieldSpec { id: 2, name: "first_seq_id", kind: &Kind::I64 },
        FieldSpec { id: 3, name: "last_seq_id", kind: &Kind::I64 },
        FieldSpec { id: 4, name: "viewer", kind: &Kind::I64 },
        FieldSpec { id: 11, name: "subscribe_ok", kind: &Kind::Utf8 },
        FieldSpec { id: 12, name: "error", kind: &Kind::Utf8 },
    ],
};

impl ThriftStruct for MessageSyncPayload {
    fn spec() -> &'static StructSpec {
        &MESSAGE_SYNC_PAYLOAD_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(MessageSyncPayload {
            items: fields.take_struct_list(1)?.unwrap_or_default(),
            first_seq_id: fields.take_i64(2),
            last_seq_id: fields.take_i64(3),
            viewer: fields.take_i64(4),
            subscribe_ok: fields.take_str(11),
            error: fields.take_str(12).map(MessageSyncError::from),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_struct_list(1, &self.items);
        if let Some(seq) = self.first_seq_id {
            writer.field_i64(2, seq);
        }
        if let Some(seq) = self.last_seq_id {
            writer.field_i64(3, seq);
        }
        if let Some(viewer) = self.viewer {
            writer.field_i64(4, viewer);
        }
        if let Some(subscribe_ok) = &self.subscribe_ok {
            writer.field_string(11, subscribe_ok);
        }
        if let Some(error) = &self.error {
            writer.field_string(12, &error.to_string());
        }
    }
}

/// Acknowledgement of an outbound send, correlated by offline threading id.
#[derive(Debug, Clone, Default)]
pub struct SendMessageResponse {
    pub offline_threading_id: i64,
    pub success: bool,
    pub error_message: Option<String>,
}

static SEND_MESSAGE_RESPONSE_SPEC: StructSpec = StructSpec {
    name: "SendMessageResponse",
    fields: &[
        FieldSpec { id: 1, name: "offline_threading_id", kind: &Kind::I64 },
        FieldSpec { id: 2, name: "success", kind: &Kind::Bool },
        FieldSpec { id: 4, name: "error_message", kind: &Kind::Utf8 },
    ],
};

impl ThriftStruct for SendMessageResponse {
    fn spec() -> &'static StructSpec {
        &SEND_MESSAGE_RESPONSE_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(SendMessageResponse {
            offline_threading_id: fields.take_i64(1).unwrap_or_default(),
            success: fields.take_bool(2).unwrap_or_default(),
            error_message: fields.take_str(4),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_i64(1, self.offline_threading_id);
        writer.field_bool(2, self.success);
        if let Some(error) = &self.error_message {
            writer.field_string(4, error);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegionHint {
    pub code: String,
}

static REGION_HINT_SPEC: StructSpec = StructSpec {
    name: "RegionHint",
    fields: &[FieldSpec { id: 1, name: "code", kind: &Kind::Utf8 }],
};

impl ThriftStruct for RegionHint {
    fn spec() -> &'static StructSpec {
        &REGION_HINT_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(RegionHint {
            code: fields.take_str(1).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_string(1, &self.code);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegionHintPayload {
    pub unknown_int64: i64,
    pub region_hint_data: Vec<u8>,
}

static REGION_HINT_PAYLOAD_SPEC: StructSpec = StructSpec {
    name: "RegionHintPayload",
    fields: &[
        FieldSpec { id: 1, name: "unknown_int64", kind: &Kind::I64 },
        FieldSpec { id: 2, name: "region_hint_data", kind: &Kind::Bytes },
    ],
};

impl RegionHintPayload {
    pub fn region_hint(&self) -> Result<RegionHint, ThriftError> {
        RegionHint::from_thrift(&self.region_hint_data)
    }
}

impl ThriftStruct for RegionHintPayload {
    fn spec() -> &'static StructSpec {
        &REGION_HINT_PAYLOAD_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(RegionHintPayload {
            unknown_int64: fields.take_i64(1).unwrap_or_default(),
            region_hint_data: fields.take_bytes(2).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_i64(1, self.unknown_int64);
        writer.field_bytes(2, &self.region_hint_data);
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypingNotification {
    pub user_id: i64,
    pub typing_status: i32,
}

static TYPING_NOTIFICATION_SPEC: StructSpec = StructSpec {
    name: "TypingNotification",
    fields: &[
        FieldSpec { id: 1, name: "user_id", kind: &Kind::I64 },
        FieldSpec { id: 2, name: "typing_status", kind: &Kind::I32 },
    ],
};

impl ThriftStruct for TypingNotification {
    fn spec() -> &'static StructSpec {
        &TYPING_NOTIFICATION_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(TypingNotification {
            user_id: require(fields.take_i64(1), "TypingNotification", "user_id")?,
            typing_status: fields.take_i32(2).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_i64(1, self.user_id);
        writer.field_i32(2, self.typing_status);
    }
}

/// Presence updates arrive as JSON rather than Thrift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceInfo {
    #[serde(rename = "u")]
    pub user_id: i64,
    #[serde(rename = "p")]
    pub status: i32,
    #[serde(rename = "l", default)]
    pub last_seen: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    #[serde(rename = "list")]
    pub updates: Vec<PresenceInfo>,
    #[serde(default)]
    pub list_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_payload_roundtrip_with_client_payload() {
        let inner = MessageSyncClientPayload {
            items: vec![MessageSyncClientEvent {
                reaction: Some(Reaction {
                    thread: ThreadKey { other_user_id: Some(1), thread_fbid: None },
                    message_id: "mid.$abc".to_string(),
                    reaction_sender_id: 2,
                    reaction: Some("\u{1F44D}".to_string()),
                    message_sender_id: 3,
                }),
                ..MessageSyncClientEvent::default()
            }],
        };
        let payload = MessageSyncPayload {
            items: vec![MessageSyncEvent {
                client_payload: Some(MessageSyncClientWrapper { data: inner.to_thrift() }),
                ..MessageSyncEvent::default()
            }],
            last_seq_id: Some(777),
            ..MessageSyncPayload::default()
        };

        let decoded = MessageSyncPayload::from_thrift(&payload.to_thrift()).unwrap();
        assert_eq!(decoded.last_seq_id, Some(777));
        let wrapper = decoded.items[0].client_payload.as_ref().unwrap();
        let inner = wrapper.parse().unwrap();
        let reaction = inner.items[0].reaction.as_ref().unwrap();
        assert_eq!(reaction.message_id, "mid.$abc");
        assert_eq!(reaction.reaction.as_deref(), Some("\u{1F44D}"));
    }

    #[test]
    fn sync_error_parses_known_and_unknown() {
        assert_eq!(
            MessageSyncError::from("ERROR_QUEUE_NOT_FOUND".to_string()),
            MessageSyncError::QueueNotFound,
        );
        assert_eq!(
            MessageSyncError::from("ERROR_SOMETHING_ELSE".to_string()),
            MessageSyncError::Unknown("ERROR_SOMETHING_ELSE".to_string()),
        );
    }

    #[test]
    fn message_mentions_parse_from_prng_metadata() {
        let mut message = Message::default();
        message.extra_metadata.push((
            "prng".to_string(),
            br#"[{"o":0,"l":5,"i":"12345","t":"p"}]"#.to_vec(),
        ));
        let mentions = message.mentions();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].offset, 0);
        assert_eq!(mentions[0].user_id, "12345");
    }

    #[test]
    fn audio_waveform_floats_roundtrip() {
        let message = Message {
            metadata: MessageMetadata {
                thread: ThreadKey { other_user_id: None, thread_fbid: Some(99) },
                id: "mid.$audio".to_string(),
                sender: 5,
                timestamp: 1_650_000_000_000,
                ..MessageMetadata::default()
            },
            attachments: vec![Attachment {
                media_id_str: "123".to_string(),
                mime_type: Some("audio/mpeg".to_string()),
                audio_info: Some(AudioInfo {
                    duration_ms: 1200,
                    waveform: vec![0.0, 0.25, 0.5, 1.0],
                    ..AudioInfo::default()
                }),
                ..Attachment::default()
            }],
            ..Message::default()
        };
        let decoded = Message::from_thrift(&message.to_thrift()).unwrap();
        let audio = decoded.attachments[0].audio_info.as_ref().unwrap();
        assert_eq!(audio.waveform, vec![0.0, 0.25, 0.5, 1.0]);
    }
}

//! Thrift request payloads published on the realtime connection.

use thrift_compact::require;
use thrift_compact::Fields;
use thrift_compact::FieldSpec;
use thrift_compact::Kind;
use thrift_compact::StructSpec;
use thrift_compact::ThriftError;
use thrift_compact::ThriftStruct;
use thrift_compact::ThriftWriter;

/// Outbound text message, published to the send-message topic.
#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    /// `tfbid_<thread id>` for groups, the plain user id for DMs.
    pub chat_id: String,
    pub message: String,
    pub offline_threading_id: i64,
    pub client_tags: Vec<(String, String)>,
    pub sticker: Option<String>,
    pub media_ids: Option<Vec<String>>,
    pub sender_fbid: i64,
    pub ttl: i32,
    pub extra_metadata: Option<Vec<(String, String)>>,
    pub mark_read_watermark_timestamp: i64,
    pub is_dialtone: bool,
    pub msg_attempt_id: i64,
    pub reply_to: Option<String>,
}

static SEND_MESSAGE_REQUEST_SPEC: StructSpec = StructSpec {
    name: "SendMessageRequest",
    fields: &[
        FieldSpec { id: 1, name: "chat_id", kind: &Kind::Utf8 },
        FieldSpec { id: 2, name: "message", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "offline_threading_id", kind: &Kind::I64 },
        FieldSpec { id: 5, name: "client_tags", kind: &Kind::Map(&Kind::Utf8, &Kind::Utf8) },
        FieldSpec { id: 6, name: "sticker", kind: &Kind::Utf8 },
        FieldSpec { id: 9, name: "media_ids", kind: &Kind::List(&Kind::Utf8) },
        FieldSpec { id: 12, name: "sender_fbid", kind: &Kind::I64 },
        FieldSpec { id: 18, name: "ttl", kind: &Kind::I32 },
        FieldSpec { id: 20, name: "extra_metadata", kind: &Kind::Map(&Kind::Utf8, &Kind::Utf8) },
        FieldSpec { id: 21, name: "mark_read_watermark_timestamp", kind: &Kind::I64 },
        FieldSpec { id: 23, name: "is_dialtone", kind: &Kind::Bool },
        FieldSpec { id: 24, name: "msg_attempt_id", kind: &Kind::I64 },
        FieldSpec { id: 28, name: "reply_to", kind: &Kind::Utf8 },
    ],
};

impl ThriftStruct for SendMessageRequest {
    fn spec() -> &'static StructSpec {
        &SEND_MESSAGE_REQUEST_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(SendMessageRequest {
            chat_id: require(fields.take_str(1), "SendMessageRequest", "chat_id")?,
            message: fields.take_str(2).unwrap_or_default(),
            offline_threading_id: require(
                fields.take_i64(3),
                "SendMessageRequest",
                "offline_threading_id",
            )?,
            client_tags: fields.take_str_map(5).unwrap_or_default(),
            sticker: fields.take_str(6),
            media_ids: fields.take_str_list(9),
            sender_fbid: fields.take_i64(12).unwrap_or_default(),
            ttl: fields.take_i32(18).unwrap_or_default(),
            extra_metadata: fields.take_str_map(20),
            mark_read_watermark_timestamp: fields.take_i64(21).unwrap_or_default(),
            is_dialtone: fields.take_bool(23).unwrap_or(true),
            msg_attempt_id: fields.take_i64(24).unwrap_or_default(),
            reply_to: fields.take_str(28),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_string(1, &self.chat_id);
        writer.field_string(2, &self.message);
        writer.field_i64(3, self.offline_threading_id);
        writer.field_str_map(5, &self.client_tags);
        if let Some(sticker) = &self.sticker {
            writer.field_string(6, sticker);
        }
        if let Some(media_ids) = &self.media_ids {
            writer.field_str_list(9, media_ids);
        }
        writer.field_i64(12, self.sender_fbid);
        writer.field_i32(18, self.ttl);
        if let Some(extra) = &self.extra_metadata {
            writer.field_str_map(20, extra);
        }
        writer.field_i64(21, self.mark_read_watermark_timestamp);
        writer.field_bool(23, self.is_dialtone);
        writer.field_i64(24, self.msg_attempt_id);
        if let Some(reply_to) = &self.reply_to {
            writer.field_string(28, reply_to);
        }
    }
}

/// Read-up-to watermark for one thread.
#[derive(Debug, Clone)]
pub struct MarkReadRequest {
    pub receipt_type: String,
    pub state: bool,
    pub group_id: Option<i64>,
    pub user_id: Option<i64>,
    pub read_to: i64,
    pub offline_threading_id: i64,
}

impl Default for MarkReadRequest {
    fn default() -> Self {
        MarkReadRequest {
            receipt_type: "read".to_string(),
            state: true,
            group_id: None,
            user_id: None,
            read_to: 0,
            offline_threading_id: 0,
        }
    }
}

static MARK_READ_REQUEST_SPEC: StructSpec = StructSpec {
    name: "MarkReadRequest",
    fields: &[
        FieldSpec { id: 1, name: "receipt_type", kind: &Kind::Utf8 },
        FieldSpec { id: 2, name: "state", kind: &Kind::Bool },
        FieldSpec { id: 6, name: "group_id", kind: &Kind::I64 },
        FieldSpec { id: 7, name: "user_id", kind: &Kind::I64 },
        FieldSpec { id: 9, name: "read_to", kind: &Kind::I64 },
        FieldSpec { id: 13, name: "offline_threading_id", kind: &Kind::I64 },
    ],
};

impl ThriftStruct for MarkReadRequest {
    fn spec() -> &'static StructSpec {
        &MARK_READ_REQUEST_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(MarkReadRequest {
            receipt_type: fields.take_str(1).unwrap_or_else(|| "read".to_string()),
            state: fields.take_bool(2).unwrap_or(true),
            group_id: fields.take_i64(6),
            user_id: fields.take_i64(7),
            read_to: fields.take_i64(9).unwrap_or_default(),
            offline_threading_id: fields.take_i64(13).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_string(1, &self.receipt_type);
        writer.field_bool(2, self.state);
        if let Some(group_id) = self.group_id {
            writer.field_i64(6, group_id);
        }
        if let Some(user_id) = self.user_id {
            writer.field_i64(7, user_id);
        }
        writer.field_i64(9, self.read_to);
        writer.field_i64(13, self.offline_threading_id);
    }
}

/// Typing state notification towards one recipient.
#[derive(Debug, Clone)]
pub struct SetTypingRequest {
    pub user_id: i64,
    pub own_id: i64,
    pub typing_status: i32,
}

static SET_TYPING_REQUEST_SPEC: StructSpec = StructSpec {
    name: "SetTypingRequest",
    fields: &[
        FieldSpec { id: 1, name: "user_id", kind: &Kind::I64 },
        FieldSpec { id: 2, name: "own_id", kind: &Kind::I64 },
        FieldSpec { id: 3, name: "typing_status", kind: &Kind::I32 },
    ],
};

impl ThriftStruct for SetTypingRequest {
    fn spec() -> &'static StructSpec {
        &SET_TYPING_REQUEST_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(SetTypingRequest {
            user_id: require(fields.take_i64(1), "SetTypingRequest", "user_id")?,
            own_id: fields.take_i64(2).unwrap_or_default(),
            typing_status: fields.take_i32(3).unwrap_or_default(),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_i64(1, self.user_id);
        writer.field_i64(2, self.own_id);
        writer.field_i32(3, self.typing_status);
    }
}

/// Resume an existing server-side delta queue after reconnecting.
#[derive(Debug, Clone, Default)]
pub struct ResumeQueueRequest {
    pub sync_token: Option<String>,
    pub last_seq_id: i64,
    pub delta_batch_size: Option<i32>,
    pub sync_api_version: i64,
    pub device_params: Option<String>,
    pub queue_params: String,
    pub entity_fbid: Option<i64>,
    pub sync_token_long: i64,
}

static RESUME_QUEUE_REQUEST_SPEC: StructSpec = StructSpec {
    name: "ResumeQueueRequest",
    fields: &[
        FieldSpec { id: 1, name: "sync_token", kind: &Kind::Utf8 },
        FieldSpec { id: 2, name: "last_seq_id", kind: &Kind::I64 },
        FieldSpec { id: 4, name: "delta_batch_size", kind: &Kind::I32 },
        FieldSpec { id: 7, name: "sync_api_version", kind: &Kind::I64 },
        FieldSpec { id: 9, name: "device_params", kind: &Kind::Utf8 },
        FieldSpec { id: 10, name: "queue_params", kind: &Kind::Utf8 },
        FieldSpec { id: 11, name: "entity_fbid", kind: &Kind::I64 },
        FieldSpec { id: 12, name: "sync_token_long", kind: &Kind::I64 },
    ],
};

impl ThriftStruct for ResumeQueueRequest {
    fn spec() -> &'static StructSpec {
        &RESUME_QUEUE_REQUEST_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(ResumeQueueRequest {
            sync_token: fields.take_str(1),
            last_seq_id: require(fields.take_i64(2), "ResumeQueueRequest", "last_seq_id")?,
            delta_batch_size: fields.take_i32(4),
            sync_api_version: fields.take_i64(7).unwrap_or_default(),
            device_params: fields.take_str(9),
            queue_params: fields.take_str(10).unwrap_or_default(),
            entity_fbid: fields.take_i64(11),
            sync_token_long: fields.take_i64(12).unwrap_or(1),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        if let Some(token) = &self.sync_token {
            writer.field_string(1, token);
        }
        writer.field_i64(2, self.last_seq_id);
        if let Some(batch_size) = self.delta_batch_size {
            writer.field_i32(4, batch_size);
        }
        writer.field_i64(7, self.sync_api_version);
        if let Some(params) = &self.device_params {
            writer.field_string(9, params);
        }
        writer.field_string(10, &self.queue_params);
        if let Some(fbid) = self.entity_fbid {
            writer.field_i64(11, fbid);
        }
        writer.field_i64(12, self.sync_token_long);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_request_roundtrip() {
        let req = SendMessageRequest {
            chat_id: "tfbid_123".to_string(),
            message: "hello".to_string(),
            offline_threading_id: 0x40000001,
            client_tags: vec![("trigger".to_string(), "2:thread_list:thread".to_string())],
            sticker: None,
            media_ids: None,
            sender_fbid: 42,
            ttl: 0,
            extra_metadata: None,
            mark_read_watermark_timestamp: 0,
            is_dialtone: true,
            msg_attempt_id: 7,
            reply_to: Some("mid.$abc".to_string()),
        };
        let back = SendMessageRequest::from_thrift(&req.to_thrift()).unwrap();
        assert_eq!(back.chat_id, "tfbid_123");
        assert_eq!(back.offline_threading_id, 0x40000001);
        assert_eq!(back.reply_to.as_deref(), Some("mid.$abc"));
        assert!(back.is_dialtone);
    }
}

//! GraphQL doc-id queries and their typed responses.
//!
//! The wire format is a form-encoded POST with a persisted `doc_id`; the
//! variables are the serde serialization of the query struct. Mutations wrap
//! their variables in `{"input": ...}`.

use serde::Deserialize;
use serde::Serialize;

/// A persisted GraphQL query.
pub trait GraphQlQuery: Serialize {
    const DOC_ID: i64;
    const FRIENDLY_NAME: &'static str;
    const CALLER_CLASS: &'static str = "graphservice";
    const IS_MUTATION: bool = false;
}

#[derive(Debug, Clone, Serialize)]
pub struct NtContext {
    pub styles_id: String,
    pub using_white_navbar: bool,
    pub pixel_ratio: i32,
}

impl Default for NtContext {
    fn default() -> Self {
        NtContext {
            styles_id: "7d328425a4dfa3aa76b1310fa8dc30bf".to_string(),
            using_white_navbar: true,
            pixel_ratio: 3,
        }
    }
}

/// Full info for a set of threads, including participants.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadQuery {
    pub thread_ids: Vec<String>,
    pub msg_count: i32,
    pub blur: i32,
    pub nt_context: NtContext,
    pub include_full_user_info: String,
    pub include_message_info: String,
    pub include_booking_requests: bool,
    pub full_screen_width: i32,
    pub full_screen_height: i32,
    pub large_preview_width: i32,
    pub large_preview_height: i32,
    pub medium_preview_width: i32,
    pub medium_preview_height: i32,
    pub small_preview_width: i32,
    pub small_preview_height: i32,
    pub profile_pic_large_size: i32,
    pub profile_pic_small_size: i32,
}

impl ThreadQuery {
    pub fn new(thread_ids: Vec<String>) -> Self {
        ThreadQuery {
            thread_ids,
            msg_count: 20,
            blur: 0,
            nt_context: NtContext::default(),
            include_full_user_info: "true".to_string(),
            include_message_info: "true".to_string(),
            include_booking_requests: true,
            full_screen_width: 4096,
            full_screen_height: 4096,
            large_preview_width: 1500,
            large_preview_height: 750,
            medium_preview_width: 962,
            medium_preview_height: 481,
            small_preview_width: 716,
            small_preview_height: 358,
            profile_pic_large_size: 880,
            profile_pic_small_size: 138,
        }
    }
}

impl GraphQlQuery for ThreadQuery {
    const DOC_ID: i64 = 5487678687924830;
    const FRIENDLY_NAME: &'static str = "ThreadQuery";
}

/// The first page of the thread list.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadListQuery {
    pub msg_count: i32,
    pub thread_count: i32,
    pub include_thread_info: String,
    pub include_message_info: String,
    pub fetch_users_separately: String,
    pub filter_to_groups: String,
    pub include_booking_requests: bool,
    pub nt_context: NtContext,
    pub profile_pic_large_size: i32,
    pub profile_pic_medium_size: i32,
    pub profile_pic_small_size: i32,
}

impl ThreadListQuery {
    pub fn new(thread_count: i32) -> Self {
        ThreadListQuery {
            msg_count: 20,
            thread_count,
            include_thread_info: "true".to_string(),
            include_message_info: "true".to_string(),
            fetch_users_separately: "false".to_string(),
            filter_to_groups: "false".to_string(),
            include_booking_requests: true,
            nt_context: NtContext::default(),
            profile_pic_large_size: 880,
            profile_pic_medium_size: 220,
            profile_pic_small_size: 138,
        }
    }
}

impl GraphQlQuery for ThreadListQuery {
    const DOC_ID: i64 = 3562683343826563;
    const FRIENDLY_NAME: &'static str = "ThreadListQuery";
}

/// Page of messages older than a timestamp, for backfill.
#[derive(Debug, Clone, Serialize)]
pub struct MoreMessagesQuery {
    pub before_time_ms: String,
    pub thread_id: String,
    pub msg_count: i32,
    pub blur: i32,
    pub nt_context: NtContext,
    pub full_screen_width: i32,
    pub full_screen_height: i32,
    pub large_preview_width: i32,
    pub large_preview_height: i32,
    pub medium_preview_width: i32,
    pub medium_preview_height: i32,
    pub small_preview_width: i32,
    pub small_preview_height: i32,
}

impl MoreMessagesQuery {
    pub fn new(thread_id: i64, before_time_ms: i64, msg_count: i32) -> Self {
        MoreMessagesQuery {
            before_time_ms: before_time_ms.to_string(),
            thread_id: thread_id.to_string(),
            msg_count,
            blur: 0,
            nt_context: NtContext::default(),
            full_screen_width: 4096,
            full_screen_height: 4096,
            large_preview_width: 1500,
            large_preview_height: 750,
            medium_preview_width: 962,
            medium_preview_height: 481,
            small_preview_width: 716,
            small_preview_height: 358,
        }
    }
}

impl GraphQlQuery for MoreMessagesQuery {
    const DOC_ID: i64 = 3447218621980314;
    const FRIENDLY_NAME: &'static str = "MoreMessagesQuery";
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageUndoSend {
    pub message_id: String,
    pub client_mutation_id: String,
    pub actor_id: String,
}

impl GraphQlQuery for MessageUndoSend {
    const DOC_ID: i64 = 1015037405287590;
    const FRIENDLY_NAME: &'static str = "MessageUndoSend";
    const IS_MUTATION: bool = true;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ReactionAction {
    #[serde(rename = "ADD_REACTION")]
    Add,
    #[serde(rename = "REMOVE_REACTION")]
    Remove,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReactionMutation {
    pub message_id: String,
    pub client_mutation_id: String,
    pub actor_id: String,
    pub action: ReactionAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
}

impl GraphQlQuery for MessageReactionMutation {
    const DOC_ID: i64 = 1415891828475683;
    const FRIENDLY_NAME: &'static str = "MessageReactionMutation";
    const IS_MUTATION: bool = true;
}

// Responses

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Picture {
    pub uri: String,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub width: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructuredName {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub structured_name: Option<StructuredName>,
    #[serde(default)]
    pub nickname_for_viewer: Option<String>,
    #[serde(default)]
    pub profile_pic_large: Option<Picture>,
    #[serde(default)]
    pub profile_pic_small: Option<Picture>,
}

impl Participant {
    pub fn fbid(&self) -> Option<i64> {
        self.id.parse().ok()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.structured_name
            .as_ref()
            .and_then(|name| name.text.as_deref())
            .or(self.name.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantNode {
    pub node: Participant,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParticipantList {
    #[serde(default)]
    pub nodes: Vec<ParticipantNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageSender {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageText {
    #[serde(default)]
    pub text: String,
}

/// One reaction attached to a GraphQL message.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphReaction {
    pub reaction: String,
    pub user: MessageSender,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphAttachment {
    #[serde(rename = "__typename", default)]
    pub typename: Option<String>,
    #[serde(default)]
    pub attachment_fbid: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub filesize: Option<i64>,
    #[serde(default)]
    pub image_full_screen: Option<Picture>,
    #[serde(default)]
    pub playable_url: Option<String>,
    #[serde(default)]
    pub attachment_video_url: Option<String>,
    #[serde(default)]
    pub playable_duration_in_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyTarget {
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub message: ReplyTarget,
}

/// A message as returned by thread and backfill queries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub offline_threading_id: Option<String>,
    #[serde(default)]
    pub message: Option<MessageText>,
    pub message_sender: MessageSender,
    #[serde(default)]
    pub blob_attachments: Vec<GraphAttachment>,
    #[serde(default)]
    pub timestamp_precise: String,
    #[serde(default)]
    pub unsent_timestamp_precise: Option<String>,
    #[serde(default)]
    pub message_reactions: Vec<GraphReaction>,
    #[serde(default)]
    pub replied_to_message: Option<Reply>,
    #[serde(default)]
    pub snippet: Option<String>,
}

impl GraphMessage {
    pub fn timestamp(&self) -> i64 {
        self.timestamp_precise.parse().unwrap_or_default()
    }

    pub fn sender_fbid(&self) -> Option<i64> {
        self.message_sender.id.parse().ok()
    }

    pub fn oti(&self) -> Option<i64> {
        self.offline_threading_id.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub has_previous_page: bool,
    #[serde(default)]
    pub end_cursor: Option<String>,
    #[serde(default)]
    pub start_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageList {
    #[serde(default)]
    pub nodes: Vec<GraphMessage>,
    #[serde(default)]
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphThreadKey {
    #[serde(default)]
    pub other_user_id: Option<String>,
    #[serde(default)]
    pub thread_fbid: Option<String>,
}

impl GraphThreadKey {
    pub fn id(&self) -> Option<i64> {
        self.other_user_id
            .as_deref()
            .or(self.thread_fbid.as_deref())?
            .parse()
            .ok()
    }

    pub fn is_group(&self) -> bool {
        self.thread_fbid.is_some()
    }
}

/// Thread info, used for room metadata and member sync.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thread {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub thread_key: GraphThreadKey,
    #[serde(default)]
    pub image: Option<Picture>,
    #[serde(default)]
    pub messages: MessageList,
    #[serde(default)]
    pub all_participants: ParticipantList,
    #[serde(default)]
    pub is_group_thread: bool,
    #[serde(default)]
    pub unread_count: i32,
    #[serde(default)]
    pub mute_until: Option<i64>,
    #[serde(default)]
    pub thread_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadListResponse {
    #[serde(default)]
    pub count: i32,
    #[serde(default)]
    pub unread_count: i32,
    #[serde(default)]
    pub nodes: Vec<Thread>,
    #[serde(default)]
    pub sync_sequence_id: Option<String>,
}

impl ThreadListResponse {
    /// The sequence id to seed the delta queue with.
    pub fn seq_id(&self) -> Option<i64> {
        self.sync_sequence_id.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadQueryResponse {
    #[serde(default)]
    pub message_threads: Vec<Thread>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageUnsendResponse {
    #[serde(default)]
    pub did_succeed: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// The `viewer.actor` blob of the logged-in-user fetch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggedInUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub profile_pic_large: Option<Picture>,
}

impl LoggedInUser {
    pub fn fbid(&self) -> Option<i64> {
        self.id.parse().ok()
    }
}

/// Response of the resumable-upload endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub media_id: Option<i64>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub err_code: Option<String>,
    #[serde(default)]
    pub err_str: Option<String>,
    #[serde(default)]
    pub debug_info: Option<UploadErrorData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadErrorData {
    #[serde(default)]
    pub retriable: bool,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_list_response_parses() {
        let json = serde_json::json!({
            "count": 1,
            "unread_count": 0,
            "sync_sequence_id": "112233",
            "nodes": [{
                "id": "t_100",
                "name": null,
                "thread_key": {"other_user_id": "100"},
                "is_group_thread": false,
                "all_participants": {"nodes": [
                    {"node": {"id": "100", "structured_name": {"text": "Remote User"}}},
                ]},
                "messages": {"nodes": [{
                    "message_id": "mid.$abc",
                    "offline_threading_id": "12345",
                    "message": {"text": "hi"},
                    "message_sender": {"id": "100"},
                    "timestamp_precise": "1650000000000",
                }]},
            }],
        });
        let parsed: ThreadListResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.seq_id(), Some(112233));
        let thread = &parsed.nodes[0];
        assert_eq!(thread.thread_key.id(), Some(100));
        assert!(!thread.thread_key.is_group());
        assert_eq!(thread.messages.nodes[0].timestamp(), 1650000000000);
        assert_eq!(thread.messages.nodes[0].oti(), Some(12345));
    }

    #[test]
    fn reaction_mutation_serializes_action() {
        let mutation = MessageReactionMutation {
            message_id: "mid.$x".to_string(),
            client_mutation_id: "1".to_string(),
            actor_id: "2".to_string(),
            action: ReactionAction::Add,
            reaction: Some("\u{1F44D}".to_string()),
        };
        let value = serde_json::to_value(&mutation).unwrap();
        assert_eq!(value["action"], "ADD_REACTION");
        let removal = MessageReactionMutation {
            action: ReactionAction::Remove,
            reaction: None,
            ..mutation
        };
        let value = serde_json::to_value(&removal).unwrap();
        assert_eq!(value["action"], "REMOVE_REACTION");
        assert!(value.get("reaction").is_none());
    }
}

//! The shipped topic registry: symbolic names to numeric wire ids.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Symbolic name -> numeric id, shipped as an opaque table.
static TOPIC_MAP: Lazy<HashMap<String, i64>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../assets/topics.json"))
        .expect("embedded topic table is valid JSON")
});

static REVERSE_TOPIC_MAP: Lazy<HashMap<i64, &'static str>> = Lazy::new(|| {
    TOPIC_MAP
        .iter()
        .map(|(name, id)| (*id, name.as_str()))
        .collect()
});

pub fn topic_id(name: &str) -> Option<i64> {
    TOPIC_MAP.get(name).copied()
}

/// Well-known realtime topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealtimeTopic {
    SyncCreateQueue,
    SyncResumeQueue,
    MessageSync,
    SendMessage,
    SendMessageResponse,
    RegionHint,
    MarkThreadRead,
    MarkThreadReadResponse,
    OpenedThread,
    TypingNotification,
    SetTyping,
    OrcaPresence,
}

/// A topic decoded from the wire: either one we handle or a passthrough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedTopic {
    Known(RealtimeTopic),
    Other(String),
}

impl RealtimeTopic {
    pub fn name(self) -> &'static str {
        match self {
            RealtimeTopic::SyncCreateQueue => "/messenger_sync_create_queue",
            RealtimeTopic::SyncResumeQueue => "/t_ms_gd",
            RealtimeTopic::MessageSync => "/t_ms",
            RealtimeTopic::SendMessage => "/t_sm",
            RealtimeTopic::SendMessageResponse => "/t_sm_rp",
            RealtimeTopic::RegionHint => "/t_region_hint",
            RealtimeTopic::MarkThreadRead => "/t_mt_req",
            RealtimeTopic::MarkThreadReadResponse => "/t_mt_resp",
            RealtimeTopic::OpenedThread => "/opened_thread",
            RealtimeTopic::TypingNotification => "/t_tn",
            RealtimeTopic::SetTyping => "/t_st",
            RealtimeTopic::OrcaPresence => "/orca_presence",
        }
    }

    fn from_name(name: &str) -> Option<RealtimeTopic> {
        Some(match name {
            "/messenger_sync_create_queue" => RealtimeTopic::SyncCreateQueue,
            "/t_ms_gd" => RealtimeTopic::SyncResumeQueue,
            "/t_ms" => RealtimeTopic::MessageSync,
            "/t_sm" => RealtimeTopic::SendMessage,
            "/t_sm_rp" => RealtimeTopic::SendMessageResponse,
            "/t_region_hint" => RealtimeTopic::RegionHint,
            "/t_mt_req" => RealtimeTopic::MarkThreadRead,
            "/t_mt_resp" => RealtimeTopic::MarkThreadReadResponse,
            "/opened_thread" => RealtimeTopic::OpenedThread,
            "/t_tn" => RealtimeTopic::TypingNotification,
            "/t_st" => RealtimeTopic::SetTyping,
            "/orca_presence" => RealtimeTopic::OrcaPresence,
            _ => return None,
        })
    }

    /// The numeric id, as published on the wire.
    pub fn encoded(self) -> String {
        topic_id(self.name())
            .map(|id| id.to_string())
            .unwrap_or_else(|| self.name().to_string())
    }

    /// Resolve an incoming numeric topic back to its symbolic form.
    pub fn decode(encoded: &str) -> Option<DecodedTopic> {
        let id: i64 = encoded.parse().ok()?;
        let name = REVERSE_TOPIC_MAP.get(&id)?;
        Some(match RealtimeTopic::from_name(name) {
            Some(topic) => DecodedTopic::Known(topic),
            None => DecodedTopic::Other((*name).to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_topic_has_an_id() {
        let topics = [
            RealtimeTopic::SyncCreateQueue,
            RealtimeTopic::SyncResumeQueue,
            RealtimeTopic::MessageSync,
            RealtimeTopic::SendMessage,
            RealtimeTopic::SendMessageResponse,
            RealtimeTopic::RegionHint,
            RealtimeTopic::MarkThreadRead,
            RealtimeTopic::MarkThreadReadResponse,
            RealtimeTopic::OpenedThread,
            RealtimeTopic::TypingNotification,
            RealtimeTopic::SetTyping,
            RealtimeTopic::OrcaPresence,
        ];
        for topic in topics {
            assert!(topic_id(topic.name()).is_some(), "{} missing", topic.name());
        }
    }

    #[test]
    fn encoded_roundtrips_through_decode() {
        let encoded = RealtimeTopic::MessageSync.encoded();
        assert_eq!(
            RealtimeTopic::decode(&encoded),
            Some(DecodedTopic::Known(RealtimeTopic::MessageSync)),
        );
        assert_eq!(RealtimeTopic::decode("0"), None);
    }
}

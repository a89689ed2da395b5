//! Per-thread orchestration: deduplication across the two delivery paths,
//! send locks, room lifecycle, member sync and backfill.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use msgr_client::realtime::RealtimeClient;
use msgr_client::types::graphql;
use msgr_client::types::message_sync as fbt;
use msgr_client::types::Mention;
use msgr_client::http::MediaOptions;
use msgr_client::http::MediaTarget;

use crate::bridge::Bridge;
use crate::db;
use crate::db::ThreadType;
use crate::formatter;
use crate::matrix::BatchEvent;
use crate::matrix::CreateRoomRequest;
use crate::matrix::EventContent;
use crate::matrix::EventId;
use crate::matrix::MatrixError;
use crate::matrix::MatrixMessage;
use crate::matrix::MediaType;
use crate::matrix::RoomId;
use crate::matrix::SendStatus;
use crate::matrix::UserId;
use crate::now_ms;
use crate::puppet::photo_id_from_url;
use crate::puppet::Puppet;
use crate::user::User;
use crate::BridgeError;

const DEDUP_RING_SIZE: usize = 100;
const MEMBER_RESYNC_DELAY: Duration = Duration::from_secs(10);

/// State key namespace of the bridge-info room state event.
const BRIDGE_INFO_STATE_KEY_PREFIX: &str = "net.maunium.facebook://facebook";

/// A message normalized from either delivery path (MQTT push or GraphQL
/// pull), carrying exactly what the bridging logic needs.
#[derive(Debug, Clone, Default)]
pub struct RemoteMessage {
    pub id: String,
    pub oti: i64,
    pub sender: i64,
    pub timestamp: i64,
    pub text: Option<String>,
    pub mentions: Vec<Mention>,
    pub sticker: Option<i64>,
    pub attachments: Vec<RemoteAttachment>,
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteAttachment {
    pub file_name: String,
    pub mimetype: Option<String>,
    pub size: Option<i64>,
    pub url: Option<String>,
    pub duration_ms: Option<i64>,
}

impl RemoteMessage {
    pub fn from_mqtt(message: &fbt::Message) -> RemoteMessage {
        RemoteMessage {
            id: message.metadata.id.clone(),
            oti: message.metadata.offline_threading_id.unwrap_or_default(),
            sender: message.metadata.sender,
            timestamp: message.metadata.timestamp,
            text: message.text.clone().filter(|text| !text.is_empty()),
            mentions: message.mentions(),
            sticker: message.sticker,
            attachments: message.attachments.iter().map(RemoteAttachment::from_mqtt).collect(),
            reply_to_id: None,
        }
    }

    pub fn from_extended(extended: &fbt::ExtendedMessage) -> RemoteMessage {
        let mut message = RemoteMessage::from_mqtt(&extended.message);
        message.reply_to_id = extended
            .reply_to_message
            .as_ref()
            .map(|reply| reply.metadata.id.clone());
        message
    }

    pub fn from_graphql(message: &graphql::GraphMessage) -> Option<RemoteMessage> {
        Some(RemoteMessage {
            id: message.message_id.clone()?,
            oti: message.oti().unwrap_or_default(),
            sender: message.sender_fbid()?,
            timestamp: message.timestamp(),
            text: message
                .message
                .as_ref()
                .map(|text| text.text.clone())
                .filter(|text| !text.is_empty()),
            mentions: Vec::new(),
            sticker: None,
            attachments: message
                .blob_attachments
                .iter()
                .map(RemoteAttachment::from_graphql)
                .collect(),
            reply_to_id: message
                .replied_to_message
                .as_ref()
                .and_then(|reply| reply.message.message_id.clone()),
        })
    }
}

impl RemoteAttachment {
    fn from_mqtt(attachment: &fbt::Attachment) -> RemoteAttachment {
        let url = attachment
            .audio_info
            .as_ref()
            .and_then(|audio| audio.url.clone())
            .or_else(|| {
                attachment
                    .video_info
                    .as_ref()
                    .and_then(|video| video.download_url.clone())
            })
            .or_else(|| {
                attachment
                    .image_info
                    .as_ref()
                    .and_then(|image| image.best_uri().map(str::to_string))
            });
        RemoteAttachment {
            file_name: attachment
                .file_name
                .clone()
                .unwrap_or_else(|| "attachment".to_string()),
            mimetype: attachment.mime_type.clone(),
            size: attachment.file_size,
            url,
            duration_ms: attachment
                .audio_info
                .as_ref()
                .map(|audio| i64::from(audio.duration_ms))
                .or_else(|| {
                    attachment
                        .video_info
                        .as_ref()
                        .map(|video| i64::from(video.duration_ms))
                }),
        }
    }

    fn from_graphql(attachment: &graphql::GraphAttachment) -> RemoteAttachment {
        let url = attachment
            .playable_url
            .clone()
            .or_else(|| attachment.attachment_video_url.clone())
            .or_else(|| {
                attachment
                    .image_full_screen
                    .as_ref()
                    .map(|picture| picture.uri.clone())
            });
        RemoteAttachment {
            file_name: attachment
                .filename
                .clone()
                .unwrap_or_else(|| "attachment".to_string()),
            mimetype: attachment.mimetype.clone(),
            size: attachment.filesize,
            url,
            duration_ms: attachment.playable_duration_in_ms,
        }
    }
}

/// The remote rejects reaction keys carrying emoji variation selectors.
fn strip_variation_selectors(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '\u{FE00}'..='\u{FE0F}'))
        .collect()
}

struct ResyncState {
    pending: HashSet<i64>,
    scheduled: bool,
}

pub struct Portal {
    bridge: Arc<Bridge>,
    pub fbid: i64,
    pub fb_receiver: i64,
    row: AsyncMutex<db::Portal>,
    /// Recently seen remote ids and composite reaction keys.
    dedup: std::sync::Mutex<VecDeque<String>>,
    /// Offline threading id -> pending message row, cleared on first echo.
    oti_dedup: std::sync::Mutex<HashMap<i64, db::Message>>,
    send_locks: std::sync::Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
    backfill_lock: AsyncMutex<()>,
    resync: std::sync::Mutex<ResyncState>,
}

impl Portal {
    pub(crate) fn new(bridge: Arc<Bridge>, row: db::Portal) -> Arc<Portal> {
        Arc::new(Portal {
            fbid: row.fbid,
            fb_receiver: row.fb_receiver,
            bridge,
            row: AsyncMutex::new(row),
            dedup: std::sync::Mutex::new(VecDeque::with_capacity(DEDUP_RING_SIZE)),
            oti_dedup: std::sync::Mutex::new(HashMap::new()),
            send_locks: std::sync::Mutex::new(HashMap::new()),
            backfill_lock: AsyncMutex::new(()),
            resync: std::sync::Mutex::new(ResyncState {
                pending: HashSet::new(),
                scheduled: false,
            }),
        })
    }

    pub async fn mxid(&self) -> Option<RoomId> {
        self.row.lock().await.mxid.clone().map(RoomId::new)
    }

    pub async fn thread_type(&self) -> ThreadType {
        self.row.lock().await.thread_type()
    }

    pub async fn is_direct(&self) -> bool {
        self.thread_type().await.is_direct()
    }

    pub async fn relay_user_id(&self) -> Option<UserId> {
        self.row.lock().await.relay_user_id.clone().map(UserId::new)
    }

    fn fbid_log(&self) -> String {
        format!("{}<->{}", self.fbid, self.fb_receiver)
    }

    // region dedup

    fn push_dedup(&self, id: &str) {
        let mut ring = self.dedup.lock().unwrap();
        ring.push_front(id.to_string());
        ring.truncate(DEDUP_RING_SIZE);
    }

    fn dedup_contains(&self, id: &str) -> bool {
        self.dedup.lock().unwrap().iter().any(|seen| seen == id)
    }

    /// The per-sender lock serializing OTI allocation, row insertion and the
    /// network publish of one outbound message.
    fn require_send_lock(&self, user_id: i64) -> Arc<AsyncMutex<()>> {
        self.send_locks
            .lock()
            .unwrap()
            .entry(user_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // endregion
    // region incoming messages

    pub async fn handle_remote_message(
        self: &Arc<Portal>,
        source: &Arc<User>,
        sender: &Arc<Puppet>,
        message: RemoteMessage,
    ) {
        if let Err(err) = self.handle_remote_message_inner(source, sender, message).await {
            warn!("Error handling remote message in {}: {err}", self.fbid_log());
        }
    }

    async fn handle_remote_message_inner(
        self: &Arc<Portal>,
        source: &Arc<User>,
        sender: &Arc<Puppet>,
        message: RemoteMessage,
    ) -> Result<(), BridgeError> {
        let pool = self.bridge.db.pool();

        // 1. A pending outbound send waiting for this echo?
        let pending = self.oti_dedup.lock().unwrap().remove(&message.oti);
        if let Some(mut pending) = pending {
            self.push_dedup(&message.id);
            debug!(
                "Got message ID {} for offline threading ID {} (in dedup map)",
                message.id, message.oti
            );
            pending.fbid = Some(message.id.clone());
            pending.timestamp = message.timestamp;
            pending.update(pool).await?;
            return Ok(());
        }
        // 2. Already seen on the other delivery path?
        if self.dedup_contains(&message.id) {
            trace!("Not handling message {}, found ID in dedup ring", message.id);
            return Ok(());
        }
        self.push_dedup(&message.id);

        // 3. Already in the database, possibly from a previous run?
        let existing = db::Message::get_by_fbid_or_oti(
            pool,
            &message.id,
            message.oti,
            self.fb_receiver,
            message.sender,
            0,
        )
        .await?;
        if let Some(mut existing) = existing {
            if existing.fbid.is_none() {
                debug!(
                    "Got message ID {} for offline threading ID {} (in database)",
                    message.id, message.oti
                );
                existing.fbid = Some(message.id.clone());
                existing.timestamp = message.timestamp;
                existing.update(pool).await?;
            } else {
                debug!("Not handling message {}, found duplicate in database", message.id);
            }
            return Ok(());
        }

        // 4. A genuinely new message.
        debug!("Handling remote message {} (/{})", message.id, message.oti);
        let room = match self.mxid().await {
            Some(room) => room,
            None => self.create_matrix_room(source).await?,
        };
        if !sender.has_name().await {
            self.schedule_resync(source.clone(), sender.clone());
        }

        let as_user = sender.intent_mxid().await;
        let reply_to = match &message.reply_to_id {
            Some(reply_id) => {
                db::Message::get_by_fbid(pool, reply_id, self.fb_receiver, 0)
                    .await?
                    .map(|row| EventId::new(row.mxid))
            }
            None => None,
        };
        let contents = self.convert_remote_message(source, &message).await;
        if contents.is_empty() {
            warn!("Unhandled remote message {}", message.id);
            return Ok(());
        }
        let mut event_ids = Vec::new();
        for content in &contents {
            let event_id = self
                .bridge
                .matrix
                .send_message_event(
                    &room,
                    &as_user,
                    content,
                    reply_to.as_ref(),
                    Some(message.timestamp),
                )
                .await?;
            event_ids.push(event_id);
        }
        debug!("Handled remote message {} -> {event_ids:?}", message.id);
        for (index, event_id) in event_ids.iter().enumerate() {
            let row = db::Message {
                mxid: event_id.as_str().to_string(),
                mx_room: room.as_str().to_string(),
                fbid: Some(message.id.clone()),
                fb_txn_id: Some(message.oti),
                index: index as i64,
                fb_chat: self.fbid,
                fb_receiver: self.fb_receiver,
                fb_sender: message.sender,
                timestamp: message.timestamp,
            };
            row.insert(pool).await?;
        }
        Ok(())
    }

    /// Convert a remote message into one or more Matrix events: the text part
    /// first, then one event per attachment.
    async fn convert_remote_message(
        self: &Arc<Portal>,
        source: &Arc<User>,
        message: &RemoteMessage,
    ) -> Vec<EventContent> {
        let mut contents = Vec::new();
        if let Some(text) = &message.text {
            let mut resolved: HashMap<i64, (String, String)> = HashMap::new();
            for mention in &message.mentions {
                if let Ok(fbid) = mention.user_id.parse::<i64>() {
                    if let Ok(puppet) = self.bridge.get_puppet(fbid).await {
                        let name = puppet.name().await.unwrap_or_default();
                        resolved.insert(fbid, (puppet.mxid().0, name));
                    }
                }
            }
            contents.push(formatter::messenger_to_matrix(text, &message.mentions, |fbid| {
                resolved.get(&fbid).cloned()
            }));
        }
        if message.sticker.is_some() && message.text.is_none() && message.attachments.is_empty() {
            contents.push(EventContent::Text {
                body: "\u{1F5BC} Sticker".to_string(),
                html: None,
            });
        }
        for attachment in &message.attachments {
            match self.reupload_attachment(source, attachment).await {
                Ok(content) => contents.push(content),
                Err(err) => {
                    warn!("Failed to bridge attachment {}: {err}", attachment.file_name);
                    contents.push(EventContent::Notice {
                        body: format!("Failed to bridge attachment {}", attachment.file_name),
                    });
                }
            }
        }
        contents
    }

    async fn reupload_attachment(
        &self,
        source: &Arc<User>,
        attachment: &RemoteAttachment,
    ) -> Result<EventContent, BridgeError> {
        let Some(url) = &attachment.url else {
            return Ok(EventContent::Notice {
                body: format!("Unsupported attachment {}", attachment.file_name),
            });
        };
        let data = source.client().fetch_media(url).await?;
        let mimetype = attachment
            .mimetype
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let size = Some(data.len() as i64);
        let uri = self
            .bridge
            .matrix
            .upload_media(data, &mimetype, &attachment.file_name)
            .await?;
        Ok(EventContent::Media {
            msgtype: MediaType::from_mimetype(&mimetype),
            body: attachment.file_name.clone(),
            uri,
            mimetype: Some(mimetype),
            size,
            duration_ms: attachment.duration_ms,
        })
    }

    // endregion
    // region other incoming deltas

    pub async fn handle_remote_reaction_add(
        self: &Arc<Portal>,
        source: &Arc<User>,
        reaction: &fbt::Reaction,
    ) -> Result<(), BridgeError> {
        let Some(emoji) = &reaction.reaction else {
            return self.handle_remote_reaction_remove(source, reaction).await;
        };
        let dedup_key = format!(
            "react_{}_{}_{emoji}",
            reaction.message_id, reaction.reaction_sender_id
        );
        if self.dedup_contains(&dedup_key) {
            return Ok(());
        }
        self.push_dedup(&dedup_key);

        let pool = self.bridge.db.pool();
        let Some(target) =
            db::Message::get_by_fbid(pool, &reaction.message_id, self.fb_receiver, 0).await?
        else {
            debug!("Dropping reaction to unknown message {}", reaction.message_id);
            return Ok(());
        };
        let existing = db::Reaction::get_by_fbid(
            pool,
            &reaction.message_id,
            self.fb_receiver,
            reaction.reaction_sender_id,
        )
        .await?;
        if let Some(existing) = &existing {
            if existing.reaction == *emoji {
                return Ok(());
            }
        }
        let puppet = self.bridge.get_puppet(reaction.reaction_sender_id).await?;
        let room = RoomId::new(target.mx_room.clone());
        if let Some(existing) = &existing {
            let _ = self
                .bridge
                .matrix
                .redact(&room, &puppet.intent_mxid().await, &EventId::new(existing.mxid.clone()), None)
                .await;
        }
        let with_variation = format!("{emoji}\u{FE0F}");
        let event_id = self
            .bridge
            .matrix
            .send_reaction(
                &room,
                &puppet.intent_mxid().await,
                &EventId::new(target.mxid.clone()),
                &with_variation,
            )
            .await?;
        db::Reaction {
            mxid: event_id.0,
            mx_room: target.mx_room,
            fb_msgid: reaction.message_id.clone(),
            fb_receiver: self.fb_receiver,
            fb_sender: reaction.reaction_sender_id,
            reaction: emoji.clone(),
        }
        .upsert(pool)
        .await?;
        Ok(())
    }

    pub async fn handle_remote_reaction_remove(
        self: &Arc<Portal>,
        _source: &Arc<User>,
        reaction: &fbt::Reaction,
    ) -> Result<(), BridgeError> {
        let pool = self.bridge.db.pool();
        let Some(row) = db::Reaction::get_by_fbid(
            pool,
            &reaction.message_id,
            self.fb_receiver,
            reaction.reaction_sender_id,
        )
        .await?
        else {
            return Ok(());
        };
        let puppet = self.bridge.get_puppet(reaction.reaction_sender_id).await?;
        self.bridge
            .matrix
            .redact(
                &RoomId::new(row.mx_room.clone()),
                &puppet.intent_mxid().await,
                &EventId::new(row.mxid.clone()),
                None,
            )
            .await?;
        row.delete(pool).await?;
        Ok(())
    }

    /// Redact the Matrix side of an unsent message and drop the mapping.
    pub async fn handle_remote_unsend(
        self: &Arc<Portal>,
        unsend: &fbt::UnsendMessage,
    ) -> Result<(), BridgeError> {
        let pool = self.bridge.db.pool();
        let rows = db::Message::get_all_by_fbid(pool, &unsend.message_id, self.fb_receiver).await?;
        if rows.is_empty() {
            debug!("Dropping unsend for unknown message {}", unsend.message_id);
            return Ok(());
        }
        let puppet = self.bridge.get_puppet(unsend.user_id).await?;
        for row in rows {
            self.bridge
                .matrix
                .redact(
                    &RoomId::new(row.mx_room.clone()),
                    &puppet.intent_mxid().await,
                    &EventId::new(row.mxid.clone()),
                    Some(unsend.timestamp),
                )
                .await?;
            row.delete(pool).await?;
        }
        Ok(())
    }

    pub async fn handle_remote_seen(
        self: &Arc<Portal>,
        sender: &Arc<Puppet>,
        read_to: i64,
    ) -> Result<(), BridgeError> {
        let Some(room) = self.mxid().await else {
            return Ok(());
        };
        let pool = self.bridge.db.pool();
        let target = match db::Message::get_closest_before(pool, self.fbid, self.fb_receiver, read_to)
            .await?
        {
            Some(target) => target,
            None => match db::Message::get_most_recent(pool, self.fbid, self.fb_receiver).await? {
                Some(target) => target,
                None => return Ok(()),
            },
        };
        self.bridge
            .matrix
            .mark_read(&room, &sender.intent_mxid().await, &EventId::new(target.mxid))
            .await?;
        Ok(())
    }

    pub async fn handle_remote_typing(
        self: &Arc<Portal>,
        sender: &Arc<Puppet>,
        typing: bool,
    ) -> Result<(), BridgeError> {
        let Some(room) = self.mxid().await else {
            return Ok(());
        };
        self.bridge
            .matrix
            .set_typing(&room, &sender.mxid(), typing)
            .await?;
        Ok(())
    }

    pub async fn handle_remote_name_change(
        self: &Arc<Portal>,
        name: &str,
    ) -> Result<(), BridgeError> {
        let changed = self.update_name(Some(name.to_string())).await?;
        if changed {
            self.row.lock().await.save(self.bridge.db.pool()).await?;
        }
        Ok(())
    }

    pub async fn handle_remote_avatar_change(
        self: &Arc<Portal>,
        source: &Arc<User>,
        photo_url: Option<&str>,
    ) -> Result<(), BridgeError> {
        let changed = self.update_photo(source, photo_url).await?;
        if changed {
            self.row.lock().await.save(self.bridge.db.pool()).await?;
        }
        Ok(())
    }

    pub async fn handle_remote_members_added(
        self: &Arc<Portal>,
        source: &Arc<User>,
        added: &fbt::AddMember,
    ) -> Result<(), BridgeError> {
        let Some(room) = self.mxid().await else {
            return Ok(());
        };
        for user in &added.users {
            let puppet = self.bridge.get_puppet(user.id).await?;
            if let Some(name) = &user.name {
                let participant = graphql::Participant {
                    id: user.id.to_string(),
                    name: Some(name.clone()),
                    ..graphql::Participant::default()
                };
                let _ = puppet.update_info(source.client(), &participant).await;
            }
            self.bridge.matrix.ensure_joined(&room, &puppet.mxid()).await?;
        }
        Ok(())
    }

    pub async fn handle_remote_member_removed(
        self: &Arc<Portal>,
        removed_fbid: i64,
    ) -> Result<(), BridgeError> {
        let Some(room) = self.mxid().await else {
            return Ok(());
        };
        let puppet = self.bridge.get_puppet(removed_fbid).await?;
        self.bridge.matrix.leave(&room, &puppet.mxid()).await?;
        Ok(())
    }

    // endregion
    // region member resync debounce

    /// Coalesce member-profile resyncs: the first trigger schedules a run ten
    /// seconds out, later triggers within the window only add their puppet.
    pub fn schedule_resync(self: &Arc<Portal>, source: Arc<User>, target: Arc<Puppet>) {
        {
            let mut state = self.resync.lock().unwrap();
            state.pending.insert(target.fbid);
            if state.scheduled {
                return;
            }
            state.scheduled = true;
        }
        let portal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(MEMBER_RESYNC_DELAY).await;
            let pending = {
                let mut state = portal.resync.lock().unwrap();
                state.scheduled = false;
                std::mem::take(&mut state.pending)
            };
            let mut missing = false;
            for fbid in pending {
                match portal.bridge.get_puppet(fbid).await {
                    Ok(puppet) => missing |= !puppet.has_name().await,
                    Err(_) => missing = true,
                }
            }
            if !missing {
                return;
            }
            debug!("Resyncing {} after member info debounce", portal.fbid_log());
            if let Err(err) = portal.update_info_from_source(&source).await {
                warn!("Failed to resync {}: {err}", portal.fbid_log());
            }
        });
    }

    pub async fn update_info_from_source(
        self: &Arc<Portal>,
        source: &Arc<User>,
    ) -> Result<bool, BridgeError> {
        let threads = source.client().fetch_thread_info(&[self.fbid]).await?;
        match threads.first() {
            Some(thread) => self.update_info(source, thread).await,
            None => Ok(false),
        }
    }

    // endregion
    // region metadata

    /// Apply thread metadata. Idempotent: applying the same info twice
    /// produces one round of writes and returns false the second time.
    pub async fn update_info(
        self: &Arc<Portal>,
        source: &Arc<User>,
        info: &graphql::Thread,
    ) -> Result<bool, BridgeError> {
        let mut changed = false;
        if !self.is_direct().await {
            changed |= self.update_name(info.name.clone()).await?;
            changed |= self
                .update_photo(source, info.image.as_ref().map(|picture| picture.uri.as_str()))
                .await?;
        }
        changed |= self.update_participants(source, info).await?;
        if changed {
            self.row.lock().await.save(self.bridge.db.pool()).await?;
        }
        Ok(changed)
    }

    async fn update_name(&self, name: Option<String>) -> Result<bool, BridgeError> {
        let (current, name_set, mxid) = {
            let row = self.row.lock().await;
            (row.name.clone(), row.name_set, row.mxid.clone())
        };
        if current == name && name_set {
            return Ok(false);
        }
        let mut set_ok = false;
        if let (Some(room), Some(name)) = (&mxid, &name) {
            set_ok = self
                .bridge
                .matrix
                .set_room_name(&RoomId::new(room.clone()), name)
                .await
                .is_ok();
        }
        let mut row = self.row.lock().await;
        row.name = name;
        row.name_set = set_ok;
        Ok(true)
    }

    async fn update_photo(
        &self,
        source: &Arc<User>,
        photo_url: Option<&str>,
    ) -> Result<bool, BridgeError> {
        let photo_id = photo_url.and_then(photo_id_from_url);
        {
            let row = self.row.lock().await;
            if row.photo_id == photo_id && row.avatar_set {
                return Ok(false);
            }
        }
        let avatar_url = match photo_url {
            Some(url) => {
                let data = source.client().fetch_media(url).await?;
                Some(
                    self.bridge
                        .matrix
                        .upload_media(data, "image/jpeg", "avatar.jpg")
                        .await?,
                )
            }
            None => None,
        };
        let mxid = self.row.lock().await.mxid.clone();
        let mut set_ok = false;
        if let Some(room) = &mxid {
            set_ok = self
                .bridge
                .matrix
                .set_room_avatar(&RoomId::new(room.clone()), avatar_url.as_ref())
                .await
                .is_ok();
        }
        let mut row = self.row.lock().await;
        row.photo_id = photo_id;
        row.avatar_url = avatar_url.map(|uri| uri.0);
        row.avatar_set = set_ok;
        Ok(true)
    }

    async fn update_participants(
        self: &Arc<Portal>,
        source: &Arc<User>,
        info: &graphql::Thread,
    ) -> Result<bool, BridgeError> {
        let mut changed = false;
        let room = self.mxid().await;
        for node in &info.all_participants.nodes {
            let Some(fbid) = node.node.fbid() else { continue };
            let puppet = self.bridge.get_puppet(fbid).await?;
            changed |= puppet
                .update_info(source.client(), &node.node)
                .await
                .unwrap_or(false);
            if let Some(room) = &room {
                if Some(fbid) != source.fbid().await || !self.is_direct().await {
                    let _ = self.bridge.matrix.ensure_joined(room, &puppet.mxid()).await;
                }
            }
        }
        Ok(changed)
    }

    // endregion
    // region room lifecycle

    fn bridge_info_state_key(&self) -> String {
        format!("{BRIDGE_INFO_STATE_KEY_PREFIX}/{}", self.fbid)
    }

    async fn bridge_info(&self) -> serde_json::Value {
        let row = self.row.lock().await;
        json!({
            "bridgebot": self.bridge.bot_mxid().as_str(),
            "creator": self.bridge.bot_mxid().as_str(),
            "protocol": {
                "id": "facebook",
                "displayname": "Facebook Messenger",
                "avatar_url": "mxc://maunium.net/ddtNPZSKMNqaUzqrHuWvUADv",
            },
            "channel": {
                "id": self.fbid.to_string(),
                "displayname": row.name,
            },
        })
    }

    /// Post the bridge-info state event (both the stable and the legacy
    /// unstable event type).
    pub async fn update_bridge_info(&self, room: &RoomId) -> Result<(), BridgeError> {
        let info = self.bridge_info().await;
        let state_key = self.bridge_info_state_key();
        self.bridge
            .matrix
            .send_state_event(room, "m.bridge", &state_key, info.clone())
            .await?;
        self.bridge
            .matrix
            .send_state_event(room, "uk.half-shot.bridge", &state_key, info)
            .await?;
        Ok(())
    }

    /// Create the Matrix room for this thread, then fill in metadata and
    /// membership and kick off backfill.
    pub async fn create_matrix_room(
        self: &Arc<Portal>,
        source: &Arc<User>,
    ) -> Result<RoomId, BridgeError> {
        if let Some(existing) = self.mxid().await {
            return Ok(existing);
        }
        let is_direct = self.is_direct().await;
        let creator = if is_direct {
            let puppet = self.bridge.get_puppet(self.fbid).await?;
            puppet.mxid()
        } else {
            self.bridge.bot_mxid()
        };
        let encrypted = self.bridge.config.bridge.encryption_default;
        let name = self.row.lock().await.name.clone();
        let request = CreateRoomRequest {
            name: if is_direct { None } else { name },
            is_direct,
            invite: vec![source.mxid.clone()],
            creator,
            encrypted,
            initial_state: vec![
                (
                    "m.bridge".to_string(),
                    self.bridge_info_state_key(),
                    self.bridge_info().await,
                ),
                (
                    "uk.half-shot.bridge".to_string(),
                    self.bridge_info_state_key(),
                    self.bridge_info().await,
                ),
            ],
        };
        let room = self.bridge.matrix.create_room(request).await?;
        info!("Created room {room} for thread {}", self.fbid_log());
        {
            let mut row = self.row.lock().await;
            row.mxid = Some(room.as_str().to_string());
            row.encrypted = encrypted;
            row.save(self.bridge.db.pool()).await?;
        }
        self.bridge
            .register_portal_mxid(&room, self.fbid, self.fb_receiver)
            .await;

        if let Some(user_fbid) = source.fbid().await {
            db::UserPortal {
                user: user_fbid,
                portal: self.fbid,
                portal_receiver: self.fb_receiver,
            }
            .insert(self.bridge.db.pool())
            .await?;
        }
        // Fill in metadata and membership from thread info.
        if let Err(err) = self.update_info_from_source(source).await {
            warn!("Failed to fetch thread info for {}: {err}", self.fbid_log());
        }
        if self.bridge.config.bridge.backfill.enable {
            self.enqueue_immediate_backfill(source, 0).await?;
            source.notify_backfill();
        }
        Ok(room)
    }

    /// Explicit leave by the DM recipient deletes the portal; group leaves
    /// only drop the membership row.
    pub async fn handle_matrix_leave(self: &Arc<Portal>, user: &Arc<User>) -> Result<(), BridgeError> {
        let user_fbid = user.fbid().await.unwrap_or_default();
        if self.is_direct().await && self.fb_receiver == user_fbid {
            info!("{} left the DM portal {}, deleting", user.mxid, self.fbid_log());
            self.delete().await?;
        } else {
            db::UserPortal {
                user: user_fbid,
                portal: self.fbid,
                portal_receiver: self.fb_receiver,
            }
            .delete(self.bridge.db.pool())
            .await?;
        }
        Ok(())
    }

    /// Drop the portal and cascade the room's rows.
    pub async fn delete(self: &Arc<Portal>) -> Result<(), BridgeError> {
        let row = self.row.lock().await.clone();
        row.delete(self.bridge.db.pool()).await?;
        self.bridge
            .forget_portal(self.fbid, self.fb_receiver, row.mxid.as_deref())
            .await;
        Ok(())
    }

    // endregion
    // region outgoing (Matrix -> remote)

    pub async fn handle_matrix_message(
        self: &Arc<Portal>,
        sender: &Arc<User>,
        message: MatrixMessage,
        event_id: EventId,
    ) {
        let room = self.mxid().await;
        let result = self.handle_matrix_message_inner(sender, &message, &event_id).await;
        let Some(room) = room else { return };
        let status = match &result {
            Ok(()) => SendStatus::Success,
            Err(err) if err.is_retriable() => SendStatus::RetriableFailure {
                reason: err.to_string(),
            },
            Err(err) => SendStatus::PermanentFailure {
                reason: err.to_string(),
            },
        };
        if let Err(err) = &result {
            warn!("Failed to handle Matrix event {event_id}: {err}");
        }
        if let Err(err) = self
            .bridge
            .matrix
            .send_message_status(&room, &event_id, status)
            .await
        {
            debug!("Failed to send message status for {event_id}: {err}");
        }
    }

    async fn handle_matrix_message_inner(
        self: &Arc<Portal>,
        orig_sender: &Arc<User>,
        message: &MatrixMessage,
        event_id: &EventId,
    ) -> Result<(), BridgeError> {
        if message.is_edit {
            return Err(BridgeError::Unsupported("edits"));
        }
        // Relay-mode fallback: an unauthenticated sender borrows the portal's
        // relay user, with the message prefixed by their name.
        let (sender, relay_prefix) = if orig_sender.is_logged_in().await {
            (orig_sender.clone(), None)
        } else {
            let relay = match self.relay_user_id().await {
                Some(relay_mxid) => self.bridge.get_user(&relay_mxid, false).await?,
                None => None,
            };
            match relay {
                Some(relay) if relay.is_logged_in().await => {
                    let prefix = format!("{}: ", orig_sender.mxid);
                    (relay, Some(prefix))
                }
                _ => return Err(BridgeError::NotLoggedIn),
            }
        };

        match message.msgtype.as_str() {
            "m.text" | "m.notice" => {
                if message.msgtype == "m.notice" && !self.bridge.config.bridge.bridge_matrix_notices
                {
                    return Ok(());
                }
                self.handle_matrix_text(&sender, message, event_id, relay_prefix).await
            }
            "m.image" | "m.video" | "m.audio" | "m.file" => {
                self.handle_matrix_media(&sender, message, event_id).await
            }
            other => Err(BridgeError::Other(format!("unsupported msgtype {other}"))),
        }
    }

    /// Insert the pending message row under the send lock, register the OTI
    /// for echo correlation.
    async fn make_pending_row(
        &self,
        sender_fbid: i64,
        event_id: &EventId,
        room: &RoomId,
    ) -> Result<db::Message, BridgeError> {
        let oti = RealtimeClient::generate_offline_threading_id();
        let row = db::Message {
            mxid: event_id.as_str().to_string(),
            mx_room: room.as_str().to_string(),
            fbid: None,
            fb_txn_id: Some(oti),
            index: 0,
            fb_chat: self.fbid,
            fb_receiver: self.fb_receiver,
            fb_sender: sender_fbid,
            timestamp: now_ms(),
        };
        row.insert(self.bridge.db.pool()).await?;
        self.oti_dedup.lock().unwrap().insert(oti, row.clone());
        Ok(row)
    }

    async fn resolve_reply(&self, reply_to: Option<&EventId>, room: &RoomId) -> Option<String> {
        let reply_to = reply_to?;
        match db::Message::get_by_mxid(self.bridge.db.pool(), reply_to.as_str(), room.as_str())
            .await
        {
            Ok(Some(row)) => row.fbid,
            _ => {
                warn!("Couldn't find reply target {reply_to} for outgoing message");
                None
            }
        }
    }

    async fn handle_matrix_text(
        self: &Arc<Portal>,
        sender: &Arc<User>,
        message: &MatrixMessage,
        event_id: &EventId,
        relay_prefix: Option<String>,
    ) -> Result<(), BridgeError> {
        let room = self.mxid().await.ok_or(BridgeError::Other("portal has no room".into()))?;
        let sender_fbid = sender.fbid().await.ok_or(BridgeError::NotLoggedIn)?;
        let realtime = sender.realtime()?;

        // Resolve mention candidates before formatting (the formatter is
        // synchronous).
        static MENTION_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        let mention_re = MENTION_RE.get_or_init(|| {
            regex::Regex::new(r#"https://matrix\.to/#/(@[^"]+)""#).expect("static regex is valid")
        });
        let mut mxid_map: HashMap<String, i64> = HashMap::new();
        if let Some(html) = &message.formatted_body {
            for capture in mention_re.captures_iter(html) {
                let mxid = capture[1].to_string();
                if let Some(fbid) = self.bridge.resolve_mxid_to_fbid(&mxid).await {
                    mxid_map.insert(mxid, fbid);
                }
            }
        }
        let mut params = formatter::matrix_to_messenger(
            &message.body,
            message.formatted_body.as_deref(),
            |mxid| mxid_map.get(mxid).copied(),
        );
        if let Some(prefix) = relay_prefix {
            let shift = prefix.encode_utf16().count() as i32;
            for mention in &mut params.mentions {
                mention.offset += shift;
            }
            params.text = format!("{prefix}{}", params.text);
        }
        let reply_to = self.resolve_reply(message.reply_to.as_ref(), &room).await;

        let lock = self.require_send_lock(sender_fbid);
        let _guard = lock.lock().await;
        let row = self.make_pending_row(sender_fbid, event_id, &room).await?;
        let resp = realtime
            .send_message(
                self.fbid,
                !self.is_direct().await,
                &params.text,
                row.fb_txn_id.unwrap_or_default(),
                &params.mentions,
                reply_to.as_deref(),
            )
            .await?;
        if !resp.success {
            let reason = resp
                .error_message
                .unwrap_or_else(|| "send failed with no error message".to_string());
            debug!("Error handling Matrix message {event_id}: {reason}");
            return Err(BridgeError::SendFailed(reason));
        }
        debug!("Handled Matrix message {event_id} -> OTI {:?}", row.fb_txn_id);
        Ok(())
    }

    async fn handle_matrix_media(
        self: &Arc<Portal>,
        sender: &Arc<User>,
        message: &MatrixMessage,
        event_id: &EventId,
    ) -> Result<(), BridgeError> {
        let room = self.mxid().await.ok_or(BridgeError::Other("portal has no room".into()))?;
        let sender_fbid = sender.fbid().await.ok_or(BridgeError::NotLoggedIn)?;
        let uri = message
            .media_uri
            .as_ref()
            .ok_or(BridgeError::Other("media message has no content URI".into()))?;
        let data = self.bridge.matrix.download_media(uri).await?;
        let mimetype = message
            .mimetype
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let file_name = message.filename.clone().unwrap_or_else(|| message.body.clone());
        let reply_to = self.resolve_reply(message.reply_to.as_ref(), &room).await;

        let lock = self.require_send_lock(sender_fbid);
        let _guard = lock.lock().await;
        let mut row = self.make_pending_row(sender_fbid, event_id, &room).await?;
        let oti = row.fb_txn_id.unwrap_or_default();
        // The upload schedules server-side delivery, so this is the send.
        let resp = sender
            .client()
            .send_media(
                data,
                &file_name,
                &mimetype,
                oti,
                Some(MediaTarget {
                    chat_id: self.fbid,
                    is_group: !self.is_direct().await,
                }),
                MediaOptions {
                    reply_to,
                    caption: None,
                    duration_ms: message.duration_ms,
                    timestamp_ms: None,
                },
            )
            .await?;
        if let Some(message_id) = resp.message_id {
            // The echo may have won the race; only upgrade if it has not.
            if self.oti_dedup.lock().unwrap().remove(&oti).is_some() {
                row.fbid = Some(message_id);
                row.update(self.bridge.db.pool()).await?;
            }
        } else if let Some(debug_info) = resp.debug_info {
            return Err(BridgeError::SendFailed(
                debug_info.message.unwrap_or_else(|| "media upload failed".to_string()),
            ));
        }
        debug!("Handled Matrix media {event_id} -> OTI {oti}");
        Ok(())
    }

    /// One GraphQL mutation per reaction add; the key is stripped of
    /// variation selectors before sending.
    pub async fn handle_matrix_reaction(
        self: &Arc<Portal>,
        sender: &Arc<User>,
        event_id: &EventId,
        target: &EventId,
        key: &str,
    ) -> Result<(), BridgeError> {
        let sender_fbid = sender.fbid().await.ok_or(BridgeError::NotLoggedIn)?;
        let room = self.mxid().await.ok_or(BridgeError::Other("portal has no room".into()))?;
        let pool = self.bridge.db.pool();
        let target_row = db::Message::get_by_mxid(pool, target.as_str(), room.as_str())
            .await?
            .ok_or(BridgeError::Other("reaction target is not bridged".into()))?;
        let fb_msgid = target_row
            .fbid
            .ok_or(BridgeError::Other("reaction target is still pending".into()))?;
        let emoji = strip_variation_selectors(key);

        let dedup_key = format!("react_{fb_msgid}_{sender_fbid}_{emoji}");
        self.push_dedup(&dedup_key);
        sender.client().react(&fb_msgid, Some(&emoji)).await?;
        db::Reaction {
            mxid: event_id.as_str().to_string(),
            mx_room: room.as_str().to_string(),
            fb_msgid,
            fb_receiver: self.fb_receiver,
            fb_sender: sender_fbid,
            reaction: emoji,
        }
        .upsert(pool)
        .await?;
        Ok(())
    }

    /// A redaction either unsends a message or retracts a reaction.
    pub async fn handle_matrix_redaction(
        self: &Arc<Portal>,
        sender: &Arc<User>,
        event_id: &EventId,
    ) -> Result<(), BridgeError> {
        let room = self.mxid().await.ok_or(BridgeError::Other("portal has no room".into()))?;
        let pool = self.bridge.db.pool();

        if let Some(row) = db::Message::get_by_mxid(pool, event_id.as_str(), room.as_str()).await? {
            if let Some(fbid) = &row.fbid {
                let resp = sender.client().unsend(fbid).await?;
                if !resp.did_succeed {
                    return Err(BridgeError::SendFailed(
                        resp.error_message
                            .or(resp.error_code)
                            .unwrap_or_else(|| "unsend failed".to_string()),
                    ));
                }
            }
            row.delete(pool).await?;
            return Ok(());
        }

        if let Some(row) = db::Reaction::get_by_mxid(pool, event_id.as_str(), room.as_str()).await? {
            // Removing a reaction is reacting with null.
            sender.client().react(&row.fb_msgid, None).await?;
            row.delete(pool).await?;
            return Ok(());
        }

        Err(BridgeError::Other("redaction target is not bridged".into()))
    }

    /// Typing does not take the send lock.
    pub async fn handle_matrix_typing(
        self: &Arc<Portal>,
        sender: &Arc<User>,
        typing: bool,
    ) -> Result<(), BridgeError> {
        if !self.is_direct().await {
            return Ok(());
        }
        let realtime = sender.realtime()?;
        realtime.set_typing(self.fbid, typing).await?;
        Ok(())
    }

    /// Read receipts do not take the send lock either.
    pub async fn handle_matrix_read_receipt(
        self: &Arc<Portal>,
        sender: &Arc<User>,
        event_id: &EventId,
    ) -> Result<(), BridgeError> {
        let room = self.mxid().await.ok_or(BridgeError::Other("portal has no room".into()))?;
        let pool = self.bridge.db.pool();
        let read_to = match db::Message::get_by_mxid(pool, event_id.as_str(), room.as_str()).await? {
            Some(row) => row.timestamp,
            None => now_ms(),
        };
        let realtime = sender.realtime()?;
        realtime
            .mark_read(
                self.fbid,
                !self.is_direct().await,
                read_to,
                RealtimeClient::generate_offline_threading_id(),
            )
            .await?;
        Ok(())
    }

    // endregion
    // region backfill

    pub async fn enqueue_immediate_backfill(
        self: &Arc<Portal>,
        source: &Arc<User>,
        priority: i64,
    ) -> Result<(), BridgeError> {
        let backfill_config = &self.bridge.config.bridge.backfill;
        let mut job = db::Backfill::new(
            source.mxid.as_str(),
            db::BackfillType::Immediate,
            priority,
            self.fbid,
            self.fb_receiver,
            backfill_config.max_pages as i64,
            backfill_config.page_delay,
            backfill_config.post_batch_delay,
            backfill_config.max_total_pages as i64,
        );
        job.insert(self.bridge.db.pool()).await?;
        Ok(())
    }

    /// Run one backfill job: fetch pages of history older than the oldest
    /// known message and insert them in chronological order.
    pub async fn backfill(
        self: &Arc<Portal>,
        source: &Arc<User>,
        job: &mut db::Backfill,
    ) -> Result<(), BridgeError> {
        let _guard = self.backfill_lock.lock().await;
        let pool = self.bridge.db.pool();
        let backfill_config = self.bridge.config.bridge.backfill.clone();
        let mut pages_done = 0i64;

        loop {
            if job.num_pages >= 0 && pages_done >= job.num_pages {
                break;
            }
            if job.max_total_pages >= 0 && pages_done >= job.max_total_pages {
                break;
            }
            let oldest = db::Message::get_oldest(pool, self.fbid, self.fb_receiver).await?;
            let before_ts = oldest
                .as_ref()
                .map(|row| row.timestamp - 1)
                .unwrap_or_else(now_ms);
            let page = source
                .client()
                .fetch_messages(self.fbid, before_ts, backfill_config.messages_per_page)
                .await?;
            if page.nodes.is_empty() {
                break;
            }
            let is_last_page = page.nodes.len() < backfill_config.messages_per_page as usize;
            match self.backfill_message_page(source, &page.nodes).await {
                Ok(inserted) => {
                    debug!(
                        "Backfilled {inserted} messages into {} (page {pages_done})",
                        self.fbid_log()
                    );
                    if inserted == 0 {
                        break;
                    }
                }
                Err(BridgeError::Matrix(MatrixError::RateLimited { retry_after_ms })) => {
                    // Sleep out the penalty and requeue at lower priority.
                    let backoff = backfill_config
                        .rate_limit_backoff
                        .max(retry_after_ms / 1000);
                    warn!("Rate limited while backfilling, sleeping {backoff}s");
                    tokio::time::sleep(Duration::from_secs(backoff as u64)).await;
                    self.enqueue_immediate_backfill(source, 2).await?;
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
            pages_done += 1;
            if is_last_page {
                break;
            }
            if job.page_delay > 0 {
                tokio::time::sleep(Duration::from_secs(job.page_delay as u64)).await;
            }
        }
        if job.post_batch_delay > 0 {
            tokio::time::sleep(Duration::from_secs(job.post_batch_delay as u64)).await;
        }
        Ok(())
    }

    /// Insert one page of history. Uses the server-side batch primitive when
    /// available, otherwise sends serially as the puppeted senders with
    /// explicit timestamps.
    async fn backfill_message_page(
        self: &Arc<Portal>,
        source: &Arc<User>,
        nodes: &[graphql::GraphMessage],
    ) -> Result<usize, BridgeError> {
        let pool = self.bridge.db.pool();
        let room = match self.mxid().await {
            Some(room) => room,
            None => self.create_matrix_room(source).await?,
        };

        // Chronological order, skipping anything already bridged.
        let mut messages: Vec<RemoteMessage> = Vec::new();
        for node in nodes {
            let Some(message) = RemoteMessage::from_graphql(node) else { continue };
            if db::Message::get_by_fbid(pool, &message.id, self.fb_receiver, 0)
                .await?
                .is_some()
            {
                continue;
            }
            messages.push(message);
        }
        messages.sort_by_key(|message| message.timestamp);
        if messages.is_empty() {
            return Ok(0);
        }

        let use_batch = self.bridge.config.bridge.backfill.msc2716
            && self.bridge.matrix.supports_batch_send();
        let mut inserted = 0usize;

        if use_batch {
            let prev_event = db::Message::get_closest_before(
                pool,
                self.fbid,
                self.fb_receiver,
                messages[0].timestamp,
            )
            .await?
            .map(|row| EventId::new(row.mxid));
            let Some(prev_event) = prev_event else {
                // No anchor event to insert before; fall back to serial sends.
                return self.backfill_serial(source, &room, &messages).await;
            };
            let mut batch = Vec::new();
            for message in &messages {
                let puppet = self.bridge.get_puppet(message.sender).await?;
                for content in self.convert_remote_message(source, message).await {
                    batch.push(BatchEvent {
                        sender: puppet.mxid(),
                        content,
                        timestamp: message.timestamp,
                    });
                }
            }
            let resp = self
                .bridge
                .matrix
                .batch_send(&room, &prev_event, None, batch)
                .await?;
            for (event_id, message) in resp.event_ids.iter().zip(&messages) {
                self.insert_backfilled_row(&room, event_id, message).await?;
                inserted += 1;
            }
            // A marker tells clients that history was inserted.
            if let Some(base_insertion) = resp.base_insertion_event_id {
                self.bridge
                    .matrix
                    .send_state_event(
                        &room,
                        "org.matrix.msc2716.marker",
                        &format!("msgr-backfill-{}", now_ms()),
                        json!({"org.matrix.msc2716.marker.insertion": base_insertion.as_str()}),
                    )
                    .await?;
            }
        } else {
            inserted = self.backfill_serial(source, &room, &messages).await?;
        }
        Ok(inserted)
    }

    async fn backfill_serial(
        self: &Arc<Portal>,
        source: &Arc<User>,
        room: &RoomId,
        messages: &[RemoteMessage],
    ) -> Result<usize, BridgeError> {
        let mut inserted = 0usize;
        for message in messages {
            let puppet = self.bridge.get_puppet(message.sender).await?;
            let as_user = puppet.intent_mxid().await;
            for content in self.convert_remote_message(source, message).await {
                let event_id = self
                    .bridge
                    .matrix
                    .send_message_event(room, &as_user, &content, None, Some(message.timestamp))
                    .await?;
                self.insert_backfilled_row(room, &event_id, message).await?;
                inserted += 1;
                break;
            }
        }
        Ok(inserted)
    }

    async fn insert_backfilled_row(
        &self,
        room: &RoomId,
        event_id: &EventId,
        message: &RemoteMessage,
    ) -> Result<(), BridgeError> {
        db::Message {
            mxid: event_id.as_str().to_string(),
            mx_room: room.as_str().to_string(),
            fbid: Some(message.id.clone()),
            fb_txn_id: Some(message.oti),
            index: 0,
            fb_chat: self.fbid,
            fb_receiver: self.fb_receiver,
            fb_sender: message.sender,
            timestamp: message.timestamp,
        }
        .insert(self.bridge.db.pool())
        .await?;
        Ok(())
    }

    // endregion
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::test_support::bridge_with;
    use crate::matrix::MockMatrixApi;
    use crate::user::User;

    async fn test_user(bridge: &Arc<Bridge>, fbid: i64) -> Arc<User> {
        let user = bridge
            .get_user(&UserId::new("@user:example.com"), true)
            .await
            .unwrap()
            .unwrap();
        let mut row = db::User::get_by_mxid(bridge.db.pool(), "@user:example.com")
            .await
            .unwrap()
            .unwrap();
        row.fbid = Some(fbid);
        row.save(bridge.db.pool()).await.unwrap();
        user.set_fbid_for_test(fbid).await;
        user
    }

    async fn dm_portal(bridge: &Arc<Bridge>, fbid: i64, receiver: i64) -> Arc<Portal> {
        let portal = bridge
            .get_portal(fbid, receiver, ThreadType::User)
            .await
            .unwrap();
        {
            let mut row = portal.row.lock().await;
            row.mxid = Some("!room:example.com".to_string());
            row.save(bridge.db.pool()).await.unwrap();
        }
        portal
    }

    #[test]
    fn variation_selectors_are_stripped() {
        assert_eq!(strip_variation_selectors("\u{1F44D}\u{FE0F}"), "\u{1F44D}");
        assert_eq!(strip_variation_selectors("\u{1F44D}"), "\u{1F44D}");
    }

    #[tokio::test]
    async fn echo_upgrades_pending_row_without_new_event() {
        // No send_message_event expectation: a bridged echo must not produce
        // a second Matrix event.
        let bridge = bridge_with(MockMatrixApi::new()).await;
        let user = test_user(&bridge, 2).await;
        let portal = dm_portal(&bridge, 1, 2).await;
        let sender = bridge.get_puppet(2).await.unwrap();

        let pending = portal
            .make_pending_row(2, &EventId::new("$evt"), &RoomId::new("!room:example.com"))
            .await
            .unwrap();
        let oti = pending.fb_txn_id.unwrap();

        let echo = RemoteMessage {
            id: "mid.$auth".to_string(),
            oti,
            sender: 2,
            timestamp: 12345,
            text: Some("hi".to_string()),
            ..RemoteMessage::default()
        };
        portal.handle_remote_message(&user, &sender, echo.clone()).await;

        let row = db::Message::get_by_fbid(bridge.db.pool(), "mid.$auth", 2, 0)
            .await
            .unwrap()
            .expect("pending row was upgraded with the authoritative id");
        assert_eq!(row.mxid, "$evt");
        assert_eq!(row.timestamp, 12345);
        assert!(portal.dedup_contains("mid.$auth"));
        assert!(portal.oti_dedup.lock().unwrap().is_empty());

        // The second delivery path (e.g. a DB read after restart) is a no-op.
        portal.handle_remote_message(&user, &sender, echo).await;
    }

    #[tokio::test]
    async fn fresh_message_produces_exactly_one_event() {
        let mut mock = MockMatrixApi::new();
        mock.expect_send_message_event()
            .times(1)
            .returning(|_, _, _, _, _| Ok(EventId::new("$bridged")));
        let bridge = bridge_with(mock).await;
        let user = test_user(&bridge, 2).await;
        let portal = dm_portal(&bridge, 1, 2).await;
        let sender = bridge.get_puppet(1).await.unwrap();
        // Give the puppet a name so no member resync gets scheduled.
        {
            let mut row = db::Puppet::get_by_fbid(bridge.db.pool(), 1).await.unwrap().unwrap();
            row.name = Some("Remote".to_string());
            row.save(bridge.db.pool()).await.unwrap();
        }
        let sender_named = sender.clone();
        sender_named.set_name_for_test("Remote").await;

        let message = RemoteMessage {
            id: "mid.$fresh".to_string(),
            oti: 777,
            sender: 1,
            timestamp: 1000,
            text: Some("hello".to_string()),
            ..RemoteMessage::default()
        };
        portal.handle_remote_message(&user, &sender, message.clone()).await;
        let row = db::Message::get_by_fbid(bridge.db.pool(), "mid.$fresh", 2, 0)
            .await
            .unwrap()
            .expect("message row was inserted");
        assert_eq!(row.mxid, "$bridged");

        // Delivering the same delta again is dropped by the ring.
        portal.handle_remote_message(&user, &sender, message).await;
    }

    #[tokio::test]
    async fn remote_reaction_add_and_remove() {
        let mut mock = MockMatrixApi::new();
        mock.expect_send_reaction()
            .times(1)
            .withf(|_, _, target, key| target.as_str() == "$msg" && key == "\u{1F44D}\u{FE0F}")
            .returning(|_, _, _, _| Ok(EventId::new("$react")));
        mock.expect_redact()
            .times(1)
            .withf(|_, _, event, _| event.as_str() == "$react")
            .returning(|_, _, _, _| Ok(EventId::new("$redact")));
        let bridge = bridge_with(mock).await;
        let user = test_user(&bridge, 2).await;
        let portal = dm_portal(&bridge, 1, 2).await;

        db::Message {
            mxid: "$msg".to_string(),
            mx_room: "!room:example.com".to_string(),
            fbid: Some("10".to_string()),
            fb_txn_id: None,
            index: 0,
            fb_chat: 1,
            fb_receiver: 2,
            fb_sender: 1,
            timestamp: 0,
        }
        .insert(bridge.db.pool())
        .await
        .unwrap();

        let reaction = fbt::Reaction {
            thread: fbt::ThreadKey { other_user_id: Some(1), thread_fbid: None },
            message_id: "10".to_string(),
            reaction_sender_id: 1,
            reaction: Some("\u{1F44D}".to_string()),
            message_sender_id: 1,
        };
        portal.handle_remote_reaction_add(&user, &reaction).await.unwrap();
        let row = db::Reaction::get_by_fbid(bridge.db.pool(), "10", 2, 1)
            .await
            .unwrap()
            .expect("reaction row exists");
        assert_eq!(row.reaction, "\u{1F44D}");

        let removal = fbt::Reaction { reaction: None, ..reaction };
        portal.handle_remote_reaction_remove(&user, &removal).await.unwrap();
        assert!(db::Reaction::get_by_fbid(bridge.db.pool(), "10", 2, 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn remote_unsend_redacts_with_remote_timestamp() {
        let mut mock = MockMatrixApi::new();
        mock.expect_redact()
            .times(1)
            .withf(|room, _, event, timestamp| {
                room.as_str() == "!room:example.com"
                    && event.as_str() == "$e1"
                    && *timestamp == Some(5555)
            })
            .returning(|_, _, _, _| Ok(EventId::new("$redaction")));
        let bridge = bridge_with(mock).await;
        let _user = test_user(&bridge, 2).await;
        let portal = dm_portal(&bridge, 1, 2).await;

        db::Message {
            mxid: "$e1".to_string(),
            mx_room: "!room:example.com".to_string(),
            fbid: Some("m1".to_string()),
            fb_txn_id: None,
            index: 0,
            fb_chat: 1,
            fb_receiver: 2,
            fb_sender: 1,
            timestamp: 0,
        }
        .insert(bridge.db.pool())
        .await
        .unwrap();

        let unsend = fbt::UnsendMessage {
            thread: fbt::ThreadKey { other_user_id: Some(1), thread_fbid: None },
            message_id: "m1".to_string(),
            timestamp: 5555,
            user_id: 1,
        };
        portal.handle_remote_unsend(&unsend).await.unwrap();
        assert!(db::Message::get_by_fbid(bridge.db.pool(), "m1", 2, 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_info_is_idempotent() {
        let mut mock = MockMatrixApi::new();
        mock.expect_set_room_name()
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_set_room_avatar()
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_register_puppet()
            .times(1)
            .returning(|localpart| Ok(UserId::new(format!("@{localpart}:example.com"))));
        mock.expect_set_displayname().times(1).returning(|_, _| Ok(()));
        mock.expect_ensure_joined().returning(|_, _| Ok(()));
        let bridge = bridge_with(mock).await;
        let user = test_user(&bridge, 2).await;
        let portal = bridge.get_portal(555, 0, ThreadType::Group).await.unwrap();
        {
            let mut row = portal.row.lock().await;
            row.mxid = Some("!group:example.com".to_string());
            row.save(bridge.db.pool()).await.unwrap();
        }

        let info = graphql::Thread {
            name: Some("Group chat".to_string()),
            all_participants: graphql::ParticipantList {
                nodes: vec![graphql::ParticipantNode {
                    node: graphql::Participant {
                        id: "1".to_string(),
                        name: Some("Remote".to_string()),
                        ..graphql::Participant::default()
                    },
                }],
            },
            ..graphql::Thread::default()
        };
        assert!(portal.update_info(&user, &info).await.unwrap());
        // The second pass sees every *_set bit flipped and writes nothing.
        assert!(!portal.update_info(&user, &info).await.unwrap());
    }
}

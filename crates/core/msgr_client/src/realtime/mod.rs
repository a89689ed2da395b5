//! The realtime half of the client: one MQTToT connection per account,
//! carrying the delta sync queue and the low-latency send paths.
//!
//! The listener task owns the connection and pushes typed events into a
//! bounded queue; callers publish through cloneable handles. Request/response
//! topics have no per-message correlation ids, so one lock and one in-flight
//! future slot exist per response topic.

mod events;
mod topics;

use std::collections::HashMap;
use std::io::Read;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use mqttot::Connection;
use mqttot::IncomingPublish;
use mqttot::MqttotError;
use mqttot::Publisher;
use mqttot::StopHandle;
use rand::Rng;
use thrift_compact::ThriftStruct;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

pub use events::RealtimeError;
pub use events::RealtimeEvent;
pub use topics::topic_id;
pub use topics::DecodedTopic;
pub use topics::RealtimeTopic;

use crate::http::SharedState;
use crate::types::Mention;
use crate::types::MessageSyncEvent;
use crate::types::MessageSyncPayload;
use crate::types::Presence;
use crate::types::RealtimeClientInfo;
use crate::types::RealtimeConfig;
use crate::types::PhpOverride;
use crate::types::RegionHintPayload;
use crate::types::ResumeQueueRequest;
use crate::types::SendMessageRequest;
use crate::types::SendMessageResponse;
use crate::types::SetTypingRequest;
use crate::types::MarkReadRequest;
use crate::types::TypingNotification;

pub const MQTT_HOST: &str = "edge-mqtt.facebook.com";
pub const MQTT_PORT: u16 = 443;

const EVENT_QUEUE_CAPACITY: usize = 256;
const DELTA_BATCH_SIZE: i32 = 125;
const SYNC_API_VERSION: i64 = 10;

/// Topics baked into the CONNECT blob subscription list.
const SUBSCRIBE_TOPICS: &[&str] = &[
    "/t_assist_rp",
    "/t_rtc",
    "/webrtc_response",
    "/t_rtc_log",
    "/t_ms",
    "/pp",
    "/webrtc",
    "/quick_promotion_refresh",
    "/t_omnistore_sync_low_pri",
    "/get_media_resp",
    "/t_dr_response",
    "/t_omnistore_sync",
    "/t_push",
    "/ixt_trigger",
    "/rs_resp",
    "/t_region_hint",
    "/t_trace",
    "/t_tn",
    "/sr_res",
    "/ls_resp",
    "/t_rtc_multi",
];

/// Topics whose payloads may arrive without the leading zero framing byte.
const NO_PREFIX_TOPICS: &[RealtimeTopic] =
    &[RealtimeTopic::TypingNotification, RealtimeTopic::OrcaPresence];

/// The realtime client for one account.
pub struct RealtimeClient {
    state: SharedState,
    seq_id: AtomicI64,
    connect_token_hash: Mutex<Option<Vec<u8>>>,
    pub enable_web_presence: bool,
    events: mpsc::Sender<RealtimeEvent>,
    current: Mutex<Option<(Publisher, StopHandle)>>,
    stop: AtomicBool,
    force_password: AtomicBool,
    opened_thread: AtomicI64,
    response_slots: Mutex<HashMap<RealtimeTopic, oneshot::Sender<Vec<u8>>>>,
    response_locks: Mutex<HashMap<RealtimeTopic, Arc<tokio::sync::Mutex<()>>>>,
}

impl RealtimeClient {
    /// Create a client plus the receiving end of its event queue.
    pub fn new(
        state: SharedState,
        connect_token_hash: Option<Vec<u8>>,
        enable_web_presence: bool,
    ) -> (Arc<RealtimeClient>, mpsc::Receiver<RealtimeEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let client = Arc::new(RealtimeClient {
            state,
            seq_id: AtomicI64::new(0),
            connect_token_hash: Mutex::new(connect_token_hash),
            enable_web_presence,
            events,
            current: Mutex::new(None),
            stop: AtomicBool::new(false),
            force_password: AtomicBool::new(false),
            opened_thread: AtomicI64::new(0),
            response_slots: Mutex::new(HashMap::new()),
            response_locks: Mutex::new(HashMap::new()),
        });
        (client, receiver)
    }

    pub fn seq_id(&self) -> i64 {
        self.seq_id.load(Ordering::SeqCst)
    }

    pub fn connect_token_hash(&self) -> Option<Vec<u8>> {
        self.connect_token_hash.lock().unwrap().clone()
    }

    /// Drop the resume state so the next connect creates a fresh queue.
    pub fn clear_connect_token_hash(&self) {
        self.connect_token_hash.lock().unwrap().take();
    }

    /// Request a clean stop of the listen loop.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some((_, stop_handle)) = self.current.lock().unwrap().as_ref() {
            stop_handle.stop();
        }
    }

    /// Generate an offline threading id: the millisecond timestamp shifted
    /// left 22 bits, concatenated with 22 random bits.
    pub fn generate_offline_threading_id() -> i64 {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        let random: u32 = rand::thread_rng().gen();
        (millis << 22) | i64::from(random & 0x3F_FFFF)
    }

    // region connection

    /// Run the listener until stopped or failed.
    ///
    /// The reconnect ladder: refused connections mean bad credentials and
    /// abort; repeated connect failures back off quadratically up to
    /// `retry_limit`; anything else emits a disconnect notice and retries.
    pub async fn listen(
        self: &Arc<RealtimeClient>,
        seq_id: i64,
        retry_limit: u32,
    ) -> Result<(), RealtimeError> {
        self.seq_id.store(seq_id, Ordering::SeqCst);
        self.stop.store(false, Ordering::SeqCst);
        let mut connection_retries: u32 = 0;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            let client_id = self.build_client_id()?;
            let config = mqttot::Config::new(MQTT_HOST, MQTT_PORT, client_id)
                .with_keep_alive(60);
            let connection = match Connection::connect(&config).await {
                Ok(connection) => connection,
                Err(err @ MqttotError::ConnectRefused { .. }) if err.is_not_authorized() => {
                    return Err(RealtimeError::NotLoggedIn);
                }
                Err(MqttotError::ConnectRefused { code }) => {
                    // A rejected client id blob: rebuild it with a real
                    // password instead of the resume token.
                    error!("MQTT connect rejected (code {code}), regenerating client id");
                    self.force_password.store(true, Ordering::SeqCst);
                    connection_retries += 1;
                    if connection_retries > retry_limit {
                        return Err(RealtimeError::NotConnected(connection_retries));
                    }
                    continue;
                }
                Err(err) => {
                    connection_retries += 1;
                    if connection_retries > retry_limit {
                        return Err(RealtimeError::NotConnected(connection_retries));
                    }
                    let sleep = Duration::from_secs(u64::from(connection_retries) * 2);
                    self.emit(RealtimeEvent::Disconnected {
                        reason: format!("no connection ({err}), retrying"),
                    })
                    .await;
                    tokio::time::sleep(sleep).await;
                    continue;
                }
            };
            connection_retries = 0;
            *self.current.lock().unwrap() =
                Some((connection.publisher(), connection.stop_handle()));

            if let Err(err) = self.post_connect().await {
                warn!("Post-connect publishes failed: {err}");
            }

            self.pump(connection).await;
            self.current.lock().unwrap().take();
            self.response_slots.lock().unwrap().clear();

            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.emit(RealtimeEvent::Disconnected {
                reason: "connection lost, retrying".to_string(),
            })
            .await;
        }
    }

    /// Drain one connection until it dies.
    async fn pump(self: &Arc<RealtimeClient>, connection: Connection) {
        let mut messages = connection.messages;
        let mut errors = connection.errors;
        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(message) => self.process_publish(message).await,
                    None => break,
                },
                err = errors.recv() => {
                    if let Some(err) = err {
                        debug!("MQTT connection error: {err}");
                    }
                    break;
                }
            }
        }
    }

    async fn emit(&self, event: RealtimeEvent) {
        if self.events.send(event).await.is_err() {
            // Receiver gone: nobody is listening anymore.
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    /// Build the opaque CONNECT client id: the zlib-compressed Thrift
    /// serialization of [`RealtimeConfig`].
    fn build_client_id(&self) -> Result<Vec<u8>, RealtimeError> {
        let state = self.state.lock().unwrap().clone();
        let connect_token_hash = self.connect_token_hash();
        let force_password = self.force_password.swap(false, Ordering::SeqCst);

        let mut topic_names: Vec<&str> = SUBSCRIBE_TOPICS.to_vec();
        if self.enable_web_presence {
            topic_names.push(RealtimeTopic::OrcaPresence.name());
        }
        let subscribe_topics: Vec<i32> = topic_names
            .iter()
            .filter_map(|name| topic_id(name))
            .map(|id| id as i32)
            .collect();

        let is_wifi = state.device.connection_type == "WIFI";
        let session_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
            & 0xFFFF_FFFF;
        let device_uuid = state.device_uuid().to_string();
        let mut config = RealtimeConfig {
            client_identifier: device_uuid.chars().take(20).collect(),
            client_info: RealtimeClientInfo {
                user_id: state.session.uid.unwrap_or_default(),
                user_agent: state.user_agent_meta(),
                client_capabilities: 0b1100_0011_1011_0111,
                endpoint_capabilities: 0b101_1010,
                publish_format: 2,
                no_automatic_foreground: true,
                make_user_available_in_foreground: false,
                device_id: device_uuid,
                is_initially_foreground: true,
                network_type: if is_wifi { 1 } else { 0 },
                network_subtype: if is_wifi { 0 } else { 13 },
                client_mqtt_session_id: session_id,
                subscribe_topics,
                client_type: String::new(),
                app_id: crate::state::AndroidApplication::CLIENT_ID
                    .parse()
                    .unwrap_or_default(),
                connect_token_hash: None,
                region_preference: state.session.region_hint.clone(),
                device_secret: String::new(),
                client_stack: 4,
                network_type_info: Some(if is_wifi { 7 } else { 4 }),
            },
            password: state.session.access_token.clone().unwrap_or_default(),
            combined_publishes: Vec::new(),
            app_specific_info: vec![
                (
                    "ls_sv".to_string(),
                    state.application.version_id.to_string(),
                ),
                (
                    "ls_fdid".to_string(),
                    state.device.fdid.clone().unwrap_or_default(),
                ),
            ],
            php_override: Some(PhpOverride::default()),
        };
        if let Some(hash) = connect_token_hash {
            trace!("Using connect token hash for the CONNECT blob");
            if !force_password {
                config.password = String::new();
            }
            config.client_info.device_id = String::new();
            config.client_info.user_agent = state.minimal_user_agent_meta();
            config.client_info.connect_token_hash = Some(hash);
        } else {
            trace!("Making a fresh connection");
        }
        Ok(zlib_compress(&config.to_thrift()))
    }

    /// Re-create or resume the delta sync queue after (re)connecting.
    async fn post_connect(&self) -> Result<(), RealtimeError> {
        self.opened_thread.store(0, Ordering::SeqCst);
        debug!("Re-creating sync queue after reconnect");
        self.emit(RealtimeEvent::Connected).await;

        let state = self.state.lock().unwrap().clone();
        let app_state = serde_json::json!({
            "app_state": 1,
            "request_id": "android_request_id",
        });
        self.publish_raw(
            "/ls_req",
            serde_json::to_vec(&serde_json::json!({
                "label": "1",
                "payload": app_state.to_string(),
                "version": state.application.version_id.to_string(),
            }))?,
            &[],
            true,
        )
        .await?;

        if self.connect_token_hash().is_some() {
            let request = ResumeQueueRequest {
                last_seq_id: self.seq_id(),
                sync_api_version: SYNC_API_VERSION,
                queue_params: serde_json::to_string(&sync_queue_params())?,
                sync_token_long: 1,
                ..ResumeQueueRequest::default()
            };
            self.publish(RealtimeTopic::SyncResumeQueue, request.to_thrift(), &[0x00], true)
                .await
        } else {
            let payload = serde_json::json!({
                "initial_titan_sequence_id": self.seq_id(),
                "delta_batch_size": DELTA_BATCH_SIZE,
                "device_params": device_params(),
                "entity_fbid": state.session.uid.unwrap_or_default(),
                "sync_api_version": SYNC_API_VERSION,
                "queue_params": sync_queue_params(),
            });
            self.publish(
                RealtimeTopic::SyncCreateQueue,
                serde_json::to_vec(&payload)?,
                &[],
                true,
            )
            .await
        }
    }

    // endregion
    // region outgoing

    fn publisher(&self) -> Result<Publisher, RealtimeError> {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .map(|(publisher, _)| publisher.clone())
            .ok_or(RealtimeError::NotRunning)
    }

    pub async fn publish(
        &self,
        topic: RealtimeTopic,
        payload: Vec<u8>,
        prefix: &[u8],
        compress: bool,
    ) -> Result<(), RealtimeError> {
        self.publish_to(topic.encoded(), payload, prefix, compress).await
    }

    pub async fn publish_raw(
        &self,
        topic: &str,
        payload: Vec<u8>,
        prefix: &[u8],
        compress: bool,
    ) -> Result<(), RealtimeError> {
        self.publish_to(topic.to_string(), payload, prefix, compress).await
    }

    async fn publish_to(
        &self,
        topic: String,
        payload: Vec<u8>,
        prefix: &[u8],
        compress: bool,
    ) -> Result<(), RealtimeError> {
        let mut framed = Vec::with_capacity(prefix.len() + payload.len());
        framed.extend_from_slice(prefix);
        framed.extend_from_slice(&payload);
        let framed = if compress { zlib_compress(&framed) } else { framed };
        Ok(self.publisher()?.publish(topic, framed).await?)
    }

    /// Publish to `topic` and wait for the single in-flight response on
    /// `response`. Serialized per response topic; no timeout of its own.
    pub async fn request(
        &self,
        topic: RealtimeTopic,
        response: RealtimeTopic,
        payload: Vec<u8>,
        prefix: &[u8],
    ) -> Result<Vec<u8>, RealtimeError> {
        let lock = {
            let mut locks = self.response_locks.lock().unwrap();
            locks
                .entry(response)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;
        let (tx, rx) = oneshot::channel();
        self.response_slots.lock().unwrap().insert(response, tx);
        self.publish(topic, payload, prefix, true).await?;
        rx.await.map_err(|_| RealtimeError::ResponseLost)
    }

    async fn set_opened_thread(&self, target: i64) {
        // The app publishes an opened-thread marker here; sending it is not
        // required for delivery, so only the marker is tracked.
        self.opened_thread.store(target, Ordering::SeqCst);
    }

    /// Send a text message and wait for the acknowledgement.
    pub async fn send_message(
        &self,
        target: i64,
        is_group: bool,
        message: &str,
        offline_threading_id: i64,
        mentions: &[Mention],
        reply_to: Option<&str>,
    ) -> Result<SendMessageResponse, RealtimeError> {
        let uid = self.state.lock().unwrap().session.uid.unwrap_or_default();
        let mut request = SendMessageRequest {
            chat_id: if is_group {
                format!("tfbid_{target}")
            } else {
                target.to_string()
            },
            message: message.to_string(),
            offline_threading_id,
            client_tags: vec![
                ("is_in_chatheads".to_string(), "false".to_string()),
                ("trigger".to_string(), "2:thread_list:thread".to_string()),
            ],
            sticker: None,
            media_ids: None,
            sender_fbid: uid,
            ttl: 0,
            extra_metadata: None,
            mark_read_watermark_timestamp: 0,
            is_dialtone: true,
            msg_attempt_id: Self::generate_offline_threading_id(),
            reply_to: reply_to.map(str::to_string),
        };
        if !mentions.is_empty() {
            request.extra_metadata = Some(vec![(
                "prng".to_string(),
                serde_json::to_string(mentions)?,
            )]);
        }
        self.set_opened_thread(target).await;
        trace!("Send message request for OTI {offline_threading_id}");
        let response = self
            .request(
                RealtimeTopic::SendMessage,
                RealtimeTopic::SendMessageResponse,
                request.to_thrift(),
                &[0x18, 0x00, 0x00],
            )
            .await?;
        Ok(SendMessageResponse::from_thrift(&response)?)
    }

    /// Move the read watermark of a thread.
    pub async fn mark_read(
        &self,
        target: i64,
        is_group: bool,
        read_to: i64,
        offline_threading_id: i64,
    ) -> Result<(), RealtimeError> {
        let mut request = MarkReadRequest {
            read_to,
            offline_threading_id,
            ..MarkReadRequest::default()
        };
        if is_group {
            request.group_id = Some(target);
        } else {
            request.user_id = Some(target);
        }
        self.set_opened_thread(target).await;
        self.publish(RealtimeTopic::MarkThreadRead, request.to_thrift(), &[0x00], true)
            .await
    }

    pub async fn set_typing(&self, target: i64, typing: bool) -> Result<(), RealtimeError> {
        let own_id = self.state.lock().unwrap().session.uid.unwrap_or_default();
        let request = SetTypingRequest {
            user_id: target,
            own_id,
            typing_status: i32::from(typing),
        };
        self.publish(RealtimeTopic::SetTyping, request.to_thrift(), &[0x00], true)
            .await
    }

    // endregion
    // region incoming

    async fn process_publish(&self, message: IncomingPublish) {
        let payload = if message.payload.starts_with(&[0x78, 0xDA]) {
            match zlib_decompress(&message.payload) {
                Ok(inflated) => inflated,
                Err(err) => {
                    warn!("Failed to inflate payload on {}: {err}", message.topic);
                    return;
                }
            }
        } else {
            message.payload
        };

        let (topic_str, rest) = split_topic(&message.topic);
        if !rest.is_empty() {
            trace!("Got extra data in topic {topic_str}: {rest}");
        }
        let topic = match RealtimeTopic::decode(topic_str) {
            Some(DecodedTopic::Known(topic)) => topic,
            Some(DecodedTopic::Other(name)) => {
                trace!("Ignoring message on unhandled topic {name}");
                return;
            }
            None => {
                debug!("Message on unknown topic {topic_str}");
                return;
            }
        };

        // Most payloads carry leading framing ending in a zero byte.
        let payload = if !NO_PREFIX_TOPICS.contains(&topic) || payload.first() == Some(&0) {
            match payload.iter().position(|byte| *byte == 0) {
                Some(index) => payload[index + 1..].to_vec(),
                None => {
                    debug!("Missing framing byte on {topic:?}");
                    return;
                }
            }
        } else {
            payload
        };

        match topic {
            RealtimeTopic::MessageSync => self.on_message_sync(&payload).await,
            RealtimeTopic::TypingNotification => match TypingNotification::from_thrift(&payload) {
                Ok(parsed) => self.emit(RealtimeEvent::Typing(parsed)).await,
                Err(err) => debug!("Failed to parse typing notification: {err}"),
            },
            RealtimeTopic::OrcaPresence => match serde_json::from_slice::<Presence>(&payload) {
                Ok(parsed) => self.emit(RealtimeEvent::Presence(parsed)).await,
                Err(err) => debug!("Failed to parse presence payload: {err}"),
            },
            RealtimeTopic::RegionHint => match RegionHintPayload::from_thrift(&payload) {
                Ok(parsed) => match parsed.region_hint() {
                    Ok(hint) => self.emit(RealtimeEvent::RegionHintUpdated(hint.code)).await,
                    Err(err) => debug!("Failed to parse region hint: {err}"),
                },
                Err(err) => debug!("Failed to parse region hint payload: {err}"),
            },
            other => {
                let waiter = self.response_slots.lock().unwrap().remove(&other);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(payload);
                    }
                    None => debug!("No handler for MQTT message in {other:?}"),
                }
            }
        }
    }

    async fn on_message_sync(&self, payload: &[u8]) {
        let parsed = match MessageSyncPayload::from_thrift(payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!("Failed to parse message sync payload: {err}");
                return;
            }
        };
        if let Some(last_seq_id) = parsed.last_seq_id {
            if last_seq_id > self.seq_id() {
                self.seq_id.store(last_seq_id, Ordering::SeqCst);
                self.emit(RealtimeEvent::SeqIdUpdated(last_seq_id)).await;
            }
        }
        if let Some(error) = parsed.error {
            info!("Message sync error: {error}");
            self.emit(RealtimeEvent::SyncError(error)).await;
        }
        for item in parsed.items {
            for event in expand_sync_event(item) {
                self.emit(event).await;
            }
        }
    }

    // endregion
}

/// Flatten one sync event into its typed parts, preserving field order.
fn expand_sync_event(item: MessageSyncEvent) -> Vec<RealtimeEvent> {
    let mut events = Vec::new();
    if let Some(message) = item.message {
        events.push(RealtimeEvent::Message(message));
    }
    if let Some(receipt) = item.own_read_receipt {
        events.push(RealtimeEvent::OwnReadReceipt(receipt));
    }
    if let Some(add_member) = item.add_member {
        events.push(RealtimeEvent::AddMember(add_member));
    }
    if let Some(remove_member) = item.remove_member {
        events.push(RealtimeEvent::RemoveMember(remove_member));
    }
    if let Some(name_change) = item.name_change {
        events.push(RealtimeEvent::NameChange(name_change));
    }
    if let Some(avatar_change) = item.avatar_change {
        events.push(RealtimeEvent::AvatarChange(avatar_change));
    }
    if let Some(thread_change) = item.thread_change {
        events.push(RealtimeEvent::ThreadChange(thread_change));
    }
    if let Some(forced_fetch) = item.forced_fetch {
        events.push(RealtimeEvent::ForcedFetch(forced_fetch));
    }
    if let Some(read_receipt) = item.read_receipt {
        events.push(RealtimeEvent::ReadReceipt(read_receipt));
    }
    if let Some(delivery_receipt) = item.delivery_receipt {
        events.push(RealtimeEvent::DeliveryReceipt(delivery_receipt));
    }
    if let Some(wrapper) = item.client_payload {
        match wrapper.parse() {
            Ok(inner) => {
                for inner_item in inner.items {
                    if let Some(reaction) = inner_item.reaction {
                        events.push(RealtimeEvent::Reaction(reaction));
                    }
                    if let Some(extended) = inner_item.extended_message {
                        events.push(RealtimeEvent::ExtendedMessage(Box::new(extended)));
                    }
                    if let Some(unsend) = inner_item.unsend_message {
                        events.push(RealtimeEvent::UnsendMessage(unsend));
                    }
                }
            }
            Err(err) => debug!("Failed to parse client payload: {err}"),
        }
    }
    events
}

/// Split a composed topic (`name#suffix`, `name/suffix` or `name|suffix`)
/// at the first separator.
fn split_topic(topic: &str) -> (&str, &str) {
    match topic.find(['#', '/', '|']) {
        Some(index) => (&topic[..index], &topic[index + 1..]),
        None => (topic, ""),
    }
}

fn zlib_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).expect("writing to a Vec cannot fail");
    encoder.finish().expect("zlib compression cannot fail")
}

fn zlib_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn sync_queue_params() -> serde_json::Value {
    serde_json::json!({
        "client_delta_sync_bitmask": "CAvV/nxib6vRgAV/ss2A",
        "graphql_query_hashes": {"xma_query_id": "0"},
        "graphql_query_params": {
            "0": {
                "xma_id": "<ID>",
                "small_preview_width": 716,
                "small_preview_height": 358,
                "large_preview_width": 1500,
                "large_preview_height": 750,
                "full_screen_width": 4096,
                "full_screen_height": 4096,
                "blur": 0,
                "nt_context": {
                    "styles_id": "7d328425a4dfa3aa76b1310fa8dc30bf",
                    "pixel_ratio": 3,
                },
                "use_oss_id": true,
                "client_doc_id": "222672581515007895135860332111",
            },
        },
    })
}

fn device_params() -> serde_json::Value {
    serde_json::json!({
        "image_sizes": {
            "0": "4096x4096",
            "4": "358x358",
            "1": "750x750",
            "2": "481x481",
            "3": "358x358",
        },
        "animated_image_format": "WEBP,GIF",
        "animated_image_sizes": {
            "0": "4096x4096",
            "4": "358x358",
            "1": "750x750",
            "2": "481x481",
            "3": "358x358",
        },
        "thread_theme_background_sizes": {"0": "2048x2048"},
        "thread_theme_icon_sizes": {"1": "138x138", "3": "66x66"},
        "thread_theme_reaction_sizes": {"1": "83x83", "3": "39x39"},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_topic_takes_first_separator() {
        assert_eq!(split_topic("146#extra"), ("146", "extra"));
        assert_eq!(split_topic("146/a/b"), ("146", "a/b"));
        assert_eq!(split_topic("146|x"), ("146", "x"));
        assert_eq!(split_topic("146"), ("146", ""));
    }

    #[test]
    fn oti_embeds_timestamp_and_entropy() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let oti = RealtimeClient::generate_offline_threading_id();
        let after = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let embedded_millis = oti >> 22;
        assert!(embedded_millis >= before && embedded_millis <= after);
    }

    #[test]
    fn oti_values_are_distinct_within_a_millisecond() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            seen.insert(RealtimeClient::generate_offline_threading_id());
        }
        // 64 draws of 22 random bits: collisions are vanishingly unlikely.
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn zlib_roundtrip() {
        let data = b"some sync payload".repeat(16);
        let compressed = zlib_compress(&data);
        assert!(compressed.starts_with(&[0x78, 0xDA]));
        assert_eq!(zlib_decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn client_id_blob_switches_to_resume_material() {
        let state = Arc::new(Mutex::new(crate::state::AndroidState::default()));
        {
            let mut locked = state.lock().unwrap();
            locked.generate("seed", "@user:example.com");
            locked.session.access_token = Some("token".to_string());
            locked.session.uid = Some(999);
        }

        let (fresh, _events) = RealtimeClient::new(state.clone(), None, false);
        let blob = fresh.build_client_id().unwrap();
        let config =
            RealtimeConfig::from_thrift(&zlib_decompress(&blob).unwrap()).unwrap();
        assert_eq!(config.password, "token");
        assert!(config.client_info.connect_token_hash.is_none());
        assert!(!config.client_info.device_id.is_empty());

        let (resuming, _events) =
            RealtimeClient::new(state, Some(vec![1, 2, 3]), false);
        let blob = resuming.build_client_id().unwrap();
        let config =
            RealtimeConfig::from_thrift(&zlib_decompress(&blob).unwrap()).unwrap();
        assert_eq!(config.password, "");
        assert_eq!(config.client_info.connect_token_hash, Some(vec![1, 2, 3]));
        assert!(config.client_info.device_id.is_empty());
    }

    #[tokio::test]
    async fn seq_id_only_moves_forward() {
        let state = Arc::new(Mutex::new(crate::state::AndroidState::default()));
        let (client, mut events) = RealtimeClient::new(state, None, false);
        client.seq_id.store(1, Ordering::SeqCst);

        let payload = |seq: i64| {
            MessageSyncPayload {
                last_seq_id: Some(seq),
                ..MessageSyncPayload::default()
            }
            .to_thrift()
        };
        client.on_message_sync(&payload(10)).await;
        client.on_message_sync(&payload(5)).await;
        client.on_message_sync(&payload(20)).await;
        assert_eq!(client.seq_id(), 20);

        // Only the forward moves were announced.
        let mut announced = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RealtimeEvent::SeqIdUpdated(seq) = event {
                announced.push(seq);
            }
        }
        assert_eq!(announced, vec![10, 20]);
    }

    #[tokio::test]
    async fn sync_error_is_emitted_before_items() {
        let state = Arc::new(Mutex::new(crate::state::AndroidState::default()));
        let (client, mut events) = RealtimeClient::new(state, None, false);
        let payload = MessageSyncPayload {
            error: Some(crate::types::MessageSyncError::QueueNotFound),
            ..MessageSyncPayload::default()
        }
        .to_thrift();
        client.on_message_sync(&payload).await;
        match events.try_recv().unwrap() {
            RealtimeEvent::SyncError(err) => {
                assert_eq!(err, crate::types::MessageSyncError::QueueNotFound);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn sync_events_expand_in_field_order() {
        use crate::types::Message;
        use crate::types::MessageMetadata;
        use crate::types::ReadReceipt;
        use crate::types::ThreadKey;

        let item = MessageSyncEvent {
            message: Some(Message {
                metadata: MessageMetadata {
                    id: "mid.$a".to_string(),
                    thread: ThreadKey { other_user_id: Some(1), thread_fbid: None },
                    ..MessageMetadata::default()
                },
                ..Message::default()
            }),
            read_receipt: Some(ReadReceipt {
                thread: ThreadKey { other_user_id: Some(1), thread_fbid: None },
                user_id: 1,
                read_at: 2,
                read_to: 3,
            }),
            ..MessageSyncEvent::default()
        };
        let events = expand_sync_event(item);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RealtimeEvent::Message(_)));
        assert!(matches!(events[1], RealtimeEvent::ReadReceipt(_)));
    }
}

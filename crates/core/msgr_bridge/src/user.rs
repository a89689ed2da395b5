//! Per-account lifecycle: login, the listener/dispatcher task pair, the
//! reconnect ladder and sequence-id checkpointing.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use msgr_client::http::HttpError;
use msgr_client::http::SharedState;
use msgr_client::realtime::RealtimeError;
use msgr_client::realtime::RealtimeEvent;
use msgr_client::state::AndroidState;
use msgr_client::types::message_sync as fbt;
use msgr_client::types::MessageSyncError;
use msgr_client::HttpClient;
use msgr_client::RealtimeClient;

use crate::backfill;
use crate::bridge::Bridge;
use crate::db;
use crate::db::ThreadType;
use crate::matrix::BridgeStateEvent;
use crate::matrix::CreateRoomRequest;
use crate::matrix::EventContent;
use crate::matrix::RoomId;
use crate::matrix::UserId;
use crate::portal::Portal;
use crate::portal::RemoteMessage;
use crate::BridgeError;

const MQTT_RETRY_LIMIT: u32 = 5;
const SEQ_ID_SAVE_DELAY: Duration = Duration::from_secs(120);
const MIN_RECONNECT_INTERVAL: Duration = Duration::from_secs(120);
const UNKNOWN_ERROR_RETRY_DELAY: Duration = Duration::from_secs(60);

pub struct User {
    bridge: Arc<Bridge>,
    pub mxid: UserId,
    row: AsyncMutex<db::User>,
    state: SharedState,
    client: HttpClient,
    realtime: StdMutex<Option<Arc<RealtimeClient>>>,
    listen_task: StdMutex<Option<JoinHandle<()>>>,
    dispatcher_task: StdMutex<Option<JoinHandle<()>>>,
    periodic_task: StdMutex<Option<JoinHandle<()>>>,
    backfill_task: StdMutex<Option<JoinHandle<()>>>,
    backfill_notify: Notify,
    seq_id_save_scheduled: AtomicBool,
    /// None until the first connection attempt finishes.
    is_connected: StdMutex<Option<bool>>,
    connected_at: StdMutex<Instant>,
    prev_reconnect_fail: StdMutex<Option<Instant>>,
    unknown_error_retries: AtomicU32,
    is_refreshing: AtomicBool,
    /// Set before an intentional stop so the clean exit is not reported as an
    /// unexpected connection loss.
    expect_disconnect: AtomicBool,
    shutdown: AtomicBool,
}

impl User {
    pub(crate) fn new(bridge: Arc<Bridge>, row: db::User) -> Result<Arc<User>, BridgeError> {
        let mut state: AndroidState = match &row.state {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|err| BridgeError::Other(format!("corrupt state blob: {err}")))?,
            None => AndroidState::default(),
        };
        if state.device.uuid.is_none() {
            let facebook = &bridge.config.facebook;
            state.device.connection_type = facebook.connection_type.clone();
            state.carrier.name = facebook.carrier.clone();
            state.carrier.hni = facebook.hni;
            state.session.region_hint = facebook.default_region_hint.clone();
            state.generate(&facebook.device_seed, &row.mxid);
        }
        let state: SharedState = Arc::new(std::sync::Mutex::new(state));
        let client = HttpClient::new(state.clone())?;
        Ok(Arc::new(User {
            mxid: UserId::new(row.mxid.clone()),
            bridge,
            row: AsyncMutex::new(row),
            state,
            client,
            realtime: StdMutex::new(None),
            listen_task: StdMutex::new(None),
            dispatcher_task: StdMutex::new(None),
            periodic_task: StdMutex::new(None),
            backfill_task: StdMutex::new(None),
            backfill_notify: Notify::new(),
            seq_id_save_scheduled: AtomicBool::new(false),
            is_connected: StdMutex::new(None),
            connected_at: StdMutex::new(Instant::now()),
            prev_reconnect_fail: StdMutex::new(None),
            unknown_error_retries: AtomicU32::new(0),
            is_refreshing: AtomicBool::new(false),
            expect_disconnect: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }))
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub async fn fbid(&self) -> Option<i64> {
        self.row.lock().await.fbid
    }

    #[cfg(test)]
    pub(crate) async fn set_fbid_for_test(&self, fbid: i64) {
        self.row.lock().await.fbid = Some(fbid);
    }

    pub async fn is_logged_in(&self) -> bool {
        let session = self.state.lock().unwrap().session.clone();
        session.access_token.is_some() && session.uid.is_some()
    }

    pub fn realtime(&self) -> Result<Arc<RealtimeClient>, BridgeError> {
        self.realtime
            .lock()
            .unwrap()
            .clone()
            .ok_or(BridgeError::NotConnected)
    }

    pub fn notify_backfill(&self) {
        self.backfill_notify.notify_one();
    }

    pub(crate) fn backfill_notified(&self) -> &Notify {
        &self.backfill_notify
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.is_connected.lock().unwrap().unwrap_or(false)
    }

    async fn push_bridge_state(&self, state: BridgeStateEvent, message: Option<String>) {
        if let Err(err) = self
            .bridge
            .matrix
            .send_bridge_state(&self.mxid, state, message)
            .await
        {
            debug!("Failed to push bridge state: {err}");
        }
    }

    async fn save_state_blob(&self) -> Result<(), BridgeError> {
        let blob = serde_json::to_string(&self.state.lock().unwrap().clone())
            .map_err(|err| BridgeError::Other(err.to_string()))?;
        let mut row = self.row.lock().await;
        row.state = Some(blob);
        row.save(self.bridge.db.pool()).await?;
        Ok(())
    }

    // region login operations

    /// Start a password login. A TwoFactorRequired error leaves the transient
    /// second-factor state in the session for the follow-up call.
    pub async fn login(
        self: &Arc<User>,
        email: &str,
        password: Option<&str>,
        encrypted_password: Option<&str>,
    ) -> Result<(), BridgeError> {
        self.client.mobile_config_sessionless().await?;
        let result = self.client.login(email, password, encrypted_password).await;
        match result {
            Ok(_) => self.on_logged_in().await,
            Err(err @ HttpError::TwoFactorRequired(_)) => {
                // Keep the mutated session around for login_2fa.
                self.save_state_blob().await?;
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn login_2fa(self: &Arc<User>, email: &str, code: &str) -> Result<(), BridgeError> {
        self.client.login_2fa(email, code).await?;
        self.on_logged_in().await
    }

    pub async fn login_approved(self: &Arc<User>) -> Result<(), BridgeError> {
        self.client.login_approved().await?;
        self.on_logged_in().await
    }

    async fn on_logged_in(self: &Arc<User>) -> Result<(), BridgeError> {
        let uid = self.state.lock().unwrap().session.uid;
        {
            let mut row = self.row.lock().await;
            row.fbid = uid;
        }
        self.save_state_blob().await?;
        if let Some(fbid) = uid {
            self.bridge.register_user_fbid(fbid, &self.mxid).await;
        }
        info!("{} logged in as {uid:?}", self.mxid);
        self.sync_threads(false).await?;
        self.start(false).await;
        Ok(())
    }

    /// Tear down the session. The remote user id is preserved when the
    /// logout was triggered by an auth error, so relogin can reuse it.
    pub async fn logout(self: &Arc<User>, from_auth_error: bool) -> Result<(), BridgeError> {
        self.stop_listen().await;
        if !from_auth_error {
            let _ = self.client.logout().await;
        }
        {
            let mut state = self.state.lock().unwrap();
            let region_hint = state.session.region_hint.clone();
            state.session = Default::default();
            state.session.region_hint = region_hint;
        }
        {
            let mut row = self.row.lock().await;
            if !from_auth_error {
                row.fbid = None;
            }
            row.seq_id = None;
            row.connect_token_hash = None;
        }
        self.save_state_blob().await?;
        db::Backfill::delete_all_for_user(self.bridge.db.pool(), self.mxid.as_str()).await?;
        self.push_bridge_state(BridgeStateEvent::LoggedOut, None).await;
        Ok(())
    }

    pub async fn connect(self: &Arc<User>) {
        if self.is_logged_in().await {
            self.start_listen().await;
        }
    }

    pub async fn disconnect(self: &Arc<User>) {
        self.stop_listen().await;
    }

    /// Re-validate the session and restart the realtime connection.
    pub async fn refresh(self: &Arc<User>) {
        self.is_refreshing.store(true, Ordering::SeqCst);
        self.stop_listen().await;
        let result = self.client.fetch_logged_in_user().await;
        match result {
            Ok(_) => {
                if let Err(err) = self.sync_threads(true).await {
                    error!("Failed to sync threads during refresh: {err}");
                }
            }
            Err(err) if err.is_auth_invalidated() => {
                self.handle_auth_invalidated().await;
            }
            Err(err) => {
                warn!("Failed to re-validate session: {err}");
                self.start_listen().await;
            }
        }
        self.is_refreshing.store(false, Ordering::SeqCst);
    }

    pub async fn reconnect(self: &Arc<User>) {
        self.stop_listen().await;
        self.start_listen().await;
    }

    async fn handle_auth_invalidated(self: &Arc<User>) {
        warn!("Session of {} was invalidated server-side", self.mxid);
        self.send_bridge_notice(
            "Your Facebook Messenger session was logged out. Please log in again.",
        )
        .await;
        self.push_bridge_state(BridgeStateEvent::BadCredentials, None).await;
        if let Err(err) = self.logout(true).await {
            error!("Failed to clean up after auth invalidation: {err}");
        }
    }

    // endregion
    // region startup

    /// Bring up the orchestrator for an already-logged-in account.
    pub async fn start(self: &Arc<User>, is_startup: bool) {
        if !self.is_logged_in().await {
            debug!("Not starting {}: no session", self.mxid);
            return;
        }
        if is_startup {
            match self.client.fetch_logged_in_user().await {
                Ok(Some(info)) => debug!("Validated session of {} ({:?})", self.mxid, info.name),
                Ok(None) => warn!("Session validation returned no user info"),
                Err(err) if err.is_auth_invalidated() => {
                    self.handle_auth_invalidated().await;
                    return;
                }
                Err(err) => warn!("Failed to validate session of {}: {err}", self.mxid),
            }
        }
        let needs_sync = self.row.lock().await.seq_id.is_none();
        if needs_sync {
            if let Err(err) = self.sync_threads(false).await {
                error!("Initial thread sync of {} failed: {err}", self.mxid);
            }
        }
        self.start_listen().await;
        self.start_periodic_reconnect();
        self.start_backfill_worker();
    }

    pub async fn shutdown(self: &Arc<User>) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.stop_listen().await;
        if let Some(task) = self.periodic_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.backfill_task.lock().unwrap().take() {
            task.abort();
        }
        if let Err(err) = self.save_seq_id_now().await {
            warn!("Failed to persist seq id during shutdown: {err}");
        }
    }

    fn start_periodic_reconnect(self: &Arc<User>) {
        let interval = self.bridge.config.bridge.periodic_reconnect.interval;
        if interval <= 0 {
            return;
        }
        let mut guard = self.periodic_task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let user = self.clone();
        *guard = Some(tokio::spawn(async move {
            let config = user.bridge.config.bridge.periodic_reconnect.clone();
            loop {
                tokio::time::sleep(Duration::from_secs(config.interval as u64)).await;
                if user.is_shutdown() {
                    return;
                }
                if !config.always && !user.is_connected() {
                    continue;
                }
                let connected_for = user.connected_at.lock().unwrap().elapsed();
                if connected_for < Duration::from_secs(config.min_connected_time as u64) {
                    continue;
                }
                info!("Executing periodic reconnect for {}", user.mxid);
                match config.mode.as_str() {
                    "refresh" => user.refresh().await,
                    _ => user.reconnect().await,
                }
            }
        }));
    }

    fn start_backfill_worker(self: &Arc<User>) {
        let mut guard = self.backfill_task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        *guard = Some(backfill::start_worker(self.clone(), self.bridge.clone()));
    }

    // endregion
    // region listener

    pub fn start_listen<'a>(
        self: &'a Arc<User>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if self.is_shutdown() {
                return;
            }
            if self.realtime.lock().unwrap().is_some() {
                debug!("Listener of {} is already running", self.mxid);
                return;
            }
            self.push_bridge_state(BridgeStateEvent::Connecting, None).await;
            let (seq_id, connect_token_hash) = {
                let row = self.row.lock().await;
                (row.seq_id.unwrap_or(0), row.connect_token_hash.clone())
            };
            let (realtime, events) = RealtimeClient::new(
                self.state.clone(),
                connect_token_hash,
                self.bridge.config.bridge.presence_from_facebook,
            );
            *self.realtime.lock().unwrap() = Some(realtime.clone());

            let dispatcher_user = self.clone();
            let dispatcher = tokio::spawn(async move {
                dispatcher_user.dispatcher_loop(events).await;
            });
            *self.dispatcher_task.lock().unwrap() = Some(dispatcher);

            let listen_user = self.clone();
            let listener = tokio::spawn(async move {
                let result = realtime.listen(seq_id, MQTT_RETRY_LIMIT).await;
                listen_user.handle_listen_result(result).await;
            });
            *self.listen_task.lock().unwrap() = Some(listener);
        })
    }

    pub async fn stop_listen(self: &Arc<User>) {
        let realtime = self.realtime.lock().unwrap().take();
        if let Some(realtime) = realtime {
            self.expect_disconnect.store(true, Ordering::SeqCst);
            realtime.stop();
        }
        let listener = self.listen_task.lock().unwrap().take();
        if let Some(listener) = listener {
            // Give the loop a moment to wind down, then cut it loose.
            let drained = tokio::time::timeout(Duration::from_secs(3), listener).await;
            if drained.is_err() {
                warn!("Listener of {} did not stop in time", self.mxid);
            }
        }
        let dispatcher = self.dispatcher_task.lock().unwrap().take();
        if let Some(dispatcher) = dispatcher {
            // The dispatcher drains its queue once the event channel closes.
            let drained = tokio::time::timeout(Duration::from_secs(3), dispatcher).await;
            if drained.is_err() {
                warn!("Dispatcher of {} did not drain in time", self.mxid);
            }
        }
        *self.is_connected.lock().unwrap() = Some(false);
    }

    /// The reconnect ladder applied to the listen loop's exit.
    async fn handle_listen_result(self: &Arc<User>, result: Result<(), RealtimeError>) {
        self.realtime.lock().unwrap().take();
        *self.is_connected.lock().unwrap() = Some(false);
        if self.is_shutdown() {
            return;
        }
        match result {
            Ok(()) => {
                let expected = self.expect_disconnect.swap(false, Ordering::SeqCst);
                if !expected && !self.is_refreshing.load(Ordering::SeqCst) {
                    self.send_bridge_notice("Messenger connection closed without error").await;
                    self.push_bridge_state(
                        BridgeStateEvent::UnknownError,
                        Some("connection closed".to_string()),
                    )
                    .await;
                }
            }
            Err(err @ (RealtimeError::NotLoggedIn | RealtimeError::NotConnected(_))) => {
                let config = self.bridge.config.bridge.on_reconnection_fail.clone();
                let action = config.action.as_str();
                let action_name = match action {
                    "reconnect" => "Retrying...",
                    "refresh" => "Refreshing session...",
                    _ => "Not retrying!",
                };
                let event = match err {
                    RealtimeError::NotLoggedIn => "Disconnected from",
                    _ => "Failed to connect to",
                };
                let message = format!("{event} Facebook Messenger: {err}. {action_name}");
                warn!("{message}");
                if !matches!(action, "reconnect" | "refresh") {
                    self.send_bridge_notice(&message).await;
                    self.push_bridge_state(BridgeStateEvent::UnknownError, Some(message)).await;
                    return;
                }
                if self.bridge.config.bridge.temporary_disconnect_notices {
                    self.send_bridge_notice(&message).await;
                }
                if config.wait_for > 0 {
                    tokio::time::sleep(Duration::from_secs(config.wait_for as u64)).await;
                }
                // At least 120 seconds between reconnection attempts.
                let wait = {
                    let mut prev = self.prev_reconnect_fail.lock().unwrap();
                    let wait = match *prev {
                        Some(at) => MIN_RECONNECT_INTERVAL.saturating_sub(at.elapsed()),
                        None => Duration::ZERO,
                    };
                    *prev = Some(Instant::now());
                    wait
                };
                if config.wait_for <= 0 && !wait.is_zero() {
                    debug!("Waiting {wait:?} before reconnecting");
                    tokio::time::sleep(wait).await;
                }
                let user = self.clone();
                let action = action.to_string();
                tokio::spawn(async move {
                    if action == "refresh" {
                        user.refresh().await;
                    } else {
                        user.start_listen().await;
                    }
                });
            }
            Err(err) => {
                error!("Fatal error in listener of {}: {err}", self.mxid);
                let retries = self.unknown_error_retries.fetch_add(1, Ordering::SeqCst);
                if retries == 0 {
                    tokio::time::sleep(UNKNOWN_ERROR_RETRY_DELAY).await;
                    let user = self.clone();
                    tokio::spawn(async move { user.start_listen().await });
                } else {
                    self.send_bridge_notice("Fatal error in listener (see logs for more info)")
                        .await;
                    self.push_bridge_state(BridgeStateEvent::UnknownError, Some(err.to_string()))
                        .await;
                }
            }
        }
    }

    // endregion
    // region event dispatch

    /// Drain the bounded event queue and run handlers sequentially.
    ///
    /// The loop keeps going until the channel closes, so every accepted delta
    /// is dispatched even while the listener is shutting down.
    async fn dispatcher_loop(self: &Arc<User>, mut events: mpsc::Receiver<RealtimeEvent>) {
        debug!("Dispatcher loop of {} starting", self.mxid);
        while let Some(event) = events.recv().await {
            if let Err(err) = self.dispatch_event(event).await {
                warn!("Error in event handler of {}: {err}", self.mxid);
            }
        }
        debug!("Dispatcher loop of {} stopped", self.mxid);
    }

    async fn portal_for_thread(
        self: &Arc<User>,
        thread: &fbt::ThreadKey,
        create: bool,
    ) -> Result<Option<Arc<Portal>>, BridgeError> {
        let Some(thread_id) = thread.id() else {
            return Ok(None);
        };
        let (receiver, thread_type) = if thread.is_group() {
            (0, ThreadType::Group)
        } else {
            (self.fbid().await.unwrap_or_default(), ThreadType::User)
        };
        if !create
            && db::Portal::get_by_fbid(self.bridge.db.pool(), thread_id, receiver)
                .await?
                .is_none()
        {
            return Ok(None);
        }
        Ok(Some(
            self.bridge.get_portal(thread_id, receiver, thread_type).await?,
        ))
    }

    async fn dispatch_event(self: &Arc<User>, event: RealtimeEvent) -> Result<(), BridgeError> {
        match event {
            RealtimeEvent::Connected => self.on_connect().await,
            RealtimeEvent::Disconnected { reason } => self.on_disconnect(&reason).await,
            RealtimeEvent::SeqIdUpdated(seq_id) => {
                self.update_seq_id(seq_id).await;
                Ok(())
            }
            RealtimeEvent::RegionHintUpdated(region) => {
                debug!("Got region hint {region}");
                if !region.is_empty() {
                    self.state.lock().unwrap().session.region_hint = region;
                    self.save_state_blob().await?;
                }
                Ok(())
            }
            RealtimeEvent::Message(message) => {
                let remote = RemoteMessage::from_mqtt(&message);
                self.deliver_message(&message.metadata.thread, remote).await
            }
            RealtimeEvent::ExtendedMessage(extended) => {
                let remote = RemoteMessage::from_extended(&extended);
                self.deliver_message(&extended.message.metadata.thread, remote).await
            }
            RealtimeEvent::Reaction(reaction) => {
                let Some(portal) = self.portal_for_thread(&reaction.thread, false).await? else {
                    return Ok(());
                };
                if reaction.reaction.is_some() {
                    portal.handle_remote_reaction_add(self, &reaction).await
                } else {
                    portal.handle_remote_reaction_remove(self, &reaction).await
                }
            }
            RealtimeEvent::UnsendMessage(unsend) => {
                let Some(portal) = self.portal_for_thread(&unsend.thread, false).await? else {
                    return Ok(());
                };
                portal.handle_remote_unsend(&unsend).await
            }
            RealtimeEvent::ReadReceipt(receipt) => {
                let Some(portal) = self.portal_for_thread(&receipt.thread, false).await? else {
                    return Ok(());
                };
                let puppet = self.bridge.get_puppet(receipt.user_id).await?;
                portal.handle_remote_seen(&puppet, receipt.read_to).await
            }
            RealtimeEvent::OwnReadReceipt(receipt) => {
                let Some(own_fbid) = self.fbid().await else {
                    return Ok(());
                };
                let puppet = self.bridge.get_puppet(own_fbid).await?;
                for thread in &receipt.threads {
                    if let Some(portal) = self.portal_for_thread(thread, false).await? {
                        portal.handle_remote_seen(&puppet, receipt.read_to).await?;
                    }
                }
                Ok(())
            }
            RealtimeEvent::AddMember(added) => {
                let Some(portal) =
                    self.portal_for_thread(&added.metadata.thread, true).await?
                else {
                    return Ok(());
                };
                portal.handle_remote_members_added(self, &added).await
            }
            RealtimeEvent::RemoveMember(removed) => {
                let Some(portal) =
                    self.portal_for_thread(&removed.metadata.thread, false).await?
                else {
                    return Ok(());
                };
                portal.handle_remote_member_removed(removed.user_id).await
            }
            RealtimeEvent::NameChange(change) => {
                let Some(portal) =
                    self.portal_for_thread(&change.metadata.thread, false).await?
                else {
                    return Ok(());
                };
                portal.handle_remote_name_change(&change.new_name).await
            }
            RealtimeEvent::AvatarChange(change) => {
                let Some(portal) =
                    self.portal_for_thread(&change.metadata.thread, false).await?
                else {
                    return Ok(());
                };
                let url = change
                    .new_avatar
                    .image_info
                    .as_ref()
                    .and_then(|info| info.best_uri())
                    .map(str::to_string);
                portal.handle_remote_avatar_change(self, url.as_deref()).await
            }
            RealtimeEvent::ThreadChange(change) => {
                // Only nickname changes have a bridged equivalent; the rest
                // is admin text.
                debug!("Unhandled thread change {:?}", change.action);
                Ok(())
            }
            RealtimeEvent::ForcedFetch(fetch) => {
                let Some(portal) = self.portal_for_thread(&fetch.thread, true).await? else {
                    return Ok(());
                };
                portal.update_info_from_source(self).await.map(|_| ())
            }
            RealtimeEvent::DeliveryReceipt(receipt) => {
                debug!(
                    "Ignoring delivery receipt for {} messages",
                    receipt.message_id_list.len()
                );
                Ok(())
            }
            RealtimeEvent::Typing(typing) => {
                let thread = fbt::ThreadKey {
                    other_user_id: Some(typing.user_id),
                    thread_fbid: None,
                };
                let Some(portal) = self.portal_for_thread(&thread, false).await? else {
                    return Ok(());
                };
                let puppet = self.bridge.get_puppet(typing.user_id).await?;
                portal.handle_remote_typing(&puppet, typing.typing_status != 0).await
            }
            RealtimeEvent::Presence(presence) => {
                if !self.bridge.config.bridge.presence_from_facebook {
                    return Ok(());
                }
                for update in presence.updates {
                    let puppet = self.bridge.get_puppet(update.user_id).await?;
                    let _ = self
                        .bridge
                        .matrix
                        .set_presence(&puppet.mxid(), update.status > 0)
                        .await;
                }
                Ok(())
            }
            RealtimeEvent::SyncError(err) => self.on_message_sync_error(err).await,
        }
    }

    async fn deliver_message(
        self: &Arc<User>,
        thread: &fbt::ThreadKey,
        message: RemoteMessage,
    ) -> Result<(), BridgeError> {
        let Some(portal) = self.portal_for_thread(thread, true).await? else {
            return Ok(());
        };
        let puppet = self.bridge.get_puppet(message.sender).await?;
        portal.handle_remote_message(self, &puppet, message).await;
        Ok(())
    }

    async fn on_connect(self: &Arc<User>) -> Result<(), BridgeError> {
        let first_connect = self.is_connected.lock().unwrap().is_none();
        let disconnected_for = self.connected_at.lock().unwrap().elapsed();
        *self.is_connected.lock().unwrap() = Some(true);
        *self.connected_at.lock().unwrap() = Instant::now();
        self.unknown_error_retries.store(0, Ordering::SeqCst);

        let max_disconnected =
            Duration::from_secs(self.bridge.config.bridge.resync_max_disconnected_time as u64);
        if !first_connect && disconnected_for > max_disconnected {
            debug!(
                "Disconnection lasted {disconnected_for:?}, not re-syncing threads"
            );
        } else if self.bridge.config.bridge.temporary_disconnect_notices && !first_connect {
            self.send_bridge_notice("Connected to Facebook Messenger").await;
        }
        self.push_bridge_state(BridgeStateEvent::Connected, None).await;
        Ok(())
    }

    async fn on_disconnect(self: &Arc<User>, reason: &str) -> Result<(), BridgeError> {
        *self.is_connected.lock().unwrap() = Some(false);
        if self.bridge.config.bridge.temporary_disconnect_notices {
            self.send_bridge_notice(&format!("Disconnected from Facebook Messenger: {reason}"))
                .await;
        }
        self.push_bridge_state(
            BridgeStateEvent::TransientDisconnect,
            Some(reason.to_string()),
        )
        .await;
        Ok(())
    }

    /// Delta queue failure: reset the queue or fully resync.
    ///
    /// This runs on the dispatcher, so it must not await its own drain; the
    /// listener winds down on its own once the client is stopped.
    async fn on_message_sync_error(
        self: &Arc<User>,
        err: MessageSyncError,
    ) -> Result<(), BridgeError> {
        self.expect_disconnect.store(true, Ordering::SeqCst);
        if let Some(realtime) = self.realtime.lock().unwrap().take() {
            realtime.stop();
        }
        match err {
            MessageSyncError::QueueNotFound => {
                debug!("Resetting connect_token_hash due to QUEUE_NOT_FOUND error");
                {
                    let mut row = self.row.lock().await;
                    row.connect_token_hash = None;
                    row.save_seq_id(self.bridge.db.pool()).await?;
                }
                self.start_listen().await;
            }
            other => {
                error!("Message sync error: {other}, resyncing...");
                self.send_bridge_notice(&format!("Message sync error: {other}, resyncing..."))
                    .await;
                self.sync_threads(true).await?;
            }
        }
        Ok(())
    }

    // endregion
    // region sequence id checkpointing

    /// Debounced write-back: the first update starts a 120-second timer; the
    /// value persisted is whatever the client has by the time it fires.
    async fn update_seq_id(self: &Arc<User>, seq_id: i64) {
        {
            let mut row = self.row.lock().await;
            row.seq_id = Some(seq_id);
        }
        if self
            .seq_id_save_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let user = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SEQ_ID_SAVE_DELAY).await;
                user.seq_id_save_scheduled.store(false, Ordering::SeqCst);
                if let Err(err) = user.save_seq_id_now().await {
                    error!("Error saving sequence ID: {err}");
                }
            });
        }
    }

    async fn save_seq_id_now(&self) -> Result<(), BridgeError> {
        let row = self.row.lock().await;
        row.save_seq_id(self.bridge.db.pool()).await?;
        debug!("Saved sequence ID {:?}", row.seq_id);
        Ok(())
    }

    // endregion
    // region thread sync

    /// Fetch the thread list, seed the sequence id, and sync recent chats.
    pub async fn sync_threads(self: &Arc<User>, start_listen: bool) -> Result<(), BridgeError> {
        self.push_bridge_state(BridgeStateEvent::Backfilling, None).await;
        let resp = self
            .client
            .fetch_thread_list(self.bridge.config.bridge.initial_chat_sync)
            .await;
        let resp = match resp {
            Ok(resp) => resp,
            Err(err) if err.is_auth_invalidated() => {
                self.handle_auth_invalidated().await;
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };
        if let Some(seq_id) = resp.seq_id() {
            let mut row = self.row.lock().await;
            row.seq_id = Some(seq_id);
            row.save_seq_id(self.bridge.db.pool()).await?;
        }
        info!("Syncing {} threads for {}", resp.nodes.len(), self.mxid);
        for thread in &resp.nodes {
            if let Err(err) = self.sync_thread(thread).await {
                warn!("Failed to sync thread {:?}: {err}", thread.thread_key.id());
            }
        }
        if start_listen {
            self.start_listen().await;
        }
        Ok(())
    }

    async fn sync_thread(
        self: &Arc<User>,
        thread: &msgr_client::types::graphql::Thread,
    ) -> Result<(), BridgeError> {
        let Some(thread_id) = thread.thread_key.id() else {
            return Ok(());
        };
        let (receiver, thread_type) = if thread.thread_key.is_group() {
            (0, ThreadType::Group)
        } else {
            (self.fbid().await.unwrap_or_default(), ThreadType::User)
        };
        let portal = self.bridge.get_portal(thread_id, receiver, thread_type).await?;
        if portal.mxid().await.is_none() {
            portal.create_matrix_room(self).await?;
        } else {
            portal.update_info(self, thread).await?;
        }
        Ok(())
    }

    // endregion
    // region notices

    async fn notice_room(self: &Arc<User>) -> Result<RoomId, BridgeError> {
        if let Some(room) = self.row.lock().await.notice_room.clone() {
            return Ok(RoomId::new(room));
        }
        let room = self
            .bridge
            .matrix
            .create_room(CreateRoomRequest {
                name: Some("Facebook Messenger bridge notices".to_string()),
                is_direct: true,
                invite: vec![self.mxid.clone()],
                creator: self.bridge.bot_mxid(),
                encrypted: false,
                initial_state: Vec::new(),
            })
            .await?;
        let mut row = self.row.lock().await;
        row.notice_room = Some(room.as_str().to_string());
        row.save(self.bridge.db.pool()).await?;
        Ok(room)
    }

    pub async fn send_bridge_notice(self: &Arc<User>, text: &str) {
        debug!("Bridge notice for {}: {text}", self.mxid);
        let result = async {
            let room = self.notice_room().await?;
            self.bridge
                .matrix
                .send_message_event(
                    &room,
                    &self.bridge.bot_mxid(),
                    &EventContent::Notice { body: text.to_string() },
                    None,
                    None,
                )
                .await?;
            Ok::<(), BridgeError>(())
        }
        .await;
        if let Err(err) = result {
            warn!("Failed to send bridge notice to {}: {err}", self.mxid);
        }
    }

    // endregion
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::test_support::bridge_with;
    use crate::matrix::MockMatrixApi;

    #[tokio::test]
    async fn queue_not_found_clears_resume_state_before_reconnecting() {
        let bridge = bridge_with(MockMatrixApi::new()).await;
        let user = bridge
            .get_user(&UserId::new("@user:example.com"), true)
            .await
            .unwrap()
            .unwrap();
        {
            let mut row = user.row.lock().await;
            row.connect_token_hash = Some(vec![1, 2, 3]);
            row.seq_id = Some(10);
            row.save(bridge.db.pool()).await.unwrap();
        }
        // Keep the reconnect from actually dialing out.
        user.shutdown.store(true, Ordering::SeqCst);

        user.on_message_sync_error(MessageSyncError::QueueNotFound)
            .await
            .unwrap();

        let row = db::User::get_by_mxid(bridge.db.pool(), "@user:example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(row.connect_token_hash.is_none());
        assert_eq!(row.seq_id, Some(10));
    }
}

//! Client-server API implementation of [`MatrixApi`] using appservice
//! impersonation (`as_token` + `user_id` query parameter).

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde_json::json;
use serde_json::Value;
use tracing::debug;
use tracing::info;

use crate::matrix::BatchEvent;
use crate::matrix::BatchSendResponse;
use crate::matrix::BridgeStateEvent;
use crate::matrix::ContentUri;
use crate::matrix::CreateRoomRequest;
use crate::matrix::EventContent;
use crate::matrix::EventId;
use crate::matrix::MatrixApi;
use crate::matrix::MatrixError;
use crate::matrix::MediaType;
use crate::matrix::RoomId;
use crate::matrix::SendStatus;
use crate::matrix::UserId;

pub struct HttpMatrixApi {
    http: reqwest::Client,
    base_url: String,
    domain: String,
    as_token: String,
    batch_send_supported: bool,
}

impl HttpMatrixApi {
    pub fn new(
        base_url: &str,
        domain: &str,
        as_token: &str,
        batch_send_supported: bool,
    ) -> HttpMatrixApi {
        HttpMatrixApi {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            domain: domain.to_string(),
            as_token: as_token.to_string(),
            batch_send_supported,
        }
    }

    fn txn_id(&self) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!(
            "msgr-{}-{}",
            crate::now_ms(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        as_user: Option<&UserId>,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, MatrixError> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .bearer_auth(&self.as_token);
        if let Some(user) = as_user {
            request = request.query(&[("user_id", user.as_str())]);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let resp = request
            .send()
            .await
            .map_err(|err| MatrixError::Http(err.to_string()))?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = body
                .get("retry_after_ms")
                .and_then(Value::as_i64)
                .unwrap_or(5000);
            return Err(MatrixError::RateLimited { retry_after_ms });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MatrixError::NotFound);
        }
        if !status.is_success() {
            return Err(MatrixError::Http(format!(
                "{status}: {}",
                body.get("error").and_then(Value::as_str).unwrap_or(""),
            )));
        }
        Ok(body)
    }

    fn render_content(content: &EventContent) -> (&'static str, Value) {
        match content {
            EventContent::Text { body, html } => {
                let mut value = json!({"msgtype": "m.text", "body": body});
                if let Some(html) = html {
                    value["format"] = json!("org.matrix.custom.html");
                    value["formatted_body"] = json!(html);
                }
                ("m.room.message", value)
            }
            EventContent::Notice { body } => {
                ("m.room.message", json!({"msgtype": "m.notice", "body": body}))
            }
            EventContent::Emote { body } => {
                ("m.room.message", json!({"msgtype": "m.emote", "body": body}))
            }
            EventContent::Media {
                msgtype,
                body,
                uri,
                mimetype,
                size,
                duration_ms,
            } => {
                let mut info = serde_json::Map::new();
                if let Some(mimetype) = mimetype {
                    info.insert("mimetype".to_string(), json!(mimetype));
                }
                if let Some(size) = size {
                    info.insert("size".to_string(), json!(size));
                }
                if let Some(duration) = duration_ms {
                    info.insert("duration".to_string(), json!(duration));
                }
                if matches!(msgtype, MediaType::Sticker) {
                    (
                        "m.sticker",
                        json!({"body": body, "url": uri.as_str(), "info": info}),
                    )
                } else {
                    (
                        "m.room.message",
                        json!({
                            "msgtype": msgtype.msgtype(),
                            "body": body,
                            "url": uri.as_str(),
                            "info": info,
                        }),
                    )
                }
            }
        }
    }
}

#[async_trait]
impl MatrixApi for HttpMatrixApi {
    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomId, MatrixError> {
        let mut initial_state: Vec<Value> = request
            .initial_state
            .iter()
            .map(|(event_type, state_key, content)| {
                json!({"type": event_type, "state_key": state_key, "content": content})
            })
            .collect();
        if request.encrypted {
            initial_state.push(json!({
                "type": "m.room.encryption",
                "state_key": "",
                "content": {"algorithm": "m.megolm.v1.aes-sha2"},
            }));
        }
        let mut body = json!({
            "visibility": "private",
            "is_direct": request.is_direct,
            "invite": request.invite,
            "initial_state": initial_state,
        });
        if let Some(name) = &request.name {
            body["name"] = json!(name);
        }
        let resp = self
            .call(
                reqwest::Method::POST,
                "/_matrix/client/v3/createRoom",
                Some(&request.creator),
                &[],
                Some(body),
            )
            .await?;
        let room_id = resp
            .get("room_id")
            .and_then(Value::as_str)
            .ok_or_else(|| MatrixError::Http("createRoom returned no room_id".to_string()))?;
        Ok(RoomId::new(room_id))
    }

    async fn invite(&self, room: &RoomId, user: &UserId) -> Result<(), MatrixError> {
        self.call(
            reqwest::Method::POST,
            &format!("/_matrix/client/v3/rooms/{room}/invite"),
            None,
            &[],
            Some(json!({"user_id": user.as_str()})),
        )
        .await
        .map(|_| ())
    }

    async fn ensure_joined(&self, room: &RoomId, user: &UserId) -> Result<(), MatrixError> {
        match self
            .call(
                reqwest::Method::POST,
                &format!("/_matrix/client/v3/join/{room}"),
                Some(user),
                &[],
                Some(json!({})),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(MatrixError::Http(err)) if err.contains("403") => {
                // Not invited yet: invite as the bridge bot, then retry.
                self.invite(room, user).await?;
                self.call(
                    reqwest::Method::POST,
                    &format!("/_matrix/client/v3/join/{room}"),
                    Some(user),
                    &[],
                    Some(json!({})),
                )
                .await
                .map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    async fn leave(&self, room: &RoomId, user: &UserId) -> Result<(), MatrixError> {
        self.call(
            reqwest::Method::POST,
            &format!("/_matrix/client/v3/rooms/{room}/leave"),
            Some(user),
            &[],
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn set_room_name(&self, room: &RoomId, name: &str) -> Result<(), MatrixError> {
        self.send_state_event(room, "m.room.name", "", json!({"name": name}))
            .await
            .map(|_| ())
    }

    async fn set_room_avatar<'a>(
        &self,
        room: &RoomId,
        uri: Option<&'a ContentUri>,
    ) -> Result<(), MatrixError> {
        let content = match uri {
            Some(uri) => json!({"url": uri.as_str()}),
            None => json!({}),
        };
        self.send_state_event(room, "m.room.avatar", "", content)
            .await
            .map(|_| ())
    }

    async fn send_state_event(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<EventId, MatrixError> {
        let resp = self
            .call(
                reqwest::Method::PUT,
                &format!("/_matrix/client/v3/rooms/{room}/state/{event_type}/{state_key}"),
                None,
                &[],
                Some(content),
            )
            .await?;
        Ok(EventId::new(
            resp.get("event_id").and_then(Value::as_str).unwrap_or(""),
        ))
    }

    async fn send_message_event<'a>(
        &self,
        room: &RoomId,
        as_user: &UserId,
        content: &EventContent,
        in_reply_to: Option<&'a EventId>,
        timestamp: Option<i64>,
    ) -> Result<EventId, MatrixError> {
        let (event_type, mut body) = Self::render_content(content);
        if let Some(reply_to) = in_reply_to {
            body["m.relates_to"] = json!({
                "m.in_reply_to": {"event_id": reply_to.as_str()},
            });
        }
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(ts) = timestamp {
            query.push(("ts", ts.to_string()));
        }
        let resp = self
            .call(
                reqwest::Method::PUT,
                &format!(
                    "/_matrix/client/v3/rooms/{room}/send/{event_type}/{}",
                    self.txn_id()
                ),
                Some(as_user),
                &query,
                Some(body),
            )
            .await?;
        Ok(EventId::new(
            resp.get("event_id").and_then(Value::as_str).unwrap_or(""),
        ))
    }

    async fn send_reaction(
        &self,
        room: &RoomId,
        as_user: &UserId,
        target: &EventId,
        key: &str,
    ) -> Result<EventId, MatrixError> {
        let body = json!({
            "m.relates_to": {
                "rel_type": "m.annotation",
                "event_id": target.as_str(),
                "key": key,
            },
        });
        let resp = self
            .call(
                reqwest::Method::PUT,
                &format!(
                    "/_matrix/client/v3/rooms/{room}/send/m.reaction/{}",
                    self.txn_id()
                ),
                Some(as_user),
                &[],
                Some(body),
            )
            .await?;
        Ok(EventId::new(
            resp.get("event_id").and_then(Value::as_str).unwrap_or(""),
        ))
    }

    async fn redact(
        &self,
        room: &RoomId,
        as_user: &UserId,
        event: &EventId,
        timestamp: Option<i64>,
    ) -> Result<EventId, MatrixError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(ts) = timestamp {
            query.push(("ts", ts.to_string()));
        }
        let resp = self
            .call(
                reqwest::Method::PUT,
                &format!(
                    "/_matrix/client/v3/rooms/{room}/redact/{event}/{}",
                    self.txn_id()
                ),
                Some(as_user),
                &query,
                Some(json!({})),
            )
            .await?;
        Ok(EventId::new(
            resp.get("event_id").and_then(Value::as_str).unwrap_or(""),
        ))
    }

    async fn mark_read(
        &self,
        room: &RoomId,
        as_user: &UserId,
        event: &EventId,
    ) -> Result<(), MatrixError> {
        self.call(
            reqwest::Method::POST,
            &format!("/_matrix/client/v3/rooms/{room}/receipt/m.read/{event}"),
            Some(as_user),
            &[],
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn set_typing(
        &self,
        room: &RoomId,
        as_user: &UserId,
        typing: bool,
    ) -> Result<(), MatrixError> {
        self.call(
            reqwest::Method::PUT,
            &format!("/_matrix/client/v3/rooms/{room}/typing/{as_user}"),
            Some(as_user),
            &[],
            Some(json!({"typing": typing, "timeout": 30_000})),
        )
        .await
        .map(|_| ())
    }

    async fn set_presence(&self, user: &UserId, online: bool) -> Result<(), MatrixError> {
        self.call(
            reqwest::Method::PUT,
            &format!("/_matrix/client/v3/presence/{user}/status"),
            Some(user),
            &[],
            Some(json!({"presence": if online { "online" } else { "offline" }})),
        )
        .await
        .map(|_| ())
    }

    async fn set_displayname(&self, user: &UserId, name: &str) -> Result<(), MatrixError> {
        self.call(
            reqwest::Method::PUT,
            &format!("/_matrix/client/v3/profile/{user}/displayname"),
            Some(user),
            &[],
            Some(json!({"displayname": name})),
        )
        .await
        .map(|_| ())
    }

    async fn set_avatar_url(&self, user: &UserId, uri: &ContentUri) -> Result<(), MatrixError> {
        self.call(
            reqwest::Method::PUT,
            &format!("/_matrix/client/v3/profile/{user}/avatar_url"),
            Some(user),
            &[],
            Some(json!({"avatar_url": uri.as_str()})),
        )
        .await
        .map(|_| ())
    }

    async fn register_puppet(&self, localpart: &str) -> Result<UserId, MatrixError> {
        let resp = self
            .call(
                reqwest::Method::POST,
                "/_matrix/client/v3/register",
                None,
                &[],
                Some(json!({
                    "type": "m.login.application_service",
                    "username": localpart,
                })),
            )
            .await;
        match resp {
            Ok(body) => Ok(UserId::new(
                body.get("user_id").and_then(Value::as_str).unwrap_or(""),
            )),
            // M_USER_IN_USE just means the puppet already exists.
            Err(MatrixError::Http(err)) if err.contains("M_USER_IN_USE") => {
                Ok(UserId::new(format!("@{localpart}:{}", self.domain)))
            }
            Err(err) => Err(err),
        }
    }

    async fn upload_media(
        &self,
        data: Vec<u8>,
        mimetype: &str,
        filename: &str,
    ) -> Result<ContentUri, MatrixError> {
        let resp = self
            .http
            .post(self.url("/_matrix/media/v3/upload"))
            .bearer_auth(&self.as_token)
            .query(&[("filename", filename)])
            .header("content-type", mimetype)
            .body(data)
            .send()
            .await
            .map_err(|err| MatrixError::Http(err.to_string()))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|err| MatrixError::Http(err.to_string()))?;
        let uri = body
            .get("content_uri")
            .and_then(Value::as_str)
            .ok_or_else(|| MatrixError::Http("upload returned no content_uri".to_string()))?;
        Ok(ContentUri::new(uri))
    }

    async fn download_media(&self, uri: &ContentUri) -> Result<Vec<u8>, MatrixError> {
        let rest = uri
            .as_str()
            .strip_prefix("mxc://")
            .ok_or_else(|| MatrixError::Http(format!("invalid mxc URI {uri}")))?;
        let resp = self
            .http
            .get(self.url(&format!("/_matrix/media/v3/download/{rest}")))
            .bearer_auth(&self.as_token)
            .send()
            .await
            .map_err(|err| MatrixError::Http(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(MatrixError::Http(format!(
                "media download failed with {}",
                resp.status()
            )));
        }
        Ok(resp
            .bytes()
            .await
            .map_err(|err| MatrixError::Http(err.to_string()))?
            .to_vec())
    }

    fn supports_batch_send(&self) -> bool {
        self.batch_send_supported
    }

    async fn batch_send<'a>(
        &self,
        room: &RoomId,
        prev_event: &EventId,
        batch_id: Option<&'a str>,
        events: Vec<BatchEvent>,
    ) -> Result<BatchSendResponse, MatrixError> {
        if !self.batch_send_supported {
            return Err(MatrixError::Unsupported("batch send"));
        }
        let rendered: Vec<Value> = events
            .iter()
            .map(|event| {
                let (event_type, content) = Self::render_content(&event.content);
                json!({
                    "type": event_type,
                    "sender": event.sender.as_str(),
                    "origin_server_ts": event.timestamp,
                    "content": content,
                })
            })
            .collect();
        let mut query: Vec<(&str, String)> =
            vec![("prev_event_id", prev_event.as_str().to_string())];
        if let Some(batch_id) = batch_id {
            query.push(("batch_id", batch_id.to_string()));
        }
        let resp = self
            .call(
                reqwest::Method::POST,
                &format!("/_matrix/client/unstable/org.matrix.msc2716/rooms/{room}/batch_send"),
                None,
                &query,
                Some(json!({"events": rendered, "state_events_at_start": []})),
            )
            .await?;
        let event_ids = resp
            .get("event_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(EventId::new)
                    .collect()
            })
            .unwrap_or_default();
        Ok(BatchSendResponse {
            event_ids,
            base_insertion_event_id: resp
                .get("base_insertion_event_id")
                .and_then(Value::as_str)
                .map(EventId::new),
            next_batch_id: resp
                .get("next_batch_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn send_message_status(
        &self,
        room: &RoomId,
        event: &EventId,
        status: SendStatus,
    ) -> Result<(), MatrixError> {
        let (success, reason, can_retry) = match &status {
            SendStatus::Success => (true, None, false),
            SendStatus::RetriableFailure { reason } => (false, Some(reason.clone()), true),
            SendStatus::PermanentFailure { reason } => (false, Some(reason.clone()), false),
        };
        let mut content = json!({
            "network": "facebook",
            "success": success,
            "m.relates_to": {"rel_type": "m.reference", "event_id": event.as_str()},
        });
        if let Some(reason) = reason {
            content["reason"] = json!(reason);
            content["can_retry"] = json!(can_retry);
        }
        debug!("Reporting send status for {event}: {status:?}");
        self.call(
            reqwest::Method::PUT,
            &format!(
                "/_matrix/client/v3/rooms/{room}/send/com.beeper.message_send_status/{}",
                self.txn_id()
            ),
            None,
            &[],
            Some(content),
        )
        .await
        .map(|_| ())
    }

    async fn send_bridge_state(
        &self,
        user: &UserId,
        state: BridgeStateEvent,
        message: Option<String>,
    ) -> Result<(), MatrixError> {
        // The bridge-state push endpoint is deployment specific; the state
        // transitions are always logged so operators can follow along.
        match &message {
            Some(message) => info!("Bridge state for {user}: {state:?} ({message})"),
            None => info!("Bridge state for {user}: {state:?}"),
        }
        Ok(())
    }
}


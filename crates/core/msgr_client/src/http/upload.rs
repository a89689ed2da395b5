//! Media upload over the resumable-upload endpoint.
//!
//! The upload itself schedules server-side delivery of the message when a
//! chat id is given, so there is no separate send RPC for media.

use md5::Digest;
use md5::Md5;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

use crate::http::HttpClient;
use crate::http::HttpError;
use crate::http::RUPLOAD_URL;
use crate::state::AndroidApplication;
use crate::types::graphql::UploadResponse;

/// Target thread of a media send.
#[derive(Debug, Clone, Copy)]
pub struct MediaTarget {
    pub chat_id: i64,
    pub is_group: bool,
}

/// Optional attributes of a media send.
#[derive(Debug, Clone, Default)]
pub struct MediaOptions {
    pub reply_to: Option<String>,
    pub caption: Option<String>,
    pub duration_ms: Option<i64>,
    pub timestamp_ms: Option<i64>,
}

impl HttpClient {
    /// Upload a file and let the server deliver it to the thread.
    pub async fn send_media(
        &self,
        data: Vec<u8>,
        file_name: &str,
        mimetype: &str,
        offline_threading_id: i64,
        target: Option<MediaTarget>,
        options: MediaOptions,
    ) -> Result<UploadResponse, HttpError> {
        let state = self.snapshot();
        let mut headers = self.base_headers(&state);
        let mut put = |name: &'static str, value: String| {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        };
        put("accept-encoding", "x-fb-dz;d=1, gzip, deflate".to_string());
        put("app_id", AndroidApplication::CLIENT_ID.to_string());
        put("device_id", state.device_uuid().to_string());
        put("attempt_id", offline_threading_id.to_string());
        put("offset", "0".to_string());
        put("x-entity-length", data.len().to_string());
        put("x-entity-name", ascii_file_name(file_name));
        put("x-entity-type", mimetype.to_string());
        put("content-type", "application/octet-stream".to_string());
        put(
            "client_tags",
            serde_json::json!({
                "trigger": "2:thread_list:thread",
                "is_in_chatheads": "false",
                "is_in_bubbles": "false",
            })
            .to_string(),
        );
        let timestamp = options.timestamp_ms.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64
        });
        put("original_timestamp", timestamp.to_string());
        put("x-msgr-region", state.session.region_hint.clone());
        put("x-fb-friendly-name", "post_resumable_upload_session".to_string());

        match target {
            Some(target) => {
                put(
                    "thread_key_type",
                    if target.is_group { "GROUP" } else { "ONE_TO_ONE" }.to_string(),
                );
                put("send_message_by_server", "1".to_string());
                put(
                    "sender_fbid",
                    state.session.uid.unwrap_or_default().to_string(),
                );
                let to = if target.is_group {
                    format!("tfbid_{}", target.chat_id)
                } else {
                    target.chat_id.to_string()
                };
                put("to", to);
                put("offline_threading_id", offline_threading_id.to_string());
                put("ttl", "0".to_string());
                if let Some(reply_to) = &options.reply_to {
                    put("replied_to_message_id", reply_to.clone());
                }
                if let Some(caption) = &options.caption {
                    put("caption", BASE64.encode(caption.as_bytes()));
                }
            }
            None => {
                put("send_message_by_server", "0".to_string());
                put("thread_type_hint", "thread".to_string());
            }
        }

        let path_type = media_headers(&mut headers, mimetype, options.duration_ms);

        let file_id = format!("{}{offline_threading_id}", md5_hex(&data));
        debug!("Uploading {} bytes as {path_type}/{file_id}", data.len());
        let resp = self
            .http()
            .post(format!("{RUPLOAD_URL}/{path_type}/{file_id}"))
            .headers(headers)
            .body(data)
            .send()
            .await?;
        let body = self.handle_response(resp).await?;
        let parsed: UploadResponse = serde_json::from_value(body)?;
        if parsed.media_id.is_none() {
            if let Some(debug_info) = &parsed.debug_info {
                return Err(HttpError::Upload(
                    debug_info.message.clone().unwrap_or_default(),
                ));
            }
        }
        Ok(parsed)
    }
}

fn media_headers(
    headers: &mut HeaderMap,
    mimetype: &str,
    duration_ms: Option<i64>,
) -> &'static str {
    let mut put = |name: &'static str, value: &str| {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };
    if mimetype.starts_with("image/") {
        put("image_type", "FILE_ATTACHMENT");
        put("media_type", "PHOTO");
        put("media_send_type", "PICK");
        if mimetype == "image/gif" {
            "messenger_gif"
        } else {
            "messenger_image"
        }
    } else if mimetype.starts_with("video/") {
        put("video_type", "FILE_ATTACHMENT");
        put("media_type", "VIDEO");
        put("media_send_type", "PICK");
        "messenger_video"
    } else if mimetype.starts_with("audio/") {
        put("audio_type", "VOICE_MESSAGE");
        put("media_type", "AUDIO");
        put("media_send_type", "CAPTURE");
        put("is_voicemail", "0");
        if let Some(duration) = duration_ms {
            put("duration", &duration.to_string());
        }
        "messenger_audio"
    } else {
        put("file_type", "FILE_ATTACHMENT");
        put("media_type", "FILE");
        put("media_send_type", "PICK");
        "messenger_file"
    }
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Strip the file name down to ASCII, dropping everything else.
fn ascii_file_name(name: &str) -> String {
    name.chars().filter(char::is_ascii).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_file_name_drops_non_ascii() {
        assert_eq!(ascii_file_name("r\u{e9}sum\u{e9}.pdf"), "rsum.pdf");
        assert_eq!(ascii_file_name("plain.txt"), "plain.txt");
    }

    #[test]
    fn path_type_by_mimetype() {
        let mut headers = HeaderMap::new();
        assert_eq!(media_headers(&mut headers, "image/png", None), "messenger_image");
        assert_eq!(media_headers(&mut headers, "image/gif", None), "messenger_gif");
        assert_eq!(media_headers(&mut headers, "video/mp4", None), "messenger_video");
        assert_eq!(media_headers(&mut headers, "audio/mpeg", Some(100)), "messenger_audio");
        assert_eq!(media_headers(&mut headers, "application/pdf", None), "messenger_file");
    }
}

//! Login, two-factor and password-envelope handling.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use aes_gcm::aead::Aead;
use aes_gcm::aead::Payload;
use aes_gcm::Aes256Gcm;
use aes_gcm::KeyInit;
use aes_gcm::Nonce;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use rsa::pkcs8::DecodePublicKey;
use rsa::Pkcs1v15Encrypt;
use rsa::RsaPublicKey;
use tracing::debug;

use crate::http::errors::ErrorData;
use crate::http::HttpClient;
use crate::http::HttpError;
use crate::http::B_GRAPH_URL;
use crate::http::GRAPH_URL;
use crate::state::AndroidApplication;
use crate::state::AndroidState;
use crate::types::LoginResponse;
use crate::types::MobileConfig;
use crate::types::PasswordKeyResponse;

impl HttpClient {
    /// Fetch the RSA password key directly (legacy path).
    pub async fn pwd_key_fetch(&self) -> Result<PasswordKeyResponse, HttpError> {
        let state = self.snapshot();
        let mut form = self.base_params(&state);
        form.insert("version".to_string(), "2".to_string());
        form.insert("flow".to_string(), "CONTROLLER_INITIALIZATION".to_string());
        form.insert("method".to_string(), "GET".to_string());
        form.insert(
            "fb_api_req_friendly_name".to_string(),
            "pwdKeyFetch".to_string(),
        );
        form.insert(
            "fb_api_caller_class".to_string(),
            "com.facebook.auth.login.AuthOperations".to_string(),
        );
        form.insert("access_token".to_string(), state.application.access_token());
        let resp = self
            .http()
            .post(format!("{GRAPH_URL}//pwd_key_fetch"))
            .headers(self.base_headers(&state))
            .body(self.format_form(form, false, &[]))
            .send()
            .await?;
        let body = self.handle_response(resp).await?;
        let parsed: PasswordKeyResponse = serde_json::from_value(body)?;
        self.update_state(|state| {
            state.session.password_encryption_pubkey = Some(parsed.public_key.clone());
            state.session.password_encryption_key_id = Some(parsed.key_id);
        });
        Ok(parsed)
    }

    /// Fetch the sessionless mobile config and pull the password encryption
    /// material out of config #15712 (field 1 = key id, field 2 = pubkey).
    pub async fn mobile_config_sessionless(&self) -> Result<MobileConfig, HttpError> {
        let state = self.snapshot();
        let mut form = self.base_params(&state);
        form.insert(
            "query_hash".to_string(),
            "4d43269ae03c31739a1e8542bc0d1da3c0acb1a85de6903ee9f669e2bc4b7af7".to_string(),
        );
        form.insert(
            "one_query_hash".to_string(),
            "835e01d247719369d2affa524786437bd4ad9443e351d95eb95d23d4aed357c7".to_string(),
        );
        form.insert("bool_opt_policy".to_string(), "3".to_string());
        form.insert("device_id".to_string(), state.device_uuid().to_string());
        form.insert("api_version".to_string(), "8".to_string());
        form.insert("fetch_type".to_string(), "SYNC_FULL".to_string());
        form.insert("unit_type".to_string(), "1".to_string());
        form.insert("access_token".to_string(), state.application.access_token());
        let mut headers = self.base_headers(&state);
        headers.remove("x-fb-rmd");
        let resp = self
            .http()
            .post(format!("{B_GRAPH_URL}/mobileconfigsessionless"))
            .headers(headers)
            .body(self.format_form(form, false, &[]))
            .send()
            .await?;
        let body = self.handle_response(resp).await?;
        let parsed: MobileConfig = serde_json::from_value(body)?;
        let key_id = parsed
            .find(MobileConfig::PASSWORD_KEY_CONFIG, 1)
            .and_then(|field| field.i64);
        let pubkey = parsed
            .find(MobileConfig::PASSWORD_KEY_CONFIG, 2)
            .and_then(|field| field.str.clone());
        self.update_state(|state| {
            state.session.password_encryption_key_id = key_id;
            state.session.password_encryption_pubkey = pubkey;
        });
        Ok(parsed)
    }

    /// Log in with an email and either a plain or pre-encrypted password.
    pub async fn login(
        &self,
        email: &str,
        password: Option<&str>,
        encrypted_password: Option<&str>,
    ) -> Result<LoginResponse, HttpError> {
        let encrypted = match (password, encrypted_password) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(HttpError::PasswordEncryption(
                    "exactly one of password or encrypted_password is required".to_string(),
                ))
            }
            (Some(plain), None) => self.encrypt_password(plain)?,
            (None, Some(encrypted)) => encrypted.to_string(),
        };
        self.do_login(vec![
            ("email", email.to_string()),
            ("password", encrypted),
            ("credentials_type", "password".to_string()),
        ])
        .await
    }

    /// Finish a login that returned TwoFactorRequired, using the code the
    /// user received.
    pub async fn login_2fa(&self, email: &str, code: &str) -> Result<LoginResponse, HttpError> {
        let session = self.snapshot().session;
        let first_factor = session
            .login_first_factor
            .ok_or(HttpError::NoLoginInProgress("login_2fa"))?;
        self.do_login(vec![
            ("email", email.to_string()),
            ("password", code.to_string()),
            ("twofactor_code", code.to_string()),
            ("encrypted_msisdn", String::new()),
            ("currently_logged_in_userid", "0".to_string()),
            ("userid", session.uid.unwrap_or_default().to_string()),
            ("machine_id", session.machine_id.unwrap_or_default()),
            ("first_factor", first_factor),
            ("credentials_type", "two_factor".to_string()),
        ])
        .await
    }

    /// Finish a login after the user approved it from another device.
    pub async fn login_approved(&self) -> Result<LoginResponse, HttpError> {
        let session = self.snapshot().session;
        let transient_token = session
            .transient_auth_token
            .ok_or(HttpError::NoLoginInProgress("login_approved"))?;
        self.do_login(vec![
            ("email", session.uid.unwrap_or_default().to_string()),
            ("password", transient_token),
            ("encrypted_msisdn", String::new()),
            ("credentials_type", "transient_token".to_string()),
        ])
        .await
    }

    /// Invalidate the session server-side.
    pub async fn logout(&self) -> Result<bool, HttpError> {
        let state = self.snapshot();
        let mut form = self.base_params(&state);
        form.insert(
            "fb_api_req_friendly_name".to_string(),
            "logout".to_string(),
        );
        form.insert(
            "fb_api_caller_class".to_string(),
            "AuthOperations".to_string(),
        );
        let mut headers = self.base_headers(&state);
        if let Ok(value) = HeaderValue::from_str("logout") {
            headers.insert(HeaderName::from_static("x-fb-friendly-name"), value);
        }
        let resp = self
            .http()
            .post(format!("{B_GRAPH_URL}/auth/expire_session"))
            .headers(headers)
            .body(self.format_form(form, false, &[]))
            .send()
            .await?;
        Ok(resp.text().await? == "true")
    }

    async fn do_login(&self, fields: Vec<(&str, String)>) -> Result<LoginResponse, HttpError> {
        let state = self.snapshot();
        let mut form = self.base_params(&state);
        form.insert(
            "adid".to_string(),
            state.device.adid.clone().unwrap_or_default(),
        );
        form.insert("api_key".to_string(), AndroidApplication::CLIENT_ID.to_string());
        form.insert("community_id".to_string(), String::new());
        form.insert("secure_family_device_id".to_string(), String::new());
        form.insert("cpl".to_string(), "true".to_string());
        form.insert("currently_logged_in_userid".to_string(), "0".to_string());
        form.insert("device_id".to_string(), state.device_uuid().to_string());
        form.insert(
            "fb_api_caller_class".to_string(),
            "AuthOperations$PasswordAuthOperation".to_string(),
        );
        form.insert(
            "fb_api_req_friendly_name".to_string(),
            "authenticate".to_string(),
        );
        form.insert("format".to_string(), "json".to_string());
        form.insert("generate_analytics_claim".to_string(), "1".to_string());
        form.insert("generate_machine_id".to_string(), "1".to_string());
        form.insert("generate_session_cookies".to_string(), "1".to_string());
        form.insert("jazoest".to_string(), jazoest(state.device_uuid()));
        form.insert("meta_inf_fbmeta".to_string(), "NO_FILE".to_string());
        form.insert("source".to_string(), "login".to_string());
        form.insert("try_num".to_string(), "1".to_string());
        for (key, value) in fields {
            form.insert(key.to_string(), value);
        }
        let body = self.format_form(
            form,
            true,
            &[("access_token", state.application.access_token())],
        );
        let mut headers = self.base_headers(&state);
        headers.remove("x-fb-rmd");
        headers.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(
            HeaderName::from_static("x-fb-friendly-name"),
            HeaderValue::from_static("authenticate"),
        );
        let resp = self
            .http()
            .post(format!("{B_GRAPH_URL}/auth/login"))
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let result = self.handle_response(resp).await;
        match result {
            Err(HttpError::TwoFactorRequired(data)) => {
                debug!("Two-factor login required, storing transient auth state");
                self.store_two_factor_state(&data);
                Err(HttpError::TwoFactorRequired(data))
            }
            Err(err) => Err(err),
            Ok(body) => {
                let parsed: LoginResponse = serde_json::from_value(body)?;
                self.update_state(|state| {
                    state.session.access_token = Some(parsed.access_token.clone());
                    state.session.uid = Some(parsed.uid);
                    state.session.machine_id = parsed.machine_id.clone();
                    state.session.login_first_factor = None;
                });
                Ok(parsed)
            }
        }
    }

    fn store_two_factor_state(&self, data: &ErrorData) {
        let Some(tfa) = &data.error_data else {
            return;
        };
        self.update_state(|state| {
            state.session.machine_id = tfa.machine_id.clone();
            state.session.uid = tfa.uid;
            state.session.login_first_factor = tfa.login_first_factor.clone();
            state.session.transient_auth_token = tfa.auth_token.clone();
        });
    }

    /// Build the `#PWD_MSGR:1:<epoch>:<base64>` password envelope.
    ///
    /// Layout: version byte, key id byte, 12-byte IV, LE u16 length of the
    /// RSA-encrypted AES key, the encrypted key, the 16-byte GCM tag, then
    /// the ciphertext. The unix time (seconds, decimal) is the GCM
    /// associated data.
    pub fn encrypt_password(&self, password: &str) -> Result<String, HttpError> {
        let state = self.snapshot();
        self.encrypt_password_at(
            &state,
            password,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            rand::thread_rng().gen(),
            rand::thread_rng().gen(),
        )
    }

    pub(crate) fn encrypt_password_at(
        &self,
        state: &AndroidState,
        password: &str,
        unix_time: u64,
        aes_key: [u8; 32],
        iv: [u8; 12],
    ) -> Result<String, HttpError> {
        let pubkey_pem = state
            .session
            .password_encryption_pubkey
            .as_deref()
            .ok_or(HttpError::MissingPasswordKey)?;
        let key_id = state
            .session
            .password_encryption_key_id
            .ok_or(HttpError::MissingPasswordKey)?;
        let pubkey = RsaPublicKey::from_public_key_pem(pubkey_pem)
            .map_err(|err| HttpError::PasswordEncryption(err.to_string()))?;
        let encrypted_key = pubkey
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, &aes_key)
            .map_err(|err| HttpError::PasswordEncryption(err.to_string()))?;

        let time_str = unix_time.to_string();
        let cipher = Aes256Gcm::new_from_slice(&aes_key)
            .map_err(|err| HttpError::PasswordEncryption(err.to_string()))?;
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: password.as_bytes(),
                    aad: time_str.as_bytes(),
                },
            )
            .map_err(|err| HttpError::PasswordEncryption(err.to_string()))?;
        // aes-gcm appends the tag; the wire format wants it before the text.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - 16);

        let mut buf = Vec::with_capacity(2 + 12 + 2 + encrypted_key.len() + sealed.len());
        buf.push(1);
        buf.push(key_id as u8);
        buf.extend_from_slice(&iv);
        buf.extend_from_slice(&(encrypted_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&encrypted_key);
        buf.extend_from_slice(tag);
        buf.extend_from_slice(ciphertext);
        Ok(format!("#PWD_MSGR:1:{time_str}:{}", BASE64.encode(buf)))
    }
}

/// `"2"` followed by the sum of the code points of the device uuid. Required
/// for server acceptance; the formula has no documented meaning.
pub(crate) fn jazoest(device_uuid: &str) -> String {
    let sum: u32 = device_uuid.chars().map(|c| c as u32).sum();
    format!("2{sum}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_factor_error_mutates_the_session() {
        use crate::http::TwoFactorData;

        let state_handle =
            std::sync::Arc::new(std::sync::Mutex::new(crate::state::AndroidState::default()));
        let client = HttpClient::new(state_handle).unwrap();
        let error = ErrorData {
            code: Some(406),
            error_data: Some(TwoFactorData {
                login_first_factor: Some("first-factor".to_string()),
                machine_id: Some("machine".to_string()),
                auth_token: Some("transient".to_string()),
                uid: Some(999),
            }),
            ..ErrorData::default()
        };
        client.store_two_factor_state(&error);
        let session = client.snapshot().session;
        assert_eq!(session.machine_id.as_deref(), Some("machine"));
        assert_eq!(session.uid, Some(999));
        assert_eq!(session.login_first_factor.as_deref(), Some("first-factor"));
        assert_eq!(session.transient_auth_token.as_deref(), Some("transient"));
        assert!(session.access_token.is_none());
    }

    #[test]
    fn jazoest_sums_code_points() {
        assert_eq!(jazoest("abc"), format!("2{}", 97 + 98 + 99));
        assert_eq!(jazoest(""), "20");
    }

    #[test]
    fn password_envelope_layout() {
        use rsa::pkcs8::EncodePublicKey;
        use rsa::RsaPrivateKey;

        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = private_key
            .to_public_key()
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap();

        let state_handle =
            std::sync::Arc::new(std::sync::Mutex::new(crate::state::AndroidState::default()));
        {
            let mut state = state_handle.lock().unwrap();
            state.session.password_encryption_pubkey = Some(pem);
            state.session.password_encryption_key_id = Some(77);
        }
        let client = HttpClient::new(state_handle.clone()).unwrap();
        let state = client.snapshot();

        let envelope = client
            .encrypt_password_at(&state, "hunter2", 1_650_000_000, [7u8; 32], [9u8; 12])
            .unwrap();
        let mut parts = envelope.splitn(4, ':');
        assert_eq!(parts.next(), Some("#PWD_MSGR"));
        assert_eq!(parts.next(), Some("1"));
        assert_eq!(parts.next(), Some("1650000000"));
        let raw = BASE64.decode(parts.next().unwrap()).unwrap();
        assert_eq!(raw[0], 1);
        assert_eq!(raw[1], 77);
        // IV follows, then the LE key length.
        assert_eq!(&raw[2..14], &[9u8; 12]);
        let key_len = u16::from_le_bytes([raw[14], raw[15]]) as usize;
        assert_eq!(key_len, 256);
        // 16-byte tag plus "hunter2" ciphertext round out the envelope.
        assert_eq!(raw.len(), 16 + key_len + 16 + 7);
    }
}

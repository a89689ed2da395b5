//! HTTP/GraphQL half of the client.
//!
//! All requests carry the emulated app's header set and an
//! `OAuth <token or "null">` authorization. Form bodies are alphabetized and
//! optionally signed with an MD5 of the sorted fields plus the client secret.
//! Responses marked `x-fb-dz` are decompressed with a dictionary-seeded zstd
//! decoder before JSON parsing.

mod api;
mod errors;
mod login;
mod upload;

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::sync::Mutex;

use md5::Digest;
use md5::Md5;
use once_cell::sync::Lazy;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use serde_json::Value;
use tracing::trace;
use tracing::warn;
use url::form_urlencoded;
use zstd::dict::DecoderDictionary;

pub use errors::ErrorData;
pub use errors::HttpError;
pub use errors::TwoFactorData;
pub use upload::MediaOptions;
pub use upload::MediaTarget;

use crate::state::AndroidApplication;
use crate::state::AndroidState;
use crate::types::graphql::GraphQlQuery;

pub const A_URL: &str = "https://api.facebook.com";
pub const B_URL: &str = "https://b-api.facebook.com";
pub const GRAPH_URL: &str = "https://graph.facebook.com";
pub const B_GRAPH_URL: &str = "https://b-graph.facebook.com";
pub const RUPLOAD_URL: &str = "https://rupload.facebook.com";

/// Dictionary for `x-fb-dz` content encoding. Shipped as an opaque blob.
static ZSTD_DICT: Lazy<DecoderDictionary<'static>> =
    Lazy::new(|| DecoderDictionary::copy(include_bytes!("../../assets/zstd-dict.dat")));

pub type SharedState = Arc<Mutex<AndroidState>>;

/// The request/response half of the Messenger client.
pub struct HttpClient {
    http: reqwest::Client,
    state: SharedState,
}

impl HttpClient {
    /// Build a client with a keep-alive pool. Proxies are picked up from the
    /// conventional environment variables.
    pub fn new(state: SharedState) -> Result<HttpClient, HttpError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .build()?;
        Ok(HttpClient { http, state })
    }

    pub fn shared_state(&self) -> SharedState {
        self.state.clone()
    }

    /// A point-in-time copy of the account state.
    pub fn snapshot(&self) -> AndroidState {
        self.state.lock().unwrap().clone()
    }

    pub fn update_state(&self, update: impl FnOnce(&mut AndroidState)) {
        let mut state = self.state.lock().unwrap();
        update(&mut state);
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The fixed header set carried by every request.
    pub(crate) fn base_headers(&self, state: &AndroidState) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: String| {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        };
        put("x-fb-connection-quality", state.device.connection_quality.clone());
        put("x-fb-connection-type", state.device.connection_type.clone());
        put("user-agent", state.user_agent());
        put("x-tigon-is-retry", "False".to_string());
        put("x-fb-http-engine", "Liger".to_string());
        put("x-fb-client-ip", "True".to_string());
        put("x-fb-server-cluster", "True".to_string());
        if let Some(group) = &state.device.device_group {
            put("x-fb-device-group", group.clone());
        }
        put("x-fb-sim-hni", state.carrier.hni.to_string());
        put("x-fb-net-hni", state.carrier.hni.to_string());
        put("x-fb-rmd", "cached=0;state=NO_MATCH".to_string());
        put("x-fb-request-analytics-tags", "unknown".to_string());
        let token = state
            .session
            .access_token
            .clone()
            .unwrap_or_else(|| "null".to_string());
        put("authorization", format!("OAuth {token}"));
        headers
    }

    /// Locale parameters present on every form body.
    pub(crate) fn base_params(&self, state: &AndroidState) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("locale".to_string(), state.device.language.clone()),
            (
                "client_country_code".to_string(),
                state.device.country_code.clone(),
            ),
        ])
    }

    /// Alphabetize the form, optionally attach the MD5 signature, and
    /// URL-encode the result (keys re-sorted once more after `sig`).
    pub(crate) fn format_form(
        &self,
        mut form: BTreeMap<String, String>,
        sign: bool,
        extra: &[(&str, String)],
    ) -> String {
        if sign {
            let sig_data: String = form
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            let mut hasher = Md5::new();
            hasher.update(sig_data.as_bytes());
            hasher.update(AndroidApplication::CLIENT_SECRET.as_bytes());
            let sig: String = hasher
                .finalize()
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect();
            form.insert("sig".to_string(), sig);
        }
        for (key, value) in extra {
            form.insert((*key).to_string(), value.clone());
        }
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &form {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    /// Decompress an `x-fb-dz` body with the shipped dictionary.
    fn decompress_zstd(data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decoder = zstd::stream::read::Decoder::with_prepared_dictionary(data, &ZSTD_DICT)?;
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Shared response handling: zstd, JSON, and the Graph error taxonomy.
    pub(crate) async fn handle_response(
        &self,
        resp: reqwest::Response,
    ) -> Result<Value, HttpError> {
        let status = resp.status().as_u16();
        let is_dz = resp
            .headers()
            .get("content-encoding")
            .map(|value| value.as_bytes() == b"x-fb-dz")
            .unwrap_or(false)
            && resp
                .headers()
                .get("x-fb-dz-dict")
                .map(|value| value.as_bytes() == b"1")
                .unwrap_or(false);
        let bytes = resp.bytes().await?;
        let bytes = if is_dz {
            match Self::decompress_zstd(&bytes) {
                Ok(decompressed) => {
                    trace!(
                        "Decompressed {} bytes of zstd into {} bytes",
                        bytes.len(),
                        decompressed.len()
                    );
                    decompressed
                }
                Err(err) => {
                    return Err(HttpError::ResponseType {
                        status,
                        body: format!("zstd decompression failed: {err}"),
                    })
                }
            }
        } else {
            bytes.to_vec()
        };
        let body: Value = serde_json::from_slice(&bytes).map_err(|_| HttpError::ResponseType {
            status,
            body: String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).to_string(),
        })?;
        Self::check_body_errors(status, &body)?;
        Ok(body)
    }

    pub(crate) fn check_body_errors(status: u16, body: &Value) -> Result<(), HttpError> {
        if let Some(error) = body.get("error") {
            if !error.is_null() {
                let data: ErrorData =
                    serde_json::from_value(error.clone()).unwrap_or_default();
                trace!("Got error object in response data: {error}");
                return Err(HttpError::classify(data));
            }
        }
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                warn!("Got list of errors in response data");
                let data_missing = body
                    .get("data")
                    .map(|data| data.is_null())
                    .unwrap_or(true);
                if status >= 400 || data_missing {
                    return Err(HttpError::GraphQl {
                        first: errors[0].clone(),
                        other_count: errors.len() - 1,
                    });
                }
            }
        }
        Ok(())
    }

    /// Download a file from a CDN URL. The authorization header is only
    /// attached for first-party hosts.
    pub async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        let state = self.snapshot();
        let mut headers = self.base_headers(&state);
        let first_party = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|host| host.ends_with(".facebook.com")))
            .unwrap_or(false);
        if !first_party {
            headers.remove("authorization");
        }
        let resp = self.http.get(url).headers(headers).send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Execute a persisted GraphQL query and drill into `path`.
    pub async fn graphql<Q, R>(&self, query: &Q, path: &[&'static str]) -> Result<R, HttpError>
    where
        Q: GraphQlQuery,
        R: serde::de::DeserializeOwned,
    {
        let value = self.graphql_value(query, path).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn graphql_value<Q: GraphQlQuery>(
        &self,
        query: &Q,
        path: &[&'static str],
    ) -> Result<Value, HttpError> {
        let state = self.snapshot();
        let mut variables = serde_json::to_value(query)?;
        if Q::IS_MUTATION {
            variables = serde_json::json!({ "input": variables });
        }
        let mut form = self.base_params(&state);
        form.insert("variables".to_string(), variables.to_string());
        form.insert("method".to_string(), "post".to_string());
        form.insert("doc_id".to_string(), Q::DOC_ID.to_string());
        form.insert("format".to_string(), "json".to_string());
        form.insert("pretty".to_string(), "false".to_string());
        form.insert("strip_defaults".to_string(), "false".to_string());
        form.insert("strip_nulls".to_string(), "false".to_string());
        form.insert(
            "fb_api_req_friendly_name".to_string(),
            Q::FRIENDLY_NAME.to_string(),
        );
        form.insert("fb_api_caller_class".to_string(), Q::CALLER_CLASS.to_string());
        form.insert(
            "fb_api_analytics_tags".to_string(),
            serde_json::json!(["GraphServices"]).to_string(),
        );
        form.insert("server_timestamps".to_string(), "true".to_string());

        let mut headers = self.base_headers(&state);
        headers.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        if let Ok(name) = HeaderValue::from_str(Q::FRIENDLY_NAME) {
            headers.insert(HeaderName::from_static("x-fb-friendly-name"), name);
        }
        headers.insert(
            HeaderName::from_static("x-fb-request-analytics-tags"),
            HeaderValue::from_static("graphservice"),
        );
        headers.insert(
            HeaderName::from_static("accept-encoding"),
            HeaderValue::from_static("x-fb-dz;d=1, gzip, deflate"),
        );

        let resp = self
            .http
            .post(format!("{B_GRAPH_URL}/graphql"))
            .headers(headers)
            .body(self.format_form(form, false, &[]))
            .send()
            .await?;
        let mut value = self.handle_response(resp).await?;
        for part in path {
            value = value
                .get_mut(*part)
                .map(Value::take)
                .ok_or(HttpError::MissingData(*part))?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpClient {
        HttpClient::new(Arc::new(Mutex::new(AndroidState::default()))).unwrap()
    }

    #[test]
    fn signed_form_is_sorted_and_signed() {
        let client = client();
        let form = BTreeMap::from([
            ("zeta".to_string(), "1".to_string()),
            ("alpha".to_string(), "2".to_string()),
        ]);
        let encoded = client.format_form(form, true, &[]);
        // Keys stay alphabetized with sig spliced in.
        assert!(encoded.starts_with("alpha=2&sig="));
        assert!(encoded.ends_with("&zeta=1"));
        let sig = encoded.split("sig=").nth(1).unwrap().split('&').next().unwrap();
        assert_eq!(sig.len(), 32);
    }

    #[test]
    fn auth_header_is_null_without_token() {
        let client = client();
        let state = client.snapshot();
        let headers = client.base_headers(&state);
        assert_eq!(headers.get("authorization").unwrap(), "OAuth null");
        assert_eq!(headers.get("x-fb-http-engine").unwrap(), "Liger");
    }

    #[test]
    fn error_object_fails_response() {
        let body = serde_json::json!({"error": {"code": 190, "message": "expired"}});
        let err = HttpClient::check_body_errors(200, &body).unwrap_err();
        assert!(matches!(err, HttpError::InvalidAccessToken(_)));
    }

    #[test]
    fn error_list_passes_when_data_present() {
        let body = serde_json::json!({
            "errors": [{"message": "partial"}],
            "data": {"viewer": {}},
        });
        assert!(HttpClient::check_body_errors(200, &body).is_ok());
        let body = serde_json::json!({"errors": [{"message": "fatal"}]});
        let err = HttpClient::check_body_errors(200, &body).unwrap_err();
        assert!(matches!(err, HttpError::GraphQl { other_count: 0, .. }));
    }
}

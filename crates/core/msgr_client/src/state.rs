use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

/// Identity of the emulated Android application build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidApplication {
    pub name: String,
    pub version: String,
    pub id: String,
    pub locale: String,
    pub build: i64,
    pub version_id: i64,
}

impl Default for AndroidApplication {
    fn default() -> Self {
        AndroidApplication {
            name: "Orca-Android".to_string(),
            version: "294.0.0.24.129".to_string(),
            id: "com.facebook.orca".to_string(),
            locale: "en_US".to_string(),
            build: 263695262,
            version_id: 3402226163209239,
        }
    }
}

impl AndroidApplication {
    pub const CLIENT_ID: &'static str = "256002347743983";
    pub const CLIENT_SECRET: &'static str = "374e60f8b9bb6b8cbb30f78030438895";

    /// The application-level access token used for sessionless calls.
    pub fn access_token(&self) -> String {
        format!("{}|{}", Self::CLIENT_ID, Self::CLIENT_SECRET)
    }
}

/// Identity of the emulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidDevice {
    pub manufacturer: String,
    pub builder: String,
    pub name: String,
    pub software: String,
    pub architecture: String,
    pub dimensions: String,
    pub user_agent: String,
    pub connection_type: String,
    pub connection_quality: String,
    pub language: String,
    pub country_code: String,
    pub uuid: Option<String>,
    pub adid: Option<String>,
    pub fdid: Option<String>,
    pub device_group: Option<String>,
}

impl Default for AndroidDevice {
    fn default() -> Self {
        AndroidDevice {
            manufacturer: "Google".to_string(),
            builder: "google".to_string(),
            name: "Pixel 3".to_string(),
            software: "10".to_string(),
            architecture: "arm64-v8a:null".to_string(),
            dimensions: "{density=2.75,width=1080,height=2028}".to_string(),
            user_agent: "Dalvik/2.1.0 (Linux; U; Android 10; Pixel 3 Build/QQ3A.200605.001)"
                .to_string(),
            connection_type: "WIFI".to_string(),
            connection_quality: "EXCELLENT".to_string(),
            language: "en_US".to_string(),
            country_code: "US".to_string(),
            uuid: None,
            adid: None,
            fdid: None,
            device_group: None,
        }
    }
}

/// Carrier advertised in request headers and the realtime client info.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidCarrier {
    pub name: String,
    pub hni: i64,
}

impl Default for AndroidCarrier {
    fn default() -> Self {
        AndroidCarrier {
            name: "Verizon".to_string(),
            hni: 311390,
        }
    }
}

/// Auth tokens and login-flow scratch state.
///
/// For a logged-in account, `access_token`, `uid` and `machine_id` are either
/// all set or all unset. The two-factor fields only live between the 406
/// response and the follow-up login call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidSession {
    pub access_token: Option<String>,
    pub uid: Option<i64>,
    pub password_encryption_pubkey: Option<String>,
    pub password_encryption_key_id: Option<i64>,
    pub machine_id: Option<String>,
    pub transient_auth_token: Option<String>,
    pub login_first_factor: Option<String>,
    pub region_hint: String,
}

impl Default for AndroidSession {
    fn default() -> Self {
        AndroidSession {
            access_token: None,
            uid: None,
            password_encryption_pubkey: None,
            password_encryption_key_id: None,
            machine_id: None,
            transient_auth_token: None,
            login_first_factor: None,
            region_hint: AndroidState::DEFAULT_REGION_HINT.to_string(),
        }
    }
}

/// The whole per-account client state blob, persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidState {
    pub application: AndroidApplication,
    pub device: AndroidDevice,
    pub carrier: AndroidCarrier,
    pub session: AndroidSession,
}

impl AndroidState {
    pub const DEFAULT_REGION_HINT: &'static str = "ODN";

    /// Derive the device identity deterministically from the configured seed
    /// and an external account handle, so repeated logins of the same user
    /// present the same device.
    pub fn generate(&mut self, seed: &str, handle: &str) {
        let digest = hmac_sha256(seed.as_bytes(), handle.as_bytes());
        let adid: String = digest[..8].iter().map(|byte| format!("{byte:02x}")).collect();
        let uuid_bytes: [u8; 16] = digest[8..24].try_into().unwrap();
        self.device.adid = Some(adid);
        self.device.uuid = Some(Uuid::from_bytes(uuid_bytes).to_string());
        let fdid_bytes: [u8; 16] = digest[16..32].try_into().unwrap();
        self.device.fdid = Some(Uuid::from_bytes(fdid_bytes).to_string());
        if self.session.region_hint.is_empty() {
            self.session.region_hint = Self::DEFAULT_REGION_HINT.to_string();
        }
    }

    pub fn device_uuid(&self) -> &str {
        self.device.uuid.as_deref().unwrap_or_default()
    }

    fn ua_parts(&self) -> Vec<(&'static str, String)> {
        vec![
            ("FBAN", self.application.name.clone()),
            ("FBAV", self.application.version.clone()),
            ("FBPN", self.application.id.clone()),
            ("FBLC", self.device.language.clone()),
            ("FBBV", self.application.build.to_string()),
            ("FBCR", self.carrier.name.clone()),
            ("FBMF", self.device.manufacturer.clone()),
            ("FBBD", self.device.builder.clone()),
            ("FBDV", self.device.name.clone()),
            ("FBSV", self.device.software.clone()),
            ("FBCA", self.device.architecture.clone()),
            ("FBDM", self.device.dimensions.clone()),
            ("FB_FW", "1".to_string()),
        ]
    }

    /// The bracketed metadata blob appended to the HTTP user agent and sent
    /// in the realtime client info.
    pub fn user_agent_meta(&self) -> String {
        let meta: Vec<String> = self
            .ua_parts()
            .into_iter()
            .map(|(key, value)| format!("{key}/{value}"))
            .collect();
        format!("[{};]", meta.join(";"))
    }

    /// A reduced metadata blob used when resuming with a connect token hash.
    pub fn minimal_user_agent_meta(&self) -> String {
        format!(
            "[FBAN/{};FBAV/{};]",
            self.application.name, self.application.version
        )
    }

    pub fn user_agent(&self) -> String {
        format!("{} {}", self.device.user_agent, self.user_agent_meta())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_deterministic() {
        let mut first = AndroidState::default();
        first.generate("seed", "@user:example.com");
        let mut second = AndroidState::default();
        second.generate("seed", "@user:example.com");
        assert_eq!(first.device.uuid, second.device.uuid);
        assert_eq!(first.device.adid, second.device.adid);

        let mut other = AndroidState::default();
        other.generate("seed", "@other:example.com");
        assert_ne!(first.device.uuid, other.device.uuid);
    }

    #[test]
    fn user_agent_contains_app_and_device() {
        let state = AndroidState::default();
        let ua = state.user_agent();
        assert!(ua.contains("FBAN/Orca-Android"));
        assert!(ua.contains("FBDV/Pixel 3"));
        assert!(ua.starts_with("Dalvik/2.1.0"));
    }

    #[test]
    fn state_roundtrips_through_json() {
        let mut state = AndroidState::default();
        state.generate("seed", "@user:example.com");
        state.session.access_token = Some("token".to_string());
        state.session.uid = Some(12345);
        let json = serde_json::to_string(&state).unwrap();
        let back: AndroidState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session.access_token.as_deref(), Some("token"));
        assert_eq!(back.device.uuid, state.device.uuid);
    }
}

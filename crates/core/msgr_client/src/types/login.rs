//! Responses of the login endpoints.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub session_key: Option<String>,
    pub uid: i64,
    pub access_token: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub analytics_claim: Option<String>,
    #[serde(default)]
    pub user_storage_key: Option<String>,
}

/// One field of a mobile-config entry. The interesting ones for login are
/// `i64` (the password-encryption key id) and `str` (the RSA public key).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MobileConfigField {
    pub k: i64,
    #[serde(default)]
    pub bln: Option<i64>,
    #[serde(default)]
    pub i64: Option<i64>,
    #[serde(default)]
    pub str: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MobileConfigItem {
    #[serde(default)]
    pub fields: Vec<MobileConfigField>,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Sessionless mobile config. The password encryption material lives at
/// config #15712: field #1 is the key id, field #2 the RSA public key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MobileConfig {
    #[serde(default)]
    pub configs: HashMap<String, MobileConfigItem>,
    #[serde(default)]
    pub ts: i64,
}

impl MobileConfig {
    pub const PASSWORD_KEY_CONFIG: i64 = 15712;

    pub fn find(&self, number: i64, field_k: i64) -> Option<&MobileConfigField> {
        self.configs
            .get(&number.to_string())?
            .fields
            .iter()
            .find(|field| field.k == field_k)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordKeyResponse {
    pub public_key: String,
    pub key_id: i64,
    #[serde(default)]
    pub seconds_to_live: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_config_find_extracts_password_key() {
        let json = serde_json::json!({
            "configs": {
                "15712": {
                    "fields": [
                        {"k": 1, "i64": 77},
                        {"k": 2, "str": "-----BEGIN PUBLIC KEY-----..."},
                    ],
                    "hash": "abc",
                },
            },
            "ts": 1650000000,
        });
        let config: MobileConfig = serde_json::from_value(json).unwrap();
        let key_id = config.find(MobileConfig::PASSWORD_KEY_CONFIG, 1).unwrap();
        assert_eq!(key_id.i64, Some(77));
        let pubkey = config.find(MobileConfig::PASSWORD_KEY_CONFIG, 2).unwrap();
        assert!(pubkey.str.as_deref().unwrap().starts_with("-----BEGIN"));
    }
}

//! Bridge configuration, merged from a TOML file and environment overrides.

use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Toml;
use figment::Figment;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub homeserver: HomeserverConfig,
    pub appservice: AppserviceConfig,
    pub facebook: FacebookConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            homeserver: HomeserverConfig::default(),
            appservice: AppserviceConfig::default(),
            facebook: FacebookConfig::default(),
            bridge: BridgeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeserverConfig {
    /// Base URL of the client-server API.
    pub address: String,
    /// The server name used in user ids.
    pub domain: String,
}

impl Default for HomeserverConfig {
    fn default() -> Self {
        HomeserverConfig {
            address: "http://localhost:8008".to_string(),
            domain: "example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppserviceConfig {
    /// SQLite database path or URI.
    pub database: String,
    pub as_token: String,
    pub bot_username: String,
}

impl Default for AppserviceConfig {
    fn default() -> Self {
        AppserviceConfig {
            database: "sqlite:msgr-bridge.db".to_string(),
            as_token: String::new(),
            bot_username: "facebookbot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacebookConfig {
    /// Seed for deterministic per-user device identities.
    pub device_seed: String,
    pub default_region_hint: String,
    pub connection_type: String,
    pub carrier: String,
    pub hni: i64,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        FacebookConfig {
            device_seed: "generate".to_string(),
            default_region_hint: "ODN".to_string(),
            connection_type: "WIFI".to_string(),
            carrier: "Verizon".to_string(),
            hni: 311390,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// `{userid}` is replaced with the remote user id.
    pub username_template: String,
    pub displayname_template: String,
    pub command_prefix: String,
    pub initial_chat_sync: i32,
    pub periodic_reconnect: PeriodicReconnectConfig,
    pub on_reconnection_fail: ReconnectionFailConfig,
    pub backfill: BackfillConfig,
    /// Resync threads after reconnecting when the disconnection lasted less
    /// than this many seconds.
    pub resync_max_disconnected_time: i64,
    pub presence_from_facebook: bool,
    pub sandbox_media_download: bool,
    pub temporary_disconnect_notices: bool,
    pub delivery_receipts: bool,
    pub bridge_matrix_notices: bool,
    pub encryption_default: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            username_template: "facebook_{userid}".to_string(),
            displayname_template: "{displayname} (FB)".to_string(),
            command_prefix: "!fb".to_string(),
            initial_chat_sync: 10,
            periodic_reconnect: PeriodicReconnectConfig::default(),
            on_reconnection_fail: ReconnectionFailConfig::default(),
            backfill: BackfillConfig::default(),
            resync_max_disconnected_time: 5,
            presence_from_facebook: false,
            sandbox_media_download: false,
            temporary_disconnect_notices: true,
            delivery_receipts: false,
            bridge_matrix_notices: true,
            encryption_default: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicReconnectConfig {
    /// Seconds between forced reconnects; 0 disables the driver.
    pub interval: i64,
    /// `reconnect` or `refresh`.
    pub mode: String,
    /// Reconnect even when the connection looks healthy.
    pub always: bool,
    /// Skip the periodic reconnect until connected at least this long.
    pub min_connected_time: i64,
}

impl Default for PeriodicReconnectConfig {
    fn default() -> Self {
        PeriodicReconnectConfig {
            interval: 0,
            mode: "reconnect".to_string(),
            always: false,
            min_connected_time: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionFailConfig {
    /// `reconnect`, `refresh`, or empty to give up.
    pub action: String,
    /// Extra seconds to wait before acting.
    pub wait_for: i64,
}

impl Default for ReconnectionFailConfig {
    fn default() -> Self {
        ReconnectionFailConfig {
            action: "reconnect".to_string(),
            wait_for: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    pub enable: bool,
    /// Use the server-side batch insertion primitive when available.
    pub msc2716: bool,
    pub messages_per_page: i32,
    pub max_pages: i32,
    pub max_total_pages: i32,
    /// Seconds between pages.
    pub page_delay: i64,
    /// Seconds to sleep after finishing a batch.
    pub post_batch_delay: i64,
    /// Seconds to back off when the homeserver rate-limits the backfill.
    pub rate_limit_backoff: i64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        BackfillConfig {
            enable: true,
            msc2716: false,
            messages_per_page: 50,
            max_pages: 10,
            max_total_pages: -1,
            page_delay: 0,
            post_batch_delay: 0,
            rate_limit_backoff: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `env_filter` directive, e.g. `info,msgr_bridge=debug`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load the TOML file at `path` with `MSGR_BRIDGE_*` env overrides.
    pub fn load(path: &str) -> Result<Config, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MSGR_BRIDGE_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.bridge.username_template, "facebook_{userid}");
        assert!(config.bridge.backfill.enable);
        assert_eq!(config.facebook.default_region_hint, "ODN");
    }

    #[test]
    fn toml_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "bridge.toml",
                r#"
                    [facebook]
                    device_seed = "abc123"

                    [bridge.periodic_reconnect]
                    interval = 3600
                    mode = "refresh"
                "#,
            )?;
            let config = Config::load("bridge.toml").unwrap();
            assert_eq!(config.facebook.device_seed, "abc123");
            assert_eq!(config.bridge.periodic_reconnect.interval, 3600);
            assert_eq!(config.bridge.periodic_reconnect.mode, "refresh");
            assert!(config.bridge.backfill.enable);
            Ok(())
        });
    }
}

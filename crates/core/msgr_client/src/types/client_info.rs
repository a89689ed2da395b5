//! Thrift structs carried inside the MQTToT CONNECT client-id blob.

use thrift_compact::require;
use thrift_compact::Fields;
use thrift_compact::FieldSpec;
use thrift_compact::Kind;
use thrift_compact::StructSpec;
use thrift_compact::ThriftError;
use thrift_compact::ThriftStruct;
use thrift_compact::ThriftWriter;

/// Device and session identity sent on every realtime connect.
#[derive(Debug, Clone, Default)]
pub struct RealtimeClientInfo {
    pub user_id: i64,
    pub user_agent: String,
    pub client_capabilities: i64,
    pub endpoint_capabilities: i64,
    /// 0 = no zlib, 1 = always zlib, 2 = optional zlib
    pub publish_format: i32,
    pub no_automatic_foreground: bool,
    pub make_user_available_in_foreground: bool,
    pub device_id: String,
    pub is_initially_foreground: bool,
    pub network_type: i32,
    pub network_subtype: i32,
    pub client_mqtt_session_id: i64,
    pub subscribe_topics: Vec<i32>,
    pub client_type: String,
    pub app_id: i64,
    pub connect_token_hash: Option<Vec<u8>>,
    pub region_preference: String,
    pub device_secret: String,
    pub client_stack: u8,
    pub network_type_info: Option<i32>,
}

static REALTIME_CLIENT_INFO_SPEC: StructSpec = StructSpec {
    name: "RealtimeClientInfo",
    fields: &[
        FieldSpec { id: 1, name: "user_id", kind: &Kind::I64 },
        FieldSpec { id: 2, name: "user_agent", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "client_capabilities", kind: &Kind::I64 },
        FieldSpec { id: 4, name: "endpoint_capabilities", kind: &Kind::I64 },
        FieldSpec { id: 5, name: "publish_format", kind: &Kind::I32 },
        FieldSpec { id: 6, name: "no_automatic_foreground", kind: &Kind::Bool },
        FieldSpec { id: 7, name: "make_user_available_in_foreground", kind: &Kind::Bool },
        FieldSpec { id: 8, name: "device_id", kind: &Kind::Utf8 },
        FieldSpec { id: 9, name: "is_initially_foreground", kind: &Kind::Bool },
        FieldSpec { id: 10, name: "network_type", kind: &Kind::I32 },
        FieldSpec { id: 11, name: "network_subtype", kind: &Kind::I32 },
        FieldSpec { id: 12, name: "client_mqtt_session_id", kind: &Kind::I64 },
        FieldSpec { id: 14, name: "subscribe_topics", kind: &Kind::List(&Kind::I32) },
        FieldSpec { id: 15, name: "client_type", kind: &Kind::Utf8 },
        FieldSpec { id: 16, name: "app_id", kind: &Kind::I64 },
        FieldSpec { id: 18, name: "connect_token_hash", kind: &Kind::Bytes },
        FieldSpec { id: 19, name: "region_preference", kind: &Kind::Utf8 },
        FieldSpec { id: 20, name: "device_secret", kind: &Kind::Utf8 },
        FieldSpec { id: 21, name: "client_stack", kind: &Kind::Byte },
        FieldSpec { id: 27, name: "network_type_info", kind: &Kind::I32 },
    ],
};

impl ThriftStruct for RealtimeClientInfo {
    fn spec() -> &'static StructSpec {
        &REALTIME_CLIENT_INFO_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(RealtimeClientInfo {
            user_id: fields.take_i64(1).unwrap_or_default(),
            user_agent: fields.take_str(2).unwrap_or_default(),
            client_capabilities: fields.take_i64(3).unwrap_or_default(),
            endpoint_capabilities: fields.take_i64(4).unwrap_or_default(),
            publish_format: fields.take_i32(5).unwrap_or_default(),
            no_automatic_foreground: fields.take_bool(6).unwrap_or_default(),
            make_user_available_in_foreground: fields.take_bool(7).unwrap_or_default(),
            device_id: fields.take_str(8).unwrap_or_default(),
            is_initially_foreground: fields.take_bool(9).unwrap_or_default(),
            network_type: fields.take_i32(10).unwrap_or_default(),
            network_subtype: fields.take_i32(11).unwrap_or_default(),
            client_mqtt_session_id: fields.take_i64(12).unwrap_or_default(),
            subscribe_topics: fields
                .take_list(14)
                .map(|items| items.into_iter().filter_map(|item| item.into_i32()).collect())
                .unwrap_or_default(),
            client_type: fields.take_str(15).unwrap_or_default(),
            app_id: fields.take_i64(16).unwrap_or_default(),
            connect_token_hash: fields.take_bytes(18),
            region_preference: fields.take_str(19).unwrap_or_default(),
            device_secret: fields.take_str(20).unwrap_or_default(),
            client_stack: fields.take_byte(21).unwrap_or_default(),
            network_type_info: fields.take_i32(27),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_i64(1, self.user_id);
        writer.field_string(2, &self.user_agent);
        writer.field_i64(3, self.client_capabilities);
        writer.field_i64(4, self.endpoint_capabilities);
        writer.field_i32(5, self.publish_format);
        writer.field_bool(6, self.no_automatic_foreground);
        writer.field_bool(7, self.make_user_available_in_foreground);
        writer.field_string(8, &self.device_id);
        writer.field_bool(9, self.is_initially_foreground);
        writer.field_i32(10, self.network_type);
        writer.field_i32(11, self.network_subtype);
        writer.field_i64(12, self.client_mqtt_session_id);
        writer.field_i32_list(14, &self.subscribe_topics);
        writer.field_string(15, &self.client_type);
        writer.field_i64(16, self.app_id);
        if let Some(hash) = &self.connect_token_hash {
            writer.field_bytes(18, hash);
        }
        writer.field_string(19, &self.region_preference);
        writer.field_string(20, &self.device_secret);
        writer.field_byte(21, self.client_stack);
        if let Some(info) = self.network_type_info {
            writer.field_i32(27, info);
        }
    }
}

/// Always sent empty; the server fills in PHP routing overrides itself.
#[derive(Debug, Clone, Default)]
pub struct PhpOverride {
    pub hostname: Option<String>,
    pub port: i32,
    pub host_ip_address: Option<String>,
}

static PHP_OVERRIDE_SPEC: StructSpec = StructSpec {
    name: "PhpOverride",
    fields: &[
        FieldSpec { id: 1, name: "hostname", kind: &Kind::Utf8 },
        FieldSpec { id: 2, name: "port", kind: &Kind::I32 },
        FieldSpec { id: 3, name: "host_ip_address", kind: &Kind::Utf8 },
    ],
};

impl ThriftStruct for PhpOverride {
    fn spec() -> &'static StructSpec {
        &PHP_OVERRIDE_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(PhpOverride {
            hostname: fields.take_str(1),
            port: fields.take_i32(2).unwrap_or_default(),
            host_ip_address: fields.take_str(3),
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        if let Some(hostname) = &self.hostname {
            writer.field_string(1, hostname);
        }
        writer.field_i32(2, self.port);
        if let Some(addr) = &self.host_ip_address {
            writer.field_string(3, addr);
        }
    }
}

/// The outer CONNECT configuration, zlib-compressed into the client id blob.
#[derive(Debug, Clone, Default)]
pub struct RealtimeConfig {
    pub client_identifier: String,
    pub client_info: RealtimeClientInfo,
    pub password: String,
    pub combined_publishes: Vec<PhpOverride>,
    pub app_specific_info: Vec<(String, String)>,
    pub php_override: Option<PhpOverride>,
}

static REALTIME_CONFIG_SPEC: StructSpec = StructSpec {
    name: "RealtimeConfig",
    fields: &[
        FieldSpec { id: 1, name: "client_identifier", kind: &Kind::Utf8 },
        FieldSpec { id: 2, name: "will_topic", kind: &Kind::Utf8 },
        FieldSpec { id: 3, name: "will_message", kind: &Kind::Utf8 },
        FieldSpec {
            id: 4,
            name: "client_info",
            kind: &Kind::Struct(RealtimeClientInfo::spec),
        },
        FieldSpec { id: 5, name: "password", kind: &Kind::Utf8 },
        FieldSpec { id: 6, name: "get_diffs_request", kind: &Kind::List(&Kind::Utf8) },
        FieldSpec {
            id: 8,
            name: "combined_publishes",
            kind: &Kind::List(&Kind::Struct(PhpOverride::spec)),
        },
        FieldSpec { id: 9, name: "zero_rating_token_hash", kind: &Kind::Utf8 },
        FieldSpec {
            id: 10,
            name: "app_specific_info",
            kind: &Kind::Map(&Kind::Utf8, &Kind::Utf8),
        },
        FieldSpec {
            id: 11,
            name: "php_override",
            kind: &Kind::Struct(PhpOverride::spec),
        },
    ],
};

impl ThriftStruct for RealtimeConfig {
    fn spec() -> &'static StructSpec {
        &REALTIME_CONFIG_SPEC
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, ThriftError> {
        Ok(RealtimeConfig {
            client_identifier: require(fields.take_str(1), "RealtimeConfig", "client_identifier")?,
            client_info: require(
                fields.take_struct(4)?,
                "RealtimeConfig",
                "client_info",
            )?,
            password: fields.take_str(5).unwrap_or_default(),
            combined_publishes: fields.take_struct_list(8)?.unwrap_or_default(),
            app_specific_info: fields.take_str_map(10).unwrap_or_default(),
            php_override: fields.take_struct(11)?,
        })
    }

    fn write_fields(&self, writer: &mut ThriftWriter) {
        writer.field_string(1, &self.client_identifier);
        writer.field_struct(4, &self.client_info);
        writer.field_string(5, &self.password);
        writer.field_struct_list(8, &self.combined_publishes);
        if !self.app_specific_info.is_empty() {
            writer.field_str_map(10, &self.app_specific_info);
        }
        if let Some(php_override) = &self.php_override {
            writer.field_struct(11, php_override);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_config_roundtrip() {
        let config = RealtimeConfig {
            client_identifier: "abcdef".to_string(),
            client_info: RealtimeClientInfo {
                user_id: 1234,
                user_agent: "[FBAN/Orca-Android;]".to_string(),
                client_capabilities: 0b1100001110110111,
                endpoint_capabilities: 0b1011010,
                publish_format: 2,
                subscribe_topics: vec![146, 80, 34],
                client_stack: 4,
                ..RealtimeClientInfo::default()
            },
            password: "token".to_string(),
            app_specific_info: vec![("ls_sv".to_string(), "3402226163209239".to_string())],
            php_override: Some(PhpOverride::default()),
            ..RealtimeConfig::default()
        };
        let bytes = config.to_thrift();
        let back = RealtimeConfig::from_thrift(&bytes).unwrap();
        assert_eq!(back.client_identifier, "abcdef");
        assert_eq!(back.client_info.subscribe_topics, vec![146, 80, 34]);
        assert_eq!(back.password, "token");
        assert_eq!(back.app_specific_info.len(), 1);
        assert!(back.php_override.is_some());
    }
}

//! A minimal client for MQTToT, the Messenger variant of MQTT v3.1.
//!
//! The dialect differs from standard MQTT v3.1 only in the CONNECT frame: the
//! protocol name is the ASCII string `MQTToT` and the client id is an opaque
//! blob appended without a length prefix (identity, topic subscriptions and
//! credentials all travel inside that blob). Every other packet is standard,
//! including the v3.1 DISCONNECT the server sends before dropping a
//! connection.

mod config;
mod connect;
mod connection;
mod errors;

pub use config::Config;
pub use config::proxy_from_env;
pub use connect::connect_packet;
pub use connection::Connection;
pub use connection::Publisher;
pub use connection::StopHandle;
pub use errors::MqttotError;

/// An MQTT publish received from the server.
#[derive(Debug, Clone)]
pub struct IncomingPublish {
    pub topic: String,
    pub payload: Vec<u8>,
}

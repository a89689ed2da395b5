/// An error on the MQTToT connection.
#[derive(Debug, thiserror::Error)]
pub enum MqttotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid broker host name: {0}")]
    InvalidHostName(String),

    #[error("MQTT protocol error: {0:?}")]
    Protocol(mqttbytes::Error),

    #[error("connection refused by broker (CONNACK code {code})")]
    ConnectRefused { code: u8 },

    #[error("server sent DISCONNECT")]
    ServerDisconnect,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("proxy error: {0}")]
    Proxy(String),
}

impl From<mqttbytes::Error> for MqttotError {
    fn from(err: mqttbytes::Error) -> Self {
        MqttotError::Protocol(err)
    }
}

impl MqttotError {
    /// True when the CONNACK return code means the credentials were rejected,
    /// as opposed to a malformed or stale client id blob.
    pub fn is_not_authorized(&self) -> bool {
        matches!(self, MqttotError::ConnectRefused { code: 4 | 5 })
    }
}

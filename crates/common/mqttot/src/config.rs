use url::Url;

/// Connection settings for one MQTToT session.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u16,
    /// The opaque client id blob sent in the CONNECT frame.
    pub client_id: Vec<u8>,
    /// Optional HTTP CONNECT proxy.
    pub proxy: Option<Url>,
}

impl Config {
    pub fn new(host: &str, port: u16, client_id: Vec<u8>) -> Self {
        Config {
            host: host.to_string(),
            port,
            keep_alive_secs: 60,
            client_id,
            proxy: proxy_from_env(),
        }
    }

    pub fn with_keep_alive(self, keep_alive_secs: u16) -> Self {
        Self {
            keep_alive_secs,
            ..self
        }
    }
}

/// Detect an HTTP proxy from the conventional environment variables.
pub fn proxy_from_env() -> Option<Url> {
    ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy", "ALL_PROXY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find_map(|value| Url::parse(&value).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

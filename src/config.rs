//! Server configuration parsed from environment variables.
//!
//! Every setting has a default so the server boots with no environment at
//! all. Unparseable values fall back to the default instead of aborting.

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_WS_CLIENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bound of each websocket connection's outbound queue.
    pub client_queue_capacity: usize,
}

impl ServerConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `HOST`: default `0.0.0.0`
    /// - `PORT`: default 5000
    /// - `WS_CLIENT_QUEUE_CAPACITY`: default 256, zero is treated as 1
    #[must_use]
    pub fn from_env() -> Self {
        let host = std::env::var("HOST")
            .ok()
            .map(|h| h.trim().to_owned())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_owned());

        Self {
            host,
            port: env_parse("PORT", DEFAULT_PORT),
            client_queue_capacity: env_parse("WS_CLIENT_QUEUE_CAPACITY", DEFAULT_WS_CLIENT_QUEUE_CAPACITY).max(1),
        }
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            client_queue_capacity: DEFAULT_WS_CLIENT_QUEUE_CAPACITY,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

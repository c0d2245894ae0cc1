use std::time::Duration;

use crate::protocol::framing::DEFAULT_MAX_BODY_LEN;

/// Runtime settings for a [`BridgeServer`](crate::BridgeServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Address clients connect to.
    pub listen: String,
    /// Interpreter backend dialled once per session.
    pub backend: String,
    /// Time without relayed traffic after which a session is closed.
    pub idle_timeout: Duration,
    /// Largest backend message accepted before the session is torn down.
    pub max_body_len: usize,
}

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            backend: "127.0.0.1:3001".to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_body_len: DEFAULT_MAX_BODY_LEN,
        }
    }
}

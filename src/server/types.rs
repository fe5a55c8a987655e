//! Configuration for the signaling server.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default lifetime of a shared-state entry without refresh.
const DEFAULT_SHARED_STATE_TTL: Duration = Duration::from_secs(15 * 60);

/// Default cap on a serialized shared-state payload.
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024;

/// Server tuning knobs.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use circle_signal::server::ServerConfig;
///
/// let config = ServerConfig::new()
///     .with_shared_state_ttl(Duration::from_secs(300))
///     .with_max_payload_bytes(4096);
/// assert_eq!(config.max_payload_bytes, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Age after which a shared-state entry is pruned (seconds on the wire).
    #[serde(with = "crate::duration_secs")]
    pub shared_state_ttl: Duration,
    /// Largest accepted `share_state` payload, in serialized bytes.
    pub max_payload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shared_state_ttl: DEFAULT_SHARED_STATE_TTL,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shared-state TTL.
    #[must_use]
    pub const fn with_shared_state_ttl(mut self, ttl: Duration) -> Self {
        self.shared_state_ttl = ttl;
        self
    }

    /// Sets the payload size limit.
    #[must_use]
    pub const fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }
}

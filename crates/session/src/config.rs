//! Per-session bounds.

use std::time::Duration;

/// Limits applied to every session accepted by a hub.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_bytes: usize,
    /// Deadline for a single outbound send.
    pub write_timeout: Duration,
    /// A session with no outbound traffic for this long is terminated.
    pub idle_timeout: Duration,
    /// How often the dispatcher checks the idle bound.
    pub liveness_interval: Duration,
    /// Decoded envelopes buffered between reader and dispatcher.
    pub inbound_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 512,
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            liveness_interval: Duration::from_secs(1),
            inbound_queue: 16,
        }
    }
}

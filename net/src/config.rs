//! Configuration for the networking layer.

/// Transport limits and buffer sizes shared by nodes and the relay.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Maximum size of a single serialized message in bytes.
    /// Votes and transactions are small, but a sync response carries a
    /// whole chain.
    pub max_message_size: usize,

    /// Capacity of the per-connection outbound queues.
    pub channel_buffer_size: usize,

    /// Reconnect attempts before a node gives up and goes offline.
    pub reconnect_max_attempts: u32,

    /// Base delay between reconnect attempts (doubles per attempt,
    /// capped at `reconnect_max_delay_ms`).
    pub reconnect_base_delay_ms: u64,

    /// Upper bound for the reconnect backoff.
    pub reconnect_max_delay_ms: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_message_size: 4_194_304, // 4 MB
            channel_buffer_size: 1_024,
            reconnect_max_attempts: 8,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 8_000,
        }
    }
}

impl NetConfig {
    /// A config suitable for local tests: small buffers, fast failure.
    pub fn dev_default() -> Self {
        Self {
            max_message_size: 1_048_576,
            channel_buffer_size: 64,
            reconnect_max_attempts: 2,
            reconnect_base_delay_ms: 50,
            reconnect_max_delay_ms: 200,
        }
    }
}

use std::time::Duration;

/// Engine tunables (runtime view).
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// How long a Conversation may sit in `AwaitingHello` before it is closed.
    pub handshake_timeout: Duration,
    /// How long the losing side of a duplicate Conversation keeps being read
    /// before it is closed.
    pub duplicate_linger: Duration,
    /// Capacity of the node actor's command queue.
    pub command_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            duplicate_linger: Duration::from_millis(500),
            command_buffer: 256,
        }
    }
}

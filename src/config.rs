use serde::{Deserialize, Serialize};

/// Tunable knobs for the transport, recognized per connection or endpoint-wide.
///
/// Defaults match the constants in the wire-format spec: a 10-segment window
/// on both sides, a 1s initial RTO clamped to [200ms, 60s], and a 1200-byte
/// payload ceiling that keeps one message inside one datagram.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Config {
    pub max_window: u16,
    pub rcv_wnd_cap: u16,
    pub rto_initial_ms: u64,
    pub rto_min_ms: u64,
    pub rto_max_ms: u64,
    pub max_retries: u32,
    pub max_payload: usize,
    /// 0 disables delayed ACKs (an ACK is emitted for every accepted segment).
    pub delayed_ack_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_window: 10,
            rcv_wnd_cap: 10,
            rto_initial_ms: 1000,
            rto_min_ms: 200,
            rto_max_ms: 60_000,
            max_retries: 10,
            max_payload: 1200,
            delayed_ack_ms: 50,
        }
    }
}

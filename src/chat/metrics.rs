//! Background stats reporter: a bare `thread::spawn` loop for ambient
//! housekeeping work, no scheduler framework needed.

use std::thread;
use std::time::Duration;

use log::info;

use crate::endpoint::Endpoint;

/// Logs per-connection stats every `interval`, for whatever set of
/// connection ids `conn_ids` reports at each tick. Runs until the process
/// exits; there is no explicit shutdown handle since chat servers live for
/// the lifetime of the process.
pub fn spawn_metrics_reporter(
    endpoint: Endpoint,
    conn_ids: impl Fn() -> Vec<u32> + Send + 'static,
    interval: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        thread::sleep(interval);
        for conn_id in conn_ids() {
            if let Ok(stats) = endpoint.stats(conn_id) {
                info!(
                    "conn {conn_id:#x}: sent={} recv={} retx={} bytes_sent={} bytes_recv={} srtt={:?} rto={:?}",
                    stats.segments_sent,
                    stats.segments_received,
                    stats.retransmissions,
                    stats.bytes_sent,
                    stats.bytes_received,
                    stats.srtt,
                    stats.rto,
                );
            }
        }
    })
}

//! Jacobson/Karn RTT estimation (RFC 6298-style recurrence).

use std::time::Duration;

use crate::config::Config;

#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    srtt_ms: f64,
    rttvar_ms: f64,
    rto_ms: f64,
    rto_min_ms: f64,
    rto_max_ms: f64,
    has_sample: bool,
}

impl RttEstimator {
    pub fn new(config: &Config) -> Self {
        RttEstimator {
            srtt_ms: 0.0,
            rttvar_ms: 0.0,
            rto_ms: config.rto_initial_ms as f64,
            rto_min_ms: config.rto_min_ms as f64,
            rto_max_ms: config.rto_max_ms as f64,
            has_sample: false,
        }
    }

    pub fn rto(&self) -> Duration {
        Duration::from_millis(self.rto_ms as u64)
    }

    pub fn srtt(&self) -> Duration {
        Duration::from_millis(self.srtt_ms as u64)
    }

    /// Records an RTT sample. Callers must uphold Karn's rule themselves:
    /// never call this for a segment that was retransmitted.
    pub fn sample(&mut self, rtt: Duration) {
        let r = rtt.as_secs_f64() * 1000.0;

        if !self.has_sample {
            self.srtt_ms = r;
            self.rttvar_ms = r / 2.0;
            self.has_sample = true;
        } else {
            self.rttvar_ms = 0.75 * self.rttvar_ms + 0.25 * (self.srtt_ms - r).abs();
            self.srtt_ms = 0.875 * self.srtt_ms + 0.125 * r;
        }

        self.rto_ms = (self.srtt_ms + 4.0 * self.rttvar_ms).clamp(self.rto_min_ms, self.rto_max_ms);
    }

    /// Go-Back-N exponential backoff: doubles the current RTO, capped at
    /// `rto_max`. Does not touch srtt/rttvar — those only move on samples.
    pub fn backoff(&mut self) {
        self.rto_ms = (self.rto_ms * 2.0).min(self.rto_max_ms);
    }
}

//! Per-connection sender: sequence allocation, send window, in-flight
//! buffer, and Go-Back-N retransmission.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::config::Config;
use crate::conn::LatencyHistogram;
use crate::err::Error;
use crate::rtt::RttEstimator;
use crate::segment::{flag, wrapping_gt, wrapping_lt};

#[derive(Debug, Clone)]
pub struct InFlight {
    pub seq: u32,
    pub flags: u8,
    pub payload: Vec<u8>,
    pub first_send: Instant,
    pub last_send: Instant,
    pub retries: u32,
}

#[derive(Debug)]
pub struct Sender {
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub snd_wnd: u16,
    max_window: u16,
    max_retries: u32,
    pub in_flight: VecDeque<InFlight>,
    pub rtt: RttEstimator,
    pub timer_deadline: Option<Instant>,

    pub segments_sent: u64,
    pub retransmissions: u64,
    pub bytes_sent: u64,
    pub latency: LatencyHistogram,
}

impl Sender {
    pub fn new(iss: u32, config: &Config) -> Self {
        Sender {
            snd_una: iss,
            snd_nxt: iss,
            snd_wnd: config.max_window,
            max_window: config.max_window,
            max_retries: config.max_retries,
            in_flight: VecDeque::new(),
            rtt: RttEstimator::new(config),
            timer_deadline: None,
            segments_sent: 0,
            retransmissions: 0,
            bytes_sent: 0,
            latency: LatencyHistogram::default(),
        }
    }

    pub fn in_flight_count(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    pub fn has_room(&self) -> bool {
        self.in_flight_count() < self.snd_wnd as u32
    }

    /// Allocates the next sequence number for `payload` and enqueues it for
    /// transmission. Returns the assigned seq so the caller can build and
    /// send the full segment (ack/win come from the receiver side).
    pub fn enqueue(&mut self, flags: u8, payload: Vec<u8>, now: Instant) -> Result<u32, Error> {
        if !self.has_room() {
            return Err(Error::WouldBlock);
        }

        let seq = self.snd_nxt;
        let starting_timer = self.in_flight.is_empty();

        self.bytes_sent += payload.len() as u64;
        self.in_flight.push_back(InFlight {
            seq,
            flags,
            payload,
            first_send: now,
            last_send: now,
            retries: 0,
        });
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.segments_sent += 1;

        if starting_timer {
            self.timer_deadline = Some(now + self.rtt.rto());
        }

        Ok(seq)
    }

    /// Applies a cumulative ACK. Removes fully-acknowledged entries, samples
    /// RTT from any that were never retransmitted (Karn's rule), and
    /// refreshes the effective send window from the peer's advertisement.
    pub fn on_ack(&mut self, ack: u32, peer_win: u16, now: Instant) {
        self.snd_wnd = peer_win.min(self.max_window);

        if wrapping_gt(ack, self.snd_una) {
            while let Some(front) = self.in_flight.front() {
                if wrapping_lt(front.seq, ack) {
                    let entry = self.in_flight.pop_front().unwrap();
                    self.latency.record(now.duration_since(entry.first_send));
                    if entry.retries == 0 {
                        self.rtt.sample(now.duration_since(entry.first_send));
                    }
                } else {
                    break;
                }
            }
            self.snd_una = ack;
        }

        if self.in_flight.is_empty() {
            self.timer_deadline = None;
        } else {
            self.timer_deadline = Some(now + self.rtt.rto());
        }
    }

    pub fn timer_due(&self, now: Instant) -> bool {
        matches!(self.timer_deadline, Some(d) if now >= d)
    }

    /// Go-Back-N timeout: retransmits every in-flight segment in seq order,
    /// doubles the RTO, and aborts the connection if any entry's retry count
    /// exceeds `max_retries`.
    pub fn on_timeout(&mut self, now: Instant) -> Result<Vec<InFlight>, Error> {
        if self.in_flight.is_empty() {
            self.timer_deadline = None;
            return Ok(vec![]);
        }

        self.rtt.backoff();
        trace!("sender: RTO timeout, rto now {:?}", self.rtt.rto());

        let mut resend = Vec::with_capacity(self.in_flight.len());
        for entry in self.in_flight.iter_mut() {
            entry.retries += 1;
            entry.last_send = now;
            if entry.retries > self.max_retries {
                debug!(
                    "sender: seq {} exceeded {} retries, aborting",
                    entry.seq, self.max_retries
                );
                return Err(Error::ConnectionAborted);
            }
            self.retransmissions += 1;
            resend.push(entry.clone());
        }

        self.timer_deadline = Some(now + self.rtt.rto());

        Ok(resend)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer_deadline
    }
}

pub const FIN_FLAGS: u8 = flag::FIN | flag::ACK;
pub const DATA_FLAGS: u8 = flag::DATA | flag::ACK;

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn in_flight_never_exceeds_the_advertised_window(
            ops in proptest::collection::vec(0u8..=1, 1..50),
        ) {
            let config = Config::default();
            let mut s = Sender::new(0, &config);
            let now = Instant::now();
            let mut acked = 0u32;

            for op in ops {
                if op == 0 {
                    let _ = s.enqueue(DATA_FLAGS, b"x".to_vec(), now);
                } else if !s.in_flight.is_empty() {
                    acked = acked.wrapping_add(1);
                    s.on_ack(s.snd_una.wrapping_add(1), config.max_window, now);
                }
                prop_assert!(s.in_flight_count() <= s.snd_wnd as u32);
            }
            let _ = acked;
        }

        #[test]
        fn peer_window_advertisement_caps_the_effective_send_window(
            peer_win in 0u16..=1000,
        ) {
            let config = Config::default();
            let mut s = Sender::new(0, &config);
            let now = Instant::now();
            s.on_ack(s.snd_una, peer_win, now);
            prop_assert!(s.snd_wnd <= peer_win.min(config.max_window));
        }
    }
}

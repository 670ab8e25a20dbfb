//! Per-connection receiver: verify, dedup, reorder, deliver.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::trace;

use crate::config::Config;
use crate::segment::wrapping_lt;

#[derive(Debug)]
pub struct Receiver {
    pub rcv_nxt: u32,
    wnd_cap: u16,
    reorder: BTreeMap<u32, Vec<u8>>,
    delayed_ack: Duration,
    ack_deadline: Option<Instant>,

    pub segments_received: u64,
    pub out_of_order: u64,
    pub duplicates_dropped: u64,
    pub out_of_window_dropped: u64,
    pub bytes_received: u64,
}

impl Receiver {
    pub fn new(rcv_nxt: u32, config: &Config) -> Self {
        Receiver {
            rcv_nxt,
            wnd_cap: config.rcv_wnd_cap,
            reorder: BTreeMap::new(),
            delayed_ack: Duration::from_millis(config.delayed_ack_ms),
            ack_deadline: None,
            segments_received: 0,
            out_of_order: 0,
            duplicates_dropped: 0,
            out_of_window_dropped: 0,
            bytes_received: 0,
        }
    }

    pub fn rcv_wnd(&self) -> u16 {
        self.wnd_cap - self.reorder.len() as u16
    }

    /// Accepts a segment at sequence `seq`. Returns every payload now
    /// deliverable to the application, in order (possibly more than one if
    /// this segment fills a gap ahead of previously-buffered segments).
    pub fn on_segment(&mut self, seq: u32, payload: Vec<u8>, now: Instant) -> Vec<Vec<u8>> {
        self.segments_received += 1;
        let mut delivered = Vec::new();

        if seq == self.rcv_nxt {
            self.bytes_received += payload.len() as u64;
            delivered.push(payload);
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);

            while let Some(next) = self.reorder.remove(&self.rcv_nxt) {
                self.bytes_received += next.len() as u64;
                delivered.push(next);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        } else if wrapping_lt(self.rcv_nxt, seq)
            && wrapping_lt(seq, self.rcv_nxt.wrapping_add(self.wnd_cap as u32))
        {
            if self.reorder.contains_key(&seq) {
                self.duplicates_dropped += 1;
            } else {
                trace!("receiver: buffering out-of-order seq {seq}, expecting {}", self.rcv_nxt);
                self.reorder.insert(seq, payload);
                self.out_of_order += 1;
            }
        } else if wrapping_lt(seq, self.rcv_nxt) {
            self.duplicates_dropped += 1;
        } else {
            trace!("receiver: seq {seq} outside receive window, dropping");
            self.out_of_window_dropped += 1;
        }

        self.note_activity(now);
        delivered
    }

    fn note_activity(&mut self, now: Instant) {
        if self.delayed_ack.is_zero() {
            self.ack_deadline = Some(now);
        } else if self.ack_deadline.is_none() {
            self.ack_deadline = Some(now + self.delayed_ack);
        }
    }

    pub fn ack_due(&self, now: Instant) -> bool {
        matches!(self.ack_deadline, Some(d) if now >= d)
    }

    /// Clears the pending-ACK flag; the caller is expected to actually
    /// transmit the ACK right after calling this.
    pub fn take_pending_ack(&mut self) -> bool {
        if self.ack_deadline.is_some() {
            self.ack_deadline = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> Receiver {
        Receiver::new(0, &Config::default())
    }

    #[test]
    fn in_order_delivers_immediately() {
        let mut r = receiver();
        let now = Instant::now();
        let delivered = r.on_segment(0, b"hello".to_vec(), now);
        assert_eq!(delivered, vec![b"hello".to_vec()]);
        assert_eq!(r.rcv_nxt, 1);
    }

    #[test]
    fn reorders_then_drains_on_gap_fill() {
        let mut r = receiver();
        let now = Instant::now();

        assert!(r.on_segment(1, b"b".to_vec(), now).is_empty());
        assert_eq!(r.out_of_order, 1);

        let delivered = r.on_segment(0, b"a".to_vec(), now);
        assert_eq!(delivered, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(r.rcv_nxt, 2);
    }

    #[test]
    fn drops_duplicate_before_rcv_nxt() {
        let mut r = receiver();
        let now = Instant::now();
        r.on_segment(0, b"a".to_vec(), now);
        let delivered = r.on_segment(0, b"a-again".to_vec(), now);
        assert!(delivered.is_empty());
        assert_eq!(r.duplicates_dropped, 1);
    }

    #[test]
    fn drops_duplicate_already_buffered() {
        let mut r = receiver();
        let now = Instant::now();
        r.on_segment(1, b"b".to_vec(), now);
        r.on_segment(1, b"b-again".to_vec(), now);
        assert_eq!(r.duplicates_dropped, 1);
        assert_eq!(r.out_of_order, 1);
    }

    #[test]
    fn drops_segment_outside_window() {
        let mut r = receiver();
        let now = Instant::now();
        let far = r.rcv_nxt + r.rcv_wnd() as u32 + 5;
        let delivered = r.on_segment(far, b"x".to_vec(), now);
        assert!(delivered.is_empty());
        assert_eq!(r.out_of_window_dropped, 1);
    }

    #[test]
    fn rcv_wnd_shrinks_as_reorder_buffer_fills() {
        let mut r = receiver();
        let now = Instant::now();
        let cap = r.rcv_wnd();
        r.on_segment(1, b"b".to_vec(), now);
        assert_eq!(r.rcv_wnd(), cap - 1);
    }
}

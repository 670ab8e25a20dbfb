//! Connection FSM, combining the sender and receiver halves into one
//! per-peer state machine.

pub mod receiver;
pub mod sender;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::config::Config;
use crate::err::Error;
use crate::segment::{flag, wrapping_ge, Segment};

pub use receiver::Receiver;
pub use sender::{Sender, DATA_FLAGS, FIN_FLAGS};

/*
    CLOSED ──connect──▶ SYN-SENT ──recv SYN|ACK──▶ ESTABLISHED
    CLOSED ──recv SYN──▶ SYN-RECEIVED ──recv ACK──▶ ESTABLISHED
    ESTABLISHED ──close──▶ CLOSING ──recv FIN|ACK──▶ CLOSED
    ESTABLISHED ──recv FIN──▶ CLOSING ──send FIN|ACK──▶ CLOSED
    any ──abort(MAX_RETRIES exceeded)──▶ CLOSED
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    SynSent,
    SynRcvd,
    Established,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Active,
    Passive,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LatencyHistogram {
    pub under_10ms: u64,
    pub under_50ms: u64,
    pub under_100ms: u64,
    pub under_500ms: u64,
    pub under_1s: u64,
    pub under_5s: u64,
    pub over_5s: u64,
}

impl LatencyHistogram {
    fn record(&mut self, d: Duration) {
        let ms = d.as_millis();
        if ms < 10 {
            self.under_10ms += 1;
        } else if ms < 50 {
            self.under_50ms += 1;
        } else if ms < 100 {
            self.under_100ms += 1;
        } else if ms < 500 {
            self.under_500ms += 1;
        } else if ms < 1000 {
            self.under_1s += 1;
        } else if ms < 5000 {
            self.under_5s += 1;
        } else {
            self.over_5s += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub segments_sent: u64,
    pub segments_received: u64,
    pub retransmissions: u64,
    pub out_of_order_received: u64,
    pub duplicates_dropped: u64,
    pub out_of_window_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub srtt: Duration,
    pub rto: Duration,
    pub latency: LatencyHistogram,
}

/// What the endpoint dispatcher must do after feeding a segment (or a
/// local API call) into a connection.
#[derive(Debug, Default)]
pub struct Outcome {
    pub to_send: Vec<Segment>,
    pub delivered: Vec<Vec<u8>>,
    pub wake_reader: bool,
    pub wake_writer: bool,
    pub wake_closer: bool,
    pub established: bool,
    pub closed: bool,
    pub aborted: bool,
}

pub struct Connection {
    pub kind: Kind,
    pub state: State,
    pub conn_id: u32,
    pub local: SocketAddr,
    pub remote: SocketAddr,

    pub sender: Sender,
    pub receiver: Receiver,

    peer_fin_seq: Option<u32>,
    peer_fin_received: bool,
    local_fin_seq: Option<u32>,
    accepted_segments: u64,
}

impl Connection {
    pub fn new_syn_sent(
        conn_id: u32,
        iss: u32,
        local: SocketAddr,
        remote: SocketAddr,
        config: &Config,
    ) -> (Self, Segment) {
        let mut conn = Connection {
            kind: Kind::Active,
            state: State::SynSent,
            conn_id,
            local,
            remote,
            sender: Sender::new(iss, config),
            receiver: Receiver::new(0, config),
            peer_fin_seq: None,
            peer_fin_received: false,
            local_fin_seq: None,
            accepted_segments: 0,
        };

        let now = Instant::now();
        let seq = conn
            .sender
            .enqueue(flag::SYN, Vec::new(), now)
            .expect("fresh connection always has window room");
        let syn = conn.build(seq, flag::SYN, Vec::new());
        (conn, syn)
    }

    pub fn new_syn_rcvd(
        conn_id: u32,
        iss: u32,
        local: SocketAddr,
        remote: SocketAddr,
        peer_seq: u32,
        peer_win: u16,
        config: &Config,
    ) -> (Self, Segment) {
        let mut conn = Connection {
            kind: Kind::Passive,
            state: State::SynRcvd,
            conn_id,
            local,
            remote,
            sender: Sender::new(iss, config),
            receiver: Receiver::new(peer_seq.wrapping_add(1), config),
            peer_fin_seq: None,
            peer_fin_received: false,
            local_fin_seq: None,
            accepted_segments: 0,
        };

        let now = Instant::now();
        let seq = conn
            .sender
            .enqueue(flag::SYN, Vec::new(), now)
            .expect("fresh connection always has window room");
        conn.sender.snd_wnd = peer_win.min(conn.sender.snd_wnd);
        let synack = conn.build(seq, flag::SYN | flag::ACK, Vec::new());
        (conn, synack)
    }

    fn build(&self, seq: u32, flags: u8, payload: Vec<u8>) -> Segment {
        Segment::new(
            flags,
            self.conn_id,
            seq,
            self.receiver.rcv_nxt,
            self.receiver.rcv_wnd(),
            payload,
        )
    }

    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Queues an application message for reliable delivery. Fails with
    /// `WouldBlock` if the send window is full.
    pub fn send_msg(&mut self, payload: Vec<u8>, config: &Config) -> Result<Segment, Error> {
        if self.state != State::Established {
            return Err(Error::ConnectionAborted);
        }
        if payload.len() > config.max_payload {
            return Err(Error::MessageTooLarge(payload.len()));
        }
        let now = Instant::now();
        let seq = self.sender.enqueue(DATA_FLAGS, payload.clone(), now)?;
        Ok(self.build(seq, DATA_FLAGS, payload))
    }

    /// Begins a graceful close. Idempotent: calling it again once CLOSING or
    /// CLOSED is a no-op.
    pub fn request_close(&mut self) -> Option<Segment> {
        if self.state != State::Established {
            return None;
        }
        self.state = State::Closing;
        trace!("conn {:#x}: ESTABLISHED -> CLOSING (local close)", self.conn_id);
        let now = Instant::now();
        let seq = self
            .sender
            .enqueue(FIN_FLAGS, Vec::new(), now)
            .ok()?;
        self.local_fin_seq = Some(seq);
        Some(self.build(seq, FIN_FLAGS, Vec::new()))
    }

    pub fn on_ack_segment(&mut self, seg: &Segment, now: Instant) {
        self.sender.on_ack(seg.ack, seg.win, now);
    }

    /// Feeds one inbound segment (already checksum-verified and routed to
    /// this connection by the dispatcher) through the FSM.
    pub fn on_segment(&mut self, seg: Segment, config: &Config) -> Outcome {
        let now = Instant::now();
        let mut out = Outcome::default();
        self.accepted_segments += 1;

        match self.state {
            State::SynSent => {
                if seg.is_syn() && seg.is_ack() {
                    self.sender.on_ack(seg.ack, seg.win, now);
                    self.receiver.rcv_nxt = seg.seq.wrapping_add(1);
                    self.state = State::Established;
                    let ack = self.build(self.sender.snd_nxt, flag::ACK, Vec::new());
                    out.to_send.push(ack);
                    out.established = true;
                    debug!("conn {:#x}: SYN-SENT -> ESTABLISHED", self.conn_id);
                }
                return out;
            }
            State::SynRcvd => {
                if seg.is_ack() && !seg.is_syn() {
                    self.sender.on_ack(seg.ack, seg.win, now);
                    self.state = State::Established;
                    out.established = true;
                    debug!("conn {:#x}: SYN-RECEIVED -> ESTABLISHED", self.conn_id);
                }
                return out;
            }
            State::Closed => return out,
            State::Established | State::Closing => {}
        }

        if seg.is_fin() && self.peer_fin_seq.is_none() {
            self.peer_fin_seq = Some(seg.seq);
        }

        if seg.is_ack() {
            self.sender.on_ack(seg.ack, seg.win, now);
            out.wake_writer = true;
        }

        if seg.is_data() || seg.is_fin() {
            let seq = seg.seq;
            let mut delivered = self.receiver.on_segment(seq, seg.payload, now);
            // A FIN carries no application payload; it only occupies a
            // sequence number so cumulative ACK/ordering cover it. Drop any
            // empty entry it contributes so it's never handed to `recv()`.
            delivered.retain(|payload| !payload.is_empty());
            if !delivered.is_empty() {
                out.wake_reader = true;
                out.delivered = delivered;
            }

            if let Some(fin_seq) = self.peer_fin_seq {
                if !self.peer_fin_received
                    && wrapping_ge(self.receiver.rcv_nxt, fin_seq.wrapping_add(1))
                {
                    self.peer_fin_received = true;
                    if self.state == State::Established {
                        self.state = State::Closing;
                        trace!("conn {:#x}: ESTABLISHED -> CLOSING (peer FIN)", self.conn_id);
                        let fin_now = Instant::now();
                        if let Ok(fin_seq) =
                            self.sender.enqueue(FIN_FLAGS, Vec::new(), fin_now)
                        {
                            self.local_fin_seq = Some(fin_seq);
                            out.to_send
                                .push(self.build(fin_seq, FIN_FLAGS, Vec::new()));
                        }
                    }
                }
            }

            if self.receiver.take_pending_ack() || config.delayed_ack_ms == 0 {
                out.to_send
                    .push(self.build(self.sender.snd_nxt, flag::ACK, Vec::new()));
            }
        }

        if self.check_close_complete() {
            self.state = State::Closed;
            out.closed = true;
            out.wake_closer = true;
            debug!("conn {:#x}: CLOSING -> CLOSED", self.conn_id);
        }

        out
    }

    fn check_close_complete(&self) -> bool {
        self.state == State::Closing
            && self.peer_fin_received
            && self
                .local_fin_seq
                .map(|seq| wrapping_ge(self.sender.snd_una, seq.wrapping_add(1)))
                .unwrap_or(false)
    }

    /// Drives the retransmission timer. Returns the segments to resend, or
    /// `Err(ConnectionAborted)` once MAX_RETRIES is exceeded for any
    /// in-flight segment.
    pub fn on_timer(&mut self, now: Instant) -> Result<Vec<Segment>, Error> {
        let resend = self.sender.on_timeout(now)?;
        Ok(resend
            .into_iter()
            .map(|entry| self.build(entry.seq, entry.flags, entry.payload))
            .collect())
    }

    pub fn timer_due(&self, now: Instant) -> bool {
        self.sender.timer_due(now)
    }

    pub fn ack_due(&self, now: Instant) -> bool {
        self.receiver.ack_due(now)
    }

    pub fn emit_pending_ack(&mut self) -> Option<Segment> {
        if self.receiver.take_pending_ack() {
            Some(self.build(self.sender.snd_nxt, flag::ACK, Vec::new()))
        } else {
            None
        }
    }

    pub fn abort(&mut self) {
        self.state = State::Closed;
    }

    pub fn stats(&self) -> Stats {
        Stats {
            segments_sent: self.sender.segments_sent,
            segments_received: self.accepted_segments,
            retransmissions: self.sender.retransmissions,
            out_of_order_received: self.receiver.out_of_order,
            duplicates_dropped: self.receiver.duplicates_dropped,
            out_of_window_dropped: self.receiver.out_of_window_dropped,
            bytes_sent: self.sender.bytes_sent,
            bytes_received: self.receiver.bytes_received,
            srtt: self.sender.rtt.srtt(),
            rto: self.sender.rtt.rto(),
            latency: self.sender.latency,
        }
    }
}

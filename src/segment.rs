//! Wire format for a single transport segment.
//!
//! ```text
//! ver(1) flags(1) conn_id(4) seq(4) ack(4) win(2) len(2) checksum(16) payload(len)
//! ```
//!
//! One segment per UDP datagram; all multi-byte integers are big-endian. The
//! checksum is an MD5 digest of the whole buffer with the checksum field
//! zeroed, computed for integrity (corruption detection), not security.

use std::fmt;

pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 1 + 1 + 4 + 4 + 4 + 2 + 2 + 16;
pub const CHECKSUM_OFFSET: usize = 18;
pub const CHECKSUM_LEN: usize = 16;

pub mod flag {
    pub const SYN: u8 = 1 << 0;
    pub const ACK: u8 = 1 << 1;
    pub const FIN: u8 = 1 << 2;
    pub const DATA: u8 = 1 << 3;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub flags: u8,
    pub conn_id: u32,
    pub seq: u32,
    pub ack: u32,
    pub win: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer shorter than the segment header")]
    TooShort,
    #[error("payload length field disagrees with the trailing bytes")]
    LengthMismatch,
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("checksum verification failed")]
    ChecksumMismatch,
}

impl Segment {
    pub fn new(flags: u8, conn_id: u32, seq: u32, ack: u32, win: u16, payload: Vec<u8>) -> Self {
        Segment {
            flags,
            conn_id,
            seq,
            ack,
            win,
            payload,
        }
    }

    pub fn is_syn(&self) -> bool {
        self.flags & flag::SYN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flag::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flag::FIN != 0
    }

    pub fn is_data(&self) -> bool {
        self.flags & flag::DATA != 0
    }

    /// Encodes the header and payload into a flat buffer, filling in the
    /// checksum last so the digest covers the rest of the header.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());

        buf.push(VERSION);
        buf.push(self.flags);
        buf.extend_from_slice(&self.conn_id.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.ack.to_be_bytes());
        buf.extend_from_slice(&self.win.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&[0u8; CHECKSUM_LEN]);
        buf.extend_from_slice(&self.payload);

        let digest = md5::compute(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN].copy_from_slice(&digest.0);

        buf
    }

    /// Validates and parses a datagram. Side-effect-free: never touches any
    /// connection state, so callers can safely discard a segment that fails
    /// to decode.
    pub fn decode(buf: &[u8]) -> Result<Segment, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::TooShort);
        }

        let ver = buf[0];
        if ver != VERSION {
            return Err(DecodeError::UnsupportedVersion);
        }

        let flags = buf[1];
        let conn_id = u32::from_be_bytes(buf[2..6].try_into().unwrap());
        let seq = u32::from_be_bytes(buf[6..10].try_into().unwrap());
        let ack = u32::from_be_bytes(buf[10..14].try_into().unwrap());
        let win = u16::from_be_bytes(buf[14..16].try_into().unwrap());
        let len = u16::from_be_bytes(buf[16..18].try_into().unwrap()) as usize;

        if buf.len() != HEADER_LEN + len {
            return Err(DecodeError::LengthMismatch);
        }

        let mut scratch = buf.to_vec();
        scratch[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN].fill(0);
        let digest = md5::compute(&scratch);
        if digest.0 != buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN] {
            return Err(DecodeError::ChecksumMismatch);
        }

        Ok(Segment {
            flags,
            conn_id,
            seq,
            ack,
            win,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seg(conn={:#x} seq={} ack={} win={} len={} syn={} ack_bit={} fin={} data={})",
            self.conn_id,
            self.seq,
            self.ack,
            self.win,
            self.payload.len(),
            self.is_syn(),
            self.is_ack(),
            self.is_fin(),
            self.is_data()
        )
    }
}

/// Modular sequence-space comparison: true when `a` is ahead of `b`.
///
/// Mirrors RFC 1323's wraparound test: a segment is "new" if its sequence
/// number is within 2**31 of the left edge of the window.
pub fn wrapping_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

pub fn wrapping_gt(a: u32, b: u32) -> bool {
    wrapping_lt(b, a)
}

pub fn wrapping_le(a: u32, b: u32) -> bool {
    a == b || wrapping_lt(a, b)
}

pub fn wrapping_ge(a: u32, b: u32) -> bool {
    a == b || wrapping_gt(a, b)
}

//! An in-memory, fault-injecting datagram substrate so the reliability
//! scenarios can be driven without real sockets or real packet loss.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rudp_chat::io::DatagramIo;
use rudp_chat::segment::Segment;

pub type FaultFn = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

struct Inbox {
    queue: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
    cvar: Condvar,
}

impl Inbox {
    fn new() -> Self {
        Inbox {
            queue: Mutex::new(VecDeque::new()),
            cvar: Condvar::new(),
        }
    }
}

/// One endpoint of a simulated point-to-point link. Outbound datagrams pass
/// through a mutable fault function before landing in the peer's inbox,
/// letting tests drop, corrupt, delay, or reorder specific segments by
/// inspecting their decoded contents.
pub struct SimSocket {
    addr: SocketAddr,
    inbox: Arc<Inbox>,
    peer_inbox: Arc<Inbox>,
    fault: Mutex<FaultFn>,
    timeout: Mutex<Option<Duration>>,
}

impl DatagramIo for SimSocket {
    fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
        let outputs = (self.fault.lock().unwrap())(buf);
        if !outputs.is_empty() {
            let mut queue = self.peer_inbox.queue.lock().unwrap();
            for out in outputs {
                queue.push_back((out, self.addr));
            }
            drop(queue);
            self.peer_inbox.cvar.notify_all();
        }
        Ok(buf.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let timeout = *self.timeout.lock().unwrap();
        let mut guard = self.inbox.queue.lock().unwrap();
        loop {
            if let Some((data, from)) = guard.pop_front() {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                return Ok((n, from));
            }
            match timeout {
                Some(d) => {
                    let (g, result) = self.inbox.cvar.wait_timeout(guard, d).unwrap();
                    guard = g;
                    if result.timed_out() && guard.is_empty() {
                        return Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out"));
                    }
                }
                None => guard = self.inbox.cvar.wait(guard).unwrap(),
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        *self.timeout.lock().unwrap() = dur;
        Ok(())
    }
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Builds a connected pair of simulated sockets. `a_to_b` faults segments
/// sent from the first socket to the second and `b_to_a` faults the
/// return path.
pub fn sim_pair(
    port_a: u16,
    port_b: u16,
    a_to_b: FaultFn,
    b_to_a: FaultFn,
) -> (Arc<SimSocket>, Arc<SimSocket>) {
    let inbox_a = Arc::new(Inbox::new());
    let inbox_b = Arc::new(Inbox::new());

    let a = Arc::new(SimSocket {
        addr: addr(port_a),
        inbox: inbox_a.clone(),
        peer_inbox: inbox_b.clone(),
        fault: Mutex::new(a_to_b),
        timeout: Mutex::new(None),
    });
    let b = Arc::new(SimSocket {
        addr: addr(port_b),
        inbox: inbox_b,
        peer_inbox: inbox_a,
        fault: Mutex::new(b_to_a),
        timeout: Mutex::new(None),
    });

    (a, b)
}

pub fn no_fault() -> FaultFn {
    Box::new(|buf: &[u8]| vec![buf.to_vec()])
}

/// Drops only the first transmission of the `index`-th distinct data
/// segment observed on the link (0-based, in the order fresh sequence
/// numbers first appear); its retransmission passes through untouched.
/// Indexing by observed order rather than absolute sequence number keeps
/// this independent of the connection's randomized initial sequence number.
pub fn drop_once(index: usize) -> FaultFn {
    let mut seen = std::collections::HashSet::new();
    let mut new_count = 0usize;
    let mut dropped = false;
    Box::new(move |buf: &[u8]| {
        if !dropped {
            if let Ok(seg) = Segment::decode(buf) {
                if seg.is_data() && seen.insert(seg.seq) {
                    let this_index = new_count;
                    new_count += 1;
                    if this_index == index {
                        dropped = true;
                        return vec![];
                    }
                }
            }
        }
        vec![buf.to_vec()]
    })
}

/// Holds back the `index_a`-th distinct data segment and releases it
/// immediately after the `index_b`-th, so the peer observes `index_b`
/// before `index_a`. Indexed by observed order, not absolute sequence
/// number, for the same reason as `drop_once`.
pub fn swap_once(index_a: usize, index_b: usize) -> FaultFn {
    let mut seen = std::collections::HashSet::new();
    let mut new_count = 0usize;
    let mut held: Option<Vec<u8>> = None;
    Box::new(move |buf: &[u8]| {
        if let Ok(seg) = Segment::decode(buf) {
            if seg.is_data() && seen.insert(seg.seq) {
                let this_index = new_count;
                new_count += 1;
                if this_index == index_a && held.is_none() {
                    held = Some(buf.to_vec());
                    return vec![];
                }
                if this_index == index_b {
                    if let Some(held_buf) = held.take() {
                        return vec![buf.to_vec(), held_buf];
                    }
                }
            }
        }
        vec![buf.to_vec()]
    })
}

/// Flips the last payload byte of every other payload-bearing segment.
pub fn corrupt_alternating() -> FaultFn {
    let mut counter = 0u32;
    Box::new(move |buf: &[u8]| {
        if let Ok(seg) = Segment::decode(buf) {
            if !seg.payload.is_empty() {
                counter += 1;
                if counter % 2 == 0 {
                    let mut mutated = buf.to_vec();
                    *mutated.last_mut().unwrap() ^= 0xFF;
                    return vec![mutated];
                }
            }
        }
        vec![buf.to_vec()]
    })
}

/// Drops every datagram, simulating a fully unreachable peer.
pub fn blackhole() -> FaultFn {
    Box::new(|_buf: &[u8]| vec![])
}

/// Passes segments through while `gate` is `true`, drops them while it is
/// `false`. Lets a test toggle loss on and off mid-run.
pub fn gated(gate: Arc<AtomicBool>) -> FaultFn {
    Box::new(move |buf: &[u8]| {
        if gate.load(Ordering::SeqCst) {
            vec![buf.to_vec()]
        } else {
            vec![]
        }
    })
}

//! Endpoint dispatcher: multiplexes one bound datagram socket across many
//! connections, drives the retransmission/delayed-ACK timers, and owns the
//! connection table.

use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use rand::Rng;

use crate::config::Config;
use crate::conn::{Connection, Stats};
use crate::err::Error;
use crate::io::DatagramIo;
use crate::segment::{DecodeError, Segment};
use crate::stream::ConnHandle;

const TICK: Duration = Duration::from_millis(20);

pub(crate) struct StreamState {
    pub(crate) conn: Connection,
    pub(crate) incoming: VecDeque<Vec<u8>>,
    pub(crate) rvar: Arc<Condvar>,
    pub(crate) wvar: Arc<Condvar>,
    pub(crate) svar: Arc<Condvar>,
    pub(crate) reset: bool,
}

pub(crate) struct Manager {
    pub(crate) pending: HashMap<u32, Connection>,
    pub(crate) streams: HashMap<u32, StreamState>,
    accept_queue: VecDeque<u32>,
    accept_cvar: Arc<Condvar>,
    connect_waiters: HashMap<u32, Arc<Condvar>>,

    pub(crate) corrupt_dropped: u64,
    pub(crate) unknown_dropped: u64,
    pub(crate) protocol_violations: u64,
}

impl Manager {
    fn new() -> Self {
        Manager {
            pending: HashMap::new(),
            streams: HashMap::new(),
            accept_queue: VecDeque::new(),
            accept_cvar: Arc::new(Condvar::new()),
            connect_waiters: HashMap::new(),
            corrupt_dropped: 0,
            unknown_dropped: 0,
            protocol_violations: 0,
        }
    }

    fn fresh_conn_id(&self) -> u32 {
        let mut rng = rand::thread_rng();
        loop {
            let id: u32 = rng.gen_range(1..=u32::MAX);
            if !self.pending.contains_key(&id) && !self.streams.contains_key(&id) {
                return id;
            }
        }
    }
}

pub(crate) struct EndpointInner {
    pub(crate) socket: Arc<dyn DatagramIo>,
    pub(crate) manager: Mutex<Manager>,
    pub(crate) config: Config,
    pub(crate) local_addr: SocketAddr,
}

/// A bound transport endpoint. Owns the socket, the connection table, and
/// the background thread that drives retransmissions, delayed ACKs, and
/// inbound dispatch.
#[derive(Clone)]
pub struct Endpoint(pub(crate) Arc<EndpointInner>);

impl Endpoint {
    pub fn listen(addr: SocketAddr, config: Config) -> Result<Endpoint, Error> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(TICK))?;
        Endpoint::from_socket(Arc::new(socket), config)
    }

    /// Builds an endpoint over a caller-supplied [`DatagramIo`] substrate
    /// instead of a real `UdpSocket`, e.g. a simulated lossy/reordering
    /// transport used in integration tests.
    pub fn from_socket(socket: Arc<dyn DatagramIo>, config: Config) -> Result<Endpoint, Error> {
        socket.set_read_timeout(Some(TICK))?;
        let local_addr = socket.local_addr()?;
        let inner = Arc::new(EndpointInner {
            socket,
            manager: Mutex::new(Manager::new()),
            config,
            local_addr,
        });

        let worker = Arc::downgrade(&inner);
        thread::spawn(move || dispatch_loop(worker));

        Ok(Endpoint(inner))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr
    }

    /// Blocks until a handshake completes, returning the accepted
    /// connection.
    pub fn accept(&self) -> Result<ConnHandle, Error> {
        let inner = &self.0;
        let mut manager = inner.manager.lock().unwrap();
        let cvar = manager.accept_cvar.clone();

        while manager.accept_queue.is_empty() {
            manager = cvar.wait(manager).unwrap();
        }

        let conn_id = manager.accept_queue.pop_front().unwrap();
        let state = manager
            .streams
            .get(&conn_id)
            .ok_or(Error::ConnectionAborted)?;

        Ok(ConnHandle {
            endpoint: inner.clone(),
            conn_id,
            rvar: state.rvar.clone(),
            wvar: state.wvar.clone(),
            svar: state.svar.clone(),
        })
    }

    /// Performs the three-way handshake against `remote` and blocks until
    /// ESTABLISHED or the handshake aborts after MAX_RETRIES.
    pub fn connect(&self, remote: SocketAddr) -> Result<ConnHandle, Error> {
        let inner = &self.0;
        let iss: u32 = rand::thread_rng().gen();

        let (conn_id, syn, waiter) = {
            let mut manager = inner.manager.lock().unwrap();
            let conn_id = manager.fresh_conn_id();
            let (conn, syn) =
                Connection::new_syn_sent(conn_id, iss, inner.local_addr, remote, &inner.config);
            manager.pending.insert(conn_id, conn);
            let waiter = Arc::new(Condvar::new());
            manager.connect_waiters.insert(conn_id, waiter.clone());
            (conn_id, syn, waiter)
        };

        inner.socket.send_to(&syn.encode(), remote)?;

        let mut manager = inner.manager.lock().unwrap();
        while manager.pending.contains_key(&conn_id) {
            manager = waiter.wait(manager).unwrap();
        }

        if let Some(state) = manager.streams.get(&conn_id) {
            return Ok(ConnHandle {
                endpoint: inner.clone(),
                conn_id,
                rvar: state.rvar.clone(),
                wvar: state.wvar.clone(),
                svar: state.svar.clone(),
            });
        }

        Err(Error::Timeout)
    }

    pub fn stats(&self, conn_id: u32) -> Result<Stats, Error> {
        let manager = self.0.manager.lock().unwrap();
        manager
            .streams
            .get(&conn_id)
            .map(|s| s.conn.stats())
            .ok_or(Error::UnknownConnection(self.0.local_addr))
    }
}

/// Connects to `remote_addr` from a socket freshly bound at `local_addr`.
/// Equivalent to `Endpoint::listen(local_addr, config)?.connect(remote_addr)`
/// except the endpoint is kept alive only as long as the returned handle.
pub fn connect(
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    config: Config,
) -> Result<ConnHandle, Error> {
    Endpoint::listen(local_addr, config)?.connect(remote_addr)
}

/// Runs on a background thread holding only a `Weak` reference, so the
/// thread exits on its own once the last `Endpoint`/`ConnHandle` is dropped
/// instead of keeping the endpoint alive forever.
fn dispatch_loop(weak: Weak<EndpointInner>) {
    let Some(inner) = weak.upgrade() else { return };
    let mut buf = vec![0u8; inner.config.max_payload + crate::segment::HEADER_LEN];
    drop(inner);

    loop {
        let Some(inner) = weak.upgrade() else { break };
        drive_timers(&inner);

        let result = inner.socket.recv_from(&mut buf);
        drop(inner);

        match result {
            Ok((n, from)) => {
                let Some(inner) = weak.upgrade() else { break };
                handle_datagram(&inner, &buf[..n], from);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("endpoint socket error: {e}");
                break;
            }
        }
    }
}

fn drive_timers(inner: &Arc<EndpointInner>) {
    let now = Instant::now();
    let mut manager = inner.manager.lock().unwrap();

    let mut aborted_pending = Vec::new();
    for (&conn_id, conn) in manager.pending.iter_mut() {
        if conn.timer_due(now) {
            match conn.on_timer(now) {
                Ok(segments) => {
                    for seg in segments {
                        let _ = inner.socket.send_to(&seg.encode(), conn.remote);
                    }
                }
                Err(Error::ConnectionAborted) => aborted_pending.push(conn_id),
                Err(_) => {}
            }
        }
    }
    for conn_id in aborted_pending {
        manager.pending.remove(&conn_id);
        if let Some(waiter) = manager.connect_waiters.remove(&conn_id) {
            waiter.notify_all();
        }
        debug!("connection {conn_id:#x} aborted: handshake retries exhausted");
    }

    let mut aborted_streams = Vec::new();
    for (&conn_id, state) in manager.streams.iter_mut() {
        let conn = &mut state.conn;
        if conn.timer_due(now) {
            match conn.on_timer(now) {
                Ok(segments) => {
                    for seg in segments {
                        let _ = inner.socket.send_to(&seg.encode(), conn.remote);
                    }
                }
                Err(Error::ConnectionAborted) => aborted_streams.push(conn_id),
                Err(_) => {}
            }
        }
        if conn.ack_due(now) {
            if let Some(ack) = conn.emit_pending_ack() {
                let _ = inner.socket.send_to(&ack.encode(), conn.remote);
            }
        }
    }
    for conn_id in aborted_streams {
        if let Some(state) = manager.streams.get_mut(&conn_id) {
            state.reset_and_wake();
        }
        warn!("connection {conn_id:#x} aborted: MAX_RETRIES exceeded");
    }
}

impl StreamState {
    /// Marks the connection as aborted in place. The entry lingers in the
    /// manager's table, same as a graceful close, until the last
    /// `ConnHandle`'s `Drop` clears it — so a caller blocked in `recv`/
    /// `send`/`close` observes `ConnectionAborted` rather than racing a
    /// table removal into `UnknownConnection`.
    fn reset_and_wake(&mut self) {
        self.reset = true;
        self.rvar.notify_all();
        self.wvar.notify_all();
        self.svar.notify_all();
    }
}

fn handle_datagram(inner: &Arc<EndpointInner>, buf: &[u8], from: SocketAddr) {
    let seg = match Segment::decode(buf) {
        Ok(seg) => seg,
        Err(DecodeError::ChecksumMismatch) => {
            inner.manager.lock().unwrap().corrupt_dropped += 1;
            trace!("dropped corrupt segment from {from}");
            return;
        }
        Err(e) => {
            inner.manager.lock().unwrap().corrupt_dropped += 1;
            trace!("dropped malformed segment from {from}: {e}");
            return;
        }
    };

    let mut manager = inner.manager.lock().unwrap();

    if seg.is_syn() && !seg.is_ack() {
        if manager.pending.contains_key(&seg.conn_id) || manager.streams.contains_key(&seg.conn_id)
        {
            manager.protocol_violations += 1;
            warn!("conn_id {:#x} collision on SYN from {from}, dropping", seg.conn_id);
            return;
        }

        let iss: u32 = rand::thread_rng().gen();
        let (conn, synack) = Connection::new_syn_rcvd(
            seg.conn_id,
            iss,
            inner.local_addr,
            from,
            seg.seq,
            seg.win,
            &inner.config,
        );
        manager.pending.insert(seg.conn_id, conn);
        let _ = inner.socket.send_to(&synack.encode(), from);
        return;
    }

    if let Some(mut conn) = manager.pending.remove(&seg.conn_id) {
        let conn_id = seg.conn_id;
        let out = conn.on_segment(seg, &inner.config);
        for to_send in &out.to_send {
            let _ = inner.socket.send_to(&to_send.encode(), conn.remote);
        }

        if out.established {
            let accept_cvar = manager.accept_cvar.clone();
            let was_active = manager.connect_waiters.remove(&conn_id);

            manager.streams.insert(
                conn_id,
                StreamState {
                    conn,
                    incoming: VecDeque::new(),
                    rvar: Arc::new(Condvar::new()),
                    wvar: Arc::new(Condvar::new()),
                    svar: Arc::new(Condvar::new()),
                    reset: false,
                },
            );

            if let Some(waiter) = was_active {
                waiter.notify_all();
            } else {
                manager.accept_queue.push_back(conn_id);
                accept_cvar.notify_one();
            }
        } else {
            manager.pending.insert(conn_id, conn);
        }
        return;
    }

    let Some(state) = manager.streams.get_mut(&seg.conn_id) else {
        manager.unknown_dropped += 1;
        trace!("dropped segment for unknown conn_id {:#x}", seg.conn_id);
        return;
    };

    let out = state.conn.on_segment(seg, &inner.config);
    for to_send in &out.to_send {
        let _ = inner.socket.send_to(&to_send.encode(), state.conn.remote);
    }

    if !out.delivered.is_empty() {
        state.incoming.extend(out.delivered);
    }
    if out.wake_reader {
        state.rvar.notify_all();
    }
    if out.wake_writer {
        state.wvar.notify_all();
    }
    if out.closed {
        // Entry lingers until the last ConnHandle's Drop removes it, so a
        // reader that hasn't observed the close yet can still drain
        // whatever arrived before the peer's FIN.
        state.svar.notify_all();
    }
}

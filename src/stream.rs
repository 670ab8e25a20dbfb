//! Blocking, `TcpStream`-like handle onto one established connection.

use std::sync::{Arc, Condvar};

use crate::conn::Stats;
use crate::endpoint::EndpointInner;
use crate::err::Error;

/// A handle to one established connection, returned by `Endpoint::accept`
/// and `Endpoint::connect`. Cloning is not supported; wrap in `Arc` to share
/// across threads that each read or write independently.
pub struct ConnHandle {
    pub(crate) endpoint: Arc<EndpointInner>,
    pub(crate) conn_id: u32,
    pub(crate) rvar: Arc<Condvar>,
    pub(crate) wvar: Arc<Condvar>,
    pub(crate) svar: Arc<Condvar>,
}

impl ConnHandle {
    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    /// Blocks until at least one message is available, the peer closes with
    /// nothing left buffered, or the connection aborts.
    pub fn recv(&self) -> Result<Option<Vec<u8>>, Error> {
        let mut manager = self.endpoint.manager.lock().unwrap();
        loop {
            let Some(state) = manager.streams.get_mut(&self.conn_id) else {
                return Err(Error::UnknownConnection(self.endpoint.local_addr));
            };

            if let Some(msg) = state.incoming.pop_front() {
                return Ok(Some(msg));
            }
            if state.reset {
                return Err(Error::ConnectionAborted);
            }
            if state.conn.is_closed() {
                return Ok(None);
            }

            manager = self.rvar.wait(manager).unwrap();
        }
    }

    /// Queues `payload` for reliable delivery, blocking while the send
    /// window is full.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), Error> {
        let mut manager = self.endpoint.manager.lock().unwrap();
        loop {
            let Some(state) = manager.streams.get_mut(&self.conn_id) else {
                return Err(Error::UnknownConnection(self.endpoint.local_addr));
            };
            if state.reset {
                return Err(Error::ConnectionAborted);
            }

            match state.conn.send_msg(payload.clone(), &self.endpoint.config) {
                Ok(seg) => {
                    let remote = state.conn.remote;
                    drop(manager);
                    self.endpoint.socket.send_to(&seg.encode(), remote)?;
                    return Ok(());
                }
                Err(Error::WouldBlock) => {
                    manager = self.wvar.wait(manager).unwrap();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Initiates a graceful close and blocks until both FINs have been
    /// fully absorbed.
    pub fn close(&self) -> Result<(), Error> {
        let fin = {
            let mut manager = self.endpoint.manager.lock().unwrap();
            let Some(state) = manager.streams.get_mut(&self.conn_id) else {
                return Ok(());
            };
            let remote = state.conn.remote;
            state.conn.request_close().map(|seg| (seg, remote))
        };

        if let Some((seg, remote)) = fin {
            self.endpoint.socket.send_to(&seg.encode(), remote)?;
        }

        let mut manager = self.endpoint.manager.lock().unwrap();
        loop {
            let Some(state) = manager.streams.get(&self.conn_id) else {
                return Ok(());
            };
            if state.reset || state.conn.is_closed() {
                return Ok(());
            }
            manager = self.svar.wait(manager).unwrap();
        }
    }

    pub fn stats(&self) -> Result<Stats, Error> {
        self.endpoint.stats(self.conn_id)
    }
}

impl Drop for ConnHandle {
    fn drop(&mut self) {
        let mut manager = self.endpoint.manager.lock().unwrap();
        if let Some(state) = manager.streams.get(&self.conn_id) {
            if state.reset || state.conn.is_closed() {
                manager.streams.remove(&self.conn_id);
            }
        }
    }
}

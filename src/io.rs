//! Abstraction over the datagram substrate so the endpoint's dispatch logic
//! can run unmodified against a real `UdpSocket` or an in-memory substrate
//! that injects loss, corruption, and reordering for tests.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

pub trait DatagramIo: Send + Sync {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
}

impl DatagramIo for UdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        UdpSocket::set_read_timeout(self, dur)
    }
}

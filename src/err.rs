use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("send window is full")]
    WouldBlock,

    #[error("operation timed out")]
    Timeout,

    #[error("connection was aborted after exceeding the retransmission limit")]
    ConnectionAborted,

    #[error("message of {0} bytes exceeds max_payload")]
    MessageTooLarge(usize),

    #[error("no such connection for address {0}")]
    UnknownConnection(SocketAddr),

    #[error("port {0} already in use")]
    PortInUse(u16),

    #[error("listener for port {0} was closed")]
    ListenerClosed(u16),

    #[error("handshake rejected: conn_id already in use")]
    ProtocolViolation,
}

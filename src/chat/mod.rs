//! Multi-user chat application built as a consumer of the transport API.
//! Peripheral to the reliability engineering core: nothing here touches
//! connection/segment internals directly.

mod metrics;
mod proto;
mod room;
mod server;

pub use proto::{ClientMessage, ServerMessage};
pub use room::RoomManager;
pub use server::ChatServer;

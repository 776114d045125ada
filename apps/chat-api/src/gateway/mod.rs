//! Push carrier: a WebSocket that syncs on the client's behalf.

pub mod events;
pub mod fanout;
pub mod server;
pub mod session;

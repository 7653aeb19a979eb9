//! Request handlers shared by the HTTP routes and the WebSocket protocol.

mod entities;
mod sync;
mod websocket;

pub use entities::*;
pub use sync::*;
pub use websocket::*;

//! WebSocket support for live dashboards.
//!
//! Clients connect to `/ws`, receive every engine event as it is published,
//! and can request refreshes without going through the HTTP routes.

mod events;
mod manager;
mod protocol;

pub use events::forward_engine_events;
pub use manager::{Connection, ConnectionManager, MessageSender};
pub use protocol::*;

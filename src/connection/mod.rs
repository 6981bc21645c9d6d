//! Persistent push channel.
//!
//! | Module      | Responsibility                                         |
//! |-------------|--------------------------------------------------------|
//! | `state`     | Lifecycle states and the observable status snapshot    |
//! | `transport` | Socket connect/send/receive behind a swappable seam    |
//! | `manager`   | Lifecycle driver: handshake, backoff, topic dispatch   |
//!
//! The manager is an explicitly constructed value. Build one in the
//! application's composition root and share it behind an `Arc` with the
//! code that needs it.

pub mod manager;
pub mod state;
pub mod transport;

pub use manager::{ConnectionManager, ManagerConfig};
pub use state::{ChannelStatus, ConnectionState};
pub use transport::{Connector, Link, WsConnector};

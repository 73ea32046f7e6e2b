//! Multi-client line chat relay.
//!
//! Clients connect over plain TCP and send newline terminated lines; every line is relayed to
//! every other connected client. [`Server`] accepts connections, each connection is driven by a
//! [`Client`](client::Client) task, [`ClientRegistry`] tracks who is connected and
//! [`Broadcaster`] fans lines out.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod handle;
pub mod registry;
pub mod server;

pub use broadcast::{Broadcaster, Message};
pub use config::Config;
pub use error::{Error, Result, StateError};
pub use handle::{ConnectionHandle, ConnectionState};
pub use registry::{ClientRegistry, ConnectionId};
pub use server::Server;

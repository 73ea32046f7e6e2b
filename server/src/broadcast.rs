use std::sync::Arc;

use chat::ServerLine;
use tracing::{debug, warn};

use crate::registry::{ClientRegistry, ConnectionId};

/// One line to fan out, plus the connection it came from.
///
/// System lines (joins, departures, keep-alives) have no origin and reach everybody.
#[derive(Debug, Clone)]
pub struct Message {
    origin: Option<ConnectionId>,
    text: Arc<str>,
}

impl Message {
    pub fn chat(origin: ConnectionId, sender: &str, content: &str) -> Self {
        Self {
            origin: Some(origin),
            text: ServerLine::Chat { sender, content }.to_string().into(),
        }
    }

    /// A line without sender prefix, excluding `origin` if one is given.
    pub fn system(origin: Option<ConnectionId>, line: ServerLine<'_>) -> Self {
        Self {
            origin,
            text: line.to_string().into(),
        }
    }

    pub fn origin(&self) -> Option<ConnectionId> {
        self.origin
    }
}

/// Fans messages out to every registered connection.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `message` to everyone but its origin and return the number of successful
    /// deliveries.
    ///
    /// Destinations that fail are marked unwritable and evicted once the pass is complete. A
    /// failing destination never keeps the others from receiving the message.
    pub fn broadcast(&self, message: &Message) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, handle) in self.registry.snapshot() {
            if Some(id) == message.origin || !handle.is_writable() || handle.is_closing() {
                continue;
            }
            match handle.send(message.text.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(conn_id = %id, error = %err, "dropping connection after failed write");
                    handle.mark_unwritable();
                    failed.push(handle);
                }
            }
        }

        for handle in failed {
            self.registry.deregister(handle.id());
            handle.request_close();
        }
        debug!(origin = ?message.origin, delivered, "broadcast");
        delivered
    }

    /// Send a keep-alive line to every connection. Failures are ignored; regular broadcasts
    /// take care of eviction.
    pub fn keepalive(&self) -> usize {
        let line: Arc<str> = ServerLine::KeepAlive.to_string().into();
        self.registry
            .snapshot()
            .into_iter()
            .filter(|(_, handle)| handle.send(line.clone()).is_ok())
            .count()
    }
}

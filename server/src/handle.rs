use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chat::protocol::DELIMITER;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result, StateError};
use crate::registry::ConnectionId;

/// Where a connection is in its life.
///
/// `Connecting → Naming → Active → Closed`, with `Naming` skipped when the handshake is off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Naming,
    Active { name: String },
    Closed { name: Option<String> },
}

impl ConnectionState {
    fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Naming => "naming",
            ConnectionState::Active { .. } => "active",
            ConnectionState::Closed { .. } => "closed",
        }
    }

    fn begin_naming(&mut self) -> Result<(), StateError> {
        match self {
            ConnectionState::Connecting => {
                *self = ConnectionState::Naming;
                Ok(())
            }
            other => Err(StateError {
                from: other.label(),
                event: "start naming",
            }),
        }
    }

    fn activate(&mut self, name: String) -> Result<(), StateError> {
        match self {
            ConnectionState::Connecting | ConnectionState::Naming => {
                *self = ConnectionState::Active { name };
                Ok(())
            }
            other => Err(StateError {
                from: other.label(),
                event: "name",
            }),
        }
    }

    /// Move to `Closed`. Yields the display name only on the first close of an active
    /// connection, which is exactly when a departure has to be announced.
    fn close(&mut self) -> Option<String> {
        let previous = std::mem::replace(self, ConnectionState::Closed { name: None });
        match previous {
            ConnectionState::Active { name } => {
                *self = ConnectionState::Closed {
                    name: Some(name.clone()),
                };
                Some(name)
            }
            ConnectionState::Closed { name } => {
                *self = ConnectionState::Closed { name };
                None
            }
            ConnectionState::Connecting | ConnectionState::Naming => None,
        }
    }
}

struct Inner {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Arc<str>>,
    writable: AtomicBool,
    state: Mutex<ConnectionState>,
    close: watch::Sender<bool>,
}

/// Server side representation of one accepted connection.
///
/// Cloning is cheap; all clones refer to the same connection. Lines sent through the handle are
/// queued and written by the connection's own writer task (see [`write_loop`]), so a slow peer
/// never stalls whoever is sending to it.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("writable", &self.is_writable())
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, peer: SocketAddr, outbound: mpsc::Sender<Arc<str>>) -> Self {
        let (close, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id,
                peer,
                outbound,
                writable: AtomicBool::new(true),
                state: Mutex::new(ConnectionState::Connecting),
                close,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn is_writable(&self) -> bool {
        self.inner.writable.load(Ordering::Acquire)
    }

    pub fn mark_unwritable(&self) {
        self.inner.writable.store(false, Ordering::Release);
    }

    /// Queue `line` for this connection. Never waits.
    ///
    /// A full queue counts as a failed write, as does a connection that is no longer writable
    /// or is closing.
    pub fn send(&self, line: Arc<str>) -> Result<()> {
        if !self.is_writable() {
            return Err(self.write_failure("connection is not writable"));
        }
        if self.is_closing() {
            return Err(self.write_failure("connection is closing"));
        }
        self.inner.outbound.try_send(line).map_err(|err| match err {
            TrySendError::Full(_) => self.write_failure("outbound queue is full"),
            TrySendError::Closed(_) => self.write_failure("connection is closed"),
        })
    }

    fn write_failure(&self, reason: &'static str) -> Error {
        Error::WriteFailure {
            id: self.inner.id,
            reason,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_state().clone()
    }

    /// The display name, once the connection is active.
    pub fn display_name(&self) -> Option<String> {
        match &*self.lock_state() {
            ConnectionState::Active { name } => Some(name.clone()),
            ConnectionState::Closed { name } => name.clone(),
            _ => None,
        }
    }

    pub(crate) fn begin_naming(&self) -> Result<(), StateError> {
        self.lock_state().begin_naming()
    }

    pub(crate) fn activate(&self, name: String) -> Result<(), StateError> {
        self.lock_state().activate(name)
    }

    /// Enter `Closed`. Returns the name to announce as departed, at most once.
    pub(crate) fn finish(&self) -> Option<String> {
        self.lock_state().close()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the connection to shut down. Its reader and writer notice on their own.
    pub fn request_close(&self) {
        self.inner.close.send_replace(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.inner.close.borrow()
    }

    /// Completes once [`request_close`](Self::request_close) has been called.
    pub async fn closed(&self) {
        let mut close = self.inner.close.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = close.wait_for(|closed| *closed).await;
    }
}

/// Writer task of one connection.
///
/// Owns the write half of the socket and writes queued lines in order. When a close is
/// requested, lines already queued are still flushed before the write half is shut down. A
/// failed write marks the handle unwritable and requests a close.
pub async fn write_loop<W>(
    handle: ConnectionHandle,
    mut writer: W,
    mut rx: mpsc::Receiver<Arc<str>>,
) where
    W: AsyncWrite + Unpin,
{
    let id = handle.id();
    let mut draining = false;
    loop {
        let line = if draining {
            rx.recv().await
        } else {
            select! {
                () = handle.closed() => {
                    rx.close();
                    draining = true;
                    continue;
                }
                line = rx.recv() => line,
            }
        };
        let Some(line) = line else { break };

        if let Err(err) = write_line(&mut writer, &line).await {
            warn!(conn_id = %id, error = %err, "write failed");
            handle.mark_unwritable();
            handle.request_close();
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        debug!(conn_id = %id, error = %err, "shutdown of write half failed");
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(DELIMITER);
    writer.write_all(&frame).await?;
    writer.flush().await
}

use std::net::SocketAddr;
use std::sync::Arc;

use chat::{Directive, Input, LineFramer, ServerLine};
use futures_util::{Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, Message};
use crate::config::Config;
use crate::error::Result;
use crate::handle::{ConnectionHandle, ConnectionState, write_loop};
use crate::registry::{ClientRegistry, ConnectionId};

/// Representation of a chat client in the server code.
///
/// We receive lines from the client and broadcast them to all other clients. Runs in its own
/// task; nothing that goes wrong here escapes to the accept loop or to other clients.
pub struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ClientRegistry>,
    config: Arc<Config>,
}

/// Why a connection left the read loop without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    EndOfStream,
    Requested,
    ClosedByServer,
    /// Closed because a line could not be delivered to this client.
    WriteFailed,
}

enum Flow {
    Continue,
    Exit,
}

impl Client {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        registry: Arc<ClientRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            stream,
            peer,
            registry,
            config,
        }
    }

    pub async fn run(self) {
        let Client {
            stream,
            peer,
            registry,
            config,
        } = self;
        let id = registry.next_id();
        let (read, write) = stream.into_split();
        let (tx, rx) = mpsc::channel(config.outbound_capacity);
        let handle = ConnectionHandle::new(id, peer, tx);

        if let Err(err) = registry.register(handle.clone()) {
            warn!(conn_id = %id, peer = %peer, error = %err, "rejecting connection");
            return;
        }
        info!(conn_id = %id, peer = %peer, "client connected");

        // Task to write queued lines to this client
        let mut writer = tokio::spawn(write_loop(handle.clone(), write, rx));
        let broadcaster = Broadcaster::new(registry.clone());

        let framer = LineFramer::new(config.max_line_length).keep_empty();
        let lines = chat::lines(read, framer);
        let session = Session {
            handle: &handle,
            broadcaster: &broadcaster,
        };
        match session.run(lines, config.naming).await {
            Ok(Disconnect::EndOfStream) => info!(conn_id = %id, "client disconnected"),
            Ok(Disconnect::Requested) => info!(conn_id = %id, "client asked to disconnect"),
            Ok(Disconnect::ClosedByServer) => info!(conn_id = %id, "connection closed by server"),
            Ok(Disconnect::WriteFailed) => {
                warn!(conn_id = %id, peer = %peer, "connection closed after write failure")
            }
            Err(err) => {
                warn!(conn_id = %id, peer = %peer, error = %err, "connection closed abnormally")
            }
        }

        registry.deregister(id);
        let departed = handle.finish();
        handle.request_close();
        if let Some(name) = departed {
            broadcaster.broadcast(&Message::system(Some(id), ServerLine::Left(&name)));
        }

        if timeout(config.shutdown_timeout(), &mut writer).await.is_err() {
            warn!(conn_id = %id, "timed out flushing outbound lines");
            writer.abort();
        }
    }
}

/// Per connection state machine driven by the lines the client sends.
struct Session<'a> {
    handle: &'a ConnectionHandle,
    broadcaster: &'a Broadcaster,
}

impl Session<'_> {
    async fn run<S>(&self, lines: S, naming: bool) -> Result<Disconnect>
    where
        S: Stream<Item = Result<String, chat::FramingError>>,
    {
        tokio::pin!(lines);
        if naming {
            self.handle.begin_naming()?;
            self.handle.send(ServerLine::Prompt.to_string().into())?;
        } else {
            self.handle.activate(default_name(self.handle.id()))?;
        }

        let closed = self.handle.closed();
        tokio::pin!(closed);
        loop {
            let line = select! {
                () = &mut closed => return Ok(self.close_reason()),
                line = lines.next() => line,
            };
            let Some(line) = line else {
                return Ok(Disconnect::EndOfStream);
            };
            match self.on_line(&line?)? {
                Flow::Continue => {}
                Flow::Exit => return Ok(Disconnect::Requested),
            }
        }
    }

    fn close_reason(&self) -> Disconnect {
        if self.handle.is_writable() {
            Disconnect::ClosedByServer
        } else {
            Disconnect::WriteFailed
        }
    }

    fn on_line(&self, line: &str) -> Result<Flow> {
        let line = line.trim();
        match (chat::protocol::parse(line), self.handle.state()) {
            (Input::Directive(Directive::Exit), _) => return Ok(Flow::Exit),
            (Input::Directive(Directive::Name(name)), ConnectionState::Naming) => {
                self.complete_naming(name)?;
            }
            (Input::Text(name), ConnectionState::Naming) => {
                self.complete_naming(name.to_string())?;
            }
            (Input::Directive(Directive::Name(_)), _) => {
                self.notice("names cannot be changed once set");
            }
            (Input::Directive(Directive::Unknown(command)), _) => {
                self.notice(&format!("unknown command: {command}"));
            }
            (Input::Text(""), _) => {}
            (Input::Text(text), ConnectionState::Active { name }) => {
                debug!(conn_id = %self.handle.id(), "{name}: {text}");
                self.broadcaster
                    .broadcast(&Message::chat(self.handle.id(), &name, text));
            }
            (Input::Text(_), state) => {
                debug!(conn_id = %self.handle.id(), ?state, "ignoring line");
            }
        }
        Ok(Flow::Continue)
    }

    fn complete_naming(&self, name: String) -> Result<()> {
        let name = if name.is_empty() {
            default_name(self.handle.id())
        } else {
            name
        };
        self.handle.activate(name.clone())?;
        info!(conn_id = %self.handle.id(), name = %name, "client named");
        self.broadcaster.broadcast(&Message::system(
            Some(self.handle.id()),
            ServerLine::Joined(&name),
        ));
        Ok(())
    }

    /// Line for this client only. A failure surfaces through the writer closing the connection.
    fn notice(&self, text: &str) {
        if let Err(err) = self.handle.send(ServerLine::Notice(text).to_string().into()) {
            debug!(conn_id = %self.handle.id(), error = %err, "could not send notice");
        }
    }
}

/// Name used when the client does not pick one.
pub fn default_name(id: ConnectionId) -> String {
    format!("Client {id}")
}

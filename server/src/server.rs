use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::select;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::client::Client;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::ClientRegistry;

/// Pause after a failed accept, so a persistent error does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections and hands each one to its own [`Client`] task.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    config: Arc<Config>,
}

impl Server {
    /// Bind the listener. Failing to bind is fatal and not retried.
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::ListenerBind { addr, source })?;
        info!(addr = %listener.local_addr()?, "listening");
        Ok(Self {
            listener,
            registry: Arc::new(ClientRegistry::new()),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    /// Serve until `shutdown` completes, then close every connection.
    ///
    /// Connections get `shutdown_timeout` to flush what is queued for them before their tasks
    /// are aborted. The listener is released last.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut connections = JoinSet::new();
        let keepalive = self
            .config
            .keepalive_interval()
            .map(|period| tokio::spawn(keepalive_loop(Broadcaster::new(self.registry()), period)));

        tokio::pin!(shutdown);
        loop {
            select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = self.registry();
                        let client = Client::new(stream, peer, registry, self.config.clone());
                        connections.spawn(client.run());
                    }
                    Err(err) => {
                        let err = Error::Accept(err);
                        warn!(error = %err, "accept failed");
                        sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "connection task failed");
                    }
                }
            }
        }

        info!(clients = self.registry.len(), "shutting down");
        if let Some(keepalive) = keepalive {
            keepalive.abort();
        }
        self.registry.close_all();
        let drained = timeout(self.config.shutdown_timeout(), async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = connections.len(), "connections did not close in time, aborting");
            connections.shutdown().await;
        }
        drop(self.listener);
        info!("server stopped");
        Ok(())
    }
}

async fn keepalive_loop(broadcaster: Broadcaster, period: Duration) {
    let mut ticker = interval(period);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let reached = broadcaster.keepalive();
        debug!(reached, "keep-alive sent");
    }
}

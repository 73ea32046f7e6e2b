use chat::FramingError;
use chat::protocol::NAME_PROMPT;
use futures_util::{Stream, StreamExt};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::{mpsc, watch},
};
use tracing::warn;

pub struct OutputReceiver<R, O> {
    read: R,
    out: O,
    prompts: mpsc::Sender<()>,
    shutdown: watch::Receiver<bool>,
}

impl<R, O> OutputReceiver<R, O>
where
    R: Stream<Item = Result<String, FramingError>> + Unpin,
    O: AsyncWrite + Unpin,
{
    pub fn new(
        read: R,
        out: O,
        prompts: mpsc::Sender<()>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        OutputReceiver {
            read,
            out,
            prompts,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        // Read lines from the server and print them. Keep-alives never get here, the framer
        // drops empty lines.
        while let Some(line) = self.next().await {
            match line {
                Ok(line) if line == NAME_PROMPT => {
                    // The input side answers with our name
                    let _ = self.prompts.try_send(());
                }
                Ok(line) => {
                    if let Err(e) = self.print(&line).await {
                        warn!("Could not print message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Error receiving message: {}", e);
                    break;
                }
            }
        }
    }

    async fn print(&mut self, line: &str) -> std::io::Result<()> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }

    async fn next(&mut self) -> Option<Result<String, FramingError>> {
        let OutputReceiver { read, shutdown, .. } = self;
        select! {
            _ = shutdown.wait_for(|stop| *stop) => None,
            line = read.next() => line
        }
    }
}

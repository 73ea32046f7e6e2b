use chat::{Directive, Input};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::{mpsc, watch},
};
use tracing::warn;

// Actor responsible for reading lines from the user and sending them to the server
pub struct InputSender<W, I> {
    write: W,
    input: I,
    prompts: mpsc::Receiver<()>,
    shutdown: watch::Receiver<bool>,
    user_name: String,
}

impl<W, I> InputSender<W, I>
where
    W: AsyncWrite + Unpin + Send + 'static,
    I: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(
        write: W,
        input: I,
        prompts: mpsc::Receiver<()>,
        shutdown: watch::Receiver<bool>,
        user_name: String,
    ) -> Self {
        Self {
            write,
            input,
            prompts,
            shutdown,
            user_name,
        }
    }

    pub async fn run(mut self) {
        let InputSender {
            write,
            input,
            prompts,
            shutdown,
            user_name,
        } = &mut self;
        select! {
            _ = shutdown.wait_for(|stop| *stop) => (),
            () = InputSender::<W, I>::consume_input_stream(write, input, prompts, user_name) => (),
        }
        // Closing our half tells the server we are gone
        let _ = self.write.shutdown().await;
    }

    async fn consume_input_stream(
        write: &mut W,
        input: &mut I,
        prompts: &mut mpsc::Receiver<()>,
        user_name: &str,
    ) {
        let mut lines = input.lines();
        loop {
            let line = select! {
                Some(()) = prompts.recv() => Directive::Name(user_name.to_string()).to_line(),
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => return,
                    Err(e) => {
                        warn!("Could not read input: {}", e);
                        return;
                    }
                },
            };
            if let Err(e) = send_line(write, &line).await {
                warn!("Could not send message: {}", e);
                return;
            }
            if let Input::Directive(Directive::Exit) = chat::protocol::parse(line.trim()) {
                return;
            }
        }
    }
}

async fn send_line<W>(write: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\n").await?;
    write.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader, duplex};

    async fn read_exact_text<R: tokio::io::AsyncRead + Unpin>(read: &mut R, len: usize) -> String {
        let mut buf = vec![0; len];
        read.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn answers_the_name_prompt() {
        let (mut server, client) = duplex(1024);
        let (mut keyboard, typed) = duplex(1024);
        let (prompt_tx, prompts) = mpsc::channel(1);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let sender = InputSender::new(
            client,
            BufReader::new(typed),
            prompts,
            shutdown,
            "alice".to_string(),
        );
        let task = tokio::spawn(sender.run());

        prompt_tx.send(()).await.unwrap();
        assert_eq!(read_exact_text(&mut server, 12).await, "/name alice\n");

        keyboard.write_all(b"/exit\n").await.unwrap();
        task.await.unwrap();
        let mut rest = String::new();
        server.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "/exit\n");
    }

    #[tokio::test]
    async fn stops_after_exit() {
        let (mut server, client) = duplex(1024);
        let (_prompt_tx, prompts) = mpsc::channel(1);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        let input: &[u8] = b"hello\n/exit\nnever sent\n";

        InputSender::new(client, input, prompts, shutdown, "alice".to_string())
            .run()
            .await;

        let mut sent = String::new();
        server.read_to_string(&mut sent).await.unwrap();
        assert_eq!(sent, "hello\n/exit\n");
    }

    #[tokio::test]
    async fn shutdown_closes_the_connection() {
        let (mut server, client) = duplex(1024);
        let (_keyboard, typed) = duplex(1024);
        let (_prompt_tx, prompts) = mpsc::channel(1);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let task = tokio::spawn(
            InputSender::new(client, BufReader::new(typed), prompts, shutdown, "bob".to_string())
                .run(),
        );
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let mut sent = String::new();
        server.read_to_string(&mut sent).await.unwrap();
        assert_eq!(sent, "");
    }
}

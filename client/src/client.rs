use std::io;

use crate::{input_sender::InputSender, output_receiver::OutputReceiver};
use chat::LineFramer;
use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader, stdin, stdout},
    net::{TcpStream, ToSocketAddrs},
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
};

pub struct Client {
    send_input: JoinHandle<()>,
    receive_output: JoinHandle<()>,
}

impl Client {
    /// Connect to a chat server and relay between it and the terminal.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        shutdown: watch::Receiver<bool>,
        user_name: String,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();

        Ok(Self::new(
            read,
            write,
            BufReader::new(stdin()),
            stdout(),
            shutdown,
            user_name,
        ))
    }

    pub fn new<R, W, I, O>(
        read: R,
        write: W,
        input: I,
        out: O,
        shutdown: watch::Receiver<bool>,
        user_name: String,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        I: AsyncBufRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let (prompt_tx, prompts) = mpsc::channel(1);

        let input_sender = InputSender::new(write, input, prompts, shutdown.clone(), user_name);
        let send_input = tokio::spawn(async move {
            input_sender.run().await;
        });

        let lines = Box::pin(chat::lines(read, LineFramer::default()));
        let output_receiver = OutputReceiver::new(lines, out, prompt_tx, shutdown);
        let receive_output = tokio::spawn(async move {
            output_receiver.run().await;
        });

        Self {
            send_input,
            receive_output,
        }
    }

    /// Completes once the server has closed the connection.
    ///
    /// If input ends first (`/exit`, end of input) we wait for the server to hang up in turn.
    pub async fn wait_for_shutdown(self) {
        let Client {
            mut send_input,
            mut receive_output,
        } = self;
        select! {
            _ = &mut send_input => {
                let _ = receive_output.await;
            }
            _ = &mut receive_output => send_input.abort(),
        }
    }
}

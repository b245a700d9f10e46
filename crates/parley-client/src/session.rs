//! A connected chat session.

use crate::input::{parse_line, Input, EXIT_COMMAND};
use anyhow::{anyhow, bail, Context, Result};
use parley_core::{run_receiver, run_sender, Message};
use parley_protocol::{Frame, FrameCodec};
use parley_transport::{connect, FrameSink, FrameSource};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Queue depth between the prompt and the sender pump.
const QUEUE_CAPACITY: usize = 64;

/// Connect to `server` and identify as `username`.
///
/// # Errors
///
/// Returns an error if the connection fails or the server refuses the name.
pub async fn join(
    server: &str,
    username: &str,
) -> Result<(Box<dyn FrameSource>, Box<dyn FrameSink>)> {
    let connection = connect(server, FrameCodec::new())
        .await
        .with_context(|| format!("Failed to connect to {server}"))?;
    info!(server, peer = ?connection.remote_addr(), "Connected");

    let (_, _, mut source, mut sink) = connection.into_parts();
    sink.send(&Frame::identify(username))
        .await
        .context("Failed to send identification")?;

    match source.recv().await.context("Failed to read server reply")? {
        Some(Frame::Welcome { .. }) => Ok((source, sink)),
        Some(Frame::Error { code, message }) => {
            bail!("Server refused {username}: {message} ({code:?})")
        }
        Some(other) => bail!("Unexpected {} frame from server", other.kind()),
        None => Err(anyhow!("Server closed the connection")),
    }
}

/// Relay lines from `lines` to the server and print what arrives until the
/// user exits or either side closes.
///
/// # Errors
///
/// Returns an error if reading input fails.
pub async fn chat<R>(
    username: &str,
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    lines: R,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let (feed_tx, mut incoming) = mpsc::channel(QUEUE_CAPACITY);
    let (outgoing, outbound) = mpsc::channel(QUEUE_CAPACITY);
    let receiver = tokio::spawn(run_receiver(source, feed_tx, None));
    let sender = tokio::spawn(run_sender(sink, outbound));

    println!("exit by typing '{EXIT_COMMAND}', or sending EOF (Ctrl+D)");
    let mut lines = lines.lines();

    loop {
        tokio::select! {
            message = incoming.recv() => match message {
                Some(message) => print_message(&message),
                None => {
                    println!("*** server closed the connection");
                    break;
                }
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    debug!("Input closed");
                    break;
                };
                match parse_line(&line, username) {
                    Input::Exit => break,
                    Input::Empty => {}
                    Input::Send(message) => {
                        if outgoing.send(message).await.is_err() {
                            warn!("Connection lost");
                            break;
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Flush queued messages, then close the write half
    drop(outgoing);
    if let Err(e) = sender.await {
        warn!(error = %e, "Sender task failed");
    }
    receiver.abort();
    Ok(())
}

fn print_message(message: &Message) {
    println!("{}: {}", message.source(), message.text());
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ConnectionHandler, HandlerConfig, Router, RouterConfig};
    use parley_transport::{TcpTransport, Transport};

    async fn start_server() -> String {
        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), FrameCodec::new())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        let (router, _) = Router::spawn(RouterConfig::default());
        tokio::spawn(async move {
            while let Ok(connection) = transport.accept().await {
                let handler =
                    ConnectionHandler::new(connection, router.clone(), HandlerConfig::default());
                tokio::spawn(handler.run());
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_join_and_send() {
        let server = start_server().await;
        let (mut bob_rx, _bob_tx) = join(&server, "bob").await.unwrap();
        let (source, sink) = join(&server, "alice").await.unwrap();

        let script: &[u8] = b"bob:hello\nbob:meet at 10:30\n/exit\n";
        chat("alice", source, sink, script).await.unwrap();

        assert_eq!(
            bob_rx.recv().await.unwrap(),
            Some(Frame::message(Message::new("alice", "bob", "hello")))
        );
        assert_eq!(
            bob_rx.recv().await.unwrap(),
            Some(Frame::message(Message::new("alice", "bob", "meet at 10:30")))
        );
    }

    #[tokio::test]
    async fn test_taken_name_is_refused() {
        let server = start_server().await;
        let _first = join(&server, "alice").await.unwrap();

        match join(&server, "alice").await {
            Ok(_) => panic!("second alice was accepted"),
            Err(e) => assert!(e.to_string().contains("refused")),
        }
    }
}

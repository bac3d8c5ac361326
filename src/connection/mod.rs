//! One live WebSocket session carrying frame messages.
//!
//! All connection state lives on a single spawned task: the receive loop,
//! the send queue, and the command channel from the owning handle are
//! serialized there, so nothing needs a lock. A small writer task owns the
//! sink half and reports each send completion back, which is what drives
//! the queue's Idle/Sending edge.

pub mod send_queue;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async, tungstenite::Error as WsError, tungstenite::Message as WsMessage,
    WebSocketStream,
};

use crate::protocol::Frame;
use send_queue::SendQueue;

/// Fatal connection failures. Malformed inbound frames are not here — they
/// are dropped locally and the receive loop keeps going. A graceful remote
/// close is not an error either; it surfaces as [`ConnectionEvent::Closed`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(#[source] WsError),
    #[error("transport error: {0}")]
    Transport(#[source] WsError),
}

/// Events surfaced to the connection's owner. Exactly one terminal event
/// (`Error` or `Closed`) is delivered per connection; the event channel
/// closes right after it.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The session is armed: handshake done and the receive loop running.
    Open,
    /// A decoded inbound frame (known or unknown opcode).
    Frame(Frame),
    Error(ConnectionError),
    Closed,
}

enum Command {
    Send(Frame),
    Close,
}

/// Cheap cloneable sending handle. Safe to use after the connection has
/// closed — operations on a dead connection are no-ops.
#[derive(Clone)]
pub struct FrameSender {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl FrameSender {
    /// Offer a frame for transmission. Coalesces under backpressure: only
    /// the newest offered frame at each wire-free instant is transmitted.
    pub fn send(&self, frame: Frame) {
        let _ = self.cmd_tx.send(Command::Send(frame));
    }

    /// Fire-and-forget close. Idempotent.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

/// Owning handle for one connection. Created by [`connect`] (client side)
/// or [`accept`] (host side); the session ends on [`close`], transport
/// error, or remote close.
///
/// [`connect`]: PeerConnection::connect
/// [`accept`]: PeerConnection::accept
/// [`close`]: PeerConnection::close
pub struct PeerConnection {
    sender: FrameSender,
    start_tx: Option<oneshot::Sender<()>>,
}

impl PeerConnection {
    /// Dial `url` and perform the client handshake.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>), ConnectionError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(ConnectionError::HandshakeFailed)?;
        Ok(Self::from_stream(ws))
    }

    /// Wrap an already-upgraded server-side stream.
    pub fn accept<S>(ws: WebSocketStream<S>) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::from_stream(ws)
    }

    fn from_stream<S>(
        ws: WebSocketStream<S>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (start_tx, start_rx) = oneshot::channel();

        tokio::spawn(connection_loop(ws, start_rx, cmd_rx, event_tx));

        (
            Self {
                sender: FrameSender { cmd_tx },
                start_tx: Some(start_tx),
            },
            event_rx,
        )
    }

    /// Arm the receive loop. Idempotent — a second call is a no-op.
    /// Frames offered before `start` are queued and go out once armed.
    pub fn start(&mut self) {
        if let Some(start_tx) = self.start_tx.take() {
            let _ = start_tx.send(());
        }
    }

    pub fn send(&self, frame: Frame) {
        self.sender.send(frame);
    }

    pub fn close(&self) {
        self.sender.close();
    }

    /// A cloneable sender for pipelines that outlive this handle's borrow.
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }
}

async fn connection_loop<S>(
    ws: WebSocketStream<S>,
    start_rx: oneshot::Receiver<()>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Nothing is armed until start(). If the handle is dropped without
    // starting, the stream is torn down here.
    if start_rx.await.is_err() {
        return;
    }
    let _ = event_tx.send(ConnectionEvent::Open);

    let (mut ws_sender, mut ws_receiver) = ws.split();

    // Writer half: one message at a time, completion reported after each.
    // Capacity 1 is enough — the queue keeps the channel empty whenever a
    // new send is promoted.
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(1);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<(), WsError>>();
    tokio::spawn(async move {
        while let Some(data) = out_rx.recv().await {
            let result = ws_sender.send(WsMessage::Binary(data)).await;
            let failed = result.is_err();
            if done_tx.send(result).is_err() || failed {
                return;
            }
        }
        // Command channel gone: graceful local close
        let _ = ws_sender.close().await;
    });

    let mut queue = SendQueue::new();
    let terminal = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(frame)) => {
                    if let Some(frame) = queue.offer(frame) {
                        // Only fails if the writer died; its pending error
                        // completion terminates the loop right after.
                        let _ = out_tx.try_send(frame.encode());
                    }
                }
                Some(Command::Close) | None => break ConnectionEvent::Closed,
            },
            done = done_rx.recv() => match done {
                Some(Ok(())) => {
                    if let Some(next) = queue.complete() {
                        let _ = out_tx.try_send(next.encode());
                    }
                }
                Some(Err(e)) => break ConnectionEvent::Error(ConnectionError::Transport(e)),
                None => break ConnectionEvent::Closed,
            },
            message = ws_receiver.next() => match message {
                Some(Ok(WsMessage::Binary(data))) => match Frame::decode(&data) {
                    Ok(frame) => {
                        let _ = event_tx.send(ConnectionEvent::Frame(frame));
                    }
                    // The one recoverable case: drop the message, keep going
                    Err(e) => eprintln!("⚠️  Dropping malformed message: {}", e),
                },
                Some(Ok(WsMessage::Close(_))) | None => break ConnectionEvent::Closed,
                Some(Ok(_)) => {} // text/ping/pong: not ours
                Some(Err(e)) => break ConnectionEvent::Error(ConnectionError::Transport(e)),
            },
        }
    };

    // Dropping out_tx lets the writer flush its close frame; a completion
    // racing with teardown lands on a closed done channel and is ignored.
    drop(out_tx);
    let _ = event_tx.send(terminal);
}

/// In-memory WebSocket pairs for tests: a real client/server handshake over
/// `tokio::io::duplex`, no sockets involved.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::{accept_async, client_async};

    pub async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move { accept_async(server_io).await.unwrap() });
        let (client, _) = client_async("ws://localhost/", client_io).await.unwrap();
        (client, server.await.unwrap())
    }

    pub async fn next_binary(ws: &mut WebSocketStream<DuplexStream>) -> Option<Vec<u8>> {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(WsMessage::Binary(data)) => return Some(data),
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    }
}

//! Text-message transport boundary.
//!
//! A [`Transport`] is one bidirectional connection: an outbound queue of text
//! messages and an inbound stream of [`TransportEvent`]s. Concrete sockets
//! are adapted with [`Transport::from_socket`]; dropping the outbound side
//! closes the socket.

use crate::error::WireError;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tracing::debug;

/// Something that happened on the inbound side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete text message.
    Message(String),
    /// The peer closed the connection.
    Closed,
    /// The connection failed.
    Error(String),
}

/// Classification of a raw socket frame.
#[derive(Debug)]
pub enum SocketFrame {
    Text(String),
    Close,
    /// Ping, pong, binary: not part of the protocol.
    Ignored,
}

/// One bidirectional text connection.
#[derive(Debug)]
pub struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport {
    /// Assemble a transport from its two queues.
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Split into the outbound sender and the inbound event stream.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        (self.outbound, self.inbound)
    }

    /// In-memory connected pair. Must be called inside a Tokio runtime.
    pub fn pair() -> (Transport, Transport) {
        let (a_out, a_out_rx) = mpsc::unbounded_channel();
        let (b_out, b_out_rx) = mpsc::unbounded_channel();
        let (a_in_tx, a_in) = mpsc::unbounded_channel();
        let (b_in_tx, b_in) = mpsc::unbounded_channel();

        tokio::spawn(forward(a_out_rx, b_in_tx));
        tokio::spawn(forward(b_out_rx, a_in_tx));

        (Transport::new(a_out, a_in), Transport::new(b_out, b_in))
    }

    /// Adapt a message socket (WebSocket or similar) into a transport.
    ///
    /// Spawns one writer and one reader task. `encode` turns outbound text
    /// into a socket message; `classify` maps inbound socket messages.
    pub fn from_socket<S, M, E>(
        socket: S,
        encode: fn(String) -> M,
        classify: fn(M) -> SocketFrame,
    ) -> Transport
    where
        S: Sink<M> + Stream<Item = Result<M, E>> + Send + Unpin + 'static,
        <S as Sink<M>>::Error: Display + Send,
        M: Send + 'static,
        E: Display + Send + 'static,
    {
        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(encode(text)).await {
                    debug!("socket write failed: {e}");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let event = match frame {
                    Ok(m) => match classify(m) {
                        SocketFrame::Text(t) => TransportEvent::Message(t),
                        SocketFrame::Close => break,
                        SocketFrame::Ignored => continue,
                    },
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                };
                if in_tx.send(event).is_err() {
                    return;
                }
            }
            let _ = in_tx.send(TransportEvent::Closed);
        });

        Transport::new(out_tx, in_rx)
    }
}

async fn forward(
    mut from: mpsc::UnboundedReceiver<String>,
    to: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(text) = from.recv().await {
        if to.send(TransportEvent::Message(text)).is_err() {
            return;
        }
    }
    let _ = to.send(TransportEvent::Closed);
}

/// Open a WebSocket client connection to `url`.
pub async fn connect_websocket(url: &str) -> Result<Transport, WireError> {
    use tokio_tungstenite::tungstenite::Message;

    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| WireError::Transport(format!("connect to {url} failed: {e}")))?;

    Ok(Transport::from_socket(ws, Message::Text, |m| match m {
        Message::Text(t) => SocketFrame::Text(t),
        Message::Close(_) => SocketFrame::Close,
        _ => SocketFrame::Ignored,
    }))
}

//! In-process transport backed by channels.
//!
//! Used by tests and benchmarks to drive a connection without sockets. The
//! [`MemoryPeer`] plays the client: it sees every frame the service writes
//! and can inject frames (or transport errors) into the inbound side.

use tokio::sync::mpsc;

use super::transport::{Frame, FrameSink, FrameStream, Transport, TransportError};
use crate::protocol::{self, Message};

/// Server half of an in-memory connection.
pub struct MemoryTransport {
    sink: MemorySink,
    stream: MemoryStream,
}

pub struct MemorySink {
    tx: mpsc::Sender<Frame>,
}

pub struct MemoryStream {
    rx: mpsc::Receiver<Result<Frame, TransportError>>,
}

/// Client half of an in-memory connection.
pub struct MemoryPeer {
    frames: mpsc::Receiver<Frame>,
    input: mpsc::Sender<Result<Frame, TransportError>>,
}

/// Create a connected transport/peer pair with `capacity` frames of buffer
/// in each direction.
pub fn memory_transport(capacity: usize) -> (MemoryTransport, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (in_tx, in_rx) = mpsc::channel(capacity);
    (
        MemoryTransport {
            sink: MemorySink { tx: out_tx },
            stream: MemoryStream { rx: in_rx },
        },
        MemoryPeer {
            frames: out_rx,
            input: in_tx,
        },
    )
}

impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Stream = MemoryStream;

    fn split(self) -> (MemorySink, MemoryStream) {
        (self.sink, self.stream)
    }
}

impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Io("peer dropped".into()))
    }
}

impl FrameStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await
    }
}

impl MemoryPeer {
    /// Send a protocol message as a text frame. Returns `false` if the
    /// service side is gone.
    pub async fn send_message(&self, message: &Message) -> bool {
        match protocol::encode(message) {
            Ok(text) => self.send_frame(Ok(Frame::Text(text))).await,
            Err(_) => false,
        }
    }

    /// Inject a raw frame or transport error.
    pub async fn send_frame(&self, frame: Result<Frame, TransportError>) -> bool {
        self.input.send(frame).await.is_ok()
    }

    /// Next frame written by the service, including pings and close.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Next protocol message, answering pings along the way.
    ///
    /// Returns `None` once the service sends Close or drops the connection.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            match self.frames.recv().await? {
                Frame::Text(text) => return protocol::decode(&text).ok(),
                Frame::Ping(payload) => {
                    let _ = self.input.send(Ok(Frame::Pong(payload))).await;
                }
                Frame::Close => return None,
                Frame::Pong(_) | Frame::Binary(_) => {}
            }
        }
    }

    /// Every remaining message until the service closes the connection.
    pub async fn collect_messages(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message().await {
            messages.push(message);
        }
        messages
    }
}

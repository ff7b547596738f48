//! Frame-level transport abstraction.
//!
//! The pumps only need to push frames out and pull frames in; any duplex
//! channel that can be split into a [`FrameSink`] and a [`FrameStream`]
//! can carry a job.

use std::future::Future;

use thiserror::Error;

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Transport failures surfaced by the pumps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer closed with a code other than normal closure or going away.
    #[error("connection closed abnormally (code {code})")]
    Abnormal { code: u16 },

    /// A write did not complete within the write timeout.
    #[error("write timed out")]
    WriteTimeout,

    #[error("transport I/O: {0}")]
    Io(String),
}

/// Outgoing half of a transport.
pub trait FrameSink: Send + 'static {
    fn send(&mut self, frame: Frame) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Incoming half of a transport. `None` means the peer went away cleanly.
pub trait FrameStream: Send + 'static {
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<Frame, TransportError>>> + Send;
}

/// A duplex transport that can be split into its two halves.
pub trait Transport: Send + 'static {
    type Sink: FrameSink;
    type Stream: FrameStream;

    fn split(self) -> (Self::Sink, Self::Stream);
}

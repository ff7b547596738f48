//! Inbound pump: reads client frames and enforces the read deadline.

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::transport::{Frame, FrameStream, TransportError};
use crate::protocol::{self, Message};

const LOG_TARGET: &str = "buildfarm::connection::inbound";

/// Buffer for decoded client messages. Overflow is dropped, never blocks.
pub(crate) const INBOUND_QUEUE_CAPACITY: usize = 256;

/// How the inbound pump ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundExit {
    /// The peer closed normally or went away.
    Disconnected,
    /// The connection token was cancelled.
    Cancelled,
    /// No pong arrived within the read deadline.
    DeadlineExpired,
    /// The transport reported an abnormal close or I/O failure.
    ReadFailed(TransportError),
    /// A text frame could not be decoded.
    Undecodable(String),
    /// The task panicked or was aborted.
    Aborted,
}

impl InboundExit {
    /// Failure worth persisting, if any. Normal closure and cancellation are
    /// not failures.
    pub fn failure(&self) -> Option<String> {
        match self {
            InboundExit::DeadlineExpired => Some("read deadline expired".to_string()),
            InboundExit::ReadFailed(e) => Some(e.to_string()),
            InboundExit::Undecodable(e) => Some(format!("undecodable message: {e}")),
            InboundExit::Disconnected | InboundExit::Cancelled | InboundExit::Aborted => None,
        }
    }
}

pub(crate) async fn inbound_loop<S: FrameStream>(
    mut stream: S,
    tx: mpsc::Sender<Message>,
    token: CancellationToken,
    pong_timeout: Duration,
) -> InboundExit {
    let mut deadline = Instant::now() + pong_timeout;

    let exit = loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(target: LOG_TARGET, "Inbound pump cancelled");
                return InboundExit::Cancelled;
            }

            _ = tokio::time::sleep_until(deadline) => {
                warn!(target: LOG_TARGET, "No pong within {:?}, dropping connection", pong_timeout);
                break InboundExit::DeadlineExpired;
            }

            frame = stream.next_frame() => match frame {
                None | Some(Ok(Frame::Close)) => {
                    debug!(target: LOG_TARGET, "Peer closed connection");
                    break InboundExit::Disconnected;
                }
                Some(Ok(Frame::Pong(_))) => {
                    deadline = Instant::now() + pong_timeout;
                }
                Some(Ok(Frame::Text(text))) => match protocol::decode(&text) {
                    Ok(message) => deliver(&tx, message),
                    Err(e) => {
                        warn!(target: LOG_TARGET, "Undecodable message: {}", e);
                        break InboundExit::Undecodable(e.to_string());
                    }
                },
                Some(Ok(Frame::Ping(_) | Frame::Binary(_))) => {}
                Some(Err(e)) => {
                    warn!(target: LOG_TARGET, "Read failed: {}", e);
                    break InboundExit::ReadFailed(e);
                }
            },
        }
    };

    token.cancel();
    exit
}

fn deliver(tx: &mpsc::Sender<Message>, message: Message) {
    match tx.try_send(message) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(message)) => {
            debug!(
                target: LOG_TARGET,
                "Inbound buffer full, dropping {} message",
                message.kind()
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

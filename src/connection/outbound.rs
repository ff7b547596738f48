//! Outbound pump: the single writer for a connection.
//!
//! Consumes the outbound message queue and the keepalive ticker and is the
//! only task that ever writes to the transport sink. Every write is bounded
//! by the write timeout; any failure cancels the connection.

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::transport::{Frame, FrameSink, TransportError};
use crate::protocol::{self, Message};

const LOG_TARGET: &str = "buildfarm::connection::outbound";

/// Queue capacity for outbound messages per connection.
///
/// Bounds memory use and provides backpressure to producers.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// How the outbound pump ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundExit {
    /// Every sender dropped; queue drained and a close frame written.
    Drained,
    /// The connection token was cancelled.
    Cancelled,
    /// A write failed or timed out.
    WriteFailed(TransportError),
    /// The task panicked or was aborted.
    Aborted,
}

pub(crate) async fn outbound_loop<S: FrameSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<Message>,
    token: CancellationToken,
    ping_period: Duration,
    write_timeout: Duration,
) -> OutboundExit {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(target: LOG_TARGET, "Outbound pump cancelled");
                return OutboundExit::Cancelled;
            }

            next = rx.recv() => {
                let Some(message) = next else {
                    debug!(target: LOG_TARGET, "Outbound queue closed, sending close frame");
                    // Best effort: the peer may already be gone.
                    let _ = write_frame(&mut sink, Frame::Close, write_timeout).await;
                    return OutboundExit::Drained;
                };
                let text = match protocol::encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            target: LOG_TARGET,
                            "Failed to encode {} message: {}",
                            message.kind(),
                            e
                        );
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut sink, Frame::Text(text), write_timeout).await {
                    warn!(target: LOG_TARGET, "Write failed: {}", e);
                    token.cancel();
                    return OutboundExit::WriteFailed(e);
                }
            }

            _ = ticker.tick() => {
                if let Err(e) = write_frame(&mut sink, Frame::Ping(Vec::new()), write_timeout).await {
                    warn!(target: LOG_TARGET, "Ping failed: {}", e);
                    token.cancel();
                    return OutboundExit::WriteFailed(e);
                }
            }
        }
    }
}

async fn write_frame<S: FrameSink>(
    sink: &mut S,
    frame: Frame,
    write_timeout: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(write_timeout, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::WriteTimeout),
    }
}

//! Per-connection coordination.
//!
//! A connection runs three tasks next to the job itself:
//!
//! - the outbound pump, the only writer to the transport (messages plus
//!   keepalive pings)
//! - the inbound pump, which decodes client frames and enforces the pong
//!   read deadline
//! - the lifecycle watcher, which enforces the hard connection timeout and
//!   relays server shutdown
//!
//! They share one [`CancellationToken`]. Whichever task fails first cancels
//! it, and everything else observes the cancellation at its next suspension
//! point. The job gets a child token so that server shutdown can stop the
//! job while the connection stays up long enough to report it.

pub mod memory;
mod inbound;
mod lifecycle;
mod outbound;
mod sender;
pub mod transport;

pub use inbound::InboundExit;
pub use lifecycle::LifecycleExit;
pub use outbound::OutboundExit;
pub use sender::{MessageSender, SendError};
pub use transport::{Frame, FrameSink, FrameStream, Transport, TransportError};

use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::protocol::Message;

const LOG_TARGET: &str = "buildfarm::connection";

/// Keepalive and timeout settings for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Interval between pings.
    pub ping_period: Duration,
    /// Read deadline, refreshed by every pong. Must exceed `ping_period`.
    pub pong_timeout: Duration,
    /// Bound on a single frame write.
    pub write_timeout: Duration,
    /// Hard upper bound on the whole connection.
    pub connection_timeout: Duration,
    /// How long teardown waits for queued messages to flush.
    pub drain_delay: Duration,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(300),
            drain_delay: Duration::from_millis(200),
            outbound_capacity: outbound::OUTBOUND_QUEUE_CAPACITY,
            inbound_capacity: inbound::INBOUND_QUEUE_CAPACITY,
        }
    }
}

/// What the job side of a connection gets to work with.
pub struct JobIo {
    /// Outbound message handle.
    pub sender: MessageSender,
    /// Decoded client messages.
    pub inbound: mpsc::Receiver<Message>,
    /// Cancelled on connection failure, hard timeout, or server shutdown.
    pub token: CancellationToken,
}

/// Running connection tasks.
pub struct Connection {
    id: Ulid,
    token: CancellationToken,
    drain_delay: Duration,
    outbound: JoinHandle<OutboundExit>,
    inbound: JoinHandle<InboundExit>,
    lifecycle: JoinHandle<LifecycleExit>,
}

/// How each connection task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub outbound: OutboundExit,
    pub inbound: InboundExit,
    pub lifecycle: LifecycleExit,
}

impl ConnectionReport {
    /// Transport-level failure to persist, if any.
    ///
    /// The hard timeout wins over whatever the inbound pump saw, since it
    /// is what cancelled the pump.
    pub fn failure(&self) -> Option<String> {
        match self.lifecycle {
            LifecycleExit::TimedOut => Some("connection timed out".to_string()),
            LifecycleExit::Finished | LifecycleExit::Aborted => self.inbound.failure(),
        }
    }
}

/// Split `transport` and start the connection tasks.
pub fn open<T: Transport>(
    transport: T,
    settings: &ConnectionSettings,
    shutdown: &CancellationToken,
) -> (Connection, JobIo) {
    let id = Ulid::new();
    let token = CancellationToken::new();
    let job_token = token.child_token();
    let (out_tx, out_rx) = mpsc::channel(settings.outbound_capacity);
    let (in_tx, in_rx) = mpsc::channel(settings.inbound_capacity);
    let (sink, stream) = transport.split();

    let outbound = tokio::spawn(outbound::outbound_loop(
        sink,
        out_rx,
        token.clone(),
        settings.ping_period,
        settings.write_timeout,
    ));
    let inbound = tokio::spawn(inbound::inbound_loop(
        stream,
        in_tx,
        token.clone(),
        settings.pong_timeout,
    ));
    let lifecycle = tokio::spawn(lifecycle::lifecycle_loop(
        token.clone(),
        job_token.clone(),
        shutdown.clone(),
        settings.connection_timeout,
    ));
    debug!(target: LOG_TARGET, "Connection {} opened", id);

    (
        Connection {
            id,
            token: token.clone(),
            drain_delay: settings.drain_delay,
            outbound,
            inbound,
            lifecycle,
        },
        JobIo {
            sender: MessageSender::new(out_tx, token),
            inbound: in_rx,
            token: job_token,
        },
    )
}

impl Connection {
    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Tear the connection down.
    ///
    /// Call once every [`MessageSender`] clone has been dropped. Queued
    /// messages get up to the drain delay to flush before the token is
    /// cancelled and the remaining tasks are joined.
    pub async fn close(mut self) -> ConnectionReport {
        let outbound = match tokio::time::timeout(self.drain_delay, &mut self.outbound).await {
            Ok(joined) => joined.unwrap_or(OutboundExit::Aborted),
            Err(_) => {
                debug!(
                    target: LOG_TARGET,
                    "Connection {} did not drain within {:?}",
                    self.id,
                    self.drain_delay
                );
                self.token.cancel();
                (&mut self.outbound).await.unwrap_or(OutboundExit::Aborted)
            }
        };
        self.token.cancel();
        let inbound = (&mut self.inbound).await.unwrap_or(InboundExit::Aborted);
        let lifecycle = (&mut self.lifecycle)
            .await
            .unwrap_or(LifecycleExit::Aborted);
        debug!(
            target: LOG_TARGET,
            "Connection {} closed (outbound {:?}, inbound {:?})",
            self.id,
            outbound,
            inbound
        );

        ConnectionReport {
            outbound,
            inbound,
            lifecycle,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::memory_transport;

    fn quick_settings() -> ConnectionSettings {
        ConnectionSettings {
            ping_period: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(300),
            drain_delay: Duration::from_millis(200),
            ..ConnectionSettings::default()
        }
    }

    /// Messages enqueued before close reach the peer, then the close frame.
    #[tokio::test]
    async fn close_flushes_queued_messages() {
        let (transport, mut peer) = memory_transport(16);
        let (connection, io) = open(transport, &quick_settings(), &CancellationToken::new());

        io.sender.send(Message::queue_done()).await.unwrap();
        io.sender.send(Message::error("p", "boom")).await.unwrap();
        drop(io);

        let report = connection.close().await;
        assert_eq!(report.outbound, OutboundExit::Drained);
        assert_eq!(report.inbound, InboundExit::Cancelled);
        assert!(report.failure().is_none());

        assert_eq!(peer.collect_messages().await, vec![
            Message::queue_done(),
            Message::error("p", "boom")
        ]);
    }

    /// A lingering sender clone cannot hold teardown hostage.
    #[tokio::test(start_paused = true)]
    async fn close_is_bounded_by_drain_delay() {
        let (transport, _peer) = memory_transport(16);
        let (connection, io) = open(transport, &quick_settings(), &CancellationToken::new());
        let _lingering = io.sender.clone();

        let report = connection.close().await;
        assert_eq!(report.outbound, OutboundExit::Cancelled);
        assert!(io.token.is_cancelled());
    }

    /// The hard timeout cancels everything and is reported as a failure.
    #[tokio::test(start_paused = true)]
    async fn hard_timeout_is_a_failure() {
        let (transport, mut peer) = memory_transport(16);
        let settings = ConnectionSettings {
            connection_timeout: Duration::from_secs(5),
            ..quick_settings()
        };
        let (connection, io) = open(transport, &settings, &CancellationToken::new());

        // Keep answering pings so only the hard timeout can end things.
        let client = tokio::spawn(async move { peer.collect_messages().await });
        io.token.cancelled().await;
        drop(io);

        let report = connection.close().await;
        assert_eq!(report.lifecycle, LifecycleExit::TimedOut);
        assert_eq!(report.inbound, InboundExit::Cancelled);
        assert_eq!(report.failure().as_deref(), Some("connection timed out"));
        client.abort();
    }

    /// Server shutdown reaches the job token but not the connection token.
    #[tokio::test]
    async fn shutdown_reaches_job_token() {
        let (transport, _peer) = memory_transport(16);
        let shutdown = CancellationToken::new();
        let (connection, io) = open(transport, &quick_settings(), &shutdown);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), io.token.cancelled())
            .await
            .expect("job token should be cancelled");
        assert!(
            io.sender.send(Message::error("p", "server shut down")).await.is_ok(),
            "connection is still writable after shutdown"
        );
        drop(io);
        connection.close().await;
    }
}

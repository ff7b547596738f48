//! Handle for enqueueing outbound protocol messages.

use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::protocol::Message;

const LOG_TARGET: &str = "buildfarm::connection::sender";

/// Why a message was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("connection cancelled")]
    Cancelled,
    #[error("outbound buffer full")]
    Full,
    #[error("terminal message already sent")]
    Finished,
}

impl From<SendError> for JobError {
    fn from(_: SendError) -> Self {
        JobError::Cancelled
    }
}

/// Cloneable handle onto a connection's outbound queue.
///
/// Sends fail fast once the connection token is cancelled, so a producer can
/// never block on a dead connection. After a terminal message has been
/// accepted every further send is refused; the terminal message is always
/// the last one a client sees.
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Message>,
    token: CancellationToken,
    /// Set once a terminal message is enqueued. Held while enqueueing so
    /// no message can slip in behind the terminal one.
    finished: Arc<Mutex<bool>>,
}

impl MessageSender {
    pub fn new(tx: mpsc::Sender<Message>, token: CancellationToken) -> Self {
        Self {
            tx,
            token,
            finished: Arc::new(Mutex::new(false)),
        }
    }

    /// Enqueue a message, waiting for buffer space unless the connection is
    /// cancelled first.
    pub async fn send(&self, message: Message) -> Result<(), SendError> {
        self.check_open(&message)?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SendError::Cancelled),
            permit = self.tx.reserve() => match permit {
                Ok(permit) => self.enqueue(permit, message),
                Err(_) => Err(SendError::Cancelled),
            },
        }
    }

    /// Enqueue without waiting. A full buffer drops the message.
    pub fn try_send(&self, message: Message) -> Result<(), SendError> {
        self.check_open(&message)?;
        let permit = self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => SendError::Full,
            mpsc::error::TrySendError::Closed(()) => SendError::Cancelled,
        })?;
        self.enqueue(permit, message)
    }

    /// Whether a terminal message has already been enqueued.
    pub fn is_finished(&self) -> bool {
        *self.lock_finished()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn check_open(&self, message: &Message) -> Result<(), SendError> {
        if self.token.is_cancelled() {
            return Err(SendError::Cancelled);
        }
        if self.is_finished() {
            debug!(
                target: LOG_TARGET,
                "Dropping {} after terminal message",
                message.kind()
            );
            return Err(SendError::Finished);
        }
        Ok(())
    }

    fn lock_finished(&self) -> MutexGuard<'_, bool> {
        self.finished.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check the terminal latch and enqueue under one lock.
    fn enqueue(&self, permit: mpsc::Permit<'_, Message>, message: Message) -> Result<(), SendError> {
        let mut finished = self.lock_finished();
        if *finished {
            return Err(SendError::Finished);
        }
        if message.is_terminal() {
            *finished = true;
        }
        permit.send(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(capacity: usize) -> (MessageSender, mpsc::Receiver<Message>, CancellationToken) {
        let (tx, rx) = mpsc::channel(capacity);
        let token = CancellationToken::new();
        (MessageSender::new(tx, token.clone()), rx, token)
    }

    #[tokio::test]
    async fn send_after_cancel_fails_fast() {
        let (sender, _rx, token) = sender(1);
        token.cancel();
        assert_eq!(
            sender.send(Message::queue_done()).await,
            Err(SendError::Cancelled)
        );
    }

    /// A producer blocked on a full buffer is released by cancellation.
    #[tokio::test]
    async fn blocked_send_is_released_by_cancel() {
        let (sender, _rx, token) = sender(1);
        sender.send(Message::queue_done()).await.unwrap();

        let blocked = tokio::spawn({
            let sender = sender.clone();
            async move { sender.send(Message::download_starting()).await }
        });
        tokio::task::yield_now().await;
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), blocked)
            .await
            .expect("send should not hang")
            .unwrap();
        assert_eq!(result, Err(SendError::Cancelled));
    }

    #[tokio::test]
    async fn try_send_reports_full_buffer() {
        let (sender, _rx, _token) = sender(1);
        sender.try_send(Message::queue_position(2)).unwrap();
        assert_eq!(
            sender.try_send(Message::queue_position(1)),
            Err(SendError::Full)
        );
    }

    /// Nothing is enqueued after the first terminal message.
    #[tokio::test]
    async fn terminal_message_is_last() {
        let (sender, mut rx, _token) = sender(8);
        sender.send(Message::store_done()).await.unwrap();
        sender.send(Message::error("p", "first")).await.unwrap();

        assert_eq!(
            sender.send(Message::error("p", "second")).await,
            Err(SendError::Finished)
        );
        assert_eq!(
            sender.try_send(Message::store_done()),
            Err(SendError::Finished)
        );
        assert!(sender.is_finished());

        assert_eq!(rx.recv().await, Some(Message::store_done()));
        assert_eq!(rx.recv().await, Some(Message::error("p", "first")));
        assert!(rx.try_recv().is_err());
    }

    /// Progress from other tasks never lands behind the terminal message.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_progress_never_follows_terminal() {
        for _ in 0..50 {
            let (sender, mut rx, _token) = sender(1024);
            let producers: Vec<_> = (0..4)
                .map(|_| {
                    let sender = sender.clone();
                    tokio::spawn(async move {
                        for i in 0..64 {
                            let _ = sender.try_send(Message::store_progress(i, 0, 0));
                            tokio::task::yield_now().await;
                        }
                    })
                })
                .collect();
            tokio::task::yield_now().await;
            sender.send(Message::error("p", "stop")).await.unwrap();

            for producer in producers {
                producer.await.unwrap();
            }
            drop(sender);

            let mut received = Vec::new();
            while let Some(message) = rx.recv().await {
                received.push(message);
            }
            let terminal = received
                .iter()
                .position(Message::is_terminal)
                .expect("terminal message enqueued");
            assert_eq!(
                terminal,
                received.len() - 1,
                "messages after the terminal one: {:?}",
                &received[terminal..]
            );
        }
    }
}

//! Admission handles returned by the queue.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{QueueState, lock_state};

/// The wait for capacity ended without the slot starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("admission wait abandoned")]
pub struct Abandoned;

/// An admitted request that may still be waiting for capacity.
///
/// Dropping it before [`Slot::start`] resolves removes it from the backlog.
pub struct Slot {
    start: oneshot::Receiver<()>,
    end: SlotEnd,
}

impl Slot {
    pub(super) fn new(start: oneshot::Receiver<()>, end: SlotEnd) -> Self {
        Self { start, end }
    }

    /// Wait until capacity is granted or `token` is cancelled.
    ///
    /// On success the returned [`SlotEnd`] holds the capacity until dropped.
    pub async fn start(self, token: &CancellationToken) -> Result<SlotEnd, Abandoned> {
        let Slot { start, end } = self;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Abandoned),
            granted = start => match granted {
                Ok(()) => Ok(end),
                Err(_) => Err(Abandoned),
            },
        }
    }
}

/// Holds one unit of capacity (or a backlog entry) until dropped.
///
/// Drop runs exactly once, so the capacity is returned exactly once whether
/// the job completed, failed, panicked, or was cancelled.
pub struct SlotEnd {
    ticket: u64,
    state: Arc<Mutex<QueueState>>,
    max_concurrent: usize,
}

impl SlotEnd {
    pub(super) fn new(ticket: u64, state: Arc<Mutex<QueueState>>, max_concurrent: usize) -> Self {
        Self {
            ticket,
            state,
            max_concurrent,
        }
    }
}

impl Drop for SlotEnd {
    fn drop(&mut self) {
        lock_state(&self.state).release(self.ticket, self.max_concurrent);
    }
}

//! Bounded-concurrency, bounded-backlog admission queue.
//!
//! At most `max_concurrent` jobs run at once; at most `max_queue` more wait
//! in FIFO order. A request arriving when both are full is rejected with
//! [`QueueFull`] without entering the backlog.
//!
//! # Lifecycle of a slot
//!
//! 1. [`AdmissionQueue::slot`] admits the request and returns a [`Slot`]
//! 2. While waiting, the position callback fires each time the 1-based
//!    backlog position changes (never with an unchanged value)
//! 3. [`Slot::start`] resolves once capacity is granted and yields a
//!    [`SlotEnd`] guard
//! 4. Dropping the [`SlotEnd`] returns the capacity and promotes the next
//!    waiter. Dropping a [`Slot`] that never started removes it from the
//!    backlog instead.

mod slot;

pub use slot::{Abandoned, Slot, SlotEnd};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use thiserror::Error;
use tokio::sync::oneshot;

const LOG_TARGET: &str = "buildfarm::queue";

/// Callback fired with the new 1-based backlog position.
pub type PositionCallback = Box<dyn FnMut(usize) + Send>;

/// Admission rejected: all slots busy and the backlog full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("too many items queued ({active} running, {waiting} waiting)")]
pub struct QueueFull {
    pub active: usize,
    pub waiting: usize,
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub active: usize,
    pub waiting: usize,
    pub max_concurrent: usize,
    pub max_queue: usize,
}

/// Shared admission controller. Cloning yields a handle to the same queue.
#[derive(Clone)]
pub struct AdmissionQueue {
    state: Arc<Mutex<QueueState>>,
    max_concurrent: usize,
    max_queue: usize,
}

struct Waiter {
    ticket: u64,
    start: oneshot::Sender<()>,
    on_position: PositionCallback,
    last_position: usize,
}

pub(crate) struct QueueState {
    active: usize,
    waiting: VecDeque<Waiter>,
    next_ticket: u64,
}

impl QueueState {
    /// Grant capacity to waiters in FIFO order until the budget is used up.
    fn promote(&mut self, max_concurrent: usize) {
        while self.active < max_concurrent {
            let Some(waiter) = self.waiting.pop_front() else {
                break;
            };
            self.active += 1;
            debug!(
                target: LOG_TARGET,
                "Slot {} started ({} running, {} waiting)",
                waiter.ticket,
                self.active,
                self.waiting.len()
            );
            // A closed receiver means the slot is being dropped right now;
            // its SlotEnd will hand the capacity back.
            let _ = waiter.start.send(());
        }
    }

    /// Fire the callback of every waiter whose position changed.
    fn notify_positions(&mut self) {
        for (index, waiter) in self.waiting.iter_mut().enumerate() {
            let position = index + 1;
            if waiter.last_position != position {
                waiter.last_position = position;
                (waiter.on_position)(position);
            }
        }
    }

    /// Release the slot identified by `ticket`, whichever state it is in.
    pub(crate) fn release(&mut self, ticket: u64, max_concurrent: usize) {
        if let Some(index) = self.waiting.iter().position(|w| w.ticket == ticket) {
            self.waiting.remove(index);
            debug!(
                target: LOG_TARGET,
                "Slot {} abandoned before start ({} waiting)",
                ticket,
                self.waiting.len()
            );
        } else {
            self.active = self.active.saturating_sub(1);
            debug!(
                target: LOG_TARGET,
                "Slot {} finished ({} running)", ticket, self.active
            );
        }
        self.promote(max_concurrent);
        self.notify_positions();
    }
}

pub(crate) fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    // Callbacks only enqueue messages, so a poisoned lock still holds
    // consistent counters.
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl AdmissionQueue {
    pub fn new(max_concurrent: usize, max_queue: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                active: 0,
                waiting: VecDeque::new(),
                next_ticket: 0,
            })),
            max_concurrent,
            max_queue,
        }
    }

    /// Request admission.
    ///
    /// Fails with [`QueueFull`] only when every slot is busy *and* the
    /// backlog holds `max_queue` waiters. Otherwise the request joins the
    /// backlog; if capacity is free it starts immediately and the callback
    /// never fires.
    pub fn slot<F>(&self, on_position: F) -> Result<Slot, QueueFull>
    where
        F: FnMut(usize) + Send + 'static,
    {
        let mut state = lock_state(&self.state);
        if state.active >= self.max_concurrent && state.waiting.len() >= self.max_queue {
            debug!(
                target: LOG_TARGET,
                "Rejecting admission ({} running, {} waiting)",
                state.active,
                state.waiting.len()
            );
            return Err(QueueFull {
                active: state.active,
                waiting: state.waiting.len(),
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let (start_tx, start_rx) = oneshot::channel();
        state.waiting.push_back(Waiter {
            ticket,
            start: start_tx,
            on_position: Box::new(on_position),
            last_position: 0,
        });
        state.promote(self.max_concurrent);
        state.notify_positions();
        drop(state);

        Ok(Slot::new(
            start_rx,
            SlotEnd::new(ticket, Arc::clone(&self.state), self.max_concurrent),
        ))
    }

    pub fn stats(&self) -> QueueStats {
        let state = lock_state(&self.state);
        QueueStats {
            active: state.active,
            waiting: state.waiting.len(),
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio_util::sync::CancellationToken;

    fn recorder() -> (Arc<StdMutex<Vec<usize>>>, impl FnMut(usize) + Send + 'static) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |p| sink.lock().unwrap().push(p))
    }

    /// With free capacity the slot starts at once and no position is reported.
    #[tokio::test]
    async fn free_capacity_starts_immediately_without_positions() {
        let queue = AdmissionQueue::new(2, 2);
        let (positions, callback) = recorder();

        let slot = queue.slot(callback).expect("admitted");
        let _end = slot
            .start(&CancellationToken::new())
            .await
            .expect("should start");

        assert!(positions.lock().unwrap().is_empty());
        assert_eq!(queue.stats().active, 1);
        assert_eq!(queue.stats().waiting, 0);
    }

    /// Full concurrency plus full backlog rejects; full concurrency alone queues.
    #[tokio::test]
    async fn rejects_only_when_running_and_waiting_are_full() {
        let queue = AdmissionQueue::new(1, 1);
        let token = CancellationToken::new();

        let _a = queue.slot(|_| {}).unwrap().start(&token).await.unwrap();
        let (b_positions, b_cb) = recorder();
        let _b = queue.slot(b_cb).expect("backlog has room");
        assert_eq!(*b_positions.lock().unwrap(), vec![1]);

        let rejected = queue.slot(|_| {});
        assert_eq!(
            rejected.err(),
            Some(QueueFull {
                active: 1,
                waiting: 1
            })
        );
    }

    /// Zero backlog means requests either run immediately or are rejected.
    #[test]
    fn zero_backlog_never_queues() {
        let queue = AdmissionQueue::new(1, 0);
        let first = queue.slot(|_| {}).expect("capacity free");
        assert!(queue.slot(|_| {}).is_err(), "second request must be rejected");
        drop(first);
        assert!(queue.slot(|_| {}).is_ok(), "capacity returned on drop");
    }

    /// Positions move forward as earlier waiters leave, and only on change.
    #[tokio::test]
    async fn positions_update_when_earlier_waiter_leaves() {
        let queue = AdmissionQueue::new(1, 3);
        let token = CancellationToken::new();

        let running = queue.slot(|_| {}).unwrap().start(&token).await.unwrap();
        let (first_positions, first_cb) = recorder();
        let first = queue.slot(first_cb).unwrap();
        let (second_positions, second_cb) = recorder();
        let _second = queue.slot(second_cb).unwrap();

        assert_eq!(*first_positions.lock().unwrap(), vec![1]);
        assert_eq!(*second_positions.lock().unwrap(), vec![2]);

        // First waiter gives up; second moves to the front.
        drop(first);
        assert_eq!(*second_positions.lock().unwrap(), vec![2, 1]);
        assert_eq!(queue.stats().waiting, 1);

        // Releasing the running slot promotes the second waiter.
        drop(running);
        let stats = queue.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.waiting, 0);
        assert_eq!(*second_positions.lock().unwrap(), vec![2, 1]);
    }

    /// Waiters start strictly in arrival order.
    #[tokio::test]
    async fn waiters_start_in_fifo_order() {
        let queue = AdmissionQueue::new(1, 3);
        let token = CancellationToken::new();

        let running = queue.slot(|_| {}).unwrap().start(&token).await.unwrap();
        let a = queue.slot(|_| {}).unwrap();
        let b = queue.slot(|_| {}).unwrap();

        drop(running);
        let a_end = tokio::time::timeout(std::time::Duration::from_secs(1), a.start(&token))
            .await
            .expect("first waiter should be promoted")
            .unwrap();
        assert_eq!(queue.stats().waiting, 1, "second waiter still queued");

        drop(a_end);
        let _b_end = tokio::time::timeout(std::time::Duration::from_secs(1), b.start(&token))
            .await
            .expect("second waiter should be promoted")
            .unwrap();
    }

    /// Cancelling while waiting removes the waiter and never consumes capacity.
    #[tokio::test]
    async fn cancelled_wait_leaves_backlog() {
        let queue = AdmissionQueue::new(1, 2);
        let running_token = CancellationToken::new();
        let _running = queue
            .slot(|_| {})
            .unwrap()
            .start(&running_token)
            .await
            .unwrap();

        let waiter_token = CancellationToken::new();
        let waiter = queue.slot(|_| {}).unwrap();
        waiter_token.cancel();

        assert!(waiter.start(&waiter_token).await.is_err());
        let stats = queue.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.waiting, 0);
    }

    /// Active count never exceeds max_concurrent under churn.
    #[tokio::test]
    async fn active_never_exceeds_budget() {
        let queue = AdmissionQueue::new(3, 50);
        let token = CancellationToken::new();
        let mut handles = Vec::new();

        for _ in 0..40 {
            let queue = queue.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let slot = queue.slot(|_| {}).expect("backlog is large enough");
                let end = slot.start(&token).await.expect("should start");
                assert!(queue.stats().active <= 3, "budget exceeded");
                tokio::task::yield_now().await;
                drop(end);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = queue.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.waiting, 0);
    }
}

//! Latest-value-replaying multicast of result states.

use crate::state::ResultState;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Default per-subscriber mailbox capacity.
const DEFAULT_BUFFER: usize = 64;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle held by one observer of a hub.
///
/// Created by [`StateHub::subscribe`]; receives the hub's latest state on
/// creation, then every subsequent publish. Dropping the handle stops
/// deliveries; the hub prunes the dead mailbox on its next publish.
pub struct StateSubscription<T> {
    pub id: SubscriptionId,
    receiver: Receiver<ResultState<T>>,
}

impl<T> StateSubscription<T> {
    /// Receive the next state (blocking).
    pub fn recv(&self) -> Result<ResultState<T>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a state (non-blocking).
    pub fn try_recv(&self) -> Result<ResultState<T>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<ResultState<T>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

struct HubInner<T> {
    /// Last published state, replayed to new subscribers.
    latest: Option<ResultState<T>>,
    /// Mailboxes in subscription order.
    subscribers: Vec<(SubscriptionId, Sender<ResultState<T>>)>,
}

/// Multicasts result states to every active observer.
///
/// `publish` stores the state in the latest slot, then fans it out to each
/// live subscriber in the order subscriptions were created. Delivery is
/// `try_send` into a bounded mailbox, so one slow subscriber never blocks
/// or delays another; a subscriber whose mailbox overflows (or whose
/// handle was dropped) is removed. A new subscription immediately receives
/// the latest state, so a late joiner never observes a blank screen while
/// an earlier fetch is completing.
pub struct StateHub<T> {
    inner: Mutex<HubInner<T>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl<T: Clone> StateHub<T> {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// Hub with a custom per-subscriber mailbox capacity.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                latest: None,
                subscribers: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Create a subscription. Replays the latest state, if any, as the
    /// subscription's first delivery.
    pub fn subscribe(&self) -> StateSubscription<T> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer);

        // Registration and replay are serialized with publish, so a new
        // subscriber sees each state exactly once.
        let mut inner = self.inner.lock();
        if let Some(state) = &inner.latest {
            // Fresh mailbox with capacity >= 1: cannot fail.
            let _ = sender.try_send(state.clone());
        }
        inner.subscribers.push((id, sender));

        StateSubscription { id, receiver }
    }

    /// Stop deliveries to a handle. Idempotent; the hub keeps no memory of
    /// unsubscribed handles.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().subscribers.retain(|(sid, _)| *sid != id);
    }

    /// Publish a state to every live subscriber, in subscription order.
    pub fn publish(&self, state: ResultState<T>) {
        let mut inner = self.inner.lock();
        inner.latest = Some(state.clone());
        inner.subscribers.retain(|(id, sender)| {
            match sender.try_send(state.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(subscription = id.0, "dropping slow subscriber");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    /// The last published state, if any.
    pub fn latest(&self) -> Option<ResultState<T>> {
        self.inner.lock().latest.clone()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<T: Clone> Default for StateHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Repository orchestration: adapter calls in, result-state streams out.

use crate::cancel::CancelToken;
use crate::error::{ErrorKind, Result};
use crate::hub::{StateHub, StateSubscription, SubscriptionId};
use crate::source::{ChangeListener, DataSource};
use crate::state::ResultState;
use crate::types::{Record, RecordKey};
use crossbeam_channel::{bounded, Receiver, Select, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Identity of one logical query against a repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// The full collection.
    All,
    /// Records whose index text contains the needle.
    Search(String),
    /// A single record by key.
    One(RecordKey),
    /// The collection size.
    Count,
}

/// Handle to one mutation's eventual outcome.
///
/// The caller never blocks on the mutation itself; the write runs on a
/// worker and resolves the ticket with exactly one terminal state. If the
/// repository is cancelled before the write completes, the ticket resolves
/// `Failed`.
pub struct MutationTicket {
    receiver: Receiver<ResultState<()>>,
}

impl MutationTicket {
    /// Block until the mutation resolves.
    pub fn wait(&self) -> ResultState<()> {
        match self.receiver.recv() {
            Ok(state) => state,
            Err(_) => cancelled_mutation(),
        }
    }

    /// Block with a timeout; `None` if still unresolved.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ResultState<()>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(state) => Some(state),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Some(cancelled_mutation()),
        }
    }

    /// Non-blocking poll; `None` if still unresolved.
    pub fn try_result(&self) -> Option<ResultState<()>> {
        match self.receiver.try_recv() {
            Ok(state) => Some(state),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(cancelled_mutation()),
        }
    }
}

fn cancelled_mutation() -> ResultState<()> {
    ResultState::Failed {
        message: "mutation cancelled".to_string(),
        kind: ErrorKind::Store,
    }
}

/// Per-query state: the multicast hub plus the refresh kick channel.
struct QuerySlot<P: Clone> {
    hub: StateHub<P>,
    kick: Sender<()>,
}

impl<P: Clone + Send + 'static> QuerySlot<P> {
    fn new() -> (Arc<Self>, Receiver<()>) {
        let (kick, kick_rx) = bounded(1);
        (
            Arc::new(Self {
                hub: StateHub::new(),
                kick,
            }),
            kick_rx,
        )
    }

    /// Request a fresh cycle. A kick landing while one is already queued
    /// is dropped; a kick landing mid-flight is drained by the worker
    /// before it publishes the terminal, so at most one physical fetch
    /// serves any burst of refreshes.
    fn request_cycle(&self) {
        let _ = self.kick.try_send(());
    }
}

/// Worker loop for one query slot.
///
/// Each wake-up runs one full cycle: publish `Pending`, run the fetch off
/// the caller's thread, publish exactly one terminal. Wake-ups come from
/// refresh kicks and, for live sources, from the store's change signal;
/// change signals queued mid-flight survive the cycle so the follow-up
/// snapshot reflects the final storage state. Cancellation stops the loop
/// and discards any in-flight outcome unpublished.
fn spawn_worker<P, F>(
    slot: Arc<QuerySlot<P>>,
    kick: Receiver<()>,
    changes: Option<ChangeListener>,
    cancel: CancelToken,
    fetch: F,
    label: String,
) where
    P: Clone + Send + 'static,
    F: Fn(&CancelToken) -> Result<P> + Send + 'static,
{
    thread::spawn(move || {
        let cancel_rx = cancel.signal().clone();
        let change_rx = changes.map(|listener| listener.receiver);

        loop {
            let mut sel = Select::new();
            let kick_idx = sel.recv(&kick);
            let change_idx = change_rx.as_ref().map(|rx| sel.recv(rx));
            let cancel_idx = sel.recv(&cancel_rx);

            let oper = sel.select();
            let index = oper.index();
            let woke = if index == kick_idx {
                oper.recv(&kick).is_ok()
            } else if change_idx == Some(index) {
                match &change_rx {
                    Some(rx) => oper.recv(rx).is_ok(),
                    None => false,
                }
            } else {
                debug_assert_eq!(index, cancel_idx);
                let _ = oper.recv(&cancel_rx);
                false
            };
            if !woke || cancel.is_cancelled() {
                break;
            }

            debug!(query = %label, "cycle start");
            slot.hub.publish(ResultState::Pending);

            let outcome = fetch(&cancel);
            if cancel.is_cancelled() {
                break;
            }

            // Refreshes that arrived mid-flight observe this terminal.
            while kick.try_recv().is_ok() {}

            match outcome {
                Ok(value) => slot.hub.publish(ResultState::Succeeded(value)),
                Err(err) => {
                    warn!(query = %label, error = %err, "cycle failed");
                    slot.hub.publish(ResultState::failure(&err));
                }
            }
        }
        debug!(query = %label, "worker stopped");
    });
}

/// Orchestrates one data source into observable result-state streams.
///
/// Each logical query gets its own slot: a latest-value multicast hub and
/// a single worker thread, so per-query deliveries are strictly ordered
/// and at most one physical fetch is in flight per query. The repository
/// survives failed cycles; a later refresh can succeed. Dropping the
/// repository cancels every worker and in-flight call.
pub struct Repository<T: Record> {
    source: Arc<dyn DataSource<T>>,
    cancel: CancelToken,
    lists: Mutex<HashMap<QueryKey, Arc<QuerySlot<Vec<T>>>>>,
    singles: Mutex<HashMap<RecordKey, Arc<QuerySlot<T>>>>,
    count: Mutex<Option<Arc<QuerySlot<u64>>>>,
}

impl<T: Record> Repository<T> {
    pub fn new(source: Arc<dyn DataSource<T>>) -> Self {
        Self {
            source,
            cancel: CancelToken::new(),
            lists: Mutex::new(HashMap::new()),
            singles: Mutex::new(HashMap::new()),
            count: Mutex::new(None),
        }
    }

    /// Observe the full collection.
    ///
    /// The first observer of a query starts its initial cycle and sees
    /// `Pending` followed by a terminal; later observers start from the
    /// replayed latest state. For live sources every underlying mutation
    /// triggers a fresh cycle, so observers track storage without manual
    /// refresh.
    pub fn observe_all(&self) -> StateSubscription<Vec<T>> {
        let (slot, created) = self.list_slot(QueryKey::All);
        let subscription = slot.hub.subscribe();
        if created {
            slot.request_cycle();
        }
        subscription
    }

    /// Observe the records whose index text contains `needle`.
    pub fn observe_search(&self, needle: impl Into<String>) -> StateSubscription<Vec<T>> {
        let (slot, created) = self.list_slot(QueryKey::Search(needle.into()));
        let subscription = slot.hub.subscribe();
        if created {
            slot.request_cycle();
        }
        subscription
    }

    /// Observe a single record by key. An absent record surfaces as a
    /// `Failed` state with the not-found kind.
    pub fn observe_one(&self, key: RecordKey) -> StateSubscription<T> {
        let (slot, created) = self.single_slot(key);
        let subscription = slot.hub.subscribe();
        if created {
            slot.request_cycle();
        }
        subscription
    }

    /// Observe the collection size.
    pub fn observe_count(&self) -> StateSubscription<u64> {
        let (slot, created) = self.count_slot();
        let subscription = slot.hub.subscribe();
        if created {
            slot.request_cycle();
        }
        subscription
    }

    /// Re-run the cycle for a query on demand. Refreshes landing while a
    /// cycle is in flight are coalesced: one physical fetch, every
    /// requester observes the same terminal state.
    pub fn refresh(&self, query: &QueryKey) {
        match query {
            QueryKey::All | QueryKey::Search(_) => {
                let (slot, _) = self.list_slot(query.clone());
                slot.request_cycle();
            }
            QueryKey::One(key) => {
                let (slot, _) = self.single_slot(key.clone());
                slot.request_cycle();
            }
            QueryKey::Count => {
                let (slot, _) = self.count_slot();
                slot.request_cycle();
            }
        }
    }

    /// Stop deliveries to one subscription of a query. Idempotent; other
    /// subscribers are unaffected.
    pub fn unsubscribe(&self, query: &QueryKey, id: SubscriptionId) {
        match query {
            QueryKey::All | QueryKey::Search(_) => {
                if let Some(slot) = self.lists.lock().get(query) {
                    slot.hub.unsubscribe(id);
                }
            }
            QueryKey::One(key) => {
                if let Some(slot) = self.singles.lock().get(key) {
                    slot.hub.unsubscribe(id);
                }
            }
            QueryKey::Count => {
                if let Some(slot) = self.count.lock().as_ref() {
                    slot.hub.unsubscribe(id);
                }
            }
        }
    }

    /// Insert or replace a record.
    pub fn write(&self, record: T) -> MutationTicket {
        self.mutate(move |source, cancel| source.write(&record, cancel))
    }

    /// Delete a record.
    pub fn delete(&self, record: T) -> MutationTicket {
        self.mutate(move |source, cancel| source.delete(&record, cancel))
    }

    /// Delete every record.
    pub fn clear(&self) -> MutationTicket {
        self.mutate(move |source, cancel| source.clear(cancel))
    }

    /// Cancel all workers and in-flight calls. In-flight outcomes are
    /// discarded; no further deliveries occur on any subscription.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn mutate<F>(&self, operation: F) -> MutationTicket
    where
        F: FnOnce(&dyn DataSource<T>, &CancelToken) -> Result<()> + Send + 'static,
    {
        let (sender, receiver) = bounded(1);
        let source = Arc::clone(&self.source);
        let cancel = self.cancel.clone();

        thread::spawn(move || {
            if cancel.is_cancelled() {
                return;
            }
            let outcome = operation(source.as_ref(), &cancel);
            if cancel.is_cancelled() {
                return;
            }
            let _ = sender.send(ResultState::from_result(outcome));
        });

        MutationTicket { receiver }
    }

    fn list_slot(&self, key: QueryKey) -> (Arc<QuerySlot<Vec<T>>>, bool) {
        let mut lists = self.lists.lock();
        if let Some(slot) = lists.get(&key) {
            return (Arc::clone(slot), false);
        }

        let (slot, kick_rx) = QuerySlot::new();
        let source = Arc::clone(&self.source);
        let label = match &key {
            QueryKey::Search(needle) => format!("search:{}", needle),
            _ => "all".to_string(),
        };
        let fetch = {
            let query = key.clone();
            move |cancel: &CancelToken| match &query {
                QueryKey::Search(needle) => source.search(needle, cancel),
                _ => source.fetch_all(cancel),
            }
        };
        spawn_worker(
            Arc::clone(&slot),
            kick_rx,
            self.source.changes(),
            self.cancel.clone(),
            fetch,
            label,
        );
        lists.insert(key, Arc::clone(&slot));
        (slot, true)
    }

    fn single_slot(&self, key: RecordKey) -> (Arc<QuerySlot<T>>, bool) {
        let mut singles = self.singles.lock();
        if let Some(slot) = singles.get(&key) {
            return (Arc::clone(slot), false);
        }

        let (slot, kick_rx) = QuerySlot::new();
        let source = Arc::clone(&self.source);
        let fetch = {
            let key = key.clone();
            move |cancel: &CancelToken| source.fetch_by_key(&key, cancel)
        };
        spawn_worker(
            Arc::clone(&slot),
            kick_rx,
            self.source.changes(),
            self.cancel.clone(),
            fetch,
            format!("one:{}", key),
        );
        singles.insert(key, Arc::clone(&slot));
        (slot, true)
    }

    fn count_slot(&self) -> (Arc<QuerySlot<u64>>, bool) {
        let mut count = self.count.lock();
        if let Some(slot) = count.as_ref() {
            return (Arc::clone(slot), false);
        }

        let (slot, kick_rx) = QuerySlot::new();
        let source = Arc::clone(&self.source);
        let fetch = move |cancel: &CancelToken| source.count_all(cancel);
        spawn_worker(
            Arc::clone(&slot),
            kick_rx,
            self.source.changes(),
            self.cancel.clone(),
            fetch,
            "count".to_string(),
        );
        *count = Some(Arc::clone(&slot));
        (slot, true)
    }
}

impl<T: Record> Drop for Repository<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

//! Repository cycle semantics against a scripted in-memory source.

use crossbeam_channel::{bounded, Sender, TrySendError};
use livestore::{
    CancelToken, ChangeListener, DataError, DataSource, ErrorKind, QueryKey, Record, RecordKey,
    Repository, ResultState, StateSubscription,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
}

impl Record for User {
    fn key(&self) -> RecordKey {
        RecordKey::Int(self.id)
    }

    fn index_text(&self) -> String {
        self.name.clone()
    }
}

fn user(id: i64, name: &str) -> User {
    User {
        id,
        name: name.to_string(),
    }
}

/// Scripted source: serves a snapshot, optionally failing the next fetch,
/// optionally sleeping to widen the in-flight window, optionally exposing
/// a live change signal.
#[derive(Default)]
struct FakeSource {
    items: Mutex<Vec<User>>,
    fail_next: Mutex<Option<DataError>>,
    fetch_delay: Mutex<Duration>,
    fetch_count: AtomicUsize,
    listeners: Mutex<Vec<Sender<()>>>,
    live: bool,
}

impl FakeSource {
    fn live() -> Self {
        Self {
            live: true,
            ..Default::default()
        }
    }

    fn set_items(&self, items: Vec<User>) {
        *self.items.lock() = items;
    }

    fn fail_next(&self, err: DataError) {
        *self.fail_next.lock() = Some(err);
    }

    fn set_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = delay;
    }

    fn fetches(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn fire_change(&self) {
        self.listeners.lock().retain(|tx| {
            !matches!(tx.try_send(()), Err(TrySendError::Disconnected(())))
        });
    }

    fn begin_fetch(&self) -> Result<(), DataError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match self.fail_next.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl DataSource<User> for FakeSource {
    fn fetch_all(&self, _cancel: &CancelToken) -> Result<Vec<User>, DataError> {
        self.begin_fetch()?;
        Ok(self.items.lock().clone())
    }

    fn fetch_by_key(&self, key: &RecordKey, _cancel: &CancelToken) -> Result<User, DataError> {
        self.begin_fetch()?;
        self.items
            .lock()
            .iter()
            .find(|u| u.key() == *key)
            .cloned()
            .ok_or_else(|| DataError::NotFound(key.clone()))
    }

    fn search(&self, needle: &str, _cancel: &CancelToken) -> Result<Vec<User>, DataError> {
        self.begin_fetch()?;
        let needle = needle.to_lowercase();
        Ok(self
            .items
            .lock()
            .iter()
            .filter(|u| u.index_text().to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    fn write(&self, record: &User, _cancel: &CancelToken) -> Result<(), DataError> {
        let mut items = self.items.lock();
        match items.iter_mut().find(|u| u.key() == record.key()) {
            Some(slot) => *slot = record.clone(),
            None => items.push(record.clone()),
        }
        drop(items);
        self.fire_change();
        Ok(())
    }

    fn delete(&self, record: &User, _cancel: &CancelToken) -> Result<(), DataError> {
        self.items.lock().retain(|u| u.key() != record.key());
        self.fire_change();
        Ok(())
    }

    fn clear(&self, _cancel: &CancelToken) -> Result<(), DataError> {
        self.items.lock().clear();
        self.fire_change();
        Ok(())
    }

    fn count_all(&self, _cancel: &CancelToken) -> Result<u64, DataError> {
        self.begin_fetch()?;
        Ok(self.items.lock().len() as u64)
    }

    fn changes(&self) -> Option<ChangeListener> {
        if !self.live {
            return None;
        }
        let (tx, rx) = bounded(1);
        self.listeners.lock().push(tx);
        Some(ChangeListener::new(rx))
    }
}

fn next<T: Clone>(sub: &StateSubscription<T>) -> ResultState<T> {
    sub.recv_timeout(Duration::from_secs(5)).unwrap()
}

// --- Cycle Invariants ---

#[test]
fn test_cycle_is_pending_then_one_terminal() {
    let source = Arc::new(FakeSource::default());
    source.set_items(vec![user(1, "Ada")]);
    let repo = Repository::new(source.clone() as Arc<dyn DataSource<User>>);

    let sub = repo.observe_all();
    assert_eq!(next(&sub), ResultState::Pending);
    assert_eq!(next(&sub), ResultState::Succeeded(vec![user(1, "Ada")]));

    // No second terminal without an intervening Pending.
    assert!(sub.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_failure_then_refresh_recovers() {
    let source = Arc::new(FakeSource::default());
    source.set_items(vec![user(1, "Ada")]);
    source.fail_next(DataError::Network("connection reset".to_string()));
    let repo = Repository::new(source.clone() as Arc<dyn DataSource<User>>);

    let sub = repo.observe_all();
    assert_eq!(next(&sub), ResultState::Pending);
    let failed = next(&sub);
    assert_eq!(failed.failed_kind(), Some(ErrorKind::Network));

    // The repository stays usable after a failed terminal.
    repo.refresh(&QueryKey::All);
    assert_eq!(next(&sub), ResultState::Pending);
    assert_eq!(next(&sub), ResultState::Succeeded(vec![user(1, "Ada")]));
}

#[test]
fn test_fetch_then_failing_refresh_scenario() {
    let source = Arc::new(FakeSource::default());
    source.set_items(vec![user(1, "Ada")]);
    let repo = Repository::new(source.clone() as Arc<dyn DataSource<User>>);

    let sub = repo.observe_all();
    assert_eq!(next(&sub), ResultState::Pending);
    assert_eq!(next(&sub), ResultState::Succeeded(vec![user(1, "Ada")]));

    source.fail_next(DataError::Network("timed out".to_string()));
    repo.refresh(&QueryKey::All);
    assert_eq!(next(&sub), ResultState::Pending);
    let failed = next(&sub);
    assert_eq!(failed.failed_kind(), Some(ErrorKind::Network));

    // The earlier success lives only in hub history: an already-delivered
    // subscriber is not re-sent the old value after a failure.
    assert!(sub.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_refresh_coalescing_single_fetch() {
    let source = Arc::new(FakeSource::default());
    let repo = Repository::new(source.clone() as Arc<dyn DataSource<User>>);

    let sub = repo.observe_all();
    assert_eq!(next(&sub), ResultState::Pending);
    assert!(next(&sub).is_terminal());
    assert_eq!(source.fetches(), 1);

    // Two refreshes inside one in-flight window: one physical fetch.
    source.set_delay(Duration::from_millis(300));
    repo.refresh(&QueryKey::All);
    std::thread::sleep(Duration::from_millis(100));
    repo.refresh(&QueryKey::All);

    assert_eq!(next(&sub), ResultState::Pending);
    assert!(next(&sub).is_terminal());
    // No trailing second cycle.
    assert!(sub.recv_timeout(Duration::from_millis(500)).is_err());
    assert_eq!(source.fetches(), 2);
}

#[test]
fn test_replay_latest_without_new_fetch() {
    let source = Arc::new(FakeSource::default());
    source.set_items(vec![user(1, "Ada"), user(2, "Grace")]);
    let repo = Repository::new(source.clone() as Arc<dyn DataSource<User>>);

    let first = repo.observe_all();
    assert_eq!(next(&first), ResultState::Pending);
    let expected = ResultState::Succeeded(vec![user(1, "Ada"), user(2, "Grace")]);
    assert_eq!(next(&first), expected);
    let fetches = source.fetches();

    let late = repo.observe_all();
    // Latest terminal replayed immediately; no Pending, no new cycle.
    assert_eq!(next(&late), expected);
    assert!(late.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(source.fetches(), fetches);
}

#[test]
fn test_live_change_triggers_new_cycle() {
    let source = Arc::new(FakeSource::live());
    let repo = Repository::new(source.clone() as Arc<dyn DataSource<User>>);

    let sub = repo.observe_all();
    assert_eq!(next(&sub), ResultState::Pending);
    assert_eq!(next(&sub), ResultState::Succeeded(vec![]));

    repo.write(user(1, "Ada")).wait();
    assert_eq!(next(&sub), ResultState::Pending);
    assert_eq!(next(&sub), ResultState::Succeeded(vec![user(1, "Ada")]));
}

#[test]
fn test_observe_one_missing_record() {
    let source = Arc::new(FakeSource::default());
    let repo = Repository::new(source.clone() as Arc<dyn DataSource<User>>);

    let sub = repo.observe_one(RecordKey::Int(9));
    assert_eq!(next(&sub), ResultState::Pending);
    let state = next(&sub);
    assert_eq!(state.failed_kind(), Some(ErrorKind::NotFound));
    match state {
        ResultState::Failed { message, .. } => assert!(message.contains('9')),
        other => panic!("expected Failed, got {:?}", other),
    }
}

#[test]
fn test_independent_query_slots() {
    let source = Arc::new(FakeSource::default());
    source.set_items(vec![user(1, "Ada"), user(2, "Grace")]);
    let repo = Repository::new(source.clone() as Arc<dyn DataSource<User>>);

    let all = repo.observe_all();
    let hits = repo.observe_search("grace");
    let count = repo.observe_count();

    assert_eq!(next(&all), ResultState::Pending);
    assert_eq!(
        next(&all),
        ResultState::Succeeded(vec![user(1, "Ada"), user(2, "Grace")])
    );
    assert_eq!(next(&hits), ResultState::Pending);
    assert_eq!(next(&hits), ResultState::Succeeded(vec![user(2, "Grace")]));
    assert_eq!(next(&count), ResultState::Pending);
    assert_eq!(next(&count), ResultState::Succeeded(2));

    // Refreshing one query does not disturb the others.
    repo.refresh(&QueryKey::Count);
    assert_eq!(next(&count), ResultState::Pending);
    assert_eq!(next(&count), ResultState::Succeeded(2));
    assert!(all.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(hits.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_cancel_discards_inflight_outcome() {
    let source = Arc::new(FakeSource::default());
    source.set_delay(Duration::from_millis(300));
    let repo = Repository::new(source.clone() as Arc<dyn DataSource<User>>);

    let sub = repo.observe_all();
    assert_eq!(next(&sub), ResultState::Pending);

    // Cancel mid-flight: the terminal is never delivered.
    repo.cancel();
    assert!(sub.recv_timeout(Duration::from_millis(600)).is_err());
}

#[test]
fn test_mutation_ticket_resolves_failure() {
    struct FailingWrites(FakeSource);

    impl DataSource<User> for FailingWrites {
        fn fetch_all(&self, cancel: &CancelToken) -> Result<Vec<User>, DataError> {
            self.0.fetch_all(cancel)
        }
        fn fetch_by_key(&self, key: &RecordKey, cancel: &CancelToken) -> Result<User, DataError> {
            self.0.fetch_by_key(key, cancel)
        }
        fn search(&self, needle: &str, cancel: &CancelToken) -> Result<Vec<User>, DataError> {
            self.0.search(needle, cancel)
        }
        fn write(&self, _record: &User, _cancel: &CancelToken) -> Result<(), DataError> {
            Err(DataError::Store("constraint violation".to_string()))
        }
        fn delete(&self, record: &User, cancel: &CancelToken) -> Result<(), DataError> {
            self.0.delete(record, cancel)
        }
        fn clear(&self, cancel: &CancelToken) -> Result<(), DataError> {
            self.0.clear(cancel)
        }
        fn count_all(&self, cancel: &CancelToken) -> Result<u64, DataError> {
            self.0.count_all(cancel)
        }
    }

    let repo = Repository::new(Arc::new(FailingWrites(FakeSource::default())) as Arc<dyn DataSource<User>>);
    let outcome = repo.write(user(1, "Ada")).wait();
    assert_eq!(outcome.failed_kind(), Some(ErrorKind::Store));
}

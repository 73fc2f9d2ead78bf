//! Data source adapters.
//!
//! A [`DataSource`] is the uniform interface the repository orchestrates:
//! one operation per logical query, each returning a `Result` the
//! repository normalizes into a result state. The remote variant talks to
//! an HTTP endpoint; the local variant reads and writes the shared
//! persistent store and additionally exposes a change signal so live
//! queries re-push on every underlying mutation.

mod local;
mod remote;

pub use local::LocalSource;
pub use remote::{RemoteConfig, RemoteSource};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::types::{Record, RecordKey};
use crossbeam_channel::Receiver;

/// Change signal from a live source.
///
/// Carries no payload; a signal means "the underlying data changed,
/// re-run the query". At most one signal is queued at a time, so bursts
/// of mutations coalesce into one wake-up.
pub struct ChangeListener {
    pub(crate) receiver: Receiver<()>,
}

impl ChangeListener {
    /// Wrap a raw signal channel. Implementations outside this crate use
    /// this to expose their own change feeds.
    pub fn new(receiver: Receiver<()>) -> Self {
        Self { receiver }
    }

    /// Non-blocking check for a pending change signal.
    pub fn try_recv(&self) -> bool {
        self.receiver.try_recv().is_ok()
    }
}

/// Uniform interface over a remote or local origin of records.
///
/// Implementations never panic on operational failures; every outcome is
/// a `Result` carrying the error taxonomy. The cancel token is checked
/// between suspension points; a cancelled call may return early with any
/// error, the repository discards post-cancellation outcomes.
pub trait DataSource<T: Record>: Send + Sync + 'static {
    /// All records.
    fn fetch_all(&self, cancel: &CancelToken) -> Result<Vec<T>>;

    /// Single record by key. Absence is `DataError::NotFound`.
    fn fetch_by_key(&self, key: &RecordKey, cancel: &CancelToken) -> Result<T>;

    /// Records whose index text contains `needle` (case-insensitive).
    fn search(&self, needle: &str, cancel: &CancelToken) -> Result<Vec<T>>;

    /// Insert or replace a record.
    fn write(&self, record: &T, cancel: &CancelToken) -> Result<()>;

    /// Delete a record.
    fn delete(&self, record: &T, cancel: &CancelToken) -> Result<()>;

    /// Delete all records.
    fn clear(&self, cancel: &CancelToken) -> Result<()>;

    /// Number of records.
    fn count_all(&self, cancel: &CancelToken) -> Result<u64>;

    /// Change signal for sources backed by live storage. `None` for
    /// one-shot sources such as remote endpoints.
    fn changes(&self) -> Option<ChangeListener> {
        None
    }
}

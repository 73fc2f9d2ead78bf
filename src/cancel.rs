//! Cooperative cancellation token.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation token shared between a repository and its workers.
///
/// Adapters receive the token with every call and are expected to check it
/// between suspension points. Worker loops additionally `select!` on
/// [`CancelToken::signal`], which disconnects the moment the token is
/// cancelled, so blocked threads wake up immediately.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    flag: AtomicBool,
    /// Held until cancellation; dropping it disconnects `signal_rx`.
    signal_tx: Mutex<Option<Sender<()>>>,
    signal_rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (signal_tx, signal_rx) = bounded::<()>(0);
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                signal_tx: Mutex::new(Some(signal_tx)),
                signal_rx,
            }),
        }
    }

    /// Cancel. Idempotent; wakes every thread blocked on [`signal`].
    ///
    /// [`signal`]: CancelToken::signal
    pub fn cancel(&self) {
        if !self.inner.flag.swap(true, Ordering::SeqCst) {
            // Dropping the sender disconnects the receiver for all clones.
            self.inner.signal_tx.lock().take();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Channel that never yields a message and disconnects on cancellation.
    /// Intended for `select!` arms in worker loops.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal_rx
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

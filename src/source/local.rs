//! Local data source over the persistent store.

use crate::cancel::CancelToken;
use crate::error::{DataError, Result};
use crate::source::{ChangeListener, DataSource};
use crate::store::{RowFilter, Store};
use crate::types::{Record, RecordKey};
use std::marker::PhantomData;
use std::sync::Arc;

/// Data source backed by one collection of the shared store.
///
/// Records are serialized as MessagePack row payloads; the record's index
/// text is stored alongside so search queries never deserialize
/// non-matching rows' neighbors twice. Reads come back ordered newest
/// first, the store's list order. Writes complete (or fail) before the
/// call returns, and the store's change signal makes every live query
/// over this collection re-push afterwards.
pub struct LocalSource<T> {
    store: Arc<Store>,
    collection: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> LocalSource<T> {
    pub fn new(store: Arc<Store>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            _marker: PhantomData,
        }
    }

    /// The underlying store handle.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn decode(&self, payload: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(payload)?)
    }

    fn decode_rows(&self, rows: Vec<crate::store::Row>) -> Result<Vec<T>> {
        rows.iter().map(|row| self.decode(&row.payload)).collect()
    }

    fn check_cancelled(cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(DataError::Store("operation cancelled".to_string()));
        }
        Ok(())
    }
}

impl<T: Record> DataSource<T> for LocalSource<T> {
    fn fetch_all(&self, cancel: &CancelToken) -> Result<Vec<T>> {
        Self::check_cancelled(cancel)?;
        self.decode_rows(self.store.select(&self.collection, &RowFilter::All))
    }

    fn fetch_by_key(&self, key: &RecordKey, cancel: &CancelToken) -> Result<T> {
        Self::check_cancelled(cancel)?;
        match self.store.get(&self.collection, key) {
            Some(row) => self.decode(&row.payload),
            None => Err(DataError::NotFound(key.clone())),
        }
    }

    fn search(&self, needle: &str, cancel: &CancelToken) -> Result<Vec<T>> {
        Self::check_cancelled(cancel)?;
        let filter = RowFilter::TextContains(needle.to_string());
        self.decode_rows(self.store.select(&self.collection, &filter))
    }

    fn write(&self, record: &T, cancel: &CancelToken) -> Result<()> {
        Self::check_cancelled(cancel)?;
        let payload = rmp_serde::to_vec_named(record)?;
        self.store
            .upsert(&self.collection, record.key(), record.index_text(), payload)
    }

    fn delete(&self, record: &T, cancel: &CancelToken) -> Result<()> {
        Self::check_cancelled(cancel)?;
        self.store.delete(&self.collection, &record.key())
    }

    fn clear(&self, cancel: &CancelToken) -> Result<()> {
        Self::check_cancelled(cancel)?;
        self.store.clear(&self.collection)
    }

    fn count_all(&self, cancel: &CancelToken) -> Result<u64> {
        Self::check_cancelled(cancel)?;
        Ok(self.store.count(&self.collection))
    }

    fn changes(&self) -> Option<ChangeListener> {
        Some(ChangeListener::new(self.store.watch(&self.collection)))
    }
}

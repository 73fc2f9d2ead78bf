//! Persistent table store and its process-wide singleton registry.
//!
//! The store holds named collections of rows, each row a serialized record
//! payload plus the metadata the query surface needs (key, creation time,
//! searchable text). The whole table is memory-resident; every mutation
//! rewrites the snapshot file through a temp-file rename, with a CRC32
//! checksum verified at open.

use crate::error::{DataError, Result};
use crate::types::{RecordKey, Timestamp};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Magic string in the store manifest.
const STORE_MAGIC: &str = "livestore";

/// Current store format version.
const STORE_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
const TABLE_FILE: &str = "table.bin";

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base directory for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./livestore"),
            create_if_missing: true,
        }
    }
}

/// One persisted row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Row {
    /// Record identity within its collection.
    pub key: RecordKey,

    /// Assigned on first insert; preserved across upserts of the same key.
    pub created_at: Timestamp,

    /// Searchable text field.
    pub text: String,

    /// Serialized record payload.
    pub payload: Vec<u8>,
}

/// Filter for list reads.
#[derive(Clone, Debug)]
pub enum RowFilter {
    All,
    ByKey(RecordKey),
    /// Exact match on the text field.
    TextEquals(String),
    /// Case-insensitive substring match on the text field.
    TextContains(String),
}

impl RowFilter {
    fn matches(&self, row: &Row) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::ByKey(key) => row.key == *key,
            RowFilter::TextEquals(text) => row.text == *text,
            RowFilter::TextContains(needle) => {
                row.text.to_lowercase().contains(&needle.to_lowercase())
            }
        }
    }
}

/// In-memory state of one collection.
struct Collection {
    rows: HashMap<RecordKey, Row>,
    /// Next auto-allocated integer key; derived from the rows at load.
    next_key: i64,
}

impl Collection {
    fn empty() -> Self {
        Self {
            rows: HashMap::new(),
            next_key: 1,
        }
    }

    fn from_rows(rows: Vec<Row>) -> Self {
        let next_key = rows
            .iter()
            .filter_map(|row| match row.key {
                RecordKey::Int(n) => Some(n),
                RecordKey::Str(_) => None,
            })
            .max()
            .map_or(1, |max| max + 1);
        Self {
            rows: rows.into_iter().map(|row| (row.key.clone(), row)).collect(),
            next_key,
        }
    }
}

/// Manifest written next to the table file.
#[derive(Serialize, Deserialize)]
struct Manifest {
    magic: String,
    version: u32,
}

/// The persistent store.
///
/// Individual reads and writes are atomic at row granularity; mutations
/// are serialized by an internal write lock (single writer at a time).
/// Each mutation fires the change signal of the affected collection so
/// live queries re-push without manual refresh.
pub struct Store {
    config: StoreConfig,

    /// Exclusive lock guarding against a second process (or a second
    /// in-process handle) opening the same directory.
    _lock_file: File,

    tables: RwLock<HashMap<String, Collection>>,

    /// Change watchers per collection.
    watchers: Mutex<HashMap<String, Vec<Sender<()>>>>,

    /// Serializes mutations and snapshot writes.
    write_lock: Mutex<()>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join(MANIFEST_FILE).exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(DataError::Store(format!(
                "store not found at {}",
                config.path.display()
            )))
        }
    }

    /// Create a new store directory.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config)?;
        let lock_file = Self::acquire_lock(&config)?;

        info!(path = %config.path.display(), "created store");

        Ok(Self {
            config,
            _lock_file: lock_file,
            tables: RwLock::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    /// Open an existing store directory.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let manifest_path = config.path.join(MANIFEST_FILE);
        let manifest_bytes = fs::read(&manifest_path)?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| DataError::Store(format!("invalid store manifest: {}", e)))?;

        if manifest.magic != STORE_MAGIC {
            return Err(DataError::Store(format!(
                "not a store directory: {}",
                config.path.display()
            )));
        }

        if manifest.version != STORE_VERSION {
            // Schema migration is out of scope: recreate destructively.
            warn!(
                found = manifest.version,
                expected = STORE_VERSION,
                "store version mismatch, recreating"
            );
            let table_path = config.path.join(TABLE_FILE);
            if table_path.exists() {
                fs::remove_file(&table_path)?;
            }
            Self::write_manifest(&config)?;
        }

        let lock_file = Self::acquire_lock(&config)?;
        let tables = Self::load_table(&config)?;

        info!(
            path = %config.path.display(),
            collections = tables.len(),
            "opened store"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            tables: RwLock::new(tables),
            watchers: Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    fn write_manifest(config: &StoreConfig) -> Result<()> {
        let manifest = Manifest {
            magic: STORE_MAGIC.to_string(),
            version: STORE_VERSION,
        };
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| DataError::Store(format!("manifest encode error: {}", e)))?;
        fs::write(config.path.join(MANIFEST_FILE), bytes)?;
        Ok(())
    }

    fn acquire_lock(config: &StoreConfig) -> Result<File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(config.path.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| DataError::Store("store is locked by another process".to_string()))?;
        Ok(lock_file)
    }

    fn load_table(config: &StoreConfig) -> Result<HashMap<String, Collection>> {
        let table_path = config.path.join(TABLE_FILE);
        if !table_path.exists() {
            return Ok(HashMap::new());
        }

        let bytes = fs::read(&table_path)?;
        if bytes.len() < 4 {
            return Err(DataError::Store("truncated table file".to_string()));
        }

        let (encoded, checksum_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([
            checksum_bytes[0],
            checksum_bytes[1],
            checksum_bytes[2],
            checksum_bytes[3],
        ]);
        let computed = crc32fast::hash(encoded);
        if stored != computed {
            return Err(DataError::Store(format!(
                "table checksum mismatch: expected {}, got {}",
                stored, computed
            )));
        }

        let snapshot: HashMap<String, Vec<Row>> = rmp_serde::from_slice(encoded)?;
        Ok(snapshot
            .into_iter()
            .map(|(name, rows)| (name, Collection::from_rows(rows)))
            .collect())
    }

    /// Write the full table snapshot to a temp file, then rename over the
    /// live one. Callers hold the write lock.
    fn persist(&self, tables: &HashMap<String, Collection>) -> Result<()> {
        let snapshot: HashMap<&String, Vec<&Row>> = tables
            .iter()
            .map(|(name, collection)| (name, collection.rows.values().collect()))
            .collect();
        let encoded = rmp_serde::to_vec_named(&snapshot)?;
        let checksum = crc32fast::hash(&encoded);

        let tmp_path = self.config.path.join(format!("{}.tmp", TABLE_FILE));
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&encoded)?;
        tmp.write_all(&checksum.to_le_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, self.config.path.join(TABLE_FILE))?;
        Ok(())
    }

    // --- Reads ---

    /// Rows matching the filter, ordered by creation time descending
    /// (ties broken by key, descending).
    pub fn select(&self, collection: &str, filter: &RowFilter) -> Vec<Row> {
        let tables = self.tables.read();
        let mut rows: Vec<Row> = match tables.get(collection) {
            Some(table) => table
                .rows
                .values()
                .filter(|row| filter.matches(row))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.key.cmp(&a.key))
        });
        rows
    }

    /// Single row by key.
    pub fn get(&self, collection: &str, key: &RecordKey) -> Option<Row> {
        self.tables
            .read()
            .get(collection)
            .and_then(|table| table.rows.get(key))
            .cloned()
    }

    /// Number of rows in a collection.
    pub fn count(&self, collection: &str) -> u64 {
        self.tables
            .read()
            .get(collection)
            .map_or(0, |table| table.rows.len() as u64)
    }

    // --- Mutations ---

    /// Insert or replace a row. The creation timestamp of an existing key
    /// is preserved.
    pub fn upsert(
        &self,
        collection: &str,
        key: RecordKey,
        text: String,
        payload: Vec<u8>,
    ) -> Result<()> {
        let _write = self.write_lock.lock();
        {
            let mut tables = self.tables.write();
            let table = tables
                .entry(collection.to_string())
                .or_insert_with(Collection::empty);
            let created_at = table
                .rows
                .get(&key)
                .map_or_else(Timestamp::now, |row| row.created_at);
            table.rows.insert(
                key.clone(),
                Row {
                    key,
                    created_at,
                    text,
                    payload,
                },
            );
        }
        self.persist(&self.tables.read())?;
        self.notify(collection);
        Ok(())
    }

    /// Delete a row by key. Deleting an absent key is a no-op.
    pub fn delete(&self, collection: &str, key: &RecordKey) -> Result<()> {
        let _write = self.write_lock.lock();
        let removed = {
            let mut tables = self.tables.write();
            tables
                .get_mut(collection)
                .and_then(|table| table.rows.remove(key))
                .is_some()
        };
        if removed {
            self.persist(&self.tables.read())?;
            self.notify(collection);
        }
        Ok(())
    }

    /// Remove every row in a collection.
    pub fn clear(&self, collection: &str) -> Result<()> {
        let _write = self.write_lock.lock();
        let removed = {
            let mut tables = self.tables.write();
            match tables.get_mut(collection) {
                Some(table) if !table.rows.is_empty() => {
                    table.rows.clear();
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.persist(&self.tables.read())?;
            self.notify(collection);
        }
        Ok(())
    }

    /// Allocate the next integer key for a collection.
    pub fn allocate_key(&self, collection: &str) -> RecordKey {
        let mut tables = self.tables.write();
        let table = tables
            .entry(collection.to_string())
            .or_insert_with(Collection::empty);
        let key = table.next_key;
        table.next_key += 1;
        RecordKey::Int(key)
    }

    // --- Change notification ---

    /// Register a change watcher for a collection.
    ///
    /// The returned channel carries at most one pending signal; bursts of
    /// mutations coalesce into a single wake-up.
    pub fn watch(&self, collection: &str) -> Receiver<()> {
        let (sender, receiver) = bounded(1);
        self.watchers
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(sender);
        receiver
    }

    /// Signal every watcher of a collection, pruning dead ones.
    fn notify(&self, collection: &str) {
        let mut watchers = self.watchers.lock();
        if let Some(list) = watchers.get_mut(collection) {
            list.retain(|sender| match sender.try_send(()) {
                Ok(()) => true,
                // A queued signal already covers this change.
                Err(TrySendError::Full(())) => true,
                Err(TrySendError::Disconnected(())) => false,
            });
            debug!(collection, watchers = list.len(), "store change");
        }
    }

    /// Base directory of this store.
    pub fn path(&self) -> &PathBuf {
        &self.config.path
    }
}

// --- Singleton registry ---

static REGISTRY: Mutex<Option<HashMap<PathBuf, Arc<Store>>>> = Mutex::new(None);

/// Process-wide handle to the store at `config.path`.
///
/// The first caller constructs the store; the registry lock makes the
/// construction single-flight, so concurrent first-time callers observe
/// exactly one construction and share one handle. Subsequent callers get
/// the cached handle at the cost of one map lookup. Handles live until
/// process teardown.
///
/// # Panics
///
/// An empty store path is a programming-contract violation and panics
/// rather than returning a `Failed` state.
pub fn store_handle(config: StoreConfig) -> Result<Arc<Store>> {
    assert!(
        !config.path.as_os_str().is_empty(),
        "store path must not be empty"
    );

    let mut registry = REGISTRY.lock();
    let map = registry.get_or_insert_with(HashMap::new);
    if let Some(handle) = map.get(&config.path) {
        return Ok(Arc::clone(handle));
    }

    let store = Arc::new(Store::open_or_create(config.clone())?);
    map.insert(config.path, Arc::clone(&store));
    Ok(store)
}

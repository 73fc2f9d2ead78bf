//! Core types shared across the crate.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identity of a record.
///
/// Keys are either integers (auto-allocated primary keys) or strings
/// (server-assigned identifiers). Identity never changes for the lifetime
/// of a record; content fields may.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    Int(i64),
    Str(String),
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(n) => write!(f, "Key({})", n),
            RecordKey::Str(s) => write!(f, "Key({:?})", s),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(n) => write!(f, "{}", n),
            RecordKey::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(n: i64) -> Self {
        RecordKey::Int(n)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        RecordKey::Str(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        RecordKey::Str(s)
    }
}

/// An identity-bearing data item flowing through the pipeline.
///
/// Records cross thread boundaries and the store's serialization boundary,
/// so they must be cloneable and serde-serializable. Content equality
/// (`PartialEq`) is what the reconciler uses to distinguish a moved record
/// from a changed one.
pub trait Record:
    Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Stable identity for this record.
    fn key(&self) -> RecordKey;

    /// Text field used for substring search. Empty means the record is
    /// invisible to search queries.
    fn index_text(&self) -> String {
        String::new()
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

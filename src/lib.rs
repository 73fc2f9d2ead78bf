//! # livestore
//!
//! A reactive repository layer: fetch records from a slow or unreliable
//! origin, classify every outcome into a tri-state result, multicast the
//! states to any number of observers with latest-value replay, and diff
//! successive list snapshots so consumers re-render only what changed.
//!
//! ## Core Concepts
//!
//! - **ResultState**: pending / succeeded / failed, exactly one pending and
//!   one terminal per fetch cycle
//! - **DataSource**: uniform adapter over an HTTP endpoint or the local
//!   persistent store
//! - **Repository**: per-query orchestration with coalesced refresh and
//!   live re-push on storage changes
//! - **StateHub**: latest-value-replaying multicast to subscribers
//! - **reconcile**: keyed minimal diff between two list snapshots
//!
//! ## Example
//!
//! ```ignore
//! use livestore::{LocalSource, Repository, ResultState, StoreConfig};
//!
//! let store = livestore::store_handle(StoreConfig {
//!     path: "./data".into(),
//!     ..Default::default()
//! })?;
//!
//! let repo = Repository::new(Arc::new(LocalSource::<Contact>::new(store, "contacts")));
//! let contacts = repo.observe_all();
//!
//! repo.write(Contact { id: 1, name: "Ada".into(), ..Default::default() });
//!
//! while let Ok(state) = contacts.recv() {
//!     match state {
//!         ResultState::Pending => show_spinner(),
//!         ResultState::Succeeded(list) => render(list),
//!         ResultState::Failed { message, .. } => show_error(&message),
//!     }
//! }
//! ```

pub mod cancel;
pub mod error;
pub mod hub;
pub mod reconcile;
pub mod repository;
pub mod source;
pub mod state;
pub mod store;
pub mod types;

// Re-exports
pub use cancel::CancelToken;
pub use error::{DataError, ErrorKind, Result};
pub use hub::{StateHub, StateSubscription, SubscriptionId};
pub use reconcile::{reconcile, DiffOp};
pub use repository::{MutationTicket, QueryKey, Repository};
pub use source::{ChangeListener, DataSource, LocalSource, RemoteConfig, RemoteSource};
pub use state::ResultState;
pub use store::{store_handle, Row, RowFilter, Store, StoreConfig};
pub use types::{Record, RecordKey, Timestamp};

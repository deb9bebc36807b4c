//! Storage interfaces for namespaces and the shared allocation record.
//!
//! Both stores use optimistic concurrency: every object carries a
//! `resource_version`, and an update whose version is stale fails with
//! [`StoreError::Conflict`] instead of overwriting a newer write.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::{Namespace, RangeAllocation};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Object kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// The object changed since it was read.
    #[error("{kind} {name:?} was modified concurrently; re-read and retry")]
    Conflict {
        /// Object kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// An object with the same name exists.
    #[error("{kind} {name:?} already exists")]
    AlreadyExists {
        /// Object kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// The backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the error is [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the error is [`StoreError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// A change observed on a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceEvent {
    /// Created or updated; carries the namespace name.
    Upserted(String),
    /// Deleted; carries the namespace name.
    Deleted(String),
}

impl NamespaceEvent {
    /// Name of the namespace the event is about.
    pub fn name(&self) -> &str {
        match self {
            Self::Upserted(name) | Self::Deleted(name) => name,
        }
    }
}

/// Capacity of the change notification channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Namespace persistence.
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    /// Fetch one namespace.
    async fn get(&self, name: &str) -> Result<Namespace, StoreError>;

    /// Create a namespace; its version is assigned by the store.
    async fn create(&self, namespace: &Namespace) -> Result<Namespace, StoreError>;

    /// Replace a namespace if `namespace.resource_version` is current.
    async fn update(&self, namespace: &Namespace) -> Result<Namespace, StoreError>;

    /// Remove a namespace.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// All namespaces, ordered by name.
    async fn list(&self) -> Result<Vec<Namespace>, StoreError>;

    /// Subscribe to changes made through this store.
    fn watch(&self) -> broadcast::Receiver<NamespaceEvent>;
}

/// Persistence of the shared allocation record.
#[async_trait]
pub trait RangeAllocationStore: Send + Sync {
    /// Fetch the record called `name`.
    async fn get(&self, name: &str) -> Result<RangeAllocation, StoreError>;

    /// Create the record; fails with [`StoreError::AlreadyExists`].
    async fn create(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError>;

    /// Replace the record if `record.resource_version` is current.
    async fn update(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError>;
}

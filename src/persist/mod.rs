//! Write-back of store documents to durable storage.
//!
//! The in-memory store stays authoritative. A sink mirrors it one document
//! at a time: every change is written as the record's full current state or
//! as a removal, so writes are idempotent and a batch can keep only the
//! newest write per record.

/// SQLite document mirror.
pub mod sqlite;

use crate::{
    core::store::{EntityStore, StoreError, StoreSnapshot},
    record::Record,
    types::{Collection, RecordId},
};

/// Failures of the write-back path or of loading stored documents.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// The database rejected a statement.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Stored documents break a store invariant and cannot be loaded.
    #[error("stored documents are inconsistent: {0}")]
    Inconsistent(#[from] StoreError),
    /// The write-back task died or its blocking call panicked.
    #[error("write-back worker failed: {0}")]
    Worker(String),
}

/// Result alias for the persistence layer.
pub type PersistResult<T> = Result<T, PersistError>;

/// One document-level change.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentWrite {
    /// Insert or overwrite the whole record.
    Put(Record),
    /// Remove the record if present.
    Remove {
        /// Collection holding the record.
        collection: Collection,
        /// Removed id.
        id: RecordId,
    },
}

impl DocumentWrite {
    /// The write that brings storage in line with `store` for one record:
    /// its current state, or a removal when it no longer exists.
    pub fn current(store: &EntityStore, collection: Collection, id: RecordId) -> Self {
        match store.get(collection, id) {
            Some(record) => Self::Put(record),
            None => Self::Remove { collection, id },
        }
    }

    /// Collection written.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Put(record) => record.collection(),
            Self::Remove { collection, .. } => *collection,
        }
    }

    /// Record id written.
    pub fn id(&self) -> RecordId {
        match self {
            Self::Put(record) => record.id(),
            Self::Remove { id, .. } => *id,
        }
    }
}

/// Durable mirror of the store, driven by the runtime's write-back task.
///
/// Calls run on a blocking thread and may block.
pub trait DocumentSink: Send {
    /// Applies `writes` atomically. Order within a batch does not matter:
    /// each record appears at most once.
    fn write_batch(&mut self, writes: &[DocumentWrite]) -> PersistResult<()>;

    /// Replaces every stored document with the contents of `snapshot`.
    fn replace_all(&mut self, snapshot: &StoreSnapshot) -> PersistResult<()>;
}

//! Mutation operation model.

use crate::{
    record::{Patch, Record},
    types::{Collection, OpSeq, RecordId},
};

/// One applied mutation, as announced to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Insert a fully materialized record.
    Create {
        /// Inserted record.
        record: Record,
    },
    /// Patch an existing record.
    Update {
        /// Record id to mutate.
        id: RecordId,
        /// Forward patch.
        patch: Patch,
    },
    /// Remove a record.
    Delete {
        /// Collection of the removed record.
        collection: Collection,
        /// Removed record id.
        id: RecordId,
    },
}

impl Op {
    /// Collection touched by this op.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Create { record } => record.collection(),
            Self::Update { patch, .. } => patch.collection(),
            Self::Delete { collection, .. } => *collection,
        }
    }

    /// Record id touched by this op.
    pub fn record_id(&self) -> RecordId {
        match self {
            Self::Create { record } => record.id(),
            Self::Update { id, .. } | Self::Delete { id, .. } => *id,
        }
    }
}

/// An [`Op`] stamped with its position in apply order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation body.
    pub op: Op,
}

//! Change notifications broadcast by the store task.

use crate::{
    op::Op,
    types::{Collection, OpSeq, RecordId},
};

/// Emitted once per applied mutation, in apply order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A record was created.
    Created {
        /// Collection written.
        collection: Collection,
        /// New record id.
        id: RecordId,
    },
    /// A record was updated.
    Updated {
        /// Collection written.
        collection: Collection,
        /// Updated record id.
        id: RecordId,
    },
    /// A record was deleted.
    Deleted {
        /// Collection written.
        collection: Collection,
        /// Removed record id.
        id: RecordId,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}

impl From<&Op> for StoreEvent {
    fn from(op: &Op) -> Self {
        let collection = op.collection();
        let id = op.record_id();
        match op {
            Op::Create { .. } => Self::Created { collection, id },
            Op::Update { .. } => Self::Updated { collection, id },
            Op::Delete { .. } => Self::Deleted { collection, id },
        }
    }
}

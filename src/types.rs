//! Shared primitive IDs and collection names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned identifier, unique across all collections.
pub type RecordId = u64;
/// Identifier of an [`crate::record::EventRecord`].
pub type EventId = RecordId;
/// Identifier of a [`crate::record::ParticipantRecord`].
pub type ParticipantId = RecordId;
/// Identifier of a [`crate::record::ScoreRecord`].
pub type ScoreId = RecordId;
/// Monotonic operation sequence number.
pub type OpSeq = u64;
/// Identifier of a live subscription.
pub type SubscriptionId = u64;

/// One of the three shared collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Competition events.
    Events,
    /// Competitors.
    Participants,
    /// One score per (event, participant) pair.
    Scores,
}

impl Collection {
    /// Collection name as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Participants => "participants",
            Self::Scores => "scores",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Score upsert: turns a raw candidate value into create, update, delete, or
//! nothing for one (event, participant) pair.

use crate::{
    core::store::{EntityStore, StoreError, now_ms},
    op::StoredOp,
    record::{Draft, Patch, ScoreDraft, ScorePatch, ScoreRecord, ValidationError},
    types::{Collection, EventId, ParticipantId, ScoreId},
};

/// Parses a candidate typed by a caller.
///
/// Accepts an unsigned decimal number (`"12.5"`, `"0"`, `".5"`, `"7."`) or an
/// empty string, which yields `None` and means "clear the score". Digit runs
/// too long to fit an `f64` are rejected rather than saved as infinity.
pub fn parse_candidate(raw: &str) -> Result<Option<f64>, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let malformed = || ValidationError::MalformedNumber {
        raw: raw.to_string(),
    };

    let mut dots = 0usize;
    let mut digits = 0usize;
    for c in trimmed.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return Err(malformed()),
        }
    }
    if dots > 1 || digits == 0 {
        return Err(malformed());
    }

    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(malformed()),
    }
}

/// What a save will do to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertPlan {
    /// No candidate and nothing stored.
    Noop,
    /// First score for the pair.
    Create(ScoreDraft),
    /// Overwrite the stored value in place.
    Update {
        /// Existing score id.
        id: ScoreId,
        /// New value.
        score: f64,
    },
    /// Candidate cleared; remove the stored score.
    Delete {
        /// Existing score id.
        id: ScoreId,
    },
}

/// Decides the write for a pair given the currently stored score.
pub fn plan(
    existing: Option<&ScoreRecord>,
    event_id: EventId,
    participant_id: ParticipantId,
    candidate: Option<f64>,
) -> UpsertPlan {
    match (existing, candidate) {
        (None, None) => UpsertPlan::Noop,
        (Some(rec), None) => UpsertPlan::Delete { id: rec.id },
        (Some(rec), Some(score)) => UpsertPlan::Update { id: rec.id, score },
        (None, Some(score)) => UpsertPlan::Create(ScoreDraft {
            event_id,
            participant_id,
            score,
        }),
    }
}

/// Result of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Nothing was stored and nothing was written.
    Unchanged,
    /// A score was created.
    Created(ScoreId),
    /// The existing score was overwritten.
    Updated(ScoreId),
    /// The existing score was removed.
    Deleted(ScoreId),
}

impl UpsertOutcome {
    /// Id of the score that was written, if any.
    pub fn score_id(&self) -> Option<ScoreId> {
        match self {
            Self::Unchanged => None,
            Self::Created(id) | Self::Updated(id) | Self::Deleted(id) => Some(*id),
        }
    }
}

/// Looks up the stored score for the pair and applies the planned write.
///
/// The event and participant must exist, so a save never creates an orphan.
pub fn apply(
    store: &mut EntityStore,
    event_id: EventId,
    participant_id: ParticipantId,
    candidate: Option<f64>,
) -> Result<(UpsertOutcome, Option<StoredOp>), StoreError> {
    for (collection, id) in [
        (Collection::Events, event_id),
        (Collection::Participants, participant_id),
    ] {
        if store.collection_of(id) != Some(collection) {
            return Err(StoreError::MissingRecord { collection, id });
        }
    }

    let existing = store.score_for_pair(event_id, participant_id);
    match plan(existing, event_id, participant_id, candidate) {
        UpsertPlan::Noop => Ok((UpsertOutcome::Unchanged, None)),
        UpsertPlan::Create(draft) => {
            let (id, stored) = store.create(Draft::Score(draft))?;
            Ok((UpsertOutcome::Created(id), Some(stored)))
        }
        UpsertPlan::Update { id, score } => {
            let stored = store.update(
                id,
                Patch::Score(ScorePatch {
                    score: Some(score),
                    timestamp: Some(now_ms()),
                }),
            )?;
            Ok((UpsertOutcome::Updated(id), Some(stored)))
        }
        UpsertPlan::Delete { id } => {
            let stored = store.delete(Collection::Scores, id);
            Ok((UpsertOutcome::Deleted(id), stored))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventDraft, ParticipantDraft};

    #[test]
    fn candidate_filter_accepts_unsigned_decimals() {
        assert_eq!(parse_candidate("12.5"), Ok(Some(12.5)));
        assert_eq!(parse_candidate("0"), Ok(Some(0.0)));
        assert_eq!(parse_candidate(""), Ok(None));
        assert_eq!(parse_candidate("  "), Ok(None));
        assert_eq!(parse_candidate(".5"), Ok(Some(0.5)));
    }

    #[test]
    fn candidate_filter_rejects_everything_else() {
        for raw in ["abc", "1.2.3", "-1", "1e3", ".", "12,5", "+4"] {
            assert!(parse_candidate(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn overflowing_digit_runs_are_rejected() {
        let huge = "9".repeat(400);
        assert_eq!(
            parse_candidate(&huge),
            Err(ValidationError::MalformedNumber { raw: huge.clone() })
        );
        assert!(parse_candidate(&format!("{huge}.5")).is_err());
        // Long but representable values still pass.
        assert!(parse_candidate(&"9".repeat(300)).unwrap().unwrap().is_finite());
    }

    #[test]
    fn create_update_delete_share_one_record() {
        let mut store = EntityStore::new();
        let (event, _) = store
            .create(Draft::Event(EventDraft {
                name: "Long jump".to_string(),
                kind: "field".to_string(),
            }))
            .unwrap();
        let (participant, _) = store
            .create(Draft::Participant(ParticipantDraft {
                name: "Ada".to_string(),
                house: None,
            }))
            .unwrap();

        let (created, _) = apply(&mut store, event, participant, Some(4.2)).unwrap();
        let UpsertOutcome::Created(id) = created else {
            panic!("expected create, got {created:?}");
        };

        let (updated, _) = apply(&mut store, event, participant, Some(4.6)).unwrap();
        assert_eq!(updated, UpsertOutcome::Updated(id));
        assert_eq!(store.score(id).unwrap().score, 4.6);
        assert_eq!(store.count(Collection::Scores), 1);

        let (deleted, _) = apply(&mut store, event, participant, None).unwrap();
        assert_eq!(deleted, UpsertOutcome::Deleted(id));
        assert!(store.score(id).is_none());

        let (noop, op) = apply(&mut store, event, participant, None).unwrap();
        assert_eq!(noop, UpsertOutcome::Unchanged);
        assert!(op.is_none());
    }

    #[test]
    fn save_against_missing_parent_is_rejected() {
        let mut store = EntityStore::new();
        let err = apply(&mut store, 10, 11, Some(1.0)).unwrap_err();
        assert_eq!(
            err,
            StoreError::MissingRecord {
                collection: Collection::Events,
                id: 10
            }
        );
    }
}

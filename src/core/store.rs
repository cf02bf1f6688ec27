use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;

use crate::{
    op::{Op, StoredOp},
    record::{
        Draft, EventRecord, ParticipantRecord, Patch, Query, Record, ScoreFilter, ScoreRecord,
        Snapshot, normalize_house,
    },
    types::{Collection, EventId, OpSeq, ParticipantId, RecordId, ScoreId},
};

use super::indices::{VecIndex, remove_from_vec_index};

/// Writes the store refuses because they would break one of its invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("{collection} record {id} not found")]
    MissingRecord {
        /// Collection that was searched.
        collection: Collection,
        /// Id that was not found.
        id: RecordId,
    },
    /// A restored record reuses an id that is already taken.
    #[error("record {0} already exists")]
    AlreadyExists(RecordId),
    /// The pair already has a score; saves go through the upsert path.
    #[error("event {event_id} already has score {existing} for participant {participant_id}")]
    DuplicateScore {
        /// Event half of the pair.
        event_id: EventId,
        /// Participant half of the pair.
        participant_id: ParticipantId,
        /// Score currently stored for the pair.
        existing: ScoreId,
    },
    /// The id exists, but in another collection.
    #[error("record {id} is a {actual} record, not {expected}")]
    WrongCollection {
        /// Offending id.
        id: RecordId,
        /// Collection the caller asked for.
        expected: Collection,
        /// Collection that actually holds the id.
        actual: Collection,
    },
    /// Scores must be finite and not negative.
    #[error("score {id} must be a finite, non-negative number")]
    InvalidScore {
        /// Score being written.
        id: ScoreId,
    },
}

/// Full contents of an [`EntityStore`], in creation order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreSnapshot {
    /// Id the next created record receives.
    pub next_record_id: RecordId,
    /// Every event.
    pub events: Vec<EventRecord>,
    /// Every participant.
    pub participants: Vec<ParticipantRecord>,
    /// Every score, orphans included.
    pub scores: Vec<ScoreRecord>,
}

/// Authoritative copy of the three shared collections.
///
/// Every mutation returns the [`StoredOp`] describing it and also queues it
/// for [`EntityStore::drain_pending_ops`]. Deleting a missing record is a
/// no-op. The store keeps at most one score per (event, participant) pair but
/// does not cascade deletes; see [`crate::cascade`].
#[derive(Debug, Default)]
pub struct EntityStore {
    events: HashMap<EventId, EventRecord>,
    participants: HashMap<ParticipantId, ParticipantRecord>,
    scores: HashMap<ScoreId, ScoreRecord>,
    event_order: Vec<EventId>,
    participant_order: Vec<ParticipantId>,
    score_order: Vec<ScoreId>,
    by_pair: HashMap<(EventId, ParticipantId), ScoreId>,
    by_event: VecIndex<EventId>,
    by_participant: VecIndex<ParticipantId>,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    next_record_id: RecordId,
}

impl EntityStore {
    /// An empty store; ids and op sequences start at 1.
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            next_record_id: 1,
            ..Self::default()
        }
    }

    /// Rebuilds a store from a snapshot, enforcing the same invariants as
    /// live writes: unique ids, one score per pair, finite scores.
    ///
    /// Scores whose parents are missing are kept; see
    /// [`EntityStore::orphan_scores`].
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let mut store = Self::new();

        let records = snapshot
            .events
            .into_iter()
            .map(Record::Event)
            .chain(snapshot.participants.into_iter().map(Record::Participant))
            .chain(snapshot.scores.into_iter().map(Record::Score));
        let mut highest = 0;
        for rec in records {
            highest = highest.max(rec.id());
            store.insert_record(rec)?;
        }

        store.next_record_id = snapshot.next_record_id.max(highest.saturating_add(1));
        Ok(store)
    }

    /// Copies the current contents out.
    pub fn export_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            next_record_id: self.next_record_id,
            events: self.events().into_iter().cloned().collect(),
            participants: self.participants().into_iter().cloned().collect(),
            scores: self.scores(ScoreFilter::all()).into_iter().cloned().collect(),
        }
    }

    /// Inserts a new record under a freshly issued id.
    ///
    /// Scores must reference a live event and participant, must not
    /// duplicate an existing pair, and must be finite and non-negative.
    pub fn create(&mut self, draft: Draft) -> Result<(RecordId, StoredOp), StoreError> {
        let id = self.next_record_id;
        let record = match draft {
            Draft::Event(d) => Record::Event(EventRecord {
                id,
                name: d.name,
                kind: d.kind,
            }),
            Draft::Participant(d) => Record::Participant(ParticipantRecord {
                id,
                name: d.name,
                house: normalize_house(d.house),
            }),
            Draft::Score(d) => {
                self.require(Collection::Events, d.event_id)?;
                self.require(Collection::Participants, d.participant_id)?;
                Record::Score(ScoreRecord {
                    id,
                    event_id: d.event_id,
                    participant_id: d.participant_id,
                    score: d.score,
                    timestamp: now_ms(),
                })
            }
        };

        self.insert_record(record.clone())?;
        self.next_record_id += 1;
        let stored = self.push_op(Op::Create { record });
        Ok((id, stored))
    }

    /// Applies a sparse patch to an existing record of the patch's
    /// collection.
    pub fn update(&mut self, id: RecordId, patch: Patch) -> Result<StoredOp, StoreError> {
        self.require(patch.collection(), id)?;
        let missing = StoreError::MissingRecord {
            collection: patch.collection(),
            id,
        };
        match &patch {
            Patch::Event(p) => p.apply_to(self.events.get_mut(&id).ok_or(missing)?),
            Patch::Participant(p) => p.apply_to(self.participants.get_mut(&id).ok_or(missing)?),
            Patch::Score(p) => {
                if p.score.is_some_and(|v| !valid_score(v)) {
                    return Err(StoreError::InvalidScore { id });
                }
                p.apply_to(self.scores.get_mut(&id).ok_or(missing)?)
            }
        }
        Ok(self.push_op(Op::Update { id, patch }))
    }

    /// Removes a record; `None` when it was already gone or `id` belongs to
    /// another collection.
    pub fn delete(&mut self, collection: Collection, id: RecordId) -> Option<StoredOp> {
        match collection {
            Collection::Events => {
                self.events.remove(&id)?;
                Self::remove_from_order(&mut self.event_order, id);
            }
            Collection::Participants => {
                self.participants.remove(&id)?;
                Self::remove_from_order(&mut self.participant_order, id);
            }
            Collection::Scores => {
                let rec = self.scores.remove(&id)?;
                self.by_pair.remove(&(rec.event_id, rec.participant_id));
                remove_from_vec_index(&mut self.by_event, &rec.event_id, id);
                remove_from_vec_index(&mut self.by_participant, &rec.participant_id, id);
                Self::remove_from_order(&mut self.score_order, id);
            }
        }
        Some(self.push_op(Op::Delete { collection, id }))
    }

    /// Clone of one record, looked up in `collection` only.
    pub fn get(&self, collection: Collection, id: RecordId) -> Option<Record> {
        match collection {
            Collection::Events => self.event(id).cloned().map(Record::Event),
            Collection::Participants => self.participant(id).cloned().map(Record::Participant),
            Collection::Scores => self.score(id).cloned().map(Record::Score),
        }
    }

    /// One event by id.
    pub fn event(&self, id: EventId) -> Option<&EventRecord> {
        self.events.get(&id)
    }

    /// One participant by id.
    pub fn participant(&self, id: ParticipantId) -> Option<&ParticipantRecord> {
        self.participants.get(&id)
    }

    /// One score by id.
    pub fn score(&self, id: ScoreId) -> Option<&ScoreRecord> {
        self.scores.get(&id)
    }

    /// The score stored for a pair, if any.
    pub fn score_for_pair(&self, event_id: EventId, participant_id: ParticipantId) -> Option<&ScoreRecord> {
        self.by_pair
            .get(&(event_id, participant_id))
            .and_then(|id| self.scores.get(id))
    }

    /// Events in creation order.
    pub fn events(&self) -> Vec<&EventRecord> {
        self.event_order
            .iter()
            .filter_map(|id| self.events.get(id))
            .collect()
    }

    /// Participants in creation order.
    pub fn participants(&self) -> Vec<&ParticipantRecord> {
        self.participant_order
            .iter()
            .filter_map(|id| self.participants.get(id))
            .collect()
    }

    /// Scores matching `filter`, in creation order.
    pub fn scores(&self, filter: ScoreFilter) -> Vec<&ScoreRecord> {
        let ids: &[ScoreId] = match (filter.event_id, filter.participant_id) {
            (Some(event_id), _) => self
                .by_event
                .get(&event_id)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            (None, Some(participant_id)) => self
                .by_participant
                .get(&participant_id)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            (None, None) => self.score_order.as_slice(),
        };
        ids.iter()
            .filter_map(|id| self.scores.get(id))
            .filter(|rec| filter.matches(rec))
            .collect()
    }

    /// Full current result set of `query`.
    pub fn query(&self, query: &Query) -> Snapshot {
        match query {
            Query::Events => Snapshot::Events(self.events().into_iter().cloned().collect()),
            Query::Participants => {
                Snapshot::Participants(self.participants().into_iter().cloned().collect())
            }
            Query::Scores(filter) => {
                Snapshot::Scores(self.scores(*filter).into_iter().cloned().collect())
            }
        }
    }

    /// Scores whose event or participant no longer exists.
    pub fn orphan_scores(&self) -> Vec<ScoreId> {
        self.score_order
            .iter()
            .filter_map(|id| self.scores.get(id))
            .filter(|rec| {
                !self.events.contains_key(&rec.event_id)
                    || !self.participants.contains_key(&rec.participant_id)
            })
            .map(|rec| rec.id)
            .collect()
    }

    /// Fails on the first score whose event or participant id names a record
    /// of the wrong collection. Missing parents are not an error.
    pub fn check_references(&self) -> Result<(), StoreError> {
        for rec in self.scores(ScoreFilter::all()) {
            for (expected, id) in [
                (Collection::Events, rec.event_id),
                (Collection::Participants, rec.participant_id),
            ] {
                match self.collection_of(id) {
                    Some(actual) if actual != expected => {
                        return Err(StoreError::WrongCollection { id, expected, actual });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Number of records in `collection`.
    pub fn count(&self, collection: Collection) -> usize {
        match collection {
            Collection::Events => self.events.len(),
            Collection::Participants => self.participants.len(),
            Collection::Scores => self.scores.len(),
        }
    }

    /// Collection currently holding `id`.
    pub fn collection_of(&self, id: RecordId) -> Option<Collection> {
        if self.events.contains_key(&id) {
            Some(Collection::Events)
        } else if self.participants.contains_key(&id) {
            Some(Collection::Participants)
        } else if self.scores.contains_key(&id) {
            Some(Collection::Scores)
        } else {
            None
        }
    }

    /// Takes the ops applied since the last drain, oldest first.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Sequence of the most recent op; 0 before the first mutation.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn require(&self, expected: Collection, id: RecordId) -> Result<(), StoreError> {
        match self.collection_of(id) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(StoreError::WrongCollection { id, expected, actual }),
            None => Err(StoreError::MissingRecord {
                collection: expected,
                id,
            }),
        }
    }

    fn push_op(&mut self, op: Op) -> StoredOp {
        let stored = StoredOp {
            seq: self.next_op_seq,
            op,
        };
        self.next_op_seq += 1;
        self.pending_ops.push(stored.clone());
        stored
    }

    fn insert_record(&mut self, record: Record) -> Result<(), StoreError> {
        let id = record.id();
        if self.collection_of(id).is_some() {
            return Err(StoreError::AlreadyExists(id));
        }

        match record {
            Record::Event(rec) => {
                self.event_order.push(id);
                self.events.insert(id, rec);
            }
            Record::Participant(rec) => {
                self.participant_order.push(id);
                self.participants.insert(id, rec);
            }
            Record::Score(rec) => {
                if !valid_score(rec.score) {
                    return Err(StoreError::InvalidScore { id });
                }
                let pair = (rec.event_id, rec.participant_id);
                if let Some(existing) = self.by_pair.get(&pair) {
                    return Err(StoreError::DuplicateScore {
                        event_id: rec.event_id,
                        participant_id: rec.participant_id,
                        existing: *existing,
                    });
                }
                self.by_pair.insert(pair, id);
                self.by_event.entry(rec.event_id).or_default().push(id);
                self.by_participant
                    .entry(rec.participant_id)
                    .or_default()
                    .push(id);
                self.score_order.push(id);
                self.scores.insert(id, rec);
            }
        }
        Ok(())
    }

    fn remove_from_order(order: &mut Vec<RecordId>, id: RecordId) {
        if let Some(pos) = order.iter().position(|x| *x == id) {
            order.remove(pos);
        }
    }
}

fn valid_score(score: f64) -> bool {
    score.is_finite() && score >= 0.0
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

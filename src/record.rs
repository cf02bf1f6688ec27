//! Event, participant, and score records with their drafts and patches.

use serde::{Deserialize, Serialize};

use crate::types::{Collection, EventId, ParticipantId, RecordId, ScoreId};

/// Input rejected before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required text field was empty or whitespace.
    #[error("{field} must not be empty")]
    EmptyField {
        /// Name of the offending field.
        field: &'static str,
    },
    /// A score candidate was not an unsigned decimal number.
    #[error("invalid score value {raw:?}: expected an unsigned decimal number")]
    MalformedNumber {
        /// Candidate as typed by the caller.
        raw: String,
    },
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(())
}

/// A competition event such as "100m sprint".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Store-assigned id.
    pub id: EventId,
    /// Display name.
    pub name: String,
    /// Event type, e.g. "track" or "field".
    #[serde(rename = "type")]
    pub kind: String,
}

/// Insert payload for an [`EventRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    /// Display name.
    pub name: String,
    /// Event type.
    pub kind: String,
}

impl EventDraft {
    /// Rejects empty name or type.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        require_text("type", &self.kind)
    }
}

/// Sparse event update; each `Some` field overwrites the record value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventPatch {
    /// Optional rename.
    pub name: Option<String>,
    /// Optional retype.
    pub kind: Option<String>,
}

impl EventPatch {
    /// Rejects fields that are present but empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(kind) = &self.kind {
            require_text("type", kind)?;
        }
        Ok(())
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut EventRecord) {
        if let Some(v) = &self.name {
            rec.name = v.clone();
        }
        if let Some(v) = &self.kind {
            rec.kind = v.clone();
        }
    }
}

/// A competitor, optionally belonging to a house.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    /// Store-assigned id.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
    /// House or team, if any.
    pub house: Option<String>,
}

/// Insert payload for a [`ParticipantRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantDraft {
    /// Display name.
    pub name: String,
    /// House or team, if any.
    pub house: Option<String>,
}

impl ParticipantDraft {
    /// Rejects an empty name. Blank houses are normalized away.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)
    }
}

/// Sparse participant update.
///
/// A blank `house` clears it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantPatch {
    /// Optional rename.
    pub name: Option<String>,
    /// Optional house replacement.
    pub house: Option<String>,
}

impl ParticipantPatch {
    /// Rejects a present but empty name.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        Ok(())
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut ParticipantRecord) {
        if let Some(v) = &self.name {
            rec.name = v.clone();
        }
        if let Some(v) = &self.house {
            rec.house = normalize_house(Some(v.clone()));
        }
    }
}

pub(crate) fn normalize_house(house: Option<String>) -> Option<String> {
    house.filter(|h| !h.trim().is_empty())
}

/// The score of one participant in one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    /// Store-assigned id.
    pub id: ScoreId,
    /// Event the score belongs to.
    pub event_id: EventId,
    /// Participant who achieved it.
    pub participant_id: ParticipantId,
    /// Numeric result.
    pub score: f64,
    /// Creation or last update, in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Insert payload for a [`ScoreRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreDraft {
    /// Event the score belongs to.
    pub event_id: EventId,
    /// Participant who achieved it.
    pub participant_id: ParticipantId,
    /// Numeric result.
    pub score: f64,
}

/// Sparse score update. The (event, participant) pair is immutable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScorePatch {
    /// Optional new value.
    pub score: Option<f64>,
    /// Optional new timestamp.
    pub timestamp: Option<u64>,
}

impl ScorePatch {
    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut ScoreRecord) {
        if let Some(v) = self.score {
            rec.score = v;
        }
        if let Some(v) = self.timestamp {
            rec.timestamp = v;
        }
    }
}

/// Any record from any collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// An event.
    Event(EventRecord),
    /// A participant.
    Participant(ParticipantRecord),
    /// A score.
    Score(ScoreRecord),
}

impl Record {
    /// Store-assigned id of the wrapped record.
    pub fn id(&self) -> RecordId {
        match self {
            Self::Event(r) => r.id,
            Self::Participant(r) => r.id,
            Self::Score(r) => r.id,
        }
    }

    /// Collection the record lives in.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Event(_) => Collection::Events,
            Self::Participant(_) => Collection::Participants,
            Self::Score(_) => Collection::Scores,
        }
    }
}

/// Insert payload for any collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    /// New event.
    Event(EventDraft),
    /// New participant.
    Participant(ParticipantDraft),
    /// New score. Prefer the upsert path, which never duplicates a pair.
    Score(ScoreDraft),
}

impl Draft {
    /// Collection the draft targets.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Event(_) => Collection::Events,
            Self::Participant(_) => Collection::Participants,
            Self::Score(_) => Collection::Scores,
        }
    }

    /// Checks required fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Event(d) => d.validate(),
            Self::Participant(d) => d.validate(),
            Self::Score(d) if !d.score.is_finite() || d.score < 0.0 => {
                Err(ValidationError::MalformedNumber {
                    raw: d.score.to_string(),
                })
            }
            Self::Score(_) => Ok(()),
        }
    }
}

/// Sparse update for any collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Patch {
    /// Event update.
    Event(EventPatch),
    /// Participant update.
    Participant(ParticipantPatch),
    /// Score update.
    Score(ScorePatch),
}

impl Patch {
    /// Collection the patch targets.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Event(_) => Collection::Events,
            Self::Participant(_) => Collection::Participants,
            Self::Score(_) => Collection::Scores,
        }
    }

    /// Checks fields that are present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Event(p) => p.validate(),
            Self::Participant(p) => p.validate(),
            Self::Score(p) => match p.score {
                Some(v) if !v.is_finite() || v < 0.0 => Err(ValidationError::MalformedNumber {
                    raw: v.to_string(),
                }),
                _ => Ok(()),
            },
        }
    }
}

/// Which records a read or subscription covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    /// Every event.
    Events,
    /// Every participant.
    Participants,
    /// Scores matching a filter.
    Scores(ScoreFilter),
}

impl Query {
    /// Collection the query reads.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Events => Collection::Events,
            Self::Participants => Collection::Participants,
            Self::Scores(_) => Collection::Scores,
        }
    }
}

/// Equality filter on the score foreign keys. Empty matches all scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScoreFilter {
    /// Only scores for this event.
    pub event_id: Option<EventId>,
    /// Only scores for this participant.
    pub participant_id: Option<ParticipantId>,
}

impl ScoreFilter {
    /// Matches every score.
    pub fn all() -> Self {
        Self::default()
    }

    /// Scores of one event.
    pub fn for_event(event_id: EventId) -> Self {
        Self {
            event_id: Some(event_id),
            participant_id: None,
        }
    }

    /// Scores of one participant.
    pub fn for_participant(participant_id: ParticipantId) -> Self {
        Self {
            event_id: None,
            participant_id: Some(participant_id),
        }
    }

    /// True when `rec` satisfies every set constraint.
    pub fn matches(&self, rec: &ScoreRecord) -> bool {
        self.event_id.is_none_or(|id| rec.event_id == id)
            && self.participant_id.is_none_or(|id| rec.participant_id == id)
    }
}

/// Full current result set of a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Events in creation order.
    Events(Vec<EventRecord>),
    /// Participants in creation order.
    Participants(Vec<ParticipantRecord>),
    /// Scores in creation order.
    Scores(Vec<ScoreRecord>),
}

/// Record types that can be pulled out of a [`Snapshot`].
pub trait CollectionRecord: Clone + Send + Sync + 'static {
    /// Collection holding this record type.
    const COLLECTION: Collection;

    /// Records of this type in `snapshot`; empty when the snapshot is for
    /// another collection.
    fn from_snapshot(snapshot: &Snapshot) -> Vec<Self>;
}

impl CollectionRecord for EventRecord {
    const COLLECTION: Collection = Collection::Events;

    fn from_snapshot(snapshot: &Snapshot) -> Vec<Self> {
        match snapshot {
            Snapshot::Events(v) => v.clone(),
            _ => Vec::new(),
        }
    }
}

impl CollectionRecord for ParticipantRecord {
    const COLLECTION: Collection = Collection::Participants;

    fn from_snapshot(snapshot: &Snapshot) -> Vec<Self> {
        match snapshot {
            Snapshot::Participants(v) => v.clone(),
            _ => Vec::new(),
        }
    }
}

impl CollectionRecord for ScoreRecord {
    const COLLECTION: Collection = Collection::Scores;

    fn from_snapshot(snapshot: &Snapshot) -> Vec<Self> {
        match snapshot {
            Snapshot::Scores(v) => v.clone(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drafts_reject_blank_required_fields() {
        let draft = EventDraft {
            name: "  ".to_string(),
            kind: "track".to_string(),
        };
        assert_eq!(
            draft.validate(),
            Err(ValidationError::EmptyField { field: "name" })
        );

        let draft = ParticipantDraft {
            name: "Ada".to_string(),
            house: None,
        };
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn participant_patch_clears_blank_house() {
        let mut rec = ParticipantRecord {
            id: 1,
            name: "Ada".to_string(),
            house: Some("Red".to_string()),
        };
        ParticipantPatch {
            house: Some(" ".to_string()),
            ..ParticipantPatch::default()
        }
        .apply_to(&mut rec);
        assert_eq!(rec.house, None);
    }

    #[test]
    fn score_serializes_with_persisted_field_names() {
        let rec = ScoreRecord {
            id: 3,
            event_id: 1,
            participant_id: 2,
            score: 12.5,
            timestamp: 99,
        };
        let json = serde_json::to_value(&rec).expect("serialize");
        assert_eq!(json["eventId"], 1);
        assert_eq!(json["participantId"], 2);
        assert_eq!(json["score"], 12.5);
    }
}

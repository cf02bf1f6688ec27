use std::collections::BTreeSet;

use proptest::prelude::*;

use sportsday::{
    core::store::{EntityStore, StoreError},
    record::{Draft, EventDraft, ParticipantDraft, ParticipantRecord, ScoreDraft, ScoreFilter, ScoreRecord},
    standings::{event_ranking, overall_standings},
    types::{Collection, EventId, ParticipantId},
    upsert::{self, UpsertOutcome},
};

#[derive(Debug, Clone)]
enum Action {
    Save { event: u8, participant: u8, value: Option<u16> },
    RawCreate { event: u8, participant: u8, value: u16 },
    DeleteScore { target: u8 },
}

const EVENTS: u8 = 3;
const PARTICIPANTS: u8 = 4;

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (0..EVENTS, 0..PARTICIPANTS, prop::option::of(0u16..500))
            .prop_map(|(event, participant, value)| Action::Save { event, participant, value }),
        1 => (0..EVENTS, 0..PARTICIPANTS, 0u16..500)
            .prop_map(|(event, participant, value)| Action::RawCreate { event, participant, value }),
        1 => (0u8..32).prop_map(|target| Action::DeleteScore { target }),
    ]
}

fn seeded_store() -> (EntityStore, Vec<EventId>, Vec<ParticipantId>) {
    let mut store = EntityStore::new();
    let events: Vec<EventId> = (0..EVENTS)
        .map(|i| {
            store
                .create(Draft::Event(EventDraft {
                    name: format!("Event {i}"),
                    kind: "Track".to_string(),
                }))
                .expect("event")
                .0
        })
        .collect();
    let participants: Vec<ParticipantId> = (0..PARTICIPANTS)
        .map(|i| {
            store
                .create(Draft::Participant(ParticipantDraft {
                    name: format!("Pupil {i}"),
                    house: None,
                }))
                .expect("participant")
                .0
        })
        .collect();
    (store, events, participants)
}

fn score_strategy() -> impl Strategy<Value = Vec<(u8, u16)>> {
    prop::collection::vec((0u8..6, 0u16..20), 0..40)
}

fn records_from(raw: &[(u8, u16)]) -> Vec<ScoreRecord> {
    raw.iter()
        .enumerate()
        .map(|(idx, (participant, value))| ScoreRecord {
            id: idx as u64 + 1,
            event_id: 1,
            participant_id: u64::from(*participant),
            score: f64::from(*value),
            timestamp: 0,
        })
        .collect()
}

proptest! {
    #[test]
    fn random_saves_keep_one_score_per_pair(actions in prop::collection::vec(action_strategy(), 1..200)) {
        let (mut store, events, participants) = seeded_store();

        for action in actions {
            match action {
                Action::Save { event, participant, value } => {
                    let event_id = events[usize::from(event)];
                    let participant_id = participants[usize::from(participant)];
                    let before = store.score_for_pair(event_id, participant_id).map(|s| s.id);
                    let (outcome, _) = upsert::apply(&mut store, event_id, participant_id, value.map(f64::from))
                        .expect("parents exist");
                    match (before, outcome) {
                        (Some(id), UpsertOutcome::Updated(out)) | (Some(id), UpsertOutcome::Deleted(out)) => {
                            prop_assert_eq!(id, out);
                        }
                        (None, UpsertOutcome::Created(_)) | (None, UpsertOutcome::Unchanged) => {}
                        other => prop_assert!(false, "unexpected transition {other:?}"),
                    }
                }
                Action::RawCreate { event, participant, value } => {
                    let event_id = events[usize::from(event)];
                    let participant_id = participants[usize::from(participant)];
                    let existed = store.score_for_pair(event_id, participant_id).is_some();
                    let res = store.create(Draft::Score(ScoreDraft {
                        event_id,
                        participant_id,
                        score: f64::from(value),
                    }));
                    if existed {
                        let is_duplicate = matches!(res, Err(StoreError::DuplicateScore { .. }));
                        prop_assert!(is_duplicate);
                    } else {
                        prop_assert!(res.is_ok());
                    }
                }
                Action::DeleteScore { target } => {
                    let ids: Vec<u64> = store.scores(ScoreFilter::all()).iter().map(|s| s.id).collect();
                    if ids.is_empty() {
                        continue;
                    }
                    let id = ids[usize::from(target) % ids.len()];
                    prop_assert!(store.delete(Collection::Scores, id).is_some());
                    prop_assert!(store.delete(Collection::Scores, id).is_none());
                }
            }

            let all = store.scores(ScoreFilter::all());
            let pairs: BTreeSet<(u64, u64)> = all.iter().map(|s| (s.event_id, s.participant_id)).collect();
            prop_assert_eq!(pairs.len(), all.len());
            for score in &all {
                let indexed = store.score_for_pair(score.event_id, score.participant_id).map(|s| s.id);
                prop_assert_eq!(indexed, Some(score.id));
            }
            let per_event: usize = events
                .iter()
                .map(|id| store.scores(ScoreFilter::for_event(*id)).len())
                .sum();
            prop_assert_eq!(per_event, all.len());
        }
    }

    #[test]
    fn event_ranking_is_sorted_and_stable(raw in score_strategy()) {
        let scores = records_from(&raw);
        let ranked = event_ranking(&scores, 1);
        prop_assert_eq!(ranked.len(), scores.len());
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                prop_assert!(pair[0].id < pair[1].id, "ties keep input order");
            }
        }
    }

    #[test]
    fn overall_standings_preserve_totals(raw in score_strategy()) {
        let scores = records_from(&raw);
        let nobody: Vec<ParticipantRecord> = Vec::new();
        let table = overall_standings(&scores, &nobody);

        let distinct: BTreeSet<u64> = scores.iter().map(|s| s.participant_id).collect();
        prop_assert_eq!(table.len(), distinct.len());

        let grand: f64 = scores.iter().map(|s| s.score).sum();
        let totals: f64 = table.iter().map(|row| row.total_score).sum();
        prop_assert!((grand - totals).abs() < 1e-9);

        for (idx, row) in table.iter().enumerate() {
            prop_assert_eq!(row.rank, idx + 1);
            prop_assert_eq!(row.name.as_str(), "Unknown");
        }
        for pair in table.windows(2) {
            prop_assert!(pair[0].total_score >= pair[1].total_score);
        }
    }
}

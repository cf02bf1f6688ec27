use std::collections::HashSet;

use rusqlite::Connection;
use tempfile::TempDir;

use sportsday::{
    config::SportsDayConfig,
    core::store::{EntityStore, StoreError},
    persist::{DocumentSink, DocumentWrite, PersistError, sqlite::SqliteDocumentSink},
    record::{Draft, EventDraft, ParticipantDraft, ParticipantPatch, Patch, Record, ScoreFilter, ScoreRecord},
    types::Collection,
    upsert,
};

fn event(name: &str) -> Draft {
    Draft::Event(EventDraft {
        name: name.to_string(),
        kind: "Track".to_string(),
    })
}

fn participant(name: &str, house: &str) -> Draft {
    Draft::Participant(ParticipantDraft {
        name: name.to_string(),
        house: Some(house.to_string()),
    })
}

/// The writes the runtime would hand the sink for everything applied since
/// the last drain, newest state per record.
fn pending_writes(store: &mut EntityStore) -> Vec<DocumentWrite> {
    let ops = store.drain_pending_ops();
    let store: &EntityStore = store;
    let mut seen = HashSet::new();
    ops.iter()
        .filter(|stored| seen.insert((stored.op.collection(), stored.op.record_id())))
        .map(|stored| DocumentWrite::current(store, stored.op.collection(), stored.op.record_id()))
        .collect()
}

#[test]
fn documents_round_trip_state_and_order() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("docs.db");

    let mut store = EntityStore::new();
    let mut sink = SqliteDocumentSink::open(&db_path).expect("open sqlite");

    let (sprint, _) = store.create(event("Sprint")).expect("event");
    let (relay, _) = store.create(event("Relay")).expect("event");
    let (ana, _) = store.create(participant("Ana", "Red")).expect("participant");
    let (ben, _) = store.create(participant("Ben", "Blue")).expect("participant");
    upsert::apply(&mut store, sprint, ana, Some(11.9)).expect("score");
    upsert::apply(&mut store, relay, ben, Some(48.0)).expect("upsert");
    upsert::apply(&mut store, relay, ben, Some(47.5)).expect("upsert update");
    store
        .update(
            ben,
            Patch::Participant(ParticipantPatch {
                name: None,
                house: Some(String::new()),
            }),
        )
        .expect("clear house");
    store.delete(Collection::Events, sprint).expect("delete");

    let writes = pending_writes(&mut store);
    assert_eq!(writes.len(), 6);
    assert!(writes.contains(&DocumentWrite::Remove {
        collection: Collection::Events,
        id: sprint
    }));
    sink.write_batch(&writes).expect("write");
    drop(sink);

    let reloaded = SqliteDocumentSink::open(&db_path)
        .expect("reopen")
        .load_store()
        .expect("load");

    assert_eq!(reloaded.export_snapshot(), store.export_snapshot());
    assert_eq!(reloaded.participant(ben).expect("ben").house, None);
    assert_eq!(reloaded.score_for_pair(relay, ben).expect("score").score, 47.5);
    // The raw delete left the sprint score behind.
    assert_eq!(reloaded.orphan_scores().len(), 1);
}

#[test]
fn replace_all_rewrites_every_document() {
    let mut store = EntityStore::new();
    let mut sink = SqliteDocumentSink::open_in_memory().expect("open sqlite");

    let (event_id, _) = store.create(event("Cross Country")).expect("event");
    for i in 0..10u64 {
        let (pupil, _) = store.create(participant(&format!("Runner {i}"), "Green")).expect("participant");
        upsert::apply(&mut store, event_id, pupil, Some(600.0 + i as f64)).expect("score");
    }
    sink.write_batch(&pending_writes(&mut store)).expect("write");

    // Writes that never reached the sink are repaired by a full rewrite.
    let (late, _) = store.create(participant("Late Runner", "Red")).expect("participant");
    upsert::apply(&mut store, event_id, late, Some(720.0)).expect("score");
    store.delete(Collection::Participants, 2).expect("delete first runner");
    store.drain_pending_ops();
    assert_ne!(sink.read_snapshot().expect("read"), store.export_snapshot());

    sink.replace_all(&store.export_snapshot()).expect("replace");
    assert_eq!(sink.read_snapshot().expect("read"), store.export_snapshot());

    let reloaded = sink.load_store().expect("load");
    assert_eq!(reloaded.scores(ScoreFilter::for_event(event_id)).len(), 11);
    assert_eq!(reloaded.orphan_scores().len(), 1);
}

#[test]
fn stale_score_for_a_pair_gives_way_to_the_newest() {
    let mut sink = SqliteDocumentSink::open_in_memory().expect("open sqlite");
    let score = |id, value| {
        DocumentWrite::Put(Record::Score(ScoreRecord {
            id,
            event_id: 1,
            participant_id: 2,
            score: value,
            timestamp: 0,
        }))
    };

    // The removal of score 3 was lost before its replacement was written.
    sink.write_batch(&[score(3, 9.0)]).expect("write");
    sink.write_batch(&[score(7, 11.0)]).expect("write");

    let store = sink.load_store().expect("load");
    let kept = store.score_for_pair(1, 2).expect("score");
    assert_eq!((kept.id, kept.score), (7, 11.0));
    assert!(store.score(3).is_none());
}

fn seeded_database(tmp: &TempDir) -> std::path::PathBuf {
    let db_path = tmp.path().join("raw.db");
    drop(SqliteDocumentSink::open(&db_path).expect("create schema"));
    let conn = Connection::open(&db_path).expect("raw open");
    conn.execute_batch(
        "INSERT INTO events (id, name, type) VALUES (1, 'Sprint', 'Track');
         INSERT INTO participants (id, name, house) VALUES (2, 'Ana', 'Red');",
    )
    .expect("seed");
    db_path
}

#[test]
fn crossed_score_references_fail_the_load() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = seeded_database(&tmp);
    Connection::open(&db_path)
        .expect("raw open")
        .execute(
            "INSERT INTO scores (id, event_id, participant_id, score, timestamp) VALUES (3, 2, 1, 4.0, 0)",
            [],
        )
        .expect("insert");

    let err = SqliteDocumentSink::open(&db_path)
        .expect("open")
        .load_store()
        .expect_err("crossed references");
    assert!(matches!(
        err,
        PersistError::Inconsistent(StoreError::WrongCollection {
            id: 2,
            expected: Collection::Events,
            actual: Collection::Participants
        })
    ));
}

#[test]
fn non_finite_stored_score_fails_the_load() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = seeded_database(&tmp);
    Connection::open(&db_path)
        .expect("raw open")
        .execute(
            "INSERT INTO scores (id, event_id, participant_id, score, timestamp) VALUES (3, 1, 2, 1e999, 0)",
            [],
        )
        .expect("insert");

    let err = SqliteDocumentSink::open(&db_path)
        .expect("open")
        .load_store()
        .expect_err("infinite score");
    assert!(matches!(err, PersistError::Inconsistent(StoreError::InvalidScore { id: 3 })));
}

#[tokio::test]
async fn launched_runtime_persists_across_restarts() {
    let tmp = TempDir::new().expect("tmp");
    let config = SportsDayConfig {
        database_path: Some(tmp.path().join("sportsday.db")),
        ..SportsDayConfig::default()
    };

    let handle = config.launch().expect("launch").authenticate("official");
    let event_id = handle.create_event("Tug of War", "Team").await.expect("event");
    let pupil = handle.create_participant("Fin", Some("Blue".into())).await.expect("participant");
    handle.save_score(event_id, pupil, "3").await.expect("score");
    handle.checkpoint().await.expect("checkpoint");
    handle.save_score(event_id, pupil, "4.5").await.expect("score update");
    let scratch = handle.create_event("Scratch", "Fun").await.expect("event");
    assert!(handle.delete(Collection::Events, scratch).await.expect("delete"));
    assert!(handle.flush().await.expect("flush") >= 6);
    handle.shutdown().await.expect("shutdown");

    let handle = config.launch().expect("relaunch");
    let table = handle.standings().await.expect("standings");
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].name, "Fin");
    assert_eq!(table[0].total_score, 4.5);
    assert!(handle.get(Collection::Events, scratch).await.expect("get").is_none());

    // The deleted event's id is not handed out again.
    let official = handle.authenticate("official");
    let next = official.create_event("Sack Race", "Fun").await.expect("event");
    assert!(next > scratch);

    official.shutdown().await.expect("shutdown");
}

//! One table per collection, one row per record.
//!
//! Rows are written with `INSERT OR REPLACE`, so the `(event_id,
//! participant_id)` uniqueness constraint resolves a stale score for a pair in
//! favour of the newest write. Loading runs the rows back through
//! [`EntityStore::from_snapshot`] and [`EntityStore::check_references`].

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{
    core::store::{EntityStore, StoreSnapshot},
    record::{EventRecord, ParticipantRecord, Record, ScoreRecord},
    types::{Collection, RecordId},
};

use super::{DocumentSink, DocumentWrite, PersistResult};

const NEXT_RECORD_ID: &str = "next_record_id";

/// SQLite implementation of [`DocumentSink`].
pub struct SqliteDocumentSink {
    conn: Connection,
}

impl SqliteDocumentSink {
    /// Opens or creates a database at `path` in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Builds a store from the stored documents.
    ///
    /// Fails with [`super::PersistError::Inconsistent`] when two scores share
    /// a pair, a score is not finite, or a score points at a record of the
    /// wrong collection. Orphaned scores load and are logged.
    pub fn load_store(&self) -> PersistResult<EntityStore> {
        let store = EntityStore::from_snapshot(self.read_snapshot()?)?;
        store.check_references()?;

        let orphans = store.orphan_scores().len();
        if orphans > 0 {
            tracing::warn!(orphans, "loaded scores whose event or participant is gone");
        }
        tracing::debug!(
            events = store.count(Collection::Events),
            participants = store.count(Collection::Participants),
            scores = store.count(Collection::Scores),
            "documents loaded"
        );
        Ok(store)
    }

    /// Every stored document, in id order.
    pub fn read_snapshot(&self) -> PersistResult<StoreSnapshot> {
        let events = self.rows("SELECT id, name, type FROM events ORDER BY id", |row| {
            Ok(EventRecord {
                id: row.get::<_, i64>(0)? as RecordId,
                name: row.get(1)?,
                kind: row.get(2)?,
            })
        })?;
        let participants = self.rows("SELECT id, name, house FROM participants ORDER BY id", |row| {
            Ok(ParticipantRecord {
                id: row.get::<_, i64>(0)? as RecordId,
                name: row.get(1)?,
                house: row.get(2)?,
            })
        })?;
        let scores = self.rows(
            "SELECT id, event_id, participant_id, score, timestamp FROM scores ORDER BY id",
            |row| {
                Ok(ScoreRecord {
                    id: row.get::<_, i64>(0)? as RecordId,
                    event_id: row.get::<_, i64>(1)? as RecordId,
                    participant_id: row.get::<_, i64>(2)? as RecordId,
                    score: row.get(3)?,
                    timestamp: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;

        let next_record_id = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![NEXT_RECORD_ID], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?
            .map_or(1, |v| v as RecordId);

        Ok(StoreSnapshot {
            next_record_id,
            events,
            participants,
            scores,
        })
    }

    fn rows<T>(&self, sql: &str, map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>) -> PersistResult<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], map)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl DocumentSink for SqliteDocumentSink {
    fn write_batch(&mut self, writes: &[DocumentWrite]) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        let mut highest = 0;
        for write in writes {
            highest = highest.max(write.id());
            match write {
                DocumentWrite::Put(record) => put_record(&tx, record)?,
                DocumentWrite::Remove { collection, id } => remove_record(&tx, *collection, *id)?,
            }
        }
        // Ids of removed records must not come back after a restart.
        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = MAX(value, excluded.value)",
            params![NEXT_RECORD_ID, highest.saturating_add(1) as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn replace_all(&mut self, snapshot: &StoreSnapshot) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("DELETE FROM events; DELETE FROM participants; DELETE FROM scores;")?;

        let records = snapshot
            .events
            .iter()
            .cloned()
            .map(Record::Event)
            .chain(snapshot.participants.iter().cloned().map(Record::Participant))
            .chain(snapshot.scores.iter().cloned().map(Record::Score));
        for record in records {
            put_record(&tx, &record)?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![NEXT_RECORD_ID, snapshot.next_record_id as i64],
        )?;
        tx.commit()?;
        tracing::debug!(next_record_id = snapshot.next_record_id, "documents rewritten");
        Ok(())
    }
}

fn put_record(conn: &Connection, record: &Record) -> rusqlite::Result<()> {
    match record {
        Record::Event(r) => conn.execute(
            "INSERT OR REPLACE INTO events (id, name, type) VALUES (?1, ?2, ?3)",
            params![r.id as i64, r.name, r.kind],
        ),
        Record::Participant(r) => conn.execute(
            "INSERT OR REPLACE INTO participants (id, name, house) VALUES (?1, ?2, ?3)",
            params![r.id as i64, r.name, r.house],
        ),
        Record::Score(r) => conn.execute(
            "INSERT OR REPLACE INTO scores (id, event_id, participant_id, score, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                r.id as i64,
                r.event_id as i64,
                r.participant_id as i64,
                r.score,
                r.timestamp as i64
            ],
        ),
    }?;
    Ok(())
}

fn remove_record(conn: &Connection, collection: Collection, id: RecordId) -> rusqlite::Result<()> {
    let sql = match collection {
        Collection::Events => "DELETE FROM events WHERE id = ?1",
        Collection::Participants => "DELETE FROM participants WHERE id = ?1",
        Collection::Scores => "DELETE FROM scores WHERE id = ?1",
    };
    conn.execute(sql, params![id as i64])?;
    Ok(())
}

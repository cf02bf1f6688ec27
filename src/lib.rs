//! Live score aggregation and synchronization for a school sports day.
//!
//! A single store task owns every event, participant and score. Cloneable
//! [`runtime::handle::SportsDayHandle`]s send it commands, receive live
//! per-query [`runtime::subscription::Subscription`]s, and derive rankings
//! through [`standings`]. Applied mutations can be mirrored to SQLite, one row
//! per record, and loaded back on start.
//!
//! # Examples
//!
//! Pure aggregation over an [`core::store::EntityStore`]:
//! ```
//! use sportsday::{
//!     core::store::EntityStore,
//!     record::{Draft, EventDraft, ParticipantDraft, ScoreDraft, ScoreFilter},
//!     standings::overall_standings,
//! };
//!
//! let mut store = EntityStore::new();
//! let (event_id, _) = store
//!     .create(Draft::Event(EventDraft { name: "100m".into(), kind: "Track".into() }))
//!     .expect("event");
//! let (ana, _) = store
//!     .create(Draft::Participant(ParticipantDraft { name: "Ana".into(), house: Some("Red".into()) }))
//!     .expect("participant");
//! store
//!     .create(Draft::Score(ScoreDraft { event_id, participant_id: ana, score: 12.5 }))
//!     .expect("score");
//!
//! let table = overall_standings(store.scores(ScoreFilter::all()), store.participants());
//! assert_eq!(table[0].name, "Ana");
//! assert_eq!(table[0].total_score, 12.5);
//! ```
//!
//! Runtime usage with a SQLite database:
//! ```no_run
//! use sportsday::config::SportsDayConfig;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SportsDayConfig::parse(r#"{ "database_path": "sportsday.db" }"#).expect("config");
//! let handle = config.launch().expect("launch").authenticate("official@school");
//! let event = handle.create_event("Long Jump", "Field").await.expect("event");
//! let pupil = handle.create_participant("Ben", Some("Blue".into())).await.expect("participant");
//! handle.save_score(event, pupil, "4.2").await.expect("score");
//! let _standings = handle.standings().await.expect("standings");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Two-phase cascade deletes and orphan sweeping.
pub mod cascade;
/// JSON configuration loading.
pub mod config;
/// Core in-memory store and index helpers.
pub mod core;
/// Mutation op model.
pub mod op;
/// Document write-back abstraction and SQLite implementation.
pub mod persist;
/// Event, participant and score records, drafts, patches and queries.
pub mod record;
/// Single-writer runtime handle, change events and subscriptions.
pub mod runtime;
/// Event rankings and overall standings.
pub mod standings;
/// Stopwatch for timed results.
pub mod stopwatch;
/// Shared primitive types and enums.
pub mod types;
/// Score input filtering and the lookup-then-write upsert.
pub mod upsert;

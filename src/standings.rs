//! Per-event rankings and overall standings derived from the live score set.
//!
//! Everything here recomputes from scratch; nothing is cached between calls.

use hashbrown::HashMap;
use serde::Serialize;

use crate::{
    record::{ParticipantRecord, ScoreRecord},
    runtime::{
        handle::{RuntimeError, SportsDayHandle},
        subscription::Subscription,
    },
    types::{EventId, ParticipantId},
};

/// Name shown for a participant that no longer exists.
pub const UNKNOWN_NAME: &str = "Unknown";
/// House shown for a missing participant or one without a house.
pub const UNKNOWN_HOUSE: &str = "N/A";

/// One row of the overall leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    /// 1-based position in the sorted table.
    pub rank: usize,
    /// Participant the row totals.
    pub participant_id: ParticipantId,
    /// Participant name, or [`UNKNOWN_NAME`].
    pub name: String,
    /// Participant house, or [`UNKNOWN_HOUSE`].
    pub house: String,
    /// Sum of the participant's scores across all events.
    pub total_score: f64,
}

/// Scores of one event, best first.
///
/// Ties keep their input order.
pub fn event_ranking<'a, I>(scores: I, event_id: EventId) -> Vec<ScoreRecord>
where
    I: IntoIterator<Item = &'a ScoreRecord>,
{
    let mut ranked: Vec<ScoreRecord> = scores
        .into_iter()
        .filter(|s| s.event_id == event_id)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// Totals every participant that has at least one score and ranks them.
///
/// Groups appear in the order their first score appears, so equal totals keep
/// that order.
pub fn overall_standings<'a, S, P>(scores: S, participants: P) -> Vec<Standing>
where
    S: IntoIterator<Item = &'a ScoreRecord>,
    P: IntoIterator<Item = &'a ParticipantRecord>,
{
    let mut totals: Vec<(ParticipantId, f64)> = Vec::new();
    let mut slot: HashMap<ParticipantId, usize> = HashMap::new();
    for score in scores {
        match slot.get(&score.participant_id) {
            Some(&idx) => totals[idx].1 += score.score,
            None => {
                slot.insert(score.participant_id, totals.len());
                totals.push((score.participant_id, score.score));
            }
        }
    }

    let by_id: HashMap<ParticipantId, &ParticipantRecord> =
        participants.into_iter().map(|p| (p.id, p)).collect();

    let mut table: Vec<Standing> = totals
        .into_iter()
        .map(|(participant_id, total_score)| {
            let meta = by_id.get(&participant_id);
            Standing {
                rank: 0,
                participant_id,
                name: meta.map_or_else(|| UNKNOWN_NAME.to_string(), |p| p.name.clone()),
                house: meta
                    .and_then(|p| p.house.clone())
                    .unwrap_or_else(|| UNKNOWN_HOUSE.to_string()),
                total_score,
            }
        })
        .collect();

    table.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
    for (idx, row) in table.iter_mut().enumerate() {
        row.rank = idx + 1;
    }
    table
}

/// Leaderboard that recomputes whenever the score or participant collection
/// changes.
pub struct LiveStandings {
    scores: Subscription<ScoreRecord>,
    participants: Subscription<ParticipantRecord>,
    latest_scores: Vec<ScoreRecord>,
    latest_participants: Vec<ParticipantRecord>,
}

impl LiveStandings {
    /// Subscribes to all scores and participants and waits for the first
    /// snapshot of each.
    pub async fn open(handle: &SportsDayHandle) -> Result<Self, RuntimeError> {
        let mut scores = handle.subscribe_all_scores().await?;
        let mut participants = handle.subscribe_participants().await?;
        let latest_scores = scores.next().await.ok_or(RuntimeError::StoreUnavailable)?;
        let latest_participants = participants
            .next()
            .await
            .ok_or(RuntimeError::StoreUnavailable)?;
        Ok(Self {
            scores,
            participants,
            latest_scores,
            latest_participants,
        })
    }

    /// Standings for the most recent snapshots.
    pub fn current(&self) -> Vec<Standing> {
        overall_standings(&self.latest_scores, &self.latest_participants)
    }

    /// Waits for the next change and returns the recomputed standings.
    ///
    /// Returns `None` once the store has shut down.
    pub async fn next(&mut self) -> Option<Vec<Standing>> {
        tokio::select! {
            scores = self.scores.next() => self.latest_scores = scores?,
            participants = self.participants.next() => self.latest_participants = participants?,
        }
        Some(self.current())
    }

    /// Ranking of one event from the most recent score snapshot.
    pub fn event_ranking(&self, event_id: EventId) -> Vec<ScoreRecord> {
        event_ranking(&self.latest_scores, event_id)
    }
}

//! Two-phase deletes: remove the parent, then sweep the scores that point at
//! it.
//!
//! The phases are separate store round trips and are not atomic. Each store
//! request either applies fully or leaves the store unchanged, so a failure
//! after the parent is gone leaves exactly the not-yet-deleted scores behind.
//! That is reported through [`RuntimeError::PartialCascade`]. Every step is
//! idempotent, so re-running the cascade or calling [`sweep_orphans`] heals
//! the store.

use crate::{
    record::{Query, ScoreFilter, Snapshot},
    runtime::handle::{RuntimeError, SportsDayHandle},
    types::{Collection, EventId, ParticipantId, RecordId, ScoreId},
};

/// What a cascade actually removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CascadeReport {
    /// False when the parent was already gone.
    pub parent_deleted: bool,
    /// Dependent scores removed by this run.
    pub scores_deleted: usize,
}

/// Deletes event `id` and then every score recorded for it.
///
/// If the event delete itself fails nothing has changed and its error is
/// returned as is.
pub async fn delete_event(handle: &SportsDayHandle, id: EventId) -> Result<CascadeReport, RuntimeError> {
    cascade(handle, Collection::Events, id, ScoreFilter::for_event(id)).await
}

/// Deletes participant `id` and then every score they hold.
pub async fn delete_participant(handle: &SportsDayHandle, id: ParticipantId) -> Result<CascadeReport, RuntimeError> {
    cascade(handle, Collection::Participants, id, ScoreFilter::for_participant(id)).await
}

/// Deletes every score whose event or participant no longer exists.
pub async fn sweep_orphans(handle: &SportsDayHandle) -> Result<usize, RuntimeError> {
    let orphans = handle.orphan_scores().await?;
    let mut removed = 0;
    for id in orphans {
        if handle.delete(Collection::Scores, id).await? {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, "orphaned scores swept");
    }
    Ok(removed)
}

async fn cascade(
    handle: &SportsDayHandle,
    collection: Collection,
    parent_id: RecordId,
    dependents: ScoreFilter,
) -> Result<CascadeReport, RuntimeError> {
    let parent_deleted = handle.delete(collection, parent_id).await?;

    let ids: Vec<ScoreId> = match handle.read_all(Query::Scores(dependents)).await {
        Ok(Snapshot::Scores(scores)) => scores.iter().map(|s| s.id).collect(),
        Ok(_) => Vec::new(),
        Err(err) => return Err(partial(collection, parent_id, Vec::new(), err)),
    };

    let mut scores_deleted = 0;
    for (idx, id) in ids.iter().enumerate() {
        match handle.delete(Collection::Scores, *id).await {
            Ok(true) => scores_deleted += 1,
            Ok(false) => {}
            Err(err) => return Err(partial(collection, parent_id, ids[idx..].to_vec(), err)),
        }
    }

    tracing::debug!(%collection, parent_id, parent_deleted, scores_deleted, "cascade complete");
    Ok(CascadeReport {
        parent_deleted,
        scores_deleted,
    })
}

fn partial(collection: Collection, parent_id: RecordId, remaining: Vec<ScoreId>, source: RuntimeError) -> RuntimeError {
    tracing::warn!(
        %collection,
        parent_id,
        remaining = remaining.len(),
        error = %source,
        "cascade stopped after parent delete"
    );
    RuntimeError::PartialCascade {
        collection,
        parent_id,
        remaining,
        source: Box::new(source),
    }
}

use std::sync::Arc;

use hashbrown::HashMap;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, mpsc::error::TrySendError, oneshot, watch};

use crate::{
    cascade::{self, CascadeReport},
    core::store::{EntityStore, StoreError},
    persist::{DocumentSink, DocumentWrite, PersistError, PersistResult},
    record::{
        CollectionRecord, Draft, EventDraft, EventPatch, EventRecord, ParticipantDraft,
        ParticipantPatch, ParticipantRecord, Patch, Query, Record, ScoreFilter, ScoreRecord,
        Snapshot, ValidationError,
    },
    standings::{self, Standing},
    types::{Collection, EventId, OpSeq, ParticipantId, RecordId, ScoreId, SubscriptionId},
    upsert::{self, UpsertOutcome},
};

use super::{
    events::StoreEvent,
    subscription::{Subscriber, Subscription},
    write_back::{WriteBackMsg, spawn_write_back},
};

/// Errors returned by [`SportsDayHandle`] operations.
///
/// Apart from [`RuntimeError::PartialCascade`], an error means the store was
/// left unchanged.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Input rejected before reaching the store.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The store task has stopped or dropped the reply.
    #[error("store unavailable")]
    StoreUnavailable,
    /// The handle carries no caller identity.
    #[error("permission denied: caller is not authenticated")]
    PermissionDenied,
    /// Too many document writes are waiting for durable storage, so the
    /// mutation was refused.
    #[error("write-back queue is full; mutation not applied")]
    WriteBackFull,
    /// `remaining` lists the scores known to survive; it is empty when the
    /// dependent lookup itself failed.
    #[error("deleted {collection} record {parent_id} but not all of its scores")]
    PartialCascade {
        /// Collection of the deleted parent.
        collection: Collection,
        /// Deleted parent id.
        parent_id: RecordId,
        /// Dependent scores still stored.
        remaining: Vec<ScoreId>,
        /// Failure that stopped the sweep.
        #[source]
        source: Box<RuntimeError>,
    },
    /// The store refused the write.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Durable storage failed during a flush, checkpoint or load.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Queue sizes and write-back tuning for [`spawn_sportsday`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Commands buffered ahead of the store task.
    pub command_queue_bound: usize,
    /// Change events kept for slow [`SportsDayHandle::subscribe_changes`]
    /// listeners.
    pub event_queue_bound: usize,
    /// Document writes waiting for the write-back task. While it is full,
    /// mutations fail with [`RuntimeError::WriteBackFull`].
    pub write_back_queue_bound: usize,
    /// Distinct records buffered before a batch is written.
    pub write_back_batch_max: usize,
    /// Longest a buffered write waits for its batch.
    pub write_back_latency_ms: u64,
    /// Rewrite every stored document after this many mutations; 0 disables.
    pub checkpoint_every_ops: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_queue_bound: 256,
            event_queue_bound: 1024,
            write_back_queue_bound: 64,
            write_back_batch_max: 32,
            write_back_latency_ms: 75,
            checkpoint_every_ops: 2000,
        }
    }
}

/// Cloneable client of the store task.
///
/// Reads are open to everyone. Mutations need a caller identity, attached
/// with [`SportsDayHandle::authenticate`].
pub struct SportsDayHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<StoreEvent>,
    caller: Option<Arc<str>>,
}

impl Clone for SportsDayHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
            caller: self.caller.clone(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

pub(crate) enum Command {
    Create {
        draft: Draft,
        caller: Arc<str>,
        resp: Reply<RecordId>,
    },
    Update {
        id: RecordId,
        patch: Patch,
        caller: Arc<str>,
        resp: Reply<()>,
    },
    Delete {
        collection: Collection,
        id: RecordId,
        caller: Arc<str>,
        resp: Reply<bool>,
    },
    SaveScore {
        event_id: EventId,
        participant_id: ParticipantId,
        candidate: Option<f64>,
        caller: Arc<str>,
        resp: Reply<UpsertOutcome>,
    },
    Get {
        collection: Collection,
        id: RecordId,
        resp: oneshot::Sender<Option<Record>>,
    },
    ReadAll {
        query: Query,
        resp: oneshot::Sender<Snapshot>,
    },
    Subscribe {
        query: Query,
        resp: oneshot::Sender<(SubscriptionId, watch::Receiver<Snapshot>)>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Standings {
        resp: oneshot::Sender<Vec<Standing>>,
    },
    EventRanking {
        event_id: EventId,
        resp: oneshot::Sender<Vec<ScoreRecord>>,
    },
    OrphanScores {
        resp: oneshot::Sender<Vec<ScoreId>>,
    },
    Flush {
        resp: Reply<OpSeq>,
    },
    Checkpoint {
        resp: Reply<()>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

/// Starts the store task and returns an unauthenticated handle to it.
///
/// With a `sink`, every applied mutation is also written back to it by a
/// separate task; otherwise each change is reported durable at once.
pub fn spawn_sportsday(
    store: EntityStore,
    sink: Option<Box<dyn DocumentSink>>,
    config: RuntimeConfig,
) -> SportsDayHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound);
    let (events_tx, _) = broadcast::channel::<StoreEvent>(config.event_queue_bound);

    let write_back = sink.map(|sink| {
        let (tx, rx) = mpsc::channel::<WriteBackMsg>(config.write_back_queue_bound);
        spawn_write_back(sink, rx, events_tx.clone(), &config);
        tx
    });

    tracing::info!(
        events = store.count(Collection::Events),
        participants = store.count(Collection::Participants),
        scores = store.count(Collection::Scores),
        persistent = write_back.is_some(),
        "store task starting"
    );

    let mut writer = Writer {
        store,
        subscribers: HashMap::new(),
        next_subscription_id: 1,
        events_tx: events_tx.clone(),
        write_back,
        config,
        ops_since_checkpoint: 0,
    };

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if writer.handle_command(cmd).await {
                break;
            }
        }
        tracing::info!("store task stopped");
    });

    SportsDayHandle {
        cmd_tx,
        events_tx,
        caller: None,
    }
}

impl SportsDayHandle {
    /// Returns a handle that mutates on behalf of `caller`.
    ///
    /// A blank identity leaves the handle unauthenticated.
    pub fn authenticate(&self, caller: impl Into<String>) -> Self {
        let caller: String = caller.into();
        Self {
            caller: (!caller.trim().is_empty()).then(|| Arc::from(caller)),
            ..self.clone()
        }
    }

    /// Identity attached by [`SportsDayHandle::authenticate`].
    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// Raw change notifications, one per applied mutation.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    /// Validates `draft` and inserts it; returns the new id.
    pub async fn create(&self, draft: Draft) -> Result<RecordId, RuntimeError> {
        draft.validate()?;
        let caller = self.require_caller()?;
        self.request(|resp| Command::Create { draft, caller, resp }).await?
    }

    /// Validates `patch` and applies it to record `id`.
    pub async fn update(&self, id: RecordId, patch: Patch) -> Result<(), RuntimeError> {
        patch.validate()?;
        let caller = self.require_caller()?;
        self.request(|resp| Command::Update {
            id,
            patch,
            caller,
            resp,
        })
        .await?
    }

    /// Deletes one record without touching dependents.
    ///
    /// Returns `false` when the record was already gone. Use
    /// [`SportsDayHandle::delete_event`] or
    /// [`SportsDayHandle::delete_participant`] to cascade.
    pub async fn delete(&self, collection: Collection, id: RecordId) -> Result<bool, RuntimeError> {
        let caller = self.require_caller()?;
        self.request(|resp| Command::Delete {
            collection,
            id,
            caller,
            resp,
        })
        .await?
    }

    /// One record by collection and id.
    pub async fn get(&self, collection: Collection, id: RecordId) -> Result<Option<Record>, RuntimeError> {
        self.request(|resp| Command::Get { collection, id, resp }).await
    }

    /// One-off read of a query's full result set.
    pub async fn read_all(&self, query: Query) -> Result<Snapshot, RuntimeError> {
        self.request(|resp| Command::ReadAll { query, resp }).await
    }

    /// Creates an event.
    pub async fn create_event(&self, name: impl Into<String>, kind: impl Into<String>) -> Result<EventId, RuntimeError> {
        self.create(Draft::Event(EventDraft {
            name: name.into(),
            kind: kind.into(),
        }))
        .await
    }

    /// Renames or retypes an event.
    pub async fn update_event(&self, id: EventId, patch: EventPatch) -> Result<(), RuntimeError> {
        self.update(id, Patch::Event(patch)).await
    }

    /// Deletes the event, then every score referencing it.
    pub async fn delete_event(&self, id: EventId) -> Result<CascadeReport, RuntimeError> {
        cascade::delete_event(self, id).await
    }

    /// Creates a participant; a blank house is stored as none.
    pub async fn create_participant(
        &self,
        name: impl Into<String>,
        house: Option<String>,
    ) -> Result<ParticipantId, RuntimeError> {
        self.create(Draft::Participant(ParticipantDraft {
            name: name.into(),
            house,
        }))
        .await
    }

    /// Renames a participant or changes their house.
    pub async fn update_participant(&self, id: ParticipantId, patch: ParticipantPatch) -> Result<(), RuntimeError> {
        self.update(id, Patch::Participant(patch)).await
    }

    /// Deletes the participant, then every score referencing it.
    pub async fn delete_participant(&self, id: ParticipantId) -> Result<CascadeReport, RuntimeError> {
        cascade::delete_participant(self, id).await
    }

    /// Upserts the score for one pair from a raw candidate.
    ///
    /// Malformed candidates fail with [`RuntimeError::Validation`] before the
    /// store is contacted. An empty candidate clears the score.
    pub async fn save_score(
        &self,
        event_id: EventId,
        participant_id: ParticipantId,
        raw: &str,
    ) -> Result<UpsertOutcome, RuntimeError> {
        let candidate = upsert::parse_candidate(raw)?;
        let caller = self.require_caller()?;
        self.request(|resp| Command::SaveScore {
            event_id,
            participant_id,
            candidate,
            caller,
            resp,
        })
        .await?
    }

    /// Live list of every event.
    pub async fn subscribe_events(&self) -> Result<Subscription<EventRecord>, RuntimeError> {
        self.subscribe(Query::Events).await
    }

    /// Live list of every participant.
    pub async fn subscribe_participants(&self) -> Result<Subscription<ParticipantRecord>, RuntimeError> {
        self.subscribe(Query::Participants).await
    }

    /// Live list of the scores matching `filter`.
    pub async fn subscribe_scores(&self, filter: ScoreFilter) -> Result<Subscription<ScoreRecord>, RuntimeError> {
        self.subscribe(Query::Scores(filter)).await
    }

    /// Live list of one event's scores.
    pub async fn subscribe_scores_for_event(&self, event_id: EventId) -> Result<Subscription<ScoreRecord>, RuntimeError> {
        self.subscribe_scores(ScoreFilter::for_event(event_id)).await
    }

    /// Live list of every score.
    pub async fn subscribe_all_scores(&self) -> Result<Subscription<ScoreRecord>, RuntimeError> {
        self.subscribe_scores(ScoreFilter::all()).await
    }

    /// Overall standings computed from the store's current state.
    pub async fn standings(&self) -> Result<Vec<Standing>, RuntimeError> {
        self.request(|resp| Command::Standings { resp }).await
    }

    /// Scores of one event, best first, from the store's current state.
    pub async fn event_ranking(&self, event_id: EventId) -> Result<Vec<ScoreRecord>, RuntimeError> {
        self.request(|resp| Command::EventRanking { event_id, resp }).await
    }

    /// Ids of scores whose event or participant no longer exists.
    pub async fn orphan_scores(&self) -> Result<Vec<ScoreId>, RuntimeError> {
        self.request(|resp| Command::OrphanScores { resp }).await
    }

    /// Deletes every orphaned score; returns how many were removed.
    pub async fn sweep_orphans(&self) -> Result<usize, RuntimeError> {
        cascade::sweep_orphans(self).await
    }

    /// Writes every buffered document change and returns the highest op
    /// sequence now durable.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    /// Rewrites every stored document from the current state, repairing any
    /// write that failed earlier.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Checkpoint { resp }).await?
    }

    /// Flushes pending writes and stops the store task. Later requests fail
    /// with [`RuntimeError::StoreUnavailable`].
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }

    async fn subscribe<T: CollectionRecord>(&self, query: Query) -> Result<Subscription<T>, RuntimeError> {
        debug_assert_eq!(query.collection(), T::COLLECTION);
        let (id, rx) = self.request(|resp| Command::Subscribe { query, resp }).await?;
        Ok(Subscription::new(id, query, rx, self.cmd_tx.clone()))
    }

    fn require_caller(&self) -> Result<Arc<str>, RuntimeError> {
        self.caller.clone().ok_or(RuntimeError::PermissionDenied)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::StoreUnavailable)?;
        rx.await.map_err(|_| RuntimeError::StoreUnavailable)
    }
}

struct Writer {
    store: EntityStore,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    next_subscription_id: SubscriptionId,
    events_tx: broadcast::Sender<StoreEvent>,
    write_back: Option<mpsc::Sender<WriteBackMsg>>,
    config: RuntimeConfig,
    ops_since_checkpoint: usize,
}

impl Writer {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Create { draft, caller, resp } => {
                let collection = draft.collection();
                let res = self.mutate(|store| store.create(draft).map(|(id, _)| id));
                if let Ok(id) = &res {
                    tracing::debug!(%caller, id, %collection, "created");
                    self.maybe_auto_checkpoint().await;
                }
                let _ = resp.send(res);
            }
            Command::Update { id, patch, caller, resp } => {
                let collection = patch.collection();
                let res = self.mutate(|store| store.update(id, patch).map(|_| ()));
                if res.is_ok() {
                    tracing::debug!(%caller, id, %collection, "updated");
                    self.maybe_auto_checkpoint().await;
                }
                let _ = resp.send(res);
            }
            Command::Delete {
                collection,
                id,
                caller,
                resp,
            } => {
                // Already gone: answer without reserving write-back capacity,
                // so retried cascades succeed under backpressure.
                let res = if self.store.collection_of(id) == Some(collection) {
                    self.mutate(|store| Ok(store.delete(collection, id).is_some()))
                } else {
                    Ok(false)
                };
                match &res {
                    Ok(true) => {
                        tracing::debug!(%caller, id, %collection, "deleted");
                        self.maybe_auto_checkpoint().await;
                    }
                    Ok(false) => tracing::debug!(%caller, id, %collection, "delete of missing record ignored"),
                    Err(_) => {}
                }
                let _ = resp.send(res);
            }
            Command::SaveScore {
                event_id,
                participant_id,
                candidate,
                caller,
                resp,
            } => {
                let res = self.mutate(|store| {
                    upsert::apply(store, event_id, participant_id, candidate).map(|(outcome, _)| outcome)
                });
                if let Ok(outcome) = &res {
                    tracing::debug!(%caller, event_id, participant_id, ?outcome, "score saved");
                    self.maybe_auto_checkpoint().await;
                }
                let _ = resp.send(res);
            }
            Command::Get { collection, id, resp } => {
                let _ = resp.send(self.store.get(collection, id));
            }
            Command::ReadAll { query, resp } => {
                let _ = resp.send(self.store.query(&query));
            }
            Command::Subscribe { query, resp } => {
                let id = self.next_subscription_id;
                self.next_subscription_id += 1;
                let (tx, rx) = watch::channel(self.store.query(&query));
                self.subscribers.insert(id, Subscriber { query, tx });
                tracing::debug!(id, ?query, live = self.subscribers.len(), "subscribed");
                let _ = resp.send((id, rx));
            }
            Command::Unsubscribe { id } => {
                if self.subscribers.remove(&id).is_some() {
                    tracing::debug!(id, live = self.subscribers.len(), "unsubscribed");
                }
            }
            Command::Standings { resp } => {
                let scores = self.store.scores(ScoreFilter::all());
                let participants = self.store.participants();
                let _ = resp.send(standings::overall_standings(scores, participants));
            }
            Command::EventRanking { event_id, resp } => {
                let scores = self.store.scores(ScoreFilter::for_event(event_id));
                let _ = resp.send(standings::event_ranking(scores, event_id));
            }
            Command::OrphanScores { resp } => {
                let _ = resp.send(self.store.orphan_scores());
            }
            Command::Flush { resp } => {
                let out = match &self.write_back {
                    Some(tx) => ask_write_back(tx, |resp| WriteBackMsg::Flush { resp }).await,
                    None => Ok(self.store.latest_op_seq()),
                };
                let _ = resp.send(out);
            }
            Command::Checkpoint { resp } => {
                let out = self.checkpoint().await;
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                let out = match &self.write_back {
                    Some(tx) => {
                        let (done_tx, done_rx) = oneshot::channel();
                        match tx.send(WriteBackMsg::Shutdown { resp: done_tx }).await {
                            Ok(()) => done_rx.await.map_err(|_| RuntimeError::StoreUnavailable),
                            Err(_) => Err(RuntimeError::StoreUnavailable),
                        }
                    }
                    None => Ok(()),
                };
                self.subscribers.clear();
                let _ = resp.send(out);
                return true;
            }
        }

        false
    }

    /// Applies one store mutation once write-back capacity is secured, so a
    /// refused mutation leaves the store untouched.
    fn mutate<T>(&mut self, apply: impl FnOnce(&mut EntityStore) -> Result<T, StoreError>) -> Result<T, RuntimeError> {
        let permit = self.reserve_write_back()?;
        let out = apply(&mut self.store)?;
        self.commit(permit);
        Ok(out)
    }

    fn reserve_write_back(&self) -> Result<Option<mpsc::OwnedPermit<WriteBackMsg>>, RuntimeError> {
        let Some(tx) = &self.write_back else {
            return Ok(None);
        };
        match tx.clone().try_reserve_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("write-back queue full; mutation refused");
                Err(RuntimeError::WriteBackFull)
            }
            Err(TrySendError::Closed(_)) => Err(RuntimeError::StoreUnavailable),
        }
    }

    /// Announces the ops the store just applied to listeners and subscribers,
    /// then hands the changed documents to the write-back task.
    fn commit(&mut self, mut permit: Option<mpsc::OwnedPermit<WriteBackMsg>>) {
        for stored in self.store.drain_pending_ops() {
            let collection = stored.op.collection();
            let seq = stored.seq;

            let _ = self.events_tx.send(StoreEvent::from(&stored.op));
            self.publish(collection);
            self.ops_since_checkpoint += 1;

            let Some(tx) = &self.write_back else {
                let _ = self.events_tx.send(StoreEvent::DurableUpTo { op_seq: seq });
                continue;
            };
            let msg = WriteBackMsg::Write {
                seq,
                write: DocumentWrite::current(&self.store, collection, stored.op.record_id()),
            };
            match permit.take() {
                Some(permit) => {
                    let _ = permit.send(msg);
                }
                None => {
                    if let Err(err) = tx.try_send(msg) {
                        tracing::warn!(error = %err, seq, "document write dropped; next checkpoint restores it");
                    }
                }
            }
        }
    }

    fn publish(&mut self, collection: Collection) {
        let store = &self.store;
        self.subscribers.retain(|id, sub| {
            if sub.tx.is_closed() {
                tracing::debug!(id, "dropping closed subscription");
                return false;
            }
            if sub.query.collection() == collection {
                sub.publish(store.query(&sub.query));
            }
            true
        });
    }

    async fn checkpoint(&mut self) -> Result<(), RuntimeError> {
        let Some(tx) = &self.write_back else {
            return Ok(());
        };
        let snapshot = self.store.export_snapshot();
        let seq = self.store.latest_op_seq();
        ask_write_back(tx, |resp| WriteBackMsg::Checkpoint { snapshot, seq, resp }).await?;
        self.ops_since_checkpoint = 0;
        Ok(())
    }

    async fn maybe_auto_checkpoint(&mut self) {
        let every = self.config.checkpoint_every_ops;
        if every == 0 || self.ops_since_checkpoint < every {
            return;
        }
        if let Err(err) = self.checkpoint().await {
            tracing::warn!(error = %err, "automatic checkpoint failed");
        }
    }
}

async fn ask_write_back<T>(
    tx: &mpsc::Sender<WriteBackMsg>,
    make: impl FnOnce(oneshot::Sender<PersistResult<T>>) -> WriteBackMsg,
) -> Result<T, RuntimeError> {
    let (resp_tx, resp_rx) = oneshot::channel();
    tx.send(make(resp_tx))
        .await
        .map_err(|_| RuntimeError::StoreUnavailable)?;
    Ok(resp_rx.await.map_err(|_| RuntimeError::StoreUnavailable)??)
}

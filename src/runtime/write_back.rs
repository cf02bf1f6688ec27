//! Write-back task.
//!
//! Buffers document writes keyed by record, so a burst of saves to one score
//! costs a single row write, and hands each batch to the sink on a blocking
//! thread. A failed batch is logged and dropped: the store stays
//! authoritative and the next checkpoint rewrites every document.

use hashbrown::HashMap;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    core::store::StoreSnapshot,
    persist::{DocumentSink, DocumentWrite, PersistError, PersistResult},
    types::{Collection, OpSeq, RecordId},
};

use super::{events::StoreEvent, handle::RuntimeConfig};

pub(crate) enum WriteBackMsg {
    Write {
        seq: OpSeq,
        write: DocumentWrite,
    },
    Flush {
        resp: oneshot::Sender<PersistResult<OpSeq>>,
    },
    Checkpoint {
        snapshot: StoreSnapshot,
        seq: OpSeq,
        resp: oneshot::Sender<PersistResult<()>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

pub(crate) fn spawn_write_back(
    sink: Box<dyn DocumentSink>,
    rx: mpsc::Receiver<WriteBackMsg>,
    events_tx: broadcast::Sender<StoreEvent>,
    config: &RuntimeConfig,
) {
    let task = WriteBack {
        sink: Some(sink),
        pending: HashMap::new(),
        pending_seq: 0,
        durable: 0,
        batch_max: config.write_back_batch_max.max(1),
        latency: Duration::from_millis(config.write_back_latency_ms),
        events_tx,
    };
    tokio::spawn(task.run(rx));
}

struct WriteBack {
    /// `None` only while a blocking call holds it, or after that call panicked.
    sink: Option<Box<dyn DocumentSink>>,
    pending: HashMap<(Collection, RecordId), DocumentWrite>,
    pending_seq: OpSeq,
    durable: OpSeq,
    batch_max: usize,
    latency: Duration,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl WriteBack {
    async fn run(mut self, mut rx: mpsc::Receiver<WriteBackMsg>) {
        let mut deadline = Instant::now() + self.latency;
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(WriteBackMsg::Write { seq, write }) => {
                        if self.pending.is_empty() {
                            deadline = Instant::now() + self.latency;
                        }
                        self.pending.insert((write.collection(), write.id()), write);
                        self.pending_seq = seq;
                        if self.pending.len() >= self.batch_max {
                            let _ = self.write_pending().await;
                        }
                    }
                    Some(WriteBackMsg::Flush { resp }) => {
                        let res = self.write_pending().await.map(|()| self.durable);
                        let _ = resp.send(res);
                    }
                    Some(WriteBackMsg::Checkpoint { snapshot, seq, resp }) => {
                        let _ = resp.send(self.checkpoint(snapshot, seq).await);
                    }
                    Some(WriteBackMsg::Shutdown { resp }) => {
                        let _ = self.write_pending().await;
                        let _ = resp.send(());
                        break;
                    }
                    None => {
                        let _ = self.write_pending().await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline), if !self.pending.is_empty() => {
                    let _ = self.write_pending().await;
                }
            }
        }
        tracing::debug!(durable = self.durable, "write-back stopped");
    }

    async fn write_pending(&mut self) -> PersistResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let writes: Vec<DocumentWrite> = self.pending.drain().map(|(_, write)| write).collect();
        let seq = self.pending_seq;
        let count = writes.len();

        match self.with_sink(move |sink| sink.write_batch(&writes)).await {
            Ok(()) => {
                tracing::trace!(count, seq, "documents written");
                self.mark_durable(seq);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, count, seq, "document batch lost; next checkpoint restores it");
                Err(err)
            }
        }
    }

    async fn checkpoint(&mut self, snapshot: StoreSnapshot, seq: OpSeq) -> PersistResult<()> {
        // Everything buffered was applied before the snapshot was taken.
        self.pending.clear();
        self.with_sink(move |sink| sink.replace_all(&snapshot)).await?;
        tracing::debug!(seq, "checkpoint written");
        self.mark_durable(seq);
        Ok(())
    }

    fn mark_durable(&mut self, seq: OpSeq) {
        if seq > self.durable {
            self.durable = seq;
            let _ = self.events_tx.send(StoreEvent::DurableUpTo { op_seq: seq });
        }
    }

    async fn with_sink<T, F>(&mut self, call: F) -> PersistResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn DocumentSink) -> PersistResult<T> + Send + 'static,
    {
        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| PersistError::Worker("sink lost to an earlier panic".to_owned()))?;
        let (sink, res) = tokio::task::spawn_blocking(move || {
            let res = call(sink.as_mut());
            (sink, res)
        })
        .await
        .map_err(|err| PersistError::Worker(err.to_string()))?;
        self.sink = Some(sink);
        res
    }
}

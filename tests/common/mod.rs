#![allow(dead_code)]

use std::sync::{Arc, Mutex, mpsc as std_mpsc};

use tokio::sync::oneshot;

use sportsday::{
    core::store::StoreSnapshot,
    persist::{DocumentSink, DocumentWrite, PersistResult},
};

/// Sink whose first batch blocks until the test opens the gate, so the
/// write-back queue behind it can be filled on purpose.
pub struct GatedSink {
    pub written: Arc<Mutex<Vec<DocumentWrite>>>,
    entered: Option<oneshot::Sender<()>>,
    gate: Option<std_mpsc::Receiver<()>>,
}

pub struct Gate {
    /// Resolves once the first batch is being written.
    pub entered: oneshot::Receiver<()>,
    release: std_mpsc::Sender<()>,
}

impl Gate {
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

impl GatedSink {
    pub fn new() -> (Self, Gate) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let sink = Self {
            written: Arc::new(Mutex::new(Vec::new())),
            entered: Some(entered_tx),
            gate: Some(release_rx),
        };
        let gate = Gate {
            entered: entered_rx,
            release: release_tx,
        };
        (sink, gate)
    }
}

impl DocumentSink for GatedSink {
    fn write_batch(&mut self, writes: &[DocumentWrite]) -> PersistResult<()> {
        if let Some(entered) = self.entered.take() {
            let _ = entered.send(());
        }
        if let Some(gate) = self.gate.take() {
            let _ = gate.recv();
        }
        self.written.lock().expect("lock").extend_from_slice(writes);
        Ok(())
    }

    fn replace_all(&mut self, _snapshot: &StoreSnapshot) -> PersistResult<()> {
        Ok(())
    }
}

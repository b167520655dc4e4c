//! Background push of local writes to the remote store.

use std::collections::HashMap;
use std::io;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, debug_span};

use quill_core::document::Document;
use quill_core::remote::{Identity, RemoteError, RemoteStore};

pub(crate) enum SyncOp {
    Upsert(Document),
    Delete(String),
}

impl SyncOp {
    fn id(&self) -> &str {
        match self {
            Self::Upsert(doc) => &doc.id,
            Self::Delete(id) => id,
        }
    }
}

pub(crate) struct SyncJob {
    pub identity: Identity,
    pub op: SyncOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncKind {
    /// Carries the `updated_at` that was pushed.
    Upsert(i64),
    Delete,
}

pub(crate) struct SyncOutcome {
    pub id: String,
    pub kind: SyncKind,
    pub result: Result<(), RemoteError>,
    /// Jobs this outcome answers (older jobs for the same id are folded in).
    pub jobs: usize,
}

pub(crate) struct SyncWorker {
    tx: mpsc::Sender<SyncJob>,
    rx: Mutex<mpsc::Receiver<SyncOutcome>>,
}

impl SyncWorker {
    pub fn new(remote: Arc<dyn RemoteStore>) -> io::Result<Self> {
        let (work_tx, work_rx) = mpsc::channel::<SyncJob>();
        let (result_tx, result_rx) = mpsc::channel::<SyncOutcome>();
        thread::Builder::new()
            .name("quill-sync".into())
            .spawn(move || sync_worker(work_rx, result_tx, remote))?;
        Ok(Self {
            tx: work_tx,
            rx: Mutex::new(result_rx),
        })
    }

    /// Queue a job. Returns false when the worker is gone.
    pub fn submit(&self, job: SyncJob) -> bool {
        self.tx.send(job).is_ok()
    }

    pub fn try_recv(&self) -> Option<SyncOutcome> {
        let rx = self.rx.lock().ok()?;
        rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SyncOutcome> {
        let rx = self.rx.lock().ok()?;
        rx.recv_timeout(timeout).ok()
    }
}

fn sync_worker(
    rx: mpsc::Receiver<SyncJob>,
    tx: mpsc::Sender<SyncOutcome>,
    remote: Arc<dyn RemoteStore>,
) {
    while let Ok(first) = rx.recv() {
        // Drain and fold: only the newest job per document id is sent
        let mut order: Vec<String> = Vec::new();
        let mut batch: HashMap<String, (SyncJob, usize)> = HashMap::new();
        let mut queue = vec![first];
        while let Ok(next) = rx.try_recv() {
            queue.push(next);
        }
        for job in queue {
            let id = job.op.id().to_string();
            match batch.get_mut(&id) {
                Some((existing, count)) => {
                    *existing = job;
                    *count += 1;
                }
                None => {
                    order.push(id.clone());
                    batch.insert(id, (job, 1));
                }
            }
        }

        for id in order {
            let Some((job, jobs)) = batch.remove(&id) else {
                continue;
            };
            let _span = debug_span!("sync", %id).entered();
            let (kind, result) = match &job.op {
                SyncOp::Upsert(doc) => (
                    SyncKind::Upsert(doc.updated_at),
                    remote.upsert(&job.identity, doc),
                ),
                SyncOp::Delete(doc_id) => {
                    let result = match remote.delete(&job.identity, doc_id) {
                        Err(RemoteError::NotFound(_)) => Ok(()),
                        other => other,
                    };
                    (SyncKind::Delete, result)
                }
            };
            debug!(ok = result.is_ok(), jobs, "sync job done");
            if tx
                .send(SyncOutcome {
                    id,
                    kind,
                    result,
                    jobs,
                })
                .is_err()
            {
                return;
            }
        }
    }
}

//! Local-first document store.
//!
//! Every write lands in the local cache synchronously; documents owned by
//! the signed-in identity are then pushed to the remote store in the
//! background. Remote failures never surface from `save`/`delete`: the
//! write stays in the unsynced set and is pushed again with the next save.
//! Unsynced copies are also written to the identity's outbox blob so they
//! outlive sign-out and restarts.

mod autosave;
mod sync_worker;


use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use quill_core::document::{merge_newest, sort_recent, Document, UNTITLED};
use quill_core::local::{CacheError, CacheKey, LocalCache};
use quill_core::remote::{Identity, RemoteError, RemoteStore};

pub use autosave::Autosaver;

use sync_worker::{SyncJob, SyncKind, SyncOp, SyncOutcome, SyncWorker};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("not signed in")]
    NotSignedIn,
    #[error("document {0} belongs to another account")]
    WrongOwner(String),
    #[error("failed to start sync worker: {0}")]
    Worker(#[source] io::Error),
}

/// Result of merging anonymous documents into an account at sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Anonymous documents re-keyed to the identity.
    pub migrated: usize,
    /// Documents where the local copy won and was queued for upload.
    pub uploaded: usize,
    /// Documents in the account after the merge.
    pub total: usize,
    /// False when the merge ran against the local account cache.
    pub remote_reachable: bool,
}

pub struct DocumentStore {
    cache: Box<dyn LocalCache>,
    remote: Arc<dyn RemoteStore>,
    identity: Option<Identity>,
    sync: SyncWorker,
    /// Owned documents with a local write the remote has not acknowledged,
    /// keyed by id with the `updated_at` of that write.
    unsynced: HashMap<String, i64>,
    pending_deletes: HashSet<String>,
    /// Ids whose last push failed; re-sent with the next save.
    retry: HashSet<String>,
    /// Jobs sent to the sync worker and not yet answered.
    outstanding: usize,
}

impl DocumentStore {
    pub fn new(cache: Box<dyn LocalCache>, remote: Arc<dyn RemoteStore>) -> Result<Self, StoreError> {
        let sync = SyncWorker::new(Arc::clone(&remote)).map_err(StoreError::Worker)?;
        Ok(Self {
            cache,
            remote,
            identity: None,
            sync,
            unsynced: HashMap::new(),
            pending_deletes: HashSet::new(),
            retry: HashSet::new(),
            outstanding: 0,
        })
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_synced(&self, id: &str) -> bool {
        !self.unsynced.contains_key(id) && !self.pending_deletes.contains(id)
    }

    pub fn unsynced_count(&self) -> usize {
        self.unsynced.len() + self.pending_deletes.len()
    }

    /// A fresh, persisted "Untitled Document" owned by the current identity.
    pub fn create(&mut self) -> Result<Document, StoreError> {
        let doc = Document::new(self.identity.as_ref().map(|i| i.id.clone()));
        self.save(&doc)?;
        Ok(doc)
    }

    fn key_for(&self, doc: &Document) -> Result<CacheKey, StoreError> {
        match (&doc.owner_id, &self.identity) {
            (None, _) => Ok(CacheKey::Anonymous),
            (Some(owner), Some(identity)) if *owner == identity.id => {
                Ok(CacheKey::Identity(owner.clone()))
            }
            (Some(_), _) => Err(StoreError::WrongOwner(doc.id.clone())),
        }
    }

    fn visible_keys(&self) -> Vec<CacheKey> {
        let mut keys = vec![CacheKey::Anonymous];
        if let Some(identity) = &self.identity {
            keys.push(CacheKey::Identity(identity.id.clone()));
        }
        keys
    }

    /// Anonymous documents plus the signed-in identity's documents, newest
    /// first. The remote list is authoritative when reachable.
    pub fn list(&mut self) -> Result<Vec<Document>, StoreError> {
        self.poll();
        let mut docs = self.cache.load(&CacheKey::Anonymous)?;
        let Some(identity) = self.identity.clone() else {
            sort_recent(&mut docs);
            return Ok(docs);
        };

        let key = CacheKey::Identity(identity.id.clone());
        let local = self.cache.load(&key)?;
        match self.remote.list(&identity) {
            Ok(remote_docs) => {
                let remote_docs: Vec<Document> = remote_docs
                    .into_iter()
                    .filter(|d| !self.pending_deletes.contains(&d.id))
                    .collect();
                let unsynced_local: Vec<Document> = local
                    .into_iter()
                    .filter(|d| self.unsynced.contains_key(&d.id))
                    .collect();
                let (merged, kept_local) = merge_newest(remote_docs, unsynced_local);
                self.cache.store(&key, &merged)?;
                for doc in merged.iter().filter(|d| kept_local.contains(&d.id)) {
                    self.queue_upsert(&identity, doc);
                }
                self.write_outbox(&identity, &merged)?;
                debug!(count = merged.len(), requeued = kept_local.len(), "remote list merged");
                docs.extend(merged);
            }
            Err(e) => {
                warn!(error = %e, "remote list failed; using local cache");
                docs.extend(
                    local
                        .into_iter()
                        .filter(|d| d.owner_id.is_none() || d.is_owned_by(&identity.id)),
                );
            }
        }
        sort_recent(&mut docs);
        Ok(docs)
    }

    /// Look up one visible document in the local caches.
    pub fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        for key in self.visible_keys() {
            if let Some(doc) = self.cache.load(&key)?.into_iter().find(|d| d.id == id) {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    /// Write `doc` locally, then queue a remote upsert if it is owned by the
    /// signed-in identity. Returns the stored copy.
    pub fn save(&mut self, doc: &Document) -> Result<Document, StoreError> {
        let key = self.key_for(doc)?;
        let mut stored = doc.clone();
        if stored.title.trim().is_empty() {
            stored.title = UNTITLED.to_string();
        }

        let mut docs = self.cache.load(&key)?;
        match docs.iter_mut().find(|d| d.id == stored.id) {
            Some(existing) => *existing = stored.clone(),
            None => docs.push(stored.clone()),
        }
        self.cache.store(&key, &docs)?;
        debug!(id = %stored.id, ?key, "saved locally");

        self.poll();
        if let (CacheKey::Identity(_), Some(identity)) = (&key, self.identity.clone()) {
            self.queue_upsert(&identity, &stored);
            self.retry_failed(&identity, &docs);
            self.write_outbox(&identity, &docs)?;
        }
        Ok(stored)
    }

    /// Remove `id` locally; queue a remote delete if it was owned.
    /// Returns false when no visible document has that id.
    pub fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        for key in self.visible_keys() {
            let mut docs = self.cache.load(&key)?;
            let before = docs.len();
            docs.retain(|d| d.id != id);
            if docs.len() == before {
                continue;
            }
            self.cache.store(&key, &docs)?;
            debug!(%id, ?key, "deleted locally");
            if let (CacheKey::Identity(_), Some(identity)) = (&key, self.identity.clone()) {
                self.unsynced.remove(id);
                self.queue_delete(&identity, id);
                self.write_outbox(&identity, &docs)?;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Sign in: move anonymous documents into `identity`'s account, merging
    /// with what the account already holds and with writes left in its
    /// outbox by an earlier session. `Unauthorized` leaves the store
    /// anonymous and untouched.
    pub fn migrate_anonymous(&mut self, identity: Identity) -> Result<MigrationReport, StoreError> {
        let anonymous = self.cache.load(&CacheKey::Anonymous)?;
        let key = CacheKey::Identity(identity.id.clone());
        let outbox = self.cache.load(&CacheKey::Outbox(identity.id.clone()))?;
        let outbox_ids: Vec<String> = outbox.iter().map(|d| d.id.clone()).collect();

        let (account, remote_reachable) = match self.remote.list(&identity) {
            Ok(docs) => (docs, true),
            Err(RemoteError::Unauthorized) => {
                warn!(identity = %identity.id, "sign-in rejected by remote store");
                return Err(StoreError::Remote(RemoteError::Unauthorized));
            }
            Err(e) => {
                warn!(error = %e, "remote unreachable during sign-in; merging with local cache");
                (self.cache.load(&key)?, false)
            }
        };

        let (account, outbox_won) = merge_newest(account, outbox);
        let mut upload: HashSet<String> = outbox_won.into_iter().collect();
        if !remote_reachable {
            // the remote may not have seen any of them
            upload.extend(outbox_ids);
        }

        let migrated = anonymous.len();
        let rekeyed: Vec<Document> = anonymous
            .into_iter()
            .map(|mut d| {
                d.owner_id = Some(identity.id.clone());
                d
            })
            .collect();
        let (merged, anonymous_won) = merge_newest(account, rekeyed);
        upload.extend(anonymous_won);
        self.cache.store(&key, &merged)?;
        self.cache.remove(&CacheKey::Anonymous)?;
        self.identity = Some(identity.clone());

        let mut uploaded = 0;
        for doc in merged.iter().filter(|d| upload.contains(&d.id)) {
            self.queue_upsert(&identity, doc);
            uploaded += 1;
        }
        self.write_outbox(&identity, &merged)?;
        let report = MigrationReport {
            migrated,
            uploaded,
            total: merged.len(),
            remote_reachable,
        };
        info!(identity = %identity.id, ?report, "anonymous documents migrated");
        Ok(report)
    }

    /// Drop the identity. The account's local cache and outbox stay on disk
    /// for the next sign-in.
    pub fn sign_out(&mut self) {
        if let Some(identity) = self.identity.take() {
            info!(identity = %identity.id, "signed out");
        }
        self.unsynced.clear();
        self.pending_deletes.clear();
        self.retry.clear();
    }

    /// Push every owned document and pending delete now, waiting for each.
    /// Returns the number of documents pushed.
    pub fn sync_now(&mut self) -> Result<usize, StoreError> {
        let identity = self.identity.clone().ok_or(StoreError::NotSignedIn)?;
        self.poll();
        let deletes: Vec<String> = self.pending_deletes.iter().cloned().collect();
        for id in deletes {
            match self.remote.delete(&identity, &id) {
                Ok(()) | Err(RemoteError::NotFound(_)) => {
                    self.pending_deletes.remove(&id);
                    self.retry.remove(&id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        let docs = self.cache.load(&CacheKey::Identity(identity.id.clone()))?;
        for doc in &docs {
            self.remote.upsert(&identity, doc)?;
            self.unsynced.remove(&doc.id);
            self.retry.remove(&doc.id);
        }
        self.write_outbox(&identity, &docs)?;
        info!(count = docs.len(), "explicit sync complete");
        Ok(docs.len())
    }

    /// Delete every document in the account, remotely and locally.
    /// Returns the number the remote store removed.
    pub fn clear_account(&mut self) -> Result<usize, StoreError> {
        let identity = self.identity.clone().ok_or(StoreError::NotSignedIn)?;
        let count = self.remote.clear(&identity)?;
        self.cache.remove(&CacheKey::Identity(identity.id.clone()))?;
        self.cache.remove(&CacheKey::Outbox(identity.id.clone()))?;
        self.unsynced.clear();
        self.pending_deletes.clear();
        self.retry.clear();
        info!(count, "account cleared");
        Ok(count)
    }

    /// Apply sync acknowledgements that have arrived.
    pub fn poll(&mut self) {
        while let Some(outcome) = self.sync.try_recv() {
            self.apply_outcome(outcome);
        }
    }

    /// Block until every queued sync job is answered or `timeout` passes.
    /// Returns true when nothing is outstanding.
    pub fn wait_for_sync(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.outstanding > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.sync.recv_timeout(deadline - now) {
                Some(outcome) => self.apply_outcome(outcome),
                None => return self.outstanding == 0,
            }
        }
        true
    }

    fn apply_outcome(&mut self, outcome: SyncOutcome) {
        self.outstanding = self.outstanding.saturating_sub(outcome.jobs);
        match (&outcome.result, outcome.kind) {
            (Ok(()), SyncKind::Upsert(pushed_at)) => {
                if self
                    .unsynced
                    .get(&outcome.id)
                    .is_some_and(|local_at| *local_at <= pushed_at)
                {
                    self.unsynced.remove(&outcome.id);
                    self.refresh_outbox();
                }
            }
            (Ok(()), SyncKind::Delete) => {
                self.pending_deletes.remove(&outcome.id);
            }
            (Err(RemoteError::Unauthorized), _) => {
                warn!(id = %outcome.id, "remote rejected credentials; keeping local copy");
                self.retry.insert(outcome.id);
            }
            (Err(e), _) => {
                debug!(id = %outcome.id, error = %e, "sync failed; will retry");
                self.retry.insert(outcome.id);
            }
        }
    }

    /// Replace the outbox with the copies in `docs` that are still unsynced.
    fn write_outbox(&self, identity: &Identity, docs: &[Document]) -> Result<(), CacheError> {
        let key = CacheKey::Outbox(identity.id.clone());
        let pending: Vec<Document> = docs
            .iter()
            .filter(|d| self.unsynced.contains_key(&d.id))
            .cloned()
            .collect();
        if pending.is_empty() {
            self.cache.remove(&key)
        } else {
            self.cache.store(&key, &pending)
        }
    }

    fn refresh_outbox(&self) {
        let Some(identity) = &self.identity else {
            return;
        };
        let result = self
            .cache
            .load(&CacheKey::Identity(identity.id.clone()))
            .and_then(|docs| self.write_outbox(identity, &docs));
        if let Err(e) = result {
            warn!(error = %e, "failed to update outbox");
        }
    }

    fn submit(&mut self, job: SyncJob) {
        if self.sync.submit(job) {
            self.outstanding += 1;
        } else {
            warn!("sync worker stopped; write stays local");
        }
    }

    fn queue_upsert(&mut self, identity: &Identity, doc: &Document) {
        self.retry.remove(&doc.id);
        let at = self.unsynced.entry(doc.id.clone()).or_insert(doc.updated_at);
        *at = (*at).max(doc.updated_at);
        self.submit(SyncJob {
            identity: identity.clone(),
            op: SyncOp::Upsert(doc.clone()),
        });
    }

    fn queue_delete(&mut self, identity: &Identity, id: &str) {
        self.retry.remove(id);
        self.pending_deletes.insert(id.to_string());
        self.submit(SyncJob {
            identity: identity.clone(),
            op: SyncOp::Delete(id.to_string()),
        });
    }

    /// Re-send writes whose last push failed.
    fn retry_failed(&mut self, identity: &Identity, docs: &[Document]) {
        if self.retry.is_empty() {
            return;
        }
        let ids: Vec<String> = self.retry.iter().cloned().collect();
        for id in ids {
            if self.pending_deletes.contains(&id) {
                self.queue_delete(identity, &id);
            } else if let Some(doc) = docs.iter().find(|d| d.id == id) {
                self.queue_upsert(identity, doc);
            } else {
                self.retry.remove(&id);
            }
        }
    }
}

//! Remote document store (account sync).
//!
//! The backing database is opaque; this module only knows CRUD semantics
//! scoped to an authenticated identity.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::document::{sort_recent, Document};

/// An authenticated user as seen by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub token: String,
}

impl Identity {
    pub fn new(id: &str, token: &str) -> Self {
        Self {
            id: id.to_string(),
            token: token.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("not authorized")]
    Unauthorized,
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("remote store unreachable: {0}")]
    Unreachable(String),
    #[error("remote store returned status {status}")]
    Server { status: u16 },
    #[error("invalid data from remote store: {0}")]
    InvalidData(String),
}

impl RemoteError {
    /// Errors worth retrying later without user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Server { .. })
    }
}

pub trait RemoteStore: Send + Sync {
    /// All documents owned by `identity`.
    fn list(&self, identity: &Identity) -> Result<Vec<Document>, RemoteError>;
    fn upsert(&self, identity: &Identity, doc: &Document) -> Result<(), RemoteError>;
    fn delete(&self, identity: &Identity, id: &str) -> Result<(), RemoteError>;
    /// Delete every document of `identity`; returns how many were removed.
    fn clear(&self, identity: &Identity) -> Result<usize, RemoteError>;
}

/// In-process remote store. Accepts only registered tokens.
#[derive(Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<MemoryRemoteInner>,
}

#[derive(Default)]
struct MemoryRemoteInner {
    tokens: HashMap<String, String>,
    docs: HashMap<String, Document>,
    unreachable: bool,
    upserts: usize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `identity`'s token from now on.
    pub fn register(&self, identity: &Identity) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tokens.insert(identity.token.clone(), identity.id.clone());
        }
    }

    pub fn revoke(&self, identity: &Identity) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tokens.remove(&identity.token);
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unreachable = !reachable;
        }
    }

    /// Seed a document directly, bypassing authorization.
    pub fn insert(&self, doc: Document) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.docs.insert(doc.id.clone(), doc);
        }
    }

    /// Every stored document, newest first.
    pub fn snapshot(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .inner
            .lock()
            .map(|inner| inner.docs.values().cloned().collect())
            .unwrap_or_default();
        sort_recent(&mut docs);
        docs
    }

    pub fn upsert_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.upserts).unwrap_or(0)
    }

    fn with_auth<T>(
        &self,
        identity: &Identity,
        f: impl FnOnce(&mut MemoryRemoteInner) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| RemoteError::Unreachable("store lock poisoned".into()))?;
        if inner.unreachable {
            return Err(RemoteError::Unreachable("offline".into()));
        }
        if inner.tokens.get(&identity.token) != Some(&identity.id) {
            return Err(RemoteError::Unauthorized);
        }
        f(&mut inner)
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn list(&self, identity: &Identity) -> Result<Vec<Document>, RemoteError> {
        self.with_auth(identity, |inner| {
            let mut docs: Vec<Document> = inner
                .docs
                .values()
                .filter(|d| d.is_owned_by(&identity.id))
                .cloned()
                .collect();
            sort_recent(&mut docs);
            Ok(docs)
        })
    }

    fn upsert(&self, identity: &Identity, doc: &Document) -> Result<(), RemoteError> {
        self.with_auth(identity, |inner| {
            if let Some(existing) = inner.docs.get(&doc.id) {
                if !existing.is_owned_by(&identity.id) {
                    return Err(RemoteError::Unauthorized);
                }
            }
            let mut stored = doc.clone();
            stored.owner_id = Some(identity.id.clone());
            inner.docs.insert(stored.id.clone(), stored);
            inner.upserts += 1;
            Ok(())
        })
    }

    fn delete(&self, identity: &Identity, id: &str) -> Result<(), RemoteError> {
        self.with_auth(identity, |inner| match inner.docs.get(id) {
            Some(d) if d.is_owned_by(&identity.id) => {
                inner.docs.remove(id);
                Ok(())
            }
            Some(_) => Err(RemoteError::Unauthorized),
            None => Err(RemoteError::NotFound(id.to_string())),
        })
    }

    fn clear(&self, identity: &Identity) -> Result<usize, RemoteError> {
        self.with_auth(identity, |inner| {
            let owned: HashSet<String> = inner
                .docs
                .values()
                .filter(|d| d.is_owned_by(&identity.id))
                .map(|d| d.id.clone())
                .collect();
            inner.docs.retain(|id, _| !owned.contains(id));
            Ok(owned.len())
        })
    }
}

#[derive(Deserialize)]
struct ClearResponse {
    count: usize,
}

/// JSON over HTTP with a bearer token.
pub struct HttpRemoteStore {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: config.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(identity: &Identity) -> String {
        format!("Bearer {}", identity.token)
    }
}

fn map_err(err: ureq::Error, id: Option<&str>) -> RemoteError {
    match err {
        ureq::Error::StatusCode(401 | 403) => RemoteError::Unauthorized,
        ureq::Error::StatusCode(404) => RemoteError::NotFound(id.unwrap_or_default().to_string()),
        ureq::Error::StatusCode(status) => RemoteError::Server { status },
        other => RemoteError::Unreachable(other.to_string()),
    }
}

fn read_body(resp: ureq::http::Response<ureq::Body>) -> Result<String, RemoteError> {
    resp.into_body()
        .read_to_string()
        .map_err(|e| RemoteError::InvalidData(e.to_string()))
}

impl RemoteStore for HttpRemoteStore {
    fn list(&self, identity: &Identity) -> Result<Vec<Document>, RemoteError> {
        let resp = self
            .agent
            .get(self.url("/documents"))
            .header("Authorization", Self::bearer(identity))
            .call()
            .map_err(|e| map_err(e, None))?;
        let body = read_body(resp)?;
        let mut docs: Vec<Document> =
            serde_json::from_str(&body).map_err(|e| RemoteError::InvalidData(e.to_string()))?;
        sort_recent(&mut docs);
        debug!(count = docs.len(), "remote list");
        Ok(docs)
    }

    fn upsert(&self, identity: &Identity, doc: &Document) -> Result<(), RemoteError> {
        let body =
            serde_json::to_string(doc).map_err(|e| RemoteError::InvalidData(e.to_string()))?;
        self.agent
            .put(self.url(&format!("/documents/{}", doc.id)))
            .header("Authorization", Self::bearer(identity))
            .header("Content-Type", "application/json")
            .send(body)
            .map_err(|e| map_err(e, Some(&doc.id)))?;
        Ok(())
    }

    fn delete(&self, identity: &Identity, id: &str) -> Result<(), RemoteError> {
        self.agent
            .delete(self.url(&format!("/documents/{id}")))
            .header("Authorization", Self::bearer(identity))
            .call()
            .map_err(|e| map_err(e, Some(id)))?;
        Ok(())
    }

    fn clear(&self, identity: &Identity) -> Result<usize, RemoteError> {
        let resp = self
            .agent
            .delete(self.url("/documents"))
            .header("Authorization", Self::bearer(identity))
            .call()
            .map_err(|e| map_err(e, None))?;
        let body = read_body(resp)?;
        let parsed: ClearResponse =
            serde_json::from_str(&body).map_err(|e| RemoteError::InvalidData(e.to_string()))?;
        Ok(parsed.count)
    }
}

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use quill_core::document::Document;
use quill_core::events::{EditorEvent, SaveStatus};

use super::DocumentStore;

/// Debounced persistence of document edits.
///
/// Each edit replaces the buffered copy of its document and pushes the
/// deadline back; the copy is saved once the document has been quiet for
/// the autosave delay. A failed save stays buffered and is tried again after
/// another delay.
pub struct Autosaver {
    delay: Duration,
    pending: HashMap<String, (Document, Instant)>,
    status: Option<SaveStatus>,
}

impl Autosaver {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
            status: None,
        }
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    pub fn status(&self) -> Option<SaveStatus> {
        self.status
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Earliest deadline, for callers that sleep between ticks.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(_, d)| *d).min()
    }

    /// Buffer the latest state of `doc`.
    pub fn schedule(&mut self, doc: &Document, now: Instant) -> Vec<EditorEvent> {
        self.pending
            .insert(doc.id.clone(), (doc.clone(), now + self.delay));
        self.set_status(SaveStatus::Saving).into_iter().collect()
    }

    /// Forget buffered edits for a deleted document.
    pub fn discard(&mut self, id: &str) {
        self.pending.remove(id);
    }

    /// Save every document whose quiet period has elapsed.
    pub fn tick(&mut self, now: Instant, store: &mut DocumentStore) -> Vec<EditorEvent> {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, (_, deadline))| now >= *deadline)
            .map(|(id, _)| id.clone())
            .collect();
        if due.is_empty() {
            return Vec::new();
        }
        self.save(due, now, store)
    }

    /// Save everything buffered, regardless of deadlines.
    pub fn flush(&mut self, now: Instant, store: &mut DocumentStore) -> Vec<EditorEvent> {
        let all: Vec<String> = self.pending.keys().cloned().collect();
        if all.is_empty() {
            return Vec::new();
        }
        self.save(all, now, store)
    }

    fn save(&mut self, ids: Vec<String>, now: Instant, store: &mut DocumentStore) -> Vec<EditorEvent> {
        let mut failed = false;
        for id in ids {
            let Some((doc, _)) = self.pending.remove(&id) else {
                continue;
            };
            match store.save(&doc) {
                Ok(_) => debug!(%id, "autosaved"),
                Err(e) => {
                    warn!(%id, error = %e, "autosave failed");
                    failed = true;
                    self.pending.insert(id, (doc, now + self.delay));
                }
            }
        }
        let status = if failed {
            SaveStatus::Error
        } else if self.pending.is_empty() {
            SaveStatus::Saved
        } else {
            SaveStatus::Saving
        };
        self.set_status(status).into_iter().collect()
    }

    fn set_status(&mut self, status: SaveStatus) -> Option<EditorEvent> {
        if self.status == Some(status) {
            return None;
        }
        self.status = Some(status);
        Some(EditorEvent::SaveStatusChanged { status })
    }
}

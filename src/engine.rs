//! `EditorEngine`: the surface the presentation layer drives.
//!
//! Owns the editor session, the completion worker, the document store and
//! the autosaver. Every operation runs on the caller's thread and returns the
//! events to render; completion and sync results are picked up by `poll`.

#[cfg(test)]
mod tests;

use std::io;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, debug_span, info, warn};

use quill_core::completion::{CompletionError, CompletionService, HttpCompletionService};
use quill_core::document::Document;
use quill_core::events::{EditorEvent, SaveStatus};
use quill_core::local::{FileCache, LocalCache};
use quill_core::models::ModelRegistry;
use quill_core::prompt::{DocumentCommand, SelectionAction};
use quill_core::remote::{HttpRemoteStore, Identity, RemoteStore};
use quill_core::settings::{EditorSettings, SettingsError};
use quill_session::{CommandError, EditorSession, SelectionError, SessionError, SessionResponse};

use crate::async_worker::CompletionWorker;
use crate::store::{Autosaver, DocumentStore, MigrationReport, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("no document is open")]
    NoDocument,
    #[error("document not found: {0}")]
    UnknownDocument(String),
    #[error("failed to start completion worker: {0}")]
    Worker(#[source] io::Error),
}

pub struct EditorEngine {
    session: EditorSession,
    worker: CompletionWorker,
    store: DocumentStore,
    autosaver: Autosaver,
    current: Option<Document>,
}

impl EditorEngine {
    pub fn new(
        settings: EditorSettings,
        registry: Arc<ModelRegistry>,
        completion: Arc<dyn CompletionService>,
        cache: Box<dyn LocalCache>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self, EngineError> {
        let worker = CompletionWorker::new(completion).map_err(EngineError::Worker)?;
        let store = DocumentStore::new(cache, remote)?;
        let autosaver = Autosaver::new(settings.autosave_debounce());
        Ok(Self {
            session: EditorSession::new(settings, registry),
            worker,
            store,
            autosaver,
            current: None,
        })
    }

    /// Engine over the HTTP services named in `settings`, caching documents
    /// under `data_dir`.
    pub fn from_settings(settings: EditorSettings, data_dir: &Path) -> Result<Self, EngineError> {
        let completion = Arc::new(HttpCompletionService::from_settings(&settings));
        let remote = Arc::new(HttpRemoteStore::new(
            &settings.service.store_url,
            settings.request_timeout(),
        ));
        let cache = Box::new(FileCache::new(data_dir));
        info!(data_dir = %data_dir.display(), model = %settings.ai.model, "engine starting");
        Self::new(
            settings,
            Arc::new(ModelRegistry::builtin()),
            completion,
            cache,
            remote,
        )
    }

    /// `from_settings` with settings read from a TOML file.
    pub fn from_settings_file(path: &Path, data_dir: &Path) -> Result<Self, EngineError> {
        let settings = EditorSettings::load(path)?;
        Self::from_settings(settings, data_dir)
    }

    pub fn session(&self) -> &EditorSession {
        &self.session
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn save_status(&self) -> Option<SaveStatus> {
        self.autosaver.status()
    }

    pub fn current_document(&self) -> Option<&Document> {
        self.current.as_ref()
    }

    // --- documents ---

    /// Visible documents, newest first. The open document shows its
    /// unsaved state.
    pub fn documents(&mut self) -> Result<Vec<Document>, EngineError> {
        let mut docs = self.store.list()?;
        if let Some(current) = &self.current {
            for doc in docs.iter_mut().filter(|d| d.id == current.id) {
                *doc = current.clone();
            }
        }
        Ok(docs)
    }

    pub fn new_document(&mut self, now: Instant) -> Result<Vec<EditorEvent>, EngineError> {
        let mut events = self.flush(now);
        let doc = self.store.create()?;
        debug!(id = %doc.id, "document created");
        events.extend(self.show(doc, now));
        Ok(events)
    }

    pub fn open_document(&mut self, id: &str, now: Instant) -> Result<Vec<EditorEvent>, EngineError> {
        if self.current.as_ref().is_some_and(|d| d.id == id) {
            return Ok(Vec::new());
        }
        let mut events = self.flush(now);
        let doc = self
            .store
            .get(id)?
            .ok_or_else(|| EngineError::UnknownDocument(id.to_string()))?;
        events.extend(self.show(doc, now));
        Ok(events)
    }

    /// Delete `id`; closes it if it is open.
    pub fn delete_document(&mut self, id: &str, now: Instant) -> Result<Vec<EditorEvent>, EngineError> {
        self.autosaver.discard(id);
        if !self.store.delete(id)? {
            return Err(EngineError::UnknownDocument(id.to_string()));
        }
        if self.current.as_ref().is_some_and(|d| d.id == id) {
            return Ok(self.close(now));
        }
        Ok(Vec::new())
    }

    // --- editing ---

    pub fn edit(&mut self, content: &str, cursor: usize, now: Instant) -> Result<Vec<EditorEvent>, EngineError> {
        let doc = self.current.as_mut().ok_or(EngineError::NoDocument)?;
        let mut events = Vec::new();
        if doc.set_content(content) {
            events.extend(self.autosaver.schedule(doc, now));
        }
        let resp = self.session.handle_edit(content, cursor, now);
        events.extend(self.dispatch(resp, now));
        Ok(events)
    }

    pub fn set_title(&mut self, title: &str, now: Instant) -> Result<Vec<EditorEvent>, EngineError> {
        let doc = self.current.as_mut().ok_or(EngineError::NoDocument)?;
        if !doc.set_title(title) {
            return Ok(Vec::new());
        }
        Ok(self.autosaver.schedule(doc, now))
    }

    pub fn move_cursor(&mut self, cursor: usize, now: Instant) -> Vec<EditorEvent> {
        let resp = self.session.handle_cursor(cursor, now);
        self.dispatch(resp, now)
    }

    pub fn select(&mut self, range: Option<Range<usize>>, now: Instant) -> Vec<EditorEvent> {
        let resp = self.session.handle_selection(range, now);
        self.dispatch(resp, now)
    }

    /// Fire due timers: suggestion debounce, model fallback and autosave.
    pub fn tick(&mut self, now: Instant) -> Vec<EditorEvent> {
        let resp = self.session.tick(now);
        let mut events = self.dispatch(resp, now);
        events.extend(self.autosaver.tick(now, &mut self.store));
        events
    }

    /// Apply worker results that have arrived.
    pub fn poll(&mut self, now: Instant) -> Vec<EditorEvent> {
        let mut events = Vec::new();
        while let Some(r) = self.worker.try_recv_suggestion() {
            let resp = self.session.receive_suggestion(r.generation, r.result, now);
            events.extend(self.dispatch(resp, now));
        }
        while let Some(r) = self.worker.try_recv_selection() {
            let resp = self.session.receive_selection_result(r.id, r.result, now);
            events.extend(self.dispatch(resp, now));
        }
        while let Some(r) = self.worker.try_recv_command() {
            let resp = self.session.receive_command_result(r.id, r.result, now);
            events.extend(self.dispatch(resp, now));
        }
        self.store.poll();
        events
    }

    /// Save every buffered edit now.
    pub fn flush(&mut self, now: Instant) -> Vec<EditorEvent> {
        self.autosaver.flush(now, &mut self.store)
    }

    // --- assistance ---

    pub fn accept_suggestion(&mut self, now: Instant) -> Vec<EditorEvent> {
        let resp = self.session.accept_suggestion(now);
        self.dispatch(resp, now)
    }

    pub fn reject_suggestion(&mut self, now: Instant) -> Vec<EditorEvent> {
        let resp = self.session.reject_suggestion();
        self.dispatch(resp, now)
    }

    pub fn accept_fallback(&mut self, now: Instant) -> Vec<EditorEvent> {
        let resp = self.session.accept_fallback(now);
        self.dispatch(resp, now)
    }

    pub fn set_model(&mut self, model_id: &str, now: Instant) -> Result<Vec<EditorEvent>, EngineError> {
        let resp = self.session.set_model(model_id)?;
        Ok(self.dispatch(resp, now))
    }

    pub fn set_enabled(&mut self, enabled: bool, now: Instant) -> Vec<EditorEvent> {
        let resp = self.session.set_enabled(enabled);
        self.dispatch(resp, now)
    }

    pub fn apply_settings(&mut self, settings: EditorSettings, now: Instant) -> Result<Vec<EditorEvent>, EngineError> {
        let delay = settings.autosave_debounce();
        let resp = self.session.apply_settings(settings)?;
        self.autosaver.set_delay(delay);
        Ok(self.dispatch(resp, now))
    }

    /// Start `action` on `range` of the open document.
    pub fn run_selection_action(
        &mut self,
        range: Range<usize>,
        action: SelectionAction,
        now: Instant,
    ) -> Result<Vec<EditorEvent>, EngineError> {
        if self.current.is_none() {
            return Err(EngineError::NoDocument);
        }
        let resp = self.session.begin_selection_action(range, action)?;
        Ok(self.dispatch(resp, now))
    }

    /// Run a whole-document command. Its result arrives through `poll`.
    pub fn run_document_command(
        &mut self,
        command: DocumentCommand,
        now: Instant,
    ) -> Result<Vec<EditorEvent>, EngineError> {
        if self.current.is_none() {
            return Err(EngineError::NoDocument);
        }
        let resp = self.session.begin_document_command(command)?;
        Ok(self.dispatch(resp, now))
    }

    // --- account ---

    /// Sign in and move anonymous documents into the account. The open
    /// document follows its migrated copy.
    pub fn sign_in(
        &mut self,
        identity: Identity,
        now: Instant,
    ) -> Result<(MigrationReport, Vec<EditorEvent>), EngineError> {
        let _span = debug_span!("sign_in", identity = %identity.id).entered();
        let mut events = self.flush(now);
        let report = self.store.migrate_anonymous(identity)?;

        let Some(id) = self.current.as_ref().map(|d| d.id.clone()) else {
            return Ok((report, events));
        };
        match self.store.get(&id)? {
            Some(doc) if doc.content != self.session.content() => {
                self.autosaver.discard(&id);
                events.extend(self.show(doc, now));
            }
            Some(doc) if self.autosaver.is_pending(&id) => {
                // a failed flush left edits buffered under the old owner
                if let Some(current) = self.current.as_mut() {
                    current.owner_id = doc.owner_id;
                    events.extend(self.autosaver.schedule(current, now));
                }
            }
            Some(doc) => self.current = Some(doc),
            None => events.extend(self.close(now)),
        }
        Ok((report, events))
    }

    /// Sign out. An open account document is closed.
    pub fn sign_out(&mut self, now: Instant) -> Vec<EditorEvent> {
        let mut events = self.flush(now);
        self.store.sign_out();
        if self.current.as_ref().is_some_and(|d| !d.is_anonymous()) {
            events.extend(self.close(now));
        }
        events
    }

    /// Push every account document now.
    pub fn sync_now(&mut self, now: Instant) -> Result<usize, EngineError> {
        self.flush(now);
        Ok(self.store.sync_now()?)
    }

    /// Delete every account document. An open account document is closed.
    pub fn clear_account(&mut self, now: Instant) -> Result<(usize, Vec<EditorEvent>), EngineError> {
        let count = self.store.clear_account()?;
        let mut events = Vec::new();
        if let Some(doc) = self.current.as_ref().filter(|d| !d.is_anonymous()) {
            let id = doc.id.clone();
            self.autosaver.discard(&id);
            events.extend(self.close(now));
        }
        Ok((count, events))
    }

    // --- internals ---

    fn show(&mut self, doc: Document, now: Instant) -> Vec<EditorEvent> {
        let resp = self.session.load_document(&doc.content);
        self.current = Some(doc);
        self.dispatch(resp, now)
    }

    fn close(&mut self, now: Instant) -> Vec<EditorEvent> {
        self.current = None;
        let resp = self.session.load_document("");
        self.dispatch(resp, now)
    }

    /// Hand requests to the worker and mirror session-side content changes
    /// into the open document.
    fn dispatch(&mut self, resp: SessionResponse, now: Instant) -> Vec<EditorEvent> {
        let SessionResponse {
            mut events,
            suggestion_request,
            selection_request,
            command_request,
        } = resp;
        let mut next = suggestion_request;
        while let Some(req) = next.take() {
            let generation = req.generation;
            if self.worker.submit_suggestion(req) {
                break;
            }
            // A stopped worker never answers; release the in-flight slot.
            warn!(generation, "completion worker stopped");
            let resp = self.session.receive_suggestion(generation, Err(worker_stopped()), now);
            events.extend(resp.events);
            next = resp.suggestion_request;
        }
        self.worker
            .set_live_suggestion(self.session.pending_generation());
        if let Some(req) = selection_request {
            let id = req.id;
            if !self.worker.submit_selection(req) {
                warn!(id, "completion worker stopped");
                let resp = self.session.receive_selection_result(id, Err(worker_stopped()), now);
                events.extend(resp.events);
            }
        }
        if let Some(req) = command_request {
            let id = req.id;
            if !self.worker.submit_command(req) {
                warn!(id, "completion worker stopped");
                let resp = self.session.receive_command_result(id, Err(worker_stopped()), now);
                events.extend(resp.events);
            }
        }

        let mut saves = Vec::new();
        for event in &events {
            if let EditorEvent::ContentReplaced { content, .. } = event {
                if let Some(doc) = self.current.as_mut() {
                    if doc.set_content(content) {
                        saves.extend(self.autosaver.schedule(doc, now));
                    }
                }
            }
        }
        events.extend(saves);
        events
    }
}

fn worker_stopped() -> CompletionError {
    CompletionError::Unreachable("completion worker stopped".into())
}

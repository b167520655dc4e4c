//! Editor session: inline suggestion lifecycle, model failover, selection
//! actions and whole-document commands as one sans-IO state machine.
//!
//! `EditorSession` never performs I/O and never reads the clock. Every
//! operation takes the current `Instant` where timing matters and returns a
//! `SessionResponse` listing events for the presentation layer plus at most
//! one completion request for the caller to run. Results come back through
//! `receive_suggestion` / `receive_selection_result` /
//! `receive_command_result`, tagged so stale ones are dropped.

pub(crate) mod types;

mod command;
mod editing;
mod failover;
mod response;
mod selection;
mod suggestion;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use quill_core::events::FailureReason;
use quill_core::models::{FailoverState, ModelRegistry};
use quill_core::settings::EditorSettings;

pub use types::{
    CommandError, CommandRequest, PendingFallback, Phase, SelectionError, SelectionRequest,
    SessionError, SessionResponse, Suggestion, SuggestionRequest,
};

use types::{PendingCommand, PendingSelection, SuggestionState, TextBuffer, Timer};

pub struct EditorSession {
    settings: EditorSettings,
    registry: Arc<ModelRegistry>,

    buffer: TextBuffer,

    suggestion: SuggestionState,
    suggestion_generation: u64,
    /// Generation of the request the caller is still working on, stale or not.
    in_flight: Option<u64>,
    debounce: Timer,
    /// Debounce elapsed while a request was outstanding.
    trigger_deferred: bool,

    failover: FailoverState,
    fallback: Option<PendingFallback>,

    next_selection_id: u64,
    selection: Option<PendingSelection>,

    next_command_id: u64,
    command: Option<PendingCommand>,
}

impl EditorSession {
    /// New session on an empty document. An active model missing from the
    /// registry falls back to the registry's first entry.
    pub fn new(settings: EditorSettings, registry: Arc<ModelRegistry>) -> Self {
        let active = if registry.contains(&settings.ai.model) {
            settings.ai.model.clone()
        } else {
            registry.first().id.clone()
        };
        let settings = settings.with_model(&active);
        Self {
            settings,
            registry,
            buffer: TextBuffer::default(),
            suggestion: SuggestionState::Idle,
            suggestion_generation: 0,
            in_flight: None,
            debounce: Timer::default(),
            trigger_deferred: false,
            failover: FailoverState::new(&active),
            fallback: None,
            next_selection_id: 1,
            selection: None,
            next_command_id: 1,
            command: None,
        }
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn content(&self) -> &str {
        &self.buffer.content
    }

    pub fn cursor(&self) -> usize {
        self.buffer.cursor
    }

    pub fn revision(&self) -> u64 {
        self.buffer.revision
    }

    pub fn phase(&self) -> Phase {
        match self.suggestion {
            SuggestionState::Idle => Phase::Idle,
            SuggestionState::Pending { .. } => Phase::Pending,
            SuggestionState::Displaying { .. } => Phase::Displaying,
            SuggestionState::Failed { .. } => Phase::Failed,
        }
    }

    /// Why the last request failed, while in `Phase::Failed`.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self.suggestion {
            SuggestionState::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// The displayed suggestion, if any.
    pub fn suggestion(&self) -> Option<&Suggestion> {
        match &self.suggestion {
            SuggestionState::Displaying { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    pub fn active_model(&self) -> &str {
        self.failover.active()
    }

    pub fn failover(&self) -> &FailoverState {
        &self.failover
    }

    pub fn pending_fallback(&self) -> Option<&PendingFallback> {
        self.fallback.as_ref()
    }

    /// Generation of the live pending request, if one is valid.
    pub fn pending_generation(&self) -> Option<u64> {
        match self.suggestion {
            SuggestionState::Pending { generation, .. } => Some(generation),
            _ => None,
        }
    }

    pub fn has_request_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn has_pending_selection(&self) -> bool {
        self.selection.is_some()
    }

    pub fn has_pending_command(&self) -> bool {
        self.command.is_some()
    }

    pub fn is_debounce_armed(&self) -> bool {
        self.debounce.is_armed()
    }
}

use std::ops::Range;
use std::time::Instant;

use tracing::{debug, debug_span};

use quill_core::completion::CompletionError;
use quill_core::events::{EditorEvent, SelectionOutcome};
use quill_core::prompt::SelectionAction;
use quill_core::text::{head_chars, is_blank, tail_chars};

use super::types::{PendingSelection, SelectionError, SelectionRequest, SessionResponse};
use super::EditorSession;

impl EditorSession {
    fn validate_range(&self, range: &Range<usize>) -> Result<(), SelectionError> {
        let content = &self.buffer.content;
        if range.start >= range.end {
            return Err(SelectionError::EmptyRange);
        }
        if range.end > content.len() {
            return Err(SelectionError::OutOfBounds {
                start: range.start,
                end: range.end,
                len: content.len(),
            });
        }
        for offset in [range.start, range.end] {
            if !content.is_char_boundary(offset) {
                return Err(SelectionError::NotCharBoundary(offset));
            }
        }
        Ok(())
    }

    /// Start an explicit action on `range`. Supersedes any earlier action
    /// still waiting for its result.
    pub fn begin_selection_action(
        &mut self,
        range: Range<usize>,
        action: SelectionAction,
    ) -> Result<SessionResponse, SelectionError> {
        let _span = debug_span!("begin_selection_action", %action, ?range).entered();
        self.validate_range(&range)?;

        let mut resp = SessionResponse::empty();
        if let Some(ev) = self.dismiss_suggestion() {
            resp.push(ev);
        }
        if let Some(old) = self.selection.take() {
            debug!(id = old.id, "selection action superseded");
        }

        let context_chars = self.settings.selection.context_chars;
        let content = &self.buffer.content;
        let id = self.next_selection_id;
        self.next_selection_id += 1;
        let request = SelectionRequest {
            id,
            action,
            range: range.clone(),
            selected: content[range.clone()].to_string(),
            before: tail_chars(content, range.start, context_chars).to_string(),
            after: head_chars(content, range.end, context_chars).to_string(),
            options: self.completion_options(),
        };

        self.buffer.selection = Some(range.clone());
        self.buffer.cursor = range.end;
        self.selection = Some(PendingSelection {
            id,
            action,
            range,
            revision: self.buffer.revision,
        });
        resp.push(EditorEvent::SelectionActionStarted { action });
        resp.selection_request = Some(request);
        Ok(resp)
    }

    /// Hand an action result back. Superseded ids are dropped silently; a
    /// result for a document that changed since the request is reported
    /// stale and not applied.
    pub fn receive_selection_result(
        &mut self,
        id: u64,
        result: Result<String, CompletionError>,
        now: Instant,
    ) -> SessionResponse {
        let _span = debug_span!("receive_selection_result", id).entered();
        let pending = match self.selection.take() {
            Some(p) if p.id == id => p,
            other => {
                self.selection = other;
                debug!("superseded selection result discarded");
                return SessionResponse::empty();
            }
        };

        let action = pending.action;
        let outcome = if pending.revision != self.buffer.revision {
            SelectionOutcome::Stale
        } else {
            match result {
                Err(e) => SelectionOutcome::ServiceError(e.to_string()),
                Ok(text) if is_blank(&text) => SelectionOutcome::Empty,
                Ok(text) => {
                    let mut resp = self.apply_replacement(pending.range, &text, now);
                    resp.push(EditorEvent::SelectionActionFinished {
                        action,
                        outcome: SelectionOutcome::Applied,
                    });
                    return resp;
                }
            }
        };
        debug!(?outcome, "selection action not applied");
        SessionResponse::with_event(EditorEvent::SelectionActionFinished { action, outcome })
    }

    pub(crate) fn apply_replacement(&mut self, range: Range<usize>, text: &str, now: Instant) -> SessionResponse {
        let mut resp = SessionResponse::empty();
        if let Some(ev) = self.dismiss_suggestion() {
            resp.push(ev);
        }
        let start = range.start;
        self.buffer.content.replace_range(range, text);
        self.buffer.cursor = start + text.len();
        self.buffer.selection = None;
        self.buffer.revision += 1;
        self.debounce.arm(now + self.settings.suggestion_debounce());
        resp.push(EditorEvent::ContentReplaced {
            content: self.buffer.content.clone(),
            cursor: self.buffer.cursor,
        });
        resp
    }
}

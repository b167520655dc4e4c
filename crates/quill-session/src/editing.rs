use std::ops::Range;
use std::time::Instant;

use tracing::{debug, debug_span};

use quill_core::text::floor_boundary;

use super::types::{SessionResponse, TextBuffer};
use super::EditorSession;

impl EditorSession {
    /// Replace the buffer with a freshly opened document. Any pending work
    /// belongs to the old document and is dropped; tried models are forgotten.
    pub fn load_document(&mut self, content: &str) -> SessionResponse {
        let _span = debug_span!("load_document", len = content.len()).entered();
        let mut resp = SessionResponse::empty();
        if let Some(ev) = self.dismiss_suggestion() {
            resp.push(ev);
        }
        self.buffer = TextBuffer {
            content: content.to_string(),
            cursor: content.len(),
            selection: None,
            revision: self.buffer.revision + 1,
        };
        self.debounce.cancel();
        self.trigger_deferred = false;
        self.fallback = None;
        self.failover.clear_tried();
        self.selection = None;
        self.command = None;
        resp
    }

    /// A keystroke or paste: new content and cursor. Clears any suggestion and
    /// restarts the debounce window.
    pub fn handle_edit(&mut self, content: &str, cursor: usize, now: Instant) -> SessionResponse {
        let _span = debug_span!("handle_edit", len = content.len(), cursor).entered();
        if content == self.buffer.content {
            return self.handle_cursor(cursor, now);
        }
        let mut resp = SessionResponse::empty();
        if let Some(ev) = self.dismiss_suggestion() {
            resp.push(ev);
        }
        self.buffer.content = content.to_string();
        self.buffer.cursor = floor_boundary(content, cursor);
        self.buffer.selection = None;
        self.buffer.revision += 1;
        self.debounce.arm(now + self.settings.suggestion_debounce());
        resp
    }

    /// Caret movement without a content change.
    pub fn handle_cursor(&mut self, cursor: usize, _now: Instant) -> SessionResponse {
        let cursor = floor_boundary(&self.buffer.content, cursor);
        let moved = cursor != self.buffer.cursor || self.buffer.selection.is_some();
        self.buffer.cursor = cursor;
        self.buffer.selection = None;
        if !moved {
            return SessionResponse::empty();
        }
        debug!(cursor, "cursor moved");
        match self.dismiss_suggestion() {
            Some(ev) => SessionResponse::with_event(ev),
            None => SessionResponse::empty(),
        }
    }

    /// Selection change. An empty or missing range collapses to a caret at
    /// its end.
    pub fn handle_selection(&mut self, range: Option<Range<usize>>, now: Instant) -> SessionResponse {
        let range = match range {
            Some(r) if r.start < r.end => r,
            Some(r) => return self.handle_cursor(r.end, now),
            None => return self.handle_cursor(self.buffer.cursor, now),
        };
        let start = floor_boundary(&self.buffer.content, range.start);
        let end = floor_boundary(&self.buffer.content, range.end);
        self.buffer.cursor = end;
        self.buffer.selection = (start < end).then_some(start..end);
        match self.dismiss_suggestion() {
            Some(ev) => SessionResponse::with_event(ev),
            None => SessionResponse::empty(),
        }
    }
}

use quill_core::events::EditorEvent;

use super::types::SessionResponse;

impl SessionResponse {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn with_event(event: EditorEvent) -> Self {
        Self {
            events: vec![event],
            ..Self::default()
        }
    }

    pub(crate) fn push(&mut self, event: EditorEvent) {
        self.events.push(event);
    }

    /// Append events and take any request from `other`.
    pub(crate) fn merge(&mut self, other: SessionResponse) {
        self.events.extend(other.events);
        if other.suggestion_request.is_some() {
            self.suggestion_request = other.suggestion_request;
        }
        if other.selection_request.is_some() {
            self.selection_request = other.selection_request;
        }
        if other.command_request.is_some() {
            self.command_request = other.command_request;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.suggestion_request.is_none()
            && self.selection_request.is_none()
            && self.command_request.is_none()
    }

    pub fn has_event(&self, pred: impl Fn(&EditorEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }
}

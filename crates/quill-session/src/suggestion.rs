use std::time::Instant;

use tracing::{debug, debug_span, warn};

use quill_core::completion::{CompletionError, CompletionOptions};
use quill_core::events::{EditorEvent, FailureReason, SwitchReason};
use quill_core::text::{char_len, is_blank};

use super::types::{SessionResponse, Suggestion, SuggestionRequest, SuggestionState};
use super::EditorSession;

/// Empty, whitespace-only, or an echo of the submitted context.
pub(crate) fn is_degenerate(text: &str, context: &str) -> bool {
    is_blank(text) || text == context
}

impl EditorSession {
    /// Fire due timers: the fallback switch first, then the debounce.
    pub fn tick(&mut self, now: Instant) -> SessionResponse {
        let mut resp = SessionResponse::empty();
        if self.fallback.as_ref().is_some_and(|f| now >= f.deadline) {
            resp.merge(self.switch_to_fallback(SwitchReason::Fallback, now));
        }
        if self.debounce.fire(now) {
            resp.suggestion_request = self.try_trigger();
        }
        resp
    }

    /// Hand a completion result back. Results for an old generation, or for
    /// a buffer that changed since the request, are discarded.
    pub fn receive_suggestion(
        &mut self,
        generation: u64,
        result: Result<String, CompletionError>,
        now: Instant,
    ) -> SessionResponse {
        let _span = debug_span!("receive_suggestion", generation).entered();
        if self.in_flight == Some(generation) {
            self.in_flight = None;
        }

        let mut resp = SessionResponse::empty();
        match &self.suggestion {
            SuggestionState::Pending {
                generation: g,
                anchor,
                revision,
                context,
            } if *g == generation
                && *revision == self.buffer.revision
                && *anchor == self.buffer.cursor =>
            {
                let (anchor, revision, context) = (*anchor, *revision, context.clone());
                resp.merge(self.settle(result, anchor, revision, &context, now));
            }
            _ => debug!("stale suggestion discarded"),
        }

        if self.trigger_deferred && self.in_flight.is_none() {
            self.trigger_deferred = false;
            resp.suggestion_request = self.try_trigger();
        }
        resp
    }

    fn settle(
        &mut self,
        result: Result<String, CompletionError>,
        anchor: usize,
        revision: u64,
        context: &str,
        now: Instant,
    ) -> SessionResponse {
        let model_id = self.failover.active().to_string();
        match result {
            Ok(text) if !is_degenerate(&text, context) => {
                debug!(len = text.len(), "suggestion displayed");
                self.suggestion = SuggestionState::Displaying {
                    suggestion: Suggestion {
                        text: text.clone(),
                        anchor,
                    },
                    revision,
                };
                SessionResponse::with_event(EditorEvent::SuggestionAvailable { text, anchor })
            }
            Ok(_) => {
                debug!(model = %model_id, "degenerate suggestion");
                self.suggestion = SuggestionState::Failed {
                    reason: FailureReason::Degenerate,
                };
                let mut resp = SessionResponse::with_event(EditorEvent::SuggestionFailed {
                    model_id,
                    reason: FailureReason::Degenerate,
                });
                resp.merge(self.propose_fallback(now));
                resp
            }
            Err(CompletionError::Superseded) => {
                self.suggestion = SuggestionState::Idle;
                SessionResponse::empty()
            }
            Err(e) => {
                warn!(model = %model_id, error = %e, "completion failed");
                self.suggestion = SuggestionState::Failed {
                    reason: FailureReason::Unavailable,
                };
                SessionResponse::with_event(EditorEvent::SuggestionFailed {
                    model_id,
                    reason: FailureReason::Unavailable,
                })
            }
        }
    }

    /// Insert the displayed suggestion at its anchor. No-op when nothing is
    /// displayed or the buffer moved on.
    pub fn accept_suggestion(&mut self, now: Instant) -> SessionResponse {
        let (suggestion, revision) = match &self.suggestion {
            SuggestionState::Displaying {
                suggestion,
                revision,
            } => (suggestion.clone(), *revision),
            _ => return SessionResponse::empty(),
        };
        if revision != self.buffer.revision || suggestion.anchor != self.buffer.cursor {
            return SessionResponse::empty();
        }

        self.suggestion = SuggestionState::Idle;
        self.buffer
            .content
            .insert_str(suggestion.anchor, &suggestion.text);
        self.buffer.cursor = suggestion.anchor + suggestion.text.len();
        self.buffer.selection = None;
        self.buffer.revision += 1;
        self.debounce.arm(now + self.settings.suggestion_debounce());
        debug!(len = suggestion.text.len(), "suggestion accepted");

        let mut resp = SessionResponse::with_event(EditorEvent::SuggestionCleared);
        resp.push(EditorEvent::ContentReplaced {
            content: self.buffer.content.clone(),
            cursor: self.buffer.cursor,
        });
        resp
    }

    /// Dismiss the displayed suggestion (Escape).
    pub fn reject_suggestion(&mut self) -> SessionResponse {
        if !matches!(self.suggestion, SuggestionState::Displaying { .. }) {
            return SessionResponse::empty();
        }
        self.suggestion = SuggestionState::Idle;
        SessionResponse::with_event(EditorEvent::SuggestionCleared)
    }

    /// Turn inline suggestions on or off.
    pub fn set_enabled(&mut self, enabled: bool) -> SessionResponse {
        self.settings = self.settings.with_ai_enabled(enabled);
        if enabled {
            return SessionResponse::empty();
        }
        self.debounce.cancel();
        self.trigger_deferred = false;
        match self.dismiss_suggestion() {
            Some(ev) => SessionResponse::with_event(ev),
            None => SessionResponse::empty(),
        }
    }

    /// Return to Idle, invalidating a pending request. Returns the event to
    /// publish when a displayed suggestion disappears.
    pub(crate) fn dismiss_suggestion(&mut self) -> Option<EditorEvent> {
        match std::mem::replace(&mut self.suggestion, SuggestionState::Idle) {
            SuggestionState::Displaying { .. } => Some(EditorEvent::SuggestionCleared),
            SuggestionState::Pending { generation, .. } => {
                debug!(generation, "pending suggestion invalidated");
                self.suggestion_generation += 1;
                None
            }
            SuggestionState::Idle | SuggestionState::Failed { .. } => None,
        }
    }

    /// Issue a request if every trigger condition holds. Defers when a
    /// request is still outstanding.
    pub(crate) fn try_trigger(&mut self) -> Option<SuggestionRequest> {
        if !self.settings.ai.enabled
            || !matches!(self.suggestion, SuggestionState::Idle)
            || !self.buffer.cursor_at_end()
            || self.buffer.selection.is_some()
            || char_len(&self.buffer.content) <= self.settings.suggestion.min_context_chars
        {
            return None;
        }
        if self.in_flight.is_some() {
            debug!("trigger deferred until outstanding response");
            self.trigger_deferred = true;
            return None;
        }

        self.suggestion_generation += 1;
        let generation = self.suggestion_generation;
        let context = self.buffer.content[..self.buffer.cursor].to_string();
        self.in_flight = Some(generation);
        self.suggestion = SuggestionState::Pending {
            generation,
            anchor: self.buffer.cursor,
            revision: self.buffer.revision,
            context: context.clone(),
        };
        debug!(generation, model = %self.failover.active(), "suggestion requested");
        Some(SuggestionRequest {
            generation,
            context,
            options: self.completion_options(),
        })
    }

    pub(crate) fn completion_options(&self) -> CompletionOptions {
        CompletionOptions::from_settings(&self.settings, self.failover.active())
    }
}

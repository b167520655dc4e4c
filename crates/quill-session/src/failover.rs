use std::time::Instant;

use tracing::{debug, info};

use quill_core::events::{EditorEvent, SwitchReason};
use quill_core::settings::EditorSettings;

use super::types::{PendingFallback, SessionError, SessionResponse, SuggestionState};
use super::EditorSession;

impl EditorSession {
    /// After a degenerate result: offer the next untried model and schedule
    /// the automatic switch.
    ///
    /// When the round robin comes back to the model that just failed (a
    /// single-model registry, or every other model tried) the tried set is
    /// reset and nothing is proposed. The caller only sees the
    /// `SuggestionFailed` event; the next edit retries the same model.
    pub(crate) fn propose_fallback(&mut self, now: Instant) -> SessionResponse {
        self.failover.mark_active_tried();
        let from = self.failover.active().to_string();
        let to = self.failover.next_candidate(&self.registry).id.clone();
        if to == from {
            debug!(model = %from, "no other model to fall back to; tried set reset");
            self.failover.clear_tried();
            self.fallback = None;
            return SessionResponse::empty();
        }
        debug!(%from, %to, "fallback proposed");
        self.fallback = Some(PendingFallback {
            from: from.clone(),
            to: to.clone(),
            deadline: now + self.settings.failover_delay(),
        });
        SessionResponse::with_event(EditorEvent::FallbackProposed { from, to })
    }

    /// Take the offered fallback now instead of waiting for the timer.
    pub fn accept_fallback(&mut self, now: Instant) -> SessionResponse {
        if self.fallback.is_none() {
            return SessionResponse::empty();
        }
        self.switch_to_fallback(SwitchReason::UserAccepted, now)
    }

    /// Activate the next model and restart the debounce so it gets a try
    /// without waiting for another keystroke.
    pub(crate) fn switch_to_fallback(&mut self, reason: SwitchReason, now: Instant) -> SessionResponse {
        self.fallback = None;
        let from = self.failover.active().to_string();
        let to = self.failover.advance(&self.registry).to_string();
        self.settings = self.settings.with_model(&to);
        if matches!(self.suggestion, SuggestionState::Failed { .. }) {
            self.suggestion = SuggestionState::Idle;
        }
        self.debounce.arm(now + self.settings.suggestion_debounce());
        info!(%from, %to, ?reason, "model switched");
        SessionResponse::with_event(EditorEvent::ModelSwitched { from, to, reason })
    }

    /// Manual model choice. Clears the tried set, cancels any proposed
    /// fallback and drops whatever suggestion work is under way.
    pub fn set_model(&mut self, model_id: &str) -> Result<SessionResponse, SessionError> {
        if !self.registry.contains(model_id) {
            return Err(SessionError::UnknownModel(model_id.to_string()));
        }
        let mut resp = SessionResponse::empty();
        if let Some(ev) = self.dismiss_suggestion() {
            resp.push(ev);
        }
        self.fallback = None;
        let from = self.failover.active().to_string();
        self.failover.reset(model_id);
        self.settings = self.settings.with_model(model_id);
        if from != model_id {
            info!(%from, to = model_id, "model selected");
            resp.push(EditorEvent::ModelSwitched {
                from,
                to: model_id.to_string(),
                reason: SwitchReason::Manual,
            });
        }
        Ok(resp)
    }

    /// Replace the session's settings. A changed model goes through
    /// `set_model`; disabling AI clears suggestion state.
    pub fn apply_settings(&mut self, settings: EditorSettings) -> Result<SessionResponse, SessionError> {
        let mut resp = SessionResponse::empty();
        if settings.ai.model != self.failover.active() {
            resp.merge(self.set_model(&settings.ai.model)?);
        }
        let enabled = settings.ai.enabled;
        let model = self.failover.active().to_string();
        self.settings = settings.with_model(&model);
        if !enabled {
            resp.merge(self.set_enabled(false));
        }
        Ok(resp)
    }
}

mod proptest_fsm;

use std::sync::Arc;
use std::time::{Duration, Instant};

use quill_core::models::{ModelDescriptor, ModelRegistry};
use quill_core::settings::EditorSettings;

use super::{EditorSession, SessionResponse, SuggestionRequest};

/// Longer than the default 30-char minimum context.
pub(super) const LONG: &str = "The quick brown fox jumps over the lazy dog";

pub(super) const DEBOUNCE: Duration = Duration::from_millis(1500);
pub(super) const FAILOVER: Duration = Duration::from_secs(8);

pub(super) fn registry(ids: &[&str]) -> Arc<ModelRegistry> {
    let models = ids
        .iter()
        .map(|id| ModelDescriptor::new(id, &id.to_uppercase()))
        .collect();
    Arc::new(ModelRegistry::new(models).unwrap())
}

pub(super) fn make_session(ids: &[&str]) -> EditorSession {
    let settings = EditorSettings::default().with_model(ids[0]);
    EditorSession::new(settings, registry(ids))
}

pub(super) fn ms(t0: Instant, millis: u64) -> Instant {
    t0 + Duration::from_millis(millis)
}

/// Type `text` as the whole document with the cursor at the end.
pub(super) fn type_text(session: &mut EditorSession, text: &str, now: Instant) -> SessionResponse {
    session.handle_edit(text, text.len(), now)
}

/// Type `text` at `t0` and let the debounce elapse; returns the request.
pub(super) fn request_suggestion(
    session: &mut EditorSession,
    text: &str,
    t0: Instant,
) -> SuggestionRequest {
    type_text(session, text, t0);
    session
        .tick(t0 + DEBOUNCE)
        .suggestion_request
        .expect("debounce should trigger a request")
}

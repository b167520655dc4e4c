//! Property-based tests for the EditorSession state machine.
//!
//! Random sequences of edits, cursor moves, timer ticks and completion
//! results; structural invariants are checked after every step.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use quill_core::completion::CompletionError;
use quill_core::events::{EditorEvent, SwitchReason};
use quill_core::prompt::SelectionAction;

use super::make_session;
use crate::{EditorSession, SessionResponse};

const MODELS: [&str; 3] = ["a", "b", "c"];

#[derive(Debug, Clone)]
enum Action {
    Type(char),
    Backspace,
    MoveCursor(usize),
    MoveToEnd,
    Select(usize, usize),
    Advance(u64),
    ReplyText,
    ReplyEcho,
    ReplyBlank,
    ReplyError,
    Accept,
    Reject,
    AcceptFallback,
    SetModel(usize),
    BeginAction(usize, usize),
    ReplySelection,
    ToggleEnabled,
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        30 => prop::sample::select(vec!['a', 'e', ' ', 'é', '.', 'x']).prop_map(Action::Type),
        4 => Just(Action::Backspace),
        3 => (0usize..80).prop_map(Action::MoveCursor),
        4 => Just(Action::MoveToEnd),
        2 => (0usize..80, 0usize..80).prop_map(|(a, b)| Action::Select(a, b)),
        15 => prop::sample::select(vec![100u64, 700, 1500, 4000, 8000]).prop_map(Action::Advance),
        6 => Just(Action::ReplyText),
        4 => Just(Action::ReplyEcho),
        2 => Just(Action::ReplyBlank),
        2 => Just(Action::ReplyError),
        4 => Just(Action::Accept),
        2 => Just(Action::Reject),
        2 => Just(Action::AcceptFallback),
        1 => (0usize..MODELS.len()).prop_map(Action::SetModel),
        2 => (0usize..80, 0usize..80).prop_map(|(a, b)| Action::BeginAction(a, b)),
        2 => Just(Action::ReplySelection),
        1 => Just(Action::ToggleEnabled),
    ]
}

/// Tracks what the harness owes the session.
struct Harness {
    session: EditorSession,
    now: Instant,
    /// Outstanding suggestion requests: (generation, context).
    outstanding: Vec<(u64, String)>,
    selection: Option<u64>,
}

impl Harness {
    fn new() -> Self {
        let mut session = make_session(&MODELS);
        session.load_document("The quick brown fox jumps over");
        Self {
            session,
            now: Instant::now(),
            outstanding: Vec::new(),
            selection: None,
        }
    }

    fn boundary(&self, offset: usize) -> usize {
        let content = self.session.content();
        let mut i = offset.min(content.len());
        while !content.is_char_boundary(i) {
            i -= 1;
        }
        i
    }

    fn edit(&mut self, content: String, cursor: usize) -> SessionResponse {
        self.session.handle_edit(&content, cursor, self.now)
    }

    fn reply(&mut self, result: impl FnOnce(&str) -> Result<String, CompletionError>) -> Option<SessionResponse> {
        if self.outstanding.is_empty() {
            return None;
        }
        let (generation, context) = self.outstanding.remove(0);
        Some(self.session.receive_suggestion(generation, result(&context), self.now))
    }

    fn execute(&mut self, action: &Action) -> Option<SessionResponse> {
        match action {
            Action::Type(c) => {
                let cursor = self.session.cursor();
                let mut content = self.session.content().to_string();
                content.insert(cursor, *c);
                Some(self.edit(content, cursor + c.len_utf8()))
            }
            Action::Backspace => {
                let cursor = self.session.cursor();
                if cursor == 0 {
                    return None;
                }
                let start = self.boundary(cursor - 1);
                let mut content = self.session.content().to_string();
                content.replace_range(start..cursor, "");
                Some(self.edit(content, start))
            }
            Action::MoveCursor(pos) => Some(self.session.handle_cursor(*pos, self.now)),
            Action::MoveToEnd => {
                let end = self.session.content().len();
                Some(self.session.handle_cursor(end, self.now))
            }
            Action::Select(a, b) => {
                let (s, e) = (*a.min(b), *a.max(b));
                Some(self.session.handle_selection(Some(s..e), self.now))
            }
            Action::Advance(millis) => {
                self.now += Duration::from_millis(*millis);
                Some(self.session.tick(self.now))
            }
            Action::ReplyText => self.reply(|_| Ok(" continues here".to_string())),
            Action::ReplyEcho => self.reply(|ctx| Ok(ctx.to_string())),
            Action::ReplyBlank => self.reply(|_| Ok(" \n".to_string())),
            Action::ReplyError => self.reply(|_| Err(CompletionError::Unreachable("down".into()))),
            Action::Accept => Some(self.session.accept_suggestion(self.now)),
            Action::Reject => Some(self.session.reject_suggestion()),
            Action::AcceptFallback => Some(self.session.accept_fallback(self.now)),
            Action::SetModel(i) => self.session.set_model(MODELS[*i]).ok(),
            Action::BeginAction(a, b) => {
                let (s, e) = (self.boundary(*a.min(b)), self.boundary(*a.max(b)));
                self.session
                    .begin_selection_action(s..e, SelectionAction::Rewrite)
                    .ok()
            }
            Action::ReplySelection => {
                let id = self.selection.take()?;
                Some(self.session.receive_selection_result(id, Ok("fresh".into()), self.now))
            }
            Action::ToggleEnabled => {
                let enabled = self.session.settings().ai.enabled;
                Some(self.session.set_enabled(!enabled))
            }
        }
    }
}

fn check_invariants(h: &mut Harness, resp: &SessionResponse, tried_before: &HashSet<String>, action: &Action) {
    let session = &h.session;
    let content = session.content();

    // 1. Cursor is a valid boundary
    assert!(
        session.cursor() <= content.len() && content.is_char_boundary(session.cursor()),
        "cursor {} invalid for {:?} after {:?}",
        session.cursor(),
        content,
        action,
    );

    // 2. A suggestion is only displayed at the end of the document, at its anchor
    if let Some(s) = session.suggestion() {
        assert_eq!(s.anchor, content.len(), "suggestion not at end after {action:?}");
        assert_eq!(session.cursor(), s.anchor, "cursor left anchor after {action:?}");
    }

    // 3. At most one request in flight
    if let Some(req) = &resp.suggestion_request {
        assert!(
            h.outstanding.is_empty(),
            "second request issued while {} outstanding after {:?}",
            h.outstanding.len(),
            action,
        );
        assert_eq!(req.context, content, "context must be the whole text before the cursor");
        h.outstanding.push((req.generation, req.context.clone()));
    }
    assert_eq!(session.has_request_in_flight(), !h.outstanding.is_empty());

    // 4. Round robin never re-selects a tried model while an untried one exists
    for ev in &resp.events {
        if let EditorEvent::ModelSwitched { to, reason, .. } = ev {
            if *reason != SwitchReason::Manual && tried_before.len() < MODELS.len() {
                assert!(
                    !tried_before.contains(to),
                    "switched to tried model {to} (tried {tried_before:?}) after {action:?}",
                );
            }
        }
    }

    // 5. Selection requests are tracked one at a time
    if let Some(req) = &resp.selection_request {
        h.selection = Some(req.id);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn session_invariants_hold(actions in prop::collection::vec(arb_action(), 1..120)) {
        let mut h = Harness::new();
        for action in &actions {
            let tried_before = h.session.failover().tried().clone();
            if let Some(resp) = h.execute(action) {
                check_invariants(&mut h, &resp, &tried_before, action);
            }
        }
    }
}

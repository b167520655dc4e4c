use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use quill_core::completion::{CompletionError, CompletionOptions, CompletionService};
use quill_core::events::{EditorEvent, SaveStatus, SelectionOutcome, SwitchReason};
use quill_core::local::MemoryCache;
use quill_core::models::{ModelDescriptor, ModelRegistry};
use quill_core::prompt::{DocumentCommand, Prompt, SelectionAction};
use quill_core::remote::{Identity, MemoryRemoteStore};
use quill_core::settings::EditorSettings;

use super::*;

const LONG: &str = "The quick brown fox jumps over the lazy dog";
const DEBOUNCE: Duration = Duration::from_millis(1500);
const FAILOVER: Duration = Duration::from_secs(8);

/// Continuations answered per model; selection actions get `action`.
#[derive(Default)]
struct Scripted {
    continuations: HashMap<String, String>,
    action: String,
}

impl Scripted {
    fn reply(mut self, model: &str, text: &str) -> Self {
        self.continuations.insert(model.to_string(), text.to_string());
        self
    }

    fn action(mut self, text: &str) -> Self {
        self.action = text.to_string();
        self
    }
}

impl CompletionService for Scripted {
    fn complete(&self, prompt: &Prompt, options: &CompletionOptions) -> Result<String, CompletionError> {
        // selection prompts ask for far longer output than continuations
        if prompt.max_tokens >= 2000 {
            return Ok(self.action.clone());
        }
        self.continuations
            .get(&options.model_id)
            .cloned()
            .ok_or(CompletionError::Status(503))
    }
}

fn alice() -> Identity {
    Identity::new("alice", "token-a")
}

fn engine_with(service: Scripted) -> (EditorEngine, Arc<MemoryRemoteStore>) {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.register(&alice());
    let registry = ModelRegistry::new(vec![
        ModelDescriptor::new("haiku", "Haiku"),
        ModelDescriptor::new("sonnet", "Sonnet"),
    ])
    .unwrap();
    let engine = EditorEngine::new(
        EditorSettings::default().with_model("haiku"),
        Arc::new(registry),
        Arc::new(service),
        Box::new(MemoryCache::new()),
        remote.clone(),
    )
    .unwrap();
    (engine, remote)
}

/// Poll until an event matching `pred` shows up; returns everything seen.
fn wait_for(engine: &mut EditorEngine, now: Instant, pred: impl Fn(&EditorEvent) -> bool) -> Vec<EditorEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    loop {
        seen.extend(engine.poll(now));
        if seen.iter().any(&pred) {
            return seen;
        }
        assert!(Instant::now() < deadline, "no matching event; saw {seen:?}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn status_changed(status: SaveStatus) -> EditorEvent {
    EditorEvent::SaveStatusChanged { status }
}

// --- suggestions ---

#[test]
fn test_suggestion_round_trip_updates_document() {
    let (mut engine, _) = engine_with(Scripted::default().reply("haiku", " and naps."));
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit(LONG, LONG.len(), t0).unwrap();
    engine.tick(t0 + DEBOUNCE);

    let events = wait_for(&mut engine, t0 + DEBOUNCE, |e| {
        matches!(e, EditorEvent::SuggestionAvailable { .. })
    });
    assert!(events.contains(&EditorEvent::SuggestionAvailable {
        text: " and naps.".into(),
        anchor: LONG.len(),
    }));

    let events = engine.accept_suggestion(t0 + DEBOUNCE * 2);
    assert!(events.iter().any(|e| matches!(e, EditorEvent::ContentReplaced { .. })));
    let expected = format!("{LONG} and naps.");
    assert_eq!(engine.current_document().unwrap().content, expected);

    engine.flush(t0 + DEBOUNCE * 2);
    let id = engine.current_document().unwrap().id.clone();
    assert_eq!(engine.store.get(&id).unwrap().unwrap().content, expected);
}

#[test]
fn test_degenerate_result_then_accepted_fallback() {
    let service = Scripted::default()
        .reply("haiku", "   ")
        .reply("sonnet", " over the fence.");
    let (mut engine, _) = engine_with(service);
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit(LONG, LONG.len(), t0).unwrap();
    engine.tick(t0 + DEBOUNCE);

    let events = wait_for(&mut engine, t0 + DEBOUNCE, |e| {
        matches!(e, EditorEvent::FallbackProposed { .. })
    });
    assert!(events.contains(&EditorEvent::FallbackProposed {
        from: "haiku".into(),
        to: "sonnet".into(),
    }));
    assert!(!events.iter().any(|e| matches!(e, EditorEvent::SuggestionAvailable { .. })));

    let events = engine.accept_fallback(t0 + DEBOUNCE);
    assert!(events.contains(&EditorEvent::ModelSwitched {
        from: "haiku".into(),
        to: "sonnet".into(),
        reason: SwitchReason::UserAccepted,
    }));
    assert_eq!(engine.session().active_model(), "sonnet");

    let t1 = t0 + Duration::from_secs(3);
    let text = format!("{LONG}!");
    engine.edit(&text, text.len(), t1).unwrap();
    engine.tick(t1 + DEBOUNCE);
    let events = wait_for(&mut engine, t1 + DEBOUNCE, |e| {
        matches!(e, EditorEvent::SuggestionAvailable { .. })
    });
    assert!(events.contains(&EditorEvent::SuggestionAvailable {
        text: " over the fence.".into(),
        anchor: text.len(),
    }));
}

#[test]
fn test_fallback_fires_after_delay() {
    let (mut engine, _) = engine_with(Scripted::default().reply("haiku", ""));
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit(LONG, LONG.len(), t0).unwrap();
    let t1 = t0 + DEBOUNCE;
    engine.tick(t1);
    wait_for(&mut engine, t1, |e| matches!(e, EditorEvent::FallbackProposed { .. }));

    let early = engine.tick(t1 + FAILOVER / 2);
    assert!(!early.iter().any(|e| matches!(e, EditorEvent::ModelSwitched { .. })));
    let events = engine.tick(t1 + FAILOVER);
    assert!(events.contains(&EditorEvent::ModelSwitched {
        from: "haiku".into(),
        to: "sonnet".into(),
        reason: SwitchReason::Fallback,
    }));
}

#[test]
fn test_service_error_is_passive() {
    let (mut engine, _) = engine_with(Scripted::default());
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit(LONG, LONG.len(), t0).unwrap();
    engine.tick(t0 + DEBOUNCE);
    let events = wait_for(&mut engine, t0 + DEBOUNCE, |e| {
        matches!(e, EditorEvent::SuggestionFailed { .. })
    });
    assert!(!events.iter().any(|e| matches!(e, EditorEvent::FallbackProposed { .. })));
    assert_eq!(engine.session().active_model(), "haiku");
    assert!(engine.session().pending_fallback().is_none());
}

/// Panics on the first request, then continues every prompt.
struct PanicsOnce {
    calls: std::sync::atomic::AtomicUsize,
}

impl CompletionService for PanicsOnce {
    fn complete(&self, _prompt: &Prompt, _options: &CompletionOptions) -> Result<String, CompletionError> {
        if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            panic!("service crashed");
        }
        Ok(" continued".into())
    }
}

#[test]
fn test_suggestions_recover_after_service_panic() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let mut engine = EditorEngine::new(
        EditorSettings::default(),
        Arc::new(ModelRegistry::builtin()),
        Arc::new(PanicsOnce {
            calls: Default::default(),
        }),
        Box::new(MemoryCache::new()),
        remote,
    )
    .unwrap();
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit(LONG, LONG.len(), t0).unwrap();
    engine.tick(t0 + DEBOUNCE);
    wait_for(&mut engine, t0 + DEBOUNCE, |e| {
        matches!(e, EditorEvent::SuggestionFailed { .. })
    });
    assert!(!engine.session().has_request_in_flight());

    let t1 = t0 + Duration::from_secs(3);
    let text = format!("{LONG}.");
    engine.edit(&text, text.len(), t1).unwrap();
    engine.tick(t1 + DEBOUNCE);
    let events = wait_for(&mut engine, t1 + DEBOUNCE, |e| {
        matches!(e, EditorEvent::SuggestionAvailable { .. })
    });
    assert!(events.contains(&EditorEvent::SuggestionAvailable {
        text: " continued".into(),
        anchor: text.len(),
    }));
}

// --- selection actions ---

#[test]
fn test_selection_action_replaces_range() {
    let (mut engine, _) = engine_with(Scripted::default().action("dog"));
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit("The cat sat", 11, t0).unwrap();

    let events = engine
        .run_selection_action(4..7, SelectionAction::Rewrite, t0)
        .unwrap();
    assert!(events.contains(&EditorEvent::SelectionActionStarted {
        action: SelectionAction::Rewrite,
    }));
    wait_for(&mut engine, t0, |e| {
        matches!(
            e,
            EditorEvent::SelectionActionFinished {
                outcome: SelectionOutcome::Applied,
                ..
            }
        )
    });
    assert_eq!(engine.current_document().unwrap().content, "The dog sat");
    assert_eq!(engine.session().cursor(), 7);
}

#[test]
fn test_selection_result_after_edit_is_stale() {
    let (mut engine, _) = engine_with(Scripted::default().action("dog"));
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit("The cat sat", 11, t0).unwrap();
    engine
        .run_selection_action(4..7, SelectionAction::Improve, t0)
        .unwrap();
    engine.edit("The cat sat down", 16, t0).unwrap();

    let events = wait_for(&mut engine, t0, |e| {
        matches!(e, EditorEvent::SelectionActionFinished { .. })
    });
    assert!(events.contains(&EditorEvent::SelectionActionFinished {
        action: SelectionAction::Improve,
        outcome: SelectionOutcome::Stale,
    }));
    assert_eq!(engine.current_document().unwrap().content, "The cat sat down");
}

// --- document commands ---

#[test]
fn test_expand_command_updates_document() {
    let (mut engine, _) = engine_with(Scripted::default().action("The fox escaped."));
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit("The fox ran.", 12, t0).unwrap();

    let events = engine.run_document_command(DocumentCommand::Expand, t0).unwrap();
    assert!(events.contains(&EditorEvent::DocumentCommandStarted {
        command: DocumentCommand::Expand,
    }));
    wait_for(&mut engine, t0, |e| matches!(e, EditorEvent::DocumentCommandFinished { .. }));
    let doc = engine.current_document().unwrap();
    assert_eq!(doc.content, "The fox ran.\n\nThe fox escaped.");
    assert_eq!(doc.stats().words, 6);
}

#[test]
fn test_summarize_command_leaves_document() {
    let (mut engine, _) = engine_with(Scripted::default().action("Foxes run."));
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit("The fox ran.", 12, t0).unwrap();
    engine.run_document_command(DocumentCommand::Summarize, t0).unwrap();
    let events = wait_for(&mut engine, t0, |e| matches!(e, EditorEvent::SummaryReady { .. }));
    assert!(events.contains(&EditorEvent::SummaryReady {
        summary: "Foxes run.".into(),
    }));
    assert_eq!(engine.current_document().unwrap().content, "The fox ran.");
}

#[test]
fn test_command_result_after_edit_is_stale() {
    let (mut engine, _) = engine_with(Scripted::default().action("Polished."));
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit("Rough draft", 11, t0).unwrap();
    engine.run_document_command(DocumentCommand::Enhance, t0).unwrap();
    engine.edit("Rough draft two", 15, t0).unwrap();
    let events = wait_for(&mut engine, t0, |e| {
        matches!(e, EditorEvent::DocumentCommandFinished { .. })
    });
    assert!(events.contains(&EditorEvent::DocumentCommandFinished {
        command: DocumentCommand::Enhance,
        outcome: SelectionOutcome::Stale,
    }));
    assert_eq!(engine.current_document().unwrap().content, "Rough draft two");
}

#[test]
fn test_command_on_empty_document_rejected() {
    let (mut engine, _) = engine_with(Scripted::default());
    let t0 = Instant::now();
    assert!(matches!(
        engine.run_document_command(DocumentCommand::Rewrite, t0),
        Err(EngineError::NoDocument)
    ));
    engine.new_document(t0).unwrap();
    assert!(matches!(
        engine.run_document_command(DocumentCommand::Rewrite, t0),
        Err(EngineError::Command(CommandError::EmptyDocument))
    ));
}

#[test]
fn test_operations_need_an_open_document() {
    let (mut engine, _) = engine_with(Scripted::default());
    let t0 = Instant::now();
    assert!(matches!(engine.edit("x", 1, t0), Err(EngineError::NoDocument)));
    assert!(matches!(engine.set_title("x", t0), Err(EngineError::NoDocument)));
    assert!(matches!(
        engine.run_selection_action(0..1, SelectionAction::Expand, t0),
        Err(EngineError::NoDocument)
    ));
    engine.new_document(t0).unwrap();
    engine.edit("abc", 3, t0).unwrap();
    assert!(matches!(
        engine.run_selection_action(1..9, SelectionAction::Expand, t0),
        Err(EngineError::Selection(_))
    ));
}

// --- documents and autosave ---

#[test]
fn test_autosave_on_tick() {
    let (mut engine, _) = engine_with(Scripted::default());
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    let events = engine.edit("hello", 5, t0).unwrap();
    assert!(events.contains(&status_changed(SaveStatus::Saving)));
    let events = engine.set_title("Greeting", t0 + Duration::from_millis(200)).unwrap();
    assert!(events.is_empty());

    assert!(!engine.tick(t0 + Duration::from_millis(1000)).contains(&status_changed(SaveStatus::Saved)));
    let events = engine.tick(t0 + Duration::from_millis(1200));
    assert!(events.contains(&status_changed(SaveStatus::Saved)));
    assert_eq!(engine.save_status(), Some(SaveStatus::Saved));

    let docs = engine.documents().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].title, "Greeting");
    assert_eq!(docs[0].content, "hello");
}

#[test]
fn test_switching_documents_flushes_edits() {
    let (mut engine, _) = engine_with(Scripted::default());
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit("alpha", 5, t0).unwrap();
    let first = engine.current_document().unwrap().id.clone();
    engine.new_document(t0).unwrap();
    engine.edit("beta", 4, t0).unwrap();

    engine.open_document(&first, t0).unwrap();
    assert_eq!(engine.session().content(), "alpha");
    let contents: Vec<String> = engine
        .documents()
        .unwrap()
        .into_iter()
        .map(|d| d.content)
        .collect();
    assert!(contents.contains(&"alpha".to_string()));
    assert!(contents.contains(&"beta".to_string()));
    assert!(matches!(
        engine.open_document("missing", t0),
        Err(EngineError::UnknownDocument(_))
    ));
}

#[test]
fn test_delete_open_document_closes_it() {
    let (mut engine, _) = engine_with(Scripted::default());
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit("doomed", 6, t0).unwrap();
    let id = engine.current_document().unwrap().id.clone();

    engine.delete_document(&id, t0).unwrap();
    assert!(engine.current_document().is_none());
    assert_eq!(engine.session().content(), "");
    assert!(engine.documents().unwrap().is_empty());
    // pending autosave was dropped with it
    engine.tick(t0 + Duration::from_secs(5));
    assert!(engine.documents().unwrap().is_empty());
    assert!(matches!(
        engine.delete_document(&id, t0),
        Err(EngineError::UnknownDocument(_))
    ));
}

// --- account ---

#[test]
fn test_sign_in_moves_open_document() {
    let (mut engine, remote) = engine_with(Scripted::default());
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    engine.edit("draft", 5, t0).unwrap();

    let (report, _) = engine.sign_in(alice(), t0).unwrap();
    assert_eq!(report.migrated, 1);
    assert_eq!(
        engine.current_document().unwrap().owner_id.as_deref(),
        Some("alice")
    );
    assert!(engine.store.wait_for_sync(Duration::from_secs(5)));
    let pushed = remote.snapshot();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].content, "draft");

    // later edits keep syncing to the account
    engine.edit("draft two", 9, t0).unwrap();
    engine.flush(t0);
    assert!(engine.store.wait_for_sync(Duration::from_secs(5)));
    assert_eq!(remote.snapshot()[0].content, "draft two");
}

#[test]
fn test_sign_in_rejected_stays_anonymous() {
    let (mut engine, _) = engine_with(Scripted::default());
    let t0 = Instant::now();
    engine.new_document(t0).unwrap();
    let err = engine.sign_in(Identity::new("alice", "bad"), t0).unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Remote(_))));
    assert!(engine.current_document().unwrap().is_anonymous());
}

#[test]
fn test_sign_out_closes_account_document() {
    let (mut engine, _) = engine_with(Scripted::default());
    let t0 = Instant::now();
    engine.sign_in(alice(), t0).unwrap();
    engine.new_document(t0).unwrap();
    engine.edit("private", 7, t0).unwrap();

    engine.sign_out(t0);
    assert!(engine.current_document().is_none());
    assert!(engine.documents().unwrap().is_empty());
    assert!(matches!(
        engine.sync_now(t0),
        Err(EngineError::Store(StoreError::NotSignedIn))
    ));
}

#[test]
fn test_clear_account_closes_document() {
    let (mut engine, remote) = engine_with(Scripted::default());
    let t0 = Instant::now();
    engine.sign_in(alice(), t0).unwrap();
    engine.new_document(t0).unwrap();
    assert_eq!(engine.sync_now(t0).unwrap(), 1);
    assert!(engine.store.wait_for_sync(Duration::from_secs(5)));

    let (count, _) = engine.clear_account(t0).unwrap();
    assert_eq!(count, 1);
    assert!(engine.current_document().is_none());
    assert!(remote.snapshot().is_empty());
}

// --- settings ---

#[test]
fn test_apply_settings_switches_model() {
    let (mut engine, _) = engine_with(Scripted::default());
    let t0 = Instant::now();
    let settings = engine.session().settings().with_model("sonnet");
    let events = engine.apply_settings(settings, t0).unwrap();
    assert!(events.contains(&EditorEvent::ModelSwitched {
        from: "haiku".into(),
        to: "sonnet".into(),
        reason: SwitchReason::Manual,
    }));
    assert!(matches!(
        engine.set_model("gpt-9", t0),
        Err(EngineError::Session(_))
    ));
    assert!(engine.set_enabled(false, t0).is_empty());
}

#[test]
fn test_from_settings_file_rejects_bad_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quill.toml");
    std::fs::write(&path, "[ai]\nenabled = maybe").unwrap();
    let err = EditorEngine::from_settings_file(&path, dir.path()).err().unwrap();
    assert!(matches!(err, EngineError::Settings(_)));
}

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
#[cfg(test)]
use std::time::Duration;

use tracing::{debug, debug_span, error};

use quill_core::completion::{run_task, CompletionError, CompletionOptions, CompletionService, CompletionTask};
use quill_session::{CommandRequest, SelectionRequest, SuggestionRequest};

// ---------------------------------------------------------------------------
// Work / Result types
// ---------------------------------------------------------------------------

struct SuggestionWork {
    request: SuggestionRequest,
}

pub(crate) struct SuggestionResult {
    pub generation: u64,
    pub result: Result<String, CompletionError>,
}

/// A selection action or document command; the lane decides which.
struct ActionWork {
    id: u64,
    task: CompletionTask,
    options: CompletionOptions,
}

pub(crate) struct ActionResult {
    pub id: u64,
    pub result: Result<String, CompletionError>,
}

/// One explicit-action thread: its work queue, results and live id.
struct ActionLane {
    tx: mpsc::Sender<ActionWork>,
    rx: Mutex<mpsc::Receiver<ActionResult>>,
    live: Arc<AtomicU64>,
}

impl ActionLane {
    fn spawn(name: &'static str, service: Arc<dyn CompletionService>) -> io::Result<Self> {
        let live = Arc::new(AtomicU64::new(0));
        let (work_tx, work_rx) = mpsc::channel::<ActionWork>();
        let (result_tx, result_rx) = mpsc::channel::<ActionResult>();
        let gen = Arc::clone(&live);
        thread::Builder::new()
            .name(name.into())
            .spawn(move || action_worker(name, work_rx, result_tx, gen, service))?;
        Ok(Self {
            tx: work_tx,
            rx: Mutex::new(result_rx),
            live,
        })
    }

    fn submit(&self, work: ActionWork) -> bool {
        self.live.store(work.id, Ordering::SeqCst);
        self.tx.send(work).is_ok()
    }

    fn try_recv(&self) -> Option<ActionResult> {
        let rx = self.rx.lock().ok()?;
        rx.try_recv().ok()
    }

    #[cfg(test)]
    fn recv_timeout(&self, timeout: Duration) -> Option<ActionResult> {
        let rx = self.rx.lock().ok()?;
        rx.recv_timeout(timeout).ok()
    }
}

// ---------------------------------------------------------------------------
// CompletionWorker
// ---------------------------------------------------------------------------

/// Runs completion requests off the owner's thread. One thread for inline
/// suggestions, one each for selection actions and document commands, so a
/// long rewrite never delays ghost text.
pub(crate) struct CompletionWorker {
    suggestion_tx: mpsc::Sender<SuggestionWork>,
    suggestion_rx: Mutex<mpsc::Receiver<SuggestionResult>>,
    /// Generation the session still wants; anything else is skipped.
    suggestion_gen: Arc<AtomicU64>,

    selection: ActionLane,
    commands: ActionLane,
}

impl CompletionWorker {
    pub fn new(service: Arc<dyn CompletionService>) -> io::Result<Self> {
        let suggestion_gen = Arc::new(AtomicU64::new(0));

        // Suggestion worker
        let (work_tx, work_rx) = mpsc::channel::<SuggestionWork>();
        let (result_tx, result_rx) = mpsc::channel::<SuggestionResult>();
        {
            let service = Arc::clone(&service);
            let gen = Arc::clone(&suggestion_gen);
            thread::Builder::new()
                .name("quill-suggestions".into())
                .spawn(move || suggestion_worker(work_rx, result_tx, gen, service))?;
        }

        Ok(Self {
            suggestion_tx: work_tx,
            suggestion_rx: Mutex::new(result_rx),
            suggestion_gen,
            selection: ActionLane::spawn("quill-selection", Arc::clone(&service))?,
            commands: ActionLane::spawn("quill-commands", service)?,
        })
    }

    /// Returns false when the worker thread is gone; no reply will come.
    pub fn submit_suggestion(&self, request: SuggestionRequest) -> bool {
        self.suggestion_gen
            .store(request.generation, Ordering::SeqCst);
        self.suggestion_tx.send(SuggestionWork { request }).is_ok()
    }

    /// Returns false when the worker thread is gone; no reply will come.
    pub fn submit_selection(&self, request: SelectionRequest) -> bool {
        self.selection.submit(ActionWork {
            id: request.id,
            task: request.task(),
            options: request.options,
        })
    }

    /// Returns false when the worker thread is gone; no reply will come.
    pub fn submit_command(&self, request: CommandRequest) -> bool {
        self.commands.submit(ActionWork {
            id: request.id,
            task: request.task(),
            options: request.options,
        })
    }

    /// Record which suggestion generation is still live (`None`: none is).
    /// Queued work for any other generation is skipped, not sent.
    pub fn set_live_suggestion(&self, generation: Option<u64>) {
        self.suggestion_gen
            .store(generation.unwrap_or(0), Ordering::SeqCst);
    }

    pub fn try_recv_suggestion(&self) -> Option<SuggestionResult> {
        let rx = self.suggestion_rx.lock().ok()?;
        rx.try_recv().ok()
    }

    pub fn try_recv_selection(&self) -> Option<ActionResult> {
        self.selection.try_recv()
    }

    pub fn try_recv_command(&self) -> Option<ActionResult> {
        self.commands.try_recv()
    }

    /// Block up to `timeout` for the next suggestion result.
    #[cfg(test)]
    pub fn recv_suggestion_timeout(&self, timeout: Duration) -> Option<SuggestionResult> {
        let rx = self.suggestion_rx.lock().ok()?;
        rx.recv_timeout(timeout).ok()
    }

    /// Block up to `timeout` for the next selection result.
    #[cfg(test)]
    pub fn recv_selection_timeout(&self, timeout: Duration) -> Option<ActionResult> {
        self.selection.recv_timeout(timeout)
    }

    /// Block up to `timeout` for the next command result.
    #[cfg(test)]
    pub fn recv_command_timeout(&self, timeout: Duration) -> Option<ActionResult> {
        self.commands.recv_timeout(timeout)
    }
}

// ---------------------------------------------------------------------------
// Worker threads
// ---------------------------------------------------------------------------

/// A panicking service becomes an error reply; the worker keeps running.
fn run_guarded(
    service: &dyn CompletionService,
    task: &CompletionTask,
    options: &CompletionOptions,
) -> Result<String, CompletionError> {
    panic::catch_unwind(AssertUnwindSafe(|| run_task(service, task, options))).unwrap_or_else(|_| {
        error!(model = %options.model_id, "completion service panicked");
        Err(CompletionError::Unreachable("completion service panicked".into()))
    })
}

/// Every suggestion job gets exactly one reply; skipped jobs answer
/// `Superseded` so the session can release its in-flight slot.
fn suggestion_worker(
    rx: mpsc::Receiver<SuggestionWork>,
    tx: mpsc::Sender<SuggestionResult>,
    gen: Arc<AtomicU64>,
    service: Arc<dyn CompletionService>,
) {
    while let Ok(work) = rx.recv() {
        // Drain: if multiple work items queued, skip to latest
        let mut latest = work;
        while let Ok(newer) = rx.try_recv() {
            let _ = tx.send(SuggestionResult {
                generation: latest.request.generation,
                result: Err(CompletionError::Superseded),
            });
            latest = newer;
        }

        let generation = latest.request.generation;
        if generation != gen.load(Ordering::SeqCst) {
            debug!(generation, "suggestion skipped before send");
            let _ = tx.send(SuggestionResult {
                generation,
                result: Err(CompletionError::Superseded),
            });
            continue;
        }

        let _span = debug_span!("suggestion_request", generation).entered();
        let result = run_guarded(service.as_ref(), &latest.request.task(), &latest.request.options);
        if tx.send(SuggestionResult { generation, result }).is_err() {
            break;
        }
    }
}

/// Superseded action jobs are dropped without a reply.
fn action_worker(
    lane: &'static str,
    rx: mpsc::Receiver<ActionWork>,
    tx: mpsc::Sender<ActionResult>,
    gen: Arc<AtomicU64>,
    service: Arc<dyn CompletionService>,
) {
    while let Ok(work) = rx.recv() {
        let mut latest = work;
        while let Ok(newer) = rx.try_recv() {
            latest = newer;
        }

        let id = latest.id;
        if id != gen.load(Ordering::SeqCst) {
            continue;
        }

        let _span = debug_span!("action_request", lane, id).entered();
        let result = run_guarded(service.as_ref(), &latest.task, &latest.options);
        if tx.send(ActionResult { id, result }).is_err() {
            break;
        }
    }
}

use std::ops::Range;
use std::time::Instant;

use quill_core::completion::{CompletionOptions, CompletionTask};
use quill_core::events::{EditorEvent, FailureReason};
use quill_core::prompt::{DocumentCommand, SelectionAction};

/// The document text as the session sees it.
#[derive(Debug, Clone, Default)]
pub(crate) struct TextBuffer {
    pub content: String,
    /// Byte offset, always on a char boundary.
    pub cursor: usize,
    pub selection: Option<Range<usize>>,
    /// Bumped on every content change.
    pub revision: u64,
}

impl TextBuffer {
    pub fn cursor_at_end(&self) -> bool {
        self.cursor == self.content.len()
    }
}

/// A displayed inline continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub text: String,
    /// Cursor offset the suggestion was generated at.
    pub anchor: usize,
}

#[derive(Debug, Clone)]
pub(crate) enum SuggestionState {
    Idle,
    Pending {
        generation: u64,
        anchor: usize,
        revision: u64,
        context: String,
    },
    Displaying {
        suggestion: Suggestion,
        revision: u64,
    },
    Failed {
        reason: FailureReason,
    },
}

/// Externally visible suggestion phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Pending,
    Displaying,
    Failed,
}

/// A single restartable deadline.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn arm(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm and return true if the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(d) if now >= d => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// A proposed automatic switch after a degenerate result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFallback {
    pub from: String,
    pub to: String,
    pub deadline: Instant,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingSelection {
    pub id: u64,
    pub action: SelectionAction,
    pub range: Range<usize>,
    pub revision: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingCommand {
    pub id: u64,
    pub command: DocumentCommand,
    pub revision: u64,
}

/// Request for an asynchronous continuation. The caller must hand the result
/// back through `receive_suggestion` with the same generation.
#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub generation: u64,
    /// The text before the cursor, verbatim.
    pub context: String,
    pub options: CompletionOptions,
}

impl SuggestionRequest {
    pub fn task(&self) -> CompletionTask {
        CompletionTask::Continue {
            context: self.context.clone(),
        }
    }
}

/// Request for an asynchronous selection action, answered through
/// `receive_selection_result` with the same id.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub id: u64,
    pub action: SelectionAction,
    pub range: Range<usize>,
    pub selected: String,
    pub before: String,
    pub after: String,
    pub options: CompletionOptions,
}

impl SelectionRequest {
    pub fn task(&self) -> CompletionTask {
        CompletionTask::Selection {
            action: self.action,
            selected: self.selected.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

/// Request for a whole-document command, answered through
/// `receive_command_result` with the same id.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub id: u64,
    pub command: DocumentCommand,
    pub text: String,
    pub options: CompletionOptions,
}

impl CommandRequest {
    pub fn task(&self) -> CompletionTask {
        CompletionTask::Document {
            command: self.command,
            text: self.text.clone(),
        }
    }
}

/// Everything a session operation asks of its caller.
#[derive(Debug, Default)]
pub struct SessionResponse {
    pub events: Vec<EditorEvent>,
    pub suggestion_request: Option<SuggestionRequest>,
    pub selection_request: Option<SelectionRequest>,
    pub command_request: Option<CommandRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("selection is empty")]
    EmptyRange,
    #[error("selection {start}..{end} is outside the document (length {len})")]
    OutOfBounds { start: usize, end: usize, len: usize },
    #[error("offset {0} is not on a character boundary")]
    NotCharBoundary(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("document is empty")]
    EmptyDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
}

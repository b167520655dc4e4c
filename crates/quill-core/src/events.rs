//! Events the engine publishes for the presentation layer.

use serde::Serialize;

use crate::prompt::{DocumentCommand, SelectionAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Saving,
    Saved,
    Error,
}

/// Why the active model changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SwitchReason {
    /// The user picked a model in settings.
    Manual,
    /// The automatic fallback timer fired.
    Fallback,
    /// The user took the offered fallback before the timer fired.
    UserAccepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    /// Empty, whitespace-only or echoed output.
    Degenerate,
    /// The completion service rejected the request or was unreachable.
    Unavailable,
}

/// How a selection action or document command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionOutcome {
    /// Written into the buffer; for a summary, delivered as `SummaryReady`.
    Applied,
    /// The document changed while the request was in flight.
    Stale,
    /// The service returned nothing usable.
    Empty,
    ServiceError(String),
}

impl SelectionOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EditorEvent {
    SuggestionAvailable {
        text: String,
        anchor: usize,
    },
    SuggestionCleared,
    SuggestionFailed {
        model_id: String,
        reason: FailureReason,
    },
    /// A fallback model is offered; it is selected automatically unless the
    /// user acts or changes model first.
    FallbackProposed {
        from: String,
        to: String,
    },
    ModelSwitched {
        from: String,
        to: String,
        reason: SwitchReason,
    },
    SaveStatusChanged {
        status: SaveStatus,
    },
    SelectionActionStarted {
        action: SelectionAction,
    },
    SelectionActionFinished {
        action: SelectionAction,
        outcome: SelectionOutcome,
    },
    DocumentCommandStarted {
        command: DocumentCommand,
    },
    DocumentCommandFinished {
        command: DocumentCommand,
        outcome: SelectionOutcome,
    },
    SummaryReady {
        summary: String,
    },
    /// The engine rewrote the buffer (accepted suggestion or applied action).
    ContentReplaced {
        content: String,
        cursor: usize,
    },
}

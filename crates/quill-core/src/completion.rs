//! Completion service boundary.
//!
//! The session hands over a `CompletionTask` (raw context, a selection with
//! its surroundings, or a whole-document command); the client turns it into
//! a prompt and returns the raw text. An empty body is a successful
//! (degenerate) result, not an error.

use std::time::Duration;

use tracing::debug;

use crate::prompt::{action_prompt, command_prompt, continuation_prompt, DocumentCommand, Prompt, SelectionAction};
use crate::settings::EditorSettings;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub model_id: String,
    pub custom_instructions: Option<String>,
    pub writing_type: String,
}

impl CompletionOptions {
    pub fn from_settings(settings: &EditorSettings, model_id: &str) -> Self {
        Self {
            temperature: settings.ai.temperature,
            model_id: model_id.to_string(),
            custom_instructions: settings.custom_instructions().map(str::to_string),
            writing_type: settings.ai.writing_type.clone(),
        }
    }
}

/// What the completion service is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionTask {
    /// Continue `context`, the text before the cursor.
    Continue { context: String },
    /// Apply `action` to `selected`.
    Selection {
        action: SelectionAction,
        selected: String,
        before: String,
        after: String,
    },
    /// Run `command` over the whole document.
    Document { command: DocumentCommand, text: String },
}

impl CompletionTask {
    pub fn prompt(&self, options: &CompletionOptions) -> Prompt {
        let custom = options.custom_instructions.as_deref();
        match self {
            Self::Continue { context } => continuation_prompt(context, custom, &options.writing_type),
            Self::Selection {
                action,
                selected,
                before,
                after,
            } => action_prompt(*action, selected, before, after, custom, &options.writing_type),
            Self::Document { command, text } => command_prompt(*command, text, custom, &options.writing_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("completion service unreachable: {0}")]
    Unreachable(String),
    #[error("completion service returned status {0}")]
    Status(u16),
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
    #[error("request superseded before it was sent")]
    Superseded,
}

/// A language-model endpoint. Implementations block; the engine calls them
/// from a worker thread.
pub trait CompletionService: Send + Sync {
    fn complete(&self, prompt: &Prompt, options: &CompletionOptions) -> Result<String, CompletionError>;
}

/// Run `task` against `service`, building the prompt first.
pub fn run_task(
    service: &dyn CompletionService,
    task: &CompletionTask,
    options: &CompletionOptions,
) -> Result<String, CompletionError> {
    let prompt = task.prompt(options);
    service.complete(&prompt, options)
}

/// JSON-over-HTTP client for the hosted completion proxy.
///
/// Request body: `{ system, prompt, temperature, model, maxTokens }`.
/// The response body is the completion text (streamed or whole).
pub struct HttpCompletionService {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpCompletionService {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            endpoint: endpoint.to_string(),
            agent: config.into(),
        }
    }

    pub fn from_settings(settings: &EditorSettings) -> Self {
        Self::new(&settings.service.completion_url, settings.request_timeout())
    }
}

impl CompletionService for HttpCompletionService {
    fn complete(&self, prompt: &Prompt, options: &CompletionOptions) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "system": prompt.system,
            "prompt": prompt.user,
            "temperature": options.temperature,
            "model": options.model_id,
            "maxTokens": prompt.max_tokens,
        });
        debug!(model = %options.model_id, endpoint = %self.endpoint, "completion request");
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .send(body.to_string());
        response
            .map_err(map_err)?
            .into_body()
            .read_to_string()
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))
    }
}

fn map_err(err: ureq::Error) -> CompletionError {
    match err {
        ureq::Error::StatusCode(status) => CompletionError::Status(status),
        other => CompletionError::Unreachable(other.to_string()),
    }
}

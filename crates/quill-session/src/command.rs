use std::time::Instant;

use tracing::{debug, debug_span};

use quill_core::completion::CompletionError;
use quill_core::events::{EditorEvent, SelectionOutcome};
use quill_core::prompt::DocumentCommand;
use quill_core::text::is_blank;

use super::types::{CommandError, CommandRequest, PendingCommand, SessionResponse};
use super::EditorSession;

impl EditorSession {
    /// Run `command` over the whole buffer. Supersedes any earlier command
    /// still waiting for its result.
    pub fn begin_document_command(&mut self, command: DocumentCommand) -> Result<SessionResponse, CommandError> {
        let _span = debug_span!("begin_document_command", %command).entered();
        if is_blank(&self.buffer.content) {
            return Err(CommandError::EmptyDocument);
        }

        let mut resp = SessionResponse::empty();
        if let Some(ev) = self.dismiss_suggestion() {
            resp.push(ev);
        }
        if let Some(old) = self.command.take() {
            debug!(id = old.id, "document command superseded");
        }

        let id = self.next_command_id;
        self.next_command_id += 1;
        self.command = Some(PendingCommand {
            id,
            command,
            revision: self.buffer.revision,
        });
        resp.push(EditorEvent::DocumentCommandStarted { command });
        resp.command_request = Some(CommandRequest {
            id,
            command,
            text: self.buffer.content.clone(),
            options: self.completion_options(),
        });
        Ok(resp)
    }

    /// Hand a command result back. Rewrite and enhance replace the buffer,
    /// expand appends after a blank line, summarize only reports the text.
    /// Nothing is applied if the buffer changed since the request.
    pub fn receive_command_result(
        &mut self,
        id: u64,
        result: Result<String, CompletionError>,
        now: Instant,
    ) -> SessionResponse {
        let _span = debug_span!("receive_command_result", id).entered();
        let pending = match self.command.take() {
            Some(p) if p.id == id => p,
            other => {
                self.command = other;
                debug!("superseded command result discarded");
                return SessionResponse::empty();
            }
        };

        let command = pending.command;
        if pending.revision != self.buffer.revision {
            return finished(command, SelectionOutcome::Stale);
        }
        let text = match result {
            Err(e) => return finished(command, SelectionOutcome::ServiceError(e.to_string())),
            Ok(text) if is_blank(&text) => return finished(command, SelectionOutcome::Empty),
            Ok(text) => text,
        };

        let len = self.buffer.content.len();
        let mut resp = match command {
            DocumentCommand::Summarize => SessionResponse::with_event(EditorEvent::SummaryReady { summary: text }),
            DocumentCommand::Expand => self.apply_replacement(len..len, &format!("\n\n{}", text.trim_start()), now),
            DocumentCommand::Rewrite | DocumentCommand::Enhance => self.apply_replacement(0..len, &text, now),
        };
        resp.push(EditorEvent::DocumentCommandFinished {
            command,
            outcome: SelectionOutcome::Applied,
        });
        resp
    }
}

fn finished(command: DocumentCommand, outcome: SelectionOutcome) -> SessionResponse {
    debug!(?outcome, "document command not applied");
    SessionResponse::with_event(EditorEvent::DocumentCommandFinished { command, outcome })
}

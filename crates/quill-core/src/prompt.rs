//! Prompt construction for the completion service.
//!
//! Pure functions of `(context, custom instructions, writing type)`. The
//! editor session never sees these strings; it only hands over the text
//! before the cursor or the selected range with its surroundings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Explicit rewrite actions on a selected range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionAction {
    Expand,
    Rewrite,
    Improve,
}

impl SelectionAction {
    pub const ALL: [SelectionAction; 3] = [Self::Expand, Self::Rewrite, Self::Improve];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expand => "expand",
            Self::Rewrite => "rewrite",
            Self::Improve => "improve",
        }
    }

    fn max_tokens(&self) -> u32 {
        match self {
            Self::Expand | Self::Rewrite => 2000,
            Self::Improve => 4000,
        }
    }
}

impl fmt::Display for SelectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown selection action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for SelectionAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Whole-document commands from the command palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentCommand {
    Rewrite,
    Expand,
    Summarize,
    Enhance,
}

impl DocumentCommand {
    pub const ALL: [DocumentCommand; 4] = [Self::Rewrite, Self::Expand, Self::Summarize, Self::Enhance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rewrite => "rewrite",
            Self::Expand => "expand",
            Self::Summarize => "summarize",
            Self::Enhance => "enhance",
        }
    }

    /// Summaries are shown to the user, never written into the document.
    pub fn edits_document(&self) -> bool {
        !matches!(self, Self::Summarize)
    }

    fn max_tokens(&self) -> u32 {
        match self {
            Self::Enhance => 4000,
            Self::Rewrite | Self::Expand | Self::Summarize => 2000,
        }
    }
}

impl fmt::Display for DocumentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for DocumentCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

pub struct WritingType {
    pub id: &'static str,
    pub name: &'static str,
    pub guidance: &'static str,
}

pub const WRITING_TYPES: &[WritingType] = &[
    WritingType {
        id: "general",
        name: "General",
        guidance: "Provide balanced, neutral suggestions that maintain the user's style and tone.",
    },
    WritingType {
        id: "email",
        name: "Email",
        guidance: "Suggest concise, clear, and professional language appropriate for email \
                   communication. Focus on clarity and directness while maintaining appropriate \
                   formality.",
    },
    WritingType {
        id: "journal",
        name: "Journal",
        guidance: "Offer reflective, introspective suggestions that maintain a personal and \
                   authentic voice. Emphasize emotional expression and self-reflection.",
    },
    WritingType {
        id: "academic",
        name: "Academic",
        guidance: "Provide formal, precise language with academic terminology. Focus on logical \
                   structure, evidence-based arguments, and proper citation style.",
    },
    WritingType {
        id: "business",
        name: "Business",
        guidance: "Suggest clear, concise business language with appropriate terminology. Focus \
                   on actionable points, data-driven insights, and professional tone.",
    },
    WritingType {
        id: "creative",
        name: "Creative",
        guidance: "Offer imaginative, vivid language that enhances narrative elements. Focus on \
                   descriptive details, character development, and engaging storytelling.",
    },
    WritingType {
        id: "custom",
        name: "Custom",
        guidance: "",
    },
];

pub fn is_known_writing_type(id: &str) -> bool {
    WRITING_TYPES.iter().any(|w| w.id == id)
}

/// Look up a writing type, falling back to `general`.
pub fn writing_type(id: &str) -> &'static WritingType {
    WRITING_TYPES
        .iter()
        .find(|w| w.id == id)
        .unwrap_or(&WRITING_TYPES[0])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

const CONTINUATION_MAX_TOKENS: u32 = 150;

fn system_preamble(writing_type_id: &str, custom_instructions: Option<&str>) -> String {
    let wt = writing_type(writing_type_id);
    let mut system = format!(
        "You are an expert writing assistant specializing in {} writing.",
        wt.name.to_lowercase()
    );
    if !wt.guidance.is_empty() {
        system.push(' ');
        system.push_str(wt.guidance);
    }
    if let Some(extra) = custom_instructions.map(str::trim).filter(|s| !s.is_empty()) {
        system.push(' ');
        system.push_str(extra);
    }
    system
}

/// Prompt asking for a continuation of `context` (the text before the cursor).
pub fn continuation_prompt(
    context: &str,
    custom_instructions: Option<&str>,
    writing_type_id: &str,
) -> Prompt {
    let mut system = system_preamble(writing_type_id, custom_instructions);
    system.push_str(
        " When asked to continue text, provide only the new suggested text, NOT the original \
         input. Keep suggestions concise and relevant to the context.",
    );
    Prompt {
        system,
        user: context.to_string(),
        max_tokens: CONTINUATION_MAX_TOKENS,
    }
}

/// Prompt for an explicit action on `selected`, with the surrounding text
/// included so the result reads consistently in place.
pub fn action_prompt(
    action: SelectionAction,
    selected: &str,
    before: &str,
    after: &str,
    custom_instructions: Option<&str>,
    writing_type_id: &str,
) -> Prompt {
    let mut system = system_preamble(writing_type_id, custom_instructions);
    let (instruction, verb) = match action {
        SelectionAction::Expand => (
            " Expand on the provided text with additional relevant details and insights.",
            "Expand on this text",
        ),
        SelectionAction::Rewrite => (
            " Rewrite the provided text to improve clarity and flow while maintaining the \
             original meaning.",
            "Rewrite this text",
        ),
        SelectionAction::Improve => (
            " Enhance the provided text to improve clarity, flow, and impact while maintaining \
             the original meaning and voice.",
            "Enhance this text",
        ),
    };
    system.push_str(instruction);

    let mut user = String::new();
    if !before.is_empty() {
        user.push_str("Text before the passage:\n");
        user.push_str(before);
        user.push_str("\n\n");
    }
    user.push_str(verb);
    user.push_str(":\n\n");
    user.push_str(selected);
    if !after.is_empty() {
        user.push_str("\n\nText after the passage:\n");
        user.push_str(after);
    }
    user.push_str("\n\nProvide only the replacement for the passage without explanations.");

    Prompt {
        system,
        user,
        max_tokens: action.max_tokens(),
    }
}

/// Prompt running `command` over the whole document `text`.
pub fn command_prompt(
    command: DocumentCommand,
    text: &str,
    custom_instructions: Option<&str>,
    writing_type_id: &str,
) -> Prompt {
    let mut system = system_preamble(writing_type_id, custom_instructions);
    let (instruction, verb, only) = match command {
        DocumentCommand::Rewrite => (
            " Rewrite the provided text to improve clarity and flow while maintaining the \
             original meaning.",
            "Rewrite this text",
            "the rewritten text",
        ),
        DocumentCommand::Expand => (
            " Expand on the provided text with additional relevant details and insights.",
            "Expand on this text",
            "the expansion",
        ),
        DocumentCommand::Summarize => (
            " Summarize the provided text concisely while capturing the key points.",
            "Summarize this text",
            "the summary",
        ),
        DocumentCommand::Enhance => (
            " Enhance the provided text to improve clarity, flow, and impact while maintaining \
             the original meaning and voice.",
            "Enhance this text",
            "the enhanced text",
        ),
    };
    system.push_str(instruction);
    Prompt {
        system,
        user: format!("{verb}:\n\n{text}\n\nProvide only {only} without explanations."),
        max_tokens: command.max_tokens(),
    }
}

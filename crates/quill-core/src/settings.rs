//! Editor settings loaded from TOML.
//!
//! - `EditorSettings::default()` parses the embedded `default_settings.toml`
//! - `parse_settings_toml` validates after deserializing
//! - `with_*` setters return a new value; nothing mutates settings in place

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::prompt::is_known_writing_type;

pub const DEFAULT_SETTINGS_TOML: &str = include_str!("default_settings.toml");

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorSettings {
    pub ai: AiSettings,
    pub suggestion: SuggestionSettings,
    pub selection: SelectionSettings,
    pub autosave: AutosaveSettings,
    pub editor: DisplaySettings,
    pub service: ServiceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSettings {
    pub enabled: bool,
    pub model: String,
    pub temperature: f32,
    pub writing_type: String,
    #[serde(default)]
    pub custom_instructions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionSettings {
    pub debounce_ms: u64,
    pub min_context_chars: usize,
    pub failover_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSettings {
    pub context_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutosaveSettings {
    pub debounce_ms: u64,
}

/// Presentation-only values; carried so the shell has one settings object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySettings {
    pub font: String,
    pub font_size: u32,
    pub line_spacing: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub completion_url: String,
    pub store_url: String,
    pub timeout_ms: u64,
}

impl Default for EditorSettings {
    fn default() -> Self {
        parse_settings_toml(DEFAULT_SETTINGS_TOML).expect("embedded settings TOML must be valid")
    }
}

impl EditorSettings {
    /// Load and validate a settings file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        parse_settings_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    pub fn suggestion_debounce(&self) -> Duration {
        Duration::from_millis(self.suggestion.debounce_ms)
    }

    pub fn failover_delay(&self) -> Duration {
        Duration::from_millis(self.suggestion.failover_delay_ms)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.service.timeout_ms)
    }

    /// Custom instructions, or `None` when blank.
    pub fn custom_instructions(&self) -> Option<&str> {
        let s = self.ai.custom_instructions.trim();
        (!s.is_empty()).then_some(s)
    }

    pub fn with_ai_enabled(&self, enabled: bool) -> Self {
        let mut s = self.clone();
        s.ai.enabled = enabled;
        s
    }

    pub fn with_model(&self, model: &str) -> Self {
        let mut s = self.clone();
        s.ai.model = model.to_string();
        s
    }

    pub fn with_temperature(&self, temperature: f32) -> Result<Self, SettingsError> {
        let mut s = self.clone();
        s.ai.temperature = temperature;
        validate(&s)?;
        Ok(s)
    }

    pub fn with_writing_type(&self, writing_type: &str) -> Result<Self, SettingsError> {
        let mut s = self.clone();
        s.ai.writing_type = writing_type.to_string();
        validate(&s)?;
        Ok(s)
    }

    pub fn with_custom_instructions(&self, instructions: &str) -> Self {
        let mut s = self.clone();
        s.ai.custom_instructions = instructions.to_string();
        s
    }

    pub fn with_font(&self, font: &str, font_size: u32, line_spacing: f32) -> Result<Self, SettingsError> {
        let mut s = self.clone();
        s.editor.font = font.to_string();
        s.editor.font_size = font_size;
        s.editor.line_spacing = line_spacing;
        validate(&s)?;
        Ok(s)
    }
}

pub fn parse_settings_toml(toml_str: &str) -> Result<EditorSettings, SettingsError> {
    let s: EditorSettings =
        toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate(&s)?;
    Ok(s)
}

fn invalid(field: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn validate(s: &EditorSettings) -> Result<(), SettingsError> {
    macro_rules! check_positive {
        ($section:ident . $field:ident) => {
            if s.$section.$field == 0 {
                return Err(invalid(
                    concat!(stringify!($section), ".", stringify!($field)),
                    "must be positive",
                ));
            }
        };
    }
    macro_rules! check_non_empty {
        ($section:ident . $field:ident) => {
            if s.$section.$field.trim().is_empty() {
                return Err(invalid(
                    concat!(stringify!($section), ".", stringify!($field)),
                    "must not be empty",
                ));
            }
        };
    }

    check_non_empty!(ai.model);
    if !(0.0..=2.0).contains(&s.ai.temperature) {
        return Err(invalid("ai.temperature", "must be between 0.0 and 2.0"));
    }
    if !is_known_writing_type(&s.ai.writing_type) {
        return Err(invalid("ai.writing_type", "unknown writing type"));
    }

    check_positive!(suggestion.debounce_ms);
    check_positive!(suggestion.failover_delay_ms);
    check_positive!(autosave.debounce_ms);

    check_non_empty!(editor.font);
    check_positive!(editor.font_size);
    if s.editor.line_spacing <= 0.0 {
        return Err(invalid("editor.line_spacing", "must be positive"));
    }

    check_non_empty!(service.completion_url);
    check_non_empty!(service.store_url);
    check_positive!(service.timeout_ms);

    Ok(())
}

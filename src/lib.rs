//! Quill editor engine.
//!
//! Composition root over `quill-core` (documents, settings, models, service
//! clients) and `quill-session` (the sans-IO editor state machine): worker
//! threads for completions and sync, the local-first document store with
//! autosave, and the [`EditorEngine`] facade a presentation layer drives.

mod async_worker;

pub mod engine;
pub mod store;
pub mod trace_init;

pub use engine::{EditorEngine, EngineError};
pub use store::{Autosaver, DocumentStore, MigrationReport, StoreError};

pub use quill_core::document::{Document, DocumentStats};
pub use quill_core::events::{EditorEvent, FailureReason, SaveStatus, SelectionOutcome, SwitchReason};
pub use quill_core::prompt::{DocumentCommand, SelectionAction};
pub use quill_core::remote::Identity;
pub use quill_core::settings::EditorSettings;

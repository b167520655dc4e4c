//! Core data model and service boundaries for the Quill writing engine.
//!
//! Everything here is free of editor state: documents, settings, the model
//! registry, prompt construction, and the local/remote document backends.

pub mod completion;
pub mod document;
pub mod events;
pub mod local;
pub mod models;
pub mod prompt;
pub mod remote;
pub mod settings;
pub mod text;

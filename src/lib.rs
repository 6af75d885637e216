//! Quill - document I/O core for an Elm-style text editor
//!
//! This crate loads documents through pluggable transports, detects and
//! converts their character encodings, saves them back safely, and tracks
//! each open document through a lifecycle state machine driven by
//! messages.

pub mod cli;
pub mod commands;
pub mod config;
pub mod config_paths;
pub mod encoding;
pub mod error;
pub mod fs_watcher;
pub mod loader;
pub mod messages;
pub mod metadata;
pub mod model;
pub mod print;
pub mod runtime;
pub mod saver;
pub mod tracing;
pub mod transport;
pub mod untitled;
pub mod update;
pub mod uri;
pub mod util;

// Re-export commonly used types
pub use commands::Cmd;
pub use config::QuillConfig;
pub use encoding::{Encoding, EncodingRequest};
pub use error::{ErrorKind, ErrorRecord, RequestError};
pub use messages::{DocumentEvent, Msg};
pub use model::{Container, Document, DocumentId, TabState};
pub use runtime::{Session, SessionEvent};
pub use uri::DocumentUri;

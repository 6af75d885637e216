//! Document model - the state the lifecycle state machine works on
//!
//! A [`Container`] pairs a [`Document`] with its [`TabState`] and auto-save
//! timer. The update functions mutate containers; nothing here does I/O.

pub mod container;
pub mod document;
pub mod state;

pub use container::{AutoSave, Container, Progress, AUTO_SAVE_RETRY_DELAY};
pub use document::{language_for_file_name, Document, DocumentId, Position, SearchState};
pub use state::TabState;

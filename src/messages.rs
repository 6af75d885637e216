//! Message types for the Elm-style architecture
//!
//! All state changes of a document container flow through [`Msg`]. Requests
//! come from the caller, completions come from the operations the runtime
//! drives. [`DocumentEvent`] is the outbound side: what callers observe.

use std::time::{Duration, SystemTime};

use crate::encoding::{Encoding, EncodingRequest};
use crate::error::ErrorRecord;
use crate::loader::LoadResult;
use crate::model::TabState;
use crate::print::PrintPage;
use crate::saver::{SaveFlags, SaveResult};
use crate::uri::DocumentUri;

/// Load and revert messages
#[derive(Debug, Clone)]
pub enum LoadMsg {
    /// Load `uri` into the document
    Load {
        uri: DocumentUri,
        encoding: EncodingRequest,
        cursor_line: Option<usize>,
    },
    /// Reload from the backing file, discarding changes
    Revert,
    /// Retry the failed load or revert, optionally with another encoding
    Retry { encoding: Option<Encoding> },
    Progress { bytes: u64, total: Option<u64> },
    Finished(Result<LoadResult, ErrorRecord>),
}

/// Save messages
#[derive(Debug, Clone)]
pub enum SaveMsg {
    Save { flags: SaveFlags },
    SaveAs {
        uri: DocumentUri,
        encoding: Encoding,
        flags: SaveFlags,
    },
    /// Retry the failed save with extra flags, optionally in another encoding
    Retry {
        flags: SaveFlags,
        encoding: Option<Encoding>,
    },
    Progress { bytes: u64, total: Option<u64> },
    Finished(Result<SaveResult, ErrorRecord>),
    /// The auto-save timer came due
    AutoSaveTimer,
}

/// Print messages
#[derive(Debug, Clone)]
pub enum PrintMsg {
    Print,
    Preview,
    ClosePreview,
    Progress { page: usize, total: usize },
    Finished(Result<Vec<PrintPage>, ErrorRecord>),
}

/// Everything else in the container lifecycle
#[derive(Debug, Clone)]
pub enum LifecycleMsg {
    /// Cancel the running load, revert, save or print
    Cancel,
    /// Dismiss the error or external-modification notice
    DismissError,
    /// Compare the backing file's current mtime with the last known one
    CheckExternalModification { disk_mtime: Option<SystemTime> },
    MarkForClose,
    SetAutoSave(bool),
    SetAutoSaveInterval(Duration),
    Find(String),
}

/// Top-level message type
#[derive(Debug, Clone)]
pub enum Msg {
    Load(LoadMsg),
    Save(SaveMsg),
    Print(PrintMsg),
    Lifecycle(LifecycleMsg),
}

// Convenience constructors for common messages
impl Msg {
    pub fn load(uri: DocumentUri, encoding: EncodingRequest, cursor_line: Option<usize>) -> Self {
        Msg::Load(LoadMsg::Load {
            uri,
            encoding,
            cursor_line,
        })
    }

    pub fn save(flags: SaveFlags) -> Self {
        Msg::Save(SaveMsg::Save { flags })
    }

    pub fn cancel() -> Self {
        Msg::Lifecycle(LifecycleMsg::Cancel)
    }
}

/// The operation an event or cancellation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Revert,
    Save,
    Print,
}

/// Notifications emitted by a document container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Loading { bytes: u64, total: Option<u64> },
    /// A load or revert finished; carries the error on failure
    Loaded(Option<ErrorRecord>),
    Saving { bytes: u64, total: Option<u64> },
    Saved(Option<ErrorRecord>),
    Printing { page: usize, total: usize },
    Printed(Option<ErrorRecord>),
    /// The operation was cancelled; never reported as an error
    Cancelled(Operation),
    StateChanged { from: TabState, to: TabState },
    /// The backing file changed since the last load or save
    ExternallyModified,
    CanFindAgain(bool),
    Closed,
}

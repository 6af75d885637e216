//! Per-document container: a document plus its lifecycle state

use std::time::{Duration, Instant, SystemTime};

use super::document::Document;
use super::state::TabState;
use crate::error::ErrorRecord;
use crate::loader::LoadRequest;
use crate::print::PrintPage;
use crate::saver::SaveRequest;

/// Delay before retrying an auto-save that came due while the document was busy
pub const AUTO_SAVE_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Auto-save timer for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSave {
    pub enabled: bool,
    pub interval: Duration,
    /// When the armed timer fires. Only ever set while the state is Normal.
    pub deadline: Option<Instant>,
    /// A deferred attempt, kept across state changes
    pub retry_at: Option<Instant>,
    /// The running save was started by the timer
    pub in_progress: bool,
}

impl AutoSave {
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval,
            deadline: None,
            retry_at: None,
            in_progress: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Earliest instant at which the timer wants to run
    pub fn next_due(&self) -> Option<Instant> {
        match (self.deadline, self.retry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due().is_some_and(|due| due <= now)
    }
}

impl Default for AutoSave {
    fn default() -> Self {
        Self::new(false, Duration::from_secs(10 * 60))
    }
}

/// Bytes transferred so far by the running load or save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub bytes: u64,
    pub total: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Container {
    pub document: Document,
    pub state: TabState,
    pub auto_save: AutoSave,
    /// Last load or revert request, kept for retries
    pub last_load: Option<LoadRequest>,
    /// Last save request, kept for retries
    pub last_save: Option<SaveRequest>,
    /// Error shown while in one of the error states
    pub error: Option<ErrorRecord>,
    pub progress: Option<Progress>,
    /// Pages shown in print preview
    pub preview: Vec<PrintPage>,
    /// Disk mtime that raised the external-modification notice
    pub external_mtime: Option<SystemTime>,
    /// Disk mtime the user chose to keep editing over
    pub acknowledged_mtime: Option<SystemTime>,
    /// Document revision the running save was started from
    pub save_revision: Option<u64>,
}

impl Container {
    pub fn new(document: Document, auto_save: AutoSave) -> Self {
        Self {
            document,
            state: TabState::Normal,
            auto_save,
            last_load: None,
            last_save: None,
            error: None,
            progress: None,
            preview: Vec::new(),
            external_mtime: None,
            acknowledged_mtime: None,
            save_revision: None,
        }
    }

    /// Whether the document can be closed without asking the user first
    pub fn can_close(&self) -> bool {
        self.state.can_close(self.document.is_modified)
    }

    /// Auto-save only applies to named, writable documents
    pub fn auto_save_eligible(&self) -> bool {
        self.auto_save.enabled && !self.document.is_untitled() && !self.document.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentId;
    use crate::uri::DocumentUri;

    fn named() -> Container {
        let mut document = Document::new(DocumentId(1));
        document.set_uri(DocumentUri::parse("file:///tmp/a.txt").unwrap());
        Container::new(document, AutoSave::new(true, Duration::from_secs(60)))
    }

    #[test]
    fn test_untitled_is_not_auto_saved() {
        let c = Container::new(
            Document::new(DocumentId(1)),
            AutoSave::new(true, Duration::from_secs(60)),
        );
        assert!(!c.auto_save_eligible());
    }

    #[test]
    fn test_read_only_is_not_auto_saved() {
        let mut c = named();
        assert!(c.auto_save_eligible());
        c.document.read_only = true;
        assert!(!c.auto_save_eligible());
    }

    #[test]
    fn test_next_due_takes_earliest() {
        let now = Instant::now();
        let mut auto_save = AutoSave::new(true, Duration::from_secs(60));
        assert_eq!(auto_save.next_due(), None);

        auto_save.deadline = Some(now + Duration::from_secs(60));
        auto_save.retry_at = Some(now + Duration::from_secs(30));
        assert_eq!(auto_save.next_due(), Some(now + Duration::from_secs(30)));
        assert!(!auto_save.is_due(now));
        assert!(auto_save.is_due(now + Duration::from_secs(30)));
    }

    #[test]
    fn test_modified_document_cannot_close() {
        let mut c = named();
        assert!(c.can_close());
        c.document.insert_text(0, "x");
        assert!(!c.can_close());
    }
}

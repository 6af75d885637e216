//! Document lifecycle states

/// Where a document container is in its load/save/print lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TabState {
    #[default]
    Normal,
    Loading,
    Reverting,
    Saving,
    Printing,
    PrintPreviewing,
    ShowingPrintPreview,
    LoadingError,
    RevertingError,
    SavingError,
    ExternallyModifiedNotification,
    Closing,
}

impl TabState {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            TabState::LoadingError | TabState::RevertingError | TabState::SavingError
        )
    }

    /// A load, revert, save or print is running
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            TabState::Loading
                | TabState::Reverting
                | TabState::Saving
                | TabState::Printing
                | TabState::PrintPreviewing
        )
    }

    /// Whether the document can be closed without asking the user first
    ///
    /// A load or revert in progress, or one that failed, never holds
    /// unsaved work, so those states are always closable. This is only a UI
    /// hint: [`TabState::accepts_close`] still refuses while the load runs.
    pub fn can_close(self, modified: bool) -> bool {
        match self {
            TabState::Normal
            | TabState::ShowingPrintPreview
            | TabState::ExternallyModifiedNotification => !modified,
            TabState::Loading
            | TabState::Reverting
            | TabState::LoadingError
            | TabState::RevertingError => true,
            _ => false,
        }
    }

    /// Whether marking for close moves straight to `Closing`
    pub fn accepts_close(self) -> bool {
        matches!(
            self,
            TabState::Normal
                | TabState::ShowingPrintPreview
                | TabState::ExternallyModifiedNotification
        )
    }
}

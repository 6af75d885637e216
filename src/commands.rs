//! Command types for the Elm-style architecture
//!
//! Commands represent side effects that should be performed after an update.
//! The runtime turns them into running loaders, savers and print jobs.

use crate::loader::LoadRequest;
use crate::messages::DocumentEvent;
use crate::saver::SaveRequest;

/// Commands returned by update functions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Cmd {
    /// No command - do nothing
    #[default]
    None,
    /// Start a loader for the request
    StartLoad(LoadRequest),
    /// Start a saver writing the current document contents
    StartSave(SaveRequest),
    StartPrint { preview: bool },
    /// Cancel whatever operation the container has running
    CancelOperation,
    Emit(DocumentEvent),
    Batch(Vec<Cmd>),
}

impl Cmd {
    /// Create a batch of commands
    pub fn batch(cmds: Vec<Cmd>) -> Self {
        Cmd::Batch(cmds)
    }

    /// Append `other`, flattening into a batch
    pub fn and(self, other: Cmd) -> Self {
        match (self, other) {
            (Cmd::None, cmd) | (cmd, Cmd::None) => cmd,
            (Cmd::Batch(mut cmds), cmd) => {
                cmds.push(cmd);
                Cmd::Batch(cmds)
            }
            (first, second) => Cmd::Batch(vec![first, second]),
        }
    }

    /// Events carried by this command, in order
    pub fn events(&self) -> Vec<&DocumentEvent> {
        match self {
            Cmd::Emit(event) => vec![event],
            Cmd::Batch(cmds) => cmds.iter().flat_map(Cmd::events).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<DocumentEvent> for Cmd {
    fn from(event: DocumentEvent) -> Self {
        Cmd::Emit(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_flattens() {
        let cmd = Cmd::None
            .and(Cmd::Emit(DocumentEvent::Closed))
            .and(Cmd::CancelOperation)
            .and(Cmd::None)
            .and(Cmd::StartPrint { preview: true });
        assert_eq!(
            cmd,
            Cmd::Batch(vec![
                Cmd::Emit(DocumentEvent::Closed),
                Cmd::CancelOperation,
                Cmd::StartPrint { preview: true },
            ])
        );
    }

    #[test]
    fn test_events_in_order() {
        let cmd = Cmd::batch(vec![
            Cmd::Emit(DocumentEvent::CanFindAgain(true)),
            Cmd::batch(vec![Cmd::CancelOperation, Cmd::Emit(DocumentEvent::Closed)]),
        ]);
        assert_eq!(
            cmd.events(),
            vec![&DocumentEvent::CanFindAgain(true), &DocumentEvent::Closed]
        );
    }
}

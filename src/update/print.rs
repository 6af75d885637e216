//! Print and print preview handlers

use std::time::Instant;

use super::transition;
use crate::commands::Cmd;
use crate::messages::{DocumentEvent, Operation, PrintMsg};
use crate::model::{Container, TabState};

pub fn update_print(container: &mut Container, msg: PrintMsg, now: Instant) -> Option<Cmd> {
    match msg {
        PrintMsg::Print => Some(
            transition(container, TabState::Printing, now)
                .and(Cmd::StartPrint { preview: false }),
        ),
        PrintMsg::Preview => Some(
            transition(container, TabState::PrintPreviewing, now)
                .and(Cmd::StartPrint { preview: true }),
        ),
        PrintMsg::ClosePreview => {
            container.preview.clear();
            Some(transition(container, TabState::Normal, now))
        }
        PrintMsg::Progress { page, total } => {
            if !matches!(container.state, TabState::Printing | TabState::PrintPreviewing) {
                return None;
            }
            Some(Cmd::Emit(DocumentEvent::Printing { page, total }))
        }
        PrintMsg::Finished(result) => {
            let previewing = match container.state {
                TabState::Printing => false,
                TabState::PrintPreviewing => true,
                _ => return None,
            };
            match result {
                Ok(pages) if previewing => {
                    container.preview = pages;
                    Some(
                        transition(container, TabState::ShowingPrintPreview, now)
                            .and(Cmd::Emit(DocumentEvent::Printed(None))),
                    )
                }
                Ok(_) => Some(
                    transition(container, TabState::Normal, now)
                        .and(Cmd::Emit(DocumentEvent::Printed(None))),
                ),
                Err(err) if err.is_cancelled() => Some(
                    transition(container, TabState::Normal, now)
                        .and(Cmd::Emit(DocumentEvent::Cancelled(Operation::Print))),
                ),
                Err(err) => {
                    tracing::warn!("Printing {} failed: {}", container.document.display_name(), err);
                    Some(
                        transition(container, TabState::Normal, now)
                            .and(Cmd::Emit(DocumentEvent::Printed(Some(err)))),
                    )
                }
            }
        }
    }
}

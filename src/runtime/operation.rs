//! The operation a container has running

use crate::loader::{DocumentLoader, LoaderEvent};
use crate::messages::{LoadMsg, Msg, PrintMsg, SaveMsg};
use crate::print::{PrintEvent, PrintJob};
use crate::saver::{DocumentSaver, SaverEvent};

/// A running load, save or print, exclusively owned by one container
pub enum RunningOp {
    Load(DocumentLoader),
    Save(DocumentSaver),
    Print(PrintJob),
}

impl RunningOp {
    /// Advance one bounded step. Returns the completion message, if any, and
    /// whether it was the terminal one.
    pub fn step(&mut self) -> Option<(Msg, bool)> {
        match self {
            RunningOp::Load(loader) => match loader.step()? {
                LoaderEvent::Progress { bytes, total } => {
                    Some((Msg::Load(LoadMsg::Progress { bytes, total }), false))
                }
                LoaderEvent::Finished(result) => Some((Msg::Load(LoadMsg::Finished(result)), true)),
            },
            RunningOp::Save(saver) => match saver.step()? {
                SaverEvent::Progress { bytes, total } => {
                    Some((Msg::Save(SaveMsg::Progress { bytes, total }), false))
                }
                SaverEvent::Finished(result) => Some((Msg::Save(SaveMsg::Finished(result)), true)),
            },
            RunningOp::Print(job) => match job.step()? {
                PrintEvent::Page { page, total } => {
                    Some((Msg::Print(PrintMsg::Progress { page, total }), false))
                }
                PrintEvent::Finished(result) => Some((Msg::Print(PrintMsg::Finished(result)), true)),
            },
        }
    }

    /// Request cancellation; the next steps report it
    pub fn cancel(&mut self) -> bool {
        match self {
            RunningOp::Load(loader) => loader.cancel(),
            RunningOp::Save(saver) => saver.cancel(),
            RunningOp::Print(job) => job.cancel(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunningOp::Load(_) => "load",
            RunningOp::Save(_) => "save",
            RunningOp::Print(_) => "print",
        }
    }
}

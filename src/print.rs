//! Print and print preview jobs
//!
//! Layout is not done here. A job splits the document into fixed-height pages
//! and reports one page per step, which is what drives the Printing and
//! PrintPreviewing states.

use crate::error::ErrorRecord;
use crate::model::Document;

pub const DEFAULT_LINES_PER_PAGE: usize = 60;

/// One page: a run of document lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintPage {
    /// 1-based page number
    pub number: usize,
    pub first_line: usize,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintEvent {
    Page { page: usize, total: usize },
    Finished(Result<Vec<PrintPage>, ErrorRecord>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Cancelled,
    Done,
}

#[derive(Debug)]
pub struct PrintJob {
    pages: Vec<PrintPage>,
    next: usize,
    preview: bool,
    state: State,
}

impl PrintJob {
    pub fn new(document: &Document, lines_per_page: usize, preview: bool) -> Self {
        Self {
            pages: paginate(document.line_count(), lines_per_page),
            next: 0,
            preview,
            state: State::Running,
        }
    }

    pub fn is_preview(&self) -> bool {
        self.preview
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn step(&mut self) -> Option<PrintEvent> {
        match self.state {
            State::Done => None,
            State::Cancelled => {
                self.state = State::Done;
                Some(PrintEvent::Finished(Err(ErrorRecord::cancelled())))
            }
            State::Running if self.next < self.pages.len() => {
                self.next += 1;
                Some(PrintEvent::Page {
                    page: self.next,
                    total: self.pages.len(),
                })
            }
            State::Running => {
                self.state = State::Done;
                tracing::debug!("Print job finished: {} pages", self.pages.len());
                Some(PrintEvent::Finished(Ok(std::mem::take(&mut self.pages))))
            }
        }
    }

    pub fn cancel(&mut self) -> bool {
        if self.state != State::Running {
            return false;
        }
        self.state = State::Cancelled;
        true
    }
}

/// Split `lines` into pages; an empty document still prints one page
pub fn paginate(lines: usize, lines_per_page: usize) -> Vec<PrintPage> {
    let per_page = lines_per_page.max(1);
    let lines = lines.max(1);
    (0..lines.div_ceil(per_page))
        .map(|i| PrintPage {
            number: i + 1,
            first_line: i * per_page,
            line_count: per_page.min(lines - i * per_page),
        })
        .collect()
}

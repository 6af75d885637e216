//! Untitled document numbering
//!
//! New documents are called "Untitled 1", "Untitled 2", and so on. A number is
//! held until its document closes or gets a uri, and the lowest free number
//! is always handed out next.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct UntitledRegistry {
    in_use: BTreeSet<u32>,
}

impl UntitledRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lowest free number, starting at 1
    pub fn allocate(&mut self) -> u32 {
        let mut n = 1;
        for &used in &self.in_use {
            if used != n {
                break;
            }
            n += 1;
        }
        self.in_use.insert(n);
        n
    }

    /// Give a number back; releasing a free number does nothing
    pub fn release(&mut self, n: u32) {
        self.in_use.remove(&n);
    }

    pub fn is_allocated(&self, n: u32) -> bool {
        self.in_use.contains(&n)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}

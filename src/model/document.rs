//! Document model - the text buffer and the state of its backing file

use std::fmt;
use std::time::SystemTime;

use ropey::Rope;
use serde::{Deserialize, Serialize};

use crate::encoding::Encoding;
use crate::uri::DocumentUri;
use crate::util::strip_final_terminator;

/// Identifier of an open document, unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cursor position as zero-based line and column (in chars)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// Last search, kept so "find again" works and so it can be persisted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    pub text: Option<String>,
    /// Char range of the last match
    pub last_match: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub buffer: Rope,
    /// Backing location (None for untitled documents)
    pub uri: Option<DocumentUri>,
    /// Number shown as "Untitled N" while there is no uri
    pub untitled_number: Option<u32>,

    // === Backing file state ===
    /// Encoding used for the last load or save
    pub encoding: Encoding,
    /// Modification time at the last load or save
    pub mtime: Option<SystemTime>,
    pub size: Option<u64>,
    pub read_only: bool,
    pub content_type: Option<String>,
    pub language: Option<String>,

    /// Whether the buffer has unsaved changes
    pub is_modified: bool,
    pub cursor: Position,
    pub search: SearchState,
    /// Incremented on each edit
    pub revision: u64,
}

impl Document {
    /// Create a new empty document
    pub fn new(id: DocumentId) -> Self {
        Self::with_text(id, "")
    }

    /// Create a document with initial text
    pub fn with_text(id: DocumentId, text: &str) -> Self {
        Self {
            id,
            buffer: Rope::from(text),
            uri: None,
            untitled_number: None,
            encoding: Encoding::UTF_8,
            mtime: None,
            size: None,
            read_only: false,
            content_type: None,
            language: None,
            is_modified: false,
            cursor: Position::default(),
            search: SearchState::default(),
            revision: 0,
        }
    }

    /// Get the display name for this document.
    /// Returns the file name if it has a uri, otherwise "Untitled N".
    pub fn display_name(&self) -> String {
        if let Some(uri) = &self.uri {
            return uri.display_name();
        }
        match self.untitled_number {
            Some(n) => format!("Untitled {}", n),
            None => "Untitled".to_string(),
        }
    }

    pub fn is_untitled(&self) -> bool {
        self.uri.is_none()
    }

    pub fn text(&self) -> String {
        self.buffer.to_string()
    }

    pub fn line_count(&self) -> usize {
        self.buffer.len_lines()
    }

    /// Get the length of a line (excluding its line break)
    pub fn line_length(&self, line_idx: usize) -> usize {
        if line_idx >= self.buffer.len_lines() {
            return 0;
        }
        let line = self.buffer.line(line_idx).to_string();
        line.trim_end_matches(['\n', '\r']).chars().count()
    }

    /// Convert a (line, column) position to a char offset
    pub fn position_to_offset(&self, position: Position) -> usize {
        if position.line >= self.buffer.len_lines() {
            return self.buffer.len_chars();
        }
        let line_start = self.buffer.line_to_char(position.line);
        line_start + position.column.min(self.line_length(position.line))
    }

    /// Convert a char offset to a (line, column) position
    pub fn offset_to_position(&self, offset: usize) -> Position {
        let clamped = offset.min(self.buffer.len_chars());
        let line = self.buffer.char_to_line(clamped);
        Position {
            line,
            column: clamped - self.buffer.line_to_char(line),
        }
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Insert `text` at char offset `position` (clamped to the buffer end)
    pub fn insert_text(&mut self, position: usize, text: &str) {
        if text.is_empty() {
            return;
        }
        let position = position.min(self.buffer.len_chars());
        self.buffer.insert(position, text);
        self.is_modified = true;
        self.revision = self.revision.wrapping_add(1);
    }

    /// Replace the whole buffer with loaded text.
    ///
    /// Leaves the document unmodified. One final line terminator is dropped
    /// so it does not show up as a trailing empty line.
    pub fn replace_contents(&mut self, text: &str) {
        self.buffer = Rope::from(strip_final_terminator(text));
        self.is_modified = false;
        self.search.last_match = None;
        self.revision = self.revision.wrapping_add(1);
        self.set_cursor(self.cursor);
    }

    /// Bytes to hand to the saver
    pub fn to_bytes(&self) -> Vec<u8> {
        self.text().into_bytes()
    }

    /// Move the cursor, clamping it to the buffer
    pub fn set_cursor(&mut self, position: Position) {
        let last_line = self.buffer.len_lines().saturating_sub(1);
        let line = position.line.min(last_line);
        self.cursor = Position {
            line,
            column: position.column.min(self.line_length(line)),
        };
    }

    pub fn set_cursor_line(&mut self, line: usize) {
        self.set_cursor(Position { line, column: 0 });
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Find all occurrences of `needle`, as char ranges
    pub fn find_all_occurrences(&self, needle: &str) -> Vec<(usize, usize)> {
        if needle.is_empty() {
            return Vec::new();
        }
        let haystack = self.buffer.to_string();
        let needle_chars = needle.chars().count();
        haystack
            .match_indices(needle)
            .map(|(byte, _)| {
                let start = self.buffer.byte_to_char(byte);
                (start, start + needle_chars)
            })
            .collect()
    }

    /// Search forward from the cursor for `needle`, wrapping at the end.
    ///
    /// An empty needle clears the search. On a match the cursor moves to its
    /// start. Returns whether a match was found.
    pub fn find(&mut self, needle: &str) -> bool {
        if needle.is_empty() {
            self.search = SearchState::default();
            return false;
        }
        let after = self.position_to_offset(self.cursor);
        let occurrences = self.find_all_occurrences(needle);
        let found = occurrences
            .iter()
            .find(|(start, _)| *start > after)
            .or_else(|| occurrences.first())
            .copied();

        self.search.text = Some(needle.to_string());
        self.search.last_match = found;
        if let Some((start, _)) = found {
            self.cursor = self.offset_to_position(start);
        }
        found.is_some()
    }

    /// Whether repeating the last search would find something
    pub fn can_find_again(&self) -> bool {
        self.search
            .text
            .as_deref()
            .is_some_and(|text| !self.find_all_occurrences(text).is_empty())
    }

    /// Refresh uri-derived attributes after the uri changed
    pub fn set_uri(&mut self, uri: DocumentUri) {
        self.language = uri
            .file_name()
            .and_then(|name| language_for_file_name(&name))
            .map(str::to_string);
        self.uri = Some(uri);
    }
}

/// Language id guessed from a file name's extension
pub fn language_for_file_name(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    let language = match ext.to_lowercase().as_str() {
        "rs" => "rust",
        "yaml" | "yml" => "yaml",
        "md" | "markdown" => "markdown",
        "html" | "htm" => "html",
        "css" => "css",
        "js" | "mjs" | "cjs" => "javascript",
        "json" => "json",
        "toml" => "toml",
        "py" => "python",
        "c" | "h" => "c",
        "sh" | "bash" => "sh",
        "xml" => "xml",
        _ => return None,
    };
    Some(language)
}

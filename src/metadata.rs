//! Per-document metadata side-table
//!
//! Remembers, per uri, the encoding a document was last loaded or saved
//! with, the last search text, the cursor position and the language id. It
//! is read when a load starts and written when the document is torn down.
//! Entries are kept in most-recently-accessed order and capped, so the least
//! recently accessed uri is the one evicted.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::model::Position;

/// Maximum number of entries to keep
pub const MAX_ENTRIES: usize = 50;

/// Values stored for one uri
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Charset name, as in the encoding catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MetadataEntry {
    uri: String,
    /// Unix epoch seconds of the last read or write
    accessed_at: u64,
    #[serde(flatten)]
    values: DocumentMetadata,
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    version: u32,
    entries: Vec<MetadataEntry>,
}

/// The side-table, optionally backed by a JSON file
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    path: Option<PathBuf>,
    /// Most recently accessed first
    entries: Vec<MetadataEntry>,
}

impl MetadataStore {
    pub const CURRENT_VERSION: u32 = 1;

    /// A store that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store from the config directory
    pub fn load() -> Self {
        match crate::config_paths::metadata_path() {
            Some(path) => Self::load_from(path),
            None => Self::in_memory(),
        }
    }

    /// Load the store from `path`; a missing or unreadable file starts empty
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<MetadataFile>(&contents) {
                Ok(file) => file.entries,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable metadata at {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        let mut store = Self {
            path: Some(path),
            entries,
        };
        store.entries.truncate(MAX_ENTRIES);
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `uri`, marking it as accessed
    pub fn get(&mut self, uri: &str) -> Option<DocumentMetadata> {
        let idx = self.find_index(uri)?;
        let mut entry = self.entries.remove(idx);
        entry.accessed_at = now_epoch_secs();
        let values = entry.values.clone();
        self.entries.insert(0, entry);
        Some(values)
    }

    /// Look up `uri` without touching its access time
    pub fn peek(&self, uri: &str) -> Option<&DocumentMetadata> {
        self.find_index(uri).map(|idx| &self.entries[idx].values)
    }

    /// Store `values` for `uri`, evicting the least recently accessed entry
    /// when full
    pub fn set(&mut self, uri: &str, values: DocumentMetadata) {
        if let Some(idx) = self.find_index(uri) {
            self.entries.remove(idx);
        }
        self.entries.insert(
            0,
            MetadataEntry {
                uri: uri.to_string(),
                accessed_at: now_epoch_secs(),
                values,
            },
        );
        if self.entries.len() > MAX_ENTRIES {
            if let Some(evicted) = self.entries.pop() {
                tracing::debug!("Evicted metadata for {}", evicted.uri);
            }
        }
    }

    pub fn remove(&mut self, uri: &str) {
        self.entries.retain(|e| e.uri != uri);
    }

    /// Write the store to its file, if it has one
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = MetadataFile {
            version: Self::CURRENT_VERSION,
            entries: self.entries.clone(),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, contents)
    }

    fn find_index(&self, uri: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.uri == uri)
    }
}

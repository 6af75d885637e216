//! Configuration persistence
//!
//! Stores document I/O preferences in `~/.config/quill/config.yaml`

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoding::{DetectionChain, Encoding, DEFAULT_AUTO_DETECTED};
use crate::print::DEFAULT_LINES_PER_PAGE;
use crate::uri::FILE_SCHEME;

/// Default guard for the local backend: 1 GiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 30;

/// Configuration that persists across sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    /// Keep the previous contents as `<file><backup_extension>` on save
    pub create_backup_copy: bool,
    pub backup_extension: String,
    pub auto_save: bool,
    pub auto_save_interval_minutes: u64,
    /// Charsets tried in order when no encoding is given; `CURRENT` is the locale's
    pub auto_detected_encodings: Vec<String>,
    /// Non-`file` schemes whose documents may be written
    pub writable_vfs_schemes: Vec<String>,
    /// Schemes served by the blocking backend
    pub legacy_vfs_schemes: Vec<String>,
    /// Largest file the local backend will read
    pub max_file_size: u64,
    pub lines_per_page: usize,
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            create_backup_copy: true,
            backup_extension: "~".to_string(),
            auto_save: false,
            auto_save_interval_minutes: 10,
            auto_detected_encodings: DEFAULT_AUTO_DETECTED.iter().map(|s| s.to_string()).collect(),
            writable_vfs_schemes: ["dav", "davs", "ftp", "sftp", "smb", "ssh", "mem"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            legacy_vfs_schemes: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            lines_per_page: DEFAULT_LINES_PER_PAGE,
        }
    }
}

impl QuillConfig {
    /// Load config from disk, or return defaults if not found
    pub fn load() -> Self {
        let Some(path) = crate::config_paths::config_file() else {
            tracing::debug!("No config directory available, using defaults");
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Load config from `path`, falling back to defaults when it is missing
    /// or cannot be parsed
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config at {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to disk
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> Result<(), String> {
        let path = crate::config_paths::config_file()
            .ok_or_else(|| "No config directory available".to_string())?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let content = serde_yaml::to_string(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, content)
            .map_err(|e| format!("Failed to write config to {}: {}", path.display(), e))?;

        tracing::info!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs(self.auto_save_interval_minutes.max(1) * 60)
    }

    /// Detection chain for this config, with the locale's charset in front
    pub fn detection_chain(&self, locale: Encoding) -> DetectionChain {
        DetectionChain::with_locale(&self.auto_detected_encodings, locale)
    }

    pub fn is_writable_scheme(&self, scheme: &str) -> bool {
        scheme.eq_ignore_ascii_case(FILE_SCHEME)
            || self
                .writable_vfs_schemes
                .iter()
                .any(|s| s.eq_ignore_ascii_case(scheme))
    }

    pub fn is_legacy_scheme(&self, scheme: &str) -> bool {
        self.legacy_vfs_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
    }
}

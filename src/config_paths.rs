//! Where quill keeps its files
//!
//! Everything lives under one directory:
//! - Unix/macOS: `$XDG_CONFIG_HOME/quill/`, else `~/.config/quill/`
//! - Windows: `%APPDATA%\quill\`
//!
//! ```text
//! quill/
//!   config.yaml      QuillConfig
//!   metadata.json    per-uri document metadata
//!   logs/quill.log.YYYY-MM-DD
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "quill";
const CONFIG_FILE: &str = "config.yaml";
const METADATA_FILE: &str = "metadata.json";
const LOGS_DIR: &str = "logs";

/// Prefix of the daily-rotated log files
pub const LOG_FILE_PREFIX: &str = "quill.log";

/// Base directory for quill's files, if the platform has one
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|appdata| PathBuf::from(appdata).join(APP_DIR))
    }

    #[cfg(not(target_os = "windows"))]
    {
        resolve_unix(std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from), dirs::home_dir())
    }
}

/// An empty or relative XDG_CONFIG_HOME is ignored
#[cfg_attr(target_os = "windows", allow(dead_code))]
fn resolve_unix(xdg_config_home: Option<PathBuf>, home: Option<PathBuf>) -> Option<PathBuf> {
    xdg_config_home
        .filter(|dir| dir.is_absolute())
        .or_else(|| home.map(|h| h.join(".config")))
        .map(|base| base.join(APP_DIR))
}

pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

pub fn metadata_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(METADATA_FILE))
}

pub fn logs_dir() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(LOGS_DIR))
}

/// Create the logs directory if needed and return it
pub fn ensure_logs_dir() -> io::Result<PathBuf> {
    let logs = logs_dir().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no config directory available")
    })?;
    ensure_dir(&logs)?;
    Ok(logs)
}

fn ensure_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to create directory {}: {}", path.display(), e),
        )
    })
}

#[cfg(all(test, not(target_os = "windows")))]
mod tests {
    use super::*;

    #[test]
    fn test_xdg_config_home_wins() {
        let dir = resolve_unix(Some("/xdg".into()), Some("/home/ana".into()));
        assert_eq!(dir, Some(PathBuf::from("/xdg/quill")));
    }

    #[test]
    fn test_relative_xdg_falls_back_to_home() {
        let dir = resolve_unix(Some("relative".into()), Some("/home/ana".into()));
        assert_eq!(dir, Some(PathBuf::from("/home/ana/.config/quill")));
        assert_eq!(
            resolve_unix(Some(PathBuf::new()), Some("/home/ana".into())),
            Some(PathBuf::from("/home/ana/.config/quill"))
        );
    }

    #[test]
    fn test_no_home_no_dir() {
        assert_eq!(resolve_unix(None, None), None);
    }
}

//! File system watching for open documents
//!
//! Uses the `notify` crate with debouncing to notice when the backing file of
//! an open local document changes. Parent directories are watched
//! non-recursively, since editors and other tools often replace a file by
//! renaming over it, which a watch on the file itself would miss. Only the
//! registered document paths are reported.

use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

/// Default delay used to coalesce rapid changes
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

type DebouncedResult = Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>;

pub struct DocumentWatcher {
    debouncer: Debouncer<notify::RecommendedWatcher>,
    rx: Receiver<DebouncedResult>,
    /// Watched document paths, with canonical parent directories
    files: BTreeSet<PathBuf>,
    /// Number of watched documents per directory
    dirs: HashMap<PathBuf, usize>,
}

impl DocumentWatcher {
    pub fn new(debounce: Duration) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();
        let debouncer = new_debouncer(debounce, tx)?;
        Ok(Self {
            debouncer,
            rx,
            files: BTreeSet::new(),
            dirs: HashMap::new(),
        })
    }

    /// Start watching `file`. Its parent directory must exist.
    pub fn watch(&mut self, file: &Path) -> Result<(), notify::Error> {
        let (dir, file) = normalize(file);
        if !self.files.insert(file.clone()) {
            return Ok(());
        }
        if !self.dirs.contains_key(&dir) {
            if let Err(e) = self
                .debouncer
                .watcher()
                .watch(&dir, notify::RecursiveMode::NonRecursive)
            {
                self.files.remove(&file);
                return Err(e);
            }
            tracing::debug!("Watching {}", dir.display());
        }
        *self.dirs.entry(dir).or_insert(0) += 1;
        Ok(())
    }

    pub fn unwatch(&mut self, file: &Path) {
        let (dir, file) = normalize(file);
        if !self.files.remove(&file) {
            return;
        }
        let Some(count) = self.dirs.get_mut(&dir) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.dirs.remove(&dir);
            if let Err(e) = self.debouncer.watcher().unwatch(&dir) {
                tracing::debug!("Failed to stop watching {}: {}", dir.display(), e);
            }
        }
    }

    pub fn is_watching(&self, file: &Path) -> bool {
        self.files.contains(&normalize(file).1)
    }

    pub fn watched_dirs(&self) -> usize {
        self.dirs.len()
    }

    /// Drain pending events, returning each changed document path once
    pub fn poll_changed(&self) -> Vec<PathBuf> {
        let mut changed = Vec::new();

        while let Ok(result) = self.rx.try_recv() {
            match result {
                Ok(events) => {
                    for event in events {
                        // Continuous events during active changes - wait for the final one
                        if event.kind == DebouncedEventKind::AnyContinuous {
                            continue;
                        }
                        let (_, path) = normalize(&event.path);
                        if self.files.contains(&path) && !changed.contains(&path) {
                            changed.push(path);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("File system watcher error: {:?}", e);
                }
            }
        }

        if !changed.is_empty() {
            tracing::debug!("Watcher saw {} changed documents", changed.len());
        }
        changed
    }
}

/// Split into (canonical parent, parent joined with the file name)
fn normalize(file: &Path) -> (PathBuf, PathBuf) {
    let parent = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let dir = parent
        .canonicalize()
        .unwrap_or_else(|_| parent.to_path_buf());
    let file = match file.file_name() {
        Some(name) => dir.join(name),
        None => dir.clone(),
    };
    (dir, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_shared_directory_is_watched_once() {
        let dir = tempdir().expect("Failed to create temp dir");
        let Ok(mut watcher) = DocumentWatcher::new(DEFAULT_DEBOUNCE) else {
            return; // Skip if watcher can't be created
        };
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        watcher.watch(&a).unwrap();
        watcher.watch(&b).unwrap();
        assert_eq!(watcher.watched_dirs(), 1);
        assert!(watcher.is_watching(&a));

        watcher.unwatch(&a);
        assert_eq!(watcher.watched_dirs(), 1);
        watcher.unwatch(&b);
        assert_eq!(watcher.watched_dirs(), 0);
        assert!(!watcher.is_watching(&b));
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempdir().expect("Failed to create temp dir");
        let Ok(mut watcher) = DocumentWatcher::new(DEFAULT_DEBOUNCE) else {
            return;
        };
        let missing = dir.path().join("nope").join("file.txt");
        assert!(watcher.watch(&missing).is_err());
        assert!(!watcher.is_watching(&missing));
        assert_eq!(watcher.watched_dirs(), 0);
    }

    #[test]
    #[ignore] // Flaky in CI - file system event timing varies by platform
    fn test_reports_only_watched_files() {
        let dir = tempdir().expect("Failed to create temp dir");
        let watched = dir.path().join("watched.txt");
        let other = dir.path().join("other.txt");
        fs::write(&watched, "one").unwrap();

        let mut watcher =
            DocumentWatcher::new(Duration::from_millis(100)).expect("Failed to create watcher");
        watcher.watch(&watched).unwrap();

        fs::write(&watched, "two").unwrap();
        fs::write(&other, "noise").unwrap();
        thread::sleep(Duration::from_millis(800));

        let changed = watcher.poll_changed();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].ends_with("watched.txt"));
    }
}

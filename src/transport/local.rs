//! Local file backend
//!
//! Opens and stats the file, then reads it in a single buffered pass. Read
//! failures in the middle of the file are reported as [`RawError::ReadFault`].

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use super::{Backend, BackendEvent, BackendPhase, Capability, FileMetadata};
use crate::error::{RawError, RequestError, VfsCode};
use crate::uri::DocumentUri;
use crate::util::content_type::{guess_content_type, MAX_SNIFF_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Opening,
    Statting,
    Reading,
    Completing,
    Cancelled,
    Done,
}

pub struct LocalBackend {
    path: Option<PathBuf>,
    file: Option<File>,
    content: Vec<u8>,
    metadata: FileMetadata,
    max_file_size: u64,
    state: State,
}

impl LocalBackend {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            path: None,
            file: None,
            content: Vec::new(),
            metadata: FileMetadata::default(),
            max_file_size,
            state: State::Idle,
        }
    }

    fn fail(&mut self, err: RawError) -> Option<BackendEvent> {
        tracing::debug!("Local load of {:?} failed: {}", self.path, err);
        self.file = None;
        self.content = Vec::new();
        self.state = State::Done;
        Some(BackendEvent::Failed(err))
    }

    fn open(&mut self) -> Option<BackendEvent> {
        let Some(path) = self.path.as_ref() else {
            return self.fail(RawError::vfs(VfsCode::InvalidUri, "not a local path"));
        };
        match File::open(path) {
            Ok(file) => {
                self.file = Some(file);
                self.state = State::Statting;
                None
            }
            Err(e) => self.fail(RawError::Io(e)),
        }
    }

    fn stat(&mut self) -> Option<BackendEvent> {
        let Some(file) = self.file.as_ref() else {
            return self.fail(RawError::Cancelled);
        };
        let info = match file.metadata() {
            Ok(info) => info,
            Err(e) => return self.fail(RawError::Io(e)),
        };

        if info.is_dir() {
            return self.fail(RawError::IsDirectory);
        }
        if !info.is_file() {
            return self.fail(RawError::NotRegularFile);
        }
        if info.len() > self.max_file_size {
            return self.fail(RawError::TooBig);
        }

        self.metadata.size = Some(info.len());
        self.metadata.mtime = info.modified().ok();
        self.metadata.read_only = info.permissions().readonly();
        self.state = State::Reading;
        None
    }

    fn read(&mut self) -> Option<BackendEvent> {
        let Some(mut file) = self.file.take() else {
            return self.fail(RawError::Cancelled);
        };
        let expected = self.metadata.size.unwrap_or(0);
        let capacity = usize::try_from(expected).unwrap_or(usize::MAX);
        if self.content.try_reserve_exact(capacity).is_err() {
            return self.fail(RawError::NoMemory);
        }

        // The file may change size between stat and read; trust what we read
        let bytes = match file.read_to_end(&mut self.content) {
            Ok(bytes) => bytes as u64,
            Err(e) => return self.fail(RawError::ReadFault(e)),
        };

        self.metadata.bytes_read = bytes;
        self.state = State::Completing;
        if bytes == 0 {
            return self.complete();
        }
        Some(BackendEvent::Progress {
            bytes,
            total: self.metadata.size.map(|size| size.max(bytes)),
        })
    }

    fn complete(&mut self) -> Option<BackendEvent> {
        let name = self
            .path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned());
        let head = &self.content[..self.content.len().min(MAX_SNIFF_SIZE)];
        self.metadata.content_type = guess_content_type(name.as_deref(), head);
        self.state = State::Done;
        tracing::debug!(
            "Local load of {:?} complete: {} bytes",
            self.path,
            self.metadata.bytes_read
        );
        Some(BackendEvent::Complete {
            content: std::mem::take(&mut self.content),
            metadata: self.metadata.clone(),
        })
    }
}

impl Backend for LocalBackend {
    fn capability(&self) -> Capability {
        Capability::LocalMapped
    }

    fn phase(&self) -> BackendPhase {
        match self.state {
            State::Idle => BackendPhase::Idle,
            State::Opening => BackendPhase::Opening,
            State::Statting => BackendPhase::ReadingMetadata,
            State::Reading | State::Completing => BackendPhase::Streaming,
            State::Cancelled | State::Done => BackendPhase::Finished,
        }
    }

    fn load(&mut self, uri: &DocumentUri) -> Result<(), RequestError> {
        if self.state != State::Idle {
            return Err(RequestError::AlreadyUsed);
        }
        tracing::debug!("Opening local file {}", uri);
        self.path = uri.local_path();
        self.state = State::Opening;
        Ok(())
    }

    fn poll(&mut self) -> Option<BackendEvent> {
        match self.state {
            State::Idle | State::Done => None,
            State::Opening => self.open(),
            State::Statting => self.stat(),
            State::Reading => self.read(),
            State::Completing => self.complete(),
            State::Cancelled => {
                self.state = State::Done;
                Some(BackendEvent::Failed(RawError::Cancelled))
            }
        }
    }

    fn cancel(&mut self) -> bool {
        match self.state {
            State::Idle | State::Cancelled | State::Done => false,
            _ => {
                tracing::debug!("Cancelling local load of {:?}", self.path);
                self.file = None;
                self.content = Vec::new();
                self.state = State::Cancelled;
                true
            }
        }
    }

    fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn drain(backend: &mut LocalBackend) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        for _ in 0..16 {
            if let Some(event) = backend.poll() {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_reads_whole_file() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"hello\nworld\n").unwrap();
        temp.flush().unwrap();

        let mut backend = LocalBackend::new(u64::MAX);
        backend.load(&DocumentUri::from_path(temp.path())).unwrap();
        let events = drain(&mut backend);

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            BackendEvent::Progress { bytes: 12, total: Some(12) }
        ));
        match &events[1] {
            BackendEvent::Complete { content, metadata } => {
                assert_eq!(content, b"hello\nworld\n");
                assert_eq!(metadata.bytes_read, 12);
                assert!(metadata.mtime.is_some());
                assert_eq!(metadata.content_type.as_deref(), Some("text/plain"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(backend.phase(), BackendPhase::Finished);
    }

    #[test]
    fn test_empty_file_completes_without_progress() {
        let temp = NamedTempFile::new().unwrap();
        let mut backend = LocalBackend::new(u64::MAX);
        backend.load(&DocumentUri::from_path(temp.path())).unwrap();
        let events = drain(&mut backend);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BackendEvent::Complete { content, .. } if content.is_empty()));
    }

    #[test]
    fn test_directory_fails() {
        let dir = tempdir().unwrap();
        let mut backend = LocalBackend::new(u64::MAX);
        backend.load(&DocumentUri::from_path(dir.path())).unwrap();
        let events = drain(&mut backend);
        assert_eq!(events.len(), 1);
        match &events[0] {
            BackendEvent::Failed(err) => assert_eq!(err.classify(), ErrorKind::IsDirectory),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempdir().unwrap();
        let mut backend = LocalBackend::new(u64::MAX);
        backend
            .load(&DocumentUri::from_path(&dir.path().join("missing.txt")))
            .unwrap();
        match backend.poll() {
            Some(BackendEvent::Failed(err)) => assert_eq!(err.classify(), ErrorKind::NotFound),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(backend.poll().is_none());
    }

    #[test]
    fn test_max_file_size_guard() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"0123456789").unwrap();
        temp.flush().unwrap();

        let mut backend = LocalBackend::new(4);
        backend.load(&DocumentUri::from_path(temp.path())).unwrap();
        let events = drain(&mut backend);
        assert!(matches!(&events[..], [BackendEvent::Failed(RawError::TooBig)]));
    }

    #[test]
    fn test_second_load_is_rejected() {
        let temp = NamedTempFile::new().unwrap();
        let uri = DocumentUri::from_path(temp.path());
        let mut backend = LocalBackend::new(u64::MAX);
        backend.load(&uri).unwrap();
        assert_eq!(backend.load(&uri), Err(RequestError::AlreadyUsed));
    }

    #[test]
    fn test_cancel_emits_single_cancelled() {
        let temp = NamedTempFile::new().unwrap();
        let mut backend = LocalBackend::new(u64::MAX);
        backend.load(&DocumentUri::from_path(temp.path())).unwrap();
        assert!(backend.poll().is_none()); // opened

        assert!(backend.cancel());
        assert!(!backend.cancel());
        let events = drain(&mut backend);
        assert!(matches!(&events[..], [BackendEvent::Failed(RawError::Cancelled)]));
    }
}

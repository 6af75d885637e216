//! Transport backends
//!
//! A backend reads one document from one location. Three implementations share
//! the [`Backend`] contract:
//!
//! - [`local::LocalBackend`]: local files, stat then a single buffered read
//! - [`blocking::BlockingBackend`]: a blocking VFS read one 8 KiB chunk per tick
//! - [`remote::RemoteBackend`]: an asynchronous VFS driven by completion messages
//!
//! Backends are polled by their owning operation, one bounded step per poll.
//! Every backend emits zero or more [`BackendEvent::Progress`] events with
//! non-decreasing byte counts, then exactly one terminal event. After the
//! terminal event, `poll` returns `None` forever.

pub mod blocking;
pub mod local;
pub mod memory;
pub mod remote;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::SystemTime;

use crate::error::{ErrorKind, ErrorRecord, RawError, RequestError};
use crate::uri::DocumentUri;

pub use blocking::{BlockingBackend, BlockingVfs, StdFsVfs};
pub use local::LocalBackend;
pub use memory::MemoryVfs;
pub use remote::{AsyncVfs, Completion, RemoteBackend, VfsReply, VfsRequest};

/// Size of each streamed read
pub const READ_CHUNK_SIZE: usize = 8192;

/// Which kind of storage access a backend performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Direct local file access
    LocalMapped,
    /// Blocking VFS deferred onto scheduler ticks
    BlockingVfs,
    /// Fully asynchronous VFS
    Async,
}

/// Coarse progress of a backend through its load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPhase {
    Idle,
    Opening,
    ReadingMetadata,
    Streaming,
    Finished,
}

/// What a backend knows about the file it is reading
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    pub bytes_read: u64,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub mtime: Option<SystemTime>,
    pub read_only: bool,
}

#[derive(Debug)]
pub enum BackendEvent {
    Progress { bytes: u64, total: Option<u64> },
    Complete { content: Vec<u8>, metadata: FileMetadata },
    Failed(RawError),
}

impl BackendEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// The load contract shared by all transports
pub trait Backend {
    fn capability(&self) -> Capability;

    fn phase(&self) -> BackendPhase;

    /// Begin loading `uri`. A backend loads exactly once.
    fn load(&mut self, uri: &DocumentUri) -> Result<(), RequestError>;

    /// Advance one bounded step, returning at most one event
    fn poll(&mut self) -> Option<BackendEvent>;

    /// Abort an in-flight load
    ///
    /// Returns `false` when nothing is in flight. After a successful cancel the
    /// only remaining event is a single `Failed(RawError::Cancelled)`.
    fn cancel(&mut self) -> bool;

    fn metadata(&self) -> &FileMetadata;
}

/// File kinds reported by a VFS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    #[default]
    Regular,
    Directory,
    Other,
}

/// Metadata reported by a VFS query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub kind: FileKind,
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    pub content_type: Option<String>,
    /// `None` when the VFS cannot tell
    pub can_write: Option<bool>,
}

impl FileInfo {
    pub(crate) fn ensure_regular(&self) -> Result<(), RawError> {
        match self.kind {
            FileKind::Regular => Ok(()),
            FileKind::Directory => Err(RawError::IsDirectory),
            FileKind::Other => Err(RawError::NotRegularFile),
        }
    }

    /// Copy into backend metadata. Unknown writability is not read-only.
    pub(crate) fn apply_to(&self, metadata: &mut FileMetadata) {
        metadata.size = self.size;
        metadata.mtime = self.mtime;
        metadata.content_type = self.content_type.clone();
        metadata.read_only = self.can_write == Some(false);
    }
}

/// Accumulates streamed chunks
#[derive(Debug, Default)]
pub(crate) struct ChunkBuffer {
    data: Vec<u8>,
    bytes_read: u64,
}

impl ChunkBuffer {
    /// Append a chunk, returning the new total
    pub(crate) fn append(&mut self, chunk: &[u8]) -> Result<u64, RawError> {
        let total = self
            .bytes_read
            .checked_add(chunk.len() as u64)
            .ok_or(RawError::TooBig)?;
        self.data
            .try_reserve(chunk.len())
            .map_err(|_| RawError::NoMemory)?;
        self.data.extend_from_slice(chunk);
        self.bytes_read = total;
        Ok(total)
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        self.bytes_read = 0;
        std::mem::take(&mut self.data)
    }

    pub(crate) fn clear(&mut self) {
        self.data = Vec::new();
        self.bytes_read = 0;
    }
}

/// Schemes served by virtual filesystems
#[derive(Default, Clone)]
pub struct VfsRegistry {
    blocking: HashMap<String, Rc<dyn BlockingVfs>>,
    asynchronous: HashMap<String, Rc<dyn AsyncVfs>>,
    /// Schemes saved through a blocking VFS but loaded some other way
    writers: HashMap<String, Rc<dyn BlockingVfs>>,
}

impl VfsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `scheme` to the blocking backend. Takes precedence over local access.
    pub fn register_blocking(&mut self, scheme: &str, vfs: Rc<dyn BlockingVfs>) {
        self.blocking.insert(scheme.to_ascii_lowercase(), vfs);
    }

    pub fn register_async(&mut self, scheme: &str, vfs: Rc<dyn AsyncVfs>) {
        self.asynchronous.insert(scheme.to_ascii_lowercase(), vfs);
    }

    /// Save `scheme` through `vfs` without routing loads to it
    pub fn register_writer(&mut self, scheme: &str, vfs: Rc<dyn BlockingVfs>) {
        self.writers.insert(scheme.to_ascii_lowercase(), vfs);
    }

    pub fn blocking(&self, scheme: &str) -> Option<Rc<dyn BlockingVfs>> {
        self.blocking.get(scheme).cloned()
    }

    /// The VFS that saves to `scheme`
    pub fn writer(&self, scheme: &str) -> Option<Rc<dyn BlockingVfs>> {
        self.blocking
            .get(scheme)
            .or_else(|| self.writers.get(scheme))
            .cloned()
    }

    /// Let every asynchronous VFS deliver its queued completions
    pub fn drive(&self) {
        let mut driven: Vec<&Rc<dyn AsyncVfs>> = Vec::new();
        for vfs in self.asynchronous.values() {
            if driven.iter().any(|seen| Rc::ptr_eq(seen, vfs)) {
                continue;
            }
            vfs.drive();
            driven.push(vfs);
        }
    }

    /// Pick the backend for `uri`, once, at load start
    pub fn select_backend(
        &self,
        uri: &DocumentUri,
        max_file_size: u64,
    ) -> Result<Box<dyn Backend>, ErrorRecord> {
        let scheme = uri.scheme();
        if let Some(vfs) = self.blocking.get(scheme) {
            tracing::debug!("Using blocking VFS backend for {}", uri);
            return Ok(Box::new(BlockingBackend::new(Rc::clone(vfs))));
        }
        if uri.is_local() {
            tracing::debug!("Using local backend for {}", uri);
            return Ok(Box::new(LocalBackend::new(max_file_size)));
        }
        if let Some(vfs) = self.asynchronous.get(scheme) {
            tracing::debug!("Using async backend for {}", uri);
            return Ok(Box::new(RemoteBackend::new(Rc::clone(vfs))));
        }
        Err(ErrorRecord::new(
            ErrorKind::NotSupportedScheme,
            format!("no transport for scheme '{}'", scheme),
        ))
    }
}

impl fmt::Debug for VfsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut blocking: Vec<_> = self.blocking.keys().collect();
        let mut asynchronous: Vec<_> = self.asynchronous.keys().collect();
        let mut writers: Vec<_> = self.writers.keys().collect();
        blocking.sort();
        asynchronous.sort();
        writers.sort();
        f.debug_struct("VfsRegistry")
            .field("blocking", &blocking)
            .field("asynchronous", &asynchronous)
            .field("writers", &writers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_buffer_overflow_is_too_big() {
        let mut buffer = ChunkBuffer {
            data: Vec::new(),
            bytes_read: u64::MAX - 1,
        };
        let err = buffer.append(b"ab").unwrap_err();
        assert!(matches!(err, RawError::TooBig));
        assert_eq!(buffer.bytes_read(), u64::MAX - 1);
    }

    #[test]
    fn test_chunk_buffer_accumulates() {
        let mut buffer = ChunkBuffer::default();
        assert_eq!(buffer.append(b"abc").unwrap(), 3);
        assert_eq!(buffer.append(b"de").unwrap(), 5);
        assert_eq!(buffer.take(), b"abcde");
        assert_eq!(buffer.bytes_read(), 0);
    }

    #[test]
    fn test_select_backend_by_scheme() {
        let mut registry = VfsRegistry::new();
        let memory = Rc::new(MemoryVfs::new());
        registry.register_async("mem", memory.clone());

        let local = DocumentUri::parse("file:///tmp/a.txt").unwrap();
        let remote = DocumentUri::parse("mem://store/a.txt").unwrap();
        let unknown = DocumentUri::parse("gopher://host/a.txt").unwrap();

        assert_eq!(
            registry.select_backend(&local, u64::MAX).unwrap().capability(),
            Capability::LocalMapped
        );
        assert_eq!(
            registry.select_backend(&remote, u64::MAX).unwrap().capability(),
            Capability::Async
        );
        let err = registry.select_backend(&unknown, u64::MAX).err().unwrap();
        assert_eq!(err.kind, ErrorKind::NotSupportedScheme);

        registry.register_blocking("file", Rc::new(StdFsVfs));
        assert_eq!(
            registry.select_backend(&local, u64::MAX).unwrap().capability(),
            Capability::BlockingVfs
        );
    }

    #[test]
    fn test_writer_does_not_change_load_backend() {
        let mut registry = VfsRegistry::new();
        let memory = Rc::new(MemoryVfs::new());
        registry.register_async("mem", memory.clone());
        assert!(registry.writer("mem").is_none());

        registry.register_writer("mem", memory);
        let remote = DocumentUri::parse("mem://store/a.txt").unwrap();
        assert_eq!(
            registry.select_backend(&remote, u64::MAX).unwrap().capability(),
            Capability::Async
        );
        assert!(registry.writer("mem").is_some());
    }

    #[test]
    fn test_file_info_read_only() {
        let mut metadata = FileMetadata::default();
        FileInfo::default().apply_to(&mut metadata);
        assert!(!metadata.read_only);

        let info = FileInfo {
            can_write: Some(false),
            ..Default::default()
        };
        info.apply_to(&mut metadata);
        assert!(metadata.read_only);
    }
}

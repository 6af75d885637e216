//! Blocking VFS backend
//!
//! Wraps a [`BlockingVfs`] whose calls block. Each poll performs one call and
//! returns, so one tick of the scheduler never does more than open, one stat,
//! or one 8 KiB read.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::rc::Rc;

use super::{
    Backend, BackendEvent, BackendPhase, Capability, ChunkBuffer, FileInfo, FileKind,
    FileMetadata, READ_CHUNK_SIZE,
};
use crate::error::{RawError, RequestError, VfsCode};
use crate::uri::DocumentUri;
use crate::util::content_type::{guess_content_type, MAX_SNIFF_SIZE};

/// A filesystem reachable through blocking calls
pub trait BlockingVfs {
    fn open(&self, uri: &DocumentUri) -> Result<Box<dyn Read>, RawError>;

    fn query_info(&self, uri: &DocumentUri) -> Result<FileInfo, RawError>;

    /// Replace the contents of `uri`, creating it if needed
    fn replace(&self, uri: &DocumentUri, contents: &[u8]) -> Result<FileInfo, RawError>;
}

/// `std::fs` exposed as a blocking VFS for `file://` uris
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFsVfs;

impl StdFsVfs {
    fn path(uri: &DocumentUri) -> Result<PathBuf, RawError> {
        uri.local_path()
            .ok_or_else(|| RawError::vfs(VfsCode::NotSupported, format!("{} is not local", uri)))
    }
}

impl BlockingVfs for StdFsVfs {
    fn open(&self, uri: &DocumentUri) -> Result<Box<dyn Read>, RawError> {
        let file = fs::File::open(Self::path(uri)?)?;
        Ok(Box::new(file))
    }

    fn query_info(&self, uri: &DocumentUri) -> Result<FileInfo, RawError> {
        let metadata = fs::metadata(Self::path(uri)?)?;
        let kind = if metadata.is_file() {
            FileKind::Regular
        } else if metadata.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Other
        };
        Ok(FileInfo {
            kind,
            size: Some(metadata.len()),
            mtime: metadata.modified().ok(),
            content_type: None,
            can_write: Some(!metadata.permissions().readonly()),
        })
    }

    fn replace(&self, uri: &DocumentUri, contents: &[u8]) -> Result<FileInfo, RawError> {
        let mut file = fs::File::create(Self::path(uri)?)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        self.query_info(uri)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Opening,
    QueryingInfo,
    Reading,
    Cancelled,
    Done,
}

pub struct BlockingBackend {
    vfs: Rc<dyn BlockingVfs>,
    uri: Option<DocumentUri>,
    reader: Option<Box<dyn Read>>,
    buffer: ChunkBuffer,
    metadata: FileMetadata,
    state: State,
}

impl BlockingBackend {
    pub fn new(vfs: Rc<dyn BlockingVfs>) -> Self {
        Self {
            vfs,
            uri: None,
            reader: None,
            buffer: ChunkBuffer::default(),
            metadata: FileMetadata::default(),
            state: State::Idle,
        }
    }

    fn fail(&mut self, err: RawError) -> Option<BackendEvent> {
        tracing::debug!("Blocking VFS load failed: {}", err);
        self.reader = None;
        self.buffer.clear();
        self.state = State::Done;
        Some(BackendEvent::Failed(err))
    }

    fn step(&mut self, uri: &DocumentUri) -> Result<Option<BackendEvent>, RawError> {
        match self.state {
            State::Opening => {
                self.reader = Some(self.vfs.open(uri)?);
                self.state = State::QueryingInfo;
                Ok(None)
            }
            State::QueryingInfo => {
                let info = self.vfs.query_info(uri)?;
                info.ensure_regular()?;
                info.apply_to(&mut self.metadata);
                self.state = State::Reading;
                Ok(None)
            }
            State::Reading => {
                let Some(reader) = self.reader.as_mut() else {
                    return Err(RawError::Cancelled);
                };
                let mut chunk = Vec::with_capacity(READ_CHUNK_SIZE);
                reader
                    .by_ref()
                    .take(READ_CHUNK_SIZE as u64)
                    .read_to_end(&mut chunk)
                    .map_err(RawError::ReadFault)?;

                if chunk.is_empty() {
                    return Ok(self.complete(uri));
                }
                let bytes = self.buffer.append(&chunk)?;
                self.metadata.bytes_read = bytes;
                Ok(Some(BackendEvent::Progress {
                    bytes,
                    total: self.metadata.size,
                }))
            }
            State::Idle | State::Cancelled | State::Done => Ok(None),
        }
    }

    fn complete(&mut self, uri: &DocumentUri) -> Option<BackendEvent> {
        self.reader = None;
        self.state = State::Done;
        let content = self.buffer.take();
        if self.metadata.content_type.is_none() {
            let head = &content[..content.len().min(MAX_SNIFF_SIZE)];
            self.metadata.content_type = guess_content_type(uri.file_name().as_deref(), head);
        }
        tracing::debug!("Blocking VFS load of {} complete: {} bytes", uri, content.len());
        Some(BackendEvent::Complete {
            content,
            metadata: self.metadata.clone(),
        })
    }
}

impl Backend for BlockingBackend {
    fn capability(&self) -> Capability {
        Capability::BlockingVfs
    }

    fn phase(&self) -> BackendPhase {
        match self.state {
            State::Idle => BackendPhase::Idle,
            State::Opening => BackendPhase::Opening,
            State::QueryingInfo => BackendPhase::ReadingMetadata,
            State::Reading => BackendPhase::Streaming,
            State::Cancelled | State::Done => BackendPhase::Finished,
        }
    }

    fn load(&mut self, uri: &DocumentUri) -> Result<(), RequestError> {
        if self.state != State::Idle {
            return Err(RequestError::AlreadyUsed);
        }
        tracing::debug!("Opening {} through blocking VFS", uri);
        self.uri = Some(uri.clone());
        self.state = State::Opening;
        Ok(())
    }

    fn poll(&mut self) -> Option<BackendEvent> {
        if self.state == State::Cancelled {
            self.state = State::Done;
            return Some(BackendEvent::Failed(RawError::Cancelled));
        }
        let uri = self.uri.clone()?;
        match self.step(&uri) {
            Ok(event) => event,
            Err(err) => self.fail(err),
        }
    }

    fn cancel(&mut self) -> bool {
        match self.state {
            State::Idle | State::Cancelled | State::Done => false,
            _ => {
                self.reader = None;
                self.buffer.clear();
                self.state = State::Cancelled;
                true
            }
        }
    }

    fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }
}

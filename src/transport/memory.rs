//! In-process file store
//!
//! `MemoryVfs` keeps files in memory, keyed by uri path, and serves them both
//! as an [`AsyncVfs`] and as a [`BlockingVfs`]. Requests queue up until
//! [`AsyncVfs::drive`] runs, which is when replies are sent. It can simulate an
//! unmounted location, a mount failure and streams that cannot report info.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{Cursor, Read};
use std::sync::mpsc::Sender;
use std::time::{Duration, SystemTime};

use super::blocking::BlockingVfs;
use super::remote::{AsyncVfs, Completion, RequestId, StreamId, VfsReply, VfsRequest};
use super::{FileInfo, FileKind};
use crate::error::{RawError, VfsCode};
use crate::uri::DocumentUri;

#[derive(Debug, Clone)]
struct MemFile {
    data: Vec<u8>,
    kind: FileKind,
    mtime: SystemTime,
    read_only: bool,
}

#[derive(Debug)]
struct Stream {
    path: String,
    position: usize,
}

struct Pending {
    id: RequestId,
    request: VfsRequest,
    reply_to: Sender<Completion>,
}

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, MemFile>,
    streams: HashMap<StreamId, Stream>,
    queue: VecDeque<Pending>,
    next_id: RequestId,
    next_stream: StreamId,
    /// Logical clock for modification times
    clock: u64,
    needs_mount: bool,
    mounted: bool,
    mount_failure: Option<VfsCode>,
    mounts: usize,
    stream_info_unsupported: bool,
}

impl Inner {
    fn tick_clock(&mut self) -> SystemTime {
        self.clock += 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.clock)
    }

    fn check_mounted(&self) -> Result<(), RawError> {
        if self.needs_mount && !self.mounted {
            return Err(RawError::vfs(VfsCode::NotMounted, "location is not mounted"));
        }
        Ok(())
    }

    fn file(&self, path: &str) -> Result<&MemFile, RawError> {
        self.check_mounted()?;
        self.files
            .get(path)
            .ok_or_else(|| RawError::vfs(VfsCode::NotFound, format!("{} not found", path)))
    }

    fn info(&self, path: &str) -> Result<FileInfo, RawError> {
        let file = self.file(path)?;
        Ok(FileInfo {
            kind: file.kind,
            size: Some(file.data.len() as u64),
            mtime: Some(file.mtime),
            content_type: None,
            can_write: Some(!file.read_only),
        })
    }

    fn execute(&mut self, request: VfsRequest) -> VfsReply {
        let result = match request {
            VfsRequest::Open(uri) => {
                let path = uri.path();
                self.file(&path).map(|_| ()).map(|()| self.open_stream(path))
            }
            VfsRequest::QueryStreamInfo(stream) => {
                if self.stream_info_unsupported {
                    Err(RawError::vfs(VfsCode::NotSupported, "stream info not supported"))
                } else {
                    match self.streams.get(&stream) {
                        Some(s) => self.info(&s.path).map(VfsReply::Info),
                        None => Err(bad_stream(stream)),
                    }
                }
            }
            VfsRequest::QueryInfo(uri) => self.info(&uri.path()).map(VfsReply::Info),
            VfsRequest::Read { stream, len } => self.read(stream, len).map(VfsReply::Data),
            VfsRequest::Close(stream) => match self.streams.remove(&stream) {
                Some(_) => Ok(VfsReply::Closed),
                None => Err(bad_stream(stream)),
            },
            VfsRequest::Mount(_) => {
                self.mounts += 1;
                match self.mount_failure {
                    Some(code) => Err(RawError::vfs(code, "mount failed")),
                    None => {
                        self.mounted = true;
                        Ok(VfsReply::Mounted)
                    }
                }
            }
        };
        result.unwrap_or_else(VfsReply::Failed)
    }

    fn open_stream(&mut self, path: String) -> VfsReply {
        self.next_stream += 1;
        let id = self.next_stream;
        self.streams.insert(id, Stream { path, position: 0 });
        VfsReply::Opened(id)
    }

    fn read(&mut self, stream: StreamId, len: usize) -> Result<Vec<u8>, RawError> {
        let Some(s) = self.streams.get(&stream) else {
            return Err(bad_stream(stream));
        };
        let file = self
            .files
            .get(&s.path)
            .ok_or_else(|| RawError::vfs(VfsCode::NotFound, "file vanished"))?;
        let start = s.position.min(file.data.len());
        let end = start.saturating_add(len).min(file.data.len());
        let chunk = file.data[start..end].to_vec();
        if let Some(s) = self.streams.get_mut(&stream) {
            s.position = end;
        }
        Ok(chunk)
    }
}

fn bad_stream(stream: StreamId) -> RawError {
    RawError::vfs(VfsCode::Generic, format!("no open stream {}", stream))
}

#[derive(Default)]
pub struct MemoryVfs {
    inner: RefCell<Inner>,
}

impl MemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a regular file
    pub fn insert(&self, path: &str, data: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        let mtime = inner.tick_clock();
        inner.files.insert(
            path.to_string(),
            MemFile {
                data: data.to_vec(),
                kind: FileKind::Regular,
                mtime,
                read_only: false,
            },
        );
    }

    pub fn insert_dir(&self, path: &str) {
        let mut inner = self.inner.borrow_mut();
        let mtime = inner.tick_clock();
        inner.files.insert(
            path.to_string(),
            MemFile {
                data: Vec::new(),
                kind: FileKind::Directory,
                mtime,
                read_only: false,
            },
        );
    }

    pub fn set_read_only(&self, path: &str, read_only: bool) {
        if let Some(file) = self.inner.borrow_mut().files.get_mut(path) {
            file.read_only = read_only;
        }
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.borrow().files.get(path).map(|f| f.data.clone())
    }

    pub fn mtime(&self, path: &str) -> Option<SystemTime> {
        self.inner.borrow().files.get(path).map(|f| f.mtime)
    }

    /// Start unmounted; opens fail with `NotMounted` until a mount succeeds
    pub fn require_mount(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.needs_mount = true;
        inner.mounted = false;
    }

    pub fn fail_mount(&self, code: VfsCode) {
        self.inner.borrow_mut().mount_failure = Some(code);
    }

    pub fn mount_count(&self) -> usize {
        self.inner.borrow().mounts
    }

    pub fn set_stream_info_supported(&self, supported: bool) {
        self.inner.borrow_mut().stream_info_unsupported = !supported;
    }

    pub fn open_streams(&self) -> usize {
        self.inner.borrow().streams.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.borrow().queue.len()
    }
}

impl AsyncVfs for MemoryVfs {
    fn submit(&self, request: VfsRequest, reply_to: Sender<Completion>) -> RequestId {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.queue.push_back(Pending {
            id,
            request,
            reply_to,
        });
        id
    }

    fn cancel(&self, id: RequestId) {
        self.inner.borrow_mut().queue.retain(|p| p.id != id);
    }

    fn drive(&self) {
        // Requests submitted from a reply handler wait for the next drive
        let queue = std::mem::take(&mut self.inner.borrow_mut().queue);
        for pending in queue {
            let reply = self.inner.borrow_mut().execute(pending.request);
            // The receiver is gone once the requester cancelled; that is fine
            let _ = pending.reply_to.send(Completion {
                id: pending.id,
                reply,
            });
        }
    }
}

impl BlockingVfs for MemoryVfs {
    fn open(&self, uri: &DocumentUri) -> Result<Box<dyn Read>, RawError> {
        let inner = self.inner.borrow();
        let file = inner.file(&uri.path())?;
        match file.kind {
            FileKind::Regular => Ok(Box::new(Cursor::new(file.data.clone()))),
            FileKind::Directory => Err(RawError::IsDirectory),
            FileKind::Other => Err(RawError::NotRegularFile),
        }
    }

    fn query_info(&self, uri: &DocumentUri) -> Result<FileInfo, RawError> {
        self.inner.borrow().info(&uri.path())
    }

    fn replace(&self, uri: &DocumentUri, contents: &[u8]) -> Result<FileInfo, RawError> {
        let mut inner = self.inner.borrow_mut();
        inner.check_mounted()?;
        let path = uri.path();
        if let Some(existing) = inner.files.get(&path) {
            if existing.kind == FileKind::Directory {
                return Err(RawError::IsDirectory);
            }
            if existing.read_only {
                return Err(RawError::vfs(
                    VfsCode::PermissionDenied,
                    format!("{} is read-only", path),
                ));
            }
        }
        let mtime = inner.tick_clock();
        inner.files.insert(
            path.clone(),
            MemFile {
                data: contents.to_vec(),
                kind: FileKind::Regular,
                mtime,
                read_only: false,
            },
        );
        inner.info(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_replies_wait_for_drive() {
        let vfs = MemoryVfs::new();
        vfs.insert("/a.txt", b"abc");
        let (tx, rx) = mpsc::channel();
        let uri = DocumentUri::parse("mem://h/a.txt").unwrap();

        let id = vfs.submit(VfsRequest::Open(uri), tx);
        assert!(rx.try_recv().is_err());
        assert_eq!(vfs.pending_requests(), 1);

        vfs.drive();
        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.id, id);
        assert!(matches!(completion.reply, VfsReply::Opened(_)));
    }

    #[test]
    fn test_cancelled_request_gets_no_reply() {
        let vfs = MemoryVfs::new();
        vfs.insert("/a.txt", b"abc");
        let (tx, rx) = mpsc::channel();
        let id = vfs.submit(
            VfsRequest::QueryInfo(DocumentUri::parse("mem://h/a.txt").unwrap()),
            tx,
        );
        vfs.cancel(id);
        vfs.drive();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_blocking_replace_bumps_mtime() {
        let vfs = MemoryVfs::new();
        vfs.insert("/a.txt", b"old");
        let before = vfs.mtime("/a.txt").unwrap();

        let uri = DocumentUri::parse("mem://h/a.txt").unwrap();
        let info = vfs.replace(&uri, b"new!").unwrap();
        assert_eq!(info.size, Some(4));
        assert!(info.mtime.unwrap() > before);
        assert_eq!(vfs.contents("/a.txt").unwrap(), b"new!");
    }

    #[test]
    fn test_replace_read_only_is_denied() {
        let vfs = MemoryVfs::new();
        vfs.insert("/ro.txt", b"locked");
        vfs.set_read_only("/ro.txt", true);
        let uri = DocumentUri::parse("mem://h/ro.txt").unwrap();
        let err = vfs.replace(&uri, b"x").unwrap_err();
        assert_eq!(err.vfs_code(), Some(VfsCode::PermissionDenied));
    }
}

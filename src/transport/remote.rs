//! Asynchronous VFS backend
//!
//! Every VFS call is a request submitted with a reply channel. The VFS answers
//! later, from its own `drive`, with a [`Completion`] carrying the request id.
//! The backend keeps exactly one request outstanding and ignores completions for
//! any other id. Cancelling drops the reply channel, so completions the VFS
//! delivers afterwards go nowhere.
//!
//! The load sequence is open, query stream info, then 8 KiB reads until a read
//! returns no data. An open failing with `NotMounted` triggers one mount and a
//! second open. A stream that cannot report info falls back to querying the uri.

use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use super::{
    Backend, BackendEvent, BackendPhase, Capability, ChunkBuffer, FileInfo, FileMetadata,
    READ_CHUNK_SIZE,
};
use crate::error::{RawError, RequestError, VfsCode};
use crate::uri::DocumentUri;
use crate::util::content_type::{guess_content_type, MAX_SNIFF_SIZE};

pub type RequestId = u64;
pub type StreamId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfsRequest {
    Open(DocumentUri),
    QueryStreamInfo(StreamId),
    QueryInfo(DocumentUri),
    Read { stream: StreamId, len: usize },
    Close(StreamId),
    Mount(DocumentUri),
}

#[derive(Debug)]
pub enum VfsReply {
    Opened(StreamId),
    Info(FileInfo),
    Data(Vec<u8>),
    Closed,
    Mounted,
    Failed(RawError),
}

#[derive(Debug)]
pub struct Completion {
    pub id: RequestId,
    pub reply: VfsReply,
}

/// A filesystem reachable through callback-style requests
pub trait AsyncVfs {
    /// Queue `request`; its completion is sent on `reply_to`
    fn submit(&self, request: VfsRequest, reply_to: Sender<Completion>) -> RequestId;

    /// Abandon a queued request. Its completion may still be delivered.
    fn cancel(&self, id: RequestId);

    /// Deliver completions for requests queued so far
    fn drive(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Opening,
    Mounting,
    QueryingStreamInfo,
    QueryingInfo,
    Reading,
    Cancelled,
    Done,
}

pub struct RemoteBackend {
    vfs: Rc<dyn AsyncVfs>,
    uri: Option<DocumentUri>,
    channel: Option<(Sender<Completion>, Receiver<Completion>)>,
    outstanding: Option<RequestId>,
    stream: Option<StreamId>,
    tried_mount: bool,
    buffer: ChunkBuffer,
    metadata: FileMetadata,
    state: State,
}

impl RemoteBackend {
    pub fn new(vfs: Rc<dyn AsyncVfs>) -> Self {
        Self {
            vfs,
            uri: None,
            channel: None,
            outstanding: None,
            stream: None,
            tried_mount: false,
            buffer: ChunkBuffer::default(),
            metadata: FileMetadata::default(),
            state: State::Idle,
        }
    }

    fn submit(&mut self, request: VfsRequest) {
        let Some((sender, _)) = self.channel.as_ref() else {
            return;
        };
        let id = self.vfs.submit(request, sender.clone());
        self.outstanding = Some(id);
    }

    fn uri(&self) -> Result<DocumentUri, RawError> {
        self.uri
            .clone()
            .ok_or_else(|| RawError::vfs(VfsCode::InvalidUri, "no location to load"))
    }

    /// Close the stream without waiting for the reply
    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let (sender, _) = mpsc::channel();
            self.vfs.submit(VfsRequest::Close(stream), sender);
        }
    }

    fn teardown(&mut self) {
        if let Some(id) = self.outstanding.take() {
            self.vfs.cancel(id);
        }
        self.close_stream();
        self.channel = None;
        self.buffer.clear();
    }

    fn fail(&mut self, err: RawError) -> Option<BackendEvent> {
        tracing::debug!("Async load of {:?} failed: {}", self.uri, err);
        self.teardown();
        self.state = State::Done;
        Some(BackendEvent::Failed(err))
    }

    fn next_completion(&mut self) -> Option<Completion> {
        let (_, receiver) = self.channel.as_ref()?;
        loop {
            match receiver.try_recv() {
                Ok(completion) if Some(completion.id) == self.outstanding => {
                    self.outstanding = None;
                    return Some(completion);
                }
                Ok(stale) => tracing::trace!("Dropping stale completion {}", stale.id),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    fn request_read(&mut self) -> Result<(), RawError> {
        let stream = self
            .stream
            .ok_or_else(|| RawError::vfs(VfsCode::Generic, "stream closed"))?;
        self.submit(VfsRequest::Read {
            stream,
            len: READ_CHUNK_SIZE,
        });
        Ok(())
    }

    fn handle(&mut self, reply: VfsReply) -> Result<Option<BackendEvent>, RawError> {
        match (self.state, reply) {
            (State::Opening, VfsReply::Opened(stream)) => {
                self.stream = Some(stream);
                self.state = State::QueryingStreamInfo;
                self.submit(VfsRequest::QueryStreamInfo(stream));
                Ok(None)
            }
            (State::Opening, VfsReply::Failed(err))
                if err.vfs_code() == Some(VfsCode::NotMounted) && !self.tried_mount =>
            {
                tracing::info!("{:?} is not mounted, mounting", self.uri);
                self.tried_mount = true;
                self.state = State::Mounting;
                let uri = self.uri()?;
                self.submit(VfsRequest::Mount(uri));
                Ok(None)
            }
            (State::Mounting, VfsReply::Mounted) => {
                self.state = State::Opening;
                let uri = self.uri()?;
                self.submit(VfsRequest::Open(uri));
                Ok(None)
            }
            (State::QueryingStreamInfo, VfsReply::Failed(err))
                if err.vfs_code() == Some(VfsCode::NotSupported) =>
            {
                tracing::debug!("Stream info not supported, querying the location instead");
                self.state = State::QueryingInfo;
                let uri = self.uri()?;
                self.submit(VfsRequest::QueryInfo(uri));
                Ok(None)
            }
            (State::QueryingStreamInfo | State::QueryingInfo, VfsReply::Info(info)) => {
                info.ensure_regular()?;
                info.apply_to(&mut self.metadata);
                self.state = State::Reading;
                self.request_read()?;
                Ok(None)
            }
            (State::Reading, VfsReply::Data(data)) if data.is_empty() => Ok(self.complete()),
            (State::Reading, VfsReply::Data(data)) => {
                let bytes = self.buffer.append(&data)?;
                self.metadata.bytes_read = bytes;
                self.request_read()?;
                Ok(Some(BackendEvent::Progress {
                    bytes,
                    total: self.metadata.size,
                }))
            }
            (_, VfsReply::Failed(err)) => Err(err),
            (state, reply) => Err(RawError::vfs(
                VfsCode::Generic,
                format!("unexpected reply {:?} while {:?}", reply, state),
            )),
        }
    }

    fn complete(&mut self) -> Option<BackendEvent> {
        self.close_stream();
        self.channel = None;
        self.state = State::Done;
        let content = self.buffer.take();
        if self.metadata.content_type.is_none() {
            let name = self.uri.as_ref().and_then(DocumentUri::file_name);
            let head = &content[..content.len().min(MAX_SNIFF_SIZE)];
            self.metadata.content_type = guess_content_type(name.as_deref(), head);
        }
        tracing::debug!("Async load of {:?} complete: {} bytes", self.uri, content.len());
        Some(BackendEvent::Complete {
            content,
            metadata: self.metadata.clone(),
        })
    }
}

impl Backend for RemoteBackend {
    fn capability(&self) -> Capability {
        Capability::Async
    }

    fn phase(&self) -> BackendPhase {
        match self.state {
            State::Idle => BackendPhase::Idle,
            State::Opening | State::Mounting => BackendPhase::Opening,
            State::QueryingStreamInfo | State::QueryingInfo => BackendPhase::ReadingMetadata,
            State::Reading => BackendPhase::Streaming,
            State::Cancelled | State::Done => BackendPhase::Finished,
        }
    }

    fn load(&mut self, uri: &DocumentUri) -> Result<(), RequestError> {
        if self.state != State::Idle {
            return Err(RequestError::AlreadyUsed);
        }
        tracing::debug!("Opening {} through async VFS", uri);
        self.uri = Some(uri.clone());
        self.channel = Some(mpsc::channel());
        self.state = State::Opening;
        self.submit(VfsRequest::Open(uri.clone()));
        Ok(())
    }

    fn poll(&mut self) -> Option<BackendEvent> {
        match self.state {
            State::Idle | State::Done => return None,
            State::Cancelled => {
                self.state = State::Done;
                return Some(BackendEvent::Failed(RawError::Cancelled));
            }
            _ => {}
        }

        let completion = self.next_completion()?;
        match self.handle(completion.reply) {
            Ok(event) => event,
            Err(err) => self.fail(err),
        }
    }

    fn cancel(&mut self) -> bool {
        match self.state {
            State::Idle | State::Cancelled | State::Done => false,
            _ => {
                tracing::debug!("Cancelling async load of {:?}", self.uri);
                self.teardown();
                self.state = State::Cancelled;
                true
            }
        }
    }

    fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }
}

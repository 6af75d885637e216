//! Document loader
//!
//! A [`DocumentLoader`] drives one backend through one load and decodes the
//! result. It is single-use. The decoded text is handed back in a
//! [`LoadResult`]; committing it to a document is the caller's job, and only
//! happens on success.

use std::time::SystemTime;

use crate::encoding::{to_utf8_with_chain, ConvertError, DetectionChain, Encoding, EncodingRequest};
use crate::error::{ErrorRecord, RequestError};
use crate::transport::{Backend, BackendEvent, BackendPhase, Capability, FileMetadata, VfsRegistry};
use crate::uri::DocumentUri;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub uri: DocumentUri,
    pub encoding: EncodingRequest,
    /// Line to place the cursor on once loaded
    pub cursor_line: Option<usize>,
}

impl LoadRequest {
    pub fn new(uri: DocumentUri) -> Self {
        Self {
            uri,
            encoding: EncodingRequest::Auto,
            cursor_line: None,
        }
    }

    pub fn with_encoding(mut self, encoding: EncodingRequest) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_cursor_line(mut self, line: Option<usize>) -> Self {
        self.cursor_line = line;
        self
    }
}

/// A successfully loaded and decoded document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub text: String,
    pub bytes_read: u64,
    pub encoding: Encoding,
    pub content_type: Option<String>,
    pub mtime: Option<SystemTime>,
    pub size: Option<u64>,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    Opening,
    ReadingMetadata,
    Streaming,
    ConvertingEncoding,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    Progress { bytes: u64, total: Option<u64> },
    Finished(Result<LoadResult, ErrorRecord>),
}

/// Per-load settings that come from outside the request
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub chain: DetectionChain,
    /// Charset of the session locale, used for empty files
    pub locale: Encoding,
    /// Encoding remembered for this uri from an earlier session
    pub metadata_encoding: Option<Encoding>,
    /// Whether the uri scheme permits writing at all
    pub writable_scheme: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            chain: DetectionChain::default(),
            locale: Encoding::current(),
            metadata_encoding: None,
            writable_scheme: true,
        }
    }
}

pub struct DocumentLoader {
    request: LoadRequest,
    options: LoaderOptions,
    backend: Box<dyn Backend>,
    state: LoaderState,
    loaded: Option<(Vec<u8>, FileMetadata)>,
}

impl DocumentLoader {
    pub fn new(request: LoadRequest, backend: Box<dyn Backend>, options: LoaderOptions) -> Self {
        Self {
            request,
            options,
            backend,
            state: LoaderState::Idle,
            loaded: None,
        }
    }

    /// Select the backend for the request's uri and build a loader around it
    pub fn for_request(
        request: LoadRequest,
        registry: &VfsRegistry,
        options: LoaderOptions,
        max_file_size: u64,
    ) -> Result<Self, ErrorRecord> {
        let backend = registry.select_backend(&request.uri, max_file_size)?;
        Ok(Self::new(request, backend, options))
    }

    pub fn request(&self) -> &LoadRequest {
        &self.request
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn capability(&self) -> Capability {
        self.backend.capability()
    }

    /// Start loading. Fails if this loader has been started before.
    pub fn load(&mut self) -> Result<(), RequestError> {
        if self.state != LoaderState::Idle {
            return Err(RequestError::AlreadyUsed);
        }
        tracing::info!("Loading {}", self.request.uri);
        self.backend.load(&self.request.uri)?;
        self.state = LoaderState::Opening;
        Ok(())
    }

    /// Advance one step
    pub fn step(&mut self) -> Option<LoaderEvent> {
        match self.state {
            LoaderState::Idle | LoaderState::Done | LoaderState::Failed => None,
            LoaderState::ConvertingEncoding => Some(self.convert()),
            LoaderState::Opening | LoaderState::ReadingMetadata | LoaderState::Streaming => {
                let event = self.backend.poll();
                self.sync_phase();
                match event? {
                    BackendEvent::Progress { bytes, total } => {
                        Some(LoaderEvent::Progress { bytes, total })
                    }
                    BackendEvent::Complete { content, metadata } => {
                        self.loaded = Some((content, metadata));
                        self.state = LoaderState::ConvertingEncoding;
                        None
                    }
                    BackendEvent::Failed(raw) => {
                        let record = ErrorRecord::from(&raw);
                        if record.is_cancelled() {
                            tracing::debug!("Load of {} cancelled", self.request.uri);
                        } else {
                            tracing::warn!("Load of {} failed: {}", self.request.uri, record);
                        }
                        self.state = LoaderState::Failed;
                        Some(LoaderEvent::Finished(Err(record)))
                    }
                }
            }
        }
    }

    /// Cancel an in-flight load; the next step reports `Cancelled`
    pub fn cancel(&mut self) -> bool {
        match self.state {
            LoaderState::ConvertingEncoding => self.loaded.take().is_some(),
            LoaderState::Opening | LoaderState::ReadingMetadata | LoaderState::Streaming => {
                self.backend.cancel()
            }
            _ => false,
        }
    }

    fn sync_phase(&mut self) {
        self.state = match self.backend.phase() {
            BackendPhase::Opening => LoaderState::Opening,
            BackendPhase::ReadingMetadata => LoaderState::ReadingMetadata,
            BackendPhase::Streaming => LoaderState::Streaming,
            BackendPhase::Idle | BackendPhase::Finished => self.state,
        };
    }

    fn convert(&mut self) -> LoaderEvent {
        let Some((content, metadata)) = self.loaded.take() else {
            self.state = LoaderState::Failed;
            return LoaderEvent::Finished(Err(ErrorRecord::cancelled()));
        };

        match self.decode(&content) {
            Ok((text, encoding)) => {
                tracing::info!(
                    "Loaded {} ({} bytes, {})",
                    self.request.uri,
                    metadata.bytes_read,
                    encoding.charset()
                );
                self.state = LoaderState::Done;
                LoaderEvent::Finished(Ok(LoadResult {
                    text,
                    bytes_read: metadata.bytes_read,
                    encoding,
                    content_type: metadata.content_type,
                    mtime: metadata.mtime,
                    size: metadata.size,
                    read_only: metadata.read_only || !self.options.writable_scheme,
                }))
            }
            Err(err) => {
                tracing::warn!("Could not decode {}: {}", self.request.uri, err);
                self.state = LoaderState::Failed;
                LoaderEvent::Finished(Err(err.into()))
            }
        }
    }

    fn decode(&self, content: &[u8]) -> Result<(String, Encoding), ConvertError> {
        if content.is_empty() {
            let encoding = match self.request.encoding {
                EncodingRequest::Explicit(encoding) => encoding,
                EncodingRequest::Auto => self.options.locale,
            };
            return Ok((String::new(), encoding));
        }

        if self.request.encoding == EncodingRequest::Auto {
            if let Some(remembered) = self.options.metadata_encoding {
                if let Some(text) = remembered.decode(content) {
                    tracing::debug!("Decoded with remembered encoding {}", remembered.charset());
                    return Ok((text, remembered));
                }
            }
        }
        to_utf8_with_chain(content, self.request.encoding, &self.options.chain)
    }
}

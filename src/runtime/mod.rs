//! Session runtime
//!
//! A [`Session`] owns every open document container and executes the
//! commands the update functions return. It is single-threaded and
//! cooperative: each [`Session::tick`] advances every running operation by
//! one bounded step, fires due auto-save timers and polls the file watcher.
//! Callers observe what happened through [`Session::poll_events`].

mod operation;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

use crate::commands::Cmd;
use crate::config::QuillConfig;
use crate::encoding::{Encoding, EncodingRequest};
use crate::error::{ErrorKind, ErrorRecord, RequestError};
use crate::fs_watcher::{DocumentWatcher, DEFAULT_DEBOUNCE};
use crate::loader::{DocumentLoader, LoadRequest, LoaderOptions};
use crate::messages::{DocumentEvent, LifecycleMsg, LoadMsg, Msg, PrintMsg, SaveMsg};
use crate::metadata::{DocumentMetadata, MetadataStore};
use crate::model::{AutoSave, Container, Document, DocumentId, Position, TabState};
use crate::print::PrintJob;
use crate::saver::{DocumentSaver, SaveFlags, SaveOptions, SaveRequest, SaveTarget};
use crate::transport::{MemoryVfs, StdFsVfs, VfsRegistry};
use crate::untitled::UntitledRegistry;
use crate::update::{check_request, update};
use crate::uri::{DocumentUri, FILE_SCHEME};

pub use operation::RunningOp;

/// An event from one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub document: DocumentId,
    pub event: DocumentEvent,
}

pub struct Session {
    config: QuillConfig,
    registry: VfsRegistry,
    metadata: MetadataStore,
    untitled: UntitledRegistry,
    containers: BTreeMap<DocumentId, Container>,
    ops: HashMap<DocumentId, RunningOp>,
    events: VecDeque<SessionEvent>,
    watcher: Option<DocumentWatcher>,
    locale: Encoding,
    next_id: u64,
}

impl Session {
    pub fn new(config: QuillConfig) -> Self {
        let mut registry = VfsRegistry::new();
        for scheme in &config.legacy_vfs_schemes {
            if scheme.eq_ignore_ascii_case(FILE_SCHEME) {
                registry.register_blocking(FILE_SCHEME, Rc::new(StdFsVfs));
            } else {
                tracing::debug!("No built-in blocking VFS for '{}' yet", scheme);
            }
        }
        Self {
            config,
            registry,
            metadata: MetadataStore::in_memory(),
            untitled: UntitledRegistry::new(),
            containers: BTreeMap::new(),
            ops: HashMap::new(),
            events: VecDeque::new(),
            watcher: None,
            locale: Encoding::current(),
            next_id: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataStore) -> Self {
        self.metadata = metadata;
        self
    }

    /// Use `locale` instead of the process locale for detection
    pub fn with_locale(mut self, locale: Encoding) -> Self {
        self.locale = locale;
        self
    }

    pub fn config(&self) -> &QuillConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn registry_mut(&mut self) -> &mut VfsRegistry {
        &mut self.registry
    }

    /// Serve `scheme` from an in-process store.
    ///
    /// Loads go through the asynchronous backend, or the blocking one when the
    /// scheme is configured as legacy. Saves always go through the store.
    pub fn mount_memory(&mut self, scheme: &str, vfs: Rc<MemoryVfs>) {
        if self.config.is_legacy_scheme(scheme) {
            self.registry.register_blocking(scheme, vfs);
        } else {
            self.registry.register_async(scheme, vfs.clone());
            self.registry.register_writer(scheme, vfs);
        }
    }

    /// Watch the backing files of open local documents
    pub fn enable_watcher(&mut self) -> Result<(), notify::Error> {
        let mut watcher = DocumentWatcher::new(DEFAULT_DEBOUNCE)?;
        for container in self.containers.values() {
            if let Some(path) = container.document.uri.as_ref().and_then(|u| u.local_path()) {
                if let Err(e) = watcher.watch(&path) {
                    tracing::debug!("Not watching {}: {}", path.display(), e);
                }
            }
        }
        self.watcher = Some(watcher);
        Ok(())
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Create an empty untitled document
    pub fn new_document(&mut self) -> DocumentId {
        self.next_id += 1;
        let id = DocumentId(self.next_id);
        let mut document = Document::new(id);
        document.untitled_number = Some(self.untitled.allocate());
        let auto_save = AutoSave::new(self.config.auto_save, self.config.auto_save_interval());
        tracing::debug!("Created {} {}", id, document.display_name());
        self.containers.insert(id, Container::new(document, auto_save));
        id
    }

    /// Create a document and start loading `uri` into it
    pub fn open(
        &mut self,
        uri: DocumentUri,
        encoding: EncodingRequest,
        cursor_line: Option<usize>,
    ) -> Result<DocumentId, RequestError> {
        let id = self.new_document();
        self.load(id, uri, encoding, cursor_line)?;
        Ok(id)
    }

    pub fn document(&self, id: DocumentId) -> Option<&Document> {
        self.containers.get(&id).map(|c| &c.document)
    }

    /// Mutable access for editing; does not go through the state machine
    pub fn document_mut(&mut self, id: DocumentId) -> Option<&mut Document> {
        self.containers.get_mut(&id).map(|c| &mut c.document)
    }

    pub fn container(&self, id: DocumentId) -> Option<&Container> {
        self.containers.get(&id)
    }

    pub fn state(&self, id: DocumentId) -> Option<TabState> {
        self.containers.get(&id).map(|c| c.state)
    }

    pub fn documents(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.containers.keys().copied()
    }

    pub fn untitled(&self) -> &UntitledRegistry {
        &self.untitled
    }

    // ========================================================================
    // Requests
    // ========================================================================

    pub fn load(
        &mut self,
        id: DocumentId,
        uri: DocumentUri,
        encoding: EncodingRequest,
        cursor_line: Option<usize>,
    ) -> Result<(), RequestError> {
        let remembered = self.metadata.peek(uri.as_str()).cloned().unwrap_or_default();
        let cursor_line = cursor_line.or(remembered.cursor_position.map(|p| p.line));
        self.dispatch(id, Msg::load(uri, encoding, cursor_line))?;
        if let Some(document) = self.document_mut(id) {
            if document.search.text.is_none() {
                document.search.text = remembered.search_text;
            }
        }
        Ok(())
    }

    pub fn revert(&mut self, id: DocumentId) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Load(LoadMsg::Revert))
    }

    pub fn save(&mut self, id: DocumentId, flags: SaveFlags) -> Result<(), RequestError> {
        self.dispatch(id, Msg::save(flags))
    }

    pub fn save_as(
        &mut self,
        id: DocumentId,
        uri: DocumentUri,
        encoding: Encoding,
        flags: SaveFlags,
    ) -> Result<(), RequestError> {
        self.dispatch(
            id,
            Msg::Save(SaveMsg::SaveAs {
                uri,
                encoding,
                flags,
            }),
        )
    }

    pub fn cancel(&mut self, id: DocumentId) -> Result<(), RequestError> {
        self.dispatch(id, Msg::cancel())
    }

    pub fn retry_load(
        &mut self,
        id: DocumentId,
        encoding: Option<Encoding>,
    ) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Load(LoadMsg::Retry { encoding }))
    }

    pub fn retry_save(
        &mut self,
        id: DocumentId,
        flags: SaveFlags,
        encoding: Option<Encoding>,
    ) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Save(SaveMsg::Retry { flags, encoding }))
    }

    pub fn dismiss_error(&mut self, id: DocumentId) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Lifecycle(LifecycleMsg::DismissError))
    }

    pub fn set_auto_save_enabled(
        &mut self,
        id: DocumentId,
        enabled: bool,
    ) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Lifecycle(LifecycleMsg::SetAutoSave(enabled)))
    }

    pub fn set_auto_save_interval(
        &mut self,
        id: DocumentId,
        interval: Duration,
    ) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Lifecycle(LifecycleMsg::SetAutoSaveInterval(interval)))
    }

    /// Compare the backing file's mtime with the last load or save.
    ///
    /// Meant to run when the document gains focus; the file watcher runs it
    /// too. Locations that cannot be stat'ed synchronously are skipped.
    pub fn check_external_modification(&mut self, id: DocumentId) -> Result<(), RequestError> {
        let container = self
            .containers
            .get(&id)
            .ok_or(RequestError::UnknownDocument(id.0))?;
        let Some(uri) = container.document.uri.clone() else {
            return Ok(());
        };
        let disk_mtime = self.disk_mtime(&uri);
        self.dispatch(
            id,
            Msg::Lifecycle(LifecycleMsg::CheckExternalModification { disk_mtime }),
        )
    }

    pub fn print(&mut self, id: DocumentId) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Print(PrintMsg::Print))
    }

    pub fn print_preview(&mut self, id: DocumentId) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Print(PrintMsg::Preview))
    }

    pub fn close_print_preview(&mut self, id: DocumentId) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Print(PrintMsg::ClosePreview))
    }

    pub fn find(&mut self, id: DocumentId, text: &str) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Lifecycle(LifecycleMsg::Find(text.to_string())))
    }

    /// Mark the document for close and tear it down.
    ///
    /// Does not ask about unsaved changes; check `Container::can_close`
    /// first. Fails with `CannotCloseYet` while an operation is running.
    pub fn close(&mut self, id: DocumentId) -> Result<(), RequestError> {
        self.dispatch(id, Msg::Lifecycle(LifecycleMsg::MarkForClose))
    }

    /// Tear down every document and persist the metadata table
    pub fn shutdown(&mut self) {
        let ids: Vec<DocumentId> = self.containers.keys().copied().collect();
        for id in ids {
            if let Some(mut op) = self.ops.remove(&id) {
                op.cancel();
            }
            self.teardown(id);
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Advance everything by one step. Returns whether any operation is
    /// still running.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.registry.drive();

        let mut running: Vec<DocumentId> = self.ops.keys().copied().collect();
        running.sort();
        for id in running {
            self.step_operation(id, now);
        }

        let due: Vec<DocumentId> = self
            .containers
            .iter()
            .filter(|(_, c)| c.auto_save.is_due(now))
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            self.dispatch_completion(id, Msg::Save(SaveMsg::AutoSaveTimer), now);
        }

        self.poll_watcher();
        !self.ops.is_empty()
    }

    /// Tick until no operation is running
    pub fn run_until_idle(&mut self) {
        while self.tick(Instant::now()) {}
    }

    pub fn is_idle(&self) -> bool {
        self.ops.is_empty()
    }

    /// Earliest pending auto-save, for callers that sleep between ticks
    pub fn next_timer(&self) -> Option<Instant> {
        self.containers
            .values()
            .filter_map(|c| c.auto_save.next_due())
            .min()
    }

    /// Drain the events emitted since the last call
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    fn step_operation(&mut self, id: DocumentId, now: Instant) {
        let Some(op) = self.ops.get_mut(&id) else {
            return;
        };
        let Some((msg, terminal)) = op.step() else {
            return;
        };
        if terminal {
            self.ops.remove(&id);
        }
        self.dispatch_completion(id, msg, now);
    }

    fn poll_watcher(&mut self) {
        let Some(watcher) = &self.watcher else {
            return;
        };
        let changed = watcher.poll_changed();
        if changed.is_empty() {
            return;
        }
        let ids: Vec<DocumentId> = self
            .containers
            .iter()
            .filter(|(_, c)| {
                c.document
                    .uri
                    .as_ref()
                    .and_then(|u| u.local_path())
                    .is_some_and(|p| changed.iter().any(|changed| same_file(changed, &p)))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Err(e) = self.check_external_modification(id) {
                tracing::debug!("External modification check for {} failed: {}", id, e);
            }
        }
    }

    // ========================================================================
    // Dispatch and command execution
    // ========================================================================

    fn dispatch(&mut self, id: DocumentId, msg: Msg) -> Result<(), RequestError> {
        let container = self
            .containers
            .get(&id)
            .ok_or(RequestError::UnknownDocument(id.0))?;
        check_request(container, &msg)?;
        self.dispatch_completion(id, msg, Instant::now());
        Ok(())
    }

    /// Run `msg` through the update function and execute the result
    fn dispatch_completion(&mut self, id: DocumentId, msg: Msg, now: Instant) {
        let Some(container) = self.containers.get_mut(&id) else {
            return;
        };
        if let Some(cmd) = update(container, msg, now) {
            self.run_cmd(id, cmd, now);
        }
        self.after_update(id);
    }

    fn run_cmd(&mut self, id: DocumentId, cmd: Cmd, now: Instant) {
        match cmd {
            Cmd::None => {}
            Cmd::Batch(cmds) => {
                for cmd in cmds {
                    self.run_cmd(id, cmd, now);
                }
            }
            Cmd::Emit(event) => self.events.push_back(SessionEvent {
                document: id,
                event,
            }),
            Cmd::StartLoad(request) => self.start_load(id, request, now),
            Cmd::StartSave(request) => self.start_save(id, request, now),
            Cmd::StartPrint { preview } => {
                let Some(container) = self.containers.get(&id) else {
                    return;
                };
                let job = PrintJob::new(&container.document, self.config.lines_per_page, preview);
                tracing::debug!("Printing {} pages of {}", job.page_count(), id);
                self.ops.insert(id, RunningOp::Print(job));
            }
            Cmd::CancelOperation => match self.ops.get_mut(&id) {
                Some(op) => {
                    if !op.cancel() {
                        tracing::debug!("The {} of {} is past cancelling", op.name(), id);
                    }
                }
                None => tracing::debug!("Nothing to cancel for {}", id),
            },
        }
    }

    fn start_load(&mut self, id: DocumentId, request: LoadRequest, now: Instant) {
        let metadata_encoding = self
            .metadata
            .get(request.uri.as_str())
            .and_then(|m| m.encoding)
            .and_then(|charset| Encoding::from_charset(&charset));
        let options = LoaderOptions {
            chain: self.config.detection_chain(self.locale),
            locale: self.locale,
            metadata_encoding,
            writable_scheme: self.config.is_writable_scheme(request.uri.scheme()),
        };

        let started = DocumentLoader::for_request(
            request,
            &self.registry,
            options,
            self.config.max_file_size,
        )
        .and_then(|mut loader| {
            loader.load().map_err(|e| ErrorRecord::new(ErrorKind::Generic, e.to_string()))?;
            Ok(loader)
        });
        match started {
            Ok(loader) => {
                self.ops.insert(id, RunningOp::Load(loader));
            }
            Err(err) => self.dispatch_completion(id, Msg::Load(LoadMsg::Finished(Err(err))), now),
        }
    }

    fn start_save(&mut self, id: DocumentId, request: SaveRequest, now: Instant) {
        let Some(container) = self.containers.get(&id) else {
            return;
        };
        let document = &container.document;
        // Only the file the document was loaded from has a stamp to compare
        let known_mtime = if document.uri.as_ref() == Some(&request.uri) {
            document.mtime
        } else {
            None
        };
        let options = SaveOptions {
            create_backup: self.config.create_backup_copy,
            backup_extension: self.config.backup_extension.clone(),
            known_mtime,
        };
        let content = document.to_bytes();

        let started = SaveTarget::resolve(&request.uri, &self.registry).and_then(|target| {
            let mut saver = DocumentSaver::new(request, content, options, target);
            saver
                .save()
                .map_err(|e| ErrorRecord::new(ErrorKind::Generic, e.to_string()))?;
            Ok(saver)
        });
        match started {
            Ok(saver) => {
                self.ops.insert(id, RunningOp::Save(saver));
            }
            Err(err) => self.dispatch_completion(id, Msg::Save(SaveMsg::Finished(Err(err))), now),
        }
    }

    /// Bookkeeping that follows every update
    fn after_update(&mut self, id: DocumentId) {
        let Some(container) = self.containers.get_mut(&id) else {
            return;
        };
        if container.state == TabState::Closing {
            self.teardown(id);
            return;
        }

        let document = &mut container.document;
        let Some(uri) = &document.uri else {
            return;
        };
        if let Some(n) = document.untitled_number.take() {
            self.untitled.release(n);
        }
        if let (Some(watcher), Some(path)) = (self.watcher.as_mut(), uri.local_path()) {
            if !watcher.is_watching(&path) {
                if let Err(e) = watcher.watch(&path) {
                    tracing::debug!("Not watching {}: {}", path.display(), e);
                }
            }
        }
    }

    fn teardown(&mut self, id: DocumentId) {
        if let Some(mut op) = self.ops.remove(&id) {
            op.cancel();
        }
        let Some(container) = self.containers.remove(&id) else {
            return;
        };
        let document = container.document;
        if let Some(n) = document.untitled_number {
            self.untitled.release(n);
        }

        if let Some(uri) = &document.uri {
            self.metadata.set(
                uri.as_str(),
                DocumentMetadata {
                    encoding: Some(document.encoding.charset().to_string()),
                    search_text: document.search.text.clone(),
                    cursor_position: Some(Position {
                        line: document.cursor.line,
                        column: document.cursor.column,
                    }),
                    language: document.language.clone(),
                },
            );
            if let Err(e) = self.metadata.save() {
                tracing::warn!("Failed to save document metadata: {}", e);
            }
            if let (Some(watcher), Some(path)) = (self.watcher.as_mut(), uri.local_path()) {
                watcher.unwatch(&path);
            }
        }

        tracing::info!("Closed {} {}", id, document.display_name());
        self.events.push_back(SessionEvent {
            document: id,
            event: DocumentEvent::Closed,
        });
    }

    fn disk_mtime(&self, uri: &DocumentUri) -> Option<SystemTime> {
        if let Some(path) = uri.local_path() {
            return std::fs::metadata(path).and_then(|m| m.modified()).ok();
        }
        let vfs = self.registry.writer(uri.scheme())?;
        vfs.query_info(uri).ok().and_then(|info| info.mtime)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.containers.is_empty() {
            self.shutdown();
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::messages::Operation;
    use std::fs;
    use tempfile::tempdir;

    fn session() -> Session {
        Session::new(QuillConfig::default()).with_locale(Encoding::UTF_8)
    }

    fn events_of(session: &mut Session, id: DocumentId) -> Vec<DocumentEvent> {
        session
            .poll_events()
            .into_iter()
            .filter(|e| e.document == id)
            .map(|e| e.event)
            .collect()
    }

    #[test]
    fn test_open_local_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, "hello\nworld\n").unwrap();

        let mut session = session();
        let id = session
            .open(DocumentUri::from_path(&path), EncodingRequest::Auto, None)
            .unwrap();
        assert_eq!(session.state(id), Some(TabState::Loading));
        session.run_until_idle();

        assert_eq!(session.state(id), Some(TabState::Normal));
        let doc = session.document(id).unwrap();
        assert_eq!(doc.text(), "hello\nworld");
        assert_eq!(doc.encoding, Encoding::UTF_8);
        assert_eq!(doc.untitled_number, None);
        assert_eq!(session.untitled().in_use(), 0);

        let events = events_of(&mut session, id);
        assert!(events.contains(&DocumentEvent::Loaded(None)));
    }

    #[test]
    fn test_missing_file_then_dismiss_closes() {
        let dir = tempdir().unwrap();
        let mut session = session();
        let id = session
            .open(
                DocumentUri::from_path(&dir.path().join("missing.txt")),
                EncodingRequest::Auto,
                None,
            )
            .unwrap();
        session.run_until_idle();

        assert_eq!(session.state(id), Some(TabState::LoadingError));
        let err = session.container(id).unwrap().error.clone().unwrap();
        assert_eq!(err.kind, ErrorKind::NotFound);

        session.dismiss_error(id).unwrap();
        assert!(session.document(id).is_none());
        assert!(events_of(&mut session, id).contains(&DocumentEvent::Closed));
    }

    #[test]
    fn test_unsupported_scheme_fails_load() {
        let mut session = session();
        let id = session
            .open(
                DocumentUri::parse("gopher://host/file").unwrap(),
                EncodingRequest::Auto,
                None,
            )
            .unwrap();
        assert!(session.is_idle());
        let err = session.container(id).unwrap().error.clone().unwrap();
        assert_eq!(err.kind, ErrorKind::NotSupportedScheme);
    }

    #[test]
    fn test_cancelled_open_removes_document() {
        let vfs = Rc::new(MemoryVfs::new());
        vfs.insert("/big.txt", &vec![b'a'; 100_000]);
        let mut session = session();
        session.mount_memory("mem", vfs);

        let id = session
            .open(
                DocumentUri::parse("mem://host/big.txt").unwrap(),
                EncodingRequest::Auto,
                None,
            )
            .unwrap();
        for _ in 0..6 {
            session.tick(Instant::now());
        }
        session.cancel(id).unwrap();
        session.run_until_idle();

        assert!(session.document(id).is_none());
        let events = events_of(&mut session, id);
        assert!(events.contains(&DocumentEvent::Cancelled(Operation::Load)));
        assert!(!events.iter().any(|e| matches!(e, DocumentEvent::Loaded(_))));
    }

    #[test]
    fn test_close_writes_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "alpha\nbeta\ngamma\n").unwrap();
        let uri = DocumentUri::from_path(&path);

        let mut session = session();
        let id = session.open(uri.clone(), EncodingRequest::Auto, Some(2)).unwrap();
        session.run_until_idle();
        session.find(id, "beta").unwrap();
        session.close(id).unwrap();

        let stored = session.metadata().peek(uri.as_str()).unwrap();
        assert_eq!(stored.encoding.as_deref(), Some("UTF-8"));
        assert_eq!(stored.search_text.as_deref(), Some("beta"));
        assert_eq!(stored.language.as_deref(), Some("markdown"));
        assert_eq!(stored.cursor_position.map(|p| p.line), Some(1));
    }

    #[test]
    fn test_close_rejected_while_loading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "a").unwrap();
        let mut session = session();
        let id = session
            .open(DocumentUri::from_path(&path), EncodingRequest::Auto, None)
            .unwrap();
        assert_eq!(
            session.close(id),
            Err(RequestError::CannotCloseYet(TabState::Loading))
        );
        session.run_until_idle();
        assert!(session.close(id).is_ok());
    }

    #[test]
    fn test_untitled_numbers_are_reused() {
        let mut session = session();
        let a = session.new_document();
        let b = session.new_document();
        assert_eq!(session.document(b).unwrap().display_name(), "Untitled 2");
        session.close(a).unwrap();
        let c = session.new_document();
        assert_eq!(session.document(c).unwrap().display_name(), "Untitled 1");
    }

    #[test]
    fn test_unknown_document() {
        let mut session = session();
        assert_eq!(
            session.revert(DocumentId(99)),
            Err(RequestError::UnknownDocument(99))
        );
    }
}

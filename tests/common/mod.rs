//! Shared test helpers for integration tests
//!
//! Note: Functions may appear unused because each test file compiles separately.

#![allow(dead_code)]

use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use quill::config::QuillConfig;
use quill::encoding::{Encoding, EncodingRequest};
use quill::messages::DocumentEvent;
use quill::model::DocumentId;
use quill::runtime::Session;
use quill::transport::MemoryVfs;
use quill::uri::DocumentUri;

/// Session with default config and a UTF-8 locale
pub fn test_session() -> Session {
    Session::new(QuillConfig::default()).with_locale(Encoding::UTF_8)
}

pub fn session_with(config: QuillConfig) -> Session {
    Session::new(config).with_locale(Encoding::UTF_8)
}

/// Session with a `mem://` store mounted
pub fn memory_session(config: QuillConfig) -> (Session, Rc<MemoryVfs>) {
    let vfs = Rc::new(MemoryVfs::new());
    let mut session = session_with(config);
    session.mount_memory("mem", Rc::clone(&vfs));
    (session, vfs)
}

pub fn mem_uri(path: &str) -> DocumentUri {
    DocumentUri::parse(&format!("mem://host{}", path)).unwrap()
}

/// Write `bytes` to `dir/name` and return its uri
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> DocumentUri {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    DocumentUri::from_path(&path)
}

/// Open `uri` with detection and run the session until the load finishes
pub fn open_and_wait(session: &mut Session, uri: &DocumentUri) -> DocumentId {
    open_with(session, uri, EncodingRequest::Auto)
}

pub fn open_with(session: &mut Session, uri: &DocumentUri, encoding: EncodingRequest) -> DocumentId {
    let id = session.open(uri.clone(), encoding, None).unwrap();
    session.run_until_idle();
    id
}

/// Tick with a fixed time until no operation runs
pub fn run_at(session: &mut Session, now: Instant) {
    while session.tick(now) {}
}

/// Drain the session's events for one document
pub fn events_for(session: &mut Session, id: DocumentId) -> Vec<DocumentEvent> {
    session
        .poll_events()
        .into_iter()
        .filter(|e| e.document == id)
        .map(|e| e.event)
        .collect()
}

pub fn count_saved(events: &[DocumentEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, DocumentEvent::Saved(_)))
        .count()
}

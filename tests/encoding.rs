//! Encoding catalog and conversion tests
//!
//! Exercises detection through whole loads as well as the converter itself.

mod common;

use common::*;
use quill::config::QuillConfig;
use quill::encoding::{
    from_utf8, to_utf8, to_utf8_with_chain, ConvertError, DetectionChain, Encoding,
    EncodingRequest,
};
use quill::error::ErrorKind;
use quill::model::TabState;
use quill::runtime::Session;
use tempfile::tempdir;

fn enc(name: &str) -> Encoding {
    Encoding::from_charset(name).unwrap()
}

// ========================================================================
// Converter
// ========================================================================

#[test]
fn test_catalog_names_resolve_to_themselves() {
    for encoding in Encoding::all() {
        assert_eq!(Encoding::from_charset(encoding.charset()), Some(encoding));
    }
}

#[test]
fn test_latin1_detected_after_utf8_fails() {
    let chain = DetectionChain::with_locale(&["UTF-8", "ISO-8859-15"], Encoding::UTF_8);
    let (text, detected) =
        to_utf8_with_chain(b"caf\xe9 cr\xe8me", EncodingRequest::Auto, &chain).unwrap();
    assert_eq!(text, "café crème");
    assert_eq!(detected, enc("ISO-8859-15"));
}

#[test]
fn test_explicit_utf16() {
    let bytes = from_utf8("héllo", enc("UTF-16LE")).unwrap();
    assert_eq!(bytes.len(), 10);
    let (text, encoding) = to_utf8(&bytes, EncodingRequest::Explicit(enc("UTF-16LE"))).unwrap();
    assert_eq!(text, "héllo");
    assert_eq!(encoding.charset(), "UTF-16LE");
}

#[test]
fn test_chain_of_strict_encodings_can_fail() {
    let chain = DetectionChain::with_locale(&["UTF-8"], Encoding::UTF_8);
    assert_eq!(
        to_utf8_with_chain(b"\xff\xfe\xfd", EncodingRequest::Auto, &chain),
        Err(ConvertError::AutoDetectFailed)
    );
}

#[test]
fn test_shift_jis_unmappable_text() {
    assert!(from_utf8("😀", enc("SHIFT_JIS")).is_err());
    assert!(from_utf8("日本語", enc("SHIFT_JIS")).is_ok());
}

#[test]
fn test_config_chain_puts_legacy_locale_first() {
    let config = QuillConfig::default();
    let chain = config.detection_chain(enc("KOI8-R"));
    assert_eq!(chain.candidates()[0], enc("KOI8-R"));
    assert!(chain.candidates().contains(&Encoding::UTF_8));
}

// ========================================================================
// Detection through loads
// ========================================================================

#[test]
fn test_load_detects_latin1() {
    let dir = tempdir().unwrap();
    let uri = write_file(dir.path(), "latin.txt", b"na\xefve\n");
    let mut session = test_session();
    let id = open_and_wait(&mut session, &uri);

    let doc = session.document(id).unwrap();
    assert_eq!(doc.text(), "naïve");
    assert_eq!(doc.encoding, enc("ISO-8859-15"));
}

#[test]
fn test_load_with_strict_chain_fails_detection() {
    let dir = tempdir().unwrap();
    let uri = write_file(dir.path(), "binary.dat", b"\xff\xfe\xfd\xfc");
    let config = QuillConfig {
        auto_detected_encodings: vec!["UTF-8".to_string()],
        ..QuillConfig::default()
    };
    let mut session = session_with(config);
    let id = open_and_wait(&mut session, &uri);

    assert_eq!(session.state(id), Some(TabState::LoadingError));
    let err = session.container(id).unwrap().error.clone().unwrap();
    assert_eq!(err.kind, ErrorKind::AutoDetectFailed);
}

#[test]
fn test_retry_load_with_explicit_encoding() {
    let dir = tempdir().unwrap();
    let uri = write_file(dir.path(), "cyr.txt", b"\xf0\xd2\xc9\xd7\xc5\xd4");
    let config = QuillConfig {
        auto_detected_encodings: vec!["UTF-8".to_string()],
        ..QuillConfig::default()
    };
    let mut session = session_with(config);
    let id = open_and_wait(&mut session, &uri);
    assert_eq!(session.state(id), Some(TabState::LoadingError));

    session.retry_load(id, Some(enc("KOI8-R"))).unwrap();
    session.run_until_idle();

    assert_eq!(session.state(id), Some(TabState::Normal));
    let doc = session.document(id).unwrap();
    assert_eq!(doc.text(), "Привет");
    assert_eq!(doc.encoding, enc("KOI8-R"));
}

#[test]
fn test_empty_file_takes_session_locale() {
    let dir = tempdir().unwrap();
    let uri = write_file(dir.path(), "empty.txt", b"");
    let mut session = Session::new(QuillConfig::default()).with_locale(enc("KOI8-R"));
    let id = open_and_wait(&mut session, &uri);

    assert_eq!(session.state(id), Some(TabState::Normal));
    let doc = session.document(id).unwrap();
    assert_eq!(doc.text(), "");
    assert_eq!(doc.encoding, enc("KOI8-R"));
}

#[test]
fn test_explicit_encoding_mismatch_is_illegal_sequence() {
    let dir = tempdir().unwrap();
    let uri = write_file(dir.path(), "odd.txt", b"abc");
    let mut session = test_session();
    let id = open_with(&mut session, &uri, EncodingRequest::Explicit(enc("UTF-16LE")));

    let err = session.container(id).unwrap().error.clone().unwrap();
    assert_eq!(err.kind, ErrorKind::IllegalSequence);
}

#[test]
fn test_remembered_encoding_is_used_on_reopen() {
    let dir = tempdir().unwrap();
    // Valid UTF-8, but last opened as Latin-1
    let uri = write_file(dir.path(), "mojibake.txt", "é".as_bytes());
    let mut session = test_session();

    let id = open_with(&mut session, &uri, EncodingRequest::Explicit(enc("ISO-8859-1")));
    assert_eq!(session.document(id).unwrap().text(), "Ã©");
    session.close(id).unwrap();

    let id = open_and_wait(&mut session, &uri);
    assert_eq!(session.document(id).unwrap().text(), "Ã©");
}

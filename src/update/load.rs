//! Load and revert handlers

use std::time::Instant;

use super::transition;
use crate::commands::Cmd;
use crate::encoding::EncodingRequest;
use crate::error::ErrorRecord;
use crate::loader::{LoadRequest, LoadResult};
use crate::messages::{DocumentEvent, LoadMsg, Operation};
use crate::model::{Container, Document, Progress, TabState};

pub fn update_load(container: &mut Container, msg: LoadMsg, now: Instant) -> Option<Cmd> {
    match msg {
        LoadMsg::Load {
            uri,
            encoding,
            cursor_line,
        } => {
            let request = LoadRequest::new(uri)
                .with_encoding(encoding)
                .with_cursor_line(cursor_line);
            Some(start(container, TabState::Loading, request, now))
        }

        LoadMsg::Revert => {
            let document = &container.document;
            let uri = document.uri.clone()?;
            let request = LoadRequest::new(uri)
                .with_encoding(EncodingRequest::Explicit(document.encoding))
                .with_cursor_line(Some(document.cursor.line));
            Some(start(container, TabState::Reverting, request, now))
        }

        LoadMsg::Retry { encoding } => {
            let mut request = container.last_load.clone()?;
            if let Some(encoding) = encoding {
                request.encoding = EncodingRequest::Explicit(encoding);
            }
            let to = if container.state == TabState::RevertingError {
                TabState::Reverting
            } else {
                TabState::Loading
            };
            Some(start(container, to, request, now))
        }

        LoadMsg::Progress { bytes, total } => {
            if !matches!(container.state, TabState::Loading | TabState::Reverting) {
                return None;
            }
            container.progress = Some(Progress { bytes, total });
            Some(Cmd::Emit(DocumentEvent::Loading { bytes, total }))
        }

        LoadMsg::Finished(result) => finish(container, result, now),
    }
}

fn start(container: &mut Container, to: TabState, request: LoadRequest, now: Instant) -> Cmd {
    container.last_load = Some(request.clone());
    container.acknowledged_mtime = None;
    container.external_mtime = None;
    transition(container, to, now).and(Cmd::StartLoad(request))
}

fn finish(
    container: &mut Container,
    result: Result<LoadResult, ErrorRecord>,
    now: Instant,
) -> Option<Cmd> {
    let reverting = match container.state {
        TabState::Loading => false,
        TabState::Reverting => true,
        state => {
            tracing::debug!("Dropping load completion in {:?}", state);
            return None;
        }
    };

    match result {
        Ok(loaded) => {
            let request = container.last_load.clone()?;
            commit(&mut container.document, &request, loaded);
            Some(transition(container, TabState::Normal, now).and(Cmd::Emit(DocumentEvent::Loaded(None))))
        }
        Err(err) if err.is_cancelled() => {
            // A cancelled first load leaves nothing to show, so the tab goes away
            let (to, operation) = if reverting {
                (TabState::Normal, Operation::Revert)
            } else {
                (TabState::Closing, Operation::Load)
            };
            Some(transition(container, to, now).and(Cmd::Emit(DocumentEvent::Cancelled(operation))))
        }
        Err(err) => {
            let to = if reverting {
                TabState::RevertingError
            } else {
                TabState::LoadingError
            };
            container.error = Some(err.clone());
            Some(transition(container, to, now).and(Cmd::Emit(DocumentEvent::Loaded(Some(err)))))
        }
    }
}

/// Replace the document's contents and file state with a finished load
fn commit(document: &mut Document, request: &LoadRequest, loaded: LoadResult) {
    document.replace_contents(&loaded.text);
    if document.uri.as_ref() != Some(&request.uri) {
        document.set_uri(request.uri.clone());
    }
    document.encoding = loaded.encoding;
    document.mtime = loaded.mtime;
    document.size = loaded.size.or(Some(loaded.bytes_read));
    document.read_only = loaded.read_only;
    document.content_type = loaded.content_type;
    if let Some(line) = request.cursor_line {
        document.set_cursor_line(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;
    use crate::error::ErrorKind;
    use crate::messages::Msg;
    use crate::model::{AutoSave, DocumentId};
    use crate::update::update;
    use crate::uri::DocumentUri;
    use std::time::{Duration, SystemTime};

    fn container() -> Container {
        Container::new(
            Document::new(DocumentId(7)),
            AutoSave::new(true, Duration::from_secs(60)),
        )
    }

    fn loaded(text: &str) -> LoadResult {
        LoadResult {
            text: text.to_string(),
            bytes_read: text.len() as u64,
            encoding: Encoding::UTF_8,
            content_type: Some("text/plain".to_string()),
            mtime: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(5)),
            size: Some(text.len() as u64),
            read_only: false,
        }
    }

    fn start_load(c: &mut Container, now: Instant) -> Option<Cmd> {
        let uri = DocumentUri::parse("/tmp/notes.txt").unwrap();
        update(c, Msg::load(uri, EncodingRequest::Auto, Some(1)), now)
    }

    #[test]
    fn test_load_success_commits_and_arms_auto_save() {
        let now = Instant::now();
        let mut c = container();
        let cmd = start_load(&mut c, now).unwrap();
        assert_eq!(c.state, TabState::Loading);
        assert!(matches!(&cmd, Cmd::Batch(cmds) if matches!(cmds[1], Cmd::StartLoad(_))));

        let cmd = update(&mut c, Msg::Load(LoadMsg::Finished(Ok(loaded("a\nb\n")))), now).unwrap();
        assert_eq!(c.state, TabState::Normal);
        assert_eq!(c.document.text(), "a\nb");
        assert_eq!(c.document.cursor.line, 1);
        assert_eq!(c.document.language, None);
        assert_eq!(c.document.display_name(), "notes.txt");
        assert!(c.auto_save.is_armed());
        assert_eq!(
            cmd.events(),
            vec![
                &DocumentEvent::StateChanged {
                    from: TabState::Loading,
                    to: TabState::Normal
                },
                &DocumentEvent::Loaded(None)
            ]
        );
    }

    #[test]
    fn test_load_failure_enters_error_state() {
        let now = Instant::now();
        let mut c = container();
        start_load(&mut c, now);
        let err = ErrorRecord::new(ErrorKind::NotFound, "gone");
        update(&mut c, Msg::Load(LoadMsg::Finished(Err(err.clone()))), now);
        assert_eq!(c.state, TabState::LoadingError);
        assert_eq!(c.error, Some(err));
        assert!(c.document.is_untitled());
        assert!(c.can_close());
    }

    #[test]
    fn test_cancelled_load_closes() {
        let now = Instant::now();
        let mut c = container();
        start_load(&mut c, now);
        let cmd = update(
            &mut c,
            Msg::Load(LoadMsg::Finished(Err(ErrorRecord::cancelled()))),
            now,
        )
        .unwrap();
        assert_eq!(c.state, TabState::Closing);
        assert_eq!(c.error, None);
        assert!(cmd
            .events()
            .contains(&&DocumentEvent::Cancelled(Operation::Load)));
    }

    #[test]
    fn test_retry_with_explicit_encoding() {
        let now = Instant::now();
        let mut c = container();
        start_load(&mut c, now);
        let err = ErrorRecord::new(ErrorKind::AutoDetectFailed, "no match");
        update(&mut c, Msg::Load(LoadMsg::Finished(Err(err))), now);

        let latin = Encoding::from_charset("ISO-8859-15").unwrap();
        let cmd = update(
            &mut c,
            Msg::Load(LoadMsg::Retry {
                encoding: Some(latin),
            }),
            now,
        )
        .unwrap();
        assert_eq!(c.state, TabState::Loading);
        assert_eq!(c.error, None);
        match cmd {
            Cmd::Batch(cmds) => match &cmds[1] {
                Cmd::StartLoad(request) => {
                    assert_eq!(request.encoding, EncodingRequest::Explicit(latin))
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_revert_uses_current_encoding() {
        let now = Instant::now();
        let mut c = container();
        start_load(&mut c, now);
        update(&mut c, Msg::Load(LoadMsg::Finished(Ok(loaded("x\n")))), now);

        let cmd = update(&mut c, Msg::Load(LoadMsg::Revert), now).unwrap();
        assert_eq!(c.state, TabState::Reverting);
        assert!(!c.auto_save.is_armed());
        assert!(matches!(&cmd, Cmd::Batch(cmds)
            if matches!(&cmds[1], Cmd::StartLoad(r) if r.encoding == EncodingRequest::Explicit(Encoding::UTF_8))));

        let err = ErrorRecord::new(ErrorKind::AccessDenied, "denied");
        update(&mut c, Msg::Load(LoadMsg::Finished(Err(err))), now);
        assert_eq!(c.state, TabState::RevertingError);
        assert_eq!(c.document.text(), "x");
    }

    #[test]
    fn test_progress_ignored_when_not_loading() {
        let mut c = container();
        let cmd = update(
            &mut c,
            Msg::Load(LoadMsg::Progress {
                bytes: 10,
                total: None,
            }),
            Instant::now(),
        );
        assert_eq!(cmd, None);
        assert_eq!(c.progress, None);
    }
}

//! Save, save-as and auto-save handlers

use std::time::Instant;

use super::{arm_auto_save, transition};
use crate::commands::Cmd;
use crate::error::ErrorRecord;
use crate::messages::{DocumentEvent, Operation, SaveMsg};
use crate::model::{Container, Progress, TabState, AUTO_SAVE_RETRY_DELAY};
use crate::saver::{SaveFlags, SaveRequest, SaveResult};

pub fn update_save(container: &mut Container, msg: SaveMsg, now: Instant) -> Option<Cmd> {
    match msg {
        SaveMsg::Save { flags } => {
            let document = &container.document;
            let request = SaveRequest {
                uri: document.uri.clone()?,
                encoding: document.encoding,
                flags,
            };
            Some(start(container, request, now))
        }

        SaveMsg::SaveAs {
            uri,
            encoding,
            flags,
        } => Some(start(
            container,
            SaveRequest {
                uri,
                encoding,
                flags,
            },
            now,
        )),

        SaveMsg::Retry { flags, encoding } => {
            let mut request = container.last_save.clone()?;
            request.flags = merge_flags(request.flags, flags);
            if let Some(encoding) = encoding {
                request.encoding = encoding;
            }
            Some(start(container, request, now))
        }

        SaveMsg::Progress { bytes, total } => {
            if container.state != TabState::Saving {
                return None;
            }
            container.progress = Some(Progress { bytes, total });
            Some(Cmd::Emit(DocumentEvent::Saving { bytes, total }))
        }

        SaveMsg::Finished(result) => finish(container, result, now),

        SaveMsg::AutoSaveTimer => auto_save_due(container, now),
    }
}

fn merge_flags(a: SaveFlags, b: SaveFlags) -> SaveFlags {
    SaveFlags {
        ignore_backup: a.ignore_backup || b.ignore_backup,
        ignore_mtime: a.ignore_mtime || b.ignore_mtime,
        preserve_backup: a.preserve_backup || b.preserve_backup,
    }
}

fn start(container: &mut Container, request: SaveRequest, now: Instant) -> Cmd {
    container.save_revision = Some(container.document.revision);
    container.last_save = Some(request.clone());
    transition(container, TabState::Saving, now).and(Cmd::StartSave(request))
}

fn finish(
    container: &mut Container,
    result: Result<SaveResult, ErrorRecord>,
    now: Instant,
) -> Option<Cmd> {
    if container.state != TabState::Saving {
        tracing::debug!("Dropping save completion in {:?}", container.state);
        return None;
    }
    let auto_save = std::mem::take(&mut container.auto_save.in_progress);
    let revision = container.save_revision.take();

    match result {
        Ok(saved) => {
            let request = container.last_save.clone()?;
            let document = &mut container.document;
            if document.uri.as_ref() != Some(&request.uri) {
                document.set_uri(request.uri);
            }
            document.encoding = saved.encoding;
            document.mtime = saved.mtime;
            document.size = saved.size.or(Some(saved.bytes_written));
            if saved.content_type.is_some() {
                document.content_type = saved.content_type;
            }
            document.read_only = false;
            // Edits made while the save ran are still unsaved
            document.is_modified = revision != Some(document.revision);
            container.acknowledged_mtime = None;
            Some(transition(container, TabState::Normal, now).and(Cmd::Emit(DocumentEvent::Saved(None))))
        }
        Err(err) if err.is_cancelled() => {
            Some(transition(container, TabState::Normal, now).and(Cmd::Emit(DocumentEvent::Cancelled(Operation::Save))))
        }
        Err(err) if auto_save => {
            tracing::warn!(
                "Auto-save of {} failed, will try again: {}",
                container.document.display_name(),
                err
            );
            Some(transition(container, TabState::Normal, now))
        }
        Err(err) => {
            container.error = Some(err.clone());
            Some(transition(container, TabState::SavingError, now).and(Cmd::Emit(DocumentEvent::Saved(Some(err)))))
        }
    }
}

/// The auto-save timer came due
fn auto_save_due(container: &mut Container, now: Instant) -> Option<Cmd> {
    container.auto_save.deadline = None;
    container.auto_save.retry_at = None;
    if !container.auto_save.enabled {
        return None;
    }

    if container.state != TabState::Normal {
        let retry_at = now + AUTO_SAVE_RETRY_DELAY;
        container.auto_save.retry_at = Some(retry_at);
        tracing::debug!(
            "Auto-save of {} deferred while {:?}",
            container.document.display_name(),
            container.state
        );
        return None;
    }

    let document = &container.document;
    if !container.auto_save_eligible() || !document.is_modified {
        arm_auto_save(container, now);
        return None;
    }

    let request = SaveRequest {
        uri: document.uri.clone()?,
        encoding: document.encoding,
        flags: SaveFlags::default().preserving_backup(),
    };
    tracing::info!("Auto-saving {}", document.display_name());
    container.auto_save.in_progress = true;
    Some(start(container, request, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;
    use crate::error::ErrorKind;
    use crate::messages::{LifecycleMsg, Msg};
    use crate::model::{AutoSave, Document, DocumentId};
    use crate::update::update;
    use crate::uri::DocumentUri;
    use std::time::{Duration, SystemTime};

    const INTERVAL: Duration = Duration::from_secs(60);

    fn named(now: Instant) -> Container {
        let mut document = Document::with_text(DocumentId(3), "hello");
        document.set_uri(DocumentUri::parse("/tmp/hello.txt").unwrap());
        let mut c = Container::new(document, AutoSave::new(true, INTERVAL));
        arm_auto_save(&mut c, now);
        c
    }

    fn saved() -> SaveResult {
        SaveResult {
            bytes_written: 6,
            encoding: Encoding::UTF_8,
            mtime: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(9)),
            size: Some(6),
            content_type: None,
        }
    }

    fn start_request(cmd: &Cmd) -> Option<&SaveRequest> {
        match cmd {
            Cmd::StartSave(request) => Some(request),
            Cmd::Batch(cmds) => cmds.iter().find_map(start_request),
            _ => None,
        }
    }

    #[test]
    fn test_save_round_trip_through_states() {
        let now = Instant::now();
        let mut c = named(now);
        c.document.insert_text(5, "!");

        let cmd = update(&mut c, Msg::save(SaveFlags::default()), now).unwrap();
        assert_eq!(c.state, TabState::Saving);
        assert!(!c.auto_save.is_armed());
        assert_eq!(start_request(&cmd).unwrap().flags, SaveFlags::default());

        update(&mut c, Msg::Save(SaveMsg::Finished(Ok(saved()))), now);
        assert_eq!(c.state, TabState::Normal);
        assert!(!c.document.is_modified);
        assert_eq!(c.document.size, Some(6));
        assert!(c.auto_save.is_armed());
    }

    #[test]
    fn test_edit_during_save_stays_modified() {
        let now = Instant::now();
        let mut c = named(now);
        c.document.insert_text(0, "a");
        update(&mut c, Msg::save(SaveFlags::default()), now);
        c.document.insert_text(0, "b");
        update(&mut c, Msg::Save(SaveMsg::Finished(Ok(saved()))), now);
        assert!(c.document.is_modified);
    }

    #[test]
    fn test_externally_modified_then_retry_ignoring_mtime() {
        let now = Instant::now();
        let mut c = named(now);
        update(&mut c, Msg::save(SaveFlags::default()), now);
        let err = ErrorRecord::new(ErrorKind::ExternallyModified, "changed on disk");
        let cmd = update(&mut c, Msg::Save(SaveMsg::Finished(Err(err.clone()))), now).unwrap();
        assert_eq!(c.state, TabState::SavingError);
        assert!(cmd.events().contains(&&DocumentEvent::Saved(Some(err))));

        let cmd = update(
            &mut c,
            Msg::Save(SaveMsg::Retry {
                flags: SaveFlags::default().ignoring_mtime(),
                encoding: None,
            }),
            now,
        )
        .unwrap();
        assert_eq!(c.state, TabState::Saving);
        assert!(start_request(&cmd).unwrap().flags.ignore_mtime);
    }

    #[test]
    fn test_save_as_adopts_new_uri() {
        let now = Instant::now();
        let mut c = Container::new(Document::with_text(DocumentId(4), "x"), AutoSave::default());
        let uri = DocumentUri::parse("/tmp/new.rs").unwrap();
        update(
            &mut c,
            Msg::Save(SaveMsg::SaveAs {
                uri: uri.clone(),
                encoding: Encoding::UTF_8,
                flags: SaveFlags::default(),
            }),
            now,
        );
        update(&mut c, Msg::Save(SaveMsg::Finished(Ok(saved()))), now);
        assert_eq!(c.document.uri, Some(uri));
        assert_eq!(c.document.language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_cancelled_save_returns_to_normal() {
        let now = Instant::now();
        let mut c = named(now);
        update(&mut c, Msg::save(SaveFlags::default()), now);
        let cmd = update(
            &mut c,
            Msg::Save(SaveMsg::Finished(Err(ErrorRecord::cancelled()))),
            now,
        )
        .unwrap();
        assert_eq!(c.state, TabState::Normal);
        assert_eq!(c.error, None);
        assert!(cmd.events().contains(&&DocumentEvent::Cancelled(Operation::Save)));
    }

    #[test]
    fn test_auto_save_fires_with_preserve_backup() {
        let now = Instant::now();
        let mut c = named(now);
        c.document.insert_text(0, "x");

        let later = now + INTERVAL;
        let cmd = update(&mut c, Msg::Save(SaveMsg::AutoSaveTimer), later).unwrap();
        assert_eq!(c.state, TabState::Saving);
        assert!(c.auto_save.in_progress);
        assert!(start_request(&cmd).unwrap().flags.preserve_backup);
    }

    #[test]
    fn test_auto_save_failure_is_swallowed_and_rearmed() {
        let now = Instant::now();
        let mut c = named(now);
        c.document.insert_text(0, "x");
        update(&mut c, Msg::Save(SaveMsg::AutoSaveTimer), now);

        let err = ErrorRecord::new(ErrorKind::AccessDenied, "denied");
        let cmd = update(&mut c, Msg::Save(SaveMsg::Finished(Err(err))), now).unwrap();
        assert_eq!(c.state, TabState::Normal);
        assert_eq!(c.error, None);
        assert!(!cmd
            .events()
            .iter()
            .any(|e| matches!(e, DocumentEvent::Saved(_))));
        assert_eq!(c.auto_save.deadline, Some(now + INTERVAL));
        assert!(c.document.is_modified);
    }

    #[test]
    fn test_auto_save_unmodified_just_rearms() {
        let now = Instant::now();
        let mut c = named(now);
        let later = now + INTERVAL;
        assert_eq!(update(&mut c, Msg::Save(SaveMsg::AutoSaveTimer), later), None);
        assert_eq!(c.state, TabState::Normal);
        assert_eq!(c.auto_save.deadline, Some(later + INTERVAL));
    }

    #[test]
    fn test_auto_save_deferred_while_busy() {
        let now = Instant::now();
        let mut c = named(now);
        c.document.insert_text(0, "x");
        update(&mut c, Msg::Print(crate::messages::PrintMsg::Print), now);
        assert_eq!(c.state, TabState::Printing);

        assert_eq!(update(&mut c, Msg::Save(SaveMsg::AutoSaveTimer), now), None);
        assert_eq!(c.auto_save.retry_at, Some(now + AUTO_SAVE_RETRY_DELAY));
        assert!(!c.auto_save.is_armed());

        // Once back in Normal the deferred attempt goes through
        update(&mut c, Msg::Lifecycle(LifecycleMsg::Cancel), now);
        update(
            &mut c,
            Msg::Print(crate::messages::PrintMsg::Finished(Err(ErrorRecord::cancelled()))),
            now,
        );
        assert_eq!(c.state, TabState::Normal);
        let retry = now + AUTO_SAVE_RETRY_DELAY;
        assert!(c.auto_save.is_due(retry));
        update(&mut c, Msg::Save(SaveMsg::AutoSaveTimer), retry);
        assert_eq!(c.state, TabState::Saving);
        assert_eq!(c.auto_save.retry_at, None);
    }
}

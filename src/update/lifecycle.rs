//! Cancellation, error dismissal, external modification, close and settings

use std::time::Instant;

use super::{arm_auto_save, transition};
use crate::commands::Cmd;
use crate::messages::{DocumentEvent, LifecycleMsg};
use crate::model::{Container, TabState};

pub fn update_lifecycle(container: &mut Container, msg: LifecycleMsg, now: Instant) -> Option<Cmd> {
    match msg {
        // The state changes when the operation reports its cancellation
        LifecycleMsg::Cancel => Some(Cmd::CancelOperation),

        LifecycleMsg::DismissError => {
            let to = match container.state {
                // Nothing was loaded, so the tab has nothing left to show
                TabState::LoadingError => TabState::Closing,
                TabState::ExternallyModifiedNotification => {
                    container.acknowledged_mtime = container.external_mtime.take();
                    TabState::Normal
                }
                _ => TabState::Normal,
            };
            Some(transition(container, to, now))
        }

        LifecycleMsg::CheckExternalModification { disk_mtime } => {
            if container.state != TabState::Normal {
                return None;
            }
            let document = &container.document;
            let (Some(known), Some(disk)) = (document.mtime, disk_mtime) else {
                return None;
            };
            if document.is_untitled() || disk == known || Some(disk) == container.acknowledged_mtime
            {
                return None;
            }
            tracing::info!("{} changed on disk", document.display_name());
            container.external_mtime = Some(disk);
            Some(
                transition(container, TabState::ExternallyModifiedNotification, now)
                    .and(Cmd::Emit(DocumentEvent::ExternallyModified)),
            )
        }

        LifecycleMsg::MarkForClose => Some(transition(container, TabState::Closing, now)),

        LifecycleMsg::SetAutoSave(enabled) => {
            container.auto_save.enabled = enabled;
            if !enabled {
                container.auto_save.deadline = None;
                container.auto_save.retry_at = None;
            } else if container.state == TabState::Normal {
                arm_auto_save(container, now);
            }
            None
        }

        LifecycleMsg::SetAutoSaveInterval(interval) => {
            container.auto_save.interval = interval;
            if container.auto_save.deadline.is_some() {
                container.auto_save.deadline = Some(now + interval);
            }
            None
        }

        LifecycleMsg::Find(text) => {
            container.document.find(&text);
            Some(Cmd::Emit(DocumentEvent::CanFindAgain(
                container.document.can_find_again(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Msg;
    use crate::model::{AutoSave, Document, DocumentId};
    use crate::update::update;
    use crate::uri::DocumentUri;
    use std::time::{Duration, SystemTime};

    fn named() -> Container {
        let mut document = Document::with_text(DocumentId(2), "one two one");
        document.set_uri(DocumentUri::parse("/tmp/two.txt").unwrap());
        document.mtime = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(100));
        Container::new(document, AutoSave::new(true, Duration::from_secs(60)))
    }

    fn check(c: &mut Container, secs: u64) -> Option<Cmd> {
        update(
            c,
            Msg::Lifecycle(LifecycleMsg::CheckExternalModification {
                disk_mtime: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
            }),
            Instant::now(),
        )
    }

    #[test]
    fn test_external_change_is_noticed_once_dismissed() {
        let mut c = named();
        assert_eq!(check(&mut c, 100), None);

        let cmd = check(&mut c, 200).unwrap();
        assert_eq!(c.state, TabState::ExternallyModifiedNotification);
        assert!(cmd.events().contains(&&DocumentEvent::ExternallyModified));

        update(&mut c, Msg::Lifecycle(LifecycleMsg::DismissError), Instant::now());
        assert_eq!(c.state, TabState::Normal);
        // Same disk mtime again: already acknowledged
        assert_eq!(check(&mut c, 200), None);
        assert!(check(&mut c, 300).is_some());
    }

    #[test]
    fn test_revert_resolves_external_change() {
        let mut c = named();
        check(&mut c, 200);
        update(&mut c, Msg::Load(crate::messages::LoadMsg::Revert), Instant::now());
        assert_eq!(c.state, TabState::Reverting);
    }

    #[test]
    fn test_find_emits_once() {
        let mut c = named();
        let cmd = update(
            &mut c,
            Msg::Lifecycle(LifecycleMsg::Find("one".to_string())),
            Instant::now(),
        )
        .unwrap();
        assert_eq!(cmd.events(), vec![&DocumentEvent::CanFindAgain(true)]);
        assert_eq!(c.document.search.last_match, Some((8, 11)));
    }

    #[test]
    fn test_mark_for_close() {
        let mut c = named();
        update(&mut c, Msg::Lifecycle(LifecycleMsg::MarkForClose), Instant::now());
        assert_eq!(c.state, TabState::Closing);
        assert!(!c.auto_save.is_armed());
    }

    #[test]
    fn test_dismiss_loading_error_closes() {
        let mut c = named();
        c.state = TabState::LoadingError;
        c.error = Some(crate::error::ErrorRecord::new(
            crate::error::ErrorKind::NotFound,
            "gone",
        ));
        update(&mut c, Msg::Lifecycle(LifecycleMsg::DismissError), Instant::now());
        assert_eq!(c.state, TabState::Closing);
        assert_eq!(c.error, None);
    }

    #[test]
    fn test_toggle_auto_save() {
        let now = Instant::now();
        let mut c = named();
        update(&mut c, Msg::Lifecycle(LifecycleMsg::SetAutoSave(true)), now);
        assert_eq!(c.auto_save.deadline, Some(now + Duration::from_secs(60)));

        update(
            &mut c,
            Msg::Lifecycle(LifecycleMsg::SetAutoSaveInterval(Duration::from_secs(5))),
            now,
        );
        assert_eq!(c.auto_save.deadline, Some(now + Duration::from_secs(5)));

        update(&mut c, Msg::Lifecycle(LifecycleMsg::SetAutoSave(false)), now);
        assert!(!c.auto_save.is_armed());
    }
}

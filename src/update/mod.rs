//! Update functions for the Elm-style architecture
//!
//! All state transitions of a document container flow through [`update`].
//! Requests are validated against the current [`TabState`] first; the
//! runtime calls [`check_request`] itself so it can report the rejection to
//! its caller.

mod lifecycle;
mod load;
mod print;
mod save;

use std::time::Instant;

use crate::commands::Cmd;
use crate::error::RequestError;
use crate::messages::{DocumentEvent, LifecycleMsg, LoadMsg, Msg, PrintMsg, SaveMsg};
use crate::model::{Container, TabState};

#[cfg(debug_assertions)]
use tracing::{debug, span, Level};

pub use lifecycle::update_lifecycle;
pub use load::update_load;
pub use print::update_print;
pub use save::update_save;

/// Main update function - dispatches to sub-handlers
///
/// In debug builds, this wraps with tracing instrumentation.
/// In release builds, it's a direct dispatch with zero overhead.
#[inline]
pub fn update(container: &mut Container, msg: Msg, now: Instant) -> Option<Cmd> {
    #[cfg(debug_assertions)]
    {
        update_traced(container, msg, now)
    }
    #[cfg(not(debug_assertions))]
    {
        update_inner(container, msg, now)
    }
}

/// Inner update logic (no tracing)
fn update_inner(container: &mut Container, msg: Msg, now: Instant) -> Option<Cmd> {
    if let Err(err) = check_request(container, &msg) {
        tracing::warn!("Ignoring request for {}: {}", container.document.display_name(), err);
        return None;
    }
    match msg {
        Msg::Load(m) => load::update_load(container, m, now),
        Msg::Save(m) => save::update_save(container, m, now),
        Msg::Print(m) => print::update_print(container, m, now),
        Msg::Lifecycle(m) => lifecycle::update_lifecycle(container, m, now),
    }
}

#[cfg(debug_assertions)]
fn update_traced(container: &mut Container, msg: Msg, now: Instant) -> Option<Cmd> {
    let msg_name = msg_type_name(&msg);
    let _span = span!(Level::DEBUG, "update", doc = %container.document.id, msg = %msg_name)
        .entered();
    debug!(target: "message", msg = %msg_name, state = ?container.state, "processing");

    let before = crate::tracing::DocumentSnapshot::from_container(container);
    let result = update_inner(container, msg, now);
    let after = crate::tracing::DocumentSnapshot::from_container(container);
    if let Some(diff) = before.diff(&after) {
        debug!(target: "document", "{}", diff);
    }

    check_invariants(container, &msg_name);
    result
}

/// State and side data that disagree, one line per broken invariant
#[cfg(any(debug_assertions, test))]
fn invariant_violations(container: &Container) -> Vec<String> {
    let mut violations = Vec::new();
    if container.state != TabState::Normal && container.auto_save.is_armed() {
        violations.push(format!("auto-save armed in {:?}", container.state));
    }
    if container.state.is_error() != container.error.is_some() {
        violations.push(format!("error record out of sync with {:?}", container.state));
    }
    violations
}

#[cfg(debug_assertions)]
fn check_invariants(container: &Container, context: &str) {
    for violation in invariant_violations(container) {
        tracing::error!(
            target: "document",
            doc = %container.document.id,
            "{} after {}",
            violation,
            context
        );
    }
}

/// Get a display name for a message
///
/// Uses Debug formatting, except for completions whose payload would dump
/// the whole document.
#[cfg(debug_assertions)]
fn msg_type_name(msg: &Msg) -> String {
    match msg {
        Msg::Load(LoadMsg::Finished(result)) => {
            format!("Load::Finished({})", outcome(result.as_ref().err()))
        }
        Msg::Save(SaveMsg::Finished(result)) => {
            format!("Save::Finished({})", outcome(result.as_ref().err()))
        }
        Msg::Load(m) => format!("Load::{:?}", m),
        Msg::Save(m) => format!("Save::{:?}", m),
        Msg::Print(m) => format!("Print::{:?}", m),
        Msg::Lifecycle(m) => format!("Lifecycle::{:?}", m),
    }
}

#[cfg(debug_assertions)]
fn outcome(err: Option<&crate::error::ErrorRecord>) -> String {
    match err {
        None => "ok".to_string(),
        Some(err) => format!("{:?}", err.kind),
    }
}

/// Check whether `msg` may be handled in the container's current state.
///
/// Completions and settings are always accepted; requests that would start
/// or change an operation are only accepted in the states listed in the
/// lifecycle table.
pub fn check_request(container: &Container, msg: &Msg) -> Result<(), RequestError> {
    use TabState::*;

    let state = container.state;
    let document = &container.document;
    let require = |request: &'static str, allowed: &[TabState]| {
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(RequestError::InvalidState { request, state })
        }
    };

    match msg {
        Msg::Load(LoadMsg::Load { .. }) => require("load", &[Normal]),
        Msg::Load(LoadMsg::Revert) => {
            require("revert", &[Normal, ExternallyModifiedNotification])?;
            if document.is_untitled() {
                return Err(RequestError::Untitled);
            }
            Ok(())
        }
        Msg::Load(LoadMsg::Retry { .. }) => {
            if matches!(state, LoadingError | RevertingError) && container.last_load.is_some() {
                Ok(())
            } else {
                Err(RequestError::NothingToRetry)
            }
        }
        Msg::Save(SaveMsg::Save { .. }) => {
            require("save", &[Normal])?;
            if document.is_untitled() {
                return Err(RequestError::Untitled);
            }
            if document.read_only {
                return Err(RequestError::ReadOnly);
            }
            Ok(())
        }
        Msg::Save(SaveMsg::SaveAs { .. }) => require("save", &[Normal]),
        Msg::Save(SaveMsg::Retry { .. }) => {
            if state == SavingError && container.last_save.is_some() {
                Ok(())
            } else {
                Err(RequestError::NothingToRetry)
            }
        }
        Msg::Print(PrintMsg::Print | PrintMsg::Preview) => require("print", &[Normal]),
        Msg::Print(PrintMsg::ClosePreview) => require("close the preview", &[ShowingPrintPreview]),
        Msg::Lifecycle(LifecycleMsg::Cancel) => {
            if state.is_in_flight() {
                Ok(())
            } else {
                Err(RequestError::InvalidState {
                    request: "cancel",
                    state,
                })
            }
        }
        Msg::Lifecycle(LifecycleMsg::DismissError) => {
            if state.is_error() || state == ExternallyModifiedNotification {
                Ok(())
            } else {
                Err(RequestError::InvalidState {
                    request: "dismiss",
                    state,
                })
            }
        }
        Msg::Lifecycle(LifecycleMsg::MarkForClose) => {
            if state.accepts_close() {
                Ok(())
            } else if state.is_in_flight() {
                Err(RequestError::CannotCloseYet(state))
            } else {
                Err(RequestError::InvalidState {
                    request: "close",
                    state,
                })
            }
        }
        _ => Ok(()),
    }
}

/// Move the container to `to`, arming or disarming auto-save.
///
/// The timer is armed on entering Normal for an eligible document and
/// disarmed in every other state. Returns the `StateChanged` event, or
/// nothing when the state did not change.
pub(crate) fn transition(container: &mut Container, to: TabState, now: Instant) -> Cmd {
    let from = container.state;
    container.state = to;
    if !to.is_error() {
        container.error = None;
    }
    if !to.is_in_flight() {
        container.progress = None;
    }

    if to == TabState::Normal {
        arm_auto_save(container, now);
    } else if container.auto_save.deadline.take().is_some() {
        tracing::debug!("Auto-save disarmed for {}", container.document.display_name());
    }

    if from == to {
        return Cmd::None;
    }
    tracing::info!(
        "{} {}: {:?} -> {:?}",
        container.document.id,
        container.document.display_name(),
        from,
        to
    );
    Cmd::Emit(DocumentEvent::StateChanged { from, to })
}

/// Arm the timer if the document qualifies and it is not armed already
pub(crate) fn arm_auto_save(container: &mut Container, now: Instant) {
    if !container.auto_save_eligible() {
        container.auto_save.deadline = None;
        return;
    }
    if container.auto_save.deadline.is_none() {
        let deadline = now + container.auto_save.interval;
        container.auto_save.deadline = Some(deadline);
        tracing::debug!(
            "Auto-save armed for {} in {:?}",
            container.document.display_name(),
            container.auto_save.interval
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodingRequest;
    use crate::model::{AutoSave, Document, DocumentId};
    use crate::saver::SaveFlags;
    use crate::uri::DocumentUri;
    use std::time::Duration;

    fn container() -> Container {
        Container::new(
            Document::new(DocumentId(1)),
            AutoSave::new(true, Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_save_untitled_is_rejected() {
        let c = container();
        assert_eq!(
            check_request(&c, &Msg::save(SaveFlags::default())),
            Err(RequestError::Untitled)
        );
    }

    #[test]
    fn test_requests_rejected_outside_normal() {
        let mut c = container();
        c.state = TabState::Saving;
        let load = Msg::load(
            DocumentUri::parse("/tmp/a").unwrap(),
            EncodingRequest::Auto,
            None,
        );
        assert!(matches!(
            check_request(&c, &load),
            Err(RequestError::InvalidState {
                request: "load",
                state: TabState::Saving
            })
        ));
        assert_eq!(
            check_request(&c, &Msg::Lifecycle(LifecycleMsg::MarkForClose)),
            Err(RequestError::CannotCloseYet(TabState::Saving))
        );
        assert!(check_request(&c, &Msg::cancel()).is_ok());
    }

    #[test]
    fn test_cancel_needs_an_operation() {
        let c = container();
        assert!(check_request(&c, &Msg::cancel()).is_err());
    }

    #[test]
    fn test_rejected_request_changes_nothing() {
        let mut c = container();
        c.state = TabState::Loading;
        let cmd = update(&mut c, Msg::save(SaveFlags::default()), Instant::now());
        assert_eq!(cmd, None);
        assert_eq!(c.state, TabState::Loading);
    }

    #[test]
    fn test_transition_arms_only_in_normal() {
        let now = Instant::now();
        let mut c = container();
        c.document.set_uri(DocumentUri::parse("/tmp/a.txt").unwrap());

        transition(&mut c, TabState::Normal, now);
        assert_eq!(c.auto_save.deadline, Some(now + Duration::from_secs(60)));

        let cmd = transition(&mut c, TabState::Saving, now);
        assert!(!c.auto_save.is_armed());
        assert_eq!(
            cmd,
            Cmd::Emit(DocumentEvent::StateChanged {
                from: TabState::Normal,
                to: TabState::Saving
            })
        );
    }

    #[test]
    fn test_same_state_transition_is_silent() {
        let mut c = container();
        assert_eq!(transition(&mut c, TabState::Normal, Instant::now()), Cmd::None);
    }

    #[test]
    fn test_transitions_keep_invariants() {
        let now = Instant::now();
        let mut c = container();
        c.document.set_uri(DocumentUri::parse("/tmp/a.txt").unwrap());
        transition(&mut c, TabState::Normal, now);
        assert!(invariant_violations(&c).is_empty());
        transition(&mut c, TabState::Saving, now);
        assert!(invariant_violations(&c).is_empty());
    }

    #[test]
    fn test_broken_invariants_are_logged_not_fatal() {
        let now = Instant::now();
        let mut c = container();
        c.state = TabState::SavingError;
        c.auto_save.deadline = Some(now);

        let violations = invariant_violations(&c);
        assert_eq!(violations.len(), 2);
        assert!(violations[0].contains("auto-save armed"));
        assert!(violations[1].contains("error record"));

        // A rejected request still runs the checks
        assert_eq!(update(&mut c, Msg::save(SaveFlags::default()), now), None);
        assert_eq!(c.state, TabState::SavingError);
    }
}

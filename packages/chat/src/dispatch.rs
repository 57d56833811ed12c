//! Event fan-out to registered callbacks.
//!
//! For one decoded event the invocation order is fixed: the kind-specific
//! list, then the mention list when a chat message names the authenticated
//! user, then the any-message list. Failures are collected and replayed as
//! handler-error events only after the whole chain ran, so one failing
//! callback never starves the ones behind it.

use crate::client::ClientHandle;
use crate::event::{Event, EventKind};
use crate::handler::Handlers;

/// Whether `text` contains `nick` as a standalone token, case-insensitively.
/// Nicks embedded in longer words do not count.
pub(crate) fn is_mention(text: &str, nick: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|token| token.eq_ignore_ascii_case(nick))
}

fn invoke_list(
    handlers: &mut Handlers,
    kind: EventKind,
    handle: &ClientHandle,
    event: &Event,
    failures: &mut Vec<(EventKind, String)>,
) {
    let Some(callbacks) = handlers.callbacks_mut(kind) else {
        return;
    };
    for callback in callbacks.iter_mut() {
        if let Err(e) = callback(handle, event) {
            failures.push((kind, e.to_string()));
        }
    }
}

/// Dispatch one decoded event through the full chain.
pub(crate) fn dispatch(
    handlers: &mut Handlers,
    handle: &ClientHandle,
    event: &Event,
    own_nick: Option<&str>,
) {
    let mut failures = Vec::new();

    invoke_list(handlers, event.kind(), handle, event, &mut failures);

    if let Event::ChatMessage { text, .. } = event
        && let Some(nick) = own_nick
        && is_mention(text, nick)
    {
        invoke_list(handlers, EventKind::Mention, handle, event, &mut failures);
    }

    invoke_list(handlers, EventKind::AnyMessage, handle, event, &mut failures);

    for (kind, detail) in failures {
        report_handler_failure(handlers, handle, Some(kind), detail);
    }
}

/// Dispatch a lifecycle event (socket error/closed) to its kind list only;
/// the any-message list is reserved for decoded wire events.
pub(crate) fn dispatch_lifecycle(handlers: &mut Handlers, handle: &ClientHandle, event: &Event) {
    let mut failures = Vec::new();
    invoke_list(handlers, event.kind(), handle, event, &mut failures);
    for (kind, detail) in failures {
        report_handler_failure(handlers, handle, Some(kind), detail);
    }
}

/// Turn one callback failure (or decode failure, with `source` `None`) into a
/// handler-error event. Failures raised by handler-error callbacks themselves
/// are logged and dropped so the loop always makes progress.
pub(crate) fn report_handler_failure(
    handlers: &mut Handlers,
    handle: &ClientHandle,
    source: Option<EventKind>,
    detail: String,
) {
    match source {
        Some(kind) => tracing::warn!(%kind, "handler failed: {}", detail),
        None => tracing::warn!("failed to decode frame: {}", detail),
    }

    let event = Event::HandlerError { source, detail };
    let Some(callbacks) = handlers.callbacks_mut(EventKind::HandlerError) else {
        return;
    };
    for callback in callbacks.iter_mut() {
        if let Err(e) = callback(handle, &event) {
            tracing::warn!("handler-error callback failed: {}", e);
        }
    }
}

//! The background session task: one read/write loop per connection.
//!
//! The session owns the transport and the handler table for its lifetime, so
//! callbacks run strictly sequentially and never need locking. Outbound
//! payloads arrive over a channel after the throttle already authorized them;
//! the loop only writes them out.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::ApiAccess;
use crate::client::{ClientHandle, ConnectionState, Shared};
use crate::dispatch;
use crate::error::ApiError;
use crate::event::{ErrorCode, Event};
use crate::handler::Handlers;
use crate::transport::{ChatTransport, Connector};
use crate::wire;

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// `disconnect` was called; never reconnect.
    UserRequested,
    /// The server closed the socket cleanly.
    RemoteClosed,
    /// The socket failed mid-session.
    Failed,
}

pub(crate) struct Session {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    api: Arc<dyn ApiAccess>,
    handlers: Handlers,
}

impl Session {
    pub(crate) fn new(
        shared: Arc<Shared>,
        connector: Arc<dyn Connector>,
        api: Arc<dyn ApiAccess>,
        handlers: Handlers,
    ) -> Self {
        Self {
            shared,
            connector,
            api,
            handlers,
        }
    }

    /// Run the session to completion, reconnecting on connection loss when
    /// configured. On exit the handler table goes back to the client and the
    /// state settles on disconnected.
    ///
    /// `state_rx` must have been subscribed before the connected state was
    /// published, so a disconnect issued right after `connect` returns is
    /// never missed.
    pub(crate) async fn run(
        mut self,
        mut transport: Box<dyn ChatTransport>,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut state_rx: tokio::sync::watch::Receiver<ConnectionState>,
    ) {
        let handle = ClientHandle::from_shared(self.shared.clone());

        if *state_rx.borrow() != ConnectionState::Closing {
            self.replay_backlog(&handle).await;
        }

        let mut reconnects_remaining = self.shared.config.reconnect_attempts;
        'session: loop {
            let end = self
                .drive(&mut transport, &mut outbound, &mut state_rx, &handle)
                .await;
            transport.close().await;
            dispatch::dispatch_lifecycle(&mut self.handlers, &handle, &Event::SocketClosed);

            if end != SessionEnd::UserRequested {
                while reconnects_remaining > 0 {
                    reconnects_remaining -= 1;

                    // Only a session that is still nominally connected may
                    // reconnect; a disconnect raced in otherwise.
                    let resumed = self.shared.state.send_if_modified(|state| {
                        if *state == ConnectionState::Connected {
                            *state = ConnectionState::Connecting;
                            true
                        } else {
                            false
                        }
                    });
                    if !resumed {
                        break;
                    }

                    let delay = self.shared.config.reconnect_delay;
                    tracing::info!(?delay, "reconnecting after connection loss");
                    tokio::time::sleep(delay).await;
                    if *self.shared.state.borrow() == ConnectionState::Closing {
                        break;
                    }

                    match self.connector.open(&self.shared.config.auth).await {
                        Ok(mut reopened) => {
                            let resumed = self.shared.state.send_if_modified(|state| {
                                if *state == ConnectionState::Connecting {
                                    *state = ConnectionState::Connected;
                                    true
                                } else {
                                    false
                                }
                            });
                            if !resumed {
                                reopened.close().await;
                                break;
                            }
                            transport = reopened;
                            continue 'session;
                        }
                        Err(e) => tracing::warn!("reconnect attempt failed: {}", e),
                    }
                }
            }
            break;
        }

        *self.shared.lock(&self.shared.outbound) = None;
        *self.shared.lock(&self.shared.handlers) = Some(self.handlers);
        self.shared
            .state
            .send_modify(|state| *state = ConnectionState::Disconnected);
        tracing::info!("session ended");
    }

    async fn drive(
        &mut self,
        transport: &mut Box<dyn ChatTransport>,
        outbound: &mut mpsc::UnboundedReceiver<String>,
        state_rx: &mut tokio::sync::watch::Receiver<ConnectionState>,
        handle: &ClientHandle,
    ) -> SessionEnd {
        loop {
            // A close request may predate this loop (or even the task's first
            // poll); `changed()` alone would sleep through it.
            if *state_rx.borrow_and_update() == ConnectionState::Closing {
                return SessionEnd::UserRequested;
            }

            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err()
                        || *state_rx.borrow_and_update() == ConnectionState::Closing
                    {
                        return SessionEnd::UserRequested;
                    }
                }
                Some(payload) = outbound.recv() => {
                    tracing::debug!("sending payload: `{}`", payload);
                    if let Err(e) = transport.send(&payload).await {
                        tracing::error!("websocket send failed: {}", e);
                        self.emit_socket_error(handle, e.to_string());
                        return SessionEnd::Failed;
                    }
                }
                frame = transport.next_frame() => match frame {
                    Ok(Some(raw)) => self.handle_frame(handle, &raw).await,
                    Ok(None) => {
                        tracing::info!("connection closed by server");
                        return SessionEnd::RemoteClosed;
                    }
                    Err(e) => {
                        tracing::error!("websocket error: {}", e);
                        self.emit_socket_error(handle, e.to_string());
                        return SessionEnd::Failed;
                    }
                }
            }
        }
    }

    fn emit_socket_error(&mut self, handle: &ClientHandle, detail: String) {
        dispatch::dispatch_lifecycle(&mut self.handlers, handle, &Event::SocketError { detail });
    }

    /// Decode and dispatch one raw frame. A frame that fails to decode is
    /// reported to handler-error callbacks and otherwise skipped; it never
    /// tears the session down.
    async fn handle_frame(&mut self, handle: &ClientHandle, raw: &str) {
        tracing::debug!("received frame: `{}`", raw);
        let event = match wire::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                dispatch::report_handler_failure(&mut self.handlers, handle, None, e.to_string());
                return;
            }
        };
        self.observe(&event).await;

        let own_nick = self.shared.own_nick();
        dispatch::dispatch(&mut self.handlers, handle, &event, own_nick.as_deref());
    }

    /// Side effects an inbound event has on client state, before handlers see
    /// it: reply-target tracking, mark-as-read, and remote throttle feedback.
    async fn observe(&mut self, event: &Event) {
        match event {
            Event::Whisper { user, .. } => {
                self.shared.throttle.note_whisper_received(&user.nick);
                if self.shared.config.mark_whispers_as_read && self.shared.config.auth.has_session()
                {
                    // Fetching the inbox is what marks it read server-side.
                    if let Err(e) = self.api.inbox(&user.nick, 1).await {
                        tracing::warn!(
                            "could not mark whispers from {} as read: {}",
                            user.nick,
                            e
                        );
                    }
                }
            }
            Event::ErrorMessage { code, .. } => match code {
                ErrorCode::Throttled => self.shared.throttle.note_remote_throttled(),
                ErrorCode::Duplicate => self.shared.throttle.note_remote_duplicate(),
                _ => {}
            },
            _ => {}
        }
    }

    /// Replay backlog through handlers before live traffic: unread whispers
    /// first, then recent chat history. Both are best effort.
    async fn replay_backlog(&mut self, handle: &ClientHandle) {
        if self.shared.config.handle_unread_whispers && self.shared.config.auth.has_session() {
            match Self::unread_whisper_events(self.api.as_ref()).await {
                Ok(events) => {
                    tracing::info!(count = events.len(), "replaying unread whispers");
                    let own_nick = self.shared.own_nick();
                    for event in &events {
                        dispatch::dispatch(&mut self.handlers, handle, event, own_nick.as_deref());
                    }
                }
                Err(e) => tracing::warn!("could not replay unread whispers: {}", e),
            }
        }

        if self.shared.config.handle_history {
            match self.api.chat_history().await {
                Ok(frames) => {
                    tracing::info!(count = frames.len(), "replaying chat history");
                    for raw in frames {
                        self.handle_frame(handle, &raw).await;
                    }
                }
                Err(e) => tracing::warn!("could not replay chat history: {}", e),
            }
        }
    }

    // An associated fn on purpose: a `&Session` held across these awaits
    // would demand `Session: Sync`, which the boxed handler callbacks rule
    // out; the task only needs the API to be spawnable.
    async fn unread_whisper_events(api: &dyn ApiAccess) -> Result<Vec<Event>, ApiError> {
        let counts = api.unread_counts().await?;
        let mut events = Vec::new();
        for (user, count) in counts {
            for message in api.inbox(&user, count).await? {
                events.push(message.as_whisper_event());
            }
        }
        events.sort_by_key(|event| match event {
            Event::Whisper { timestamp, .. } => *timestamp,
            _ => 0,
        });
        Ok(events)
    }
}

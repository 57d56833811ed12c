//! Outbound throttling and capability gating.
//!
//! Every send is authorized here before it touches the transport: capability
//! checks first (auth, opt-in chat sending, reply-only whispers), then the
//! per-channel throttle window. The server's own throttle is roughly 300 ms
//! between messages; staying behind that window locally avoids remote
//! `throttled` errors in the first place. When the server still reports
//! `throttled` or `duplicate`, the minimum interval is scaled up by an
//! escalating factor that decays back after a long enough idle period.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::ChatConfig;
use crate::error::SendError;
use crate::time::Clock;

/// Maximum accepted message length, matching the service limit.
pub const MAX_MESSAGE_LENGTH: usize = 512;

/// Default minimum interval between chat sends (the server-side window).
pub const DEFAULT_CHAT_INTERVAL: Duration = Duration::from_millis(300);

/// Default minimum interval between whisper sends to one target.
pub const DEFAULT_WHISPER_INTERVAL: Duration = Duration::from_millis(300);

// Throttling should be exceptional, so the base factor carries a bit of
// padding instead of starting at 1.
const BASE_THROTTLE_FACTOR: f64 = 1.1;

// The server caps its backoff around 16x; mirror that.
const MAX_THROTTLE_FACTOR: f64 = 16.0;

// After this much idle time since the last accepted send, the factor resets.
const THROTTLE_RESET: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct FactorState {
    factor: f64,
    last_accepted: Option<i64>,
}

/// Guards outbound sends for one client session.
///
/// Whisper state is per target: the reply-only policy tracks which nicks have
/// whispered first this session, and each target gets its own throttle window.
pub struct ThrottleGuard {
    clock: Arc<dyn Clock>,
    chat_interval_ms: i64,
    whisper_interval_ms: i64,
    authenticated: bool,
    enable_chat_sending: bool,
    enable_whisper_to_anyone: bool,
    chat_last_send: Mutex<Option<i64>>,
    whisper_last_send: Mutex<HashMap<String, i64>>,
    reply_targets: Mutex<HashSet<String>>,
    factor: Mutex<FactorState>,
}

impl ThrottleGuard {
    pub(crate) fn new(config: &ChatConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            chat_interval_ms: config.chat_interval.as_millis() as i64,
            whisper_interval_ms: config.whisper_interval.as_millis() as i64,
            authenticated: config.auth.can_authenticate(),
            enable_chat_sending: config.enable_chat_sending,
            enable_whisper_to_anyone: config.enable_whisper_to_anyone,
            chat_last_send: Mutex::new(None),
            whisper_last_send: Mutex::new(HashMap::new()),
            reply_targets: Mutex::new(HashSet::new()),
            factor: Mutex::new(FactorState {
                factor: BASE_THROTTLE_FACTOR,
                last_accepted: None,
            }),
        }
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().expect("throttle state lock poisoned")
    }

    /// Validate message content against the service length limit.
    pub fn validate_message(&self, text: &str) -> Result<(), SendError> {
        let len = text.chars().count();
        if len == 0 || len > MAX_MESSAGE_LENGTH {
            return Err(SendError::InvalidMessage);
        }
        Ok(())
    }

    /// The current escalation factor applied to the minimum intervals.
    pub fn throttle_factor(&self) -> f64 {
        self.lock(&self.factor).factor
    }

    fn effective_interval(&self, base_ms: i64, now: i64) -> i64 {
        let mut state = self.lock(&self.factor);
        if let Some(last) = state.last_accepted
            && now - last >= THROTTLE_RESET.as_millis() as i64
        {
            tracing::info!("resetting throttle factor");
            state.factor = BASE_THROTTLE_FACTOR;
        }
        (base_ms as f64 * state.factor) as i64
    }

    fn check_window(
        &self,
        last_send: Option<i64>,
        base_interval_ms: i64,
        now: i64,
    ) -> Result<(), SendError> {
        let interval = self.effective_interval(base_interval_ms, now);
        if let Some(last) = last_send {
            let next_allowed = last + interval;
            if now < next_allowed {
                return Err(SendError::Throttled {
                    retry_in: Duration::from_millis((next_allowed - now) as u64),
                });
            }
        }
        Ok(())
    }

    fn record_accepted(&self, now: i64) {
        self.lock(&self.factor).last_accepted = Some(now);
    }

    /// Authorize a chat message send and, on success, consume the window.
    pub fn authorize_chat(&self, text: &str) -> Result<(), SendError> {
        self.validate_message(text)?;
        if !self.authenticated {
            return Err(SendError::NotAuthenticated);
        }
        if !self.enable_chat_sending {
            return Err(SendError::ChatSendingDisabled);
        }

        let now = self.clock.now_millis();
        let mut last = self.lock(&self.chat_last_send);
        self.check_window(*last, self.chat_interval_ms, now)?;
        *last = Some(now);
        self.record_accepted(now);
        Ok(())
    }

    /// Authorize a whisper send and, on success, consume the target's window.
    ///
    /// `own_nick` is the authenticated user's nick when known, used to reject
    /// whispering yourself.
    pub fn authorize_whisper(
        &self,
        target: &str,
        text: &str,
        own_nick: Option<&str>,
    ) -> Result<(), SendError> {
        self.validate_message(text)?;
        if !self.authenticated {
            return Err(SendError::NotAuthenticated);
        }
        if let Some(own) = own_nick
            && own.eq_ignore_ascii_case(target)
        {
            return Err(SendError::SelfWhisper);
        }

        let key = target.to_lowercase();
        if !self.enable_whisper_to_anyone && !self.lock(&self.reply_targets).contains(&key) {
            return Err(SendError::WhisperNotPermitted(target.to_string()));
        }

        let now = self.clock.now_millis();
        let mut windows = self.lock(&self.whisper_last_send);
        self.check_window(windows.get(&key).copied(), self.whisper_interval_ms, now)?;
        windows.insert(key, now);
        self.record_accepted(now);
        Ok(())
    }

    /// Record that `nick` whispered us this session, making them a valid
    /// reply target under the reply-only policy.
    pub fn note_whisper_received(&self, nick: &str) {
        let inserted = self.lock(&self.reply_targets).insert(nick.to_lowercase());
        if inserted {
            tracing::info!("{} added to users available to whisper", nick);
        }
    }

    /// Whether `nick` has whispered us this session.
    pub fn is_reply_target(&self, nick: &str) -> bool {
        self.lock(&self.reply_targets).contains(&nick.to_lowercase())
    }

    /// React to a remote `throttled` error by doubling the factor.
    pub fn note_remote_throttled(&self) {
        let mut state = self.lock(&self.factor);
        state.factor = (state.factor * 2.0).min(MAX_THROTTLE_FACTOR);
        tracing::warn!(factor = state.factor, "connection throttled by server");
    }

    /// React to a remote `duplicate` error by bumping the factor.
    pub fn note_remote_duplicate(&self) {
        let mut state = self.lock(&self.factor);
        state.factor = (state.factor + 1.0).min(MAX_THROTTLE_FACTOR);
        tracing::warn!(factor = state.factor, "duplicate message reported by server");
    }
}

impl std::fmt::Debug for ThrottleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleGuard")
            .field("authenticated", &self.authenticated)
            .field("enable_chat_sending", &self.enable_chat_sending)
            .field("enable_whisper_to_anyone", &self.enable_whisper_to_anyone)
            .field("factor", &self.throttle_factor())
            .finish()
    }
}

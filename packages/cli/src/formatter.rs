//! Event formatting for terminal display.

use chrono::{TimeZone, Utc};
use strim_chat::{Event, Moderation};

/// Event formatter for terminal display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format one event as a display line.
    ///
    /// # Arguments
    ///
    /// * `event` - The decoded event to display
    ///
    /// # Returns
    ///
    /// A formatted line ending in a newline, or an empty string for events
    /// that have no terminal representation.
    pub fn format_event(event: &Event) -> String {
        match event {
            Event::ServedConnections {
                connection_count,
                users,
            } => format!(
                "\n=== {} connections, {} users in chat ===\n",
                connection_count,
                users.len()
            ),
            Event::UserJoined { user, timestamp } => {
                format!("\n+ {} joined at {}\n", user.nick, clock_time(*timestamp))
            }
            Event::UserQuit { user, timestamp } => {
                format!("\n- {} left at {}\n", user.nick, clock_time(*timestamp))
            }
            Event::Broadcast { timestamp, text } => {
                format!("\n[{}] *** {}\n", clock_time(*timestamp), text)
            }
            Event::ChatMessage {
                user,
                timestamp,
                text,
            } => format!("\n[{}] {}: {}\n", clock_time(*timestamp), user.nick, text),
            Event::Whisper {
                user,
                timestamp,
                text,
                ..
            } => format!(
                "\n[{}] (whisper) {}: {}\n",
                clock_time(*timestamp),
                user.nick,
                text
            ),
            Event::WhisperSent => "\n(whisper delivered)\n".to_string(),
            Event::Mute(m) => Self::format_moderation("muted", m),
            Event::Unmute(m) => Self::format_moderation("unmuted", m),
            Event::Ban(m) => Self::format_moderation("banned", m),
            Event::Unban(m) => Self::format_moderation("unbanned", m),
            Event::SubOnly {
                user,
                enabled,
                ..
            } => {
                let state = if *enabled { "enabled" } else { "disabled" };
                format!("\n* sub-only mode {} by {}\n", state, user.nick)
            }
            Event::ErrorMessage { raw, .. } => format!("\n! server error: {}\n", raw),
            Event::SocketError { detail } => format!("\n! socket error: {}\n", detail),
            Event::SocketClosed => "\n! connection closed\n".to_string(),
            Event::HandlerError { .. } => String::new(),
        }
    }

    /// Format a chat message that mentions the current user.
    pub fn format_mention(event: &Event) -> String {
        if let Event::ChatMessage {
            user,
            timestamp,
            text,
        } = event
        {
            format!(
                "\n[{}] >>> {}: {} <<<\n",
                clock_time(*timestamp),
                user.nick,
                text
            )
        } else {
            String::new()
        }
    }

    fn format_moderation(action: &str, m: &Moderation) -> String {
        match &m.target {
            Some(target) => format!("\n* {} was {} by {}\n", target, action, m.moderator.nick),
            None => format!("\n* {} by {}\n", action, m.moderator.nick),
        }
    }
}

/// Render a Unix millisecond timestamp as a UTC wall-clock time.
fn clock_time(timestamp_millis: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp_millis).single() {
        Some(dt) => dt.format("%H:%M:%S").to_string(),
        None => timestamp_millis.to_string(),
    }
}

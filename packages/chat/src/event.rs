//! Typed events decoded from the chat websocket stream.

use std::fmt;

/// A chat user as carried by websocket payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub nick: String,
    pub features: Vec<String>,
}

impl ChatUser {
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            features: Vec::new(),
        }
    }
}

/// Error codes carried by `ERR` frames.
///
/// Known codes get their own variant; anything else is kept verbatim in
/// `Unknown` so handlers can still inspect it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    Throttled,
    Duplicate,
    NeedLogin,
    NotFound,
    Banned,
    Muted,
    SubMode,
    TooManyConnections,
    Unknown(String),
}

impl ErrorCode {
    /// Map the raw code string from an `ERR` payload to a variant.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "throttled" => Self::Throttled,
            "duplicate" => Self::Duplicate,
            "needlogin" => Self::NeedLogin,
            "notfound" => Self::NotFound,
            "banned" => Self::Banned,
            "muted" => Self::Muted,
            "submode" => Self::SubMode,
            "toomanyconnections" => Self::TooManyConnections,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Every kind of event the client can dispatch.
///
/// The first thirteen kinds correspond one-to-one to wire tags. The remaining
/// kinds are synthetic: they are produced by the client itself, never decoded
/// from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServedConnections,
    UserJoined,
    UserQuit,
    Broadcast,
    ChatMessage,
    Whisper,
    WhisperSent,
    Mute,
    Unmute,
    Ban,
    Unban,
    SubOnly,
    ErrorMessage,
    /// Fires for every decoded event, after the kind-specific handlers.
    AnyMessage,
    /// Fires when a chat message contains the authenticated user's nick.
    Mention,
    /// Fires on a transport-level error, before the session ends.
    SocketError,
    /// Fires exactly once per session when the connection closes.
    SocketClosed,
    /// Fires when a handler invocation returns an error.
    HandlerError,
}

impl EventKind {
    /// All kinds, wire-tagged and synthetic alike.
    pub const ALL: [EventKind; 18] = [
        Self::ServedConnections,
        Self::UserJoined,
        Self::UserQuit,
        Self::Broadcast,
        Self::ChatMessage,
        Self::Whisper,
        Self::WhisperSent,
        Self::Mute,
        Self::Unmute,
        Self::Ban,
        Self::Unban,
        Self::SubOnly,
        Self::ErrorMessage,
        Self::AnyMessage,
        Self::Mention,
        Self::SocketError,
        Self::SocketClosed,
        Self::HandlerError,
    ];

    /// The wire tag for this kind, or `None` for synthetic kinds.
    pub fn wire_tag(self) -> Option<&'static str> {
        match self {
            Self::ServedConnections => Some("NAMES"),
            Self::UserJoined => Some("JOIN"),
            Self::UserQuit => Some("QUIT"),
            Self::Broadcast => Some("BROADCAST"),
            Self::ChatMessage => Some("MSG"),
            Self::Whisper => Some("PRIVMSG"),
            Self::WhisperSent => Some("PRIVMSGSENT"),
            Self::Mute => Some("MUTE"),
            Self::Unmute => Some("UNMUTE"),
            Self::Ban => Some("BAN"),
            Self::Unban => Some("UNBAN"),
            Self::SubOnly => Some("SUBONLY"),
            Self::ErrorMessage => Some("ERR"),
            _ => None,
        }
    }

    /// Resolve a wire tag to its kind.
    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.wire_tag() == Some(tag))
    }

    /// The conventional handler name for this kind (e.g. `on_chat_message`).
    pub fn handler_name(self) -> &'static str {
        match self {
            Self::ServedConnections => "on_served_connections",
            Self::UserJoined => "on_user_joined",
            Self::UserQuit => "on_user_quit",
            Self::Broadcast => "on_broadcast",
            Self::ChatMessage => "on_chat_message",
            Self::Whisper => "on_whisper",
            Self::WhisperSent => "on_whisper_sent",
            Self::Mute => "on_mute",
            Self::Unmute => "on_unmute",
            Self::Ban => "on_ban",
            Self::Unban => "on_unban",
            Self::SubOnly => "on_sub_only",
            Self::ErrorMessage => "on_error_message",
            Self::AnyMessage => "on_any_message",
            Self::Mention => "on_mention",
            Self::SocketError => "on_socket_error",
            Self::SocketClosed => "on_socket_closed",
            Self::HandlerError => "on_handler_error",
        }
    }

    /// Resolve a conventional handler name to its kind.
    pub fn from_handler_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.handler_name() == name)
    }

    /// Whether this kind has no wire tag.
    pub fn is_synthetic(self) -> bool {
        self.wire_tag().is_none()
    }

    /// Whether this kind is a moderation action.
    pub fn is_moderation(self) -> bool {
        matches!(self, Self::Mute | Self::Unmute | Self::Ban | Self::Unban)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.wire_tag() {
            Some(tag) => f.write_str(tag),
            None => write!(f, "{:?}", self),
        }
    }
}

/// A moderation action (mute, unmute, ban, unban) as decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Moderation {
    /// The moderator who performed the action.
    pub moderator: ChatUser,
    /// The affected nick, when the payload carries one.
    pub target: Option<String>,
    pub timestamp: i64,
}

/// A decoded event with its payload. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ServedConnections {
        connection_count: u64,
        users: Vec<ChatUser>,
    },
    UserJoined {
        user: ChatUser,
        timestamp: i64,
    },
    UserQuit {
        user: ChatUser,
        timestamp: i64,
    },
    Broadcast {
        timestamp: i64,
        text: String,
    },
    ChatMessage {
        user: ChatUser,
        timestamp: i64,
        text: String,
    },
    Whisper {
        user: ChatUser,
        message_id: Option<u64>,
        timestamp: i64,
        text: String,
    },
    WhisperSent,
    Mute(Moderation),
    Unmute(Moderation),
    Ban(Moderation),
    Unban(Moderation),
    SubOnly {
        user: ChatUser,
        timestamp: i64,
        enabled: bool,
    },
    ErrorMessage {
        code: ErrorCode,
        raw: String,
    },
    SocketError {
        detail: String,
    },
    SocketClosed,
    HandlerError {
        /// The kind whose handler failed, or `None` for decode failures.
        source: Option<EventKind>,
        detail: String,
    },
}

impl Event {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ServedConnections { .. } => EventKind::ServedConnections,
            Self::UserJoined { .. } => EventKind::UserJoined,
            Self::UserQuit { .. } => EventKind::UserQuit,
            Self::Broadcast { .. } => EventKind::Broadcast,
            Self::ChatMessage { .. } => EventKind::ChatMessage,
            Self::Whisper { .. } => EventKind::Whisper,
            Self::WhisperSent => EventKind::WhisperSent,
            Self::Mute(_) => EventKind::Mute,
            Self::Unmute(_) => EventKind::Unmute,
            Self::Ban(_) => EventKind::Ban,
            Self::Unban(_) => EventKind::Unban,
            Self::SubOnly { .. } => EventKind::SubOnly,
            Self::ErrorMessage { .. } => EventKind::ErrorMessage,
            Self::SocketError { .. } => EventKind::SocketError,
            Self::SocketClosed => EventKind::SocketClosed,
            Self::HandlerError { .. } => EventKind::HandlerError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tag_round_trip_for_all_tagged_kinds() {
        // テスト項目: ワイヤタグを持つ全イベント種別でタグと種別の相互変換が一致する
        // given (前提条件):
        let tagged: Vec<EventKind> = EventKind::ALL
            .into_iter()
            .filter(|k| !k.is_synthetic())
            .collect();

        // when (操作) / then (期待する結果):
        for kind in tagged {
            let tag = kind.wire_tag().unwrap();
            assert_eq!(EventKind::from_wire_tag(tag), Some(kind));
        }
    }

    #[test]
    fn test_synthetic_kinds_have_no_wire_tag() {
        // テスト項目: 合成イベント種別はワイヤタグを持たない
        // given (前提条件):
        let synthetic = [
            EventKind::AnyMessage,
            EventKind::Mention,
            EventKind::SocketError,
            EventKind::SocketClosed,
            EventKind::HandlerError,
        ];

        // when (操作) / then (期待する結果):
        for kind in synthetic {
            assert!(kind.is_synthetic());
            assert_eq!(kind.wire_tag(), None);
        }
    }

    #[test]
    fn test_handler_name_resolution() {
        // テスト項目: ハンドラ命名規約から種別を解決できる
        // given (前提条件):
        let name = "on_chat_message";

        // when (操作):
        let kind = EventKind::from_handler_name(name);

        // then (期待する結果):
        assert_eq!(kind, Some(EventKind::ChatMessage));
    }

    #[test]
    fn test_handler_name_resolution_with_unknown_name() {
        // テスト項目: 規約に合わない名前は解決できない
        // given (前提条件):
        let name = "on_emote_spam";

        // when (操作):
        let kind = EventKind::from_handler_name(name);

        // then (期待する結果):
        assert_eq!(kind, None);
    }

    #[test]
    fn test_error_code_from_raw_with_known_codes() {
        // テスト項目: 既知のエラーコードが対応するバリアントに変換される
        // given (前提条件) / when (操作) / then (期待する結果):
        assert_eq!(ErrorCode::from_raw("throttled"), ErrorCode::Throttled);
        assert_eq!(ErrorCode::from_raw("duplicate"), ErrorCode::Duplicate);
        assert_eq!(ErrorCode::from_raw("needlogin"), ErrorCode::NeedLogin);
        assert_eq!(ErrorCode::from_raw("notfound"), ErrorCode::NotFound);
    }

    #[test]
    fn test_error_code_from_raw_with_unknown_code() {
        // テスト項目: 未知のエラーコードは Unknown として原文のまま保持される
        // given (前提条件):
        let raw = "somethingnew";

        // when (操作):
        let code = ErrorCode::from_raw(raw);

        // then (期待する結果):
        assert_eq!(code, ErrorCode::Unknown("somethingnew".to_string()));
    }

    #[test]
    fn test_event_kind_accessor_matches_variant() {
        // テスト項目: Event::kind() がバリアントに対応する種別を返す
        // given (前提条件):
        let event = Event::ChatMessage {
            user: ChatUser::new("alice"),
            timestamp: 1000,
            text: "hello".to_string(),
        };

        // when (操作):
        let kind = event.kind();

        // then (期待する結果):
        assert_eq!(kind, EventKind::ChatMessage);
    }
}

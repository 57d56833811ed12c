//! Wire codec for the chat websocket.
//!
//! Frames are `TAG {json}` records: a tag word followed by a JSON payload.
//! Decoding maps a frame to one typed [`Event`]; encoding builds the outbound
//! payloads for chat messages and whispers.

use serde::Deserialize;
use serde_json::json;

use crate::error::DecodeError;
use crate::event::{ChatUser, ErrorCode, Event, EventKind, Moderation};

#[derive(Debug, Deserialize)]
struct UserDto {
    nick: String,
    #[serde(default)]
    features: Vec<String>,
}

impl From<UserDto> for ChatUser {
    fn from(dto: UserDto) -> Self {
        ChatUser {
            nick: dto.nick,
            features: dto.features,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NamesDto {
    connectioncount: u64,
    #[serde(default)]
    users: Vec<UserDto>,
}

/// Payload shape shared by user-carrying frames (JOIN, QUIT, MSG, PRIVMSG,
/// moderation frames, SUBONLY).
#[derive(Debug, Deserialize)]
struct InboundDto {
    nick: String,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    messageid: Option<u64>,
}

impl InboundDto {
    fn user(&self) -> ChatUser {
        ChatUser {
            nick: self.nick.clone(),
            features: self.features.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BroadcastDto {
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    data: String,
}

fn parse_payload<'a, T: Deserialize<'a>>(tag: &str, payload: &'a str) -> Result<T, DecodeError> {
    serde_json::from_str(payload).map_err(|source| DecodeError::BadPayload {
        tag: tag.to_string(),
        source,
    })
}

fn moderation(dto: InboundDto) -> Moderation {
    Moderation {
        moderator: dto.user(),
        target: dto.data,
        timestamp: dto.timestamp,
    }
}

/// Decode one raw frame into a typed event.
///
/// An unknown tag or malformed payload is a [`DecodeError`]; the session
/// routes those to handler-error without dropping the connection.
pub fn decode(frame: &str) -> Result<Event, DecodeError> {
    let frame = frame.trim();
    if frame.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }

    let (tag, payload) = frame.split_once(' ').unwrap_or((frame, ""));
    let kind = EventKind::from_wire_tag(tag)
        .ok_or_else(|| DecodeError::UnknownTag(tag.to_string()))?;

    let event = match kind {
        EventKind::ServedConnections => {
            let dto: NamesDto = parse_payload(tag, payload)?;
            Event::ServedConnections {
                connection_count: dto.connectioncount,
                users: dto.users.into_iter().map(ChatUser::from).collect(),
            }
        }
        EventKind::UserJoined => {
            let dto: InboundDto = parse_payload(tag, payload)?;
            Event::UserJoined {
                user: dto.user(),
                timestamp: dto.timestamp,
            }
        }
        EventKind::UserQuit => {
            let dto: InboundDto = parse_payload(tag, payload)?;
            Event::UserQuit {
                user: dto.user(),
                timestamp: dto.timestamp,
            }
        }
        EventKind::Broadcast => {
            let dto: BroadcastDto = parse_payload(tag, payload)?;
            Event::Broadcast {
                timestamp: dto.timestamp,
                text: dto.data,
            }
        }
        EventKind::ChatMessage => {
            let dto: InboundDto = parse_payload(tag, payload)?;
            Event::ChatMessage {
                user: dto.user(),
                timestamp: dto.timestamp,
                text: dto.data.unwrap_or_default(),
            }
        }
        EventKind::Whisper => {
            let dto: InboundDto = parse_payload(tag, payload)?;
            Event::Whisper {
                user: dto.user(),
                message_id: dto.messageid,
                timestamp: dto.timestamp,
                text: dto.data.unwrap_or_default(),
            }
        }
        EventKind::WhisperSent => Event::WhisperSent,
        EventKind::Mute => Event::Mute(moderation(parse_payload(tag, payload)?)),
        EventKind::Unmute => Event::Unmute(moderation(parse_payload(tag, payload)?)),
        EventKind::Ban => Event::Ban(moderation(parse_payload(tag, payload)?)),
        EventKind::Unban => Event::Unban(moderation(parse_payload(tag, payload)?)),
        EventKind::SubOnly => {
            let dto: InboundDto = parse_payload(tag, payload)?;
            let enabled = dto.data.as_deref() == Some("on");
            Event::SubOnly {
                user: dto.user(),
                timestamp: dto.timestamp,
                enabled,
            }
        }
        EventKind::ErrorMessage => {
            // ERR payloads are a bare JSON string like `"throttled"`; keep the
            // raw text for codes that don't parse.
            let raw: String =
                serde_json::from_str(payload).unwrap_or_else(|_| payload.to_string());
            Event::ErrorMessage {
                code: ErrorCode::from_raw(&raw),
                raw,
            }
        }
        // Synthetic kinds never come off the wire.
        _ => return Err(DecodeError::UnknownTag(tag.to_string())),
    };

    Ok(event)
}

/// Encode an outbound chat message payload.
pub fn encode_chat_message(text: &str) -> String {
    format!("MSG {}", json!({ "data": text }))
}

/// Encode an outbound whisper payload.
pub fn encode_whisper(nick: &str, text: &str) -> String {
    format!("PRIVMSG {}", json!({ "nick": nick, "data": text }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_served_connections() {
        // テスト項目: NAMES フレームが接続一覧イベントにデコードされる
        // given (前提条件):
        let frame = r#"NAMES {"connectioncount":312,"users":[{"nick":"alice","features":["subscriber"]},{"nick":"bob","features":[]}]}"#;

        // when (操作):
        let event = decode(frame).unwrap();

        // then (期待する結果):
        match event {
            Event::ServedConnections {
                connection_count,
                users,
            } => {
                assert_eq!(connection_count, 312);
                assert_eq!(users.len(), 2);
                assert_eq!(users[0].nick, "alice");
                assert_eq!(users[0].features, vec!["subscriber".to_string()]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_chat_message() {
        // テスト項目: MSG フレームがチャットメッセージイベントにデコードされる
        // given (前提条件):
        let frame = r#"MSG {"nick":"alice","features":[],"timestamp":1609459200000,"data":"hello chat"}"#;

        // when (操作):
        let event = decode(frame).unwrap();

        // then (期待する結果):
        assert_eq!(
            event,
            Event::ChatMessage {
                user: ChatUser::new("alice"),
                timestamp: 1609459200000,
                text: "hello chat".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_whisper_with_message_id() {
        // テスト項目: PRIVMSG フレームの messageid が保持される
        // given (前提条件):
        let frame =
            r#"PRIVMSG {"messageid":42,"nick":"bob","timestamp":1000,"data":"psst"}"#;

        // when (操作):
        let event = decode(frame).unwrap();

        // then (期待する結果):
        match event {
            Event::Whisper {
                user,
                message_id,
                text,
                ..
            } => {
                assert_eq!(user.nick, "bob");
                assert_eq!(message_id, Some(42));
                assert_eq!(text, "psst");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_whisper_sent_without_payload() {
        // テスト項目: ペイロードを持たない PRIVMSGSENT がデコードできる
        // given (前提条件) / when (操作):
        let event = decode("PRIVMSGSENT").unwrap();

        // then (期待する結果):
        assert_eq!(event, Event::WhisperSent);
    }

    #[test]
    fn test_decode_moderation_frames() {
        // テスト項目: モデレーション系フレームが対象ユーザ付きでデコードされる
        // given (前提条件):
        let frame = r#"BAN {"nick":"mod","features":["moderator"],"timestamp":2000,"data":"troll"}"#;

        // when (操作):
        let event = decode(frame).unwrap();

        // then (期待する結果):
        match event {
            Event::Ban(m) => {
                assert_eq!(m.moderator.nick, "mod");
                assert_eq!(m.target.as_deref(), Some("troll"));
                assert_eq!(m.timestamp, 2000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_sub_only_toggle() {
        // テスト項目: SUBONLY の data が on/off フラグに変換される
        // given (前提条件) / when (操作):
        let on = decode(r#"SUBONLY {"nick":"mod","timestamp":1,"data":"on"}"#).unwrap();
        let off = decode(r#"SUBONLY {"nick":"mod","timestamp":1,"data":"off"}"#).unwrap();

        // then (期待する結果):
        assert!(matches!(on, Event::SubOnly { enabled: true, .. }));
        assert!(matches!(off, Event::SubOnly { enabled: false, .. }));
    }

    #[test]
    fn test_decode_error_message_with_known_code() {
        // テスト項目: ERR フレームの既知コードがバリアントに変換される
        // given (前提条件) / when (操作):
        let event = decode(r#"ERR "throttled""#).unwrap();

        // then (期待する結果):
        assert_eq!(
            event,
            Event::ErrorMessage {
                code: ErrorCode::Throttled,
                raw: "throttled".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_error_message_with_unknown_code_keeps_raw_text() {
        // テスト項目: ERR フレームの未知コードは原文のまま保持される
        // given (前提条件) / when (操作):
        let event = decode(r#"ERR "gibberish""#).unwrap();

        // then (期待する結果):
        assert_eq!(
            event,
            Event::ErrorMessage {
                code: ErrorCode::Unknown("gibberish".to_string()),
                raw: "gibberish".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_unknown_tag_fails() {
        // テスト項目: 未知のタグは DecodeError になる
        // given (前提条件) / when (操作):
        let result = decode(r#"PING {"data":"x"}"#);

        // then (期待する結果):
        assert!(matches!(result, Err(DecodeError::UnknownTag(tag)) if tag == "PING"));
    }

    #[test]
    fn test_decode_malformed_payload_fails() {
        // テスト項目: JSON として不正なペイロードは DecodeError になる
        // given (前提条件) / when (操作):
        let result = decode("MSG {not json}");

        // then (期待する結果):
        assert!(matches!(result, Err(DecodeError::BadPayload { tag, .. }) if tag == "MSG"));
    }

    #[test]
    fn test_decode_empty_frame_fails() {
        // テスト項目: 空フレームは DecodeError になる
        // given (前提条件) / when (操作):
        let result = decode("   ");

        // then (期待する結果):
        assert!(matches!(result, Err(DecodeError::EmptyFrame)));
    }

    #[test]
    fn test_encode_chat_message() {
        // テスト項目: チャットメッセージが MSG ペイロードにエンコードされる
        // given (前提条件) / when (操作):
        let payload = encode_chat_message("hello");

        // then (期待する結果):
        assert_eq!(payload, r#"MSG {"data":"hello"}"#);
    }

    #[test]
    fn test_encode_whisper() {
        // テスト項目: ウィスパーが PRIVMSG ペイロードにエンコードされる
        // given (前提条件) / when (操作):
        let payload = encode_whisper("bob", "psst");

        // then (期待する結果):
        assert_eq!(payload, r#"PRIVMSG {"data":"psst","nick":"bob"}"#);
    }
}

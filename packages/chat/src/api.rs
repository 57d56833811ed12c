//! HTTP API collaborator: profile, whisper inbox and stream info.
//!
//! These are plain request/response calls the client core delegates to. The
//! [`ApiAccess`] trait exists so the session bootstrap and the facade can be
//! tested against a canned implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Deserializer, de::DeserializeOwned};

use crate::config::ChatConfig;
use crate::error::ApiError;
use crate::event::{ChatUser, Event};

/// The authenticated user's account info as returned by the profile endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub nick: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "userStatus")]
    pub status: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Profile {
    pub fn is_subscriber(&self) -> bool {
        self.features.iter().any(|f| f == "subscriber")
    }
}

// Inbox flags arrive as "0"/"1" strings or numbers depending on the endpoint.
fn loose_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        serde_json::Value::String(s) => !s.is_empty() && s != "0",
        _ => false,
    })
}

fn loose_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0) as u32,
        serde_json::Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    })
}

/// One private message from the whisper inbox.
#[derive(Debug, Clone, Deserialize)]
pub struct PrivateMessage {
    pub id: u64,
    #[serde(rename = "from")]
    pub from_user: String,
    #[serde(rename = "to", default)]
    pub target_user: Option<String>,
    #[serde(rename = "message")]
    pub text: String,
    /// Timestamp string in the API's `%Y-%m-%dT%H:%M:%S+0000` format.
    #[serde(rename = "timestamp")]
    pub date_time: String,
    #[serde(rename = "isread", default, deserialize_with = "loose_flag")]
    pub is_read: bool,
}

impl PrivateMessage {
    /// Parse the API timestamp into Unix milliseconds.
    pub fn timestamp_millis(&self) -> Option<i64> {
        DateTime::parse_from_str(&self.date_time, "%Y-%m-%dT%H:%M:%S%z")
            .ok()
            .map(|dt| dt.timestamp_millis())
    }

    /// Re-express this inbox message as a whisper event, in the same shape the
    /// websocket would have delivered it, so it can replay through handlers.
    pub fn as_whisper_event(&self) -> Event {
        Event::Whisper {
            user: ChatUser::new(self.from_user.clone()),
            message_id: Some(self.id),
            timestamp: self.timestamp_millis().unwrap_or_default(),
            text: self.text.clone(),
        }
    }
}

/// Info about the current stream if live, or the last one.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default)]
    pub viewers: Option<u64>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub status_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnreadRowDto {
    username: String,
    #[serde(deserialize_with = "loose_count")]
    unread: u32,
}

/// The API surface the client core depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApiAccess: Send + Sync {
    /// Account info for the auth token's account.
    async fn user_info(&self) -> Result<Profile, ApiError>;

    /// The most recent chat messages, as raw websocket-format frames.
    async fn chat_history(&self) -> Result<Vec<String>, ApiError>;

    /// Unread whisper counts per user. Requires a session id.
    async fn unread_counts(&self) -> Result<HashMap<String, u32>, ApiError>;

    /// Up to `count` unread whispers exchanged with `user`. Fetching marks
    /// them as read in the chat backend. Requires a session id.
    async fn inbox(&self, user: &str, count: u32) -> Result<Vec<PrivateMessage>, ApiError>;

    /// Info about the current or last stream.
    async fn stream_info(&self) -> Result<StreamInfo, ApiError>;
}

/// [`ApiAccess`] implementation against the live HTTP API.
pub struct HttpApi {
    base_url: String,
    auth_token: Option<String>,
    session_id: Option<String>,
    http: reqwest::Client,
}

impl HttpApi {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            base_url: config.api_url.clone(),
            auth_token: config.auth.auth_token.clone(),
            session_id: config.auth.session_id.clone(),
            http: reqwest::Client::new(),
        }
    }

    fn session_id(&self, what: &'static str) -> Result<&str, ApiError> {
        self.session_id
            .as_deref()
            .ok_or(ApiError::AnonymousSession(what))
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        tracing::info!("calling api on `{}`", endpoint);

        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.http.get(&url);

        let mut cookies = Vec::new();
        if let Some(token) = &self.auth_token {
            cookies.push(format!("authtoken={}", token));
        }
        if let Some(sid) = &self.session_id {
            cookies.push(format!("sid={}", sid));
        }
        if !cookies.is_empty() {
            request = request.header(reqwest::header::COOKIE, cookies.join("; "));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: url,
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ApiAccess for HttpApi {
    async fn user_info(&self) -> Result<Profile, ApiError> {
        let token = self
            .auth_token
            .as_deref()
            .ok_or(ApiError::AnonymousConnection("unable to get profile"))?;
        self.get_json(&format!("/userinfo?token={}", token)).await
    }

    async fn chat_history(&self) -> Result<Vec<String>, ApiError> {
        self.get_json("/chat/history").await
    }

    async fn unread_counts(&self) -> Result<HashMap<String, u32>, ApiError> {
        self.session_id("unable to get unread messages")?;
        let rows: Vec<UnreadRowDto> = self.get_json("/messages/unread").await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.username, row.unread))
            .collect())
    }

    async fn inbox(&self, user: &str, count: u32) -> Result<Vec<PrivateMessage>, ApiError> {
        self.session_id("unable to get inbox")?;
        let messages: Vec<PrivateMessage> = self
            .get_json(&format!("/messages/usr/{}/inbox?s=0", user))
            .await?;
        Ok(messages
            .into_iter()
            .filter(|m| !m.is_read)
            .take(count as usize)
            .collect())
    }

    async fn stream_info(&self) -> Result<StreamInfo, ApiError> {
        self.get_json("/info/stream").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn test_private_message_timestamp_parsing() {
        // テスト項目: API 形式のタイムスタンプ文字列がミリ秒に変換される
        // given (前提条件):
        let message: PrivateMessage = serde_json::from_str(
            r#"{"id":7,"from":"bob","to":"alice","message":"hi","timestamp":"2021-01-01T00:00:00+0000","isread":"0"}"#,
        )
        .unwrap();

        // when (操作):
        let millis = message.timestamp_millis();

        // then (期待する結果):
        assert_eq!(millis, Some(1609459200000));
        assert!(!message.is_read);
    }

    #[test]
    fn test_private_message_replays_as_whisper_event() {
        // テスト項目: 受信箱のメッセージがウィスパーイベントとして再生できる
        // given (前提条件):
        let message: PrivateMessage = serde_json::from_str(
            r#"{"id":7,"from":"bob","message":"psst","timestamp":"2021-01-01T00:00:00+0000","isread":0}"#,
        )
        .unwrap();

        // when (操作):
        let event = message.as_whisper_event();

        // then (期待する結果):
        assert_eq!(event.kind(), EventKind::Whisper);
        match event {
            Event::Whisper {
                user,
                message_id,
                text,
                ..
            } => {
                assert_eq!(user.nick, "bob");
                assert_eq!(message_id, Some(7));
                assert_eq!(text, "psst");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unread_row_accepts_string_and_number_counts() {
        // テスト項目: unread 件数が文字列でも数値でもパースできる
        // given (前提条件) / when (操作):
        let as_string: UnreadRowDto =
            serde_json::from_str(r#"{"username":"bob","unread":"3"}"#).unwrap();
        let as_number: UnreadRowDto =
            serde_json::from_str(r#"{"username":"bob","unread":3}"#).unwrap();

        // then (期待する結果):
        assert_eq!(as_string.unread, 3);
        assert_eq!(as_number.unread, 3);
    }

    #[test]
    fn test_profile_subscriber_flag() {
        // テスト項目: features に subscriber を含むプロフィールが購読者扱いになる
        // given (前提条件):
        let profile: Profile = serde_json::from_str(
            r#"{"nick":"alice","features":["subscriber","flair9"],"createdDate":"2020-01-01T00:00:00+0000"}"#,
        )
        .unwrap();

        // when (操作) / then (期待する結果):
        assert!(profile.is_subscriber());
        assert_eq!(profile.created_date.as_deref(), Some("2020-01-01T00:00:00+0000"));
    }
}

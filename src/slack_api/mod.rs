//! Slack Web API client: message search, user lookup, DM history, and file
//! download.
//!
//! Slack signals failure inside a 200 response (`ok: false` plus an error
//! code), so every call checks the envelope. Token errors map to
//! `AuthExpired`; Slack user tokens have no refresh flow, so an expired
//! token always means reconnect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::{AuthError, CredentialFlow};
use crate::db::tokens::OAuthCredential;
use crate::http::{send_with_retry, RetryPolicy};
use crate::types::Provider;

const BASE_URL: &str = "https://slack.com/api";

#[derive(Debug, thiserror::Error)]
pub enum SlackApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Slack API error: {0}")]
    Api(String),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn map_slack_error(code: &str) -> SlackApiError {
    match code {
        "invalid_auth" | "token_revoked" | "token_expired" | "account_inactive"
        | "not_authed" => SlackApiError::AuthExpired,
        other => SlackApiError::Api(other.to_string()),
    }
}

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    payload: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    messages: Option<SearchMessages>,
}

#[derive(Debug, Deserialize)]
struct SearchMessages {
    #[serde(default)]
    matches: Vec<SearchMatch>,
}

#[derive(Debug, Deserialize)]
struct SearchMatch {
    #[serde(default)]
    ts: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    channel: Option<ChannelRaw>,
    #[serde(default)]
    files: Vec<FileRaw>,
}

#[derive(Debug, Deserialize)]
struct FileRaw {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url_private: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct ChannelRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_im: bool,
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    is_mpim: bool,
}

#[derive(Debug, Deserialize)]
struct LookupPayload {
    user: Option<UserRaw>,
}

#[derive(Debug, Deserialize)]
struct UserRaw {
    id: String,
    #[serde(default)]
    real_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenPayload {
    channel: Option<OpenChannel>,
}

#[derive(Debug, Deserialize)]
struct OpenChannel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    #[serde(default)]
    ts: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    files: Vec<FileRaw>,
}

// ============================================================================
// Public types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Dm,
    Group,
    Channel,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Dm => "dm",
            ChannelType::Group => "group",
            ChannelType::Channel => "channel",
        }
    }
}

/// A file shared alongside a message. Content is fetched separately via
/// [`SlackClient::download_file`].
#[derive(Debug, Clone)]
pub struct SlackFileRef {
    pub name: String,
    pub url_private: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct SlackMessage {
    /// Slack message timestamp, unique within a channel.
    pub ts: String,
    pub user: String,
    pub username: String,
    pub text: String,
    pub channel_name: String,
    pub channel_type: ChannelType,
    pub timestamp: Option<DateTime<Utc>>,
    pub permalink: Option<String>,
    pub files: Vec<SlackFileRef>,
}

#[derive(Debug, Clone)]
pub struct SlackUser {
    pub id: String,
    pub real_name: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

pub struct SlackClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for SlackClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SlackClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SlackApiError> {
        let resp = send_with_retry(request, &RetryPolicy::default()).await?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SlackApiError::AuthExpired);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SlackApiError::Api(format!("HTTP {}: {}", status, body)));
        }

        let envelope: Envelope<T> = resp.json().await?;
        if !envelope.ok {
            return Err(map_slack_error(
                envelope.error.as_deref().unwrap_or("unknown_error"),
            ));
        }
        envelope
            .payload
            .ok_or_else(|| SlackApiError::Api("empty payload".to_string()))
    }

    /// Search messages across the workspace. Results are deduplicated by ts.
    pub async fn search_messages(
        &self,
        access_token: &str,
        query: &str,
        count: u32,
    ) -> Result<Vec<SlackMessage>, SlackApiError> {
        let payload: SearchPayload = self
            .call(
                self.client
                    .get(format!("{}/search.messages", self.base_url))
                    .bearer_auth(access_token)
                    .query(&[("query", query), ("count", &count.to_string())]),
            )
            .await?;

        let matches = payload
            .messages
            .map(|m| m.matches)
            .unwrap_or_default();

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(matches.len());
        for m in matches {
            if m.ts.is_empty() || !seen.insert(m.ts.clone()) {
                continue;
            }
            // Search results sometimes omit the is_im flag; a "D"-prefixed
            // channel id is still a DM.
            let (channel_name, channel_type) = match &m.channel {
                Some(c) if c.is_im || c.id.starts_with('D') => (c.name.clone(), ChannelType::Dm),
                Some(c) if c.is_group || c.is_mpim => (c.name.clone(), ChannelType::Group),
                Some(c) => (c.name.clone(), ChannelType::Channel),
                None => (String::new(), ChannelType::Channel),
            };
            out.push(SlackMessage {
                timestamp: parse_slack_ts(&m.ts),
                ts: m.ts,
                user: m.user,
                username: m.username,
                text: m.text,
                channel_name,
                channel_type,
                permalink: m.permalink,
                files: file_refs(m.files),
            });
        }
        Ok(out)
    }

    /// Find a workspace user by email. `Ok(None)` when no account matches.
    pub async fn lookup_user_by_email(
        &self,
        access_token: &str,
        email: &str,
    ) -> Result<Option<SlackUser>, SlackApiError> {
        let result: Result<LookupPayload, SlackApiError> = self
            .call(
                self.client
                    .get(format!("{}/users.lookupByEmail", self.base_url))
                    .bearer_auth(access_token)
                    .query(&[("email", email)]),
            )
            .await;

        match result {
            Ok(payload) => Ok(payload.user.map(|u| SlackUser {
                id: u.id,
                real_name: u.real_name,
            })),
            Err(SlackApiError::Api(code)) if code == "users_not_found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch recent direct messages with a user, identified by email.
    /// `Ok(empty)` when the address has no Slack account.
    pub async fn dm_history(
        &self,
        access_token: &str,
        email: &str,
        days_back: i64,
        limit: u32,
    ) -> Result<Vec<SlackMessage>, SlackApiError> {
        let Some(user) = self.lookup_user_by_email(access_token, email).await? else {
            return Ok(Vec::new());
        };

        let open: OpenPayload = self
            .call(
                self.client
                    .post(format!("{}/conversations.open", self.base_url))
                    .bearer_auth(access_token)
                    .form(&[("users", user.id.as_str())]),
            )
            .await?;
        let Some(channel) = open.channel else {
            return Ok(Vec::new());
        };

        let oldest = (Utc::now() - chrono::Duration::days(days_back)).timestamp();
        let history: HistoryPayload = self
            .call(
                self.client
                    .get(format!("{}/conversations.history", self.base_url))
                    .bearer_auth(access_token)
                    .query(&[
                        ("channel", channel.id.as_str()),
                        ("oldest", &oldest.to_string()),
                        ("limit", &limit.to_string()),
                    ]),
            )
            .await?;

        let display_name = user.real_name.clone().unwrap_or_else(|| email.to_string());
        Ok(history
            .messages
            .into_iter()
            .filter(|m| !m.ts.is_empty())
            .map(|m| SlackMessage {
                timestamp: parse_slack_ts(&m.ts),
                username: if m.user == user.id {
                    display_name.clone()
                } else {
                    String::new()
                },
                ts: m.ts,
                user: m.user,
                text: m.text,
                channel_name: format!("DM with {}", display_name),
                channel_type: ChannelType::Dm,
                permalink: None,
                files: file_refs(m.files),
            })
            .collect())
    }

    /// Download a shared file's content (`url_private` requires bearer auth).
    pub async fn download_file(
        &self,
        access_token: &str,
        url: &str,
    ) -> Result<Vec<u8>, SlackApiError> {
        let resp = send_with_retry(
            self.client.get(url).bearer_auth(access_token),
            &RetryPolicy::default(),
        )
        .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(SlackApiError::Api(format!("file download HTTP {}", status)));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

fn file_refs(files: Vec<FileRaw>) -> Vec<SlackFileRef> {
    files
        .into_iter()
        .map(|f| SlackFileRef {
            name: if f.name.is_empty() {
                "unknown".to_string()
            } else {
                f.name
            },
            url_private: f.url_private,
            size: f.size,
        })
        .collect()
}

/// Parse a Slack ts ("1724830000.123456") into a UTC timestamp.
fn parse_slack_ts(ts: &str) -> Option<DateTime<Utc>> {
    let secs: f64 = ts.parse().ok()?;
    DateTime::from_timestamp(secs as i64, 0)
}

// ============================================================================
// Credential flow
// ============================================================================

/// Slack user tokens are long-lived and have no refresh grant; a rejected
/// token always means the user must reconnect.
pub struct SlackCredentialFlow {
    client: reqwest::Client,
    base_url: String,
}

impl Default for SlackCredentialFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl SlackCredentialFlow {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl CredentialFlow for SlackCredentialFlow {
    fn provider(&self) -> Provider {
        Provider::Slack
    }

    async fn refresh(&self, _cred: &OAuthCredential) -> Result<OAuthCredential, AuthError> {
        Err(AuthError::Expired(Provider::Slack))
    }

    async fn revoke(&self, cred: &OAuthCredential) -> Result<(), AuthError> {
        let resp = self
            .client
            .post(format!("{}/auth.revoke", self.base_url))
            .bearer_auth(&cred.access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::RefreshFailed(format!(
                "revoke HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_classifies_channels_and_dedupes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.messages"))
            .and(query_param("query", "aurora"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": {
                    "matches": [
                        {
                            "ts": "1724830000.000100",
                            "user": "U1",
                            "username": "sam",
                            "text": "aurora launch review",
                            "channel": {"id": "C123", "name": "product"},
                            "permalink": "https://acme.slack.com/archives/C123/p1"
                        },
                        {
                            "ts": "1724830000.000100",
                            "user": "U1",
                            "username": "sam",
                            "text": "aurora launch review",
                            "channel": {"id": "C123", "name": "product"}
                        },
                        {
                            "ts": "1724830001.000200",
                            "user": "U2",
                            "username": "kai",
                            "text": "dm about aurora",
                            "channel": {"id": "D456", "name": "", "is_im": true}
                        }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = SlackClient::new().with_base_url(server.uri());
        let messages = client.search_messages("xoxp", "aurora", 20).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].channel_type, ChannelType::Channel);
        assert_eq!(messages[0].channel_name, "product");
        assert_eq!(messages[1].channel_type, ChannelType::Dm);
        assert!(messages[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_token_revoked_maps_to_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "token_revoked"
            })))
            .mount(&server)
            .await;

        let client = SlackClient::new().with_base_url(server.uri());
        let err = client.search_messages("xoxp", "q", 20).await.unwrap_err();
        assert!(matches!(err, SlackApiError::AuthExpired));
    }

    #[tokio::test]
    async fn test_lookup_missing_user_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.lookupByEmail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "users_not_found"
            })))
            .mount(&server)
            .await;

        let client = SlackClient::new().with_base_url(server.uri());
        let user = client
            .lookup_user_by_email("xoxp", "ghost@acme.com")
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn test_dm_history_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.lookupByEmail"))
            .and(query_param("email", "sam@acme.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "user": {"id": "U1", "real_name": "Sam Rivera"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/conversations.open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "channel": {"id": "D99"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .and(query_param("channel", "D99"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [
                    {
                        "ts": "1724830000.000100",
                        "user": "U1",
                        "text": "running late",
                        "files": [
                            {"name": "notes.pdf", "url_private": "https://files.slack.com/notes.pdf", "size": 1200}
                        ]
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = SlackClient::new().with_base_url(server.uri());
        let messages = client
            .dm_history("xoxp", "sam@acme.com", 14, 50)
            .await
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel_type, ChannelType::Dm);
        assert_eq!(messages[0].username, "Sam Rivera");
        assert_eq!(messages[0].channel_name, "DM with Sam Rivera");
        assert_eq!(messages[0].files.len(), 1);
        assert_eq!(messages[0].files[0].name, "notes.pdf");
    }

    #[tokio::test]
    async fn test_dm_history_no_slack_account_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.lookupByEmail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "users_not_found"
            })))
            .mount(&server)
            .await;

        let client = SlackClient::new().with_base_url(server.uri());
        let messages = client
            .dm_history("xoxp", "ghost@acme.com", 14, 50)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_always_requires_reconnect() {
        let flow = SlackCredentialFlow::new();
        let cred = OAuthCredential {
            user_id: "u1".to_string(),
            provider: Provider::Slack,
            access_token: "xoxp".to_string(),
            refresh_token: None,
            expires_at: None,
        };
        let err = flow.refresh(&cred).await.unwrap_err();
        assert!(matches!(err, AuthError::Expired(Provider::Slack)));
    }

    #[test]
    fn test_parse_slack_ts() {
        let ts = parse_slack_ts("1724830000.000100").unwrap();
        assert_eq!(ts.timestamp(), 1_724_830_000);
        assert!(parse_slack_ts("garbage").is_none());
    }
}

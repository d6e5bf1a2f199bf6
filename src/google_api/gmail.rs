//! Gmail API v1 — correspondent search with body and attachment fetch.
//!
//! Lists messages matching `(from:X OR to:X) newer_than:Nd`, then fetches
//! each message with `format=full`, walking MIME parts for a text body
//! (text/plain preferred over text/html) and collecting attachment refs.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{api_error, GoogleApiError};
use crate::http::{send_with_retry, RetryPolicy};

const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// At most this many attachments are fetched per message.
pub const MAX_ATTACHMENTS_PER_MESSAGE: usize = 5;

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    #[serde(default)]
    data: Option<String>,
}

// ============================================================================
// Public types
// ============================================================================

/// Reference to an attachment on a fetched message.
#[derive(Debug, Clone)]
pub struct EmailAttachmentRef {
    pub message_id: String,
    pub attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

/// A fetched email relevant to an attendee.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub snippet: String,
    pub body: Option<String>,
    pub attachments: Vec<EmailAttachmentRef>,
}

// ============================================================================
// Client
// ============================================================================

pub struct GmailClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GmailClient {
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

    /// Search recent mail exchanged with one address.
    ///
    /// Individual message fetch failures are logged and skipped; results are
    /// deduplicated by message id.
    pub async fn search_with_person(
        &self,
        access_token: &str,
        person_email: &str,
        days_back: i64,
        max_results: u32,
    ) -> Result<Vec<EmailMessage>, GoogleApiError> {
        let query = format!(
            "(from:{} OR to:{}) newer_than:{}d",
            person_email, person_email, days_back
        );

        let resp = send_with_retry(
            self.client
                .get(format!("{}/users/me/messages", self.base_url))
                .bearer_auth(access_token)
                .query(&[
                    ("q", query.as_str()),
                    ("maxResults", &max_results.to_string()),
                ]),
            &RetryPolicy::default(),
        )
        .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let list: MessageListResponse = resp.json().await?;

        let mut seen = std::collections::HashSet::new();
        let mut emails = Vec::with_capacity(list.messages.len());
        for stub in &list.messages {
            if !seen.insert(stub.id.clone()) {
                continue;
            }
            match self.fetch_message(access_token, &stub.id).await {
                Ok(email) => emails.push(email),
                Err(GoogleApiError::AuthExpired) => return Err(GoogleApiError::AuthExpired),
                Err(e) => {
                    log::debug!("Skipping message {}: {}", stub.id, e);
                }
            }
        }

        Ok(emails)
    }

    /// Fetch a single message with full body and attachment refs.
    pub async fn fetch_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<EmailMessage, GoogleApiError> {
        let resp = send_with_retry(
            self.client
                .get(format!("{}/users/me/messages/{}", self.base_url, message_id))
                .bearer_auth(access_token)
                .query(&[("format", "full")]),
            &RetryPolicy::default(),
        )
        .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let detail: MessageDetail = resp.json().await?;

        let headers = detail
            .payload
            .as_ref()
            .map(|p| &p.headers[..])
            .unwrap_or(&[]);
        let get_header = |name: &str| -> String {
            headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
                .unwrap_or_default()
        };

        let date = parse_rfc2822(&get_header("Date"));

        let (body, attachments) = match detail.payload.as_ref() {
            Some(payload) => {
                let body = extract_body_text(payload, "text/plain")
                    .or_else(|| extract_body_text(payload, "text/html"));
                let mut attachments = Vec::new();
                collect_attachments(payload, &detail.id, &mut attachments);
                attachments.truncate(MAX_ATTACHMENTS_PER_MESSAGE);
                (body, attachments)
            }
            None => (None, Vec::new()),
        };

        Ok(EmailMessage {
            from: get_header("From"),
            to: get_header("To"),
            subject: get_header("Subject"),
            date,
            snippet: detail.snippet,
            body,
            attachments,
            id: detail.id,
        })
    }

    /// Download an attachment's bytes.
    pub async fn download_attachment(
        &self,
        access_token: &str,
        attachment: &EmailAttachmentRef,
    ) -> Result<Vec<u8>, GoogleApiError> {
        let resp = send_with_retry(
            self.client
                .get(format!(
                    "{}/users/me/messages/{}/attachments/{}",
                    self.base_url, attachment.message_id, attachment.attachment_id
                ))
                .bearer_auth(access_token),
            &RetryPolicy::default(),
        )
        .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let body: AttachmentBody = resp.json().await?;
        let data = body.data.unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&data)
            .map_err(|e| GoogleApiError::ApiError {
                status: 0,
                message: format!("bad attachment encoding: {}", e),
            })
    }
}

/// Recursively walk MIME parts for body data matching the target MIME type.
fn extract_body_text(part: &MessagePart, target_mime: &str) -> Option<String> {
    if part.mime_type == target_mime {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            return decode_url_safe_base64(data);
        }
    }
    for child in &part.parts {
        if let Some(text) = extract_body_text(child, target_mime) {
            return Some(text);
        }
    }
    None
}

/// Collect parts that carry a filename and an attachment id.
fn collect_attachments(part: &MessagePart, message_id: &str, out: &mut Vec<EmailAttachmentRef>) {
    if !part.filename.is_empty() {
        if let Some(body) = part.body.as_ref() {
            if let Some(attachment_id) = body.attachment_id.as_deref() {
                out.push(EmailAttachmentRef {
                    message_id: message_id.to_string(),
                    attachment_id: attachment_id.to_string(),
                    filename: part.filename.clone(),
                    mime_type: part.mime_type.clone(),
                    size: body.size,
                });
            }
        }
    }
    for child in &part.parts {
        collect_attachments(child, message_id, out);
    }
}

/// Decode URL-safe base64 (no padding) as used by the Gmail API.
fn decode_url_safe_base64(data: &str) -> Option<String> {
    match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data) {
        Ok(bytes) => String::from_utf8(bytes).ok(),
        Err(_) => None,
    }
}

fn parse_rfc2822(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s)
    }

    fn full_message_json(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "snippet": "About the renewal...",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "From", "value": "Sam <sam@partner.io>"},
                    {"name": "To", "value": "jordan@acme.com"},
                    {"name": "Subject", "value": "Renewal timeline"},
                    {"name": "Date", "value": "Fri, 28 Aug 2026 09:15:00 +0000"}
                ],
                "parts": [
                    {
                        "mimeType": "text/plain",
                        "body": {"data": b64("Can we confirm pricing by Friday?")}
                    },
                    {
                        "mimeType": "application/pdf",
                        "filename": "contract.pdf",
                        "body": {"attachmentId": "att-1", "size": 1024}
                    }
                ]
            }
        })
    }

    #[test]
    fn test_extract_body_prefers_text_plain() {
        let part: MessagePart = serde_json::from_value(serde_json::json!({
            "mimeType": "multipart/alternative",
            "parts": [
                {"mimeType": "text/html", "body": {"data": b64("<p>html</p>")}},
                {"mimeType": "text/plain", "body": {"data": b64("plain")}}
            ]
        }))
        .unwrap();
        assert_eq!(extract_body_text(&part, "text/plain").as_deref(), Some("plain"));
    }

    #[test]
    fn test_parse_rfc2822_date() {
        let date = parse_rfc2822("Fri, 28 Aug 2026 09:15:00 +0200").unwrap();
        assert_eq!(date.to_rfc3339(), "2026-08-28T07:15:00+00:00");
        assert!(parse_rfc2822("").is_none());
        assert!(parse_rfc2822("not a date").is_none());
    }

    #[tokio::test]
    async fn test_search_with_person_builds_query_and_parses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .and(query_param(
                "q",
                "(from:sam@partner.io OR to:sam@partner.io) newer_than:30d",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "m1"}, {"id": "m1"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages/m1"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(full_message_json("m1")))
            .expect(1)
            .mount(&server)
            .await;

        let client = GmailClient::new().with_base_url(server.uri());
        let emails = client
            .search_with_person("tok", "sam@partner.io", 30, 10)
            .await
            .unwrap();

        assert_eq!(emails.len(), 1, "duplicate stubs collapse to one message");
        let email = &emails[0];
        assert_eq!(email.subject, "Renewal timeline");
        assert_eq!(
            email.body.as_deref(),
            Some("Can we confirm pricing by Friday?")
        );
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].filename, "contract.pdf");
    }

    #[tokio::test]
    async fn test_search_unauthorized_maps_to_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = GmailClient::new().with_base_url(server.uri());
        let err = client
            .search_with_person("tok", "sam@partner.io", 30, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, GoogleApiError::AuthExpired));
    }

    #[tokio::test]
    async fn test_download_attachment_decodes_base64() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages/m1/attachments/att-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "size": 8,
                "data": b64("contents")
            })))
            .mount(&server)
            .await;

        let client = GmailClient::new().with_base_url(server.uri());
        let attachment = EmailAttachmentRef {
            message_id: "m1".to_string(),
            attachment_id: "att-1".to_string(),
            filename: "contract.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size: 8,
        };
        let bytes = client.download_attachment("tok", &attachment).await.unwrap();
        assert_eq!(bytes, b"contents");
    }

    #[tokio::test]
    async fn test_empty_search_returns_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = GmailClient::new().with_base_url(server.uri());
        let emails = client
            .search_with_person("tok", "sam@partner.io", 30, 10)
            .await
            .unwrap();
        assert!(emails.is_empty());
    }
}

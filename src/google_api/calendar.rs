//! Google Calendar API v3 — meeting fetch and attachment listing.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::{api_error, GoogleApiError};
use crate::http::{send_with_retry, RetryPolicy};
use crate::types::{Meeting, MeetingAttendee, ResponseStatus};

const BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<EventRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    #[serde(default)]
    attendees: Vec<AttendeeRaw>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    hangout_link: Option<String>,
    #[serde(default)]
    conference_data: Option<ConferenceData>,
    #[serde(default)]
    attachments: Vec<AttachmentRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendeeRaw {
    #[serde(default)]
    email: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    response_status: Option<String>,
    #[serde(default)]
    resource: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConferenceData {
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPoint {
    #[serde(default)]
    entry_point_type: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentRaw {
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

/// A Drive file attached to a calendar event.
#[derive(Debug, Clone)]
pub struct EventAttachment {
    pub file_id: String,
    pub title: String,
    pub mime_type: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

pub struct CalendarClient {
    client: reqwest::Client,
    base_url: String,
    drive_url: String,
}

impl Default for CalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
            drive_url: "https://www.googleapis.com/drive/v3".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_urls(mut self, base_url: String, drive_url: String) -> Self {
        self.base_url = base_url;
        self.drive_url = drive_url;
        self
    }

    /// Fetch upcoming timed meetings from the primary calendar.
    ///
    /// All-day entries (no `dateTime`) and cancelled events are skipped.
    pub async fn list_upcoming(
        &self,
        access_token: &str,
        days_ahead: i64,
        max_results: u32,
    ) -> Result<Vec<Meeting>, GoogleApiError> {
        let time_min = Utc::now().to_rfc3339();
        let time_max = (Utc::now() + Duration::days(days_ahead)).to_rfc3339();

        let resp = send_with_retry(
            self.client
                .get(format!("{}/calendars/primary/events", self.base_url))
                .bearer_auth(access_token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", &max_results.to_string()),
                ]),
            &RetryPolicy::default(),
        )
        .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let body: EventListResponse = resp.json().await?;
        Ok(body.items.into_iter().filter_map(parse_event).collect())
    }

    /// Fetch a single event by id. `Ok(None)` when the event is all-day
    /// (no usable start/end) or cancelled.
    pub async fn get_meeting(
        &self,
        access_token: &str,
        event_id: &str,
    ) -> Result<Option<Meeting>, GoogleApiError> {
        let resp = send_with_retry(
            self.client
                .get(format!(
                    "{}/calendars/primary/events/{}",
                    self.base_url, event_id
                ))
                .bearer_auth(access_token),
            &RetryPolicy::default(),
        )
        .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let raw: EventRaw = resp.json().await?;
        Ok(parse_event(raw))
    }

    /// List Drive attachments on an event.
    pub async fn event_attachments(
        &self,
        access_token: &str,
        event_id: &str,
    ) -> Result<Vec<EventAttachment>, GoogleApiError> {
        let resp = send_with_retry(
            self.client
                .get(format!(
                    "{}/calendars/primary/events/{}",
                    self.base_url, event_id
                ))
                .bearer_auth(access_token)
                .query(&[("fields", "attachments")]),
            &RetryPolicy::default(),
        )
        .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let raw: EventRaw = resp.json().await?;
        Ok(raw
            .attachments
            .into_iter()
            .filter_map(|a| {
                Some(EventAttachment {
                    file_id: a.file_id?,
                    title: a.title.unwrap_or_else(|| "untitled".to_string()),
                    mime_type: a.mime_type,
                })
            })
            .collect())
    }

    /// Download a Drive file's content.
    pub async fn download_drive_file(
        &self,
        access_token: &str,
        file_id: &str,
    ) -> Result<Vec<u8>, GoogleApiError> {
        let resp = send_with_retry(
            self.client
                .get(format!("{}/files/{}", self.drive_url, file_id))
                .bearer_auth(access_token)
                .query(&[("alt", "media")]),
            &RetryPolicy::default(),
        )
        .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Normalize a raw event. Returns None for cancelled or all-day events.
fn parse_event(raw: EventRaw) -> Option<Meeting> {
    if raw.status.as_deref() == Some("cancelled") {
        return None;
    }

    let start_time = parse_datetime_str(raw.start.as_ref()?.date_time.as_deref()?)?;
    let end_time = raw
        .end
        .as_ref()
        .and_then(|e| e.date_time.as_deref())
        .and_then(parse_datetime_str)
        .unwrap_or(start_time);

    let attendees = raw
        .attendees
        .into_iter()
        .filter(|a| a.resource != Some(true) && !a.email.is_empty())
        .map(|a| MeetingAttendee {
            email: a.email,
            name: a.display_name,
            response_status: a
                .response_status
                .as_deref()
                .map(ResponseStatus::parse)
                .unwrap_or(ResponseStatus::Unknown),
        })
        .collect();

    let meeting_link = raw.hangout_link.or_else(|| {
        raw.conference_data.and_then(|c| {
            c.entry_points
                .into_iter()
                .find(|e| e.entry_point_type.as_deref() == Some("video"))
                .and_then(|e| e.uri)
        })
    });

    Some(Meeting {
        id: raw.id,
        title: raw
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Untitled Meeting".to_string()),
        description: raw.description,
        start_time,
        end_time,
        attendees,
        location: raw.location,
        meeting_link,
    })
}

fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

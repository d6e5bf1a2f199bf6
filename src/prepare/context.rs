//! Context aggregation: pull everything relevant to a meeting from the
//! connected providers into one bundle.
//!
//! The Gmail, Slack, and calendar-attachment gathers run concurrently,
//! each under its own timeout. A provider that errors or times out
//! contributes a source-error string to the bundle instead of failing the
//! request; a provider with zero matches contributes nothing at all.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::extract::{self, ExtractError, MAX_FILE_BYTES};
use crate::google_api::calendar::CalendarClient;
use crate::google_api::gmail::{EmailMessage, GmailClient};
use crate::google_api::GoogleApiError;
use crate::slack_api::{SlackApiError, SlackClient, SlackMessage};
use crate::types::{Meeting, MeetingAttendee, RequestContext};

use super::relevance::title_keywords;

/// Per-attendee result caps, matching the search APIs' useful page sizes.
const EMAILS_PER_ATTENDEE: u32 = 20;
const SLACK_SEARCH_COUNT: u32 = 30;
const DM_HISTORY_LIMIT: u32 = 50;
const TITLE_SEARCH_COUNT: u32 = 20;
const MAX_CALENDAR_ATTACHMENTS: usize = 10;

/// Where an extracted document came from, for prompt attribution.
#[derive(Debug, Clone)]
pub enum DocumentOrigin {
    EmailAttachment { subject: String },
    SlackFile { channel: String },
    CalendarAttachment,
}

impl DocumentOrigin {
    pub fn label(&self) -> String {
        match self {
            DocumentOrigin::EmailAttachment { subject } => {
                format!("email attachment ({})", subject)
            }
            DocumentOrigin::SlackFile { channel } => format!("slack file ({})", channel),
            DocumentOrigin::CalendarAttachment => "calendar attachment".to_string(),
        }
    }
}

/// Text successfully pulled out of a shared file.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub filename: String,
    pub text: String,
    pub origin: DocumentOrigin,
}

/// Everything gathered for one meeting. Ephemeral: built per request,
/// never persisted.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub meeting: Meeting,
    pub internal_domain: String,
    /// Attendee addresses whose domain differs from the caller's.
    pub external_attendees: Vec<String>,
    pub emails: Vec<EmailMessage>,
    pub slack_messages: Vec<SlackMessage>,
    pub documents: Vec<ExtractedDocument>,
    /// Per-provider failures (timeouts, auth rejections mid-request).
    pub source_errors: Vec<String>,
    /// Non-fatal notes, e.g. oversized attachments that were skipped.
    pub warnings: Vec<String>,
    pub gathered_at: DateTime<Utc>,
}

impl ContextBundle {
    pub fn new(meeting: Meeting, internal_domain: &str) -> Self {
        let external_attendees = meeting
            .attendees
            .iter()
            .filter(|a| !a.domain().is_empty() && a.domain() != internal_domain)
            .map(|a| a.email.clone())
            .collect();
        Self {
            meeting,
            internal_domain: internal_domain.to_string(),
            external_attendees,
            emails: Vec::new(),
            slack_messages: Vec::new(),
            documents: Vec::new(),
            source_errors: Vec::new(),
            warnings: Vec::new(),
            gathered_at: Utc::now(),
        }
    }

    pub fn has_external_attendees(&self) -> bool {
        !self.external_attendees.is_empty()
    }
}

/// Guess a display name from an address: `sam.rivera2@` becomes
/// "Sam Rivera". Empty when nothing name-like survives.
pub fn name_guess(attendee: &MeetingAttendee) -> Option<String> {
    if let Some(name) = &attendee.name {
        if !name.trim().is_empty() {
            return Some(name.trim().to_string());
        }
    }
    let cleaned: String = attendee
        .local_part()
        .chars()
        .map(|c| if c == '.' || c == '_' || c == '-' { ' ' } else { c })
        .filter(|c| !c.is_ascii_digit())
        .collect();
    let titled: Vec<String> = cleaned
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    let joined = titled.join(" ");
    if joined.len() >= 2 {
        Some(joined)
    } else {
        None
    }
}

pub struct ContextAggregator {
    gmail: GmailClient,
    slack: SlackClient,
    calendar: CalendarClient,
    email_days_back: i64,
    slack_days_back: i64,
    provider_timeout: Duration,
}

impl ContextAggregator {
    pub fn new(email_days_back: i64, slack_days_back: i64, provider_timeout: Duration) -> Self {
        Self {
            gmail: GmailClient::new(),
            slack: SlackClient::new(),
            calendar: CalendarClient::new(),
            email_days_back,
            slack_days_back,
            provider_timeout,
        }
    }

    #[cfg(test)]
    pub fn with_clients(mut self, gmail: GmailClient, slack: SlackClient) -> Self {
        self.gmail = gmail;
        self.slack = slack;
        self
    }

    #[cfg(test)]
    pub fn with_calendar(mut self, calendar: CalendarClient) -> Self {
        self.calendar = calendar;
        self
    }

    /// Gather all context for a meeting. A `None` token means the provider
    /// is not connected and is skipped here; the caller records the
    /// not-connected note.
    pub async fn gather(
        &self,
        meeting: &Meeting,
        ctx: &RequestContext,
        google_token: Option<&str>,
        slack_token: Option<&str>,
    ) -> ContextBundle {
        let mut bundle = ContextBundle::new(meeting.clone(), &ctx.internal_domain());
        let correspondents: Vec<&MeetingAttendee> = meeting
            .attendees
            .iter()
            .filter(|a| !a.email.eq_ignore_ascii_case(&ctx.user_email))
            .collect();

        let email_gather = async {
            match google_token {
                Some(token) => Some(
                    self.bounded("gmail", self.gather_email(token, &correspondents))
                        .await,
                ),
                None => None,
            }
        };
        let slack_gather = async {
            match slack_token {
                Some(token) => Some(
                    self.bounded(
                        "slack",
                        self.gather_slack(token, &correspondents, &meeting.title),
                    )
                    .await,
                ),
                None => None,
            }
        };
        let calendar_gather = async {
            match google_token {
                Some(token) => Some(
                    self.bounded("calendar", self.gather_calendar_docs(token, &meeting.id))
                        .await,
                ),
                None => None,
            }
        };

        let (email_res, slack_res, calendar_res) =
            tokio::join!(email_gather, slack_gather, calendar_gather);

        match email_res {
            Some(Ok((emails, docs, warnings))) => {
                bundle.emails = emails;
                bundle.documents.extend(docs);
                bundle.warnings.extend(warnings);
            }
            Some(Err(e)) => bundle.source_errors.push(e),
            None => {}
        }
        match slack_res {
            Some(Ok((messages, docs, warnings))) => {
                bundle.slack_messages = messages;
                bundle.documents.extend(docs);
                bundle.warnings.extend(warnings);
            }
            Some(Err(e)) => bundle.source_errors.push(e),
            None => {}
        }
        match calendar_res {
            Some(Ok((docs, warnings))) => {
                bundle.documents.extend(docs);
                bundle.warnings.extend(warnings);
            }
            Some(Err(e)) => bundle.source_errors.push(e),
            None => {}
        }

        log::info!(
            "Gathered context for \"{}\": {} emails, {} messages, {} documents, {} source errors",
            meeting.title,
            bundle.emails.len(),
            bundle.slack_messages.len(),
            bundle.documents.len(),
            bundle.source_errors.len()
        );
        bundle
    }

    async fn bounded<T>(
        &self,
        source: &str,
        fut: impl std::future::Future<Output = Result<T, String>>,
    ) -> Result<T, String> {
        match tokio::time::timeout(self.provider_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "{}: timed out after {:?}",
                source, self.provider_timeout
            )),
        }
    }

    async fn gather_email(
        &self,
        token: &str,
        correspondents: &[&MeetingAttendee],
    ) -> Result<(Vec<EmailMessage>, Vec<ExtractedDocument>, Vec<String>), String> {
        let mut emails: Vec<EmailMessage> = Vec::new();
        let mut seen = HashSet::new();

        for attendee in correspondents {
            let found = self
                .gmail
                .search_with_person(token, &attendee.email, self.email_days_back, EMAILS_PER_ATTENDEE)
                .await
                .map_err(|e| google_source_error(&e))?;
            for email in found {
                if seen.insert(email.id.clone()) {
                    emails.push(email);
                }
            }
        }
        emails.sort_by(|a, b| b.date.cmp(&a.date));

        let mut documents = Vec::new();
        let mut warnings = Vec::new();
        for email in &emails {
            for att in &email.attachments {
                if att.size as usize > MAX_FILE_BYTES {
                    warnings.push(oversize_warning(&att.filename, att.size));
                    continue;
                }
                let bytes = match self.gmail.download_attachment(token, att).await {
                    Ok(b) => b,
                    Err(e) => {
                        log::debug!("Attachment {} download failed: {}", att.filename, e);
                        continue;
                    }
                };
                match extract::extract_from_bytes(&bytes, &att.filename) {
                    Ok(Some(text)) => documents.push(ExtractedDocument {
                        filename: att.filename.clone(),
                        text,
                        origin: DocumentOrigin::EmailAttachment {
                            subject: email.subject.clone(),
                        },
                    }),
                    Ok(None) => {}
                    Err(ExtractError::TooLarge { filename, size }) => {
                        warnings.push(oversize_warning(&filename, size as u64));
                    }
                    Err(e) => log::debug!("Extraction failed for {}: {}", att.filename, e),
                }
            }
        }

        Ok((emails, documents, warnings))
    }

    async fn gather_slack(
        &self,
        token: &str,
        correspondents: &[&MeetingAttendee],
        meeting_title: &str,
    ) -> Result<(Vec<SlackMessage>, Vec<ExtractedDocument>, Vec<String>), String> {
        let mut messages: Vec<SlackMessage> = Vec::new();
        let mut seen = HashSet::new();
        let mut push_all = |found: Vec<SlackMessage>, messages: &mut Vec<SlackMessage>| {
            for msg in found {
                if seen.insert(msg.ts.clone()) {
                    messages.push(msg);
                }
            }
        };

        for attendee in correspondents {
            let mut queries = vec![attendee.email.clone()];
            if let Some(name) = name_guess(attendee) {
                queries.push(name.clone());
                if let Some(first) = name.split_whitespace().next() {
                    if first.len() > 2 && first != name {
                        queries.push(first.to_string());
                    }
                }
            }
            for query in &queries {
                let found = self
                    .slack
                    .search_messages(token, query, SLACK_SEARCH_COUNT)
                    .await
                    .map_err(|e| slack_source_error(&e))?;
                push_all(found, &mut messages);
            }

            // conversations.history is the only API that reliably carries
            // shared files, so DMs are fetched even when search found them.
            let dms = self
                .slack
                .dm_history(token, &attendee.email, self.slack_days_back, DM_HISTORY_LIMIT)
                .await
                .map_err(|e| slack_source_error(&e))?;
            push_all(dms, &mut messages);
        }

        for keyword in title_keywords(meeting_title).iter().take(3) {
            let found = self
                .slack
                .search_messages(token, keyword, TITLE_SEARCH_COUNT)
                .await
                .map_err(|e| slack_source_error(&e))?;
            push_all(found, &mut messages);
        }

        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut documents = Vec::new();
        let mut warnings = Vec::new();
        for msg in &messages {
            for file in &msg.files {
                let Some(url) = &file.url_private else { continue };
                if file.size as usize > MAX_FILE_BYTES {
                    warnings.push(oversize_warning(&file.name, file.size));
                    continue;
                }
                let bytes = match self.slack.download_file(token, url).await {
                    Ok(b) => b,
                    Err(e) => {
                        log::debug!("Slack file {} download failed: {}", file.name, e);
                        continue;
                    }
                };
                match extract::extract_from_bytes(&bytes, &file.name) {
                    Ok(Some(text)) => documents.push(ExtractedDocument {
                        filename: file.name.clone(),
                        text,
                        origin: DocumentOrigin::SlackFile {
                            channel: msg.channel_name.clone(),
                        },
                    }),
                    Ok(None) => {}
                    Err(ExtractError::TooLarge { filename, size }) => {
                        warnings.push(oversize_warning(&filename, size as u64));
                    }
                    Err(e) => log::debug!("Extraction failed for {}: {}", file.name, e),
                }
            }
        }

        Ok((messages, documents, warnings))
    }

    async fn gather_calendar_docs(
        &self,
        token: &str,
        event_id: &str,
    ) -> Result<(Vec<ExtractedDocument>, Vec<String>), String> {
        let attachments = self
            .calendar
            .event_attachments(token, event_id)
            .await
            .map_err(|e| google_source_error(&e))?;

        let mut documents = Vec::new();
        let mut warnings = Vec::new();
        for att in attachments.iter().take(MAX_CALENDAR_ATTACHMENTS) {
            let bytes = match self.calendar.download_drive_file(token, &att.file_id).await {
                Ok(b) => b,
                Err(e) => {
                    log::debug!("Drive file {} download failed: {}", att.title, e);
                    continue;
                }
            };
            match extract::extract_from_bytes(&bytes, &att.title) {
                Ok(Some(text)) => documents.push(ExtractedDocument {
                    filename: att.title.clone(),
                    text,
                    origin: DocumentOrigin::CalendarAttachment,
                }),
                Ok(None) => {}
                Err(ExtractError::TooLarge { filename, size }) => {
                    warnings.push(oversize_warning(&filename, size as u64));
                }
                Err(e) => log::debug!("Extraction failed for {}: {}", att.title, e),
            }
        }
        Ok((documents, warnings))
    }
}

fn google_source_error(e: &GoogleApiError) -> String {
    match e {
        GoogleApiError::AuthExpired => "google: reconnect required".to_string(),
        other => format!("google: {}", other),
    }
}

fn slack_source_error(e: &SlackApiError) -> String {
    match e {
        SlackApiError::AuthExpired => "slack: reconnect required".to_string(),
        other => format!("slack: {}", other),
    }
}

fn oversize_warning(filename: &str, size: u64) -> String {
    format!(
        "Skipped attachment {} ({} bytes): larger than the {} MB limit",
        filename,
        size,
        MAX_FILE_BYTES / (1024 * 1024)
    )
}

//! Core domain types: meetings, attendees, connection status, and the
//! generated prep document.
//!
//! `PrepDocument` is a tagged enum — the `format` field discriminates the
//! full structured shape from the flat fallback shape produced when the
//! completion endpoint returns something unparseable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which third-party account a credential or context source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Slack,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Slack => "slack",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "google" => Some(Provider::Google),
            "slack" => Some(Provider::Slack),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request caller identity. Passed explicitly through every layer —
/// nothing in the crate holds a process-global notion of "the current user".
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: String,
    /// The caller's own address; its domain defines "internal".
    pub user_email: String,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, user_email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_email: user_email.into(),
        }
    }

    /// Lowercased domain of the caller's address, empty if malformed.
    pub fn internal_domain(&self) -> String {
        self.user_email
            .split('@')
            .nth(1)
            .unwrap_or("")
            .to_lowercase()
    }
}

/// RSVP state from the calendar provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Accepted,
    Declined,
    Tentative,
    NeedsAction,
    Unknown,
}

impl ResponseStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "accepted" => ResponseStatus::Accepted,
            "declined" => ResponseStatus::Declined,
            "tentative" => ResponseStatus::Tentative,
            "needsAction" => ResponseStatus::NeedsAction,
            _ => ResponseStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingAttendee {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_response_status")]
    pub response_status: ResponseStatus,
}

fn default_response_status() -> ResponseStatus {
    ResponseStatus::Unknown
}

impl MeetingAttendee {
    /// The part before the `@`, lowercased. Used for correspondent search.
    pub fn local_part(&self) -> String {
        self.email.split('@').next().unwrap_or("").to_lowercase()
    }

    /// Lowercased domain, empty if the address has no `@`.
    pub fn domain(&self) -> String {
        self.email.split('@').nth(1).unwrap_or("").to_lowercase()
    }
}

/// A normalized calendar meeting. Never persisted — fetched per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub attendees: Vec<MeetingAttendee>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_link: Option<String>,
}

/// Which providers the user currently has stored credentials for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub google_connected: bool,
    pub slack_connected: bool,
}

// ============================================================================
// Prep document
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscussionPoint {
    pub point: String,
    /// Where the point came from, e.g. "email", "slack", "document".
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_priority")]
    pub priority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentInsight {
    pub document: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgendaItem {
    pub item: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferencedSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

fn default_priority() -> String {
    "medium".to_string()
}

/// Counts describing what went into a generated prep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextStats {
    pub emails_analyzed: usize,
    pub slack_messages_analyzed: usize,
    pub documents_analyzed: usize,
    pub items_included: usize,
    pub items_excluded: usize,
}

/// The generated prep. `format` discriminates the two shapes: `enhanced`
/// is the structured output of a successful completion; `legacy` is the
/// flat shape synthesized locally when the completion response cannot be
/// parsed (and also the historical storage shape, still readable).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum PrepDocument {
    Enhanced {
        context_summary: String,
        #[serde(default)]
        key_discussion_points: Vec<DiscussionPoint>,
        #[serde(default)]
        relationship_notes: Vec<String>,
        #[serde(default)]
        document_insights: Vec<DocumentInsight>,
        #[serde(default)]
        suggested_agenda: Vec<AgendaItem>,
        #[serde(default)]
        questions_to_ask: Vec<String>,
        #[serde(default)]
        action_items: Vec<String>,
        #[serde(default)]
        referenced_sources: Vec<ReferencedSource>,
        #[serde(default)]
        context_stats: ContextStats,
        #[serde(default)]
        has_external_attendees: bool,
        #[serde(default)]
        warnings: Vec<String>,
        generated_at: DateTime<Utc>,
    },
    Legacy {
        context_summary: String,
        #[serde(default)]
        key_points: Vec<String>,
        #[serde(default)]
        suggested_agenda: Vec<String>,
        #[serde(default)]
        action_items: Vec<String>,
        generated_at: DateTime<Utc>,
    },
}

impl PrepDocument {
    pub fn generated_at(&self) -> DateTime<Utc> {
        match self {
            PrepDocument::Enhanced { generated_at, .. }
            | PrepDocument::Legacy { generated_at, .. } => *generated_at,
        }
    }

    pub fn context_summary(&self) -> &str {
        match self {
            PrepDocument::Enhanced {
                context_summary, ..
            }
            | PrepDocument::Legacy {
                context_summary, ..
            } => context_summary,
        }
    }

    /// Render the prep as markdown for display or export.
    pub fn to_markdown(&self, meeting_title: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Prep: {}\n\n", meeting_title));
        match self {
            PrepDocument::Enhanced {
                context_summary,
                key_discussion_points,
                relationship_notes,
                document_insights,
                suggested_agenda,
                questions_to_ask,
                action_items,
                warnings,
                generated_at,
                ..
            } => {
                out.push_str(context_summary);
                out.push('\n');
                if !key_discussion_points.is_empty() {
                    out.push_str("\n## Key discussion points\n");
                    for p in key_discussion_points {
                        out.push_str(&format!(
                            "- **[{}]** {} ({})\n",
                            p.priority, p.point, p.source
                        ));
                    }
                }
                if !relationship_notes.is_empty() {
                    out.push_str("\n## Relationship notes\n");
                    for n in relationship_notes {
                        out.push_str(&format!("- {}\n", n));
                    }
                }
                if !document_insights.is_empty() {
                    out.push_str("\n## Document insights\n");
                    for d in document_insights {
                        out.push_str(&format!("### {}\n", d.document));
                        for f in &d.key_findings {
                            out.push_str(&format!("- {}\n", f));
                        }
                        for m in &d.metrics {
                            out.push_str(&format!("- metric: {}\n", m));
                        }
                    }
                }
                if !suggested_agenda.is_empty() {
                    out.push_str("\n## Suggested agenda\n");
                    for a in suggested_agenda {
                        match &a.duration {
                            Some(d) => out.push_str(&format!("1. {} ({})\n", a.item, d)),
                            None => out.push_str(&format!("1. {}\n", a.item)),
                        }
                    }
                }
                if !questions_to_ask.is_empty() {
                    out.push_str("\n## Questions to ask\n");
                    for q in questions_to_ask {
                        out.push_str(&format!("- {}\n", q));
                    }
                }
                if !action_items.is_empty() {
                    out.push_str("\n## Action items\n");
                    for a in action_items {
                        out.push_str(&format!("- [ ] {}\n", a));
                    }
                }
                if !warnings.is_empty() {
                    out.push_str("\n## Warnings\n");
                    for w in warnings {
                        out.push_str(&format!("- {}\n", w));
                    }
                }
                out.push_str(&format!("\n_Generated {}_\n", generated_at.to_rfc3339()));
            }
            PrepDocument::Legacy {
                context_summary,
                key_points,
                suggested_agenda,
                action_items,
                generated_at,
            } => {
                out.push_str(context_summary);
                out.push('\n');
                if !key_points.is_empty() {
                    out.push_str("\n## Key points\n");
                    for p in key_points {
                        out.push_str(&format!("- {}\n", p));
                    }
                }
                if !suggested_agenda.is_empty() {
                    out.push_str("\n## Suggested agenda\n");
                    for a in suggested_agenda {
                        out.push_str(&format!("1. {}\n", a));
                    }
                }
                if !action_items.is_empty() {
                    out.push_str("\n## Action items\n");
                    for a in action_items {
                        out.push_str(&format!("- [ ] {}\n", a));
                    }
                }
                out.push_str(&format!("\n_Generated {}_\n", generated_at.to_rfc3339()));
            }
        }
        out
    }
}

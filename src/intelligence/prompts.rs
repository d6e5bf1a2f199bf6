//! Prompt assembly for prep generation.
//!
//! The user prompt embeds pre-extracted insights ahead of the raw
//! excerpts so the model sees the high-signal material first, and every
//! excerpt is clipped: 10 emails at 500 chars, 15 chat messages at 300,
//! 5 documents at 1500.

use crate::extract::extract_key_metrics;
use crate::prepare::context::ContextBundle;
use crate::prepare::relevance::ContextAnalysis;
use crate::slack_api::ChannelType;

const MAX_PROMPT_EMAILS: usize = 10;
const MAX_PROMPT_MESSAGES: usize = 15;
const MAX_PROMPT_DOCUMENTS: usize = 5;
const EMAIL_EXCERPT_CHARS: usize = 500;
const MESSAGE_EXCERPT_CHARS: usize = 300;
const DOCUMENT_EXCERPT_CHARS: usize = 1500;

pub const SYSTEM_PROMPT: &str = r#"You are an intelligent executive assistant preparing meeting briefs.

CONTEXT ANALYSIS RULES:
1. Analyze all provided context (messages, emails, documents)
2. Identify direct topic relevance and prioritize accordingly
3. Surface relationship dynamics (health concerns, commitments, blockers)
4. Extract key data from documents (numbers, decisions, changes)
5. Note outstanding action items and unanswered questions
6. Identify potential concerns or risks

OUTPUT REQUIREMENTS:
Your response must be valid JSON with this exact structure:
{
    "context_summary": "2-3 sentence executive summary including key document insights",
    "key_discussion_points": [
        {"point": "specific discussion point", "source": "Email/Slack/Document name", "priority": "high/medium/low"}
    ],
    "relationship_notes": [
        "Note about attendee health, availability, stress level, etc."
    ],
    "document_insights": [
        {"document": "filename", "key_findings": ["important finding"], "metrics": ["$2.4M revenue", "8% decline"]}
    ],
    "suggested_agenda": [
        {"item": "agenda item", "duration": "10 min", "priority": "high/medium/low"}
    ],
    "questions_to_ask": [
        "Specific, actionable question based on context"
    ],
    "action_items": [
        "Outstanding action item with owner if known"
    ],
    "referenced_sources": [
        {"type": "email/slack/document", "title": "source title", "date": "date if available"}
    ],
    "warnings": [
        "Any concerning trends or issues to be aware of"
    ]
}

IMPORTANT GUIDELINES:
- Be SPECIFIC: reference actual conversations, documents, and data
- Include NUMBERS and METRICS from documents when available
- Flag concerning trends (revenue decline, deadline risks, etc.)
- Note any blockers or dependencies that could affect the meeting
- Surface relationship context (someone not feeling well, stressed, etc.)
- Prioritize actionable intelligence over generic summaries
- For external attendee meetings, keep content professional and public-appropriate
"#;

/// Clip to at most `max` characters on a char boundary, appending an
/// ellipsis when anything was dropped.
fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max).collect();
    format!("{}...", clipped)
}

pub fn build_user_prompt(bundle: &ContextBundle, analysis: &ContextAnalysis) -> String {
    let meeting = &bundle.meeting;
    let mut parts: Vec<String> = Vec::new();

    parts.push("## MEETING DETAILS".to_string());
    parts.push(format!("Title: {}", meeting.title));
    parts.push(format!(
        "Time: {}",
        meeting.start_time.format("%B %d, %Y at %H:%M UTC")
    ));
    let duration_min = (meeting.end_time - meeting.start_time).num_minutes().max(0);
    parts.push(format!("Duration: {} minutes", duration_min));
    if let Some(desc) = &meeting.description {
        parts.push(format!("Description: {}", desc));
    }

    parts.push("\n## ATTENDEES".to_string());
    for attendee in &meeting.attendees {
        let name = attendee.name.as_deref().unwrap_or(&attendee.email);
        parts.push(format!("- {} ({:?})", name, attendee.response_status));
    }
    if bundle.has_external_attendees() {
        parts.push(format!(
            "\n**External Attendees**: {}",
            bundle.external_attendees.join(", ")
        ));
        parts.push(
            "*Note: Content has been filtered for external attendee appropriateness*".to_string(),
        );
    }

    let insights = &analysis.insights;
    if !insights.blockers.is_empty() {
        parts.push("\n## IDENTIFIED BLOCKERS".to_string());
        for blocker in insights.blockers.iter().take(5) {
            parts.push(format!("- {}", blocker));
        }
    }
    if !insights.commitments.is_empty() {
        parts.push("\n## OUTSTANDING COMMITMENTS".to_string());
        for commitment in insights.commitments.iter().take(5) {
            parts.push(format!("- {}", commitment));
        }
    }
    if !insights.questions.is_empty() {
        parts.push("\n## UNANSWERED QUESTIONS".to_string());
        for question in insights.questions.iter().take(5) {
            parts.push(format!("- {}", question));
        }
    }
    if !insights.health_mentions.is_empty() {
        parts.push("\n## HEALTH/AVAILABILITY CONCERNS".to_string());
        for mention in insights.health_mentions.iter().take(3) {
            parts.push(format!("- {}", mention));
        }
    }

    if !analysis.emails.is_empty() {
        parts.push("\n## EMAIL CONTEXT".to_string());
        for item in analysis.emails.iter().take(MAX_PROMPT_EMAILS) {
            let email = &bundle.emails[item.index];
            parts.push(format!("\n### [{}] Email: {}", item.tier.label(), email.subject));
            parts.push(format!("From: {}", email.from));
            if let Some(date) = email.date {
                parts.push(format!("Date: {}", date.format("%B %d, %Y")));
            }
            let body = email.body.as_deref().unwrap_or(&email.snippet);
            parts.push(format!("Content: {}", clip(body, EMAIL_EXCERPT_CHARS)));
        }
    }

    if !analysis.slack_messages.is_empty() {
        parts.push("\n## SLACK CONTEXT".to_string());
        for item in analysis.slack_messages.iter().take(MAX_PROMPT_MESSAGES) {
            let msg = &bundle.slack_messages[item.index];
            let channel = match msg.channel_type {
                ChannelType::Dm => "(DM)".to_string(),
                _ => format!("#{}", msg.channel_name),
            };
            let who = if msg.username.is_empty() {
                &msg.user
            } else {
                &msg.username
            };
            parts.push(format!(
                "\n- [{} in {}]: {}",
                who,
                channel,
                clip(&msg.text, MESSAGE_EXCERPT_CHARS)
            ));
        }
    }

    if !bundle.documents.is_empty() {
        parts.push("\n## DOCUMENT EXCERPTS".to_string());
        for doc in bundle.documents.iter().take(MAX_PROMPT_DOCUMENTS) {
            parts.push(format!("\n### Document: {}", doc.filename));
            parts.push(format!("Source: {}", doc.origin.label()));
            parts.push(format!(
                "Content Preview:\n{}",
                clip(&doc.text, DOCUMENT_EXCERPT_CHARS)
            ));
            let metrics = extract_key_metrics(&doc.text);
            if !metrics.is_empty() {
                parts.push(format!(
                    "Key Metrics: {}",
                    metrics.iter().take(5).cloned().collect::<Vec<_>>().join(", ")
                ));
            }
        }
    }

    parts.push(
        "\n\nGenerate a comprehensive meeting prep document based on all this context.".to_string(),
    );
    parts.push("Be specific and reference actual data, conversations, and documents.".to_string());
    parts.push("Flag any concerning trends or issues that should be addressed.".to_string());

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_api::gmail::EmailMessage;
    use crate::prepare::relevance::analyze_bundle;
    use crate::types::{Meeting, MeetingAttendee, ResponseStatus};
    use chrono::{Duration, Utc};

    fn bundle_with_email(body_len: usize) -> ContextBundle {
        let meeting = Meeting {
            id: "m1".to_string(),
            title: "Aurora budget review".to_string(),
            description: Some("Quarterly numbers".to_string()),
            start_time: Utc::now(),
            end_time: Utc::now() + Duration::minutes(30),
            attendees: vec![
                MeetingAttendee {
                    email: "pat@acme.com".to_string(),
                    name: Some("Pat Lee".to_string()),
                    response_status: ResponseStatus::Accepted,
                },
                MeetingAttendee {
                    email: "sam@vendor.io".to_string(),
                    name: None,
                    response_status: ResponseStatus::Tentative,
                },
            ],
            location: None,
            meeting_link: None,
        };
        let mut bundle = ContextBundle::new(meeting, "acme.com");
        bundle.emails.push(EmailMessage {
            id: "e1".to_string(),
            from: "pat@acme.com".to_string(),
            to: "me@acme.com".to_string(),
            subject: "Aurora budget numbers".to_string(),
            date: Some(Utc::now() - Duration::days(1)),
            snippet: String::new(),
            body: Some("aurora budget revenue is $2.4M. ".repeat(body_len / 32 + 1)),
            attachments: vec![],
        });
        bundle
    }

    #[test]
    fn test_prompt_sections_and_external_note() {
        let bundle = bundle_with_email(100);
        let analysis = analyze_bundle(&bundle, Utc::now());
        let prompt = build_user_prompt(&bundle, &analysis);

        assert!(prompt.contains("## MEETING DETAILS"));
        assert!(prompt.contains("Title: Aurora budget review"));
        assert!(prompt.contains("Duration: 30 minutes"));
        assert!(prompt.contains("Pat Lee"));
        assert!(prompt.contains("**External Attendees**: sam@vendor.io"));
        assert!(prompt.contains("## EMAIL CONTEXT"));
        assert!(prompt.contains("[CRITICAL] Email: Aurora budget numbers"));
    }

    #[test]
    fn test_email_excerpt_is_clipped() {
        let bundle = bundle_with_email(5000);
        let analysis = analyze_bundle(&bundle, Utc::now());
        let prompt = build_user_prompt(&bundle, &analysis);

        let content_line = prompt
            .lines()
            .find(|l| l.starts_with("Content: "))
            .unwrap();
        assert!(content_line.len() <= "Content: ".len() + EMAIL_EXCERPT_CHARS + 3);
        assert!(content_line.ends_with("..."));
    }

    #[test]
    fn test_clip_respects_char_boundaries() {
        let text = "héllo wörld".repeat(100);
        let clipped = clip(&text, 10);
        assert_eq!(clipped.chars().count(), 13);
    }
}

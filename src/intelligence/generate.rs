//! The chat-completions call and the local legacy fallback.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::http::{send_with_retry, RetryPolicy};
use crate::prepare::context::ContextBundle;
use crate::prepare::relevance::ContextAnalysis;
use crate::types::{
    AgendaItem, ContextStats, DiscussionPoint, DocumentInsight, PrepDocument, ReferencedSource,
};

use super::{prompts, CompletionError};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_COMPLETION_TOKENS: u32 = 3000;
const TEMPERATURE: f32 = 0.7;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// The model's JSON output. `format` and `generated_at` are ours to add;
/// everything else is optional so a partial response still lands as an
/// enhanced document.
#[derive(Deserialize)]
struct EnhancedPayload {
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
    warnings: Vec<String>,
}

pub struct PrepGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl PrepGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            api_url: API_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Generate a prep document from gathered and filtered context.
    ///
    /// Errors only on transport failure or a non-2xx status after retries.
    /// A 2xx response with unusable content degrades to the legacy shape.
    pub async fn generate(
        &self,
        bundle: &ContextBundle,
        analysis: &ContextAnalysis,
    ) -> Result<PrepDocument, CompletionError> {
        let user_prompt = prompts::build_user_prompt(bundle, analysis);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompts::SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_COMPLETION_TOKENS,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let resp = send_with_retry(
            self.client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&request),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => CompletionError::Authentication(status.as_u16()),
                429 => {
                    let retry_after_secs = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(60);
                    CompletionError::RateLimited { retry_after_secs }
                }
                code => CompletionError::Api {
                    status: code,
                    message: resp.text().await.unwrap_or_default(),
                },
            });
        }

        let content = match resp.json::<ChatResponse>().await {
            Ok(chat) => chat
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default(),
            Err(e) => {
                log::warn!("Unparseable completion envelope: {}", e);
                return Ok(legacy_fallback(bundle, analysis));
            }
        };

        match serde_json::from_str::<EnhancedPayload>(&content) {
            Ok(payload) => Ok(assemble(payload, bundle, analysis)),
            Err(e) => {
                log::warn!("Completion content was not the expected shape: {}", e);
                Ok(legacy_fallback(bundle, analysis))
            }
        }
    }
}

fn context_stats(bundle: &ContextBundle, analysis: &ContextAnalysis) -> ContextStats {
    ContextStats {
        emails_analyzed: analysis.emails.len(),
        slack_messages_analyzed: analysis.slack_messages.len(),
        documents_analyzed: bundle.documents.len(),
        items_included: analysis.included,
        items_excluded: analysis.excluded,
    }
}

fn assemble(
    payload: EnhancedPayload,
    bundle: &ContextBundle,
    analysis: &ContextAnalysis,
) -> PrepDocument {
    let mut warnings = payload.warnings;
    warnings.extend(bundle.warnings.iter().cloned());
    warnings.extend(
        bundle
            .source_errors
            .iter()
            .map(|e| format!("Source unavailable: {}", e)),
    );

    PrepDocument::Enhanced {
        context_summary: payload.context_summary,
        key_discussion_points: payload.key_discussion_points,
        relationship_notes: payload.relationship_notes,
        document_insights: payload.document_insights,
        suggested_agenda: payload.suggested_agenda,
        questions_to_ask: payload.questions_to_ask,
        action_items: payload.action_items,
        referenced_sources: payload.referenced_sources,
        context_stats: context_stats(bundle, analysis),
        has_external_attendees: bundle.has_external_attendees(),
        warnings,
        generated_at: Utc::now(),
    }
}

/// Build the flat fallback document from what was gathered locally.
pub fn legacy_fallback(bundle: &ContextBundle, analysis: &ContextAnalysis) -> PrepDocument {
    let attendee_names: Vec<String> = bundle
        .meeting
        .attendees
        .iter()
        .take(3)
        .map(|a| crate::prepare::context::name_guess(a).unwrap_or_else(|| a.local_part()))
        .collect();
    let context_summary = format!(
        "Meeting with {}. Context gathering found {} relevant items.",
        if attendee_names.is_empty() {
            "no listed attendees".to_string()
        } else {
            attendee_names.join(", ")
        },
        analysis.included
    );

    let insights = &analysis.insights;
    let mut key_points: Vec<String> = Vec::new();
    key_points.extend(insights.blockers.iter().take(3).cloned());
    key_points.extend(insights.commitments.iter().take(3).cloned());
    key_points.extend(insights.questions.iter().take(3).cloned());

    PrepDocument::Legacy {
        context_summary,
        key_points,
        suggested_agenda: vec![
            "Opening and objectives".to_string(),
            "Main discussion".to_string(),
            "Action items and next steps".to_string(),
        ],
        action_items: insights.action_items.iter().take(5).cloned().collect(),
        generated_at: Utc::now(),
    }
}

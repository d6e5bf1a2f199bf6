//! Relevance tiers and the privacy filter.
//!
//! Every gathered email and chat message is scored against keyword
//! heuristics and the meeting's own title keywords, then bucketed into a
//! tier. Tier-excluded items never reach the generator; sensitive items
//! are dropped entirely when the meeting has external attendees. Flagged
//! items also yield one extracted insight each (the specific blocker
//! sentence, the commitment, the unanswered question) so the prompt can
//! surface them verbatim instead of asking the model to rediscover them.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::google_api::gmail::EmailMessage;
use crate::slack_api::{ChannelType, SlackMessage};

use super::context::ContextBundle;

// ============================================================================
// Keyword categories
// ============================================================================

const HEALTH_KEYWORDS: &[&str] = &[
    "sick",
    "ill",
    "not feeling well",
    "under the weather",
    "doctor",
    "appointment",
    "medical",
    "health issue",
    "back pain",
    "migraine",
    "headache",
    "tired",
    "exhausted",
    "mental health",
    "stress",
    "burned out",
    "burnout",
    "taking time off",
    "pto",
    "personal day",
    "family emergency",
];

const BLOCKER_KEYWORDS: &[&str] = &[
    "blocked",
    "blocker",
    "blocking",
    "stuck",
    "waiting on",
    "dependency",
    "depends on",
    "can't proceed",
    "need approval",
    "delayed",
    "hold",
    "on hold",
    "postponed",
    "issue with",
    "problem with",
    "failing",
    "broken",
    "down",
    "outage",
];

const COMMITMENT_KEYWORDS: &[&str] = &[
    "i will",
    "i'll",
    "i promise",
    "committed to",
    "by friday",
    "by monday",
    "by end of",
    "deadline",
    "due date",
    "deliver",
    "ship",
    "complete",
    "finish",
    "send you",
    "get back to you",
    "follow up",
    "action item",
    "todo",
    "to do",
    "assigned to me",
];

const QUESTION_KEYWORDS: &[&str] = &[
    "can you",
    "could you",
    "would you",
    "did you",
    "have you",
    "?",
    "question",
    "asking",
    "wondering",
    "thoughts on",
    "opinion on",
    "what do you think",
    "feedback on",
    "review",
];

const SOCIAL_KEYWORDS: &[&str] = &[
    "weekend",
    "holiday",
    "vacation",
    "party",
    "birthday",
    "lunch",
    "coffee",
    "happy hour",
    "how are you",
    "how's it going",
    "congratulations",
    "congrats",
    "thanks for",
    "thank you for",
    "great job",
    "awesome",
    "nice work",
    "well done",
];

const SENSITIVE_KEYWORDS: &[&str] = &[
    "confidential",
    "internal only",
    "do not share",
    "private",
    "salary",
    "compensation",
    "performance review",
    "pip",
    "termination",
    "layoff",
    "restructuring",
    "acquisition",
    "legal",
    "lawsuit",
    "complaint",
    "hr issue",
    "investigation",
    "between us",
    "off the record",
    "don't tell",
    "secret",
];

const STRESS_KEYWORDS: &[&str] = &[
    "stressed",
    "overwhelmed",
    "too much",
    "overloaded",
    "bandwidth",
    "capacity",
    "spread thin",
    "behind on",
    "catching up",
    "falling behind",
    "concerned about",
];

const WORK_INDICATORS: &[&str] = &[
    "project",
    "deadline",
    "task",
    "work",
    "meeting",
    "review",
    "code",
    "bug",
    "feature",
    "release",
    "deploy",
    "sprint",
    "ticket",
    "issue",
    "pr",
    "pull request",
    "commit",
];

/// Words that carry no topic signal in a meeting title.
const TITLE_STOP_WORDS: &[&str] = &[
    "meeting",
    "sync",
    "review",
    "discussion",
    "call",
    "chat",
    "with",
    "the",
    "a",
    "an",
    "and",
    "or",
    "but",
    "for",
    "to",
    "of",
    "in",
    "on",
    "at",
    "by",
    "re",
    "from",
    "about",
    "weekly",
    "monthly",
    "daily",
    "quarterly",
    "annual",
    "bi-weekly",
    "team",
    "1:1",
    "one-on-one",
    "update",
    "updates",
    "standup",
    "stand-up",
    "check-in",
    "checkin",
];

// ============================================================================
// Pattern helpers
// ============================================================================

fn doc_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)see the (doc|document|spreadsheet|slides|deck|file)|attached (is|are|the)|check out the|i've shared|link to the|google doc|confluence|notion page|\.(pdf|docx|xlsx|pptx)\b",
        )
        .unwrap()
    })
}

fn action_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)action item|todo:|to-do:|follow up on|need to|please (do|complete|finish|review|check)|can you (please )?|by (monday|tuesday|wednesday|thursday|friday|eod|eow)",
        )
        .unwrap()
    })
}

fn question_pattern_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\?|@you|did you|can you|could you|would you|thoughts\?|opinion\?|feedback\?")
            .unwrap()
    })
}

fn commitment_sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(i(?:'ll| will)[^.!?]+[.!?])").unwrap())
}

fn commitment_deadline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(by (?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|eod|eow)[^.!?]*[.!?]?)",
        )
        .unwrap()
    })
}

fn blocker_sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(blocked[^.!?]+[.!?]|waiting on[^.!?]+[.!?]|can't proceed[^.!?]+[.!?])")
            .unwrap()
    })
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

fn count_matches(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

// ============================================================================
// Title keywords
// ============================================================================

/// Significant lowercased words from a meeting title: stop words and
/// anything shorter than three characters are dropped, surrounding
/// punctuation stripped. "Aurora hackathon product updates" yields
/// `[aurora, hackathon, product]`.
pub fn title_keywords(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| ".,!?()[]{}:;\"'".contains(c)).to_string())
        .filter(|w| w.len() > 2 && !TITLE_STOP_WORDS.contains(&w.as_str()))
        .collect()
}

// ============================================================================
// Analysis types
// ============================================================================

/// Relevance tier, most relevant first. Ordering matters: ranked items
/// sort ascending by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelevanceTier {
    /// Directly about the meeting: topic match, attachments, action items.
    Critical,
    /// Interpersonal dynamics: blockers, commitments, health, questions.
    Dynamics,
    /// Recent but uncategorized work chatter.
    General,
    /// Stale, purely social, or noise.
    Exclude,
}

impl RelevanceTier {
    pub fn label(&self) -> &'static str {
        match self {
            RelevanceTier::Critical => "CRITICAL",
            RelevanceTier::Dynamics => "DYNAMICS",
            RelevanceTier::General => "GENERAL",
            RelevanceTier::Exclude => "EXCLUDED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Topic,
    Attachment,
    DocumentReference,
    ActionItem,
    Health,
    Blocker,
    Commitment,
    Question,
    Stress,
    Social,
}

/// One gathered item after scoring. `index` points back into the bundle's
/// email or slack vector.
#[derive(Debug, Clone)]
pub struct RankedItem {
    pub index: usize,
    pub tier: RelevanceTier,
    pub score: f64,
    pub categories: Vec<Category>,
    pub is_sensitive: bool,
}

/// Pre-extracted snippets, grouped by what they mean for the meeting.
#[derive(Debug, Clone, Default)]
pub struct Insights {
    pub action_items: Vec<String>,
    pub commitments: Vec<String>,
    pub blockers: Vec<String>,
    pub questions: Vec<String>,
    pub health_mentions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContextAnalysis {
    /// Included emails, sorted by tier then score descending.
    pub emails: Vec<RankedItem>,
    /// Included chat messages, same ordering.
    pub slack_messages: Vec<RankedItem>,
    pub insights: Insights,
    pub included: usize,
    pub excluded: usize,
}

// ============================================================================
// Scoring
// ============================================================================

struct Scored {
    tier: RelevanceTier,
    score: f64,
    categories: Vec<Category>,
    purely_social: bool,
}

fn promote(current: &mut Scored, tier: RelevanceTier, score: f64, category: Category) {
    if tier < current.tier {
        current.tier = tier;
    }
    if score > current.score {
        current.score = score;
    }
    current.categories.push(category);
}

/// Core keyword pass shared by email and chat items. `text` is already
/// lowercased.
fn score_text(text: &str, topic_keywords: &[String]) -> Scored {
    let mut scored = Scored {
        tier: RelevanceTier::Exclude,
        score: 0.0,
        categories: Vec::new(),
        purely_social: false,
    };

    if !topic_keywords.is_empty() {
        let hits = topic_keywords.iter().filter(|k| text.contains(k.as_str())).count();
        if hits >= 2.min(topic_keywords.len()) {
            promote(&mut scored, RelevanceTier::Critical, 0.9, Category::Topic);
        }
    }

    if doc_reference_re().is_match(text) {
        promote(&mut scored, RelevanceTier::Critical, 0.8, Category::DocumentReference);
    }
    if action_item_re().is_match(text) {
        promote(&mut scored, RelevanceTier::Critical, 0.85, Category::ActionItem);
    }
    if contains_any(text, HEALTH_KEYWORDS) {
        promote(&mut scored, RelevanceTier::Dynamics, 0.75, Category::Health);
    }
    if contains_any(text, BLOCKER_KEYWORDS) {
        promote(&mut scored, RelevanceTier::Dynamics, 0.8, Category::Blocker);
    }
    if contains_any(text, COMMITMENT_KEYWORDS) {
        promote(&mut scored, RelevanceTier::Dynamics, 0.75, Category::Commitment);
    }
    if contains_any(text, QUESTION_KEYWORDS) || question_pattern_re().is_match(text) {
        promote(&mut scored, RelevanceTier::Dynamics, 0.7, Category::Question);
    }

    let social = count_matches(text, SOCIAL_KEYWORDS);
    let work = count_matches(text, WORK_INDICATORS);
    if social > 0 {
        scored.categories.push(Category::Social);
    }
    scored.purely_social = social > 0 && work == 0;

    scored
}

/// Recency adjustment: fresh unclassified work chatter is still worth a
/// general-tier mention; anything stale that did not reach tier-critical
/// drops out.
fn apply_recency(scored: &mut Scored, days_old: i64) {
    if days_old <= 7 && scored.tier == RelevanceTier::Exclude && !scored.purely_social {
        scored.tier = RelevanceTier::General;
        let recency = 0.5 - days_old as f64 * 0.05;
        if recency > scored.score {
            scored.score = recency;
        }
    }
    if days_old > 14 && scored.tier != RelevanceTier::Critical {
        scored.tier = RelevanceTier::Exclude;
    }
}

fn days_old(date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    date.map(|d| now.signed_duration_since(d).num_days().max(0))
        .unwrap_or(0)
}

// ============================================================================
// Insight extraction
// ============================================================================

fn first_line_matching<'a>(text: &'a str, needles: &[&str]) -> Option<&'a str> {
    text.lines().find(|line| {
        let l = line.to_lowercase();
        needles.iter().any(|n| l.contains(n))
    })
}

fn extract_insight(category: Category, text: &str, source: &str) -> Option<String> {
    match category {
        Category::ActionItem => {
            let line = first_line_matching(text, &["action:", "todo:", "need to", "please"])?;
            Some(format!("{} (from {})", line.trim(), source))
        }
        Category::Commitment => {
            let m = commitment_sentence_re()
                .captures(text)
                .or_else(|| commitment_deadline_re().captures(text))?;
            Some(format!("{} (from {})", m[1].trim(), source))
        }
        Category::Blocker => {
            let m = blocker_sentence_re().captures(text)?;
            Some(format!("{} (from {})", m[1].trim(), source))
        }
        Category::Question => {
            let sentence = text.split(['.', '!', '?']).find(|s| {
                let l = s.to_lowercase();
                l.contains("can you") || l.contains("could you") || l.contains("did you")
            })?;
            Some(format!("{}? (from {})", sentence.trim(), source))
        }
        Category::Health => {
            let lower = text.to_lowercase();
            let kw = HEALTH_KEYWORDS.iter().find(|k| lower.contains(**k))?;
            let idx = lower.find(*kw)?;
            let start = floor_char_boundary(text, idx.saturating_sub(50));
            let end = ceil_char_boundary(text, (idx + kw.len() + 100).min(text.len()));
            Some(format!("...{}... (from {})", text[start..end].trim(), source))
        }
        _ => None,
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn collect_insights(insights: &mut Insights, scored: &Scored, text: &str, source: &str) {
    for category in &scored.categories {
        let bucket = match category {
            Category::ActionItem => &mut insights.action_items,
            Category::Commitment => &mut insights.commitments,
            Category::Blocker => &mut insights.blockers,
            Category::Question => &mut insights.questions,
            Category::Health => &mut insights.health_mentions,
            _ => continue,
        };
        if let Some(insight) = extract_insight(*category, text, source) {
            bucket.push(insight);
        }
    }
}

fn dedup_preserving_order(items: &mut Vec<String>) {
    let mut seen = HashSet::new();
    items.retain(|i| seen.insert(i.clone()));
}

// ============================================================================
// Bundle analysis
// ============================================================================

fn email_text(email: &EmailMessage) -> String {
    let body = email.body.as_deref().unwrap_or(&email.snippet);
    format!("{} {}", email.subject, body)
}

/// Score and filter everything in the bundle. `now` is injected so tests
/// can pin recency.
pub fn analyze_bundle(bundle: &ContextBundle, now: DateTime<Utc>) -> ContextAnalysis {
    let external = !bundle.external_attendees.is_empty();
    let topic = title_keywords(&bundle.meeting.title);

    let mut analysis = ContextAnalysis {
        emails: Vec::new(),
        slack_messages: Vec::new(),
        insights: Insights::default(),
        included: 0,
        excluded: 0,
    };

    for (index, email) in bundle.emails.iter().enumerate() {
        let text = email_text(email);
        let lower = text.to_lowercase();
        let mut scored = score_text(&lower, &topic);
        if !email.attachments.is_empty() {
            promote(&mut scored, RelevanceTier::Critical, 0.85, Category::Attachment);
        }
        apply_recency(&mut scored, days_old(email.date, now));

        if scored.tier == RelevanceTier::Exclude {
            analysis.excluded += 1;
            continue;
        }
        let is_sensitive = contains_any(&lower, SENSITIVE_KEYWORDS);
        if external && is_sensitive {
            analysis.excluded += 1;
            continue;
        }

        let source = format!("Email: {}", email.subject);
        collect_insights(&mut analysis.insights, &scored, &text, &source);
        analysis.included += 1;
        analysis.emails.push(RankedItem {
            index,
            tier: scored.tier,
            score: scored.score,
            categories: scored.categories,
            is_sensitive,
        });
    }

    for (index, msg) in bundle.slack_messages.iter().enumerate() {
        let lower = msg.text.to_lowercase();
        let mut scored = score_text(&lower, &topic);
        if !msg.files.is_empty() {
            promote(&mut scored, RelevanceTier::Critical, 0.85, Category::Attachment);
        }
        if msg.channel_type == ChannelType::Dm {
            scored.score = (scored.score + 0.1).min(1.0);
        }
        if contains_any(&lower, STRESS_KEYWORDS) {
            promote(&mut scored, RelevanceTier::Dynamics, 0.7, Category::Stress);
        }
        apply_recency(&mut scored, days_old(msg.timestamp, now));

        if scored.tier == RelevanceTier::Exclude {
            analysis.excluded += 1;
            continue;
        }
        // DMs count as sensitive for privacy purposes regardless of content.
        let is_sensitive =
            contains_any(&lower, SENSITIVE_KEYWORDS) || msg.channel_type == ChannelType::Dm;
        if external && is_sensitive {
            analysis.excluded += 1;
            continue;
        }

        let source = format!("Slack #{}", msg.channel_name);
        collect_insights(&mut analysis.insights, &scored, &msg.text, &source);
        analysis.included += 1;
        analysis.slack_messages.push(RankedItem {
            index,
            tier: scored.tier,
            score: scored.score,
            categories: scored.categories,
            is_sensitive,
        });
    }

    let by_relevance = |a: &RankedItem, b: &RankedItem| {
        a.tier
            .cmp(&b.tier)
            .then(b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
    };
    analysis.emails.sort_by(by_relevance);
    analysis.slack_messages.sort_by(by_relevance);

    dedup_preserving_order(&mut analysis.insights.action_items);
    dedup_preserving_order(&mut analysis.insights.commitments);
    dedup_preserving_order(&mut analysis.insights.blockers);
    dedup_preserving_order(&mut analysis.insights.questions);
    dedup_preserving_order(&mut analysis.insights.health_mentions);

    analysis
}

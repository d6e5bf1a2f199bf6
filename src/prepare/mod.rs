//! Meeting context: gathering from connected providers and deciding what
//! of it actually belongs in a prep.
//!
//! `context` pulls emails, chat messages, and attachment text for a
//! meeting's attendees. `relevance` ranks and filters what came back so
//! the generator sees signal instead of a transcript dump.

pub mod context;
pub mod relevance;

pub use context::{ContextAggregator, ContextBundle, DocumentOrigin, ExtractedDocument};
pub use relevance::{analyze_bundle, title_keywords, ContextAnalysis, RelevanceTier};

//! Prep document generation against a chat-completions endpoint.
//!
//! One call per request. A transport failure or non-2xx status (after the
//! shared retry policy) surfaces as [`CompletionError`] so the caller can
//! retry manually. A 2xx response that cannot be parsed is never an error:
//! the generator synthesizes the flat legacy document locally from the
//! gathered context instead.

pub mod generate;
pub mod prompts;

pub use generate::PrepGenerator;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Completion endpoint rejected credentials ({0})")]
    Authentication(u16),
    #[error("Completion endpoint rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("Completion endpoint error {status}: {message}")]
    Api { status: u16, message: String },
}

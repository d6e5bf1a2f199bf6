//! Meeting prep assistant backend.
//!
//! Pulls context for an upcoming meeting from Google Calendar, Gmail, and
//! Slack, filters it for relevance and privacy, and turns it into a prep
//! document via an LLM completion (with a local fallback when the model
//! response cannot be parsed). Credentials and generated preps live in a
//! local SQLCipher database.
//!
//! [`service::PrepService`] is the entry point; everything else is the
//! machinery behind it.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod google_api;
pub mod http;
pub mod intelligence;
pub mod prepare;
pub mod service;
pub mod slack_api;
pub mod types;

pub use config::Settings;
pub use error::PrepError;
pub use service::PrepService;
pub use types::{ConnectionStatus, Meeting, PrepDocument, Provider, RequestContext};

/// Initialize env_logger with `RUST_LOG`, defaulting to `info`. Call once
/// from the hosting binary before constructing a [`PrepService`].
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

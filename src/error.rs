//! Crate-level error taxonomy.
//!
//! Only two failure classes escape prep generation: a provider credential
//! that cannot be refreshed (the caller must reconnect the account) and a
//! completion endpoint that stayed down through retries. Everything else —
//! an unreachable provider, an oversized attachment, a malformed completion
//! body — degrades into warnings or partial data inside the document.

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::db::DbError;
use crate::google_api::GoogleApiError;
use crate::intelligence::CompletionError;
use crate::slack_api::SlackApiError;
use crate::types::Provider;

#[derive(Debug, thiserror::Error)]
pub enum PrepError {
    #[error("{0} connection expired; reconnect required")]
    ReconnectRequired(Provider),

    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    #[error("Calendar unavailable: {0}")]
    CalendarUnavailable(String),

    #[error("Prep generation failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Storage: {0}")]
    Db(#[from] DbError),

    #[error("Config: {0}")]
    Config(#[from] ConfigError),
}

impl PrepError {
    /// True when the caller can fix the failure by re-running the OAuth flow.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, PrepError::ReconnectRequired(_))
    }
}

impl From<GoogleApiError> for PrepError {
    fn from(err: GoogleApiError) -> Self {
        match err {
            GoogleApiError::AuthExpired => PrepError::ReconnectRequired(Provider::Google),
            other => PrepError::CalendarUnavailable(other.to_string()),
        }
    }
}

impl From<SlackApiError> for PrepError {
    fn from(err: SlackApiError) -> Self {
        match err {
            SlackApiError::AuthExpired => PrepError::ReconnectRequired(Provider::Slack),
            other => PrepError::CalendarUnavailable(other.to_string()),
        }
    }
}

impl From<AuthError> for PrepError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Expired(provider) => PrepError::ReconnectRequired(provider),
            AuthError::Db(e) => PrepError::Db(e),
            other => PrepError::CalendarUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_expired_maps_to_reconnect() {
        let err: PrepError = GoogleApiError::AuthExpired.into();
        assert!(err.requires_reconnect());
        assert!(err.to_string().contains("google"));
    }

    #[test]
    fn test_api_error_maps_to_unavailable() {
        let err: PrepError = GoogleApiError::ApiError {
            status: 503,
            message: "backend".into(),
        }
        .into();
        assert!(!err.requires_reconnect());
    }
}

//! Environment-driven settings.
//!
//! All knobs come from `PREPASSIST_*` variables; a `.env` file is loaded
//! best-effort so local development does not need exported shells.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Keys the SQLCipher database; token decryption depends on it.
    pub secret_key: String,
    pub db_path: PathBuf,

    pub google_client_id: String,
    pub google_client_secret: Option<String>,

    pub openai_api_key: String,
    pub openai_model: String,

    /// Wall-clock budget for each provider gather during context aggregation.
    pub provider_timeout: Duration,
    /// How far back email search reaches, in days.
    pub email_days_back: i64,
    /// How far back chat search reaches, in days.
    pub slack_days_back: i64,
}

impl Settings {
    /// Load settings from the environment. `.env` is consulted first if
    /// present; real environment variables win over file entries.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            secret_key: require("PREPASSIST_SECRET_KEY")?,
            db_path: optional("PREPASSIST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            google_client_id: require("PREPASSIST_GOOGLE_CLIENT_ID")?,
            google_client_secret: optional("PREPASSIST_GOOGLE_CLIENT_SECRET"),
            openai_api_key: require("PREPASSIST_OPENAI_API_KEY")?,
            openai_model: optional("PREPASSIST_OPENAI_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            provider_timeout: Duration::from_secs(parse_or(
                "PREPASSIST_PROVIDER_TIMEOUT_SECS",
                15,
            )?),
            email_days_back: parse_or("PREPASSIST_EMAIL_DAYS_BACK", 30)? as i64,
            slack_days_back: parse_or("PREPASSIST_SLACK_DAYS_BACK", 14)? as i64,
        })
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".prepassist")
        .join("prepassist.db")
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingVar(var))
}

fn optional(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn parse_or(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) if !raw.is_empty() => raw.parse().map_err(|_| ConfigError::InvalidVar {
            var,
            value: raw.clone(),
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_default_when_unset() {
        std::env::remove_var("PREPASSIST_TEST_UNSET_KNOB");
        assert_eq!(parse_or("PREPASSIST_TEST_UNSET_KNOB", 15).unwrap(), 15);
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        std::env::set_var("PREPASSIST_TEST_BAD_KNOB", "soon");
        let err = parse_or("PREPASSIST_TEST_BAD_KNOB", 15).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { .. }));
        std::env::remove_var("PREPASSIST_TEST_BAD_KNOB");
    }
}

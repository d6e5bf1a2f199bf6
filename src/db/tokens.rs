//! OAuth credential storage.
//!
//! One row per (user, provider). Reconnecting a provider replaces the row;
//! disconnecting deletes it. Token material never leaves the keyed database
//! except through `get_token`.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{DbError, PrepDb};
use crate::types::{ConnectionStatus, Provider};

/// A stored provider credential.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthCredential {
    pub user_id: String,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthCredential {
    /// Expired (or about to expire) within a 60 second skew window.
    /// No expiry recorded means the token never expires (Slack user tokens).
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(expiry) => expiry <= Utc::now() + chrono::Duration::seconds(60),
        }
    }
}

impl PrepDb {
    /// Insert or replace the credential for (user, provider).
    pub fn put_token(&self, cred: &OAuthCredential) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO oauth_tokens
                 (user_id, provider, access_token, refresh_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (user_id, provider) DO UPDATE SET
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 expires_at = excluded.expires_at,
                 updated_at = excluded.updated_at",
            params![
                cred.user_id,
                cred.provider.as_str(),
                cred.access_token,
                cred.refresh_token,
                cred.expires_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch the credential for (user, provider), if connected.
    pub fn get_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<OAuthCredential>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT access_token, refresh_token, expires_at
                 FROM oauth_tokens WHERE user_id = ?1 AND provider = ?2",
                params![user_id, provider.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(access_token, refresh_token, expires_at)| OAuthCredential {
            user_id: user_id.to_string(),
            provider,
            access_token,
            refresh_token,
            expires_at: expires_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
        }))
    }

    /// Remove the credential for (user, provider). No-op if absent.
    pub fn delete_token(&self, user_id: &str, provider: Provider) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM oauth_tokens WHERE user_id = ?1 AND provider = ?2",
            params![user_id, provider.as_str()],
        )?;
        Ok(())
    }

    /// Which providers this user currently has credentials for.
    pub fn connection_status(&self, user_id: &str) -> Result<ConnectionStatus, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT provider FROM oauth_tokens WHERE user_id = ?1")?;
        let providers: Vec<String> = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;

        Ok(ConnectionStatus {
            google_connected: providers.iter().any(|p| p == "google"),
            slack_connected: providers.iter().any(|p| p == "slack"),
        })
    }
}

//! Provider credential capability seam.
//!
//! Each connected provider implements [`CredentialFlow`]; the aggregator and
//! service resolve access tokens through [`valid_access_token`], which
//! refreshes expired credentials transparently and persists the result.

use async_trait::async_trait;

use crate::db::tokens::OAuthCredential;
use crate::db::{DbError, PrepDb};
use crate::types::Provider;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The credential is expired or revoked and cannot be refreshed.
    /// The user must run the OAuth flow again.
    #[error("{0} credential expired; reconnect required")]
    Expired(Provider),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage: {0}")]
    Db(#[from] DbError),
}

/// What a connected provider can do with its stored credential.
#[async_trait]
pub trait CredentialFlow: Send + Sync {
    fn provider(&self) -> Provider;

    /// Load the stored credential for a user, if connected.
    fn fetch(&self, db: &PrepDb, user_id: &str) -> Result<Option<OAuthCredential>, AuthError> {
        Ok(db.get_token(user_id, self.provider())?)
    }

    /// Exchange the refresh token for a fresh access token.
    async fn refresh(&self, cred: &OAuthCredential) -> Result<OAuthCredential, AuthError>;

    /// Invalidate the credential upstream. Best effort; the local row is
    /// deleted regardless.
    async fn revoke(&self, cred: &OAuthCredential) -> Result<(), AuthError>;
}

/// Resolve a usable access token for (user, provider).
///
/// Returns `Ok(None)` when the provider is simply not connected. An expired
/// credential is refreshed and the new token persisted before returning;
/// a refresh rejection surfaces as [`AuthError::Expired`].
pub async fn valid_access_token(
    db: &PrepDb,
    flow: &dyn CredentialFlow,
    user_id: &str,
) -> Result<Option<String>, AuthError> {
    let Some(cred) = flow.fetch(db, user_id)? else {
        return Ok(None);
    };

    if !cred.is_expired() {
        return Ok(Some(cred.access_token));
    }

    log::debug!(
        "{} token for user {} expired; refreshing",
        flow.provider(),
        user_id
    );
    let refreshed = flow.refresh(&cred).await?;
    db.put_token(&refreshed)?;
    Ok(Some(refreshed.access_token))
}

/// Disconnect a provider: revoke upstream (best effort) and delete the row.
pub async fn disconnect(
    db: &PrepDb,
    flow: &dyn CredentialFlow,
    user_id: &str,
) -> Result<(), AuthError> {
    if let Some(cred) = flow.fetch(db, user_id)? {
        if let Err(e) = flow.revoke(&cred).await {
            log::warn!("{} revoke failed (continuing): {}", flow.provider(), e);
        }
    }
    db.delete_token(user_id, flow.provider())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FakeFlow {
        refreshed: std::sync::atomic::AtomicBool,
        reject_refresh: bool,
    }

    #[async_trait]
    impl CredentialFlow for FakeFlow {
        fn provider(&self) -> Provider {
            Provider::Google
        }

        async fn refresh(&self, cred: &OAuthCredential) -> Result<OAuthCredential, AuthError> {
            if self.reject_refresh {
                return Err(AuthError::Expired(Provider::Google));
            }
            self.refreshed
                .store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(OAuthCredential {
                access_token: "ya29.fresh".to_string(),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                ..cred.clone()
            })
        }

        async fn revoke(&self, _cred: &OAuthCredential) -> Result<(), AuthError> {
            Ok(())
        }
    }

    fn seed(db: &PrepDb, expired: bool) {
        let expires_at = if expired {
            Utc::now() - chrono::Duration::hours(1)
        } else {
            Utc::now() + chrono::Duration::hours(1)
        };
        db.put_token(&OAuthCredential {
            user_id: "u1".to_string(),
            provider: Provider::Google,
            access_token: "ya29.stale".to_string(),
            refresh_token: Some("1//r".to_string()),
            expires_at: Some(expires_at),
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let db = PrepDb::open_at(dir.path().join("auth.db")).unwrap();
        seed(&db, false);

        let flow = FakeFlow {
            refreshed: Default::default(),
            reject_refresh: false,
        };
        let token = valid_access_token(&db, &flow, "u1").await.unwrap();
        assert_eq!(token.as_deref(), Some("ya29.stale"));
        assert!(!flow.refreshed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let db = PrepDb::open_at(dir.path().join("auth.db")).unwrap();
        seed(&db, true);

        let flow = FakeFlow {
            refreshed: Default::default(),
            reject_refresh: false,
        };
        let token = valid_access_token(&db, &flow, "u1").await.unwrap();
        assert_eq!(token.as_deref(), Some("ya29.fresh"));

        let stored = db.get_token("u1", Provider::Google).unwrap().unwrap();
        assert_eq!(stored.access_token, "ya29.fresh");
    }

    #[tokio::test]
    async fn test_not_connected_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = PrepDb::open_at(dir.path().join("auth.db")).unwrap();

        let flow = FakeFlow {
            refreshed: Default::default(),
            reject_refresh: false,
        };
        assert!(valid_access_token(&db, &flow, "nobody")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejection_surfaces_expired() {
        let dir = tempfile::tempdir().unwrap();
        let db = PrepDb::open_at(dir.path().join("auth.db")).unwrap();
        seed(&db, true);

        let flow = FakeFlow {
            refreshed: Default::default(),
            reject_refresh: true,
        };
        let err = valid_access_token(&db, &flow, "u1").await.unwrap_err();
        assert!(matches!(err, AuthError::Expired(Provider::Google)));
    }

    #[tokio::test]
    async fn test_disconnect_deletes_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = PrepDb::open_at(dir.path().join("auth.db")).unwrap();
        seed(&db, false);

        let flow = FakeFlow {
            refreshed: Default::default(),
            reject_refresh: false,
        };
        disconnect(&db, &flow, "u1").await.unwrap();
        assert!(db.get_token("u1", Provider::Google).unwrap().is_none());
    }
}

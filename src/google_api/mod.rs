//! Google API clients: OAuth2 token refresh plus Calendar v3 and Gmail v1.
//!
//! All calls go through the shared retry layer; a 401 anywhere maps to
//! `AuthExpired` so the caller can distinguish "reconnect the account" from
//! a transient provider failure.

pub mod calendar;
pub mod gmail;

use async_trait::async_trait;

use crate::auth::{AuthError, CredentialFlow};
use crate::db::tokens::OAuthCredential;
use crate::http::{send_with_retry, RetryPolicy};
use crate::types::Provider;

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URI: &str = "https://oauth2.googleapis.com/revoke";

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Map a non-2xx response into the right error, consuming the body.
pub(crate) async fn api_error(resp: reqwest::Response) -> GoogleApiError {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return GoogleApiError::AuthExpired;
    }
    let body = resp.text().await.unwrap_or_default();
    GoogleApiError::ApiError {
        status: status.as_u16(),
        message: body,
    }
}

// ============================================================================
// Credential flow
// ============================================================================

/// Google OAuth2 refresh/revoke against the token endpoint.
pub struct GoogleCredentialFlow {
    client: reqwest::Client,
    client_id: String,
    client_secret: Option<String>,
    token_uri: String,
    revoke_uri: String,
}

impl GoogleCredentialFlow {
    pub fn new(client_id: String, client_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id,
            client_secret,
            token_uri: TOKEN_URI.to_string(),
            revoke_uri: REVOKE_URI.to_string(),
        }
    }

    /// Point the flow at a mock server.
    #[cfg(test)]
    pub fn with_endpoints(mut self, token_uri: String, revoke_uri: String) -> Self {
        self.token_uri = token_uri;
        self.revoke_uri = revoke_uri;
        self
    }
}

fn map_refresh_error(status: u16, body: &str) -> AuthError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return AuthError::Expired(Provider::Google);
    }
    AuthError::RefreshFailed(format!("HTTP {}: {}", status, body))
}

#[async_trait]
impl CredentialFlow for GoogleCredentialFlow {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn refresh(&self, cred: &OAuthCredential) -> Result<OAuthCredential, AuthError> {
        let refresh_token = cred
            .refresh_token
            .as_deref()
            .ok_or(AuthError::Expired(Provider::Google))?;

        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self.client.post(&self.token_uri).form(&form).send().await?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_refresh_error(status.as_u16(), &body_text));
        }

        let body: serde_json::Value = serde_json::from_str(&body_text)
            .map_err(|e| AuthError::RefreshFailed(format!("bad token response: {}", e)))?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| AuthError::RefreshFailed("no access_token in response".into()))?;
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);

        Ok(OAuthCredential {
            access_token: access_token.to_string(),
            expires_at: Some(
                chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64),
            ),
            ..cred.clone()
        })
    }

    async fn revoke(&self, cred: &OAuthCredential) -> Result<(), AuthError> {
        let resp = send_with_retry(
            self.client
                .post(&self.revoke_uri)
                .form(&[("token", cred.access_token.as_str())]),
            &RetryPolicy::default(),
        )
        .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::RefreshFailed(format!(
                "revoke HTTP {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stale_cred() -> OAuthCredential {
        OAuthCredential {
            user_id: "u1".to_string(),
            provider: Provider::Google,
            access_token: "ya29.stale".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_at: Some(Utc::now() - chrono::Duration::minutes(5)),
        }
    }

    fn flow_for(server: &MockServer) -> GoogleCredentialFlow {
        GoogleCredentialFlow::new("client-id".to_string(), Some("client-secret".to_string()))
            .with_endpoints(
                format!("{}/token", server.uri()),
                format!("{}/revoke", server.uri()),
            )
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=client-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refreshed = flow_for(&server).refresh(&stale_cred()).await.unwrap();
        assert_eq!(refreshed.access_token, "ya29.fresh");
        assert!(refreshed.expires_at.unwrap() > Utc::now());
        // refresh token carried forward
        assert_eq!(refreshed.refresh_token.as_deref(), Some("1//refresh"));
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant_maps_to_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let err = flow_for(&server).refresh(&stale_cred()).await.unwrap_err();
        assert!(matches!(err, AuthError::Expired(Provider::Google)));
    }

    #[tokio::test]
    async fn test_refresh_server_error_is_not_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = flow_for(&server).refresh(&stale_cred()).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_is_expired() {
        let server = MockServer::start().await;
        let mut cred = stale_cred();
        cred.refresh_token = None;
        let err = flow_for(&server).refresh(&cred).await.unwrap_err();
        assert!(matches!(err, AuthError::Expired(Provider::Google)));
    }

    #[tokio::test]
    async fn test_revoke_posts_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .and(body_string_contains("token=ya29.stale"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        flow_for(&server).revoke(&stale_cred()).await.unwrap();
    }
}

//! The service surface: one facade tying together credentials, provider
//! clients, context aggregation, and prep generation.
//!
//! Every operation takes a [`RequestContext`] — the service holds no
//! notion of a current user.

use chrono::Utc;

use crate::auth::{self, AuthError, CredentialFlow};
use crate::config::Settings;
use crate::db::tokens::OAuthCredential;
use crate::db::PrepDb;
use crate::error::PrepError;
use crate::google_api::calendar::CalendarClient;
use crate::google_api::GoogleCredentialFlow;
use crate::intelligence::PrepGenerator;
use crate::prepare::relevance::analyze_bundle;
use crate::prepare::ContextAggregator;
use crate::slack_api::SlackCredentialFlow;
use crate::types::{ConnectionStatus, Meeting, PrepDocument, Provider, RequestContext};

pub struct PrepService {
    db: PrepDb,
    google_flow: GoogleCredentialFlow,
    slack_flow: SlackCredentialFlow,
    calendar: CalendarClient,
    aggregator: ContextAggregator,
    generator: PrepGenerator,
}

impl PrepService {
    pub fn new(settings: &Settings) -> Result<Self, PrepError> {
        let db = PrepDb::open(&settings.db_path, &settings.secret_key)?;
        Ok(Self {
            db,
            google_flow: GoogleCredentialFlow::new(
                settings.google_client_id.clone(),
                settings.google_client_secret.clone(),
            ),
            slack_flow: SlackCredentialFlow::new(),
            calendar: CalendarClient::new(),
            aggregator: ContextAggregator::new(
                settings.email_days_back,
                settings.slack_days_back,
                settings.provider_timeout,
            ),
            generator: PrepGenerator::new(
                settings.openai_api_key.clone(),
                settings.openai_model.clone(),
            ),
        })
    }

    fn flow(&self, provider: Provider) -> &dyn CredentialFlow {
        match provider {
            Provider::Google => &self.google_flow,
            Provider::Slack => &self.slack_flow,
        }
    }

    /// Generate (or return the cached) prep for a meeting.
    ///
    /// `force_regenerate` bypasses the cache read but still writes the
    /// fresh result. Requires a connected Google account for the calendar
    /// lookup; Slack is optional and degrades to a document warning.
    pub async fn generate_prep(
        &self,
        ctx: &RequestContext,
        meeting_id: &str,
        force_regenerate: bool,
    ) -> Result<PrepDocument, PrepError> {
        if !force_regenerate {
            if let Some(cached) = self.db.get_prep(&ctx.user_id, meeting_id)? {
                log::debug!("Prep cache hit for ({}, {})", ctx.user_id, meeting_id);
                return Ok(cached);
            }
        }

        let google_token = auth::valid_access_token(&self.db, &self.google_flow, &ctx.user_id)
            .await?
            .ok_or(PrepError::ReconnectRequired(Provider::Google))?;

        let meeting = self
            .calendar
            .get_meeting(&google_token, meeting_id)
            .await?
            .ok_or_else(|| PrepError::MeetingNotFound(meeting_id.to_string()))?;

        // A missing or dead Slack credential costs a warning, never the
        // request. Either way the document records why the source is absent.
        let (slack_token, slack_note) =
            match auth::valid_access_token(&self.db, &self.slack_flow, &ctx.user_id).await {
                Ok(Some(token)) => (Some(token), None),
                Ok(None) => (None, Some("slack: not connected".to_string())),
                Err(AuthError::Db(e)) => return Err(e.into()),
                Err(e) => {
                    log::warn!("Slack credential unusable for {}: {}", ctx.user_id, e);
                    (None, Some("slack: reconnect required".to_string()))
                }
            };

        let mut bundle = self
            .aggregator
            .gather(&meeting, ctx, Some(&google_token), slack_token.as_deref())
            .await;
        if let Some(note) = slack_note {
            bundle.source_errors.push(note);
        }

        let analysis = analyze_bundle(&bundle, Utc::now());
        let doc = self.generator.generate(&bundle, &analysis).await?;

        self.db.put_prep(&ctx.user_id, meeting_id, &doc)?;
        Ok(doc)
    }

    /// Cache lookup only; never triggers generation.
    pub fn get_cached_prep(
        &self,
        ctx: &RequestContext,
        meeting_id: &str,
    ) -> Result<Option<PrepDocument>, PrepError> {
        Ok(self.db.get_prep(&ctx.user_id, meeting_id)?)
    }

    /// Upcoming calendar meetings for the prep list view.
    pub async fn upcoming_meetings(
        &self,
        ctx: &RequestContext,
        days_ahead: i64,
        max_results: u32,
    ) -> Result<Vec<Meeting>, PrepError> {
        let token = auth::valid_access_token(&self.db, &self.google_flow, &ctx.user_id)
            .await?
            .ok_or(PrepError::ReconnectRequired(Provider::Google))?;
        Ok(self
            .calendar
            .list_upcoming(&token, days_ahead, max_results)
            .await?)
    }

    pub fn connection_status(&self, ctx: &RequestContext) -> Result<ConnectionStatus, PrepError> {
        Ok(self.db.connection_status(&ctx.user_id)?)
    }

    /// Store a credential obtained from a completed OAuth exchange.
    pub fn connect_provider(
        &self,
        ctx: &RequestContext,
        credential: OAuthCredential,
    ) -> Result<(), PrepError> {
        debug_assert_eq!(credential.user_id, ctx.user_id);
        self.db.put_token(&credential)?;
        log::info!("Connected {} for user {}", credential.provider, ctx.user_id);
        Ok(())
    }

    /// Revoke upstream (best effort) and delete the stored credential.
    pub async fn disconnect_provider(
        &self,
        ctx: &RequestContext,
        provider: Provider,
    ) -> Result<(), PrepError> {
        auth::disconnect(&self.db, self.flow(provider), &ctx.user_id).await?;
        log::info!("Disconnected {} for user {}", provider, ctx.user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::prepare::ContextAggregator;

    fn service_at(dir: &TempDir) -> PrepService {
        let settings = Settings {
            secret_key: "test-secret".to_string(),
            db_path: dir.path().join("prep.db"),
            google_client_id: "client-id".to_string(),
            google_client_secret: None,
            openai_api_key: "sk-test".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            provider_timeout: std::time::Duration::from_secs(5),
            email_days_back: 30,
            slack_days_back: 14,
        };
        PrepService::new(&settings).unwrap()
    }

    #[tokio::test]
    async fn test_generate_without_google_requires_reconnect() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        let ctx = RequestContext::new("u1", "me@acme.com");

        let err = service.generate_prep(&ctx, "evt1", false).await.unwrap_err();
        assert!(matches!(
            err,
            PrepError::ReconnectRequired(Provider::Google)
        ));
    }

    #[tokio::test]
    async fn test_generate_with_slack_disconnected_records_warning() {
        let dir = TempDir::new().unwrap();
        let mut service = service_at(&dir);
        let ctx = RequestContext::new("u1", "me@acme.com");

        let google = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events/evt1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "evt1",
                "summary": "Aurora sync",
                "start": { "dateTime": "2026-09-01T10:00:00Z" },
                "end": { "dateTime": "2026-09-01T10:30:00Z" },
            })))
            .mount(&google)
            .await;

        let openai = MockServer::start().await;
        let content = serde_json::json!({ "context_summary": "Quick sync." }).to_string();
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": content } }]
            })))
            .mount(&openai)
            .await;

        service.calendar = CalendarClient::new().with_base_urls(google.uri(), google.uri());
        service.aggregator = ContextAggregator::new(30, 14, std::time::Duration::from_secs(5))
            .with_calendar(CalendarClient::new().with_base_urls(google.uri(), google.uri()));
        service.generator = PrepGenerator::new("sk-test", "gpt-4o-mini").with_api_url(openai.uri());

        service
            .db
            .put_token(&OAuthCredential {
                user_id: "u1".to_string(),
                provider: Provider::Google,
                access_token: "ya29".to_string(),
                refresh_token: None,
                expires_at: None,
            })
            .unwrap();

        // Google connected, Slack never connected: generation succeeds and
        // the document says why Slack context is missing.
        let doc = service.generate_prep(&ctx, "evt1", false).await.unwrap();
        match doc {
            PrepDocument::Enhanced { warnings, .. } => {
                assert!(
                    warnings.iter().any(|w| w.contains("slack: not connected")),
                    "warnings: {:?}",
                    warnings
                );
            }
            other => panic!("expected enhanced document, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_disconnect_roundtrip() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        let ctx = RequestContext::new("u1", "me@acme.com");

        assert!(!service.connection_status(&ctx).unwrap().slack_connected);

        service
            .connect_provider(
                &ctx,
                OAuthCredential {
                    user_id: "u1".to_string(),
                    provider: Provider::Slack,
                    access_token: "xoxp".to_string(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .unwrap();
        assert!(service.connection_status(&ctx).unwrap().slack_connected);

        // Revoke hits the real endpoint and fails; the row still goes away.
        let _ = service.disconnect_provider(&ctx, Provider::Slack).await;
        assert!(!service.connection_status(&ctx).unwrap().slack_connected);
    }

    #[tokio::test]
    async fn test_cached_prep_is_isolated_per_user() {
        let dir = TempDir::new().unwrap();
        let service = service_at(&dir);
        let ctx_a = RequestContext::new("a", "a@acme.com");
        let ctx_b = RequestContext::new("b", "b@acme.com");

        let doc = PrepDocument::Legacy {
            context_summary: "cached".to_string(),
            key_points: vec![],
            suggested_agenda: vec![],
            action_items: vec![],
            generated_at: Utc::now(),
        };
        service.db.put_prep("a", "evt1", &doc).unwrap();

        assert!(service.get_cached_prep(&ctx_a, "evt1").unwrap().is_some());
        assert!(service.get_cached_prep(&ctx_b, "evt1").unwrap().is_none());
    }
}

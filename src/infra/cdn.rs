//! Cloudflare cache purge.

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    application::repos::{CdnError, CdnPurger, PurgeOutcome},
    config::CdnSettings,
};

const TARGET: &str = "quire::infra::cdn";
pub const NO_VALID_URLS: &str = "Cannot purge; no valid URLs.";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct CloudflarePurger {
    client: Client,
    api_base_url: String,
    zone: Option<String>,
    token: Option<String>,
}

impl CloudflarePurger {
    pub fn new(client: Client, settings: &CdnSettings) -> Self {
        Self {
            client,
            api_base_url: settings.api_base_url.clone(),
            zone: settings.zone.clone(),
            token: settings.token.clone(),
        }
    }

    fn endpoint(&self) -> Result<(String, &str), CdnError> {
        let zone = self
            .zone
            .as_deref()
            .ok_or(CdnError::NotConfigured { missing: "cdn.zone" })?;
        let token = self
            .token
            .as_deref()
            .ok_or(CdnError::NotConfigured { missing: "cdn.token" })?;
        let base = self.api_base_url.trim_end_matches('/');
        Ok((format!("{base}/zones/{zone}/purge_cache"), token))
    }

    async fn purge(&self, body: Value, scope: &str) -> Result<PurgeOutcome, CdnError> {
        let (endpoint, token) = self.endpoint()?;

        let response = match self
            .client
            .delete(&endpoint)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(target = TARGET, scope, error = %err, "CDN purge request failed");
                return Ok(PurgeOutcome::failure(format!("Request failed: {err}")));
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();

        match parsed {
            Some(api) if status.is_success() && api.success => {
                info!(target = TARGET, scope, "Purged CDN cache");
                Ok(PurgeOutcome::succeeded())
            }
            Some(api) if !api.errors.is_empty() => {
                let errors: Vec<String> = api
                    .errors
                    .iter()
                    .map(|error| format!("error code {}: {}", error.code, error.message))
                    .collect();
                warn!(target = TARGET, scope, %status, errors = ?errors, "CDN purge rejected");
                Ok(PurgeOutcome {
                    success: false,
                    message: Some(format!("{scope} purge failed")),
                    errors,
                })
            }
            _ => {
                warn!(target = TARGET, scope, %status, body = %text, "CDN purge failed");
                Ok(PurgeOutcome::failure(format!("Request failed: {status}")))
            }
        }
    }
}

#[async_trait]
impl CdnPurger for CloudflarePurger {
    async fn purge_urls(&self, urls: &[String]) -> Result<PurgeOutcome, CdnError> {
        self.endpoint()?;
        if urls.is_empty() {
            warn!(target = TARGET, "No urls to purge");
            return Ok(PurgeOutcome::failure(NO_VALID_URLS));
        }
        self.purge(json!({ "files": urls }), "URL").await
    }

    async fn purge_all(&self) -> Result<PurgeOutcome, CdnError> {
        self.purge(json!({ "purge_everything": true }), "Zone").await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn purger(server: &MockServer) -> CloudflarePurger {
        CloudflarePurger::new(
            Client::new(),
            &CdnSettings {
                enabled: true,
                api_base_url: server.url("/client/v4/"),
                zone: Some("zone-1".to_string()),
                token: Some("secret".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn urls_are_sent_as_files() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/client/v4/zones/zone-1/purge_cache")
                    .header("Authorization", "Bearer secret")
                    .json_body(json!({ "files": ["https://example.com/blog"] }));
                then.status(200)
                    .json_body(json!({ "success": true, "errors": [], "result": { "id": "zone-1" } }));
            })
            .await;

        let outcome = purger(&server)
            .purge_urls(&["https://example.com/blog".to_string()])
            .await
            .expect("configured");
        assert!(outcome.success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn purge_everything_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/client/v4/zones/zone-1/purge_cache")
                    .json_body(json!({ "purge_everything": true }));
                then.status(200).json_body(json!({ "success": true }));
            })
            .await;

        assert!(purger(&server).purge_all().await.expect("configured").success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_errors_become_a_failed_outcome() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE);
                then.status(400).json_body(json!({
                    "success": false,
                    "errors": [{ "code": 1012, "message": "Request must contain one of files" }]
                }));
            })
            .await;

        let outcome = purger(&server)
            .purge_urls(&["https://example.com/".to_string()])
            .await
            .expect("configured");
        assert!(!outcome.success);
        assert_eq!(
            outcome.errors,
            vec!["error code 1012: Request must contain one of files".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_url_list_is_a_failure_without_a_request() {
        let server = MockServer::start_async().await;
        let outcome = purger(&server).purge_urls(&[]).await.expect("configured");
        assert_eq!(outcome, PurgeOutcome::failure(NO_VALID_URLS));
    }

    #[tokio::test]
    async fn missing_zone_is_a_configuration_error() {
        let purger = CloudflarePurger::new(
            Client::new(),
            &CdnSettings {
                enabled: true,
                api_base_url: "https://api.cloudflare.com/client/v4/".to_string(),
                zone: None,
                token: Some("secret".to_string()),
            },
        );
        assert_eq!(
            purger.purge_all().await,
            Err(CdnError::NotConfigured { missing: "cdn.zone" })
        );
    }
}

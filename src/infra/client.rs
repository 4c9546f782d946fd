use reqwest::Client;

use super::error::InfraError;
use crate::config::HttpSettings;

/// Shared outbound client for transforms, sitemaps, warming and CDN purges.
pub fn build_http_client(settings: &HttpSettings) -> Result<Client, InfraError> {
    let client = Client::builder()
        .timeout(settings.timeout)
        .user_agent(settings.user_agent.clone())
        .build()?;
    Ok(client)
}

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;

/// Thin client for ancillary calls to the media server. When no base URL is
/// configured the client is a no-op; signaling never depends on it.
#[derive(Debug, Clone)]
pub struct MediaClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl MediaClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.media_server_url.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let Some(base) = &self.base_url else {
            return Ok(());
        };

        let url = format!("{}{}", base.trim_end_matches('/'), path);
        self.http
            .post(&url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

//! The platform connector contract and its HTTP gateway implementation.
//!
//! Platform-specific scraping lives behind a gateway service; the pipeline
//! only ever sees the normalized [`CandidateItem`] list.

use std::time::Duration;

use async_trait::async_trait;
use leadscout_core::{AppConfig, CandidateItem, Platform};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Credentials or endpoint missing. Skips the whole platform cycle.
    #[error("connector for {platform} is not configured: {reason}")]
    NotConfigured { platform: Platform, reason: String },

    #[error("connector request for {platform} timed out after {after_secs}s")]
    Timeout { platform: Platform, after_secs: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {platform} connector (retry after {retry_after_secs}s)")]
    RateLimited {
        platform: Platform,
        retry_after_secs: u64,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConnectorError {
    /// Configuration errors abort a platform cycle; everything else is scoped
    /// to one monitor.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, ConnectorError::NotConfigured { .. })
    }
}

/// What a monitor asks a connector for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchRequest {
    pub platform: Platform,
    pub monitor_id: i64,
    pub keywords: Vec<String>,
    pub boolean_query: Option<String>,
    pub company_name: Option<String>,
    /// Product page for review and app-store platforms.
    pub target_url: Option<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Fails with [`ConnectorError::NotConfigured`] when `platform` cannot be
    /// scanned at all.
    fn ensure_configured(&self, platform: Platform) -> Result<(), ConnectorError>;

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<CandidateItem>, ConnectorError>;
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    items: Vec<CandidateItem>,
}

/// Connector backed by the scraper gateway: `POST {base}/v1/platforms/{platform}/search`.
pub struct HttpConnector {
    client: Client,
    base_url: Option<String>,
    token: Option<String>,
}

impl HttpConnector {
    /// # Errors
    ///
    /// Returns [`ConnectorError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(
        base_url: Option<String>,
        token: Option<String>,
        timeout_secs: u64,
        user_agent: &str,
    ) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            token,
        })
    }

    /// # Errors
    ///
    /// Returns [`ConnectorError::Http`] if the client cannot be constructed.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConnectorError> {
        Self::new(
            config.connector_base_url.clone(),
            config.connector_token.clone(),
            config.connector_timeout_secs,
            &config.connector_user_agent,
        )
    }

    fn search_url(base: &str, platform: Platform) -> String {
        format!("{base}/v1/platforms/{platform}/search")
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn ensure_configured(&self, platform: Platform) -> Result<(), ConnectorError> {
        if self.base_url.is_none() {
            return Err(ConnectorError::NotConfigured {
                platform,
                reason: "LEADSCOUT_CONNECTOR_BASE_URL is not set".to_string(),
            });
        }
        Ok(())
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<CandidateItem>, ConnectorError> {
        let platform = request.platform;
        let Some(base) = self.base_url.as_deref() else {
            return Err(ConnectorError::NotConfigured {
                platform,
                reason: "LEADSCOUT_CONNECTOR_BASE_URL is not set".to_string(),
            });
        };
        let url = Self::search_url(base, platform);

        let mut builder = self.client.post(&url).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ConnectorError::RateLimited {
                platform,
                retry_after_secs,
            });
        }

        if !status.is_success() {
            return Err(ConnectorError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        let parsed = serde_json::from_str::<GatewayResponse>(&body).map_err(|e| {
            ConnectorError::Deserialize {
                context: format!("{platform} search for monitor {}", request.monitor_id),
                source: e,
            }
        })?;

        Ok(parsed.items)
    }
}

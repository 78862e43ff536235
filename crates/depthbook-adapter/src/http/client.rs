/*
[INPUT]:  HTTP configuration (market, base URL override, timeouts)
[OUTPUT]: Configured reqwest client ready for depth REST calls
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing response handling
*/

use crate::http::{DEFAULT_RATE_LIMIT_DELAY_SECS, DepthError, Result};
use crate::types::Market;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("depthbook/", env!("CARGO_PKG_VERSION"));

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// REST client for one market's public depth endpoints
#[derive(Debug, Clone)]
pub struct DepthClient {
    http_client: Client,
    market: Market,
    base_url: Url,
    timeout: Duration,
}

impl DepthClient {
    /// Create a spot client with default configuration
    pub fn new() -> Result<Self> {
        Self::for_market(Market::Spot, ClientConfig::default())
    }

    /// Create a client against the market's public base URL
    pub fn for_market(market: Market, config: ClientConfig) -> Result<Self> {
        Self::with_config_and_base_url(config, market, market.rest_base_url())
    }

    /// Create a client with an explicit base URL (mirrors, test servers)
    pub fn with_config_and_base_url(
        config: ClientConfig,
        market: Market,
        base_url: &str,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http_client,
            market,
            base_url: Url::parse(base_url)?,
            timeout: config.timeout,
        })
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build request builder for an endpoint relative to the base URL
    pub(crate) fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(endpoint)?;
        Ok(self.http_client.request(method, url))
    }

    /// Send a request and decode a JSON body, mapping venue failures
    pub(crate) async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await.map_err(|err| self.map_send_error(err))?;
        let response = check_status(response).await?;
        let body = response.bytes().await.map_err(|err| self.map_send_error(err))?;
        debug!(bytes = body.len(), "http response received");
        Ok(serde_json::from_slice(&body)?)
    }

    fn map_send_error(&self, err: reqwest::Error) -> DepthError {
        if err.is_timeout() {
            DepthError::Timeout {
                duration_ms: self.timeout.as_millis() as u64,
            }
        } else {
            DepthError::Http(err)
        }
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // 418 is the venue's escalation after ignoring 429s.
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_DELAY_SECS);
        return Err(DepthError::RateLimit { retry_after });
    }

    let message = response.text().await.unwrap_or_default();
    Err(DepthError::api_error(status, message))
}

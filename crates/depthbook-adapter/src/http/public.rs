/*
[INPUT]:  Symbol identifiers and depth limits
[OUTPUT]: Versioned full-depth snapshots
[POS]:    HTTP layer - public market data endpoints (no auth required)
[UPDATE]: When adding new public endpoints or changing response format
*/

use crate::http::{DepthClient, DepthError, Result};
use crate::types::{DepthSnapshotResponse, Snapshot};
use reqwest::Method;
use tracing::debug;

impl DepthClient {
    /// Query a full-depth snapshot
    ///
    /// GET {depth_path}?symbol={SYMBOL}&limit={limit}
    ///
    /// Not retried here; the caller owns retry policy.
    pub async fn fetch_depth_snapshot(&self, symbol: &str, limit: u32) -> Result<Snapshot> {
        let symbol = symbol.to_ascii_uppercase();
        let endpoint = format!(
            "{}?symbol={}&limit={}",
            self.market().depth_path(),
            symbol,
            limit
        );
        let builder = self.request(Method::GET, &endpoint)?;
        let response: DepthSnapshotResponse = self
            .send_json(builder)
            .await
            .map_err(|err| match err {
                DepthError::Serialization(err) => DepthError::malformed(err.to_string()),
                other => other,
            })?;

        let snapshot = response
            .into_snapshot(&symbol)
            .map_err(DepthError::Malformed)?;
        debug!(
            %symbol,
            sequence = snapshot.sequence,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "depth snapshot fetched"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use crate::http::{ClientConfig, DepthClient, DepthError};
    use crate::types::{Market, PriceLevel};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, market: Market) -> DepthClient {
        DepthClient::with_config_and_base_url(ClientConfig::default(), market, &server.uri())
            .expect("client init")
    }

    #[tokio::test]
    async fn test_fetch_depth_snapshot_spot() {
        let server = MockServer::start().await;
        let mock_response = r#"{
            "lastUpdateId": 100,
            "bids": [["50000.00", "1.000"], ["49990.00", "2.5"]],
            "asks": [["50010.00", "2.0"]]
        }"#;

        let _mock = Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("limit", "20"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_raw(mock_response, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Market::Spot);
        let snapshot = client
            .fetch_depth_snapshot("btcusdt", 20)
            .await
            .expect("fetch_depth_snapshot failed");

        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.sequence, 100);
        assert_eq!(
            snapshot.bids,
            vec![
                PriceLevel::new("50000".parse().expect("price"), "1".parse().expect("qty")),
                PriceLevel::new("49990".parse().expect("price"), "2.5".parse().expect("qty")),
            ]
        );
        assert_eq!(snapshot.asks.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_depth_snapshot_futures_path() {
        let server = MockServer::start().await;
        let _mock = Mock::given(method("GET"))
            .and(path("/fapi/v1/depth"))
            .and(query_param("symbol", "ETHUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lastUpdateId": 7, "E": 1700000000000i64, "T": 1700000000000i64,
                "bids": [], "asks": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Market::Futures);
        let snapshot = client
            .fetch_depth_snapshot("ETHUSDT", 50)
            .await
            .expect("futures snapshot");
        assert_eq!(snapshot.sequence, 7);
        assert!(snapshot.bids.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_depth_snapshot_rate_limited() {
        let server = MockServer::start().await;
        let _mock = Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
            .mount(&server)
            .await;

        let client = client_for(&server, Market::Spot);
        let err = client
            .fetch_depth_snapshot("BTCUSDT", 20)
            .await
            .expect_err("rate limited");
        assert!(matches!(err, DepthError::RateLimit { retry_after: 12 }));
    }

    #[tokio::test]
    async fn test_fetch_depth_snapshot_malformed_body() {
        let server = MockServer::start().await;
        let _mock = Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bids": [["1", "1"]], "asks": []
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Market::Spot);
        let err = client
            .fetch_depth_snapshot("BTCUSDT", 20)
            .await
            .expect_err("missing lastUpdateId");
        assert!(matches!(err, DepthError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_fetch_depth_snapshot_server_error() {
        let server = MockServer::start().await;
        let _mock = Mock::given(method("GET"))
            .and(path("/api/v3/depth"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = client_for(&server, Market::Spot);
        let err = client
            .fetch_depth_snapshot("BTCUSDT", 20)
            .await
            .expect_err("server error");
        match err {
            DepthError::Api { code, message } => {
                assert_eq!(code, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }
}

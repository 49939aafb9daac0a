//! Venue REST Adapters
//!
//! Reference price, option chain and streamer preferences over the venue's
//! HTTP API. Every request carries a bearer token fetched from the token
//! provider at call time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::application::ports::{
    ContractChainSource, PriceSource, StreamerCredentials, StreamerInfoProvider, TokenProvider,
    UpstreamError,
};
use crate::domain::contract::ContractId;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.schwabapi.com";

/// REST client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    /// API base URL without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Chain query symbol.
    pub underlying_symbol: String,
    /// Quote symbols tried in order for the reference price.
    pub price_aliases: Vec<String>,
    /// Strikes requested around the money.
    pub chain_strike_count: u32,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            underlying_symbol: "$SPX".to_string(),
            price_aliases: vec!["$SPX".to_string(), "$SPX.X".to_string(), "SPX".to_string()],
            chain_strike_count: 31,
        }
    }
}

/// Shared authenticated HTTP client.
pub struct SchwabRestClient {
    http: reqwest::Client,
    config: RestConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl SchwabRestClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: RestConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::DataUnavailable(e.to_string()))?;

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    /// Client settings.
    #[must_use]
    pub const fn config(&self) -> &RestConfig {
        &self.config
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}{path}", self.config.base_url.trim_end_matches('/'));

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| UpstreamError::DataUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::DataUnavailable(format!(
                "{path} returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))
    }
}

// =============================================================================
// Reference Price
// =============================================================================

/// Reference price from the quotes endpoint.
pub struct SchwabPriceSource {
    client: Arc<SchwabRestClient>,
}

impl SchwabPriceSource {
    /// Create a price source.
    #[must_use]
    pub const fn new(client: Arc<SchwabRestClient>) -> Self {
        Self { client }
    }

    async fn price_for(&self, alias: &str) -> Result<Decimal, UpstreamError> {
        let body: Value = self
            .client
            .get_json("/marketdata/v1/quotes", &[("symbols", alias.to_string())])
            .await?;

        let quote = body
            .get(alias)
            .and_then(|entry| entry.get("quote"))
            .ok_or_else(|| UpstreamError::Malformed(format!("no quote for {alias}")))?;

        ["lastPrice", "closePrice"]
            .iter()
            .filter_map(|field| quote.get(*field).and_then(Value::as_f64))
            .filter_map(|price| Decimal::try_from(price).ok())
            .find(|price| *price > Decimal::ZERO)
            .ok_or_else(|| UpstreamError::DataUnavailable(format!("no usable price for {alias}")))
    }
}

#[async_trait]
impl PriceSource for SchwabPriceSource {
    async fn reference_price(&self) -> Result<Decimal, UpstreamError> {
        let mut last_error = UpstreamError::DataUnavailable("no price aliases configured".into());

        for alias in &self.client.config().price_aliases {
            match self.price_for(alias).await {
                Ok(price) => {
                    tracing::debug!(%alias, %price, "Reference price fetched");
                    return Ok(price);
                }
                // Auth failures are not alias-specific.
                Err(e @ UpstreamError::CredentialUnavailable(_)) => return Err(e),
                Err(e) => {
                    tracing::debug!(%alias, error = %e, "Price alias failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

// =============================================================================
// Option Chain
// =============================================================================

/// Contract chain from the chains endpoint.
pub struct SchwabChainSource {
    client: Arc<SchwabRestClient>,
}

impl SchwabChainSource {
    /// Create a chain source.
    #[must_use]
    pub const fn new(client: Arc<SchwabRestClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContractChainSource for SchwabChainSource {
    async fn chain(
        &self,
        reference_price: Decimal,
        as_of: NaiveDate,
    ) -> Result<Vec<ContractId>, UpstreamError> {
        let config = self.client.config();
        let date = as_of.format("%Y-%m-%d").to_string();

        let body: Value = self
            .client
            .get_json(
                "/marketdata/v1/chains",
                &[
                    ("symbol", config.underlying_symbol.clone()),
                    ("contractType", "ALL".to_string()),
                    ("strikeCount", config.chain_strike_count.to_string()),
                    ("fromDate", date.clone()),
                    ("toDate", date),
                ],
            )
            .await?;

        let contracts = chain_contracts(&body);
        tracing::debug!(
            %reference_price,
            count = contracts.len(),
            "Option chain fetched"
        );
        Ok(contracts)
    }
}

/// Contracts from `callExpDateMap` then `putExpDateMap`. Missing maps and
/// unparseable symbols are skipped.
fn chain_contracts(body: &Value) -> Vec<ContractId> {
    let mut contracts = Vec::new();

    for map in ["callExpDateMap", "putExpDateMap"] {
        let Some(expiries) = body.get(map).and_then(Value::as_object) else {
            continue;
        };
        for strikes in expiries.values().filter_map(Value::as_object) {
            for descriptors in strikes.values().filter_map(Value::as_array) {
                for symbol in descriptors
                    .iter()
                    .filter_map(|d| d.get("symbol").and_then(Value::as_str))
                {
                    match ContractId::parse(symbol) {
                        Ok(contract) => contracts.push(contract),
                        Err(e) => tracing::debug!(%symbol, error = %e, "Skipping chain symbol"),
                    }
                }
            }
        }
    }

    contracts
}

// =============================================================================
// Streamer Preferences
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserPreference {
    #[serde(default)]
    streamer_info: Vec<StreamerInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamerInfo {
    streamer_socket_url: String,
    schwab_client_customer_id: String,
    schwab_client_correl_id: String,
    schwab_client_channel: String,
    schwab_client_function_id: String,
}

impl From<StreamerInfo> for StreamerCredentials {
    fn from(info: StreamerInfo) -> Self {
        Self {
            socket_url: info.streamer_socket_url,
            customer_id: info.schwab_client_customer_id,
            correl_id: info.schwab_client_correl_id,
            channel: info.schwab_client_channel,
            function_id: info.schwab_client_function_id,
        }
    }
}

/// Streaming credentials from the user preference endpoint.
pub struct SchwabStreamerInfo {
    client: Arc<SchwabRestClient>,
}

impl SchwabStreamerInfo {
    /// Create a provider.
    #[must_use]
    pub const fn new(client: Arc<SchwabRestClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamerInfoProvider for SchwabStreamerInfo {
    async fn streamer_credentials(&self) -> Result<StreamerCredentials, UpstreamError> {
        let preference: UserPreference = self
            .client
            .get_json("/trader/v1/userPreference", &[])
            .await?;

        preference
            .streamer_info
            .into_iter()
            .next()
            .map(StreamerCredentials::from)
            .ok_or_else(|| UpstreamError::Malformed("userPreference has no streamerInfo".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockTokenProvider;
    use crate::domain::contract::OptionSide;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tokens() -> Arc<dyn TokenProvider> {
        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_bearer_token()
            .returning(|| Ok("abc".to_string()));
        Arc::new(tokens)
    }

    fn client(server: &MockServer) -> Arc<SchwabRestClient> {
        Arc::new(
            SchwabRestClient::new(
                RestConfig {
                    base_url: server.uri(),
                    ..RestConfig::default()
                },
                tokens(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn price_uses_first_alias_with_a_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/quotes"))
            .and(query_param("symbols", "$SPX"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/quotes"))
            .and(query_param("symbols", "$SPX.X"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "$SPX.X": { "quote": { "lastPrice": 0.0, "closePrice": 5483.25 } }
            })))
            .mount(&server)
            .await;

        let source = SchwabPriceSource::new(client(&server));
        let price = source.reference_price().await.unwrap();

        assert_eq!(price, Decimal::new(548_325, 2));
    }

    #[tokio::test]
    async fn price_fails_when_no_alias_answers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/quotes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let source = SchwabPriceSource::new(client(&server));
        assert!(source.reference_price().await.is_err());
    }

    #[tokio::test]
    async fn credential_failure_is_not_retried_per_alias() {
        let server = MockServer::start().await;
        let mut tokens = MockTokenProvider::new();
        tokens
            .expect_bearer_token()
            .times(1)
            .returning(|| Err(UpstreamError::CredentialUnavailable("expired".into())));
        let client = Arc::new(
            SchwabRestClient::new(
                RestConfig {
                    base_url: server.uri(),
                    ..RestConfig::default()
                },
                Arc::new(tokens),
            )
            .unwrap(),
        );

        let err = SchwabPriceSource::new(client)
            .reference_price()
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::CredentialUnavailable(_)));
    }

    #[tokio::test]
    async fn chain_collects_calls_then_puts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/chains"))
            .and(query_param("symbol", "$SPX"))
            .and(query_param("contractType", "ALL"))
            .and(query_param("strikeCount", "31"))
            .and(query_param("fromDate", "2025-06-03"))
            .and(query_param("toDate", "2025-06-03"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "callExpDateMap": {
                    "2025-06-03:0": {
                        "5440.0": [{ "symbol": "SPXW  250603C05440000" }],
                        "5445.0": [{ "symbol": "garbage" }]
                    }
                },
                "putExpDateMap": {
                    "2025-06-03:0": {
                        "5440.0": [{ "symbol": "SPXW  250603P05440000" }]
                    }
                }
            })))
            .mount(&server)
            .await;

        let source = SchwabChainSource::new(client(&server));
        let contracts = source
            .chain(
                Decimal::from(5440),
                NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(contracts.len(), 2);
        assert_eq!(contracts[0].side(), OptionSide::Call);
        assert_eq!(contracts[1].side(), OptionSide::Put);
        assert_eq!(contracts[1].strike(), Decimal::from(5440));
    }

    #[test]
    fn chain_tolerates_missing_maps() {
        assert!(chain_contracts(&json!({})).is_empty());
        assert!(chain_contracts(&json!({ "callExpDateMap": {} })).is_empty());
        assert!(chain_contracts(&json!({ "putExpDateMap": null })).is_empty());
    }

    #[tokio::test]
    async fn chain_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/v1/chains"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = SchwabChainSource::new(client(&server))
            .chain(Decimal::from(5440), NaiveDate::from_ymd_opt(2025, 6, 3).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::DataUnavailable(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn streamer_info_reads_first_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trader/v1/userPreference"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accounts": [],
                "streamerInfo": [{
                    "streamerSocketUrl": "wss://streamer-api.schwab.com/ws",
                    "schwabClientCustomerId": "cust",
                    "schwabClientCorrelId": "corr",
                    "schwabClientChannel": "N9",
                    "schwabClientFunctionId": "APIAPP"
                }]
            })))
            .mount(&server)
            .await;

        let creds = SchwabStreamerInfo::new(client(&server))
            .streamer_credentials()
            .await
            .unwrap();

        assert_eq!(creds.socket_url, "wss://streamer-api.schwab.com/ws");
        assert_eq!(creds.customer_id, "cust");
        assert_eq!(creds.function_id, "APIAPP");
    }

    #[tokio::test]
    async fn file_token_provider_is_shared_with_the_stream() {
        use crate::infrastructure::credentials::FileTokenProvider;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trader/v1/userPreference"))
            .and(header("authorization", "Bearer fixed-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "streamerInfo": [{
                    "streamerSocketUrl": "wss://streamer-api.schwab.com/ws",
                    "schwabClientCustomerId": "cust",
                    "schwabClientCorrelId": "corr",
                    "schwabClientChannel": "N9",
                    "schwabClientFunctionId": "APIAPP"
                }]
            })))
            .mount(&server)
            .await;

        let tokens: Arc<dyn TokenProvider> = Arc::new(FileTokenProvider::new(
            None,
            Some("fixed-token".to_string()),
        ));
        let rest = SchwabRestClient::new(
            RestConfig {
                base_url: server.uri(),
                ..RestConfig::default()
            },
            Arc::clone(&tokens),
        )
        .unwrap();

        let creds = SchwabStreamerInfo::new(Arc::new(rest))
            .streamer_credentials()
            .await
            .unwrap();

        assert_eq!(creds.customer_id, "cust");
        assert_eq!(tokens.bearer_token().await.unwrap(), "fixed-token");
    }

    #[tokio::test]
    async fn streamer_info_without_entries_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trader/v1/userPreference"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "streamerInfo": [] })))
            .mount(&server)
            .await;

        let err = SchwabStreamerInfo::new(client(&server))
            .streamer_credentials()
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }
}

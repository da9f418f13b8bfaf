//! Price API client

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use alerts_core::{FeedError, FeedResult, FiatRates, RateSnapshot, RatesRequest};

/// Anything that can quote token rates in fiat currencies
#[async_trait::async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rates(&self, request: &RatesRequest) -> FeedResult<RateSnapshot>;
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub request_timeout: Duration,
}

/// HTTP client for the batched price API
pub struct PriceApiClient {
    config: FeedConfig,
    client: reqwest::Client,
}

impl PriceApiClient {
    pub fn new(config: FeedConfig) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FeedError::Request(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait::async_trait]
impl RateSource for PriceApiClient {
    async fn fetch_rates(&self, request: &RatesRequest) -> FeedResult<RateSnapshot> {
        debug!(
            "Requesting {} tokens in {} currencies from {}",
            request.tokens.len(),
            request.currencies.len(),
            self.config.url
        );

        let response = self
            .client
            .post(&self.config.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FeedError::Timeout
                } else {
                    FeedError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Request(e.to_string()))?;

        parse_rates_response(&body)
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    data: Vec<RatesEntry>,
}

#[derive(Debug, Deserialize)]
struct RatesEntry {
    currency: String,
    rates: BTreeMap<String, serde_json::Value>,
}

/// Parse `{ "data": [ { "currency": "USD", "rates": { "BTC": "42000.12" } } ] }`
pub fn parse_rates_response(body: &[u8]) -> FeedResult<RateSnapshot> {
    let response: RatesResponse =
        serde_json::from_slice(body).map_err(|e| FeedError::InvalidResponse(e.to_string()))?;

    let quotes = response
        .data
        .into_iter()
        .map(|entry| {
            let fiat = entry.currency.trim().to_ascii_uppercase();
            let rates = entry
                .rates
                .into_iter()
                .map(|(token, value)| {
                    let rate = rate_text(&value).ok_or_else(|| {
                        FeedError::InvalidResponse(format!(
                            "rate for {token}/{fiat} is not a string or number: {value}"
                        ))
                    })?;
                    Ok((token.trim().to_ascii_uppercase(), rate))
                })
                .collect::<FeedResult<BTreeMap<_, _>>>()?;

            Ok(FiatRates { fiat, rates })
        })
        .collect::<FeedResult<Vec<_>>>()?;

    Ok(RateSnapshot::new(quotes))
}

fn rate_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.trim().trim_matches('"').to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = br#"{"data":[
            {"currency":"USD","rates":{"BTC":"42000.12","eth":"\"2500.5\""}},
            {"currency":"eur","rates":{"BTC":39000.5}}
        ]}"#;

        let snapshot = parse_rates_response(body).unwrap();
        assert_eq!(snapshot.quotes.len(), 2);
        assert_eq!(snapshot.quotes[0].fiat, "USD");
        assert_eq!(snapshot.rate("BTC", "USD"), Some("42000.12"));
        assert_eq!(snapshot.rate("ETH", "USD"), Some("2500.5"));
        assert_eq!(snapshot.rate("BTC", "EUR"), Some("39000.5"));
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(matches!(
            parse_rates_response(b"{}"),
            Err(FeedError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_rates_response(br#"{"data":[{"currency":"USD","rates":{"BTC":null}}]}"#),
            Err(FeedError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_unparseable_rate_text_passes_through() {
        // Numeric validation belongs to the matcher
        let snapshot =
            parse_rates_response(br#"{"data":[{"currency":"USD","rates":{"BTC":"n/a"}}]}"#)
                .unwrap();
        assert_eq!(snapshot.rate("BTC", "USD"), Some("n/a"));
    }

    #[tokio::test]
    async fn test_client_posts_batched_request() {
        use axum::{routing::post, Json, Router};

        async fn prices(Json(req): Json<RatesRequest>) -> Json<serde_json::Value> {
            assert_eq!(req.api, "cmc");
            let rates: serde_json::Map<String, serde_json::Value> = req
                .tokens
                .iter()
                .map(|t| (t.clone(), serde_json::Value::String("10.5".into())))
                .collect();
            let data: Vec<_> = req
                .currencies
                .iter()
                .map(|c| serde_json::json!({ "currency": c, "rates": rates.clone() }))
                .collect();
            Json(serde_json::json!({ "data": data }))
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/prices", post(prices)))
                .await
                .unwrap();
        });

        let client = PriceApiClient::new(FeedConfig {
            url: format!("http://{addr}/prices"),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let request = RatesRequest {
            tokens: vec!["BTC".into(), "ETH".into()],
            currencies: vec!["USD".into()],
            api: "cmc".into(),
        };
        let snapshot = client.fetch_rates(&request).await.unwrap();

        assert_eq!(snapshot.rate_count(), 2);
        assert_eq!(snapshot.rate("ETH", "USD"), Some("10.5"));
    }

    #[tokio::test]
    async fn test_client_reports_status() {
        use axum::{http::StatusCode, routing::post, Router};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = Router::new().route("/prices", post(|| async { StatusCode::BAD_GATEWAY }));
            axum::serve(listener, app).await.unwrap();
        });

        let client = PriceApiClient::new(FeedConfig {
            url: format!("http://{addr}/prices"),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let request = RatesRequest {
            tokens: vec!["BTC".into()],
            currencies: vec!["USD".into()],
            api: "cmc".into(),
        };
        assert!(matches!(
            client.fetch_rates(&request).await,
            Err(FeedError::Status(502))
        ));
    }
}

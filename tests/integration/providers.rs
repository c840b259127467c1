//! Integration tests for the CoinMarketCap and LLM clients against mock servers

use chrono::Utc;
use crypto_monitor::config::{ForecastConfig, MarketDataConfig};
use crypto_monitor::error::ProviderErrorKind;
use crypto_monitor::models::{PricePoint, PriceQuote};
use crypto_monitor::services::coinmarketcap::CoinMarketCapClient;
use crypto_monitor::services::forecast::{ForecastProvider, LlmForecastClient};
use crypto_monitor::services::market_data::PriceProvider;
use serde_json::json;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUOTES_PATH: &str = "/v1/cryptocurrency/quotes/latest";

fn cmc_client(server: &MockServer, timeout: Duration, max_attempts: usize) -> CoinMarketCapClient {
    let config = MarketDataConfig {
        api_key: "test-key".to_string(),
        base_url: Url::parse(&server.uri()).unwrap(),
        timeout,
        max_attempts,
    };
    CoinMarketCapClient::new(&config)
        .unwrap()
        .with_retry_delay(Duration::from_millis(1))
}

fn llm_client(server: &MockServer) -> LlmForecastClient {
    let config = ForecastConfig {
        api_key: "llm-key".to_string(),
        base_url: Url::parse(&server.uri()).unwrap(),
        model: "test-model".to_string(),
        timeout: Duration::from_secs(2),
        max_attempts: 3,
        max_tokens: 200,
    };
    LlmForecastClient::new(&config, 24)
        .unwrap()
        .with_retry_delay(Duration::from_millis(1))
}

fn quote(symbol: &str, price: f64) -> PriceQuote {
    PriceQuote {
        symbol: symbol.to_string(),
        price,
        percent_change_24h: Some(2.5),
        fetched_at: Utc::now(),
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "cmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
}

#[tokio::test]
async fn cmc_quote_sends_api_key_and_parses_price() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(QUOTES_PATH))
        .and(query_param("symbol", "BTC"))
        .and(header("X-CMC_PRO_API_KEY", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": {"error_code": 0},
            "data": {"BTC": {"symbol": "BTC", "quote": {"USD": {
                "price": 51000.0, "percent_change_24h": 3.2
            }}}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = cmc_client(&server, Duration::from_secs(2), 3);
    let quote = client.quote("BTC").await.unwrap();

    assert_eq!(quote.symbol, "BTC");
    assert_eq!(quote.price, 51000.0);
    assert_eq!(quote.percent_change_24h, Some(3.2));
}

#[tokio::test]
async fn cmc_rate_limit_uses_every_attempt_then_reports() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(QUOTES_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "status": {"error_code": 1008, "error_message": "You've exceeded your API Key's HTTP request rate limit."}
        })))
        .expect(3)
        .mount(&server)
        .await;

    let client = cmc_client(&server, Duration::from_secs(2), 3);
    let err = client.quote("BTC").await.unwrap_err();

    assert_eq!(err.kind, ProviderErrorKind::RateLimited);
}

#[tokio::test]
async fn cmc_unknown_symbol_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(QUOTES_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": {"error_code": 400, "error_message": "Invalid value for \"symbol\": \"NOPE\""}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = cmc_client(&server, Duration::from_secs(2), 4);
    let err = client.quote("NOPE").await.unwrap_err();

    assert_eq!(err.kind, ProviderErrorKind::NotFound);
}

#[tokio::test]
async fn cmc_timeout_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(QUOTES_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {}}))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let client = cmc_client(&server, Duration::from_millis(100), 2);
    let err = client.quote("ETH").await.unwrap_err();

    assert_eq!(err.kind, ProviderErrorKind::Network);
}

#[tokio::test]
async fn cmc_server_error_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(QUOTES_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(QUOTES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"ETH": {"quote": {"USD": {"price": 3000.0}}}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = cmc_client(&server, Duration::from_secs(2), 3);
    let quote = client.quote("ETH").await.unwrap();

    assert_eq!(quote.price, 3000.0);
}

#[tokio::test]
async fn llm_forecast_is_parsed_from_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer llm-key"))
        .and(body_string_contains("test-model"))
        .and(body_string_contains("Current price: $51000.00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "```json\n{\"predicted_price\": 52500.5, \"confidence\": 0.72, \"rationale\": \"ETF inflows\"}\n```",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let history = vec![PricePoint {
        id: Some(1),
        symbol: "BTC".to_string(),
        price: 50000.0,
        percent_change_24h: None,
        source: "coinmarketcap".to_string(),
        recorded_at: Utc::now(),
    }];

    let client = llm_client(&server);
    let forecast = client
        .forecast("BTC", &quote("BTC", 51000.0), &history)
        .await
        .unwrap();

    assert_eq!(forecast.predicted_price, 52500.5);
    assert_eq!(forecast.confidence, 0.72);
    assert_eq!(forecast.rationale, "ETF inflows");
}

#[tokio::test]
async fn llm_malformed_completion_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "BTC will probably go up, hard to say by how much.",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = llm_client(&server);
    let err = client
        .forecast("BTC", &quote("BTC", 51000.0), &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind, ProviderErrorKind::InvalidResponse);
}

#[tokio::test]
async fn llm_auth_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = llm_client(&server);
    let err = client
        .forecast("ETH", &quote("ETH", 3000.0), &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind, ProviderErrorKind::InvalidResponse);
}

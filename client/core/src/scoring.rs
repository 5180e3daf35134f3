//! Fraud scoring round trip
//!
//! [`ScoringClient`] turns a [`SignalSet`] into a GET request against the
//! scoring endpoint and the response into a probability. The network itself
//! sits behind [`ScoringTransport`] so hosts and tests can swap it out.

use crate::error::NetworkError;
use crate::signals::SignalSet;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Production scoring endpoint
pub const DEFAULT_SCORING_ENDPOINT: &str = "https://fraud-api.pixalate.com/api/v2/fraud";

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Probability reported when the service returned none
pub const NO_SCORE: f64 = -1.0;

/// Raw HTTP response
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Network seam for the scoring call
#[async_trait]
pub trait ScoringTransport: Send + Sync {
    /// Issue a GET. `timeout` bounds the whole exchange when set, not just the connect phase.
    async fn get(
        &self,
        url: Url,
        api_key: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<TransportResponse, NetworkError>;
}

/// `reqwest`-backed transport
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ScoringTransport for HttpTransport {
    async fn get(
        &self,
        url: Url,
        api_key: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<TransportResponse, NetworkError> {
        let mut request = self.client.get(url);

        if let Some(key) = api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;

        Ok(TransportResponse { status, body })
    }
}

fn transport_error(e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::Timeout
    } else {
        NetworkError::Unknown(format!(
            "An error occurred while attempting to send the request: {e}"
        ))
    }
}

/// Fields of the scoring response body. Anything else is ignored.
#[derive(Debug, Deserialize)]
struct ScoreBody {
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default = "no_score")]
    probability: f64,
}

fn no_score() -> f64 {
    NO_SCORE
}

/// Successful score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResponse {
    /// Fraud probability, or [`NO_SCORE`]
    pub probability: f64,
    pub message: Option<String>,
}

/// Builds scoring requests and interprets responses
#[derive(Clone)]
pub struct ScoringClient {
    transport: Arc<dyn ScoringTransport>,
    endpoint: Url,
}

impl ScoringClient {
    pub fn new(transport: Arc<dyn ScoringTransport>, endpoint: Url) -> Self {
        Self { transport, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Request URL: `ip` once per address (v4 first), then `userAgent`, then
    /// `deviceId`. Missing signals are left out.
    pub fn build_url(&self, signals: &SignalSet) -> Url {
        let mut url = self.endpoint.clone();
        if signals.resolved() == 0 {
            return url;
        }

        {
            let mut query = url.query_pairs_mut();
            if let Some(ip) = &signals.ipv4 {
                query.append_pair("ip", ip);
            }
            if let Some(ip) = &signals.ipv6 {
                query.append_pair("ip", ip);
            }
            if let Some(ua) = &signals.user_agent {
                query.append_pair("userAgent", ua);
            }
            if let Some(id) = &signals.device_id {
                query.append_pair("deviceId", id);
            }
        }
        url
    }

    /// One scoring attempt bounded by `budget`
    pub async fn score(
        &self,
        signals: &SignalSet,
        api_key: &str,
        budget: Option<Duration>,
    ) -> Result<ScoreResponse, NetworkError> {
        let url = self.build_url(signals);
        let api_key = (!api_key.is_empty()).then_some(api_key);

        let response = self.transport.get(url, api_key, budget).await?;
        parse_response(response)
    }
}

/// Map a raw response onto a score or an error
pub fn parse_response(response: TransportResponse) -> Result<ScoreResponse, NetworkError> {
    if response.status != 200 {
        let server_message = serde_json::from_str::<ScoreBody>(&response.body)
            .ok()
            .and_then(|body| body.message);

        return Err(NetworkError::HttpStatus {
            code: response.status,
            message: server_message.unwrap_or_else(|| default_message(response.status)),
        });
    }

    let body: ScoreBody = serde_json::from_str(&response.body).map_err(|e| {
        NetworkError::Unknown(format!("Failed to parse scoring response: {e}"))
    })?;

    match body.status {
        Some(status) if status != 200 => {
            let code = u16::try_from(status).unwrap_or(500);
            Err(NetworkError::HttpStatus {
                code,
                message: body.message.unwrap_or_else(|| default_message(code)),
            })
        }
        _ => Ok(ScoreResponse {
            probability: body.probability,
            message: body.message,
        }),
    }
}

fn default_message(code: u16) -> String {
    match code {
        401 | 403 => "Incorrect authentication details.".to_string(),
        _ => reqwest::StatusCode::from_u16(code)
            .ok()
            .and_then(|status| status.canonical_reason())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP error {code}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn signals() -> SignalSet {
        SignalSet {
            device_id: Some("d1".into()),
            ipv4: Some("1.2.3.4".into()),
            ipv6: Some("::1".into()),
            user_agent: Some("UA 1.0".into()),
        }
    }

    fn client_for(endpoint: &str) -> ScoringClient {
        ScoringClient::new(Arc::new(HttpTransport::new()), Url::parse(endpoint).unwrap())
    }

    fn ok(body: &str) -> TransportResponse {
        TransportResponse { status: 200, body: body.into() }
    }

    #[test]
    fn test_url_parameter_order() {
        let client = client_for(DEFAULT_SCORING_ENDPOINT);
        let url = client.build_url(&signals());

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("ip".into(), "1.2.3.4".into()),
                ("ip".into(), "::1".into()),
                ("userAgent".into(), "UA 1.0".into()),
                ("deviceId".into(), "d1".into()),
            ]
        );
    }

    #[test]
    fn test_url_omits_missing_signals() {
        let client = client_for(DEFAULT_SCORING_ENDPOINT);
        let partial = SignalSet {
            ipv6: Some("2001:db8::1".into()),
            ..Default::default()
        };

        let url = client.build_url(&partial);
        assert_eq!(url.query(), Some("ip=2001%3Adb8%3A%3A1"));

        let empty = client.build_url(&SignalSet::default());
        assert_eq!(empty.as_str(), DEFAULT_SCORING_ENDPOINT);
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let parsed = parse_response(ok(r#"{"status":200,"probability":0.9,"extra":{"a":[1,2]}}"#)).unwrap();
        assert_eq!(parsed.probability, 0.9);
    }

    #[test]
    fn test_parse_missing_probability_is_no_score() {
        let parsed = parse_response(ok(r#"{"message":"ok"}"#)).unwrap();
        assert_eq!(parsed.probability, NO_SCORE);
        assert_eq!(parsed.message.as_deref(), Some("ok"));
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_response(ok("not json")).unwrap_err();
        assert_eq!(err.code(), 500);

        let err = parse_response(ok(r#"{"status":429,"message":"slow down"}"#)).unwrap_err();
        assert_eq!(err, NetworkError::HttpStatus { code: 429, message: "slow down".into() });

        let err = parse_response(TransportResponse { status: 403, body: String::new() }).unwrap_err();
        assert_eq!(err.to_string(), "Incorrect authentication details.");

        let err = parse_response(TransportResponse { status: 502, body: "<html>".into() }).unwrap_err();
        assert_eq!(err, NetworkError::HttpStatus { code: 502, message: "Bad Gateway".into() });
    }

    #[tokio::test]
    async fn test_score_sends_signals_and_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/fraud"))
            .and(header(API_KEY_HEADER, "secret"))
            .and(query_param("deviceId", "d1"))
            .and(query_param("userAgent", "UA 1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":200,"probability":0.42}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&format!("{}/api/v2/fraud", server.uri()));
        let score = client.score(&signals(), "secret", Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(score.probability, 0.42);
    }

    #[tokio::test]
    async fn test_empty_api_key_omits_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"probability":0.1}"#))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        client.score(&signals(), "", None).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key(API_KEY_HEADER));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string(r#"{"message":"scoring unavailable"}"#))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let err = client.score(&signals(), "k", None).await.unwrap_err();
        assert_eq!(err, NetworkError::HttpStatus { code: 500, message: "scoring unavailable".into() });
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"probability":0.1}"#)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let err = client.score(&signals(), "k", Some(Duration::from_millis(50))).await.unwrap_err();
        assert_eq!(err, NetworkError::Timeout);
        assert_eq!(err.code(), 408);
    }
}

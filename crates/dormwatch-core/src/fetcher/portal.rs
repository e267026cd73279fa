//! HTTP client for the utility portal's balance endpoint

use chrono::{DateTime, Utc};
use reqwest::header::{CONNECTION, COOKIE, REFERER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::retry::{retry_with_backoff, RetryPolicy};
use super::{BalanceSource, FetchError};
use crate::config::Config;
use crate::models::BalanceReading;

/// `statusCode` the portal uses for a successful query
const PORTAL_OK: &str = "200";

/// Client for the portal's ammeter balance query
pub struct PortalClient {
    client: Client,
    url: String,
    cookie: String,
    referer: String,
    auth_expired_markers: Vec<String>,
    retry: RetryPolicy,
}

impl PortalClient {
    /// Create a client from the loaded configuration
    pub fn new(config: &Config) -> crate::error::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            url: config.balance_api_url.clone(),
            cookie: config.user_cookie.clone(),
            referer: config.balance_api_referer.clone(),
            auth_expired_markers: config.auth_expired_markers.clone(),
            retry: RetryPolicy::new(
                config.max_retries,
                std::time::Duration::from_secs(config.retry_delay),
            ),
        })
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One request, no retries
    async fn fetch_once(&self) -> Result<BalanceReading, FetchError> {
        debug!(url = %self.url, "Requesting balance");

        let response = self
            .client
            .get(&self.url)
            .header(COOKIE, &self.cookie)
            .header(REFERER, &self.referer)
            .header(CONNECTION, "keep-alive")
            .send()
            .await
            .map_err(|e| FetchError::Network(describe_request_error(&e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::AuthExpired(format!("portal answered {status}")));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Network(format!("portal answered {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Parse(format!("unexpected HTTP status {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(describe_request_error(&e)))?;

        parse_balance(&body, &self.auth_expired_markers, Utc::now())
    }
}

#[async_trait::async_trait]
impl BalanceSource for PortalClient {
    async fn fetch(&self) -> Result<BalanceReading, FetchError> {
        info!("Fetching electricity balance");
        retry_with_backoff(&self.retry, FetchError::is_retryable, || self.fetch_once()).await
    }
}

fn describe_request_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

/// Envelope of every portal response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortalResponse {
    status_code: Option<Value>,
    message: Option<Value>,
    result_object: Option<Value>,
}

/// Turn a raw response body into a reading.
///
/// Numeric fields are accepted as JSON numbers or numeric strings. Only
/// `leftEle` is required.
pub(crate) fn parse_balance(
    body: &str,
    auth_expired_markers: &[String],
    fetched_at: DateTime<Utc>,
) -> Result<BalanceReading, FetchError> {
    let response: PortalResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            // An expired session is sometimes answered with the login page.
            if contains_marker(body, auth_expired_markers) {
                return Err(FetchError::AuthExpired(
                    "portal returned a login page instead of JSON".to_string(),
                ));
            }
            return Err(FetchError::Parse(format!("response is not valid JSON: {e}")));
        }
    };

    debug!(?response, "Raw portal response");

    let status_code = response
        .status_code
        .as_ref()
        .map(value_to_string)
        .unwrap_or_default();

    if status_code != PORTAL_OK {
        let message = response
            .message
            .as_ref()
            .map(value_to_string)
            .unwrap_or_else(|| "unknown error".to_string());
        let detail = format!("portal status {status_code}: {message}");
        return if contains_marker(&message, auth_expired_markers) {
            Err(FetchError::AuthExpired(detail))
        } else {
            Err(FetchError::Parse(detail))
        };
    }

    let result = match response.result_object {
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(FetchError::Parse(format!(
                "resultObject is not an object: {other}"
            )))
        }
        None => return Err(FetchError::Parse("response has no resultObject".to_string())),
    };

    let remaining_kwh = match result.get("leftEle") {
        None | Some(Value::Null) => {
            return Err(FetchError::Parse("resultObject has no leftEle".to_string()))
        }
        Some(value) => as_number(value)
            .ok_or_else(|| FetchError::Parse(format!("leftEle is not numeric: {value}")))?,
    };

    let optional = |key: &str| result.get(key).and_then(as_number).unwrap_or(0.0);

    let measured_at = result
        .get("monTime")
        .and_then(as_number)
        .filter(|ms| *ms > 0.0)
        .and_then(|ms| DateTime::from_timestamp_millis(ms as i64));

    Ok(BalanceReading {
        remaining_kwh,
        remaining_money: optional("leftMoney"),
        unit_price: optional("elePrice"),
        free_kwh: optional("leftFreeEle"),
        measured_at,
        fetched_at,
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn contains_marker(text: &str, markers: &[String]) -> bool {
    let text = text.to_lowercase();
    markers
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .any(|m| text.contains(&m.to_lowercase()))
}

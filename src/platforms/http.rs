//! HTTP plumbing shared by the adapters.

use std::time::Duration;

use reqwest::{Response, StatusCode, header::HeaderMap};

use super::FetchError;

const MAX_BODY_IN_MESSAGE: usize = 300;

/// Client used by every adapter; `timeout` bounds each request.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!("portal-sync/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Seconds from a `Retry-After` header given in delta-seconds form.
pub fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Maps a non-success status to a typed error.
///
/// 401/403 mean the stored grant no longer works, 429 is quota, any other 4xx
/// points at the integration's config, 5xx is the platform's problem.
pub fn classify_status(
    platform: &str,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> FetchError {
    let message = format!("{platform} returned {status}: {}", truncate(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::auth_expired(message),
        StatusCode::TOO_MANY_REQUESTS => FetchError::rate_limited(retry_after_secs, message),
        s if s.is_server_error() => FetchError::transient(message),
        StatusCode::REQUEST_TIMEOUT => FetchError::transient(message),
        _ => FetchError::invalid_config(message),
    }
}

/// Passes successful responses through and classifies the rest.
pub async fn check_response(platform: &str, resp: Response) -> Result<Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry = retry_after(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    Err(classify_status(platform, status, retry, &body))
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::transient(format!("request timed out: {err}"))
        } else if err.is_decode() {
            FetchError::transient(format!("malformed response: {err}"))
        } else if err.is_builder() {
            FetchError::invalid_config(format!("could not build request: {err}"))
        } else {
            FetchError::transient(format!("network error: {err}"))
        }
    }
}

/// Platforms disagree on whether counters are JSON numbers or strings
/// (Google encodes int64 as strings). These accept either form.
pub mod lenient {
    use serde::{Deserialize, Deserializer, de::Error as _};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Int(v)) => Ok(Some(v)),
            Some(Raw::Float(v)) => Ok(Some(v.round() as i64)),
            Some(Raw::Text(s)) => parse_text(&s)
                .map(|v| v.map(|f| f.round() as i64))
                .map_err(D::Error::custom),
        }
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Int(v)) => Ok(Some(v as f64)),
            Some(Raw::Float(v)) => Ok(Some(v)),
            Some(Raw::Text(s)) => parse_text(&s).map_err(D::Error::custom),
        }
    }

    fn parse_text(s: &str) -> Result<Option<f64>, String> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("expected a number, got '{trimmed}'"))
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_IN_MESSAGE) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

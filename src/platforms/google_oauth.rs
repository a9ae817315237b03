//! Google OAuth access-token minting shared by Google Ads and GA4.
//!
//! Integrations store the long-lived refresh token. A cached access token is
//! reused while it has more than a minute left; otherwise a new one is minted
//! and handed back so the engine can persist it.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{FetchError, GoogleOAuthCredentials, http};

const EXPIRY_SKEW_SECS: i64 = 60;
const DEFAULT_LIFETIME_SECS: i64 = 3600;

#[derive(Clone)]
pub struct GoogleOAuthClient {
    http: reqwest::Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// Access token plus, when minted during this call, the updated grant.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub access_token: String,
    pub refreshed: Option<GoogleOAuthCredentials>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl GoogleOAuthClient {
    pub fn new(
        http: reqwest::Client,
        token_url: String,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id,
            client_secret,
        }
    }

    /// Returns a usable access token, minting one when the cached token is stale.
    pub async fn access_token(
        &self,
        credentials: &GoogleOAuthCredentials,
        now: DateTime<Utc>,
    ) -> Result<AccessGrant, FetchError> {
        if let (Some(token), Some(expires_at)) = (
            credentials.access_token.as_ref(),
            credentials.access_token_expires_at,
        ) && expires_at - now > Duration::seconds(EXPIRY_SKEW_SECS)
        {
            return Ok(AccessGrant {
                access_token: token.clone(),
                refreshed: None,
            });
        }

        self.refresh(credentials, now).await
    }

    async fn refresh(
        &self,
        credentials: &GoogleOAuthCredentials,
        now: DateTime<Utc>,
    ) -> Result<AccessGrant, FetchError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(FetchError::invalid_config(
                "Google OAuth client id/secret are not configured",
            ));
        };

        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", credentials.refresh_token.as_str()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry = http::retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_token_error(status, retry, &body));
        }

        let token: TokenResponse = resp.json().await?;
        let lifetime = token.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS);
        debug!(expires_in = lifetime, "minted Google access token");

        let refreshed = GoogleOAuthCredentials {
            // Google may rotate the refresh token; keep the newest one.
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| credentials.refresh_token.clone()),
            access_token: Some(token.access_token.clone()),
            access_token_expires_at: Some(now + Duration::seconds(lifetime)),
        };

        Ok(AccessGrant {
            access_token: token.access_token,
            refreshed: Some(refreshed),
        })
    }
}

fn classify_token_error(
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> FetchError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) if matches!(err.error.as_str(), "invalid_grant" | "unauthorized_client") => {
            FetchError::auth_expired(format!(
                "Google refresh token rejected ({}): {}; the integration must be reconnected",
                err.error,
                err.error_description.unwrap_or_default()
            ))
        }
        Ok(err) if err.error == "invalid_client" => FetchError::invalid_config(format!(
            "Google OAuth client rejected: {}",
            err.error_description.unwrap_or_default()
        )),
        _ => http::classify_status("google_oauth", status, retry_after, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::FetchErrorKind;
    use reqwest::StatusCode;

    #[test]
    fn invalid_grant_means_reauthorization() {
        let err = classify_token_error(
            StatusCode::BAD_REQUEST,
            None,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );
        assert_eq!(err.kind, FetchErrorKind::AuthExpired);
        assert!(err.message.contains("reconnected"));
    }

    #[test]
    fn invalid_client_is_configuration() {
        let err = classify_token_error(
            StatusCode::UNAUTHORIZED,
            None,
            r#"{"error":"invalid_client"}"#,
        );
        assert_eq!(err.kind, FetchErrorKind::InvalidConfig);
    }

    #[test]
    fn unparseable_server_error_is_transient() {
        let err = classify_token_error(StatusCode::SERVICE_UNAVAILABLE, None, "<html>");
        assert_eq!(err.kind, FetchErrorKind::Transient);
    }

    #[tokio::test]
    async fn cached_token_is_reused_without_network() {
        let client = GoogleOAuthClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/token".to_string(),
            None,
            None,
        );
        let now = Utc::now();
        let creds = GoogleOAuthCredentials {
            refresh_token: "refresh".to_string(),
            access_token: Some("cached".to_string()),
            access_token_expires_at: Some(now + Duration::minutes(30)),
        };

        let grant = client.access_token(&creds, now).await.expect("cached");
        assert_eq!(grant.access_token, "cached");
        assert!(grant.refreshed.is_none());
    }
}

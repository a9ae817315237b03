//! Typed credential and config bundles.
//!
//! Both bundles are tagged unions so an adapter receives a strongly-shaped
//! value. The engine never looks inside them beyond checking that the shape
//! fits the integration's platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{FetchError, Platform};

/// Secrets for one integration, sealed at rest by [`crate::crypto`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformCredentials {
    Meta(MetaCredentials),
    GoogleOauth(GoogleOAuthCredentials),
    NaverSearchad(NaverSearchAdCredentials),
}

/// Long-lived Meta user or system-user token.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaCredentials {
    pub access_token: String,
    /// Expiry of the long-lived token; `None` for non-expiring system users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Google OAuth grant shared by Google Ads and GA4.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleOAuthCredentials {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<DateTime<Utc>>,
}

/// Naver Search Ads API license. The license is issued per advertiser
/// account, so the customer id travels with it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct NaverSearchAdCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub customer_id: String,
}

impl PlatformCredentials {
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformCredentials::Meta(_) => "meta",
            PlatformCredentials::GoogleOauth(_) => "google_oauth",
            PlatformCredentials::NaverSearchad(_) => "naver_searchad",
        }
    }

    /// Whether this credential shape can authenticate against `platform`.
    pub fn supports(&self, platform: Platform) -> bool {
        matches!(
            (self, platform),
            (PlatformCredentials::Meta(_), Platform::MetaAds)
                | (
                    PlatformCredentials::GoogleOauth(_),
                    Platform::GoogleAds | Platform::GoogleAnalytics
                )
                | (
                    PlatformCredentials::NaverSearchad(_),
                    Platform::NaverAds | Platform::NaverSearchad
                )
        )
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for PlatformCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformCredentials")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for MetaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaCredentials")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for GoogleOAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleOAuthCredentials")
            .field("access_token_expires_at", &self.access_token_expires_at)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for NaverSearchAdCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NaverSearchAdCredentials")
            .field("customer_id", &self.customer_id)
            .finish_non_exhaustive()
    }
}

/// Platform-specific identifiers for one integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum PlatformConfig {
    MetaAds(MetaAdsConfig),
    GoogleAds(GoogleAdsConfig),
    GoogleAnalytics(GoogleAnalyticsConfig),
    #[serde(alias = "naver_ads")]
    NaverSearchad(NaverSearchAdConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaAdsConfig {
    /// Ad account id with or without the `act_` prefix
    pub ad_account_id: String,
    /// Action types counted as conversions; empty means the defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversion_action_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleAdsConfig {
    pub customer_id: String,
    /// Manager account used to access `customer_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_customer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleAnalyticsConfig {
    pub property_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NaverSearchAdConfig {
    /// Restricts stats to these campaigns; empty means every campaign
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub campaign_ids: Vec<String>,
}

impl PlatformConfig {
    /// Parses a stored config bundle, reporting shape errors as invalid config.
    pub fn from_json(value: &JsonValue) -> Result<Self, FetchError> {
        serde_json::from_value(value.clone())
            .map_err(|e| FetchError::invalid_config(format!("malformed integration config: {e}")))
    }

    pub fn supports(&self, platform: Platform) -> bool {
        matches!(
            (self, platform),
            (PlatformConfig::MetaAds(_), Platform::MetaAds)
                | (PlatformConfig::GoogleAds(_), Platform::GoogleAds)
                | (PlatformConfig::GoogleAnalytics(_), Platform::GoogleAnalytics)
                | (
                    PlatformConfig::NaverSearchad(_),
                    Platform::NaverAds | Platform::NaverSearchad
                )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::FetchErrorKind;
    use serde_json::json;

    #[test]
    fn credentials_are_tagged_by_kind() {
        let creds: PlatformCredentials = serde_json::from_value(json!({
            "kind": "google_oauth",
            "refresh_token": "1//refresh"
        }))
        .expect("parses");

        assert!(creds.supports(Platform::GoogleAds));
        assert!(creds.supports(Platform::GoogleAnalytics));
        assert!(!creds.supports(Platform::MetaAds));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = PlatformCredentials::Meta(MetaCredentials {
            access_token: "EAAB-secret".to_string(),
            expires_at: None,
        });
        assert!(!format!("{creds:?}").contains("EAAB-secret"));
    }

    #[test]
    fn naver_ads_config_alias_is_accepted() {
        let config = PlatformConfig::from_json(&json!({
            "platform": "naver_ads"
        }))
        .expect("parses");

        assert!(config.supports(Platform::NaverAds));
        assert!(config.supports(Platform::NaverSearchad));
    }

    #[test]
    fn config_with_missing_field_is_invalid_config() {
        let err = PlatformConfig::from_json(&json!({ "platform": "google_ads" }))
            .expect_err("customer_id missing");
        assert_eq!(err.kind, FetchErrorKind::InvalidConfig);
    }
}

//! Platform adapters
//!
//! One adapter per external advertising/analytics platform. Each adapter
//! validates stored credentials and fetches a normalized daily metrics series;
//! the [`Registry`] maps a [`Platform`] to its adapter.

pub mod credentials;
pub mod google_ads;
pub mod google_analytics;
pub mod google_oauth;
pub mod http;
pub mod meta_ads;
pub mod naver_searchad;
pub mod registry;
pub mod trait_;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use credentials::{
    GoogleAdsConfig, GoogleAnalyticsConfig, GoogleOAuthCredentials, MetaAdsConfig,
    MetaCredentials, NaverSearchAdConfig, NaverSearchAdCredentials, PlatformConfig,
    PlatformCredentials,
};
pub use registry::{Registry, RegistryError};
pub use trait_::{
    DailyMetric, FetchError, FetchErrorKind, FetchOutcome, FetchRequest, PlatformAdapter,
    validate_series,
};

/// External platform an integration talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Legacy identifier for Naver Search Ads
    NaverAds,
    NaverSearchad,
    MetaAds,
    GoogleAds,
    GoogleAnalytics,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::NaverAds,
        Platform::NaverSearchad,
        Platform::MetaAds,
        Platform::GoogleAds,
        Platform::GoogleAnalytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::NaverAds => "naver_ads",
            Platform::NaverSearchad => "naver_searchad",
            Platform::MetaAds => "meta_ads",
            Platform::GoogleAds => "google_ads",
            Platform::GoogleAnalytics => "google_analytics",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored platform identifier is not one this service knows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform '{0}'")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

//! Adapter registry
//!
//! Maps each [`Platform`] to the adapter serving it. Built once at startup and
//! shared behind an `Arc`; [`Registry::validate`] makes a missing adapter a
//! startup failure rather than a sync-time surprise.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tracing::warn;

use super::{
    Platform, PlatformAdapter, UnknownPlatform,
    google_ads::{GoogleAdsAdapter, register_google_ads_adapter},
    google_analytics::{GoogleAnalyticsAdapter, register_google_analytics_adapter},
    google_oauth::GoogleOAuthClient,
    http::build_client,
    meta_ads::{MetaAdsAdapter, register_meta_ads_adapter},
    naver_searchad::{NaverSearchAdAdapter, register_naver_searchad_adapter},
};
use crate::config::PlatformSettings;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    UnknownPlatform(#[from] UnknownPlatform),
    #[error("no adapter registered for platform '{0}'")]
    NotRegistered(Platform),
    #[error("adapters missing for platforms: {missing:?}")]
    Incomplete { missing: Vec<Platform> },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Clone, Default)]
pub struct Registry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every production adapter from platform settings.
    ///
    /// All adapters share one HTTP client. Missing optional settings (Meta app
    /// credentials, the Google Ads developer token) are logged, not rejected.
    ///
    /// # Arguments
    ///
    /// * `settings` - Endpoints and app-level secrets per platform
    /// * `timeout` - Bound on each individual HTTP request
    ///
    /// # Returns
    ///
    /// A registry covering every platform, or `RegistryError::HttpClient` when
    /// the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::time::Duration;
    ///
    /// use portal_sync::{config::PlatformSettings, platforms::Registry};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let registry = Registry::from_settings(&PlatformSettings::default(), Duration::from_secs(30))?;
    /// registry.validate()?;
    /// let (platform, _adapter) = registry.resolve("meta_ads")?;
    /// assert_eq!(platform.as_str(), "meta_ads");
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_settings(
        settings: &PlatformSettings,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let http = build_client(timeout)?;
        let mut registry = Self::new();

        if settings.meta_app_id.is_none() || settings.meta_app_secret.is_none() {
            warn!("Meta app credentials not configured; long-lived tokens will not be exchanged");
        }
        let meta = MetaAdsAdapter::new(
            http.clone(),
            settings.meta_graph_base_url.clone(),
            settings.meta_app_id.clone(),
            settings.meta_app_secret.clone(),
            settings.meta_refresh_window_days,
        );
        register_meta_ads_adapter(&mut registry, Arc::new(meta));

        let oauth = GoogleOAuthClient::new(
            http.clone(),
            settings.google_oauth_token_url.clone(),
            settings.google_client_id.clone(),
            settings.google_client_secret.clone(),
        );
        if settings.google_ads_developer_token.is_none() {
            warn!("Google Ads developer token not configured; Google Ads syncs will fail");
        }
        let google_ads = GoogleAdsAdapter::new(
            http.clone(),
            settings.google_ads_base_url.clone(),
            settings.google_ads_developer_token.clone(),
            oauth.clone(),
        );
        register_google_ads_adapter(&mut registry, Arc::new(google_ads));

        let ga4 = GoogleAnalyticsAdapter::new(http.clone(), settings.ga4_base_url.clone(), oauth);
        register_google_analytics_adapter(&mut registry, Arc::new(ga4));

        let naver = NaverSearchAdAdapter::new(http, settings.naver_searchad_base_url.clone());
        register_naver_searchad_adapter(&mut registry, Arc::new(naver));

        Ok(registry)
    }

    pub fn register(&mut self, platform: Platform, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(platform, adapter);
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>, RegistryError> {
        self.adapters
            .get(&platform)
            .cloned()
            .ok_or(RegistryError::NotRegistered(platform))
    }

    /// Looks up the adapter for a stored platform identifier.
    ///
    /// # Returns
    ///
    /// The parsed platform with its adapter. `RegistryError::UnknownPlatform`
    /// when the identifier is not a known platform, `NotRegistered` when it is
    /// known but has no adapter.
    pub fn resolve(
        &self,
        platform: &str,
    ) -> Result<(Platform, Arc<dyn PlatformAdapter>), RegistryError> {
        let platform: Platform = platform.parse()?;
        Ok((platform, self.get(platform)?))
    }

    /// Fails when any known platform has no adapter.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let missing: Vec<Platform> = Platform::ALL
            .into_iter()
            .filter(|p| !self.adapters.contains_key(p))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Incomplete { missing })
        }
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

use crate::comps::cache::{CacheError, TtlTable};
use crate::comps::sources::{
    BrowseActiveSource, FindingSoldSource, PriceChartingSource, SerpApiSoldSource, pricecharting,
    serpapi,
};
use crate::comps::throttle::{FailureMonitor, RetryPolicy, SourceGuard};
use crate::comps::{Aggregator, TieredCache};
use crate::ebay::{self, AppTokenProvider};
use reqwest::Client;
use std::{env, fs, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read ttl file {path}: {source}")]
    TtlFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    TtlTable(#[from] CacheError),
}

/// Everything the comps pipeline reads from the environment.
#[derive(Clone)]
pub struct CompsConfig {
    pub pricecharting_token: Option<String>,
    pub ebay_credentials: Option<(String, String)>,
    pub serpapi_key: Option<String>,
    pub serpapi_monthly_quota: u32,
    pub min_interval: Duration,
    pub retry: RetryPolicy,
    pub sweep_every: Duration,
    pub last_good_ttl: Duration,
    pub ttl_table: TtlTable,
    pub redis_url: Option<String>,
}

impl CompsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|key| env::var(key).ok());
        if let Ok(path) = env::var("COMPS_TTL_FILE")
            && !path.trim().is_empty()
        {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::TtlFile {
                path: path.clone(),
                source,
            })?;
            config.ttl_table = TtlTable::from_yaml(&raw)?;
            info!(target = "flipcheck.config", path = %path, "ttl_overrides_loaded");
        }
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secret = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let millis = |key: &str, default: u64| Duration::from_millis(number(key, default));

        let default_hours = TieredCache::DEFAULT_LAST_GOOD_TTL.as_secs() / 3600;
        let last_good_hours = number("COMPS_LAST_GOOD_TTL_HOURS", default_hours).max(1);
        let app_id = secret("EBAY_APP_ID");
        let cert_id = secret("EBAY_CERT_ID");
        Self {
            pricecharting_token: secret("PRICECHARTING_API_TOKEN"),
            ebay_credentials: app_id.zip(cert_id),
            serpapi_key: secret("SERPAPI_API_KEY"),
            serpapi_monthly_quota: number(
                "SERPAPI_MONTHLY_QUOTA",
                serpapi::DEFAULT_MONTHLY_QUOTA as u64,
            )
            .min(u32::MAX as u64) as u32,
            min_interval: millis("COMPS_MIN_INTERVAL_MS", 1000),
            retry: RetryPolicy {
                max_retries: number("COMPS_MAX_RETRIES", 3).min(10) as u32,
                base: millis("COMPS_RETRY_BASE_MS", 500),
                jitter: millis("COMPS_RETRY_JITTER_MS", 250),
            },
            sweep_every: Duration::from_secs(number("COMPS_SWEEP_SECS", 60).max(1)),
            last_good_ttl: Duration::from_secs(last_good_hours * 3600),
            ttl_table: TtlTable::default(),
            redis_url: secret("REDIS_URL"),
        }
    }

    pub fn cache(&self) -> TieredCache {
        let redis = self.redis_url.as_deref().and_then(|url| {
            redis::Client::open(url)
                .inspect_err(|err| {
                    warn!(target = "flipcheck.config", error = %err, "redis_url_invalid")
                })
                .ok()
        });
        TieredCache::new(self.ttl_table.clone(), self.last_good_ttl).with_redis(redis)
    }

    fn guard(&self, name: &'static str, monitor: &Arc<FailureMonitor>) -> SourceGuard {
        SourceGuard::new(name, self.min_interval, self.retry, Arc::clone(monitor))
    }

    /// Sources in priority order: curated catalog, free sold search, paid
    /// sold search, active listings.
    pub fn aggregator(
        &self,
        http: &Client,
        cache: Arc<TieredCache>,
        monitor: &Arc<FailureMonitor>,
    ) -> Aggregator {
        let tokens = Arc::new(AppTokenProvider::new(
            http.clone(),
            self.ebay_credentials.clone(),
            ebay::config::OAUTH_TOKEN_URL.as_str(),
            &[ebay::config::PUBLIC_SCOPE],
        ));
        for (name, configured) in [
            ("pricecharting", self.pricecharting_token.is_some()),
            ("ebay", self.ebay_credentials.is_some()),
            ("serpapi", self.serpapi_key.is_some()),
        ] {
            if !configured {
                warn!(target = "flipcheck.config", source = name, "source_credentials_missing");
            }
        }

        Aggregator::new(cache)
            .with_source(Arc::new(PriceChartingSource::new(
                http.clone(),
                self.pricecharting_token.clone(),
                pricecharting::DEFAULT_BASE_URL,
                self.guard("pricecharting", monitor),
            )))
            .with_source(Arc::new(FindingSoldSource::new(
                http.clone(),
                self.ebay_credentials.as_ref().map(|(app_id, _)| app_id.clone()),
                ebay::config::FINDING_URL.as_str(),
                self.guard("ebay-finding", monitor),
            )))
            .with_source(Arc::new(SerpApiSoldSource::new(
                http.clone(),
                self.serpapi_key.clone(),
                serpapi::DEFAULT_ENDPOINT,
                self.serpapi_monthly_quota,
                self.guard("serpapi", monitor),
            )))
            .with_source(Arc::new(BrowseActiveSource::new(
                http.clone(),
                tokens,
                ebay::config::BROWSE_SEARCH_URL.as_str(),
                ebay::config::MARKETPLACE_ID.as_str(),
                self.guard("ebay-browse", monitor),
            )))
    }
}

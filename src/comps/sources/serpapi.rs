use super::{CompSource, SourceOutcome, UnavailableReason, execute, into_body, within_bounds};
use crate::comps::throttle::{RequestMeta, SourceGuard};
use crate::comps::{Category, ComparableSale, CompsSource, SaleDate, SearchQuery};
use crate::money::Money;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_with::{DefaultOnError, VecSkipError, serde_as};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_ENDPOINT: &str = "https://serpapi.com/search.json";
pub const DEFAULT_MONTHLY_QUOTA: u32 = 250;

#[derive(Debug, Default, Deserialize)]
struct PriceField {
    #[serde(default)]
    extracted: Option<f64>,
    #[serde(default)]
    raw: Option<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct OrganicResult {
    title: String,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    price: Option<PriceField>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    shipping: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    sold_date: Option<String>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug)]
struct QuotaState {
    month: String,
    used: u32,
}

/// Searches allowed per calendar month (UTC). The counter resets when the
/// month changes.
#[derive(Debug)]
pub struct MonthlyQuota {
    limit: u32,
    state: Mutex<QuotaState>,
}

impl MonthlyQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new(QuotaState {
                month: current_month(),
                used: 0,
            }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_in(&current_month())
    }

    fn try_acquire_in(&self, month: &str) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if state.month != month {
            state.month = month.to_string();
            state.used = 0;
        }
        if state.used >= self.limit {
            return false;
        }
        state.used += 1;
        true
    }

    /// The provider said we are out; stop asking until the month turns.
    pub fn exhaust(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.used = self.limit;
        }
    }

    pub fn remaining(&self) -> u32 {
        self.state
            .lock()
            .map(|state| {
                if state.month == current_month() {
                    self.limit.saturating_sub(state.used)
                } else {
                    self.limit
                }
            })
            .unwrap_or(0)
    }
}

fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// Sold listings scraped through SerpApi's eBay engine. Costs money per
/// call, so it sits behind a monthly quota.
pub struct SerpApiSoldSource {
    http: Client,
    api_key: Option<String>,
    endpoint: String,
    quota: MonthlyQuota,
    guard: SourceGuard,
}

impl SerpApiSoldSource {
    pub fn new(
        http: Client,
        api_key: Option<String>,
        endpoint: impl Into<String>,
        monthly_quota: u32,
        guard: SourceGuard,
    ) -> Self {
        Self {
            http,
            api_key: api_key.filter(|value| !value.trim().is_empty()),
            endpoint: endpoint.into(),
            quota: MonthlyQuota::new(monthly_quota),
            guard,
        }
    }
}

#[async_trait]
impl CompSource for SerpApiSoldSource {
    fn kind(&self) -> CompsSource {
        CompsSource::PaidSearch
    }

    async fn search(&self, query: &SearchQuery, _category: Category) -> SourceOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return SourceOutcome::Unavailable(UnavailableReason::MissingCredentials);
        };
        if !self.quota.try_acquire() {
            return SourceOutcome::Unavailable(UnavailableReason::QuotaExhausted);
        }
        debug!(
            target = "flipcheck.upstream",
            source = "serpapi",
            remaining = self.quota.remaining(),
            "monthly_quota_acquired"
        );
        let limit = query.effective_limit().to_string();
        let params = [
            ("engine", "ebay"),
            ("ebay_domain", "ebay.com"),
            ("_nkw", query.text.trim()),
            ("LH_Sold", "1"),
            ("LH_Complete", "1"),
            ("_ipg", limit.as_str()),
            ("api_key", api_key),
        ];
        let meta = RequestMeta::new(&self.endpoint);
        let outcome = self
            .guard
            .call(&meta, || execute(self.http.get(&self.endpoint).query(&params)))
            .await;
        match into_body(outcome).and_then(|body| parse_sold_results(&body)) {
            Ok(comps) => SourceOutcome::from_comps(
                comps
                    .into_iter()
                    .filter(|comp| within_bounds(query, comp.total_price))
                    .take(query.effective_limit())
                    .collect(),
            ),
            Err(UnavailableReason::QuotaExhausted) => {
                warn!(target = "flipcheck.upstream", source = "serpapi", "monthly_quota_exhausted");
                self.quota.exhaust();
                SourceOutcome::Unavailable(UnavailableReason::QuotaExhausted)
            }
            Err(reason) => SourceOutcome::Unavailable(reason),
        }
    }
}

pub(crate) fn parse_sold_results(body: &str) -> Result<Vec<ComparableSale>, UnavailableReason> {
    let payload: SearchResponse = serde_json::from_str(body)
        .map_err(|err| UnavailableReason::Malformed(err.to_string()))?;
    if let Some(error) = payload.error.as_deref() {
        let lowered = error.to_lowercase();
        if lowered.contains("hasn't returned any results") {
            return Ok(Vec::new());
        }
        if lowered.contains("run out of searches") {
            return Err(UnavailableReason::QuotaExhausted);
        }
        return Err(UnavailableReason::Malformed(error.to_string()));
    }

    Ok(payload
        .organic_results
        .into_iter()
        .filter_map(|result| {
            let price = result.price.as_ref().and_then(|price| {
                price
                    .extracted
                    .or_else(|| price.raw.as_deref().map(Money::parse).map(|m| m.value()))
            })?;
            let title = result.title.trim();
            if title.is_empty() || price <= 0.0 {
                return None;
            }
            let shipping = result
                .shipping
                .as_deref()
                .map(Money::parse)
                .unwrap_or_default();
            let sold = result
                .sold_date
                .as_deref()
                .map(|raw| raw.trim().trim_start_matches("Sold").trim().to_string())
                .unwrap_or_default();
            Some(
                ComparableSale::new(
                    title,
                    price,
                    shipping,
                    result.condition.unwrap_or_default(),
                    SaleDate::Sold(sold),
                )
                .with_image(result.thumbnail),
            )
        })
        .collect())
}

pub mod aggregator;
pub mod cache;
pub mod category;
pub mod condition;
pub mod deeplink;
pub mod family;
pub mod relevance;
pub mod sources;
pub mod throttle;

pub use aggregator::{Aggregator, ResolvedComps};
pub use cache::{CacheStats, TieredCache};
pub use category::Category;
pub use condition::{BucketStats, ConditionBreakdown, ConditionBucket};

use crate::money::{Money, round_two};
use serde::{Deserialize, Serialize};

/// Active listings sit above the clearing price; their medians are scaled by this.
pub const ACTIVE_LISTING_DISCOUNT: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SaleDate {
    Sold(String),
    ActiveListing,
    CatalogPrice,
}

/// One observed sale or listing. Built once by an adapter and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparableSale {
    pub title: String,
    pub price: f64,
    pub shipping: Money,
    pub total_price: f64,
    pub condition: String,
    pub sale_date: SaleDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ComparableSale {
    pub fn new(
        title: impl Into<String>,
        price: f64,
        shipping: Money,
        condition: impl Into<String>,
        sale_date: SaleDate,
    ) -> Self {
        let price = if price.is_finite() { price.max(0.0) } else { 0.0 };
        let condition = condition.into();
        Self {
            title: title.into(),
            price,
            shipping,
            total_price: round_two(price + shipping.value()),
            condition: if condition.trim().is_empty() {
                "Unknown".to_string()
            } else {
                condition
            },
            sale_date,
            image_url: None,
        }
    }

    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url.filter(|url| !url.trim().is_empty());
        self
    }

    pub fn bucket(&self) -> ConditionBucket {
        ConditionBucket::classify(&self.condition)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default = "SearchQuery::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub condition: Option<ConditionBucket>,
    /// Listing title of the item being priced, when it differs from `text`.
    #[serde(default)]
    pub item_title: Option<String>,
}

impl SearchQuery {
    pub const MAX_LIMIT: usize = 100;

    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: None,
            min_price: None,
            max_price: None,
            limit: Self::default_limit(),
            condition: None,
            item_title: None,
        }
    }

    fn default_limit() -> usize {
        50
    }

    pub fn normalized_text(&self) -> String {
        self.text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Bucket the item is priced from. An unstated condition is bucketed the
    /// same way as a comp listed as "Unknown".
    pub fn item_condition(&self) -> ConditionBucket {
        self.condition
            .unwrap_or_else(|| ConditionBucket::classify("Unknown"))
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    /// Lower-cased, whitespace-collapsed text combined with the price bounds.
    pub fn cache_key(&self) -> String {
        let bound = |value: Option<f64>| value.map(|v| format!("{v:.2}")).unwrap_or_default();
        format!(
            "comps:{}|{}|{}",
            self.normalized_text(),
            bound(self.min_price),
            bound(self.max_price)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompsSource {
    CuratedDatabase,
    FreeSearch,
    PaidSearch,
    ActiveListingFallback,
    None,
}

impl CompsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompsSource::CuratedDatabase => "curated-database",
            CompsSource::FreeSearch => "free-search",
            CompsSource::PaidSearch => "paid-search",
            CompsSource::ActiveListingFallback => "active-listing-fallback",
            CompsSource::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Clean-comp count a source needs before its result is trusted as `High`.
    pub fn high_threshold(source: CompsSource) -> Option<usize> {
        match source {
            CompsSource::CuratedDatabase => Some(1),
            CompsSource::FreeSearch => Some(5),
            CompsSource::PaidSearch => Some(8),
            CompsSource::ActiveListingFallback | CompsSource::None => None,
        }
    }

    pub fn assess(source: CompsSource, clean_comps: usize) -> Self {
        if clean_comps == 0 {
            return Confidence::Low;
        }
        match Self::high_threshold(source) {
            Some(threshold) if clean_comps >= threshold => Confidence::High,
            Some(_) if clean_comps >= 3 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }

    pub fn score(&self) -> u8 {
        match self {
            Confidence::High => 90,
            Confidence::Medium => 65,
            Confidence::Low => 35,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Live,
    Cache,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedCompsResult {
    pub query: String,
    pub category: Category,
    pub comps: Vec<ComparableSale>,
    pub source: CompsSource,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<ConditionBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AggregatedCompsResult {
    pub fn from_comps(
        query: &SearchQuery,
        category: Category,
        source: CompsSource,
        comps: Vec<ComparableSale>,
    ) -> Self {
        let confidence = Confidence::assess(source, comps.len());
        let buckets = ConditionBreakdown::from_comps(&comps);
        Self {
            query: query.text.trim().to_string(),
            category,
            comps,
            source,
            confidence,
            buckets: Some(buckets),
            message: None,
        }
    }

    pub fn no_data(query: &SearchQuery, category: Category) -> Self {
        Self {
            query: query.text.trim().to_string(),
            category,
            comps: Vec::new(),
            source: CompsSource::None,
            confidence: Confidence::Low,
            buckets: None,
            message: Some(format!(
                "No sold comps found for \"{}\". Verify the price manually before buying.",
                query.text.trim()
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.comps.is_empty()
    }

    /// Median for the item's own condition bucket. Never substitutes the
    /// other bucket and never prices from the combined `all` bucket, which is
    /// for display only.
    pub fn market_value(&self, condition: ConditionBucket) -> Option<f64> {
        let buckets = self.buckets.as_ref()?;
        let stats = match condition {
            ConditionBucket::NewLike => buckets.new_like.as_ref(),
            ConditionBucket::Used => buckets.used.as_ref(),
        }?;
        let median = if self.source == CompsSource::ActiveListingFallback {
            round_two(stats.median * ACTIVE_LISTING_DISCOUNT)
        } else {
            stats.median
        };
        Some(median)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sold(title: &str, price: f64, condition: &str) -> ComparableSale {
        ComparableSale::new(
            title,
            price,
            Money::free(),
            condition,
            SaleDate::Sold("2024-10-01".into()),
        )
    }

    #[test]
    fn total_price_includes_known_shipping_only() {
        let with_ship = ComparableSale::new(
            "Zelda BOTW",
            30.0,
            Money::Amount(4.99),
            "Used",
            SaleDate::Sold("x".into()),
        );
        assert_eq!(with_ship.total_price, 34.99);
        let unknown =
            ComparableSale::new("Zelda", 30.0, Money::unknown(), "", SaleDate::ActiveListing);
        assert_eq!(unknown.total_price, 30.0);
        assert_eq!(unknown.condition, "Unknown");
    }

    #[test]
    fn cache_key_normalizes_text_and_includes_bounds() {
        let mut a = SearchQuery::new("  Nike  Air Jordan 1 ");
        let b = SearchQuery::new("nike air jordan 1");
        assert_eq!(a.cache_key(), b.cache_key());
        a.min_price = Some(20.0);
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "comps:nike air jordan 1|20.00|");
    }

    #[test]
    fn confidence_follows_source_and_volume() {
        assert_eq!(Confidence::assess(CompsSource::CuratedDatabase, 1), Confidence::High);
        assert_eq!(Confidence::assess(CompsSource::FreeSearch, 6), Confidence::High);
        assert_eq!(Confidence::assess(CompsSource::PaidSearch, 6), Confidence::Medium);
        assert_eq!(Confidence::assess(CompsSource::PaidSearch, 8), Confidence::High);
        assert_eq!(Confidence::assess(CompsSource::FreeSearch, 2), Confidence::Low);
        assert_eq!(
            Confidence::assess(CompsSource::ActiveListingFallback, 40),
            Confidence::Low
        );
    }

    #[test]
    fn market_value_never_blends_buckets() {
        let query = SearchQuery::new("switch oled");
        let result = AggregatedCompsResult::from_comps(
            &query,
            Category::VideoGames,
            CompsSource::FreeSearch,
            vec![sold("Switch OLED", 250.0, "Used"), sold("Switch OLED", 270.0, "Used")],
        );
        assert_eq!(result.market_value(ConditionBucket::Used), Some(260.0));
        assert_eq!(result.market_value(ConditionBucket::NewLike), None);
        assert_eq!(query.item_condition(), ConditionBucket::Used);
    }

    #[test]
    fn unknown_condition_prices_from_used_bucket_not_combined() {
        let query = SearchQuery::new("switch oled");
        let mut comps: Vec<ComparableSale> = [40.0, 45.0, 50.0, 55.0, 60.0, 65.0]
            .into_iter()
            .map(|price| sold("Switch OLED", price, "Used"))
            .collect();
        comps.extend(
            [290.0, 295.0, 300.0, 305.0]
                .into_iter()
                .map(|price| sold("Switch OLED", price, "Brand New")),
        );
        let result = AggregatedCompsResult::from_comps(
            &query,
            Category::VideoGames,
            CompsSource::FreeSearch,
            comps,
        );
        let all = result.buckets.as_ref().and_then(|b| b.all.as_ref()).unwrap();
        assert_eq!(all.median, 62.5);
        assert_eq!(result.market_value(query.item_condition()), Some(52.5));
    }

    #[test]
    fn active_listing_value_is_discounted() {
        let query = SearchQuery::new("switch oled");
        let result = AggregatedCompsResult::from_comps(
            &query,
            Category::VideoGames,
            CompsSource::ActiveListingFallback,
            vec![ComparableSale::new(
                "Switch OLED",
                300.0,
                Money::free(),
                "Used",
                SaleDate::ActiveListing,
            )],
        );
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.market_value(ConditionBucket::Used), Some(255.0));
    }

    #[test]
    fn no_data_result_is_explicit() {
        let result =
            AggregatedCompsResult::no_data(&SearchQuery::new("mystery box"), Category::Other);
        assert_eq!(result.source, CompsSource::None);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.comps.is_empty());
        assert!(result.message.as_deref().unwrap().contains("mystery box"));
        assert_eq!(result.market_value(ConditionBucket::Used), None);
    }
}

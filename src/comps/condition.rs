use crate::comps::ComparableSale;
use crate::money::round_two;
use serde::{Deserialize, Serialize};

const NEW_LIKE_MARKERS: &[&str] = &["new", "sealed", "unopened", "refurbished", "certified"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionBucket {
    NewLike,
    Used,
}

impl ConditionBucket {
    pub fn classify(condition: &str) -> Self {
        let lowered = condition.to_lowercase();
        if NEW_LIKE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            ConditionBucket::NewLike
        } else {
            ConditionBucket::Used
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub count: usize,
    pub median: f64,
    pub low: f64,
    pub high: f64,
}

impl BucketStats {
    /// Summary of total prices; `None` for an empty slice.
    pub fn from_prices(prices: &[f64]) -> Option<Self> {
        if prices.is_empty() {
            return None;
        }
        let mut sorted = prices.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        Some(Self {
            count: sorted.len(),
            median: round_two(median),
            low: round_two(sorted[0]),
            high: round_two(sorted[sorted.len() - 1]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionBreakdown {
    pub new_like: Option<BucketStats>,
    pub used: Option<BucketStats>,
    pub all: Option<BucketStats>,
}

impl ConditionBreakdown {
    pub fn from_comps(comps: &[ComparableSale]) -> Self {
        let mut new_like = Vec::new();
        let mut used = Vec::new();
        for comp in comps {
            match comp.bucket() {
                ConditionBucket::NewLike => new_like.push(comp.total_price),
                ConditionBucket::Used => used.push(comp.total_price),
            }
        }
        let all: Vec<f64> = comps.iter().map(|comp| comp.total_price).collect();
        Self {
            new_like: BucketStats::from_prices(&new_like),
            used: BucketStats::from_prices(&used),
            all: BucketStats::from_prices(&all),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comps::SaleDate;
    use crate::money::Money;

    fn comp(total: f64, condition: &str) -> ComparableSale {
        ComparableSale::new(
            "Item",
            total,
            Money::free(),
            condition,
            SaleDate::Sold("2024-09-12".into()),
        )
    }

    #[test]
    fn classifies_condition_strings() {
        for raw in [
            "New",
            "Brand New",
            "New other (see details)",
            "Factory Sealed",
            "Unopened box",
            "Certified - Refurbished",
            "Seller refurbished",
        ] {
            assert_eq!(ConditionBucket::classify(raw), ConditionBucket::NewLike, "{raw}");
        }
        for raw in ["Used", "Pre-Owned", "For parts or not working", "Unknown", ""] {
            assert_eq!(ConditionBucket::classify(raw), ConditionBucket::Used, "{raw}");
        }
    }

    #[test]
    fn buckets_are_computed_independently() {
        let mut comps: Vec<ComparableSale> = [40.0, 45.0, 50.0, 55.0, 60.0, 65.0]
            .into_iter()
            .map(|price| comp(price, "Pre-Owned"))
            .collect();
        comps.extend([90.0, 95.0, 100.0, 105.0].into_iter().map(|price| comp(price, "New")));

        let breakdown = ConditionBreakdown::from_comps(&comps);
        let used = breakdown.used.unwrap();
        let new_like = breakdown.new_like.unwrap();
        let all = breakdown.all.unwrap();

        assert_eq!(used.count, 6);
        assert_eq!(used.median, 52.5);
        assert_eq!((used.low, used.high), (40.0, 65.0));
        assert_eq!(new_like.count, 4);
        assert_eq!(new_like.median, 97.5);
        assert_eq!((new_like.low, new_like.high), (90.0, 105.0));
        assert_eq!(all.count, 10);
        assert_eq!(all.median, 62.5);
        assert_ne!(all.median, used.median);
        assert_ne!(all.median, new_like.median);
    }

    #[test]
    fn median_uses_total_price_and_rounds() {
        let comps = vec![
            ComparableSale::new("A", 10.0, Money::Amount(3.333), "Used", SaleDate::ActiveListing),
            ComparableSale::new("B", 11.0, Money::unknown(), "Used", SaleDate::ActiveListing),
            ComparableSale::new("C", 20.0, Money::Amount(1.0), "Used", SaleDate::ActiveListing),
        ];
        let used = ConditionBreakdown::from_comps(&comps).used.unwrap();
        assert_eq!(used.median, 13.33);
        assert_eq!(used.low, 11.0);
        assert_eq!(used.high, 21.0);
    }

    #[test]
    fn empty_bucket_is_absent() {
        let breakdown = ConditionBreakdown::from_comps(&[comp(10.0, "Used")]);
        assert!(breakdown.new_like.is_none());
        assert_eq!(breakdown.used.as_ref().unwrap().count, 1);
        assert_eq!(ConditionBreakdown::from_comps(&[]).all, None);
    }
}

use super::{CompSource, SourceOutcome, UnavailableReason, execute, into_body, within_bounds};
use crate::comps::category::is_accessory;
use crate::comps::throttle::{RequestMeta, SourceGuard};
use crate::comps::{Category, ComparableSale, CompsSource, SaleDate, SearchQuery};
use crate::money::Money;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_with::{DefaultOnError, serde_as};

pub const DEFAULT_BASE_URL: &str = "https://www.pricecharting.com";

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct ProductResponse {
    #[serde(default)]
    status: String,
    #[serde(rename = "product-name", default)]
    product_name: String,
    #[serde(rename = "console-name", default)]
    console_name: String,
    #[serde_as(as = "DefaultOnError")]
    #[serde(rename = "loose-price", default)]
    loose_price: Option<u64>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(rename = "cib-price", default)]
    cib_price: Option<u64>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(rename = "new-price", default)]
    new_price: Option<u64>,
}

/// Curated catalog prices (loose / complete / sealed) for exact product matches.
pub struct PriceChartingSource {
    http: Client,
    token: Option<String>,
    base_url: String,
    guard: SourceGuard,
}

impl PriceChartingSource {
    pub fn new(
        http: Client,
        token: Option<String>,
        base_url: impl Into<String>,
        guard: SourceGuard,
    ) -> Self {
        Self {
            http,
            token: token.filter(|value| !value.trim().is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            guard,
        }
    }
}

#[async_trait]
impl CompSource for PriceChartingSource {
    fn kind(&self) -> CompsSource {
        CompsSource::CuratedDatabase
    }

    /// Only categories with exact catalog entries, and never accessories:
    /// "pokemon card case" goes to the listing searches.
    fn is_eligible(&self, query: &SearchQuery, category: Category) -> bool {
        category.has_catalog_match()
            && !is_accessory(&query.text)
            && !query.item_title.as_deref().is_some_and(is_accessory)
    }

    async fn search(&self, query: &SearchQuery, _category: Category) -> SourceOutcome {
        let Some(token) = self.token.as_deref() else {
            return SourceOutcome::Unavailable(UnavailableReason::MissingCredentials);
        };
        let url = format!("{}/api/product", self.base_url);
        let meta = RequestMeta::new(&url);
        let text = query.text.trim();
        let outcome = self
            .guard
            .call(&meta, || {
                execute(self.http.get(&url).query(&[("t", token), ("q", text)]))
            })
            .await;
        match into_body(outcome).and_then(|body| parse_product(&body)) {
            Ok(comps) => SourceOutcome::from_comps(
                comps
                    .into_iter()
                    .filter(|comp| within_bounds(query, comp.total_price))
                    .collect(),
            ),
            Err(reason) => SourceOutcome::Unavailable(reason),
        }
    }
}

pub(crate) fn parse_product(body: &str) -> Result<Vec<ComparableSale>, UnavailableReason> {
    let payload: ProductResponse = serde_json::from_str(body)
        .map_err(|err| UnavailableReason::Malformed(err.to_string()))?;
    if !payload.status.eq_ignore_ascii_case("success") || payload.product_name.trim().is_empty() {
        return Ok(Vec::new());
    }
    let title = format!("{} {}", payload.product_name.trim(), payload.console_name.trim())
        .trim()
        .to_string();
    let points = [
        (payload.loose_price, "Used (loose)"),
        (payload.cib_price, "Used (complete in box)"),
        (payload.new_price, "New (sealed)"),
    ];
    Ok(points
        .into_iter()
        .filter_map(|(pennies, condition)| {
            let pennies = pennies.filter(|value| *value > 0)?;
            Some(ComparableSale::new(
                title.clone(),
                pennies as f64 / 100.0,
                Money::unknown(),
                condition,
                SaleDate::CatalogPrice,
            ))
        })
        .collect())
}

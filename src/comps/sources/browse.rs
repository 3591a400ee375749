use super::{CompSource, SourceOutcome, UnavailableReason, execute, into_body, within_bounds};
use crate::comps::throttle::{RequestMeta, SourceGuard};
use crate::comps::{Category, ComparableSale, CompsSource, SaleDate, SearchQuery};
use crate::ebay::{AppTokenProvider, EbayAuthError};
use crate::money::{MissingReason, Money};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_with::{DefaultOnError, VecSkipError, serde_as};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
struct Amount {
    #[serde(default)]
    value: Option<String>,
}

impl Amount {
    fn parsed(&self) -> Option<f64> {
        self.value.as_deref()?.trim().parse().ok()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShippingOption {
    #[serde(default)]
    shipping_cost_type: Option<String>,
    #[serde(default)]
    shipping_cost: Option<Amount>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    #[serde(default)]
    image_url: Option<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    title: String,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    price: Option<Amount>,
    #[serde(default)]
    condition: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    image: Option<Image>,
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    shipping_options: Vec<ShippingOption>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde_as(as = "VecSkipError<_>")]
    #[serde(default)]
    item_summaries: Vec<ItemSummary>,
}

/// Live asking prices from the eBay Browse API, used only when no sold
/// data exists at all.
pub struct BrowseActiveSource {
    http: Client,
    tokens: Arc<AppTokenProvider>,
    endpoint: String,
    marketplace_id: String,
    guard: SourceGuard,
}

impl BrowseActiveSource {
    pub fn new(
        http: Client,
        tokens: Arc<AppTokenProvider>,
        endpoint: impl Into<String>,
        marketplace_id: impl Into<String>,
        guard: SourceGuard,
    ) -> Self {
        Self {
            http,
            tokens,
            endpoint: endpoint.into(),
            marketplace_id: marketplace_id.into(),
            guard,
        }
    }
}

fn price_filter(query: &SearchQuery) -> Option<String> {
    let bound = |value: Option<f64>| value.map(|v| format!("{v:.2}")).unwrap_or_default();
    if query.min_price.is_none() && query.max_price.is_none() {
        return None;
    }
    Some(format!(
        "price:[{}..{}],priceCurrency:USD",
        bound(query.min_price),
        bound(query.max_price)
    ))
}

#[async_trait]
impl CompSource for BrowseActiveSource {
    fn kind(&self) -> CompsSource {
        CompsSource::ActiveListingFallback
    }

    async fn search(&self, query: &SearchQuery, category: Category) -> SourceOutcome {
        let token = match self.tokens.bearer(&self.guard).await {
            Ok(token) => token,
            Err(EbayAuthError::MissingCredentials) => {
                return SourceOutcome::Unavailable(UnavailableReason::MissingCredentials);
            }
            Err(err) => {
                return SourceOutcome::Unavailable(UnavailableReason::Exhausted(err.to_string()));
            }
        };

        let mut params = vec![
            ("q", query.text.trim().to_string()),
            ("limit", query.effective_limit().to_string()),
        ];
        if let Some(filter) = price_filter(query) {
            params.push(("filter", filter));
        }
        if category.ebay_category_id() != "0" {
            params.push(("category_ids", category.ebay_category_id().to_string()));
        }

        let meta = RequestMeta::new(&self.endpoint)
            .header("Authorization", &token)
            .header("X-EBAY-C-MARKETPLACE-ID", &self.marketplace_id);
        let outcome = self
            .guard
            .call(&meta, || {
                execute(
                    self.http
                        .get(&self.endpoint)
                        .bearer_auth(&token)
                        .header("X-EBAY-C-MARKETPLACE-ID", &self.marketplace_id)
                        .query(&params),
                )
            })
            .await;
        match into_body(outcome).and_then(|body| parse_item_summaries(&body)) {
            Ok(comps) => SourceOutcome::from_comps(
                comps
                    .into_iter()
                    .filter(|comp| within_bounds(query, comp.total_price))
                    .collect(),
            ),
            Err(UnavailableReason::Rejected(401)) => {
                self.tokens.invalidate().await;
                SourceOutcome::Unavailable(UnavailableReason::Rejected(401))
            }
            Err(reason) => SourceOutcome::Unavailable(reason),
        }
    }
}

fn shipping(options: &[ShippingOption]) -> Money {
    let Some(option) = options.first() else {
        return Money::unknown();
    };
    if option
        .shipping_cost_type
        .as_deref()
        .is_some_and(|kind| kind.eq_ignore_ascii_case("CALCULATED"))
    {
        return Money::Missing(MissingReason::Calculated);
    }
    match option.shipping_cost.as_ref().and_then(Amount::parsed) {
        Some(cost) if cost == 0.0 => Money::free(),
        Some(cost) => Money::amount(cost),
        None => Money::unknown(),
    }
}

pub(crate) fn parse_item_summaries(body: &str) -> Result<Vec<ComparableSale>, UnavailableReason> {
    let page: SearchPage = serde_json::from_str(body)
        .map_err(|err| UnavailableReason::Malformed(err.to_string()))?;
    Ok(page
        .item_summaries
        .into_iter()
        .filter_map(|item| {
            let price = item.price.as_ref().and_then(Amount::parsed)?;
            if item.title.trim().is_empty() || price <= 0.0 {
                return None;
            }
            Some(
                ComparableSale::new(
                    item.title.trim(),
                    price,
                    shipping(&item.shipping_options),
                    item.condition.clone().unwrap_or_default(),
                    SaleDate::ActiveListing,
                )
                .with_image(item.image.and_then(|image| image.image_url)),
            )
        })
        .collect())
}

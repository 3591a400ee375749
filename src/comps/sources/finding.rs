use super::{CompSource, SourceOutcome, UnavailableReason, execute, into_body, within_bounds};
use crate::comps::throttle::{RequestMeta, SourceGuard};
use crate::comps::{Category, ComparableSale, CompsSource, SaleDate, SearchQuery};
use crate::money::{MissingReason, Money};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

const SERVICE_VERSION: &str = "1.13.0";
/// Finding API error id for "exceeded the number of times the operation is allowed".
const RATE_LIMIT_ERROR_ID: &str = "10001";

/// Completed, sold listings from the eBay Finding API (`findCompletedItems`).
pub struct FindingSoldSource {
    http: Client,
    app_id: Option<String>,
    endpoint: String,
    guard: SourceGuard,
}

impl FindingSoldSource {
    pub fn new(
        http: Client,
        app_id: Option<String>,
        endpoint: impl Into<String>,
        guard: SourceGuard,
    ) -> Self {
        Self {
            http,
            app_id: app_id.filter(|value| !value.trim().is_empty()),
            endpoint: endpoint.into(),
            guard,
        }
    }

    fn params(
        &self,
        app_id: &str,
        query: &SearchQuery,
        category: Category,
    ) -> Vec<(String, String)> {
        let mut params = vec![
            ("OPERATION-NAME".to_string(), "findCompletedItems".to_string()),
            ("SERVICE-VERSION".to_string(), SERVICE_VERSION.to_string()),
            ("SECURITY-APPNAME".to_string(), app_id.to_string()),
            ("RESPONSE-DATA-FORMAT".to_string(), "JSON".to_string()),
            ("REST-PAYLOAD".to_string(), String::new()),
            ("keywords".to_string(), query.text.trim().to_string()),
            (
                "paginationInput.entriesPerPage".to_string(),
                query.effective_limit().to_string(),
            ),
            ("sortOrder".to_string(), "EndTimeSoonest".to_string()),
            ("itemFilter(0).name".to_string(), "SoldItemsOnly".to_string()),
            ("itemFilter(0).value".to_string(), "true".to_string()),
        ];
        let mut filter = 1;
        for (name, bound) in [("MinPrice", query.min_price), ("MaxPrice", query.max_price)] {
            if let Some(value) = bound {
                params.push((format!("itemFilter({filter}).name"), name.to_string()));
                params.push((format!("itemFilter({filter}).value"), format!("{value:.2}")));
                filter += 1;
            }
        }
        if category.ebay_category_id() != "0" {
            params.push(("categoryId".to_string(), category.ebay_category_id().to_string()));
        }
        params
    }
}

#[async_trait]
impl CompSource for FindingSoldSource {
    fn kind(&self) -> CompsSource {
        CompsSource::FreeSearch
    }

    async fn search(&self, query: &SearchQuery, category: Category) -> SourceOutcome {
        let Some(app_id) = self.app_id.as_deref() else {
            return SourceOutcome::Unavailable(UnavailableReason::MissingCredentials);
        };
        let params = self.params(app_id, query, category);
        let meta = RequestMeta::new(&self.endpoint).header("SECURITY-APPNAME", app_id);
        let outcome = self
            .guard
            .call(&meta, || execute(self.http.get(&self.endpoint).query(&params)))
            .await;
        match into_body(outcome).and_then(|body| parse_completed_items(&body)) {
            Ok(comps) => SourceOutcome::from_comps(
                comps
                    .into_iter()
                    .filter(|comp| within_bounds(query, comp.total_price))
                    .take(query.effective_limit())
                    .collect(),
            ),
            Err(reason) => SourceOutcome::Unavailable(reason),
        }
    }
}

/// The Finding API wraps every scalar in a one-element array.
fn first<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value.get(key)? {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn first_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    first(value, key)?.as_str()
}

fn amount(value: &Value, key: &str) -> Option<f64> {
    let raw = first(value, key)?;
    let text = raw.get("__value__").unwrap_or(raw);
    match text {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn shipping(item: &Value) -> Money {
    let Some(info) = first(item, "shippingInfo") else {
        return Money::unknown();
    };
    let shipping_type = first_str(info, "shippingType").unwrap_or_default();
    if shipping_type.eq_ignore_ascii_case("free") {
        return Money::free();
    }
    if shipping_type.starts_with("Calculated") {
        return Money::Missing(MissingReason::Calculated);
    }
    match amount(info, "shippingServiceCost") {
        Some(cost) if cost == 0.0 => Money::free(),
        Some(cost) => Money::amount(cost),
        None => Money::unknown(),
    }
}

pub(crate) fn parse_completed_items(body: &str) -> Result<Vec<ComparableSale>, UnavailableReason> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|err| UnavailableReason::Malformed(err.to_string()))?;
    let response = first(&payload, "findCompletedItemsResponse")
        .ok_or_else(|| UnavailableReason::Malformed("missing findCompletedItemsResponse".into()))?;

    let ack = first_str(response, "ack").unwrap_or_default();
    if ack.eq_ignore_ascii_case("failure") {
        let error = first(response, "errorMessage").and_then(|m| first(m, "error"));
        let error_id = error.and_then(|e| first_str(e, "errorId")).unwrap_or_default();
        if error_id == RATE_LIMIT_ERROR_ID {
            return Err(UnavailableReason::QuotaExhausted);
        }
        let message = error
            .and_then(|e| first_str(e, "message"))
            .unwrap_or("ack Failure");
        return Err(UnavailableReason::Malformed(message.to_string()));
    }

    let items = first(response, "searchResult")
        .and_then(|result| result.get("item"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    Ok(items
        .iter()
        .filter_map(|item| {
            let status = first(item, "sellingStatus")?;
            let state = first_str(status, "sellingState").unwrap_or("EndedWithSales");
            if state != "EndedWithSales" {
                return None;
            }
            let title = first_str(item, "title")?.trim();
            let price = amount(status, "convertedCurrentPrice")
                .or_else(|| amount(status, "currentPrice"))?;
            if title.is_empty() || price <= 0.0 {
                return None;
            }
            let condition = first(item, "condition")
                .and_then(|c| first_str(c, "conditionDisplayName"))
                .unwrap_or_default();
            let ended = first(item, "listingInfo")
                .and_then(|info| first_str(info, "endTime"))
                .unwrap_or_default();
            Some(
                ComparableSale::new(
                    title,
                    price,
                    shipping(item),
                    condition,
                    SaleDate::Sold(ended.to_string()),
                )
                .with_image(first_str(item, "galleryURL").map(str::to_string)),
            )
        })
        .collect())
}

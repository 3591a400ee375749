pub mod browse;
pub mod finding;
pub mod pricecharting;
pub mod serpapi;

pub use browse::BrowseActiveSource;
pub use finding::FindingSoldSource;
pub use pricecharting::PriceChartingSource;
pub use serpapi::SerpApiSoldSource;

use crate::comps::throttle::{CallResult, UpstreamResponse};
use crate::comps::{Category, ComparableSale, CompsSource, SearchQuery};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum UnavailableReason {
    MissingCredentials,
    QuotaExhausted,
    /// 4xx from the provider; never retried.
    Rejected(u16),
    /// Transient failures that outlasted the retry budget.
    Exhausted(String),
    Malformed(String),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::MissingCredentials => write!(f, "missing credentials"),
            UnavailableReason::QuotaExhausted => write!(f, "quota exhausted"),
            UnavailableReason::Rejected(status) => write!(f, "rejected with HTTP {status}"),
            UnavailableReason::Exhausted(detail) => write!(f, "retries exhausted: {detail}"),
            UnavailableReason::Malformed(detail) => write!(f, "malformed response: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Found(Vec<ComparableSale>),
    Empty,
    Unavailable(UnavailableReason),
}

impl SourceOutcome {
    pub fn from_comps(comps: Vec<ComparableSale>) -> Self {
        if comps.is_empty() {
            SourceOutcome::Empty
        } else {
            SourceOutcome::Found(comps)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceOutcome::Found(_) => "found",
            SourceOutcome::Empty => "empty",
            SourceOutcome::Unavailable(_) => "unavailable",
        }
    }
}

/// One external pricing source. Expected failures come back as
/// `SourceOutcome::Unavailable`, never as panics or errors.
#[async_trait]
pub trait CompSource: Send + Sync + 'static {
    fn kind(&self) -> CompsSource;

    fn is_eligible(&self, _query: &SearchQuery, _category: Category) -> bool {
        true
    }

    async fn search(&self, query: &SearchQuery, category: Category) -> SourceOutcome;
}

pub(crate) async fn execute(request: RequestBuilder) -> CallResult {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok(UpstreamResponse::new(status, body))
}

/// Maps the final outcome of a guarded call onto a body to parse or a reason
/// the source is unavailable.
pub(crate) fn into_body(outcome: CallResult) -> Result<String, UnavailableReason> {
    match outcome {
        Ok(response) if response.is_success() => Ok(response.body),
        Ok(response) if response.status == 429 => Err(UnavailableReason::QuotaExhausted),
        Ok(response) if response.is_transient() => Err(UnavailableReason::Exhausted(format!(
            "HTTP {}",
            response.status
        ))),
        Ok(response) => Err(UnavailableReason::Rejected(response.status)),
        Err(err) => Err(UnavailableReason::Exhausted(err.to_string())),
    }
}

pub(crate) fn within_bounds(query: &SearchQuery, price: f64) -> bool {
    query.min_price.is_none_or(|min| price >= min) && query.max_price.is_none_or(|max| price <= max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comps::throttle::TransportError;

    #[test]
    fn maps_final_outcomes() {
        assert_eq!(into_body(Ok(UpstreamResponse::new(200, "ok"))), Ok("ok".to_string()));
        assert_eq!(
            into_body(Ok(UpstreamResponse::new(429, ""))),
            Err(UnavailableReason::QuotaExhausted)
        );
        assert_eq!(
            into_body(Ok(UpstreamResponse::new(401, ""))),
            Err(UnavailableReason::Rejected(401))
        );
        assert_eq!(
            into_body(Ok(UpstreamResponse::new(503, ""))),
            Err(UnavailableReason::Exhausted("HTTP 503".into()))
        );
        assert!(matches!(
            into_body(Err(TransportError::Timeout)),
            Err(UnavailableReason::Exhausted(_))
        ));
    }

    #[test]
    fn price_bounds_are_inclusive() {
        let mut query = SearchQuery::new("x");
        query.min_price = Some(10.0);
        query.max_price = Some(20.0);
        assert!(within_bounds(&query, 10.0));
        assert!(within_bounds(&query, 20.0));
        assert!(!within_bounds(&query, 9.99));
        assert!(!within_bounds(&query, 20.01));
        assert!(within_bounds(&SearchQuery::new("x"), 1e6));
    }
}

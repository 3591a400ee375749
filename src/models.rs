use crate::comps::{ResolvedComps, SearchQuery};
use crate::decision::{DecisionInput, MarginDecision, PLATFORM_FEE_RATE};
use crate::money::Money;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Rejects queries no source could answer sensibly.
pub fn validate_query(query: &SearchQuery) -> Result<(), String> {
    if query.text.trim().is_empty() {
        return Err("query text must not be empty".into());
    }
    for (name, bound) in [("min_price", query.min_price), ("max_price", query.max_price)] {
        if bound.is_some_and(|value| !value.is_finite() || value < 0.0) {
            return Err(format!("{name} must be a non-negative number"));
        }
    }
    if let (Some(min), Some(max)) = (query.min_price, query.max_price)
        && min > max
    {
        return Err(format!("min_price {min} is above max_price {max}"));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct CompsResponse {
    #[serde(flatten)]
    pub resolved: ResolvedComps,
    /// Median for the requested condition, discounted for active listings.
    pub market_value: Option<f64>,
    pub search_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateRequest {
    #[serde(flatten)]
    pub query: SearchQuery,
    pub buy_price: f64,
    #[serde(default)]
    pub shipping_in: Money,
    #[serde(default)]
    pub platform_fee_rate: Option<f64>,
    #[serde(default)]
    pub outbound_shipping: Option<Money>,
}

impl EvaluateRequest {
    pub fn decision_input(&self, market_value: f64, resolved: &ResolvedComps) -> DecisionInput {
        let mut input = DecisionInput::new(self.buy_price, self.shipping_in, market_value);
        input.platform_fee_rate = self.platform_fee_rate.unwrap_or(PLATFORM_FEE_RATE);
        if let Some(outbound) = self.outbound_shipping {
            input.outbound_shipping = outbound;
        }
        input.price_confidence = Some(resolved.result.confidence);
        input
    }
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub comps: ResolvedComps,
    pub market_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<MarginDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub search_url: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchUrlParams {
    pub q: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: String,
}

use crate::comps::Confidence;
use crate::money::{Money, round_two};
use serde::{Deserialize, Serialize};

pub const PLATFORM_FEE_RATE: f64 = 0.13;
/// Outbound shipping defaults to buyer-paid.
pub const DEFAULT_OUTBOUND_SHIPPING: f64 = 0.0;
/// Margin the maximum buy price is solved for.
pub const TARGET_MARGIN: f64 = 0.25;
const UNRATED_CONFIDENCE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Flip,
    Skip,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Flip => "Flip it",
            Verdict::Skip => "Skip it",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub buy_price: f64,
    #[serde(default)]
    pub shipping_in: Money,
    pub expected_sale_price: f64,
    #[serde(default = "DecisionInput::default_fee_rate")]
    pub platform_fee_rate: f64,
    #[serde(default = "DecisionInput::default_outbound")]
    pub outbound_shipping: Money,
    /// Confidence of the price estimate behind `expected_sale_price`.
    #[serde(default)]
    pub price_confidence: Option<Confidence>,
}

impl DecisionInput {
    pub fn new(buy_price: f64, shipping_in: Money, expected_sale_price: f64) -> Self {
        Self {
            buy_price,
            shipping_in,
            expected_sale_price,
            platform_fee_rate: PLATFORM_FEE_RATE,
            outbound_shipping: Self::default_outbound(),
            price_confidence: None,
        }
    }

    fn default_fee_rate() -> f64 {
        PLATFORM_FEE_RATE
    }

    fn default_outbound() -> Money {
        Money::amount(DEFAULT_OUTBOUND_SHIPPING)
    }

    fn degenerate_reason(&self) -> Option<String> {
        if !self.buy_price.is_finite() || self.buy_price <= 0.0 {
            return Some(format!(
                "purchase price must be greater than $0 (got {})",
                usd(self.buy_price)
            ));
        }
        if !self.expected_sale_price.is_finite() || self.expected_sale_price <= 0.0 {
            return Some(format!(
                "expected sale price must be greater than $0 (got {})",
                usd(self.expected_sale_price)
            ));
        }
        if !self.platform_fee_rate.is_finite() || !(0.0..1.0).contains(&self.platform_fee_rate) {
            return Some(format!(
                "platform fee rate must be between 0 and 1 (got {})",
                self.platform_fee_rate
            ));
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginDecision {
    pub verdict: Verdict,
    pub label: String,
    /// Display margin, clamped to 0..=100.
    pub margin_percent: f64,
    pub confidence: u8,
    pub net_profit: f64,
    pub max_buy_price: f64,
    pub market_value: f64,
    pub trace: Vec<String>,
}

fn usd(value: f64) -> String {
    if value.is_finite() && value < 0.0 {
        format!("-${:.2}", -value)
    } else if value.is_finite() {
        format!("${value:.2}")
    } else {
        "n/a".to_string()
    }
}

fn shipping_line(direction: &str, shipping: &Money) -> String {
    match shipping {
        Money::Amount(value) => format!("Shipping {direction}: -{}", usd(*value)),
        Money::Missing(reason) => format!("Shipping {direction}: {} ($0.00)", reason.as_str()),
    }
}

/// Buy price at which net profit equals `TARGET_MARGIN` of that buy price.
fn max_buy_price(net_proceeds: f64, shipping_in: f64) -> f64 {
    round_two(((net_proceeds - shipping_in) / (1.0 + TARGET_MARGIN)).max(0.0))
}

/// Pure: the same input always produces the same decision and trace.
pub fn calculate_decision(input: &DecisionInput) -> MarginDecision {
    if let Some(reason) = input.degenerate_reason() {
        return MarginDecision {
            verdict: Verdict::Skip,
            label: Verdict::Skip.label().to_string(),
            margin_percent: 0.0,
            confidence: 0,
            net_profit: 0.0,
            max_buy_price: 0.0,
            market_value: if input.expected_sale_price.is_finite() {
                round_two(input.expected_sale_price.max(0.0))
            } else {
                0.0
            },
            trace: vec![format!("Skipped: {reason}")],
        };
    }

    let sale = input.expected_sale_price;
    let fees = round_two(sale * input.platform_fee_rate);
    let shipping_in = input.shipping_in.value();
    let shipping_out = input.outbound_shipping.value();
    let net_proceeds = round_two(sale - fees - shipping_out);
    let net_profit = round_two(net_proceeds - input.buy_price - shipping_in);
    let raw_margin = net_profit / input.buy_price * 100.0;
    let margin_percent = round_two(raw_margin.clamp(0.0, 100.0));
    let verdict = if net_profit > 0.0 {
        Verdict::Flip
    } else {
        Verdict::Skip
    };
    let max_buy = max_buy_price(net_proceeds, shipping_in);

    let mut trace = vec![
        format!("Expected sale price: {}", usd(sale)),
        format!(
            "Platform fees ({:.1}%): -{}",
            input.platform_fee_rate * 100.0,
            usd(fees)
        ),
        format!("Purchase price: -{}", usd(input.buy_price)),
        shipping_line("in", &input.shipping_in),
        shipping_line("out", &input.outbound_shipping),
        format!("Net profit: {}", usd(net_profit)),
    ];
    if raw_margin > 100.0 || raw_margin < 0.0 {
        trace.push(format!(
            "Margin: {raw_margin:.1}% (shown as {margin_percent:.0}%)"
        ));
    } else {
        trace.push(format!("Margin: {raw_margin:.1}%"));
    }
    trace.push(match verdict {
        Verdict::Flip => "Verdict: flip (net profit is positive)".to_string(),
        Verdict::Skip => "Verdict: skip (no profit after costs)".to_string(),
    });
    trace.push(format!(
        "Max buy price for a {:.0}% margin: {}",
        TARGET_MARGIN * 100.0,
        usd(max_buy)
    ));

    MarginDecision {
        verdict,
        label: verdict.label().to_string(),
        margin_percent,
        confidence: input
            .price_confidence
            .map(|confidence| confidence.score())
            .unwrap_or(UNRATED_CONFIDENCE),
        net_profit,
        max_buy_price: max_buy,
        market_value: round_two(sale),
        trace,
    }
}

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Why an amount is absent. Every reason counts as zero in arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    Free,
    Unknown,
    Calculated,
}

impl MissingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingReason::Free => "free",
            MissingReason::Unknown => "unknown",
            MissingReason::Calculated => "calculated",
        }
    }
}

/// A dollar amount as it arrives at the system boundary.
///
/// Upstream payloads and callers hand us numbers, `"$5.99"`, `"Free"`,
/// `"Calculated"` and worse. Everything is folded into this type once so that
/// nothing downstream compares strings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Money {
    Amount(f64),
    Missing(MissingReason),
}

impl Default for Money {
    fn default() -> Self {
        Money::Missing(MissingReason::Unknown)
    }
}

impl Money {
    pub fn amount(value: f64) -> Self {
        if value.is_finite() && value >= 0.0 {
            Money::Amount(value)
        } else {
            Money::Missing(MissingReason::Unknown)
        }
    }

    pub fn free() -> Self {
        Money::Missing(MissingReason::Free)
    }

    pub fn unknown() -> Self {
        Money::Missing(MissingReason::Unknown)
    }

    pub fn parse(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return Money::unknown();
        }
        if lowered.contains("free") {
            return Money::free();
        }
        if lowered.contains("calculated") {
            return Money::Missing(MissingReason::Calculated);
        }
        let cleaned: String = lowered
            .replace("shipping", "")
            .replace("usd", "")
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        match cleaned.parse::<f64>() {
            Ok(value) => Money::amount(value),
            Err(_) => Money::unknown(),
        }
    }

    /// Value used in arithmetic; absent amounts count as zero.
    pub fn value(&self) -> f64 {
        match self {
            Money::Amount(value) => *value,
            Money::Missing(_) => 0.0,
        }
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Money::Amount(value) => serializer.serialize_f64(*value),
            Money::Missing(reason) => serializer.serialize_str(reason.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
            Null(()),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Money::amount(value),
            Raw::Text(text) => Money::parse(&text),
            Raw::Null(()) => Money::unknown(),
        })
    }
}

pub fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

use once_cell::sync::Lazy;
use std::env;

pub static EBAY_ENV: Lazy<String> =
    Lazy::new(|| env::var("EBAY_ENV").unwrap_or_else(|_| "PROD".to_string()));

pub static MARKETPLACE_ID: Lazy<String> =
    Lazy::new(|| env::var("EBAY_MARKETPLACE_ID").unwrap_or_else(|_| "EBAY_US".to_string()));

fn is_prod() -> bool {
    EBAY_ENV.as_str().eq_ignore_ascii_case("PROD")
}

pub static ROOT: Lazy<String> = Lazy::new(|| {
    if is_prod() {
        "https://api.ebay.com".to_string()
    } else {
        "https://api.sandbox.ebay.com".to_string()
    }
});

pub static OAUTH_TOKEN_URL: Lazy<String> =
    Lazy::new(|| format!("{}/identity/v1/oauth2/token", *ROOT));

pub static BROWSE_SEARCH_URL: Lazy<String> =
    Lazy::new(|| format!("{}/buy/browse/v1/item_summary/search", *ROOT));

pub static FINDING_URL: Lazy<String> = Lazy::new(|| {
    if is_prod() {
        "https://svcs.ebay.com/services/search/FindingService/v1".to_string()
    } else {
        "https://svcs.sandbox.ebay.com/services/search/FindingService/v1".to_string()
    }
});

pub const PUBLIC_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";


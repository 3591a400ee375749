use reqwest::Client;
use std::time::Duration;

/// Shared outbound client. A request past the timeout surfaces as a
/// transport error and goes through the retry policy like any other.
pub fn build_client() -> Client {
    let timeout = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10);
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .user_agent(concat!("flipcheck-api-rs/", env!("CARGO_PKG_VERSION")))
        .gzip(true)
        .build()
        .unwrap_or_else(|_| Client::new())
}

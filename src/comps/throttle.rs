use rand::Rng;
use serde::Serialize;
use std::{
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::Mutex as AsyncMutex,
    time::{Instant, sleep, sleep_until},
};
use tracing::{error, warn};
use uuid::Uuid;

const BODY_SNIPPET_CHARS: usize = 300;
const SAMPLE_HISTORY: usize = 50;
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "api_key",
    "apikey",
    "t",
    "security-appname",
    "x-ebay-c-enduserctx",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_transient(&self) -> bool {
        self.status >= 500
    }
}

pub type CallResult = Result<UpstreamResponse, TransportError>;

/// Enforces a minimum spacing between calls to one upstream.
///
/// The lock is held while waiting, so concurrent callers queue up behind each
/// other instead of all passing the check at once.
pub struct Throttle {
    min_interval: Duration,
    last_call: AsyncMutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: AsyncMutex::new(None),
        }
    }

    pub async fn wait_turn(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let ready = previous + self.min_interval;
            if ready > Instant::now() {
                sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_millis(500),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// `base * 3^attempt`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(3u32.saturating_pow(attempt))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

/// Where a call went and with which headers; secrets are redacted on capture.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
}

impl RequestMeta {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.split('?').next().unwrap_or_default().to_string(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

pub fn redact_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if SENSITIVE_HEADERS.contains(&name.to_lowercase().as_str()) {
                (name.clone(), "[redacted]".to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSample {
    pub endpoint: String,
    pub status: Option<u16>,
    pub correlation_id: Uuid,
    pub attempt: u32,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl ErrorSample {
    fn capture(meta: &RequestMeta, outcome: &CallResult, attempt: u32) -> Self {
        let (status, body) = match outcome {
            Ok(response) => (Some(response.status), response.body.as_str()),
            Err(TransportError::Timeout) => (None, "timeout"),
            Err(TransportError::Network(message)) => (None, message.as_str()),
        };
        Self {
            endpoint: meta.endpoint.clone(),
            status,
            correlation_id: Uuid::new_v4(),
            attempt,
            body: body.chars().take(BODY_SNIPPET_CHARS).collect(),
            headers: redact_headers(&meta.headers),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub total_failures: u64,
    pub alerts_raised: u64,
    pub recent_samples: Vec<ErrorSample>,
}

#[derive(Default)]
struct MonitorState {
    window: VecDeque<Instant>,
    samples: VecDeque<ErrorSample>,
    total_failures: u64,
    alerts_raised: u64,
}

/// Counts transient upstream failures and raises an alert when too many land
/// inside the alert window. Shared between source guards by `Arc`.
pub struct FailureMonitor {
    alert_window: Duration,
    alert_threshold: usize,
    state: Mutex<MonitorState>,
}

impl Default for FailureMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(120), 5)
    }
}

impl FailureMonitor {
    pub fn new(alert_window: Duration, alert_threshold: usize) -> Self {
        Self {
            alert_window,
            alert_threshold: alert_threshold.max(1),
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Returns true when this failure tripped an alert.
    pub fn record(&self, sample: ErrorSample) -> bool {
        warn!(
            target = "flipcheck.upstream",
            endpoint = %sample.endpoint,
            status = ?sample.status,
            correlation_id = %sample.correlation_id,
            attempt = sample.attempt,
            body = %sample.body,
            headers = ?sample.headers,
            "transient_upstream_failure"
        );

        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let now = Instant::now();
        state.total_failures += 1;
        state.window.push_back(now);
        while state
            .window
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) > self.alert_window)
        {
            state.window.pop_front();
        }
        if state.samples.len() == SAMPLE_HISTORY {
            state.samples.pop_front();
        }
        let endpoint = sample.endpoint.clone();
        state.samples.push_back(sample);

        if state.window.len() >= self.alert_threshold {
            state.alerts_raised += 1;
            let failures = state.window.len();
            state.window.clear();
            error!(
                target = "flipcheck.alert",
                endpoint = %endpoint,
                failures,
                window_secs = self.alert_window.as_secs(),
                "upstream_failure_burst"
            );
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        match self.state.lock() {
            Ok(state) => MonitorSnapshot {
                total_failures: state.total_failures,
                alerts_raised: state.alerts_raised,
                recent_samples: state.samples.iter().cloned().collect(),
            },
            Err(_) => MonitorSnapshot {
                total_failures: 0,
                alerts_raised: 0,
                recent_samples: Vec::new(),
            },
        }
    }
}

/// Calls `call` until it succeeds, fails permanently (4xx) or the retry budget
/// runs out. The last outcome is returned as-is, error or not.
pub async fn retrying_call<F, Fut>(
    policy: &RetryPolicy,
    monitor: &FailureMonitor,
    meta: &RequestMeta,
    mut call: F,
) -> CallResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CallResult>,
{
    let mut attempt = 0u32;
    loop {
        let outcome = call().await;
        let transient = match &outcome {
            Ok(response) => response.is_transient(),
            Err(_) => true,
        };
        if !transient {
            return outcome;
        }
        monitor.record(ErrorSample::capture(meta, &outcome, attempt));
        if attempt >= policy.max_retries {
            return outcome;
        }
        sleep(policy.delay_for(attempt)).await;
        attempt += 1;
    }
}

/// Throttle, retry policy and failure monitor for one upstream source.
pub struct SourceGuard {
    pub name: &'static str,
    throttle: Throttle,
    policy: RetryPolicy,
    monitor: Arc<FailureMonitor>,
}

impl SourceGuard {
    pub fn new(
        name: &'static str,
        min_interval: Duration,
        policy: RetryPolicy,
        monitor: Arc<FailureMonitor>,
    ) -> Self {
        Self {
            name,
            throttle: Throttle::new(min_interval),
            policy,
            monitor,
        }
    }

    /// Every attempt, retries included, waits its turn at the throttle.
    pub async fn call<F, Fut>(&self, meta: &RequestMeta, mut call: F) -> CallResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallResult>,
    {
        let throttle = &self.throttle;
        let outcome = retrying_call(&self.policy, &self.monitor, meta, || {
            let pending = call();
            async move {
                throttle.wait_turn().await;
                pending.await
            }
        })
        .await;
        let gave_up = match &outcome {
            Ok(response) => response.is_transient(),
            Err(_) => true,
        };
        if gave_up {
            warn!(
                target = "flipcheck.upstream",
                source = self.name,
                endpoint = %meta.endpoint,
                attempts = self.policy.max_retries + 1,
                "retries_exhausted"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(10),
            jitter: Duration::from_millis(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_three_503s() {
        let monitor = FailureMonitor::default();
        let meta = RequestMeta::new("https://svcs.example.com/find?key=secret");
        let attempts = AtomicU32::new(0);
        let outcome = retrying_call(&fast_policy(), &monitor, &meta, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Ok(UpstreamResponse::new(503, "service unavailable"))
                } else {
                    Ok(UpstreamResponse::new(200, "{}"))
                }
            }
        })
        .await;
        assert_eq!(outcome, Ok(UpstreamResponse::new(200, "{}")));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.total_failures, 3);
        assert_eq!(snapshot.recent_samples.len(), 3);
        assert_eq!(snapshot.recent_samples[0].endpoint, "https://svcs.example.com/find");
        assert_eq!(snapshot.recent_samples[0].status, Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_makes_one_plus_max_retries_attempts() {
        let monitor = FailureMonitor::default();
        let meta = RequestMeta::new("https://api.example.com/search");
        let attempts = AtomicU32::new(0);
        let outcome = retrying_call(&fast_policy(), &monitor, &meta, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Timeout) }
        })
        .await;
        assert_eq!(outcome, Err(TransportError::Timeout));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_and_success_are_not_retried() {
        let monitor = FailureMonitor::default();
        let meta = RequestMeta::new("https://api.example.com/search");
        for status in [200u16, 404, 429] {
            let attempts = AtomicU32::new(0);
            let outcome = retrying_call(&fast_policy(), &monitor, &meta, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Ok(UpstreamResponse::new(status, "")) }
            })
            .await;
            assert_eq!(outcome.map(|r| r.status), Ok(status));
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
        }
        assert_eq!(monitor.snapshot().total_failures, 0);
    }

    #[test]
    fn backoff_grows_exponentially_beyond_jitter() {
        let policy = fast_policy();
        let delays: Vec<Duration> = (0..4).map(|attempt| policy.delay_for(attempt)).collect();
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1], "{delays:?}");
        }
        assert_eq!(policy.base_delay(0), Duration::from_millis(10));
        assert_eq!(policy.base_delay(2), Duration::from_millis(90));
        assert!(delays[1] >= Duration::from_millis(30));
        assert!(delays[1] <= Duration::from_millis(35));
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_in_window_raise_one_alert() {
        let monitor = FailureMonitor::default();
        let meta = RequestMeta::new("https://api.example.com/search");
        let mut alerts = 0;
        for _ in 0..5 {
            if monitor.record(ErrorSample::capture(&meta, &Err(TransportError::Timeout), 0)) {
                alerts += 1;
            }
            tokio::time::advance(Duration::from_secs(10)).await;
        }
        assert_eq!(alerts, 1);
        assert_eq!(monitor.snapshot().alerts_raised, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spread_out_failures_do_not_alert() {
        let monitor = FailureMonitor::default();
        let meta = RequestMeta::new("https://api.example.com/search");
        for _ in 0..6 {
            assert!(!monitor.record(ErrorSample::capture(
                &meta,
                &Ok(UpstreamResponse::new(502, "bad gateway")),
                0
            )));
            tokio::time::advance(Duration::from_secs(45)).await;
        }
        assert_eq!(monitor.snapshot().alerts_raised, 0);
    }

    #[test]
    fn auth_headers_are_redacted() {
        let meta = RequestMeta::new("https://api.example.com")
            .header("Authorization", "Bearer abc")
            .header("X-EBAY-C-MARKETPLACE-ID", "EBAY_US");
        let redacted = redact_headers(&meta.headers);
        assert_eq!(redacted[0].1, "[redacted]");
        assert_eq!(redacted[1].1, "EBAY_US");
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_spaces_out_calls() {
        let throttle = Throttle::new(Duration::from_millis(1000));
        let started = Instant::now();
        throttle.wait_turn().await;
        throttle.wait_turn().await;
        throttle.wait_turn().await;
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_share_a_turn() {
        let throttle = Throttle::new(Duration::from_millis(1000));
        let stamp = || async {
            throttle.wait_turn().await;
            Instant::now()
        };
        let (a, b, c) = tokio::join!(stamp(), stamp(), stamp());
        let mut turns = vec![a, b, c];
        turns.sort();
        for pair in turns.windows(2) {
            assert!(
                pair[1].duration_since(pair[0]) >= Duration::from_millis(1000),
                "{turns:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn guard_throttles_each_attempt() {
        let monitor = Arc::new(FailureMonitor::default());
        let guard = SourceGuard::new(
            "test",
            Duration::from_millis(500),
            RetryPolicy {
                max_retries: 2,
                base: Duration::from_millis(1),
                jitter: Duration::ZERO,
            },
            monitor.clone(),
        );
        let meta = RequestMeta::new("https://api.example.com/search");
        let started = Instant::now();
        let outcome = guard
            .call(&meta, || async { Ok(UpstreamResponse::new(500, "boom")) })
            .await;
        assert_eq!(outcome.map(|r| r.status), Ok(500));
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert_eq!(monitor.snapshot().total_failures, 3);
    }
}

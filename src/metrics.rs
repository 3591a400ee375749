use tracing::trace;

// Metric events are emitted as trace lines; the Prometheus recorder installed
// in main renders whatever the exporter collects at /metrics.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "flipcheck.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "flipcheck.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn source_outcome(source: &'static str, outcome: &'static str) {
    trace!(
        target = "flipcheck.metrics",
        source = source,
        outcome = outcome,
        "source_outcome_inc"
    );
}

pub fn cache_lookup(tier: &'static str, hit: bool) {
    trace!(
        target = "flipcheck.metrics",
        tier = tier,
        hit = hit,
        "cache_lookup_inc"
    );
}

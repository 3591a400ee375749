use crate::comps::cache::TieredCache;
use crate::comps::relevance::filter_relevant;
use crate::comps::sources::{CompSource, SourceOutcome};
use crate::comps::{
    AggregatedCompsResult, Category, ComparableSale, CompsSource, Provenance, SearchQuery,
};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// A free sold-search result below this many clean comps escalates to the
/// paid source.
pub const MIN_CLEAN_COMPS: usize = 3;

#[derive(Debug, Error)]
pub enum CompsError {
    #[error("no comps found for `{query}` after {tried} source(s)")]
    NoData { query: String, tried: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedComps {
    #[serde(flatten)]
    pub result: AggregatedCompsResult,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

struct Candidate {
    source: CompsSource,
    comps: Vec<ComparableSale>,
}

impl Candidate {
    /// Only a thin free sold-search result looks further, and only at the
    /// paid sold search.
    fn escalates_to(&self, next: CompsSource) -> bool {
        self.source == CompsSource::FreeSearch
            && self.comps.len() < MIN_CLEAN_COMPS
            && next == CompsSource::PaidSearch
    }
}

/// Runs the source chain for a query behind the tiered cache.
pub struct Aggregator {
    sources: Vec<Arc<dyn CompSource>>,
    cache: Arc<TieredCache>,
}

impl Aggregator {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self {
            sources: Vec::new(),
            cache,
        }
    }

    /// Sources are consulted in the order they are added.
    pub fn with_source(mut self, source: Arc<dyn CompSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Never fails: when no source and no last-known-good entry has data the
    /// result is an explicit `none` with a message for the caller.
    pub async fn resolve(&self, query: &SearchQuery) -> ResolvedComps {
        let started = Instant::now();
        let category = Category::resolve(query.category.as_deref(), &query.text);
        let key = query.cache_key();
        let outcome = self
            .cache
            .get_or_fetch(&key, category, || self.run_chain(query, category))
            .await;
        metrics::stage_elapsed("resolve", started.elapsed().as_millis());

        match outcome {
            Ok(hit) => {
                info!(
                    target = "flipcheck.comps",
                    query = %query.text.trim(),
                    category = category.label(),
                    source = hit.value.source.as_str(),
                    provenance = ?hit.provenance,
                    comps = hit.value.comps.len(),
                    "comps_resolved"
                );
                ResolvedComps {
                    cached_at: (hit.provenance != Provenance::Live).then_some(hit.created_at),
                    provenance: hit.provenance,
                    result: hit.value,
                }
            }
            Err(err) => {
                info!(
                    target = "flipcheck.comps",
                    query = %query.text.trim(),
                    category = category.label(),
                    reason = %err,
                    "comps_no_data"
                );
                ResolvedComps {
                    result: AggregatedCompsResult::no_data(query, category),
                    provenance: Provenance::Live,
                    cached_at: None,
                }
            }
        }
    }

    async fn run_chain(
        &self,
        query: &SearchQuery,
        category: Category,
    ) -> Result<AggregatedCompsResult, CompsError> {
        let mut best: Option<Candidate> = None;
        let mut tried = 0;

        for source in &self.sources {
            let kind = source.kind();
            if let Some(candidate) = &best
                && !candidate.escalates_to(kind)
            {
                break;
            }
            if !source.is_eligible(query, category) {
                debug!(
                    target = "flipcheck.comps",
                    source = kind.as_str(),
                    "source_skipped_ineligible"
                );
                continue;
            }

            tried += 1;
            let started = Instant::now();
            let outcome = source.search(query, category).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            metrics::source_outcome(kind.as_str(), outcome.label());

            let raw = match outcome {
                SourceOutcome::Found(raw) => raw,
                SourceOutcome::Empty => {
                    debug!(
                        target = "flipcheck.comps",
                        source = kind.as_str(),
                        elapsed_ms,
                        "source_empty"
                    );
                    continue;
                }
                SourceOutcome::Unavailable(reason) => {
                    info!(
                        target = "flipcheck.comps",
                        source = kind.as_str(),
                        reason = %reason,
                        elapsed_ms,
                        "source_unavailable"
                    );
                    continue;
                }
            };

            // Catalog points are exact product matches; listing titles are not.
            let comps = if kind == CompsSource::CuratedDatabase {
                raw
            } else {
                let filtered = filter_relevant(raw, &query.text, query.item_title.as_deref());
                debug!(
                    target = "flipcheck.comps",
                    source = kind.as_str(),
                    kept = filtered.comps.len(),
                    dropped = filtered.dropped,
                    used_fallback = filtered.used_fallback,
                    "relevance_filtered"
                );
                filtered.comps
            };
            info!(
                target = "flipcheck.comps",
                source = kind.as_str(),
                clean = comps.len(),
                elapsed_ms,
                "source_found"
            );
            if comps.is_empty() {
                continue;
            }

            let replace = best
                .as_ref()
                .is_none_or(|current| comps.len() > current.comps.len());
            if replace {
                best = Some(Candidate { source: kind, comps });
            }
        }

        match best {
            Some(candidate) => Ok(AggregatedCompsResult::from_comps(
                query,
                category,
                candidate.source,
                candidate.comps,
            )),
            None => Err(CompsError::NoData {
                query: query.text.trim().to_string(),
                tried,
            }),
        }
    }
}

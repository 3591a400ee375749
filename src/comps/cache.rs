use crate::comps::{Category, Provenance};
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    fmt::Display,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

const REDIS_PREFIX: &str = "flipcheck:lkg:";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid ttl table: {0}")]
    TtlTable(String),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Category-aware lifetimes for the primary tier.
#[derive(Debug, Clone, Default)]
pub struct TtlTable {
    overrides: HashMap<Category, Duration>,
}

impl TtlTable {
    /// Parses a YAML map of category label to hours, e.g. `trading_cards: 2`.
    pub fn from_yaml(raw: &str) -> Result<Self, CacheError> {
        let parsed: HashMap<String, f64> =
            serde_yaml::from_str(raw).map_err(|err| CacheError::TtlTable(err.to_string()))?;
        let mut overrides = HashMap::new();
        for (label, hours) in parsed {
            let Some(category) = Category::from_label(&label) else {
                return Err(CacheError::TtlTable(format!("unknown category `{label}`")));
            };
            if !hours.is_finite() || hours <= 0.0 {
                return Err(CacheError::TtlTable(format!("ttl for `{label}` must be positive")));
            }
            overrides.insert(category, Duration::from_secs_f64(hours * 3600.0));
        }
        Ok(Self { overrides })
    }

    pub fn ttl_for(&self, category: Category) -> Duration {
        self.overrides
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_ttl())
    }
}

struct CacheEntry {
    payload: String,
    created_at: DateTime<Utc>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    created_at: DateTime<Utc>,
    payload: String,
}

#[derive(Debug, Clone)]
pub struct CacheHit<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub primary_entries: usize,
    pub primary_active: usize,
    pub primary_expired: usize,
    pub last_good_entries: usize,
    pub last_good_active: usize,
    pub last_good_expired: usize,
    pub hits: u64,
    pub misses: u64,
    pub fallbacks: u64,
    pub hit_rate: f64,
}

/// Two-tier cache: a short-lived primary tier and a long-lived last-known-good
/// tier that is only read when live sources fail.
///
/// Values are stored serialized; an entry that no longer deserializes is
/// dropped and reported as a miss.
pub struct TieredCache {
    primary: Mutex<HashMap<String, CacheEntry>>,
    last_good: Mutex<HashMap<String, CacheEntry>>,
    ttl: TtlTable,
    last_good_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
    redis: Option<redis::Client>,
}

impl TieredCache {
    pub const DEFAULT_LAST_GOOD_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

    pub fn new(ttl: TtlTable, last_good_ttl: Duration) -> Self {
        Self {
            primary: Mutex::new(HashMap::new()),
            last_good: Mutex::new(HashMap::new()),
            ttl,
            last_good_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            redis: None,
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(TtlTable::default(), Self::DEFAULT_LAST_GOOD_TTL)
    }

    /// Mirrors the last-known-good tier to Redis so it survives restarts.
    pub fn with_redis(mut self, client: Option<redis::Client>) -> Self {
        self.redis = client;
        self
    }

    pub fn ttl_for(&self, category: Category) -> Duration {
        self.ttl.ttl_for(category)
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Option<CacheHit<V>> {
        let now = Instant::now();
        let mut primary = self.primary.lock().await;
        let decoded = match primary.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(
                serde_json::from_str::<V>(&entry.payload).map(|value| (value, entry.created_at)),
            ),
            _ => None,
        };
        match decoded {
            Some(Ok((value, created_at))) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::cache_lookup("primary", true);
                Some(CacheHit {
                    value,
                    created_at,
                    provenance: Provenance::Cache,
                })
            }
            Some(Err(err)) => {
                warn!(target = "flipcheck.cache", key, error = %err, "corrupt_cache_entry_dropped");
                primary.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::cache_lookup("primary", false);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::cache_lookup("primary", false);
                None
            }
        }
    }

    pub async fn set<V: Serialize>(&self, key: &str, value: &V, category: Category) {
        let ttl = self.ttl_for(category);
        self.set_with_ttl(key, value, ttl).await;
    }

    pub async fn set_with_ttl<V: Serialize>(&self, key: &str, value: &V, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(payload) => {
                let entry = CacheEntry {
                    payload,
                    created_at: Utc::now(),
                    expires_at: Instant::now() + ttl,
                };
                self.primary.lock().await.insert(key.to_string(), entry);
            }
            Err(err) => {
                warn!(target = "flipcheck.cache", key, error = %err, "cache_serialize_failed");
            }
        }
    }

    async fn remember_last_good<V: Serialize>(&self, key: &str, value: &V) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target = "flipcheck.cache", key, error = %err, "cache_serialize_failed");
                return;
            }
        };
        let created_at = Utc::now();
        if let Some(client) = &self.redis {
            let persisted = PersistedEntry {
                created_at,
                payload: payload.clone(),
            };
            redis_set(client, key, &persisted, self.last_good_ttl).await;
        }
        self.last_good.lock().await.insert(
            key.to_string(),
            CacheEntry {
                payload,
                created_at,
                expires_at: Instant::now() + self.last_good_ttl,
            },
        );
    }

    /// Most recent successful value for `key`, tagged as a fallback.
    pub async fn last_good<V: DeserializeOwned>(&self, key: &str) -> Option<CacheHit<V>> {
        let now = Instant::now();
        let in_memory = {
            let mut tier = self.last_good.lock().await;
            let decoded = match tier.get(key) {
                Some(entry) if entry.is_fresh(now) => Some(
                    serde_json::from_str::<V>(&entry.payload)
                        .map(|value| (value, entry.created_at)),
                ),
                _ => None,
            };
            match decoded {
                Some(Ok(found)) => Some(found),
                Some(Err(err)) => {
                    warn!(
                        target = "flipcheck.cache",
                        key,
                        error = %err,
                        "corrupt_last_good_dropped"
                    );
                    tier.remove(key);
                    None
                }
                None => None,
            }
        };

        let found = match in_memory {
            Some(found) => Some(found),
            None => match &self.redis {
                Some(client) => redis_get::<V>(client, key).await,
                None => None,
            },
        };

        found.map(|(value, created_at)| {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            CacheHit {
                value,
                created_at,
                provenance: Provenance::Fallback,
            }
        })
    }

    /// Fresh primary value, else a live fetch written to both tiers, else the
    /// last-known-good value. The fetch error surfaces only when no
    /// last-known-good value exists.
    pub async fn get_or_fetch<V, E, F, Fut>(
        &self,
        key: &str,
        category: Category,
        fetcher: F,
    ) -> Result<CacheHit<V>, E>
    where
        V: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get::<V>(key).await {
            return Ok(hit);
        }
        match fetcher().await {
            Ok(value) => {
                self.set(key, &value, category).await;
                self.remember_last_good(key, &value).await;
                Ok(CacheHit {
                    value,
                    created_at: Utc::now(),
                    provenance: Provenance::Live,
                })
            }
            Err(err) => match self.last_good::<V>(key).await {
                Some(hit) => {
                    info!(
                        target = "flipcheck.cache",
                        key,
                        reason = %err,
                        cached_at = %hit.created_at,
                        "serving_last_known_good"
                    );
                    Ok(hit)
                }
                None => Err(err),
            },
        }
    }

    /// Drops expired entries from both tiers; returns how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        {
            let mut primary = self.primary.lock().await;
            let before = primary.len();
            primary.retain(|_, entry| entry.is_fresh(now));
            removed += before - primary.len();
        }
        {
            let mut last_good = self.last_good.lock().await;
            let before = last_good.len();
            last_good.retain(|_, entry| entry.is_fresh(now));
            removed += before - last_good.len();
        }
        removed
    }

    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    debug!(target = "flipcheck.cache", removed, "cache_sweep");
                }
            }
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let (primary_entries, primary_active) = {
            let primary = self.primary.lock().await;
            (
                primary.len(),
                primary.values().filter(|entry| entry.is_fresh(now)).count(),
            )
        };
        let (last_good_entries, last_good_active) = {
            let last_good = self.last_good.lock().await;
            (
                last_good.len(),
                last_good.values().filter(|entry| entry.is_fresh(now)).count(),
            )
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            primary_entries,
            primary_active,
            primary_expired: primary_entries - primary_active,
            last_good_entries,
            last_good_active,
            last_good_expired: last_good_entries - last_good_active,
            hits,
            misses,
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

async fn redis_get<V: DeserializeOwned>(
    client: &redis::Client,
    key: &str,
) -> Option<(V, DateTime<Utc>)> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(target = "flipcheck.cache", error = %err, "redis_unavailable");
            return None;
        }
    };
    let raw: Option<String> = conn.get(format!("{REDIS_PREFIX}{key}")).await.ok()?;
    let persisted: PersistedEntry = serde_json::from_str(&raw?)
        .inspect_err(|err| corrupt_redis_entry(key, err))
        .ok()?;
    let value = serde_json::from_str::<V>(&persisted.payload)
        .inspect_err(|err| corrupt_redis_entry(key, err))
        .ok()?;
    Some((value, persisted.created_at))
}

fn corrupt_redis_entry(key: &str, err: &serde_json::Error) {
    warn!(target = "flipcheck.cache", key, error = %err, "corrupt_redis_entry");
}

async fn redis_set(client: &redis::Client, key: &str, entry: &PersistedEntry, ttl: Duration) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(entry)
    {
        let _: Result<(), _> = conn
            .set_ex(format!("{REDIS_PREFIX}{key}"), json, ttl.as_secs().max(1))
            .await;
    }
}

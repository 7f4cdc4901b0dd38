// In-memory cache of raw upstream responses
use crate::application::clock::Clock;
use crate::domain::series::RawSeries;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub max_entries: usize,
    pub evict_batch_size: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(5),
            max_entries: 50,
            evict_batch_size: 10,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    series: RawSeries,
    inserted_at: DateTime<Utc>,
    // Orders entries inserted at the same instant
    sequence: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    next_sequence: u64,
}

/// Responses keyed by rounded location and resolved date range. Locations are
/// rounded to 4 decimals (about 11 m), so neighbouring polygons share entries.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
}

/// Rounded coordinate with negative zero folded into zero.
fn key_coordinate(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    match formatted.strip_prefix('-') {
        Some(magnitude) if magnitude.bytes().all(|b| b == b'0' || b == b'.') => magnitude.to_string(),
        _ => formatted,
    }
}

pub fn cache_key(lat: f64, lng: f64, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{}_{}_{}_{}",
        key_coordinate(lat),
        key_coordinate(lng),
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    )
}

impl ResponseCache {
    pub fn new(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            policy,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns the cached series, dropping it if it has outlived the TTL.
    pub fn get(&self, lat: f64, lng: f64, start: NaiveDate, end: NaiveDate) -> Option<RawSeries> {
        let key = cache_key(lat, lng, start, end);
        let now = self.clock.now();
        let mut inner = self.lock();

        let entry = inner.entries.get(&key)?;
        if now - entry.inserted_at >= self.policy.ttl {
            inner.entries.remove(&key);
            tracing::debug!(cache_key = %key, "Cache entry expired");
            return None;
        }

        tracing::debug!(cache_key = %key, "Cache hit");
        Some(entry.series.clone())
    }

    pub fn put(&self, lat: f64, lng: f64, start: NaiveDate, end: NaiveDate, series: RawSeries) {
        let key = cache_key(lat, lng, start, end);
        let now = self.clock.now();
        let mut inner = self.lock();

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.insert(
            key,
            CacheEntry {
                series,
                inserted_at: now,
                sequence,
            },
        );

        if inner.entries.len() > self.policy.max_entries {
            let mut by_age: Vec<(DateTime<Utc>, u64, String)> = inner
                .entries
                .iter()
                .map(|(k, e)| (e.inserted_at, e.sequence, k.clone()))
                .collect();
            by_age.sort();

            for (_, _, key) in by_age.into_iter().take(self.policy.evict_batch_size) {
                inner.entries.remove(&key);
            }
            tracing::debug!(
                evicted = self.policy.evict_batch_size,
                remaining = inner.entries.len(),
                "Cache over capacity, evicted oldest entries"
            );
        }
    }
}

//! Projection planner with lightweight in-memory response caching.
//!
//! Entries are keyed by the normalized request plus the store's data epoch,
//! so any write to the store makes older entries unreachable. Expired entries
//! are dropped on lookup; past `max_entries` the least recently used go first.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use pyo3::prelude::*;
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::config;
use crate::errors::EmissionsResult;
use crate::query::projections::{projected_emissions_range_impl, ProjectionRange};
use crate::query::to_python;
use crate::store::database::Database;
use crate::store::repository;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "cache_hit",
            CacheStatus::Miss => "cache_miss",
        }
    }
}

#[derive(Serialize)]
struct RangeRequest<'a> {
    source_id: i64,
    start_year: i32,
    end_year: i32,
    strategy_ids: Option<&'a [i64]>,
}

struct CacheEntry {
    value: ProjectionRange,
    expires_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: IndexMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

#[pyclass]
pub struct ProjectionPlanner {
    max_entries: usize,
    ttl: Duration,
    enabled: bool,
    state: Mutex<CacheState>,
}

impl ProjectionPlanner {
    pub fn with_options(max_entries: usize, ttl_seconds: f64, enabled: bool) -> Self {
        let ttl_seconds = if ttl_seconds.is_nan() {
            config::DEFAULT_CACHE_TTL_SECONDS
        } else {
            ttl_seconds.clamp(config::MIN_CACHE_TTL_SECONDS, config::MAX_CACHE_TTL_SECONDS)
        };
        let ttl = Duration::try_from_secs_f64(ttl_seconds)
            .unwrap_or(Duration::from_secs_f64(config::DEFAULT_CACHE_TTL_SECONDS));
        Self {
            max_entries: max_entries.max(1),
            ttl,
            enabled,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn cache_key(
        source_id: i64,
        start_year: i32,
        end_year: i32,
        strategy_ids: Option<&[i64]>,
        epoch: i64,
    ) -> EmissionsResult<String> {
        let normalized = strategy_ids.map(|ids| {
            let mut ids = ids.to_vec();
            ids.sort_unstable();
            ids.dedup();
            ids
        });
        let request = RangeRequest {
            source_id,
            start_year,
            end_year,
            strategy_ids: normalized.as_deref(),
        };
        Ok(format!(
            "projected_emissions_range:{epoch}:{}",
            serde_json::to_string(&request)?
        ))
    }

    fn evict_expired(entries: &mut IndexMap<String, CacheEntry>, now: Instant) {
        entries.retain(|_, entry| entry.expires_at > now);
    }

    fn evict_over_capacity(&self, entries: &mut IndexMap<String, CacheEntry>) {
        while entries.len() > self.max_entries {
            entries.shift_remove_index(0);
        }
    }

    /// Cached [`projected_emissions_range_impl`].
    pub fn projected_emissions_range_cached(
        &self,
        conn: &Connection,
        source_id: i64,
        start_year: i32,
        end_year: i32,
        strategy_ids: Option<&[i64]>,
    ) -> EmissionsResult<(ProjectionRange, CacheStatus)> {
        if !self.enabled {
            let value =
                projected_emissions_range_impl(conn, source_id, start_year, end_year, strategy_ids)?;
            return Ok((value, CacheStatus::Miss));
        }

        let epoch = repository::data_epoch(conn)?;
        let cache_key = Self::cache_key(source_id, start_year, end_year, strategy_ids, epoch)?;
        {
            let mut state = self.state.lock();
            Self::evict_expired(&mut state.entries, Instant::now());
            if let Some(entry) = state.entries.shift_remove(&cache_key) {
                let value = entry.value.clone();
                // re-insert at the back for LRU
                state.entries.insert(cache_key, entry);
                state.hits += 1;
                debug!(source_id, epoch, "projection cache hit");
                return Ok((value, CacheStatus::Hit));
            }
        }

        let value =
            projected_emissions_range_impl(conn, source_id, start_year, end_year, strategy_ids)?;
        let now = Instant::now();
        let mut state = self.state.lock();
        state.misses += 1;
        state.entries.insert(
            cache_key,
            CacheEntry {
                value: value.clone(),
                expires_at: now + self.ttl,
            },
        );
        self.evict_over_capacity(&mut state.entries);
        debug!(source_id, epoch, "projection cache miss");
        Ok((value, CacheStatus::Miss))
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[pymethods]
impl ProjectionPlanner {
    #[new]
    #[pyo3(signature = (max_entries=config::DEFAULT_CACHE_MAX_ENTRIES, ttl_seconds=None))]
    fn new(max_entries: usize, ttl_seconds: Option<f64>) -> Self {
        let ttl_seconds = ttl_seconds.unwrap_or_else(config::projection_cache_ttl_seconds);
        Self::with_options(max_entries, ttl_seconds, config::projection_cache_enabled())
    }

    /// Same result as `projected_emissions_range`, plus `"cache_hit"` or
    /// `"cache_miss"`.
    #[pyo3(name = "projected_emissions_range")]
    #[pyo3(signature = (db, source_id, start_year, end_year, strategy_ids=None))]
    fn py_projected_emissions_range(
        &self,
        py: Python<'_>,
        db: &Database,
        source_id: i64,
        start_year: i32,
        end_year: i32,
        strategy_ids: Option<Vec<i64>>,
    ) -> PyResult<(PyObject, String)> {
        let conn = db.connect_internal()?;
        let (value, status) = self.projected_emissions_range_cached(
            &conn,
            source_id,
            start_year,
            end_year,
            strategy_ids.as_deref(),
        )?;
        Ok((to_python(py, &value)?, status.as_str().to_string()))
    }

    fn stats(&self) -> HashMap<String, i64> {
        let state = self.state.lock();
        let mut result = HashMap::new();
        result.insert("entries".to_string(), state.entries.len() as i64);
        result.insert("max_entries".to_string(), self.max_entries as i64);
        result.insert("hits".to_string(), state.hits as i64);
        result.insert("misses".to_string(), state.misses as i64);
        result.insert("enabled".to_string(), i64::from(self.enabled));
        result
    }

    fn clear(&self) {
        self.state.lock().entries.clear();
    }

    fn __len__(&self) -> usize {
        self.len()
    }
}

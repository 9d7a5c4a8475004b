//! Runtime configuration read from the environment.
//!
//! Values are read on every call so a host process can flip them without
//! reloading the extension module.

use chrono::Datelike;
use pyo3::prelude::*;

pub const DEFAULT_CACHE_TTL_SECONDS: f64 = 15.0;
pub const MIN_CACHE_TTL_SECONDS: f64 = 0.1;
pub const MAX_CACHE_TTL_SECONDS: f64 = 86_400.0;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 512;

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            if default {
                !matches!(v.as_str(), "0" | "false" | "no" | "off")
            } else {
                matches!(v.as_str(), "1" | "true" | "yes" | "on")
            }
        }
        Err(_) => default,
    }
}

/// Whether `ProjectionPlanner` keeps results between calls.
#[pyfunction]
pub fn projection_cache_enabled() -> bool {
    env_flag("EMISSIONS_PROJECTION_CACHE", true)
}

/// TTL for planner entries when the planner is built without one.
#[pyfunction]
pub fn projection_cache_ttl_seconds() -> f64 {
    std::env::var("EMISSIONS_CACHE_TTL_SECONDS")
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(DEFAULT_CACHE_TTL_SECONDS)
        .clamp(MIN_CACHE_TTL_SECONDS, MAX_CACHE_TTL_SECONDS)
}

/// Thread count for multi-source aggregates.
#[pyfunction]
pub fn worker_count() -> usize {
    std::env::var("EMISSIONS_WORKERS")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
        .max(1)
}

/// Calendar year in local time, used for request defaults.
#[pyfunction]
pub fn current_year() -> i32 {
    chrono::Local::now().year()
}

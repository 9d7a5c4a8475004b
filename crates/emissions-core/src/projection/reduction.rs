//! Multi-source aggregates: report totals and strategy reductions.
//!
//! Sources are evaluated on a rayon pool sized by `EMISSIONS_WORKERS`. Pools
//! are built once per size and shared by every later aggregate.
//! Per-source results come back in input order and are summed sequentially,
//! so the totals never depend on the thread count.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use serde::Serialize;
use tracing::warn;

use super::range::{check_range, SourceProjection};
use super::{baseline_emissions, lifetime_to_date_emissions, Modification, Source, YearSeries};
use crate::config;
use crate::errors::EmissionsResult;

/// A source and every modification attached to it, as loaded from the store.
#[derive(Clone, Debug)]
pub struct SourceSnapshot {
    pub source: Source,
    pub modifications: Vec<Modification>,
}

static POOLS: Mutex<Option<HashMap<usize, Arc<ThreadPool>>>> = parking_lot::const_mutex(None);

/// Shared pool with exactly `threads` workers.
fn pool_for(threads: usize) -> Result<Arc<ThreadPool>, ThreadPoolBuildError> {
    let mut pools = POOLS.lock();
    let pools = pools.get_or_insert_with(HashMap::new);
    if let Some(pool) = pools.get(&threads) {
        return Ok(Arc::clone(pool));
    }
    let pool = Arc::new(ThreadPoolBuilder::new().num_threads(threads).build()?);
    pools.insert(threads, Arc::clone(&pool));
    Ok(pool)
}

fn map_sources<T, F>(snapshots: &[SourceSnapshot], f: F) -> EmissionsResult<Vec<T>>
where
    T: Send,
    F: Fn(&SourceSnapshot) -> EmissionsResult<T> + Sync + Send,
{
    if snapshots.len() < 2 {
        return snapshots.iter().map(&f).collect();
    }
    match pool_for(config::worker_count()) {
        Ok(pool) => pool.install(|| snapshots.par_iter().map(&f).collect()),
        Err(e) => {
            warn!("rayon pool unavailable, evaluating sources sequentially: {e}");
            snapshots.iter().map(&f).collect()
        }
    }
}

fn sum_series(start_year: i32, end_year: i32, per_source: &[Vec<f64>]) -> YearSeries {
    (start_year..=end_year)
        .enumerate()
        .map(|(i, year)| (year, per_source.iter().map(|s| s[i]).sum()))
        .collect()
}

/// Σ baseline emissions of `sources` in `year`.
pub fn report_baseline_total(sources: &[Source], year: i32) -> f64 {
    sources.iter().map(|s| baseline_emissions(s, year)).sum()
}

/// Σ emissions accumulated so far by `sources`.
pub fn report_lifetime_to_date_total(sources: &[Source], current_year: i32) -> f64 {
    sources
        .iter()
        .map(|s| lifetime_to_date_emissions(s, current_year))
        .sum()
}

/// Σ projected emissions of every snapshot in `year`.
pub fn report_projected_total(
    snapshots: &[SourceSnapshot],
    strategy_filter: Option<&HashSet<i64>>,
    year: i32,
) -> EmissionsResult<f64> {
    let per_source = map_sources(snapshots, |snap| {
        let projection =
            SourceProjection::new(&snap.source, &snap.modifications, strategy_filter)?;
        Ok(projection.emissions_for_year(year))
    })?;
    Ok(per_source.iter().sum())
}

/// Per-year version of [`report_projected_total`].
pub fn report_projected_range(
    snapshots: &[SourceSnapshot],
    strategy_filter: Option<&HashSet<i64>>,
    start_year: i32,
    end_year: i32,
) -> EmissionsResult<YearSeries> {
    check_range(start_year, end_year)?;
    let per_source = map_sources(snapshots, |snap| {
        let projection =
            SourceProjection::new(&snap.source, &snap.modifications, strategy_filter)?;
        Ok((start_year..=end_year)
            .map(|year| projection.emissions_for_year(year))
            .collect::<Vec<f64>>())
    })?;
    Ok(sum_series(start_year, end_year, &per_source))
}

/// Effect of one reduction strategy across the sources it touches.
#[derive(Clone, Debug, Serialize)]
pub struct StrategyReduction {
    pub strategy_id: i64,
    pub start_year: i32,
    pub end_year: i32,
    pub source_ids: Vec<i64>,
    /// Σ baseline emissions per year.
    pub reference: YearSeries,
    /// Σ emissions with only this strategy's modifications applied.
    pub with_strategy: YearSeries,
    /// `reference − with_strategy` per year.
    pub reduction: YearSeries,
}

impl StrategyReduction {
    pub fn reference_total(&self) -> f64 {
        self.reference.values().sum()
    }

    pub fn strategy_total(&self) -> f64 {
        self.with_strategy.values().sum()
    }

    pub fn total_reduction(&self) -> f64 {
        self.reduction.values().sum()
    }

    /// Reduction as a percentage of the reference; `0.0` without reference.
    pub fn reduction_percentage(&self) -> f64 {
        let reference = self.reference_total();
        if reference == 0.0 {
            0.0
        } else {
            self.total_reduction() / reference * 100.0
        }
    }
}

/// Compute the reduction achieved by `strategy_id` over `[start_year, end_year]`.
///
/// Only snapshots holding at least one modification of the strategy count;
/// other strategies' modifications on those sources are ignored.
pub fn strategy_reduction(
    strategy_id: i64,
    snapshots: &[SourceSnapshot],
    start_year: i32,
    end_year: i32,
) -> EmissionsResult<StrategyReduction> {
    check_range(start_year, end_year)?;
    let touched: Vec<SourceSnapshot> = snapshots
        .iter()
        .filter(|snap| snap.modifications.iter().any(|m| m.strategy_id == strategy_id))
        .cloned()
        .collect();
    let filter: HashSet<i64> = [strategy_id].into_iter().collect();

    let per_source = map_sources(&touched, |snap| {
        let baseline = SourceProjection::baseline(&snap.source);
        let modified = SourceProjection::new(&snap.source, &snap.modifications, Some(&filter))?;
        Ok((start_year..=end_year)
            .map(|year| {
                (
                    baseline.emissions_for_year(year),
                    modified.emissions_for_year(year),
                )
            })
            .collect::<Vec<(f64, f64)>>())
    })?;

    let reference_rows: Vec<Vec<f64>> = per_source
        .iter()
        .map(|rows| rows.iter().map(|(base, _)| *base).collect())
        .collect();
    let modified_rows: Vec<Vec<f64>> = per_source
        .iter()
        .map(|rows| rows.iter().map(|(_, with)| *with).collect())
        .collect();
    let reference = sum_series(start_year, end_year, &reference_rows);
    let with_strategy = sum_series(start_year, end_year, &modified_rows);
    let reduction = reference
        .iter()
        .map(|(year, base)| (*year, base - with_strategy[year]))
        .collect();

    Ok(StrategyReduction {
        strategy_id,
        start_year,
        end_year,
        source_ids: touched.iter().map(|snap| snap.source.id).collect(),
        reference,
        with_strategy,
        reduction,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmissionsComparison {
    pub year1: i32,
    pub year2: i32,
    pub emissions1: f64,
    pub emissions2: f64,
    pub difference: f64,
    pub percentage_change: f64,
}

pub fn compare_emissions(year1: i32, emissions1: f64, year2: i32, emissions2: f64) -> EmissionsComparison {
    let difference = emissions2 - emissions1;
    let percentage_change = if emissions1 == 0.0 {
        0.0
    } else {
        difference / emissions1 * 100.0
    };
    EmissionsComparison {
        year1,
        year2,
        emissions1,
        emissions2,
        difference,
        percentage_change,
    }
}

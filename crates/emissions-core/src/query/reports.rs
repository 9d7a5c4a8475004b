//! Report-level totals, year comparison and projections.

use pyo3::prelude::*;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config;
use crate::errors::{EmissionsError, EmissionsResult};
use crate::projection::{
    compare_emissions as compare_totals, report_baseline_total, report_projected_range,
    report_projected_total,
};
use crate::query::guards::validate_report_year_at;
use crate::query::{amount, amount_series, strategy_filter, to_python, AmountSeries};
use crate::store::database::Database;
use crate::store::repository;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportTotal {
    pub report_id: i64,
    /// `None` for the lifetime-to-date total.
    pub year: Option<i32>,
    pub total_emissions: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportComparison {
    pub report_id: i64,
    pub year1: i32,
    pub year2: i32,
    pub emissions1: Decimal,
    pub emissions2: Decimal,
    pub difference: Decimal,
    pub percentage_change: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportProjection {
    pub report_id: i64,
    pub year: i32,
    pub strategy_ids: Vec<i64>,
    pub projected_emissions: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportProjectionRange {
    pub report_id: i64,
    pub start_year: i32,
    pub end_year: i32,
    pub strategy_ids: Vec<i64>,
    pub projections: AmountSeries,
}

/// Strategies a report projection applies: the report's linked strategies
/// when none are given, otherwise exactly the given ones, all of which must
/// exist.
fn resolve_strategy_ids(
    conn: &Connection,
    report_id: i64,
    strategy_ids: Option<&[i64]>,
) -> EmissionsResult<Vec<i64>> {
    match strategy_ids {
        None => repository::report_strategy_ids(conn, report_id),
        Some(ids) => {
            let missing = repository::missing_strategy_ids(conn, ids)?;
            if !missing.is_empty() {
                return Err(EmissionsError::Validation(format!(
                    "unknown reduction strategy ids: {missing:?}"
                )));
            }
            let mut ids = ids.to_vec();
            ids.sort_unstable();
            ids.dedup();
            Ok(ids)
        }
    }
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

/// Baseline total for `year`, or the cached lifetime-to-date total.
pub fn report_total_emissions_impl(
    conn: &Connection,
    report_id: i64,
    year: Option<i32>,
    current_year: i32,
) -> EmissionsResult<ReportTotal> {
    let total = match year {
        Some(year) => {
            let sources = repository::load_report_sources(conn, report_id)?;
            report_baseline_total(&sources, year)
        }
        None => repository::cached_total_emissions(conn, report_id, current_year)?,
    };
    Ok(ReportTotal {
        report_id,
        year,
        total_emissions: amount(total)?,
    })
}

pub fn compare_emissions_impl(
    conn: &Connection,
    report_id: i64,
    year1: i32,
    year2: i32,
) -> EmissionsResult<ReportComparison> {
    let sources = repository::load_report_sources(conn, report_id)?;
    let cmp = compare_totals(
        year1,
        report_baseline_total(&sources, year1),
        year2,
        report_baseline_total(&sources, year2),
    );
    Ok(ReportComparison {
        report_id,
        year1: cmp.year1,
        year2: cmp.year2,
        emissions1: amount(cmp.emissions1)?,
        emissions2: amount(cmp.emissions2)?,
        difference: amount(cmp.difference)?,
        percentage_change: amount(cmp.percentage_change)?,
    })
}

pub fn report_projected_emissions_impl(
    conn: &Connection,
    report_id: i64,
    year: Option<i32>,
    strategy_ids: Option<&[i64]>,
    current_year: i32,
) -> EmissionsResult<ReportProjection> {
    let year = validate_report_year_at(year.unwrap_or(current_year), current_year)?;
    let snapshots = repository::load_report_snapshots(conn, report_id)?;
    let strategy_ids = resolve_strategy_ids(conn, report_id, strategy_ids)?;
    let filter = strategy_filter(Some(strategy_ids.as_slice()));
    let total = report_projected_total(&snapshots, filter.as_ref(), year)?;
    Ok(ReportProjection {
        report_id,
        year,
        strategy_ids,
        projected_emissions: amount(total)?,
    })
}

pub fn report_projected_emissions_range_impl(
    conn: &Connection,
    report_id: i64,
    start_year: i32,
    end_year: i32,
    strategy_ids: Option<&[i64]>,
    current_year: i32,
) -> EmissionsResult<ReportProjectionRange> {
    validate_report_year_at(start_year, current_year)?;
    validate_report_year_at(end_year, current_year)?;
    let snapshots = repository::load_report_snapshots(conn, report_id)?;
    let strategy_ids = resolve_strategy_ids(conn, report_id, strategy_ids)?;
    let filter = strategy_filter(Some(strategy_ids.as_slice()));
    let series = report_projected_range(&snapshots, filter.as_ref(), start_year, end_year)?;
    Ok(ReportProjectionRange {
        report_id,
        start_year,
        end_year,
        strategy_ids,
        projections: amount_series(&series)?,
    })
}

// ---------------------------------------------------------------------------
// Python bindings
// ---------------------------------------------------------------------------

#[pyfunction]
#[pyo3(signature = (db, report_id, year=None))]
pub fn report_total_emissions(
    py: Python<'_>,
    db: &Database,
    report_id: i64,
    year: Option<i32>,
) -> PyResult<PyObject> {
    let conn = db.connect_internal()?;
    let result = report_total_emissions_impl(&conn, report_id, year, config::current_year())?;
    to_python(py, &result)
}

#[pyfunction]
pub fn compare_emissions(
    py: Python<'_>,
    db: &Database,
    report_id: i64,
    year1: i32,
    year2: i32,
) -> PyResult<PyObject> {
    let conn = db.connect_internal()?;
    let result = compare_emissions_impl(&conn, report_id, year1, year2)?;
    to_python(py, &result)
}

#[pyfunction]
#[pyo3(signature = (db, report_id, year=None, strategy_ids=None))]
pub fn report_projected_emissions(
    py: Python<'_>,
    db: &Database,
    report_id: i64,
    year: Option<i32>,
    strategy_ids: Option<Vec<i64>>,
) -> PyResult<PyObject> {
    let conn = db.connect_internal()?;
    let result = report_projected_emissions_impl(
        &conn,
        report_id,
        year,
        strategy_ids.as_deref(),
        config::current_year(),
    )?;
    to_python(py, &result)
}

#[pyfunction]
#[pyo3(signature = (db, report_id, start_year, end_year, strategy_ids=None))]
pub fn report_projected_emissions_range(
    py: Python<'_>,
    db: &Database,
    report_id: i64,
    start_year: i32,
    end_year: i32,
    strategy_ids: Option<Vec<i64>>,
) -> PyResult<PyObject> {
    let conn = db.connect_internal()?;
    let result = report_projected_emissions_range_impl(
        &conn,
        report_id,
        start_year,
        end_year,
        strategy_ids.as_deref(),
        config::current_year(),
    )?;
    to_python(py, &result)
}

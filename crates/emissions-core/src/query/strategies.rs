//! Total reduction achieved by one reduction strategy.

use pyo3::prelude::*;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config;
use crate::errors::EmissionsResult;
use crate::projection::strategy_reduction;
use crate::query::guards::check_range_span;
use crate::query::{amount, amount_series, to_python, AmountSeries};
use crate::store::database::Database;
use crate::store::repository;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StrategyTotalReduction {
    pub strategy_id: i64,
    pub start_year: i32,
    pub end_year: i32,
    pub source_ids: Vec<i64>,
    pub reference_emissions: Decimal,
    pub strategy_emissions: Decimal,
    pub total_reduction: Decimal,
    pub reduction_percentage: Decimal,
    pub reductions: AmountSeries,
}

/// `start_year` defaults to the current year, `end_year` to `start_year`.
pub fn strategy_total_reduction_impl(
    conn: &Connection,
    strategy_id: i64,
    start_year: Option<i32>,
    end_year: Option<i32>,
    current_year: i32,
) -> EmissionsResult<StrategyTotalReduction> {
    let start_year = start_year.unwrap_or(current_year);
    let end_year = end_year.unwrap_or(start_year);
    check_range_span(start_year, end_year)?;
    let snapshots = repository::load_strategy_snapshots(conn, strategy_id)?;
    let result = strategy_reduction(strategy_id, &snapshots, start_year, end_year)?;
    Ok(StrategyTotalReduction {
        strategy_id,
        start_year,
        end_year,
        reference_emissions: amount(result.reference_total())?,
        strategy_emissions: amount(result.strategy_total())?,
        total_reduction: amount(result.total_reduction())?,
        reduction_percentage: amount(result.reduction_percentage())?,
        reductions: amount_series(&result.reduction)?,
        source_ids: result.source_ids,
    })
}

#[pyfunction]
#[pyo3(signature = (db, strategy_id, start_year=None, end_year=None))]
pub fn strategy_total_reduction(
    py: Python<'_>,
    db: &Database,
    strategy_id: i64,
    start_year: Option<i32>,
    end_year: Option<i32>,
) -> PyResult<PyObject> {
    let conn = db.connect_internal()?;
    let result = strategy_total_reduction_impl(
        &conn,
        strategy_id,
        start_year,
        end_year,
        config::current_year(),
    )?;
    to_python(py, &result)
}

//! Emissions core library: Rust backend for the emissions tracker.
//!
//! This crate provides the emissions projection engine, the SQLite store for
//! reports, sources, reduction strategies and modifications, and the
//! presentation-ready query functions built on both. It is compiled as a
//! Python extension module (`_emissions_core`) via PyO3.

pub mod config;
pub mod errors;
pub mod models;
pub mod projection;
pub mod query;
pub mod store;

use pyo3::prelude::*;
use pyo3::wrap_pyfunction;

// ---------------------------------------------------------------------------
// Top-level Python module: _emissions_core
// ---------------------------------------------------------------------------

#[pymodule]
fn _emissions_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // -- Models (choice lists + record pyclasses) ---------------------------
    models::register_models(m)?;

    // -- Store layer --------------------------------------------------------
    m.add_class::<store::database::Database>()?;
    m.add("SCHEMA_VERSION", store::schema::SCHEMA_VERSION)?;

    // -- Configuration ------------------------------------------------------
    m.add_function(wrap_pyfunction!(config::projection_cache_enabled, m)?)?;
    m.add_function(wrap_pyfunction!(config::projection_cache_ttl_seconds, m)?)?;
    m.add_function(wrap_pyfunction!(config::worker_count, m)?)?;
    m.add_function(wrap_pyfunction!(config::current_year, m)?)?;

    // -- Query: guards (constants + bound helpers) --------------------------
    m.add(
        "MAX_PROJECTION_SPAN_YEARS",
        query::guards::MAX_PROJECTION_SPAN_YEARS,
    )?;
    m.add("MIN_REPORT_YEAR", query::guards::MIN_REPORT_YEAR)?;
    m.add(
        "MAX_REPORT_YEARS_AHEAD",
        query::guards::MAX_REPORT_YEARS_AHEAD,
    )?;
    m.add("MAX_RANGE_YEARS", query::guards::MAX_RANGE_YEARS)?;
    m.add_function(wrap_pyfunction!(query::guards::max_projection_end_year, m)?)?;
    m.add_function(wrap_pyfunction!(query::guards::cap_end_year, m)?)?;
    m.add_function(wrap_pyfunction!(query::guards::validate_report_year, m)?)?;

    // -- Query: source projections ------------------------------------------
    m.add_function(wrap_pyfunction!(query::projections::projected_emissions, m)?)?;
    m.add_function(wrap_pyfunction!(
        query::projections::projected_emissions_range,
        m
    )?)?;
    m.add_function(wrap_pyfunction!(query::projections::project_modifications, m)?)?;
    m.add_function(wrap_pyfunction!(
        query::projections::source_emissions_by_year,
        m
    )?)?;
    m.add_function(wrap_pyfunction!(query::projections::source_total_emission, m)?)?;

    // -- Query: reports -----------------------------------------------------
    m.add_function(wrap_pyfunction!(query::reports::report_total_emissions, m)?)?;
    m.add_function(wrap_pyfunction!(query::reports::compare_emissions, m)?)?;
    m.add_function(wrap_pyfunction!(query::reports::report_projected_emissions, m)?)?;
    m.add_function(wrap_pyfunction!(
        query::reports::report_projected_emissions_range,
        m
    )?)?;

    // -- Query: strategies --------------------------------------------------
    m.add_function(wrap_pyfunction!(query::strategies::strategy_total_reduction, m)?)?;

    // -- Query: planner (LRU cache) -----------------------------------------
    m.add_class::<query::planner::ProjectionPlanner>()?;

    Ok(())
}

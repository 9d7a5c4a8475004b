//! Shared request bounds and defaults for the query endpoints.

use pyo3::prelude::*;

use crate::config;
use crate::errors::{EmissionsError, EmissionsResult};

/// Longest span `project_modifications` will compute past its start year.
pub const MAX_PROJECTION_SPAN_YEARS: i32 = 50;
pub const MIN_REPORT_YEAR: i32 = 1900;
/// Report projections may look at most this far past the current year.
pub const MAX_REPORT_YEARS_AHEAD: i32 = 100;
/// Most years a single range request may cover.
pub const MAX_RANGE_YEARS: i64 = 200;

/// Upper bound for a modification projection starting at `start_year`.
#[pyfunction]
pub fn max_projection_end_year(start_year: i32) -> i32 {
    start_year.saturating_add(MAX_PROJECTION_SPAN_YEARS)
}

/// Default `end_year` to the cap and clamp anything beyond it.
#[pyfunction]
#[pyo3(signature = (start_year, end_year=None))]
pub fn cap_end_year(start_year: i32, end_year: Option<i32>) -> i32 {
    let cap = max_projection_end_year(start_year);
    end_year.map_or(cap, |end| end.min(cap))
}

pub fn validate_report_year_at(year: i32, current_year: i32) -> EmissionsResult<i32> {
    let latest = current_year + MAX_REPORT_YEARS_AHEAD;
    if !(MIN_REPORT_YEAR..=latest).contains(&year) {
        return Err(EmissionsError::Validation(format!(
            "year must be between {MIN_REPORT_YEAR} and {latest}, got {year}"
        )));
    }
    Ok(year)
}

/// Reject ranges covering more than [`MAX_RANGE_YEARS`] years. Reversed
/// ranges pass through so the engine reports them as such.
pub fn check_range_span(start_year: i32, end_year: i32) -> EmissionsResult<()> {
    let years = i64::from(end_year) - i64::from(start_year) + 1;
    if years > MAX_RANGE_YEARS {
        return Err(EmissionsError::Validation(format!(
            "year range {start_year}-{end_year} covers {years} years, at most {MAX_RANGE_YEARS} allowed"
        )));
    }
    Ok(())
}

/// Reject report years outside `[1900, current year + 100]`.
#[pyfunction]
pub fn validate_report_year(year: i32) -> PyResult<i32> {
    Ok(validate_report_year_at(year, config::current_year())?)
}

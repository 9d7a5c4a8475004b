//! Source-level projection endpoints.

use pyo3::prelude::*;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config;
use crate::errors::EmissionsResult;
use crate::projection::{lifetime_to_date_emissions, SourceProjection};
use crate::query::guards::{cap_end_year, check_range_span, max_projection_end_year};
use crate::query::{amount, amount_series, strategy_filter, to_python, AmountSeries};
use crate::store::database::Database;
use crate::store::repository;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectionRange {
    pub source_id: i64,
    pub start_year: i32,
    pub end_year: i32,
    pub projections: AmountSeries,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModificationProjection {
    pub source_id: i64,
    pub start_year: i32,
    pub end_year: i32,
    pub max_allowed_end_year: i32,
    pub projections: AmountSeries,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceEmissions {
    pub source_id: i64,
    pub start_year: i32,
    pub end_year: i32,
    pub emissions: AmountSeries,
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

pub fn projected_emissions_impl(
    conn: &Connection,
    source_id: i64,
    year: i32,
    strategy_ids: Option<&[i64]>,
) -> EmissionsResult<Decimal> {
    let source = repository::load_source(conn, source_id)?;
    let modifications = repository::load_modifications(conn, source_id, None)?;
    let filter = strategy_filter(strategy_ids);
    let projection = SourceProjection::new(&source, &modifications, filter.as_ref())?;
    amount(projection.emissions_for_year(year))
}

pub fn projected_emissions_range_impl(
    conn: &Connection,
    source_id: i64,
    start_year: i32,
    end_year: i32,
    strategy_ids: Option<&[i64]>,
) -> EmissionsResult<ProjectionRange> {
    check_range_span(start_year, end_year)?;
    let source = repository::load_source(conn, source_id)?;
    let modifications = repository::load_modifications(conn, source_id, None)?;
    let filter = strategy_filter(strategy_ids);
    let projection = SourceProjection::new(&source, &modifications, filter.as_ref())?;
    let series = projection.emissions_for_range(start_year, end_year)?;
    Ok(ProjectionRange {
        source_id,
        start_year,
        end_year,
        projections: amount_series(&series)?,
    })
}

/// Project a source applying only the listed modifications. Ids that belong
/// to other sources are ignored.
pub fn project_modifications_impl(
    conn: &Connection,
    source_id: i64,
    modification_ids: &[i64],
    start_year: Option<i32>,
    end_year: Option<i32>,
    current_year: i32,
) -> EmissionsResult<ModificationProjection> {
    let start_year = start_year.unwrap_or(current_year);
    let max_allowed_end_year = max_projection_end_year(start_year);
    let end_year = cap_end_year(start_year, end_year);

    let source = repository::load_source(conn, source_id)?;
    let modifications = repository::load_modifications_by_ids(conn, source_id, modification_ids)?;
    let projection = SourceProjection::new(&source, &modifications, None)?;
    let series = projection.emissions_for_range(start_year, end_year)?;
    Ok(ModificationProjection {
        source_id,
        start_year,
        end_year,
        max_allowed_end_year,
        projections: amount_series(&series)?,
    })
}

/// Baseline series from the acquisition year (or `start_year`) to the
/// current year (or `end_year`).
pub fn source_emissions_by_year_impl(
    conn: &Connection,
    source_id: i64,
    start_year: Option<i32>,
    end_year: Option<i32>,
    current_year: i32,
) -> EmissionsResult<SourceEmissions> {
    let source = repository::load_source(conn, source_id)?;
    let start_year = start_year.unwrap_or(source.acquisition_year);
    let end_year = end_year.unwrap_or_else(|| current_year.max(start_year));
    check_range_span(start_year, end_year)?;
    let series = SourceProjection::baseline(&source).emissions_for_range(start_year, end_year)?;
    Ok(SourceEmissions {
        source_id,
        start_year,
        end_year,
        emissions: amount_series(&series)?,
    })
}

pub fn source_total_emission_impl(
    conn: &Connection,
    source_id: i64,
    current_year: i32,
) -> EmissionsResult<Decimal> {
    let source = repository::load_source(conn, source_id)?;
    amount(lifetime_to_date_emissions(&source, current_year))
}

// ---------------------------------------------------------------------------
// Python bindings
// ---------------------------------------------------------------------------

/// Projected emissions of one source in `year`, as a two-decimal string.
#[pyfunction]
#[pyo3(signature = (db, source_id, year, strategy_ids=None))]
pub fn projected_emissions(
    db: &Database,
    source_id: i64,
    year: i32,
    strategy_ids: Option<Vec<i64>>,
) -> PyResult<String> {
    let conn = db.connect_internal()?;
    let value = projected_emissions_impl(&conn, source_id, year, strategy_ids.as_deref())?;
    Ok(value.to_string())
}

#[pyfunction]
#[pyo3(signature = (db, source_id, start_year, end_year, strategy_ids=None))]
pub fn projected_emissions_range(
    py: Python<'_>,
    db: &Database,
    source_id: i64,
    start_year: i32,
    end_year: i32,
    strategy_ids: Option<Vec<i64>>,
) -> PyResult<PyObject> {
    let conn = db.connect_internal()?;
    let result = projected_emissions_range_impl(
        &conn,
        source_id,
        start_year,
        end_year,
        strategy_ids.as_deref(),
    )?;
    to_python(py, &result)
}

#[pyfunction]
#[pyo3(signature = (db, source_id, modification_ids, start_year=None, end_year=None))]
pub fn project_modifications(
    py: Python<'_>,
    db: &Database,
    source_id: i64,
    modification_ids: Vec<i64>,
    start_year: Option<i32>,
    end_year: Option<i32>,
) -> PyResult<PyObject> {
    let conn = db.connect_internal()?;
    let result = project_modifications_impl(
        &conn,
        source_id,
        &modification_ids,
        start_year,
        end_year,
        config::current_year(),
    )?;
    to_python(py, &result)
}

#[pyfunction]
#[pyo3(signature = (db, source_id, start_year=None, end_year=None))]
pub fn source_emissions_by_year(
    py: Python<'_>,
    db: &Database,
    source_id: i64,
    start_year: Option<i32>,
    end_year: Option<i32>,
) -> PyResult<PyObject> {
    let conn = db.connect_internal()?;
    let result = source_emissions_by_year_impl(
        &conn,
        source_id,
        start_year,
        end_year,
        config::current_year(),
    )?;
    to_python(py, &result)
}

#[pyfunction]
pub fn source_total_emission(db: &Database, source_id: i64) -> PyResult<String> {
    let conn = db.connect_internal()?;
    Ok(source_total_emission_impl(&conn, source_id, config::current_year())?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EmissionsError;
    use crate::models::fixtures::{modification, report, source, strategy};
    use crate::models::SourceRecord;
    use crate::store::schema::open_test_connection;

    struct Seed {
        source_id: i64,
        strategy_id: i64,
    }

    fn seed_with(conn: &Connection, record: impl FnOnce(i64) -> SourceRecord) -> Seed {
        let report_id = repository::insert_report(conn, &report("Annual")).unwrap();
        let source_id = repository::insert_source(conn, &record(report_id)).unwrap();
        let strategy_id = repository::insert_strategy(conn, &strategy("Reduce")).unwrap();
        Seed {
            source_id,
            strategy_id,
        }
    }

    fn seed(conn: &Connection) -> Seed {
        seed_with(conn, |report_id| source("Fleet", report_id))
    }

    #[test]
    fn end_to_end_projection_renders_two_decimals() {
        let conn = open_test_connection();
        let s = seed_with(&conn, |report_id| {
            let mut record = source("Fleet", report_id);
            record.value = 20000.0;
            record.quantity = 5;
            record.lifetime = 10;
            record
        });
        repository::insert_modification(&conn, &modification(s.strategy_id, s.source_id, 0.9, 2024))
            .unwrap();

        let y2023 = projected_emissions_impl(&conn, s.source_id, 2023, None).unwrap();
        let y2024 = projected_emissions_impl(&conn, s.source_id, 2024, None).unwrap();
        assert_eq!(y2023.to_string(), "10000.00");
        assert_eq!(y2024.to_string(), "9000.00");
    }

    #[test]
    fn strategy_filter_selects_modifications() {
        let conn = open_test_connection();
        let s = seed(&conn);
        repository::insert_modification(&conn, &modification(s.strategy_id, s.source_id, 0.5, 2024))
            .unwrap();

        let with = projected_emissions_impl(&conn, s.source_id, 2024, Some(&[s.strategy_id])).unwrap();
        let baseline = projected_emissions_impl(&conn, s.source_id, 2024, Some(&[])).unwrap();
        assert_eq!(with.to_string(), "50.00");
        assert_eq!(baseline.to_string(), "100.00");
    }

    #[test]
    fn range_is_keyed_by_year_strings() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let result = projected_emissions_range_impl(&conn, s.source_id, 2026, 2028, None).unwrap();
        assert_eq!(
            result.projections.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["2026", "2027", "2028"]
        );
        assert_eq!(result.projections["2027"].to_string(), "100.00");
        assert_eq!(result.projections["2028"].to_string(), "0.00");
    }

    #[test]
    fn reversed_range_and_unknown_source_are_errors() {
        let conn = open_test_connection();
        let s = seed(&conn);
        assert!(matches!(
            projected_emissions_range_impl(&conn, s.source_id, 2030, 2020, None),
            Err(EmissionsError::InvalidRange { .. })
        ));
        assert!(matches!(
            projected_emissions_impl(&conn, 999, 2024, None),
            Err(EmissionsError::NotFound { entity: "Source", id: 999 })
        ));
    }

    #[test]
    fn project_modifications_caps_at_fifty_years() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let m = repository::insert_modification(
            &conn,
            &modification(s.strategy_id, s.source_id, 0.9, 2024),
        )
        .unwrap();

        let result =
            project_modifications_impl(&conn, s.source_id, &[m], Some(2023), Some(2075), 2030).unwrap();
        assert_eq!(result.end_year, 2073);
        assert_eq!(result.max_allowed_end_year, 2073);
        assert_eq!(result.projections.len(), 51);
        assert_eq!(result.projections["2023"].to_string(), "100.00");
        assert_eq!(result.projections["2024"].to_string(), "90.00");
        assert_eq!(result.projections["2028"].to_string(), "0.00");
    }

    #[test]
    fn project_modifications_defaults_to_current_year() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let result = project_modifications_impl(&conn, s.source_id, &[], None, None, 2025).unwrap();
        assert_eq!(result.start_year, 2025);
        assert_eq!(result.end_year, 2075);
    }

    #[test]
    fn project_modifications_ignores_foreign_ids() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let other_source = {
            let record = repository::get_source(&conn, s.source_id).unwrap();
            repository::insert_source(&conn, &source("Servers", record.report_id)).unwrap()
        };
        let foreign = repository::insert_modification(
            &conn,
            &modification(s.strategy_id, other_source, 0.0, 2023),
        )
        .unwrap();

        let result =
            project_modifications_impl(&conn, s.source_id, &[foreign], Some(2023), Some(2023), 2023)
                .unwrap();
        assert_eq!(result.projections["2023"].to_string(), "100.00");
    }

    #[test]
    fn progressive_projection_through_the_store() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let mut ramp = modification(s.strategy_id, s.source_id, 1.0, 2024);
        ramp.is_progressive = true;
        ramp.end_year = Some(2026);
        ramp.target_value = Some(2000.0);
        let m = repository::insert_modification(&conn, &ramp).unwrap();

        let result =
            project_modifications_impl(&conn, s.source_id, &[m], Some(2023), Some(2027), 2023).unwrap();
        let rendered: Vec<String> = result.projections.values().map(Decimal::to_string).collect();
        // the window closes after 2026, so 2027 is back at baseline
        assert_eq!(rendered, vec!["100.00", "100.00", "150.00", "200.00", "100.00"]);
    }

    #[test]
    fn oversized_ranges_are_rejected_before_loading() {
        let conn = open_test_connection();
        let s = seed(&conn);
        assert!(matches!(
            projected_emissions_range_impl(&conn, s.source_id, -2_000_000_000, 2_000_000_000, None),
            Err(EmissionsError::Validation(_))
        ));
        assert!(matches!(
            source_emissions_by_year_impl(&conn, s.source_id, Some(0), Some(i32::MAX), 2025),
            Err(EmissionsError::Validation(_))
        ));
        assert!(projected_emissions_range_impl(&conn, s.source_id, 2000, 2199, None).is_ok());
    }

    #[test]
    fn open_ended_progressive_holds_its_target() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let mut ramp = modification(s.strategy_id, s.source_id, 1.0, 2024);
        ramp.is_progressive = true;
        ramp.calculation_year = Some(2026);
        ramp.target_value = Some(2000.0);
        let m = repository::insert_modification(&conn, &ramp).unwrap();

        let result =
            project_modifications_impl(&conn, s.source_id, &[m], Some(2023), Some(2027), 2023).unwrap();
        let rendered: Vec<String> = result.projections.values().map(Decimal::to_string).collect();
        assert_eq!(rendered, vec!["100.00", "100.00", "150.00", "200.00", "200.00"]);
    }

    #[test]
    fn source_series_defaults_to_acquisition_through_current_year() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let result = source_emissions_by_year_impl(&conn, s.source_id, None, None, 2025).unwrap();
        assert_eq!(result.start_year, 2023);
        assert_eq!(result.end_year, 2025);
        assert_eq!(result.emissions.len(), 3);

        let total = source_total_emission_impl(&conn, s.source_id, 2025).unwrap();
        assert_eq!(total.to_string(), "300.00");
    }
}

//! Presentation layer: request defaults and bounds, two-decimal rendering and
//! conversion of results into Python objects.

pub mod guards;
pub mod planner;
pub mod projections;
pub mod reports;
pub mod strategies;

use std::collections::HashSet;

use indexmap::IndexMap;
use pyo3::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::errors::{EmissionsError, EmissionsResult};
use crate::projection::YearSeries;

/// Year-keyed amounts as they are rendered, e.g. `{"2024": "9000.00"}`.
pub type AmountSeries = IndexMap<String, Decimal>;

/// Round `value` to two decimal places, half away from zero.
pub fn amount(value: f64) -> EmissionsResult<Decimal> {
    let decimal = Decimal::from_f64(value).ok_or_else(|| {
        EmissionsError::Validation(format!("{value} cannot be represented as an amount"))
    })?;
    let mut rounded = decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    Ok(rounded)
}

pub fn amount_series(series: &YearSeries) -> EmissionsResult<AmountSeries> {
    series
        .iter()
        .map(|(year, value)| Ok((year.to_string(), amount(*value)?)))
        .collect()
}

pub(crate) fn strategy_filter(strategy_ids: Option<&[i64]>) -> Option<HashSet<i64>> {
    strategy_ids.map(|ids| ids.iter().copied().collect())
}

/// Serialize `value` to JSON and hand it to Python's `json.loads`.
pub(crate) fn to_python<T: Serialize>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let json_str = serde_json::to_string(value).map_err(EmissionsError::from)?;
    let json_module = py.import("json")?;
    json_module
        .call_method1("loads", (json_str,))
        .map(|o| o.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_keep_exactly_two_decimals() {
        assert_eq!(amount(9000.0).unwrap().to_string(), "9000.00");
        assert_eq!(amount(10000.000000000002).unwrap().to_string(), "10000.00");
        assert_eq!(amount(0.0).unwrap().to_string(), "0.00");
        assert_eq!(amount(12.3).unwrap().to_string(), "12.30");
    }

    #[test]
    fn midpoints_round_away_from_zero() {
        assert_eq!(amount(0.125).unwrap().to_string(), "0.13");
        assert_eq!(amount(-0.125).unwrap().to_string(), "-0.13");
        assert_eq!(amount(2.5).unwrap().to_string(), "2.50");
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert!(amount(f64::NAN).is_err());
        assert!(amount(f64::INFINITY).is_err());
    }

    #[test]
    fn series_keys_are_year_strings_in_order() {
        let series: YearSeries = [(2025, 1.0), (2024, 2.0)].into_iter().collect();
        let rendered = amount_series(&series).unwrap();
        assert_eq!(
            rendered.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["2025", "2024"]
        );
        assert_eq!(
            serde_json::to_string(&rendered).unwrap(),
            r#"{"2025":"1.00","2024":"2.00"}"#
        );
    }
}

//! Persisted record types shared by the store and the Python layer.
//!
//! Records mirror table rows and keep choice fields as their stored string
//! codes. The projection engine works on the typed views built from them
//! (`projection::Source`, `projection::Modification`).

use chrono::NaiveDate;
use pyo3::prelude::*;

use crate::errors::{EmissionsError, EmissionsResult};

// ---------------------------------------------------------------------------
// Choice lists
// ---------------------------------------------------------------------------

pub const CATEGORIES: &[(&str, &str)] = &[
    ("TRANSPORT", "Vehicles & other transportation means"),
    ("ENERGY", "Energy"),
    ("IT", "IT & Electronic Material"),
    ("FURNITURE", "Furniture & Other Manufactured Goods"),
    ("TOOLS", "Tools & Machinery"),
];

pub const METHODS: &[(&str, &str)] = &[
    ("DISTANCE", "Distance-based"),
    ("CONSUMPTION", "Consumption-based"),
    ("FUEL", "Fuel-based"),
    ("SPEND", "Spend-based"),
];

pub const UNITS: &[(&str, &str)] = &[
    ("km", "Kilometers"),
    ("kWh", "Kilowatt Hours"),
    ("L", "Liters"),
    ("kg", "Kilograms"),
    ("USD", "US Dollars"),
];

pub const MODIFICATION_TYPES: &[(&str, &str)] = &[
    ("VALUE", "Value Modification"),
    ("EF", "Emission Factor Modification"),
];

fn check_choice(field: &str, value: &str, choices: &[(&str, &str)]) -> EmissionsResult<()> {
    if choices.iter().any(|(code, _)| *code == value) {
        Ok(())
    } else {
        Err(EmissionsError::Validation(format!(
            "{field}: {value:?} is not a valid choice"
        )))
    }
}

/// Largest year the projection engine can represent.
const MAX_YEAR: i64 = i32::MAX as i64;
/// Largest quantity or lifetime the projection engine can represent.
const MAX_COUNT: i64 = u32::MAX as i64;

fn check_bounds(field: &str, value: i64, min: i64, max: i64) -> EmissionsResult<()> {
    if !(min..=max).contains(&value) {
        return Err(EmissionsError::Validation(format!(
            "{field}: must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

fn check_not_blank(field: &str, value: &str) -> EmissionsResult<()> {
    if value.trim().is_empty() {
        return Err(EmissionsError::Validation(format!("{field} may not be blank")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ReportRecord
// ---------------------------------------------------------------------------

/// A dated collection of sources, usually one per year.
#[pyclass(frozen, get_all)]
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRecord {
    pub id: Option<i64>,
    pub name: String,
    /// ISO date, `YYYY-MM-DD`.
    pub date: String,
    pub total_emissions_cache: Option<f64>,
    pub strategy_ids: Vec<i64>,
}

impl ReportRecord {
    pub fn validate(&self) -> EmissionsResult<()> {
        check_not_blank("name", &self.name)?;
        if self.name.chars().count() > 200 {
            return Err(EmissionsError::Validation(
                "name: at most 200 characters".to_string(),
            ));
        }
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|e| {
            EmissionsError::Validation(format!("date: {:?} is not a YYYY-MM-DD date ({e})", self.date))
        })?;
        Ok(())
    }
}

#[pymethods]
impl ReportRecord {
    #[new]
    #[pyo3(signature = (name, date, id=None, total_emissions_cache=None, strategy_ids=Vec::new()))]
    fn new(
        name: String,
        date: String,
        id: Option<i64>,
        total_emissions_cache: Option<f64>,
        strategy_ids: Vec<i64>,
    ) -> Self {
        Self {
            id,
            name,
            date,
            total_emissions_cache,
            strategy_ids,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "ReportRecord(id={:?}, name={:?}, date={:?})",
            self.id, self.name, self.date
        )
    }

    fn __str__(&self) -> String {
        format!("{} - {}", self.name, self.date)
    }
}

// ---------------------------------------------------------------------------
// SourceRecord
// ---------------------------------------------------------------------------

/// An emitting asset or activity belonging to one report.
#[pyclass(frozen, get_all)]
#[derive(Clone, Debug, PartialEq)]
pub struct SourceRecord {
    pub id: Option<i64>,
    pub name: String,
    pub report_id: i64,
    pub category: String,
    pub description: String,
    pub method: String,
    /// Mass CO2e per unit of `value`.
    pub emission_factor: f64,
    /// Annual usage or distance for a single unit.
    pub value: f64,
    pub value_unit: String,
    pub quantity: i64,
    pub lifetime: i64,
    pub acquisition_year: i64,
    /// ± percentage; informational.
    pub uncertainty: f64,
    pub year: Option<i64>,
}

impl SourceRecord {
    pub fn validate(&self) -> EmissionsResult<()> {
        check_not_blank("name", &self.name)?;
        check_choice("category", &self.category, CATEGORIES)?;
        check_choice("method", &self.method, METHODS)?;
        check_choice("value_unit", &self.value_unit, UNITS)?;
        if !self.value.is_finite() || self.value <= 0.0 {
            return Err(EmissionsError::Validation(
                "value: must be greater than zero".to_string(),
            ));
        }
        if !self.emission_factor.is_finite() || self.emission_factor < 0.0 {
            return Err(EmissionsError::Validation(
                "emission_factor: must be zero or greater".to_string(),
            ));
        }
        check_bounds("quantity", self.quantity, 1, MAX_COUNT)?;
        check_bounds("lifetime", self.lifetime, 0, MAX_COUNT)?;
        check_bounds("acquisition_year", self.acquisition_year, 0, MAX_YEAR)?;
        if let Some(year) = self.year {
            check_bounds("year", year, 0, MAX_YEAR)?;
            // both operands are bounded above, so the sum cannot overflow
            if year < self.acquisition_year || year >= self.acquisition_year + self.lifetime {
                return Err(EmissionsError::Validation(
                    "year: must be within the source's lifetime".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[pymethods]
impl SourceRecord {
    #[new]
    #[pyo3(signature = (
        name,
        report_id,
        category,
        method,
        emission_factor,
        value,
        value_unit,
        quantity,
        lifetime,
        acquisition_year,
        description=String::new(),
        uncertainty=0.0,
        year=None,
        id=None,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        name: String,
        report_id: i64,
        category: String,
        method: String,
        emission_factor: f64,
        value: f64,
        value_unit: String,
        quantity: i64,
        lifetime: i64,
        acquisition_year: i64,
        description: String,
        uncertainty: f64,
        year: Option<i64>,
        id: Option<i64>,
    ) -> Self {
        Self {
            id,
            name,
            report_id,
            category,
            description,
            method,
            emission_factor,
            value,
            value_unit,
            quantity,
            lifetime,
            acquisition_year,
            uncertainty,
            year,
        }
    }

    /// Annual emission for a single year of activity.
    #[getter]
    fn annual_emission(&self) -> f64 {
        self.emission_factor * self.value * self.quantity as f64
    }

    fn __repr__(&self) -> String {
        format!(
            "SourceRecord(id={:?}, name={:?}, report_id={}, method={:?}, acquisition_year={}, lifetime={})",
            self.id, self.name, self.report_id, self.method, self.acquisition_year, self.lifetime,
        )
    }

    fn __str__(&self) -> String {
        self.name.clone()
    }
}

// ---------------------------------------------------------------------------
// ReductionStrategyRecord
// ---------------------------------------------------------------------------

#[pyclass(frozen, get_all)]
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionStrategyRecord {
    pub id: Option<i64>,
    pub name: String,
    pub created_at: Option<String>,
}

impl ReductionStrategyRecord {
    pub fn validate(&self) -> EmissionsResult<()> {
        check_not_blank("name", &self.name)
    }
}

#[pymethods]
impl ReductionStrategyRecord {
    #[new]
    #[pyo3(signature = (name, id=None, created_at=None))]
    fn new(name: String, id: Option<i64>, created_at: Option<String>) -> Self {
        Self {
            id,
            name,
            created_at,
        }
    }

    fn __repr__(&self) -> String {
        format!("ReductionStrategyRecord(id={:?}, name={:?})", self.id, self.name)
    }

    fn __str__(&self) -> String {
        self.name.clone()
    }
}

// ---------------------------------------------------------------------------
// ModificationRecord
// ---------------------------------------------------------------------------

/// A timed adjustment of one source, owned by one reduction strategy.
#[pyclass(frozen, get_all)]
#[derive(Clone, Debug, PartialEq)]
pub struct ModificationRecord {
    pub id: Option<i64>,
    pub reduction_strategy_id: i64,
    pub source_id: i64,
    /// `VALUE` or `EF`.
    pub modification_type: String,
    /// Multiplier for non-progressive modifications.
    pub value: f64,
    /// Assigned on insert when `None` or `0`.
    pub order: Option<i64>,
    pub start_year: i64,
    pub end_year: Option<i64>,
    pub is_progressive: bool,
    pub target_value: Option<f64>,
    pub calculation_year: Option<i64>,
}

impl ModificationRecord {
    /// Field checks that do not need the projection types. Ramp consistency
    /// is checked by `projection::Modification::try_from`.
    pub fn validate(&self) -> EmissionsResult<()> {
        check_choice("modification_type", &self.modification_type, MODIFICATION_TYPES)?;
        if !self.value.is_finite() {
            return Err(EmissionsError::Validation("value: must be finite".to_string()));
        }
        check_bounds("start_year", self.start_year, 0, MAX_YEAR)?;
        if let Some(year) = self.calculation_year {
            check_bounds("calculation_year", year, 0, MAX_YEAR)?;
        }
        if let Some(end) = self.end_year {
            check_bounds("end_year", end, 0, MAX_YEAR)?;
            if end < self.start_year {
                return Err(EmissionsError::Validation(
                    "end_year: must not precede start_year".to_string(),
                ));
            }
        }
        if matches!(self.order, Some(o) if o < 0) {
            return Err(EmissionsError::Validation(
                "order: must be zero or greater".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_order(&self, order: i64) -> Self {
        Self {
            order: Some(order),
            ..self.clone()
        }
    }
}

#[pymethods]
impl ModificationRecord {
    #[new]
    #[pyo3(signature = (
        reduction_strategy_id,
        source_id,
        modification_type,
        value,
        start_year,
        order=None,
        end_year=None,
        is_progressive=false,
        target_value=None,
        calculation_year=None,
        id=None,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        reduction_strategy_id: i64,
        source_id: i64,
        modification_type: String,
        value: f64,
        start_year: i64,
        order: Option<i64>,
        end_year: Option<i64>,
        is_progressive: bool,
        target_value: Option<f64>,
        calculation_year: Option<i64>,
        id: Option<i64>,
    ) -> Self {
        Self {
            id,
            reduction_strategy_id,
            source_id,
            modification_type,
            value,
            order,
            start_year,
            end_year,
            is_progressive,
            target_value,
            calculation_year,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "ModificationRecord(id={:?}, source_id={}, strategy_id={}, type={:?}, start_year={}, order={:?})",
            self.id,
            self.source_id,
            self.reduction_strategy_id,
            self.modification_type,
            self.start_year,
            self.order,
        )
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub fn register_models(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("CATEGORIES", CATEGORIES.to_vec())?;
    m.add("METHODS", METHODS.to_vec())?;
    m.add("UNITS", UNITS.to_vec())?;
    m.add("MODIFICATION_TYPES", MODIFICATION_TYPES.to_vec())?;

    m.add_class::<ReportRecord>()?;
    m.add_class::<SourceRecord>()?;
    m.add_class::<ReductionStrategyRecord>()?;
    m.add_class::<ModificationRecord>()?;
    Ok(())
}

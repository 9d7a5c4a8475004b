//! Emissions projection engine.
//!
//! Everything in this module is pure: it takes a source snapshot plus its
//! modifications and produces numbers. Loading and presenting happen in
//! `store` and `query`.

pub mod baseline;
pub mod fold;
pub mod range;
pub mod reduction;
pub mod selector;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{EmissionsError, EmissionsResult};
use crate::models::{ModificationRecord, SourceRecord};

pub use baseline::{baseline_emissions, lifetime_to_date_emissions};
pub use fold::{fold_modifications, fold_with_origins, ramp_origins, EffectiveParameters};
pub use range::SourceProjection;
pub use reduction::{
    compare_emissions, report_baseline_total, report_lifetime_to_date_total,
    report_projected_range, report_projected_total, strategy_reduction, EmissionsComparison,
    SourceSnapshot, StrategyReduction,
};
pub use selector::select_modifications;

/// Ordered year -> value mapping. Insertion order is ascending year order.
pub type YearSeries = IndexMap<i32, f64>;

/// How a source's activity value is measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmissionMethod {
    Distance,
    Consumption,
    Fuel,
    Spend,
}

impl EmissionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            EmissionMethod::Distance => "DISTANCE",
            EmissionMethod::Consumption => "CONSUMPTION",
            EmissionMethod::Fuel => "FUEL",
            EmissionMethod::Spend => "SPEND",
        }
    }
}

impl FromStr for EmissionMethod {
    type Err = EmissionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DISTANCE" => Ok(EmissionMethod::Distance),
            "CONSUMPTION" => Ok(EmissionMethod::Consumption),
            "FUEL" => Ok(EmissionMethod::Fuel),
            "SPEND" => Ok(EmissionMethod::Spend),
            other => Err(EmissionsError::Validation(format!(
                "Unknown emission method: {other}"
            ))),
        }
    }
}

impl fmt::Display for EmissionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Baseline parameters of one emitting asset or activity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub method: EmissionMethod,
    pub emission_factor: f64,
    pub value: f64,
    pub quantity: u32,
    pub lifetime: u32,
    pub acquisition_year: i32,
    /// One-off annual figure: the source is active in this year only.
    pub year: Option<i32>,
}

impl Source {
    /// Whether the source emits anything in `year`.
    pub fn is_active(&self, year: i32) -> bool {
        if let Some(only) = self.year {
            if only != year {
                return false;
            }
        }
        let first = i64::from(self.acquisition_year);
        let last = first + i64::from(self.lifetime) - 1;
        (first..=last).contains(&i64::from(year))
    }

    /// `emission_factor × value × quantity`, ignoring the active window.
    pub fn annual_emission(&self) -> f64 {
        self.emission_factor * self.value * f64::from(self.quantity)
    }
}

/// Field of the source a modification acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    Value,
    EmissionFactor,
}

impl Target {
    /// Stored `modification_type` code.
    pub fn code(self) -> &'static str {
        match self {
            Target::Value => "VALUE",
            Target::EmissionFactor => "EF",
        }
    }
}

impl FromStr for Target {
    type Err = EmissionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALUE" => Ok(Target::Value),
            "EF" => Ok(Target::EmissionFactor),
            other => Err(EmissionsError::InvalidModification(format!(
                "unknown modification type {other:?}"
            ))),
        }
    }
}

/// What a modification does to its target field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Adjustment {
    /// Multiply the field by `factor` from `start_year` on.
    Scale { factor: f64 },
    /// Interpolate linearly from the pre-modification level at `start_year`
    /// to `target` at `ramp_end`, then hold `target`.
    Ramp { target: f64, ramp_end: i32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub id: i64,
    pub strategy_id: i64,
    pub source_id: i64,
    pub target: Target,
    pub adjustment: Adjustment,
    pub order: i64,
    pub start_year: i32,
    pub end_year: Option<i32>,
}

impl Modification {
    /// Whether `year` falls inside the activation window.
    pub fn applies_in(&self, year: i32) -> bool {
        year >= self.start_year && self.end_year.map_or(true, |end| year <= end)
    }

    pub fn sort_key(&self) -> (i32, i64, i64) {
        (self.start_year, self.order, self.id)
    }

    pub fn validate(&self) -> EmissionsResult<()> {
        if let Adjustment::Ramp { target, ramp_end } = self.adjustment {
            if !target.is_finite() {
                return Err(EmissionsError::InvalidModification(format!(
                    "modification {} has a non-finite target value",
                    self.id
                )));
            }
            if ramp_end < self.start_year {
                return Err(EmissionsError::InvalidModification(format!(
                    "modification {} ramps to {ramp_end}, before its start year {}",
                    self.id, self.start_year
                )));
            }
        }
        if let Adjustment::Scale { factor } = self.adjustment {
            if !factor.is_finite() {
                return Err(EmissionsError::InvalidModification(format!(
                    "modification {} has a non-finite factor",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

fn year_from(value: i64, field: &str) -> EmissionsResult<i32> {
    i32::try_from(value)
        .map_err(|_| EmissionsError::Validation(format!("{field} {value} is out of range")))
}

fn count_from(value: i64, field: &str) -> EmissionsResult<u32> {
    u32::try_from(value)
        .map_err(|_| EmissionsError::Validation(format!("{field} must be non-negative, got {value}")))
}

impl TryFrom<&SourceRecord> for Source {
    type Error = EmissionsError;

    fn try_from(record: &SourceRecord) -> EmissionsResult<Self> {
        Ok(Source {
            id: record.id.unwrap_or_default(),
            method: record.method.parse()?,
            emission_factor: record.emission_factor,
            value: record.value,
            quantity: count_from(record.quantity, "quantity")?,
            lifetime: count_from(record.lifetime, "lifetime")?,
            acquisition_year: year_from(record.acquisition_year, "acquisition_year")?,
            year: record.year.map(|y| year_from(y, "year")).transpose()?,
        })
    }
}

impl TryFrom<&ModificationRecord> for Modification {
    type Error = EmissionsError;

    fn try_from(record: &ModificationRecord) -> EmissionsResult<Self> {
        let id = record.id.unwrap_or_default();
        let start_year = year_from(record.start_year, "start_year")?;
        let end_year = record.end_year.map(|y| year_from(y, "end_year")).transpose()?;
        let adjustment = if record.is_progressive {
            let target = record.target_value.ok_or_else(|| {
                EmissionsError::InvalidModification(format!(
                    "progressive modification {id} has no target value"
                ))
            })?;
            let ramp_end = match record.calculation_year {
                Some(y) => year_from(y, "calculation_year")?,
                None => end_year.ok_or_else(|| {
                    EmissionsError::InvalidModification(format!(
                        "progressive modification {id} needs a calculation year or an end year"
                    ))
                })?,
            };
            Adjustment::Ramp { target, ramp_end }
        } else {
            Adjustment::Scale {
                factor: record.value,
            }
        };
        let modification = Modification {
            id,
            strategy_id: record.reduction_strategy_id,
            source_id: record.source_id,
            target: record.modification_type.parse()?,
            adjustment,
            order: record.order.unwrap_or_default(),
            start_year,
            end_year,
        };
        modification.validate()?;
        Ok(modification)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn source(emission_factor: f64, value: f64, quantity: u32) -> Source {
        Source {
            id: 1,
            method: EmissionMethod::Distance,
            emission_factor,
            value,
            quantity,
            lifetime: 10,
            acquisition_year: 2023,
            year: None,
        }
    }

    pub fn scale(id: i64, target: Target, factor: f64, start_year: i32) -> Modification {
        Modification {
            id,
            strategy_id: 1,
            source_id: 1,
            target,
            adjustment: Adjustment::Scale { factor },
            order: 1,
            start_year,
            end_year: None,
        }
    }

    pub fn ramp(id: i64, target: Target, to: f64, start_year: i32, ramp_end: i32) -> Modification {
        Modification {
            id,
            strategy_id: 1,
            source_id: 1,
            target,
            adjustment: Adjustment::Ramp {
                target: to,
                ramp_end,
            },
            order: 1,
            start_year,
            end_year: None,
        }
    }

    pub fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }
}

//! Per-source projections for a single year or an inclusive year range.

use std::collections::HashSet;

use super::fold::{fold_with_origins, ramp_origins};
use super::selector::select_modifications;
use super::{baseline_emissions, Modification, Source, YearSeries};
use crate::errors::{EmissionsError, EmissionsResult};

/// A source paired with its selected, validated and ordered modifications.
///
/// Selection and ramp origins are computed once in [`SourceProjection::new`];
/// every year evaluated afterwards reuses them.
#[derive(Debug)]
pub struct SourceProjection<'a> {
    source: &'a Source,
    modifications: Vec<&'a Modification>,
    origins: Vec<f64>,
}

impl<'a> SourceProjection<'a> {
    pub fn new(
        source: &'a Source,
        modifications: &'a [Modification],
        strategy_filter: Option<&HashSet<i64>>,
    ) -> EmissionsResult<Self> {
        let modifications = select_modifications(modifications, strategy_filter);
        for m in &modifications {
            m.validate()?;
        }
        let origins = ramp_origins(source, &modifications);
        Ok(Self {
            source,
            modifications,
            origins,
        })
    }

    /// Projection with no modifications at all.
    pub fn baseline(source: &'a Source) -> Self {
        Self {
            source,
            modifications: Vec::new(),
            origins: Vec::new(),
        }
    }

    pub fn source(&self) -> &Source {
        self.source
    }

    pub fn modifications(&self) -> &[&'a Modification] {
        &self.modifications
    }

    pub fn emissions_for_year(&self, year: i32) -> f64 {
        if !self.source.is_active(year) {
            return 0.0;
        }
        if self.modifications.is_empty() {
            return baseline_emissions(self.source, year);
        }
        fold_with_origins(self.source, &self.modifications, &self.origins, year)
            .emissions(self.source.quantity)
    }

    pub fn emissions_for_range(&self, start_year: i32, end_year: i32) -> EmissionsResult<YearSeries> {
        check_range(start_year, end_year)?;
        Ok((start_year..=end_year)
            .map(|year| (year, self.emissions_for_year(year)))
            .collect())
    }
}

pub(crate) fn check_range(start_year: i32, end_year: i32) -> EmissionsResult<()> {
    if start_year > end_year {
        return Err(EmissionsError::InvalidRange {
            start: start_year,
            end: end_year,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::fixtures::{assert_close, ramp, scale, source};
    use crate::projection::{Adjustment, Target};

    #[test]
    fn end_to_end_distance_source_with_value_reduction() {
        let s = source(0.1, 20000.0, 5);
        let mods = [scale(1, Target::Value, 0.9, 2024)];
        let projection = SourceProjection::new(&s, &mods, None).unwrap();
        assert_close(projection.emissions_for_year(2023), 10000.0);
        assert_close(projection.emissions_for_year(2024), 9000.0);
    }

    #[test]
    fn unmodified_projection_equals_baseline_every_year() {
        let s = source(0.3, 1234.5, 3);
        let projection = SourceProjection::new(&s, &[], None).unwrap();
        for year in 2015..2040 {
            assert_eq!(projection.emissions_for_year(year), baseline_emissions(&s, year));
        }
    }

    #[test]
    fn inactive_years_stay_zero_even_when_modified() {
        let s = source(0.1, 1000.0, 1);
        let mods = [ramp(1, Target::Value, 5000.0, 2020, 2022)];
        let projection = SourceProjection::new(&s, &mods, None).unwrap();
        assert_eq!(projection.emissions_for_year(2022), 0.0);
        assert_eq!(projection.emissions_for_year(2033), 0.0);
    }

    #[test]
    fn progressive_reference_points() {
        let s = source(1.0, 100.0, 1);
        let mods = [ramp(1, Target::Value, 40.0, 2024, 2026)];
        let projection = SourceProjection::new(&s, &mods, None).unwrap();
        assert_close(projection.emissions_for_year(2024), 100.0);
        assert_close(projection.emissions_for_year(2025), 100.0 + (40.0 - 100.0) * 0.5);
        assert_close(projection.emissions_for_year(2026), 40.0);
    }

    #[test]
    fn storage_order_does_not_matter() {
        let s = source(1.0, 100.0, 1);
        let mut halve = scale(1, Target::Value, 0.5, 2024);
        halve.order = 2;
        let mut set = ramp(2, Target::Value, 80.0, 2024, 2024);
        set.order = 1;

        let forward = [set.clone(), halve.clone()];
        let backward = [halve, set];
        let a = SourceProjection::new(&s, &forward, None).unwrap();
        let b = SourceProjection::new(&s, &backward, None).unwrap();
        // set to 80, then halve
        assert_close(a.emissions_for_year(2024), 40.0);
        assert_eq!(a.emissions_for_year(2024), b.emissions_for_year(2024));
    }

    #[test]
    fn ramp_after_a_one_year_scale_rises_from_the_scaled_level() {
        let s = source(1.0, 1000.0, 1);
        let mut halve = scale(1, Target::Value, 0.5, 2024);
        halve.end_year = Some(2024);
        halve.order = 1;
        let mut grow = ramp(2, Target::Value, 900.0, 2024, 2028);
        grow.order = 2;
        let mods = [grow, halve];
        let projection = SourceProjection::new(&s, &mods, None).unwrap();
        let series = projection.emissions_for_range(2024, 2028).unwrap();
        let values: Vec<f64> = series.values().copied().collect();
        for (actual, expected) in values.iter().zip([500.0, 600.0, 700.0, 800.0, 900.0]) {
            assert_close(*actual, expected);
        }
    }

    #[test]
    fn range_keys_match_request_and_values_match_scalar() {
        let s = source(0.1, 20000.0, 5);
        let mods = [scale(1, Target::Value, 0.9, 2024)];
        let projection = SourceProjection::new(&s, &mods, None).unwrap();
        let series = projection.emissions_for_range(2024, 2026).unwrap();
        assert_eq!(series.keys().copied().collect::<Vec<_>>(), vec![2024, 2025, 2026]);
        for (year, value) in &series {
            assert_eq!(*value, projection.emissions_for_year(*year));
        }
    }

    #[test]
    fn single_year_range_is_allowed() {
        let s = source(0.1, 1000.0, 1);
        let projection = SourceProjection::baseline(&s);
        let series = projection.emissions_for_range(2025, 2025).unwrap();
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn reversed_range_is_rejected() {
        let s = source(0.1, 1000.0, 1);
        let projection = SourceProjection::baseline(&s);
        let err = projection.emissions_for_range(2026, 2024).unwrap_err();
        assert!(matches!(
            err,
            EmissionsError::InvalidRange {
                start: 2026,
                end: 2024
            }
        ));
    }

    #[test]
    fn strategy_filter_excludes_other_strategies() {
        let s = source(1.0, 100.0, 1);
        let mut mine = scale(1, Target::Value, 0.5, 2024);
        mine.strategy_id = 7;
        let mut other = scale(2, Target::Value, 0.1, 2024);
        other.strategy_id = 8;
        let mods = [mine, other];
        let filter: HashSet<i64> = [7].into_iter().collect();
        let projection = SourceProjection::new(&s, &mods, Some(&filter)).unwrap();
        assert_close(projection.emissions_for_year(2024), 50.0);
    }

    #[test]
    fn invalid_modification_fails_construction() {
        let s = source(1.0, 100.0, 1);
        let mut bad = scale(1, Target::Value, 0.5, 2024);
        bad.adjustment = Adjustment::Ramp {
            target: 10.0,
            ramp_end: 2020,
        };
        let mods = [bad];
        assert!(matches!(
            SourceProjection::new(&s, &mods, None),
            Err(EmissionsError::InvalidModification(_))
        ));
    }
}

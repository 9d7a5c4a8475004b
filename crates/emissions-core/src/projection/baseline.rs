//! Unmodified emissions of a source.

use super::Source;

/// Emissions of `source` in `year` before any modification; `0.0` when the
/// source is inactive that year.
pub fn baseline_emissions(source: &Source, year: i32) -> f64 {
    if source.is_active(year) {
        source.annual_emission()
    } else {
        0.0
    }
}

/// Emissions accumulated from the acquisition year up to and including
/// `current_year`, capped at the source's lifetime.
pub fn lifetime_to_date_emissions(source: &Source, current_year: i32) -> f64 {
    let elapsed = i64::from(current_year) - i64::from(source.acquisition_year) + 1;
    let years_active = elapsed.min(i64::from(source.lifetime)).max(0);
    source.annual_emission() * years_active as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::fixtures::{assert_close, source};

    #[test]
    fn active_year_yields_annual_emission() {
        let s = source(0.1, 20000.0, 5);
        assert_close(baseline_emissions(&s, 2023), 10000.0);
        assert_close(baseline_emissions(&s, 2032), 10000.0);
    }

    #[test]
    fn inactive_years_are_exactly_zero() {
        let s = source(0.1, 20000.0, 5);
        assert_eq!(baseline_emissions(&s, 2022), 0.0);
        assert_eq!(baseline_emissions(&s, 2033), 0.0);
    }

    #[test]
    fn year_specific_source_only_counts_its_year() {
        let mut s = source(1.0, 100.0, 1);
        s.acquisition_year = 2020;
        s.year = Some(2022);
        assert_close(baseline_emissions(&s, 2022), 100.0);
        assert_eq!(baseline_emissions(&s, 2025), 0.0);
    }

    #[test]
    fn lifetime_to_date_caps_at_lifetime() {
        let mut s = source(0.5, 100.0, 2);
        s.lifetime = 5;
        s.acquisition_year = 2020;
        assert_close(lifetime_to_date_emissions(&s, 2022), 300.0);
        assert_close(lifetime_to_date_emissions(&s, 2040), 500.0);
        assert_eq!(lifetime_to_date_emissions(&s, 2019), 0.0);
    }
}

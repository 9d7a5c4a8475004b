//! Left-to-right application of modifications to a source's parameters.
//!
//! The fold starts from the source's own `value` and `emission_factor` and
//! walks the modifications in their sorted order. A scale multiplies the
//! level produced by everything before it in the target year. A ramp
//! interpolates from its origin: the level its field had when the ramp began,
//! i.e. the fold of the earlier modifications evaluated at the ramp's
//! `start_year`. Origins do not depend on the target year, so they are
//! computed once per modification list by [`ramp_origins`].

use super::{Adjustment, Modification, Source, Target};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectiveParameters {
    pub value: f64,
    pub emission_factor: f64,
}

impl EffectiveParameters {
    pub fn of(source: &Source) -> Self {
        Self {
            value: source.value,
            emission_factor: source.emission_factor,
        }
    }

    fn get(&self, target: Target) -> f64 {
        match target {
            Target::Value => self.value,
            Target::EmissionFactor => self.emission_factor,
        }
    }

    fn with(self, target: Target, level: f64) -> Self {
        match target {
            Target::Value => Self {
                value: level,
                ..self
            },
            Target::EmissionFactor => Self {
                emission_factor: level,
                ..self
            },
        }
    }

    /// Emissions for these parameters at the given multiplicity.
    pub fn emissions(&self, quantity: u32) -> f64 {
        self.emission_factor * self.value * f64::from(quantity)
    }
}

fn ramp_level(pre: f64, target: f64, start_year: i32, ramp_end: i32, year: i32) -> f64 {
    if ramp_end <= start_year || year >= ramp_end {
        return target;
    }
    let progress = f64::from(year - start_year) / f64::from(ramp_end - start_year);
    pre + (target - pre) * progress
}

impl Modification {
    /// Apply this modification for `year`, assuming it is active then.
    /// `origin` is the level a ramp interpolates from; scales ignore it.
    pub fn apply(&self, params: EffectiveParameters, year: i32, origin: f64) -> EffectiveParameters {
        let next = match self.adjustment {
            Adjustment::Scale { factor } => params.get(self.target) * factor,
            Adjustment::Ramp { target, ramp_end } => {
                ramp_level(origin, target, self.start_year, ramp_end, year)
            }
        };
        params.with(self.target, next)
    }
}

/// Level of each modification's target field just before it begins.
///
/// `modifications` must already be sorted; entry `i` is the fold of
/// `modifications[..i]` at `modifications[i].start_year`.
pub fn ramp_origins(source: &Source, modifications: &[&Modification]) -> Vec<f64> {
    let mut origins = Vec::with_capacity(modifications.len());
    for (i, m) in modifications.iter().enumerate() {
        let before = fold_with_origins(source, &modifications[..i], &origins, m.start_year);
        origins.push(before.get(m.target));
    }
    origins
}

/// Fold with origins from [`ramp_origins`] for the same list.
pub fn fold_with_origins(
    source: &Source,
    modifications: &[&Modification],
    origins: &[f64],
    year: i32,
) -> EffectiveParameters {
    modifications
        .iter()
        .zip(origins)
        .filter(|(m, _)| m.applies_in(year))
        .fold(EffectiveParameters::of(source), |params, (m, origin)| {
            m.apply(params, year, *origin)
        })
}

/// Fold `modifications` (already sorted) into the parameters for `year`.
/// Modifications outside their activation window are skipped.
pub fn fold_modifications<'a, I>(source: &Source, modifications: I, year: i32) -> EffectiveParameters
where
    I: IntoIterator<Item = &'a Modification>,
{
    let modifications: Vec<&Modification> = modifications.into_iter().collect();
    let origins = ramp_origins(source, &modifications);
    fold_with_origins(source, &modifications, &origins, year)
}

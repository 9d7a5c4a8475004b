//! Picks and orders the modifications that apply to a projection.

use std::collections::HashSet;

use super::Modification;

/// Return the modifications eligible under `strategy_filter`, sorted by
/// `(start_year, order)` with ties broken by `id`.
///
/// `None` keeps every modification; `Some(set)` keeps only those whose
/// strategy id is in `set` (an empty set keeps nothing).
pub fn select_modifications<'a>(
    modifications: &'a [Modification],
    strategy_filter: Option<&HashSet<i64>>,
) -> Vec<&'a Modification> {
    let mut selected: Vec<&Modification> = modifications
        .iter()
        .filter(|m| strategy_filter.map_or(true, |ids| ids.contains(&m.strategy_id)))
        .collect();
    selected.sort_by_key(|m| m.sort_key());
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::fixtures::scale;
    use crate::projection::Target;

    fn ids(selected: &[&Modification]) -> Vec<i64> {
        selected.iter().map(|m| m.id).collect()
    }

    #[test]
    fn orders_by_start_year_then_order_regardless_of_input_order() {
        let mut late = scale(1, Target::Value, 0.9, 2026);
        late.order = 1;
        let mut second = scale(2, Target::Value, 0.8, 2024);
        second.order = 2;
        let mut first = scale(3, Target::Value, 0.7, 2024);
        first.order = 1;

        let mods = vec![late, second, first];
        assert_eq!(ids(&select_modifications(&mods, None)), vec![3, 2, 1]);
    }

    #[test]
    fn equal_keys_fall_back_to_id() {
        let a = scale(9, Target::Value, 0.9, 2024);
        let b = scale(4, Target::EmissionFactor, 0.5, 2024);
        let mods = vec![a, b];
        assert_eq!(ids(&select_modifications(&mods, None)), vec![4, 9]);
    }

    #[test]
    fn filter_keeps_only_listed_strategies() {
        let mut a = scale(1, Target::Value, 0.9, 2024);
        a.strategy_id = 10;
        let mut b = scale(2, Target::Value, 0.8, 2025);
        b.strategy_id = 20;
        let mods = vec![a, b];

        let only_twenty: HashSet<i64> = [20].into_iter().collect();
        assert_eq!(ids(&select_modifications(&mods, Some(&only_twenty))), vec![2]);

        let none: HashSet<i64> = HashSet::new();
        assert!(select_modifications(&mods, Some(&none)).is_empty());
    }
}

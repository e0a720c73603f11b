//! Kinship of a cell to every lineage group.

use crate::errors::ArithmeticError;
use crate::intbc_set::IntBcProfile;
use crate::molecule::LineageGroup;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Normalized kinship of one cell to each lineage group. Scores sum to one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KinshipVector {
    pub cell_bc: String,
    pub assigned: LineageGroup,
    pub scores: BTreeMap<LineageGroup, f64>,
}

impl KinshipVector {
    /// Kinship to the group the cell was assigned to upstream.
    pub fn assigned_score(&self) -> f64 {
        self.scores.get(&self.assigned).copied().unwrap_or(0.0)
    }

    /// The group with the highest kinship; the lowest group wins a tie.
    pub fn best_group(&self) -> Option<(LineageGroup, f64)> {
        self.scores
            .iter()
            .map(|(&g, &s)| (g, s))
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}

/// Weighted overlap of a cell's intBCs with the characteristic set of a group,
/// as a fraction of the group's total weight.
///
/// Returns `None` when the cell shares characteristic intBCs with a group whose
/// total weight is zero.
pub fn raw_kinship(cell_int_bcs: &BTreeSet<&str>, profile: &IntBcProfile) -> Option<f64> {
    let shared: Vec<&str> = profile
        .int_bcs
        .iter()
        .map(String::as_str)
        .filter(|b| cell_int_bcs.contains(b))
        .collect();
    if shared.is_empty() {
        return Some(0.0);
    }
    let total = profile.total_weight();
    if total == 0.0 {
        return None;
    }
    Some(shared.iter().map(|b| profile.weight(b)).sum::<f64>() / total)
}

/// Score a cell against every profile and normalize across groups.
///
/// A cell sharing no characteristic intBC with any group cannot be normalized
/// and yields `ArithmeticError::NoKinship`. Sharing intBCs with a group of zero
/// total weight yields `ArithmeticError::ZeroGroupWeight`.
pub fn score_kinship(
    cell_bc: &str,
    assigned: LineageGroup,
    cell_int_bcs: &BTreeSet<&str>,
    profiles: &BTreeMap<LineageGroup, IntBcProfile>,
) -> Result<KinshipVector, ArithmeticError> {
    let mut scores = BTreeMap::new();
    for (&group, profile) in profiles {
        let score =
            raw_kinship(cell_int_bcs, profile).ok_or_else(|| ArithmeticError::ZeroGroupWeight {
                cell_bc: cell_bc.to_string(),
                group,
            })?;
        scores.insert(group, score);
    }
    let total: f64 = scores.values().sum();
    if total == 0.0 {
        return Err(ArithmeticError::NoKinship {
            cell_bc: cell_bc.to_string(),
        });
    }
    for score in scores.values_mut() {
        *score /= total;
    }
    Ok(KinshipVector {
        cell_bc: cell_bc.to_string(),
        assigned,
        scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn profile(dropout: &[(&str, f64)]) -> IntBcProfile {
        IntBcProfile {
            int_bcs: dropout.iter().map(|(b, _)| b.to_string()).collect(),
            dropout: dropout.iter().map(|&(b, r)| (b.to_string(), r)).collect(),
            num_cells: 10,
        }
    }

    #[test]
    fn test_weighted_overlap() {
        let g1 = profile(&[("A", 0.1), ("B", 0.2), ("C", 0.9)]);
        let cell: BTreeSet<&str> = ["A", "B"].into_iter().collect();
        let score = raw_kinship(&cell, &g1).unwrap();
        assert!((score - 1.7 / 1.8).abs() < 1e-12);

        let stranger: BTreeSet<&str> = ["Q"].into_iter().collect();
        assert_eq!(raw_kinship(&stranger, &g1), Some(0.0));
    }

    #[test]
    fn test_non_characteristic_sites_do_not_count() {
        let mut g1 = profile(&[("A", 0.1), ("B", 0.2), ("C", 0.9)]);
        g1.int_bcs.remove("C");
        let cell: BTreeSet<&str> = ["C"].into_iter().collect();
        assert_eq!(raw_kinship(&cell, &g1), Some(0.0));
    }

    #[test]
    fn test_always_missing_site_weighs_nothing() {
        // B is never observed, so sharing it adds nothing beyond A.
        let g1 = profile(&[("A", 0.0), ("B", 1.0)]);
        let cell: BTreeSet<&str> = ["A", "B"].into_iter().collect();
        assert_eq!(raw_kinship(&cell, &g1), Some(1.0));
        let cell: BTreeSet<&str> = ["B"].into_iter().collect();
        assert_eq!(raw_kinship(&cell, &g1), Some(0.0));
    }

    #[test]
    fn test_zero_group_weight() {
        let profiles: BTreeMap<_, _> = [
            (LineageGroup(1), profile(&[("A", 1.0)])),
            (LineageGroup(2), profile(&[("B", 0.0)])),
        ]
        .into_iter()
        .collect();
        let cell: BTreeSet<&str> = ["A", "B"].into_iter().collect();
        assert_eq!(raw_kinship(&cell, &profiles[&LineageGroup(1)]), None);
        assert_eq!(
            score_kinship("c1", LineageGroup(2), &cell, &profiles),
            Err(ArithmeticError::ZeroGroupWeight {
                cell_bc: "c1".to_string(),
                group: LineageGroup(1),
            })
        );

        // Not sharing any intBC with the weightless group is fine.
        let cell: BTreeSet<&str> = ["B"].into_iter().collect();
        let kinship = score_kinship("c2", LineageGroup(2), &cell, &profiles).unwrap();
        assert_eq!(kinship.assigned_score(), 1.0);
    }

    #[test]
    fn test_normalized_scores() {
        let profiles: BTreeMap<_, _> = [
            (LineageGroup(1), profile(&[("A", 0.0), ("B", 0.0)])),
            (LineageGroup(2), profile(&[("B", 0.0), ("C", 0.0), ("D", 0.0), ("E", 0.0)])),
            (LineageGroup(3), profile(&[("F", 0.0)])),
        ]
        .into_iter()
        .collect();
        let cell: BTreeSet<&str> = ["A", "B"].into_iter().collect();
        let kinship = score_kinship("c1", LineageGroup(1), &cell, &profiles).unwrap();
        // Raw scores 1.0 and 0.25 normalize to 0.8 and 0.2.
        assert!((kinship.assigned_score() - 0.8).abs() < 1e-12);
        assert!((kinship.scores[&LineageGroup(2)] - 0.2).abs() < 1e-12);
        assert_eq!(kinship.scores[&LineageGroup(3)], 0.0);
        assert_eq!(kinship.best_group().unwrap().0, LineageGroup(1));
    }

    #[test]
    fn test_orphan_cell() {
        let profiles: BTreeMap<_, _> = [(LineageGroup(1), profile(&[("A", 0.0)]))]
            .into_iter()
            .collect();
        let cell: BTreeSet<&str> = ["Z"].into_iter().collect();
        assert_eq!(
            score_kinship("orphan", LineageGroup(1), &cell, &profiles),
            Err(ArithmeticError::NoKinship {
                cell_bc: "orphan".to_string()
            })
        );
    }

    #[test]
    fn test_best_group_tie() {
        let kinship = KinshipVector {
            cell_bc: "c1".to_string(),
            assigned: LineageGroup(2),
            scores: [(LineageGroup(1), 0.5), (LineageGroup(2), 0.5)]
                .into_iter()
                .collect(),
        };
        assert_eq!(kinship.best_group(), Some((LineageGroup(1), 0.5)));
    }

    proptest! {
        #[test]
        fn prop_test_kinship_sums_to_one(
            sites in prop::collection::vec((0..3u32, 0..8u8, 0.0..0.95f64), 1..24),
            cell_sites in prop::collection::btree_set(0..8u8, 1..6),
        ) {
            let mut profiles: BTreeMap<LineageGroup, IntBcProfile> = BTreeMap::new();
            for (group, site, rate) in sites {
                let p = profiles.entry(LineageGroup(group)).or_default();
                p.int_bcs.insert(format!("s{site}"));
                p.dropout.insert(format!("s{site}"), rate);
            }
            let names: Vec<String> = cell_sites.iter().map(|s| format!("s{s}")).collect();
            let cell: BTreeSet<&str> = names.iter().map(String::as_str).collect();
            match score_kinship("c", LineageGroup(0), &cell, &profiles) {
                Ok(kinship) => {
                    let total: f64 = kinship.scores.values().sum();
                    prop_assert!((total - 1.0).abs() < 1e-9);
                }
                Err(err) => prop_assert_eq!(err, ArithmeticError::NoKinship { cell_bc: "c".to_string() }),
            }
        }
    }
}

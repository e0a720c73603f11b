//! Characteristic intBC sets of lineage groups.
//!
//! For every lineage group, an intBC's dropout rate is the fraction of the
//! group's cells in which that intBC was never observed. Sites with low
//! dropout are the ones that characterize the clone.

use crate::errors::{LineageQcError, SchemaError};
use crate::molecule::{LineageGroup, MoleculeRecord};
use crate::TxHashSet;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

const STAGE: &str = "intBC set";

/// The intBC repertoire of one lineage group.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntBcProfile {
    /// intBCs that characterize the group. Without a prevalence threshold this
    /// is every intBC observed in the group.
    pub int_bcs: BTreeSet<String>,
    /// Dropout rate of every intBC observed in the group, characteristic or not.
    pub dropout: BTreeMap<String, f64>,
    pub num_cells: usize,
}

impl IntBcProfile {
    /// Build the profile of one group from its rows.
    ///
    /// With `thresh`, only intBCs whose dropout rate is strictly below it are
    /// characteristic. The dropout map always covers every observed intBC.
    pub fn build(records: &[&MoleculeRecord], thresh: Option<f64>) -> Result<Self, SchemaError> {
        let mut present: TxHashSet<(&str, &str)> = TxHashSet::default();
        for record in records {
            present.insert((record.cell_bc.as_str(), record.require_int_bc(STAGE)?));
        }
        let num_cells = records
            .iter()
            .map(|r| r.cell_bc.as_str())
            .collect::<TxHashSet<_>>()
            .len();

        let mut cells_with: BTreeMap<&str, usize> = BTreeMap::new();
        for &(_, int_bc) in &present {
            *cells_with.entry(int_bc).or_default() += 1;
        }

        let dropout: BTreeMap<String, f64> = cells_with
            .into_iter()
            .map(|(int_bc, n)| {
                let missing = (num_cells - n) as f64;
                (int_bc.to_string(), missing / num_cells as f64)
            })
            .collect();

        let int_bcs = dropout
            .iter()
            .filter(|&(_, &rate)| thresh.map_or(true, |t| rate < t))
            .map(|(int_bc, _)| int_bc.clone())
            .collect();

        Ok(IntBcProfile {
            int_bcs,
            dropout,
            num_cells,
        })
    }

    /// Weight of an intBC in kinship scoring: the fraction of the group's cells
    /// that carry it. Unobserved intBCs weigh nothing.
    pub fn weight(&self, int_bc: &str) -> f64 {
        self.dropout.get(int_bc).map_or(0.0, |rate| 1.0 - rate)
    }

    /// Summed weight of the characteristic set, the most a cell can score.
    pub fn total_weight(&self) -> f64 {
        self.int_bcs.iter().map(|b| self.weight(b)).sum()
    }
}

/// Profiles of every lineage group, built in parallel.
pub fn build_profiles(
    groups: &BTreeMap<LineageGroup, Vec<&MoleculeRecord>>,
    thresh: Option<f64>,
) -> Result<BTreeMap<LineageGroup, IntBcProfile>, LineageQcError> {
    if let Some(thresh) = thresh {
        LineageQcError::check_fraction("thresh", thresh)?;
    }
    let groups: Vec<_> = groups.iter().collect();
    let profiles = groups
        .par_iter()
        .map(|&(&group, records)| Ok((group, IntBcProfile::build(records, thresh)?)))
        .collect::<Result<Vec<_>, SchemaError>>()?;
    Ok(profiles.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ten cells: intBC A in nine of them, B in eight and C in one.
    fn group_rows() -> Vec<MoleculeRecord> {
        let mut rows = Vec::new();
        for i in 0..10 {
            let cell = format!("cell{i}");
            if i < 9 {
                rows.push(MoleculeRecord::new(&cell, "A", "x", "u1", 4));
                // A second UMI for the same site must not count the cell twice.
                rows.push(MoleculeRecord::new(&cell, "A", "x", "u2", 4));
            }
            if i < 8 {
                rows.push(MoleculeRecord::new(&cell, "B", "x", "u3", 4));
            }
            if i == 9 {
                rows.push(MoleculeRecord::new(&cell, "C", "x", "u4", 4));
            }
        }
        rows
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn test_dropout_rates() {
        let rows = group_rows();
        let refs: Vec<_> = rows.iter().collect();
        let profile = IntBcProfile::build(&refs, None).unwrap();
        assert_eq!(profile.num_cells, 10);
        assert_close(profile.dropout["A"], 0.1);
        assert_close(profile.dropout["B"], 0.2);
        assert_close(profile.dropout["C"], 0.9);
        assert_eq!(profile.int_bcs.len(), 3);
        assert_close(profile.total_weight(), 1.8);
        assert_eq!(profile.weight("Z"), 0.0);
    }

    #[test]
    fn test_thresh_is_strict_and_keeps_full_dropout_map() {
        let rows = group_rows();
        let refs: Vec<_> = rows.iter().collect();
        let profile = IntBcProfile::build(&refs, Some(0.2)).unwrap();
        assert_eq!(
            profile.int_bcs.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["A"]
        );
        assert_eq!(profile.dropout.len(), 3);
    }

    #[test]
    fn test_build_profiles() {
        let rows = vec![
            MoleculeRecord::new("c1", "A", "x", "u1", 1).with_lineage(1),
            MoleculeRecord::new("c2", "B", "x", "u1", 1).with_lineage(2),
        ];
        let mut groups: BTreeMap<LineageGroup, Vec<&MoleculeRecord>> = BTreeMap::new();
        for r in &rows {
            groups.entry(r.lineage_grp.unwrap()).or_default().push(r);
        }
        let profiles = build_profiles(&groups, None).unwrap();
        assert_eq!(profiles.len(), 2);
        assert!(profiles[&LineageGroup(1)].int_bcs.contains("A"));
        assert!(profiles[&LineageGroup(2)].int_bcs.contains("B"));

        assert!(matches!(
            build_profiles(&groups, Some(-0.5)),
            Err(LineageQcError::InvalidParameter { name: "thresh", .. })
        ));
    }
}

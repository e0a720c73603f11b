//! Collapse conflicting alleles reported for one (cellBC, intBC) pair to the
//! majority allele.

use crate::errors::LineageQcError;
use crate::grouped::select_majority;
use crate::molecule::{Column, MoleculeTable};
use log::{debug, info};
use std::cmp::Reverse;
use std::collections::BTreeMap;

const STAGE: &str = "allele consensus";

/// Result of [`resolve_allele_consensus`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusOutcome {
    pub table: MoleculeTable,
    /// Number of (cellBC, intBC, allele) groups that lost to a majority allele.
    pub records_corrected: usize,
    /// UMIs carried by the dropped groups.
    pub umis_affected: u64,
}

/// Keep one allele per (cellBC, intBC) pair.
///
/// Within each pair, alleles are ranked by summed read count. Ties go to the
/// allele with more UMIs, then to the lexicographically smallest allele, so the
/// choice never depends on row order. Rows of every other allele are dropped.
pub fn resolve_allele_consensus(table: MoleculeTable) -> Result<ConsensusOutcome, LineageQcError> {
    table.require(STAGE, &Column::CORE)?;

    let (majority, records_corrected, umis_affected) = {
        let selections = select_majority(
            table.records(),
            |r| Ok((r.require_int_bc(STAGE)?, r.cell_bc.as_str())),
            |r| r.allele.as_str(),
            |allele, s| (s.reads, s.umis, Reverse(allele)),
        )?;

        let mut records_corrected = 0;
        let mut umis_affected = 0;
        let mut majority: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for ((int_bc, cell_bc), selection) in selections {
            if !selection.is_contested() {
                continue;
            }
            records_corrected += selection.candidates - 1;
            umis_affected += selection.losing_support().umis;
            debug!(
                "{STAGE}: cell {cell_bc} intBC {int_bc} keeps allele {} ({} reads of {})",
                selection.winner, selection.winner_support.reads, selection.total.reads
            );
            majority
                .entry(cell_bc.to_string())
                .or_default()
                .insert(int_bc.to_string(), selection.winner.to_string());
        }
        (majority, records_corrected, umis_affected)
    };

    let table = if majority.is_empty() {
        table
    } else {
        table.filter(|r| {
            let Some(int_bc) = r.int_bc.as_deref() else {
                return true;
            };
            match majority
                .get(r.cell_bc.as_str())
                .and_then(|sites| sites.get(int_bc))
            {
                Some(allele) => *allele == r.allele,
                None => true,
            }
        })
    };

    info!("{STAGE}: {records_corrected} allele groups corrected, {umis_affected} UMIs affected");
    Ok(ConsensusOutcome {
        table,
        records_corrected,
        umis_affected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SchemaError;
    use crate::molecule::MoleculeRecord;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn alleles_per_site(table: &MoleculeTable) -> BTreeMap<(String, String), BTreeSet<String>> {
        let mut sites: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
        for r in table.records() {
            sites
                .entry((r.cell_bc.clone(), r.int_bc.clone().unwrap()))
                .or_default()
                .insert(r.allele.clone());
        }
        sites
    }

    #[test]
    fn test_majority_allele_by_reads() {
        // Three UMIs with 30 reads for allele_X against one UMI with 5 reads for allele_Y.
        let table = MoleculeTable::new(vec![
            MoleculeRecord::new("C1", "intBC_A", "allele_X", "u1", 10),
            MoleculeRecord::new("C1", "intBC_A", "allele_X", "u2", 10),
            MoleculeRecord::new("C1", "intBC_A", "allele_X", "u3", 10),
            MoleculeRecord::new("C1", "intBC_A", "allele_Y", "u4", 5),
            MoleculeRecord::new("C1", "intBC_B", "allele_Z", "u5", 2),
        ]);
        let outcome = resolve_allele_consensus(table).unwrap();
        assert_eq!(outcome.records_corrected, 1);
        assert_eq!(outcome.umis_affected, 1);
        assert_eq!(outcome.table.len(), 4);
        assert!(outcome
            .table
            .records()
            .iter()
            .filter(|r| r.int_bc.as_deref() == Some("intBC_A"))
            .all(|r| r.allele == "allele_X"));
    }

    #[test]
    fn test_read_count_beats_umi_count() {
        let table = MoleculeTable::new(vec![
            MoleculeRecord::new("C1", "A", "few_umis", "u1", 50),
            MoleculeRecord::new("C1", "A", "many_umis", "u2", 5),
            MoleculeRecord::new("C1", "A", "many_umis", "u3", 5),
            MoleculeRecord::new("C1", "A", "many_umis", "u4", 5),
        ]);
        let outcome = resolve_allele_consensus(table).unwrap();
        assert_eq!(outcome.umis_affected, 3);
        assert_eq!(outcome.table.records()[0].allele, "few_umis");
    }

    #[test]
    fn test_tie_break_on_umis_then_allele() {
        let table = MoleculeTable::new(vec![
            MoleculeRecord::new("C1", "A", "solo", "u1", 10),
            MoleculeRecord::new("C1", "A", "pair", "u2", 5),
            MoleculeRecord::new("C1", "A", "pair", "u3", 5),
        ]);
        let outcome = resolve_allele_consensus(table).unwrap();
        assert!(outcome.table.records().iter().all(|r| r.allele == "pair"));

        let table = MoleculeTable::new(vec![
            MoleculeRecord::new("C1", "A", "b", "u1", 7),
            MoleculeRecord::new("C1", "A", "a", "u2", 7),
        ]);
        let outcome = resolve_allele_consensus(table).unwrap();
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table.records()[0].allele, "a");
    }

    #[test]
    fn test_missing_int_bc_column() {
        let table = MoleculeTable::with_columns(
            [Column::CellBc, Column::Allele, Column::Umi, Column::ReadCount],
            vec![],
        );
        assert_eq!(
            resolve_allele_consensus(table),
            Err(LineageQcError::Schema(SchemaError::MissingColumn {
                stage: STAGE,
                column: Column::IntBc
            }))
        );
    }

    #[test]
    fn test_missing_int_bc_value() {
        let mut record = MoleculeRecord::new("C1", "A", "x", "u1", 1);
        record.int_bc = None;
        let result = resolve_allele_consensus(MoleculeTable::new(vec![record]));
        assert!(matches!(
            result,
            Err(LineageQcError::Schema(SchemaError::MissingValue { .. }))
        ));
    }

    #[test]
    fn test_empty_table() {
        let outcome = resolve_allele_consensus(MoleculeTable::new(vec![])).unwrap();
        assert!(outcome.table.is_empty());
        assert_eq!(outcome.records_corrected, 0);
    }

    fn arb_table() -> impl Strategy<Value = MoleculeTable> {
        prop::collection::vec(
            (0..4u8, 0..3u8, 0..3u8, 0..20u8, 1..40u64),
            0..60,
        )
        .prop_map(|rows| {
            MoleculeTable::new(
                rows.into_iter()
                    .map(|(cell, site, allele, umi, reads)| {
                        MoleculeRecord::new(
                            &format!("cell{cell}"),
                            &format!("int{site}"),
                            &format!("allele{allele}"),
                            &format!("umi{umi}"),
                            reads,
                        )
                    })
                    .collect(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_test_consensus_is_idempotent(table in arb_table()) {
            let once = resolve_allele_consensus(table).unwrap().table;
            let twice = resolve_allele_consensus(once.clone()).unwrap();
            prop_assert_eq!(twice.records_corrected, 0);
            prop_assert_eq!(twice.table, once);
        }

        #[test]
        fn prop_test_one_allele_per_site(table in arb_table()) {
            let sites_before = alleles_per_site(&table).len();
            let outcome = resolve_allele_consensus(table).unwrap();
            let sites = alleles_per_site(&outcome.table);
            prop_assert_eq!(sites.len(), sites_before);
            prop_assert!(sites.values().all(|alleles| alleles.len() == 1));
        }
    }
}

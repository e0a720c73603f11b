//! Remove cells whose alleles disagree too often across their intBCs.

use crate::errors::{ArithmeticError, LineageQcError};
use crate::filter_log::{FilterLogEntry, FilterLogger, LineageCellFilter};
use crate::grouped::select_majority;
use crate::molecule::{Column, MoleculeTable};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

const STAGE: &str = "intra-lineage doublet filter";

/// Default maximum conflicting UMI proportion.
pub const DEFAULT_PROP: f64 = 0.1;

/// UMI counts of one cell split into those supporting the majority allele at
/// each intBC and those supporting any other allele.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellConflict {
    pub cell_bc: String,
    pub total_umis: u64,
    pub conflicting_umis: u64,
}

impl CellConflict {
    pub fn proportion(&self) -> Result<f64, ArithmeticError> {
        if self.total_umis == 0 {
            return Err(ArithmeticError::ZeroUmiTotal {
                cell_bc: self.cell_bc.clone(),
            });
        }
        Ok(self.conflicting_umis as f64 / self.total_umis as f64)
    }
}

/// Conflict counts for every cell of `table`, in cell barcode order.
pub fn cell_conflicts(table: &MoleculeTable) -> Result<Vec<CellConflict>, LineageQcError> {
    table.require(STAGE, &Column::CORE)?;
    let selections = select_majority(
        table.records(),
        |r| Ok((r.cell_bc.as_str(), r.require_int_bc(STAGE)?)),
        |r| r.allele.as_str(),
        |allele, s| (s.umis, Reverse(allele)),
    )?;

    let mut per_cell: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for ((cell_bc, _), selection) in &selections {
        let (total, majority) = per_cell.entry(*cell_bc).or_default();
        *total += selection.total.umis;
        *majority += selection.winner_support.umis;
    }
    Ok(per_cell
        .into_iter()
        .map(|(cell_bc, (total_umis, majority_umis))| CellConflict {
            cell_bc: cell_bc.to_string(),
            total_umis,
            conflicting_umis: total_umis - majority_umis,
        })
        .collect())
}

/// Result of [`filter_intra_doublets`].
#[derive(Debug, Clone, PartialEq)]
pub struct IntraDoubletOutcome {
    pub table: MoleculeTable,
    pub doublets_removed: usize,
}

/// Cells whose conflicting UMI proportion is strictly greater than `prop`.
/// A cell exactly at `prop` is not a doublet. Every doublet is logged.
pub fn find_intra_doublets(
    table: &MoleculeTable,
    prop: f64,
    mut filter_logger: Option<&mut FilterLogger>,
) -> Result<BTreeSet<String>, LineageQcError> {
    LineageQcError::check_fraction("prop", prop)?;
    let conflicts = cell_conflicts(table)?;

    let proportions = conflicts
        .par_iter()
        .map(|c| c.proportion())
        .collect::<Result<Vec<f64>, ArithmeticError>>()?;

    let mut doublets = BTreeSet::new();
    for (conflict, proportion) in conflicts.into_iter().zip(proportions) {
        if proportion <= prop {
            continue;
        }
        debug!(
            "{STAGE}: cell {} has {} of {} UMIs in conflict ({proportion:.3})",
            conflict.cell_bc, conflict.conflicting_umis, conflict.total_umis
        );
        if let Some(ref mut logger) = filter_logger {
            logger.log(&FilterLogEntry::cell_filtering(
                conflict.cell_bc.clone(),
                LineageCellFilter::IntraLineageDoublet {
                    conflicting_umis: conflict.conflicting_umis,
                    total_umis: conflict.total_umis,
                    param_prop: prop,
                },
            ));
        }
        doublets.insert(conflict.cell_bc);
    }
    info!(
        "{STAGE}: {} cells with conflict proportion above {prop}",
        doublets.len()
    );
    Ok(doublets)
}

/// Drop every row of the cells [`find_intra_doublets`] reports.
pub fn filter_intra_doublets(
    table: MoleculeTable,
    prop: f64,
    filter_logger: Option<&mut FilterLogger>,
) -> Result<IntraDoubletOutcome, LineageQcError> {
    let doublets = find_intra_doublets(&table, prop, filter_logger)?;
    let doublets_removed = doublets.len();
    let was_empty = table.is_empty();
    let table = table.remove_cells(&doublets);
    if table.is_empty() && !was_empty {
        warn!("{STAGE}: every cell was removed");
    }
    Ok(IntraDoubletOutcome {
        table,
        doublets_removed,
    })
}

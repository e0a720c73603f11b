//! Remove cells whose intBC repertoire does not match their assigned lineage group.

use crate::errors::{ArithmeticError, LineageQcError, SchemaError};
use crate::filter_log::{FilterLogEntry, FilterLogger, LineageCellFilter};
use crate::intbc_set::build_profiles;
use crate::kinship::{score_kinship, KinshipVector};
use crate::molecule::{Column, LineageGroup, MoleculeTable};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

const STAGE: &str = "inter-lineage doublet filter";

/// Default minimum kinship of a cell to its assigned lineage group.
pub const DEFAULT_RULE: f64 = 0.35;

struct CellSites<'a> {
    assigned: LineageGroup,
    int_bcs: BTreeSet<&'a str>,
}

fn cell_sites(table: &MoleculeTable) -> Result<BTreeMap<&str, CellSites<'_>>, SchemaError> {
    let mut cells: BTreeMap<&str, CellSites<'_>> = BTreeMap::new();
    for record in table.records() {
        let group = record.require_lineage(STAGE)?;
        let int_bc = record.require_int_bc(STAGE)?;
        let sites = cells
            .entry(record.cell_bc.as_str())
            .or_insert_with(|| CellSites {
                assigned: group,
                int_bcs: BTreeSet::new(),
            });
        if sites.assigned != group {
            return Err(SchemaError::ConflictingLineage {
                stage: STAGE,
                cell_bc: record.cell_bc.clone(),
                first: sites.assigned.min(group),
                second: sites.assigned.max(group),
            });
        }
        sites.int_bcs.insert(int_bc);
    }
    Ok(cells)
}

/// Kinship vectors of every cell of `table`, in cell barcode order.
///
/// Lineage group profiles are built with the prevalence threshold `thresh`;
/// `None` treats every observed intBC as characteristic.
pub fn cell_kinships(
    table: &MoleculeTable,
    thresh: Option<f64>,
) -> Result<Vec<KinshipVector>, LineageQcError> {
    table.require(STAGE, &Column::CORE)?;
    let groups = table.partition_by_lineage(STAGE)?;
    let cells = cell_sites(table)?;
    let profiles = build_profiles(&groups, thresh)?;
    debug!(
        "{STAGE}: scoring {} cells against {} lineage groups",
        cells.len(),
        profiles.len()
    );

    let cells: Vec<_> = cells.into_iter().collect();
    let kinships = cells
        .par_iter()
        .map(|(cell_bc, sites)| score_kinship(cell_bc, sites.assigned, &sites.int_bcs, &profiles))
        .collect::<Result<Vec<_>, ArithmeticError>>()?;
    Ok(kinships)
}

/// Result of [`filter_inter_doublets`].
#[derive(Debug, Clone, PartialEq)]
pub struct InterDoubletOutcome {
    pub table: MoleculeTable,
    pub doublets_removed: usize,
}

/// Drop every row of cells whose kinship to their assigned lineage group is
/// strictly below `rule`. A cell exactly at `rule` is kept.
pub fn filter_inter_doublets(
    table: MoleculeTable,
    rule: f64,
    mut filter_logger: Option<&mut FilterLogger>,
) -> Result<InterDoubletOutcome, LineageQcError> {
    LineageQcError::check_fraction("rule", rule)?;
    let kinships = cell_kinships(&table, None)?;

    let mut doublets = BTreeSet::new();
    for kinship in kinships {
        let score = kinship.assigned_score();
        if score >= rule {
            continue;
        }
        let (best_group, best_kinship) = kinship
            .best_group()
            .unwrap_or((kinship.assigned, score));
        debug!(
            "{STAGE}: cell {} has kinship {score:.3} to group {} (best {best_group} at {best_kinship:.3})",
            kinship.cell_bc, kinship.assigned
        );
        if let Some(ref mut logger) = filter_logger {
            logger.log(&FilterLogEntry::cell_filtering(
                kinship.cell_bc.clone(),
                LineageCellFilter::InterLineageDoublet {
                    assigned_group: kinship.assigned,
                    kinship: score,
                    best_group,
                    best_kinship,
                    param_rule: rule,
                },
            ));
        }
        doublets.insert(kinship.cell_bc);
    }

    let doublets_removed = doublets.len();
    let was_empty = table.is_empty();
    let table = table.remove_cells(&doublets);
    info!("{STAGE}: removed {doublets_removed} cells with kinship below {rule}");
    if table.is_empty() && !was_empty {
        warn!("{STAGE}: every cell was removed");
    }
    Ok(InterDoubletOutcome {
        table,
        doublets_removed,
    })
}

//! Remove cells with too few molecules or too few reads per molecule.

use crate::errors::LineageQcError;
use crate::filter_log::{FilterLogEntry, FilterLogger, LineageCellFilter};
use crate::molecule::{Column, MoleculeTable};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};

const STAGE: &str = "cell quality filter";

pub const DEFAULT_MIN_UMI_PER_CELL: u64 = 10;
pub const DEFAULT_MIN_AVG_READS_PER_UMI: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CellFilterOutcome {
    pub table: MoleculeTable,
    pub cells_removed: usize,
    pub umis_removed: usize,
}

/// Keep cells with at least `min_umi_per_cell` UMIs and at least
/// `min_avg_reads_per_umi` reads per UMI on average.
pub fn filter_cells(
    table: MoleculeTable,
    min_umi_per_cell: u64,
    min_avg_reads_per_umi: f64,
    mut filter_logger: Option<&mut FilterLogger>,
) -> Result<CellFilterOutcome, LineageQcError> {
    table.require(STAGE, &[Column::CellBc, Column::Umi, Column::ReadCount])?;
    if min_avg_reads_per_umi.is_nan() || min_avg_reads_per_umi < 0.0 {
        return Err(LineageQcError::InvalidParameter {
            name: "min_avg_reads_per_umi",
            value: min_avg_reads_per_umi,
            min: 0.0,
            max: f64::INFINITY,
        });
    }

    let mut per_cell: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for record in table.records() {
        let (umis, reads) = per_cell.entry(record.cell_bc.as_str()).or_default();
        *umis += 1;
        *reads += record.read_count;
    }

    let mut removed = BTreeSet::new();
    let mut umis_removed = 0;
    for (cell_bc, (umis, reads)) in per_cell {
        let avg_reads_per_umi = reads as f64 / umis as f64;
        if umis >= min_umi_per_cell && avg_reads_per_umi >= min_avg_reads_per_umi {
            continue;
        }
        debug!("{STAGE}: cell {cell_bc} has {umis} UMIs and {avg_reads_per_umi:.2} reads per UMI");
        if let Some(ref mut logger) = filter_logger {
            logger.log(&FilterLogEntry::cell_filtering(
                cell_bc.to_string(),
                LineageCellFilter::LowQualityCell {
                    umis,
                    avg_reads_per_umi,
                    param_min_umi_per_cell: min_umi_per_cell,
                    param_min_avg_reads_per_umi: min_avg_reads_per_umi,
                },
            ));
        }
        umis_removed += umis as usize;
        removed.insert(cell_bc.to_string());
    }

    let cells_removed = removed.len();
    let was_empty = table.is_empty();
    let table = table.remove_cells(&removed);
    info!("{STAGE}: removed {cells_removed} cells carrying {umis_removed} UMIs");
    if table.is_empty() && !was_empty {
        warn!("{STAGE}: every cell was removed");
    }
    Ok(CellFilterOutcome {
        table,
        cells_removed,
        umis_removed,
    })
}

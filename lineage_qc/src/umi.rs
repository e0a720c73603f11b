//! UMI-level cleanup run ahead of allele consensus.

use crate::errors::{LineageQcError, SchemaError};
use crate::molecule::{Column, MoleculeRecord, MoleculeTable};
use crate::{TxHashMap, TxHashSet};
use bio::alignment::distance::simd::hamming;
use log::{debug, info};
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::BTreeMap;

const RESOLVE_STAGE: &str = "UMI sequence resolution";
const CORRECT_STAGE: &str = "UMI error correction";

/// Default maximum Hamming distance between a UMI and the UMI it is corrected to.
pub const DEFAULT_MAX_UMI_DISTANCE: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct UmiResolutionOutcome {
    pub table: MoleculeTable,
    pub rows_filtered: usize,
}

fn resolution_rank(r: &MoleculeRecord) -> (u64, Reverse<Option<&str>>, Reverse<&str>) {
    (
        r.read_count,
        Reverse(r.int_bc.as_deref()),
        Reverse(r.allele.as_str()),
    )
}

/// Keep a single row per (cellBC, UMI): the one with the most reads. Ties go
/// to the smallest intBC, then the smallest allele.
pub fn resolve_umi_sequences(table: MoleculeTable) -> Result<UmiResolutionOutcome, LineageQcError> {
    table.require(RESOLVE_STAGE, &Column::CORE)?;

    let keep = {
        let records = table.records();
        let mut best: TxHashMap<(&str, &str), usize> = TxHashMap::default();
        for (i, record) in records.iter().enumerate() {
            record.require_int_bc(RESOLVE_STAGE)?;
            match best.entry((record.cell_bc.as_str(), record.umi.as_str())) {
                Entry::Vacant(e) => {
                    e.insert(i);
                }
                Entry::Occupied(mut e) => {
                    if resolution_rank(record) > resolution_rank(&records[*e.get()]) {
                        e.insert(i);
                    }
                }
            }
        }
        let mut keep = vec![false; records.len()];
        for i in best.into_values() {
            keep[i] = true;
        }
        keep
    };

    let before = table.len();
    let table = table.select_rows(&keep);
    let rows_filtered = before - table.len();
    info!("{RESOLVE_STAGE}: filtered {rows_filtered} of {before} rows sharing a cellBC and UMI");
    Ok(UmiResolutionOutcome {
        table,
        rows_filtered,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct UmiCorrectionOutcome {
    pub table: MoleculeTable,
    pub umis_corrected: usize,
    pub umis_examined: usize,
}

/// Merges found within one (cellBC, intBC) group.
#[derive(Default)]
struct GroupCorrection {
    /// Final read count of every surviving row that absorbed another.
    read_counts: Vec<(usize, u64)>,
    merged: Vec<usize>,
}

fn correct_group(
    records: &[MoleculeRecord],
    mut rows: Vec<usize>,
    max_distance: u64,
) -> GroupCorrection {
    rows.sort_by_key(|&i| {
        (
            Reverse(records[i].read_count),
            Reverse(records[i].umi.as_str()),
            i,
        )
    });
    let mut reads: Vec<u64> = rows.iter().map(|&i| records[i].read_count).collect();
    let mut present = vec![true; rows.len()];
    let mut correction = GroupCorrection::default();

    for pos in (1..rows.len()).rev() {
        let umi = records[rows[pos]].umi.as_bytes();
        let target = (0..pos).find(|&t| {
            let other = records[rows[t]].umi.as_bytes();
            present[t] && other.len() == umi.len() && hamming(umi, other) <= max_distance
        });
        let Some(target) = target else {
            continue;
        };
        debug!(
            "{CORRECT_STAGE}: cell {} UMI {} corrected to {}",
            records[rows[pos]].cell_bc,
            records[rows[pos]].umi,
            records[rows[target]].umi
        );
        reads[target] += reads[pos];
        present[pos] = false;
        correction.merged.push(rows[pos]);
    }

    for (pos, &row) in rows.iter().enumerate() {
        if present[pos] && reads[pos] != records[row].read_count {
            correction.read_counts.push((row, reads[pos]));
        }
    }
    correction
}

/// Collapse UMIs within each (cellBC, intBC) group that are within
/// `max_umi_distance` mismatches of a more abundant UMI of the same length.
///
/// UMIs are ordered by read count, most abundant first, ties going to the
/// larger UMI. Walking from the least abundant, each UMI is merged into the
/// most abundant UMI still present that is close enough: its reads are added
/// to that UMI and its row is dropped. A distance of zero disables correction.
///
/// Each (cellBC, intBC, UMI) must occur once; a repeat is a
/// `SchemaError::DuplicateUmi`.
pub fn correct_umi_errors(
    table: MoleculeTable,
    max_umi_distance: u32,
) -> Result<UmiCorrectionOutcome, LineageQcError> {
    table.require(CORRECT_STAGE, &Column::CORE)?;
    let umis_examined = table.len();

    let groups = {
        let records = table.records();
        let mut seen: TxHashSet<(&str, &str, &str)> = TxHashSet::default();
        let mut groups: BTreeMap<(&str, &str), Vec<usize>> = BTreeMap::new();
        for (i, record) in records.iter().enumerate() {
            let int_bc = record.require_int_bc(CORRECT_STAGE)?;
            if !seen.insert((record.cell_bc.as_str(), int_bc, record.umi.as_str())) {
                return Err(SchemaError::DuplicateUmi {
                    stage: CORRECT_STAGE,
                    cell_bc: record.cell_bc.clone(),
                    int_bc: int_bc.to_string(),
                    umi: record.umi.clone(),
                }
                .into());
            }
            groups
                .entry((record.cell_bc.as_str(), int_bc))
                .or_default()
                .push(i);
        }
        groups.into_values().collect::<Vec<_>>()
    };

    if max_umi_distance == 0 {
        info!("{CORRECT_STAGE}: distance of 0, no UMIs corrected");
        return Ok(UmiCorrectionOutcome {
            table,
            umis_corrected: 0,
            umis_examined,
        });
    }

    let corrections = groups
        .into_par_iter()
        .map(|rows| correct_group(table.records(), rows, u64::from(max_umi_distance)))
        .collect::<Vec<_>>();

    let mut keep = vec![true; table.len()];
    let mut read_counts = Vec::new();
    for correction in corrections {
        for i in correction.merged {
            keep[i] = false;
        }
        read_counts.extend(correction.read_counts);
    }
    let umis_corrected = keep.iter().filter(|&&k| !k).count();

    let columns = table.columns().clone();
    let mut records = table.into_records();
    for (i, reads) in read_counts {
        records[i].read_count = reads;
    }
    let table = MoleculeTable::with_columns(columns, records).select_rows(&keep);

    info!("{CORRECT_STAGE}: {umis_corrected} UMIs corrected of {umis_examined}");
    Ok(UmiCorrectionOutcome {
        table,
        umis_corrected,
        umis_examined,
    })
}

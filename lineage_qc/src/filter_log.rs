use crate::molecule::LineageGroup;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes one JSON object per line for every cell removed by a filter.
pub struct FilterLogger {
    writer: Box<dyn Write + Send>,
    counts: BTreeMap<&'static str, usize>,
}

impl FilterLogger {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating filter log {}", path.display()))?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        FilterLogger {
            writer: Box::new(writer),
            counts: BTreeMap::new(),
        }
    }

    /// Logging is best effort; a failed write is reported and otherwise ignored.
    pub fn log(&mut self, entry: &FilterLogEntry) {
        let written = serde_json::to_writer(&mut self.writer, entry)
            .map_err(anyhow::Error::from)
            .and_then(|()| Ok(self.writer.write_all(b"\n")?));
        match written {
            Ok(()) => {
                let FilterLogEntry::CellFiltering { filter, .. } = entry;
                *self.counts.entry(filter.name()).or_default() += 1;
            }
            Err(err) => log::warn!("unable to write filter log entry: {err:#}"),
        }
    }

    pub fn entries(&self) -> usize {
        self.counts.values().sum()
    }

    /// Number of logged cells per filter name.
    pub fn counts(&self) -> &BTreeMap<&'static str, usize> {
        &self.counts
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("flushing filter log")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "info")]
#[serde(rename_all = "snake_case")]
pub enum FilterLogEntry {
    CellFiltering {
        barcode: String,
        filter: LineageCellFilter,
    },
}

impl FilterLogEntry {
    pub fn cell_filtering(barcode: String, filter: LineageCellFilter) -> Self {
        FilterLogEntry::CellFiltering { barcode, filter }
    }
}

/// Why a cell was removed from the molecule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "details")]
#[serde(rename_all = "snake_case")]
pub enum LineageCellFilter {
    /// The cell carries fewer than `param_min_umi_per_cell` UMIs, or fewer than
    /// `param_min_avg_reads_per_umi` reads per UMI on average.
    LowQualityCell {
        umis: u64,
        avg_reads_per_umi: f64,
        param_min_umi_per_cell: u64,
        param_min_avg_reads_per_umi: f64,
    },

    /// After taking the majority allele at every intBC, the UMIs supporting any
    /// other allele make up more than `param_prop` of the cell's UMIs. The cell
    /// is likely a doublet of two cells from the same lineage group.
    IntraLineageDoublet {
        conflicting_umis: u64,
        total_umis: u64,
        param_prop: f64,
    },

    /// The cell's intBC repertoire matches its assigned lineage group with a
    /// normalized kinship below `param_rule`. The cell is likely a doublet of
    /// cells from different lineage groups.
    ///
    /// - `kinship`: normalized kinship to `assigned_group`
    /// - `best_group`: the lineage group with the highest kinship
    InterLineageDoublet {
        assigned_group: LineageGroup,
        kinship: f64,
        best_group: LineageGroup,
        best_kinship: f64,
        param_rule: f64,
    },
}

impl LineageCellFilter {
    pub fn name(&self) -> &'static str {
        match self {
            LineageCellFilter::LowQualityCell { .. } => "low_quality_cell",
            LineageCellFilter::IntraLineageDoublet { .. } => "intra_lineage_doublet",
            LineageCellFilter::InterLineageDoublet { .. } => "inter_lineage_doublet",
        }
    }
}

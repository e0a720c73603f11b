//! Per-stage counters of a pipeline run.

use crate::molecule::TableSummary;
use crate::params::FilterParams;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Counters specific to one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageDetail {
    UmiResolution {
        rows_filtered: usize,
    },
    UmiCorrection {
        umis_corrected: usize,
        umis_examined: usize,
    },
    CellQuality {
        cells_removed: usize,
        umis_removed: usize,
    },
    AlleleConsensus {
        records_corrected: usize,
        umis_affected: u64,
    },
    IntraLineageDoublets {
        doublets_removed: usize,
    },
    InterLineageDoublets {
        doublets_removed: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetrics {
    pub before: TableSummary,
    pub after: TableSummary,
    #[serde(flatten)]
    pub detail: StageDetail,
}

impl StageMetrics {
    pub fn new(before: TableSummary, after: TableSummary, detail: StageDetail) -> Self {
        StageMetrics {
            before,
            after,
            detail,
        }
    }

    pub fn cells_removed(&self) -> usize {
        self.before.cells.saturating_sub(self.after.cells)
    }

    pub fn umis_removed(&self) -> usize {
        self.before.umis.saturating_sub(self.after.umis)
    }
}

/// Summary of one pipeline run, with the stages in the order they ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineMetrics {
    pub params: FilterParams,
    pub input: TableSummary,
    pub output: TableSummary,
    pub rows_missing_int_bc: usize,
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| path.display().to_string())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| path.display().to_string())?;
        Ok(())
    }
}

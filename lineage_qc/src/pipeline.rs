//! Run the cleanup stages in order over one molecule table.

use crate::cell_filter::filter_cells;
use crate::consensus::resolve_allele_consensus;
use crate::errors::LineageQcError;
use crate::filter_log::FilterLogger;
use crate::inter_doublet::{cell_kinships, filter_inter_doublets};
use crate::intra_doublet::find_intra_doublets;
use crate::kinship::KinshipVector;
use crate::metrics::{PipelineMetrics, StageDetail, StageMetrics};
use crate::molecule::{Column, MoleculeTable, TableSummary};
use crate::params::FilterParams;
use crate::umi::{correct_umi_errors, resolve_umi_sequences};
use log::{info, log, warn, Level};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub table: MoleculeTable,
    pub metrics: PipelineMetrics,
}

/// The configured sequence of cleanup stages.
///
/// Rows with a missing intBC are dropped first. The optional UMI and cell
/// quality stages follow when enabled, then allele consensus, removal of
/// intra-lineage doublets and, for tables carrying `lineageGrp`, the
/// inter-lineage doublet filter. Intra-lineage conflicts are measured on the
/// table consensus receives.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    params: FilterParams,
}

impl Pipeline {
    pub fn new(params: FilterParams) -> Result<Self, LineageQcError> {
        params.validate()?;
        Ok(Pipeline { params })
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    fn level(&self) -> Level {
        if self.params.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }

    fn record(
        &self,
        stages: &mut Vec<StageMetrics>,
        before: TableSummary,
        table: &MoleculeTable,
        detail: StageDetail,
    ) {
        let stage = StageMetrics::new(before, table.summary(), detail);
        log!(
            self.level(),
            "{:?}: {} of {} cells and {} of {} UMIs remain",
            stage.detail,
            stage.after.cells,
            stage.before.cells,
            stage.after.umis,
            stage.before.umis
        );
        stages.push(stage);
    }

    pub fn run(
        &self,
        table: MoleculeTable,
        mut filter_logger: Option<&mut FilterLogger>,
    ) -> Result<PipelineOutput, LineageQcError> {
        let params = &self.params;
        let input = table.summary();
        info!(
            "Before filtering: {} cells, {} UMIs, {} reads",
            input.cells, input.umis, input.reads
        );

        let (mut table, rows_missing_int_bc) = table.drop_missing_int_bc();
        if rows_missing_int_bc > 0 {
            log!(
                self.level(),
                "dropped {rows_missing_int_bc} rows with no intBC"
            );
        }
        let mut stages = Vec::new();

        if params.resolve_umis {
            let before = table.summary();
            let outcome = resolve_umi_sequences(table)?;
            table = outcome.table;
            let detail = StageDetail::UmiResolution {
                rows_filtered: outcome.rows_filtered,
            };
            self.record(&mut stages, before, &table, detail);
        }

        if params.correct_umis {
            let before = table.summary();
            let outcome = correct_umi_errors(table, params.max_umi_distance)?;
            table = outcome.table;
            let detail = StageDetail::UmiCorrection {
                umis_corrected: outcome.umis_corrected,
                umis_examined: outcome.umis_examined,
            };
            self.record(&mut stages, before, &table, detail);
        }

        if params.filter_cells {
            let before = table.summary();
            let outcome = filter_cells(
                table,
                params.min_umi_per_cell,
                params.min_avg_reads_per_umi,
                filter_logger.as_deref_mut(),
            )?;
            table = outcome.table;
            let detail = StageDetail::CellQuality {
                cells_removed: outcome.cells_removed,
                umis_removed: outcome.umis_removed,
            };
            self.record(&mut stages, before, &table, detail);
        }

        // Consensus leaves a single allele per site, so the conflicts that
        // mark intra-lineage doublets are counted on the rows it receives.
        let intra_doublets = find_intra_doublets(&table, params.prop, filter_logger.as_deref_mut())?;

        let before = table.summary();
        let outcome = resolve_allele_consensus(table)?;
        table = outcome.table;
        let detail = StageDetail::AlleleConsensus {
            records_corrected: outcome.records_corrected,
            umis_affected: outcome.umis_affected,
        };
        self.record(&mut stages, before, &table, detail);

        let before = table.summary();
        table = table.remove_cells(&intra_doublets);
        let detail = StageDetail::IntraLineageDoublets {
            doublets_removed: intra_doublets.len(),
        };
        self.record(&mut stages, before, &table, detail);

        if table.has_column(Column::LineageGrp) {
            let before = table.summary();
            let outcome = filter_inter_doublets(table, params.rule, filter_logger.as_deref_mut())?;
            table = outcome.table;
            let detail = StageDetail::InterLineageDoublets {
                doublets_removed: outcome.doublets_removed,
            };
            self.record(&mut stages, before, &table, detail);
        } else {
            log!(
                self.level(),
                "no {} column, skipping the inter-lineage doublet filter",
                Column::LineageGrp
            );
        }

        let output = table.summary();
        info!(
            "After filtering: {} cells, {} UMIs, {} reads",
            output.cells, output.umis, output.reads
        );
        if table.is_empty() && input.umis > 0 {
            warn!("no molecules remain after filtering");
        }

        Ok(PipelineOutput {
            table,
            metrics: PipelineMetrics {
                params: params.clone(),
                input,
                output,
                rows_missing_int_bc,
                stages,
            },
        })
    }

    /// Kinship of every cell to every lineage group, with group profiles built
    /// using the configured prevalence threshold. Rows with no intBC are ignored.
    pub fn kinships(&self, table: MoleculeTable) -> Result<Vec<KinshipVector>, LineageQcError> {
        let (table, _) = table.drop_missing_int_bc();
        cell_kinships(&table, self.params.thresh)
    }
}

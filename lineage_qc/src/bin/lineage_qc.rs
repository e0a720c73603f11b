//! lineage_qc

use anyhow::{Context, Result};
use clap::Parser;
use lineage_qc::filter_log::FilterLogger;
use lineage_qc::io::{kinships_to_writer, read_molecule_table, write_molecule_table};
use lineage_qc::{FilterParams, Pipeline};
use log::{info, LevelFilter};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Error correction and doublet filtering of lineage-tracing molecule tables.
#[derive(Debug, Parser)]
enum Args {
    /// Clean a molecule table.
    Run {
        /// Tab-separated molecule table with a header line.
        input: PathBuf,
        /// Where to write the cleaned molecule table.
        #[clap(long, short)]
        output: PathBuf,
        /// TOML file of filter parameters; defaults are used when absent.
        #[clap(long)]
        params: Option<PathBuf>,
        /// Where to write the metrics summary as JSON.
        #[clap(long)]
        metrics: Option<PathBuf>,
        /// Where to write one JSON line per removed cell.
        #[clap(long)]
        filter_log: Option<PathBuf>,
        #[clap(long)]
        verbose: bool,
    },
    /// Print the kinship of every cell to every lineage group as TSV.
    Kinship {
        input: PathBuf,
        #[clap(long)]
        params: Option<PathBuf>,
        /// intBC prevalence cutoff, overriding the parameters file.
        #[clap(long)]
        thresh: Option<f64>,
        #[clap(long)]
        verbose: bool,
    },
}

fn load_params(path: Option<&Path>) -> Result<FilterParams> {
    match path {
        Some(path) => FilterParams::from_path(path),
        None => Ok(FilterParams::default()),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .init();
}

fn run(
    input: &Path,
    output: &Path,
    params: FilterParams,
    metrics: Option<&Path>,
    filter_log: Option<&Path>,
) -> Result<()> {
    let pipeline = Pipeline::new(params)?;
    let table = read_molecule_table(input)?;
    let mut filter_logger = filter_log.map(FilterLogger::new).transpose()?;

    let result = pipeline.run(table, filter_logger.as_mut())?;

    write_molecule_table(output, &result.table)?;
    info!("wrote {} molecules to {}", result.table.len(), output.display());
    if let Some(logger) = filter_logger.as_mut() {
        logger.flush()?;
        info!("logged {} removed cells", logger.entries());
    }
    if let Some(path) = metrics {
        result.metrics.write_json(path)?;
    }
    Ok(())
}

fn kinship(input: &Path, params: FilterParams) -> Result<()> {
    let pipeline = Pipeline::new(params)?;
    let table = read_molecule_table(input)?;
    let kinships = pipeline.kinships(table)?;
    let stdout = std::io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    kinships_to_writer(&mut writer, &kinships)?;
    writer.flush().context("writing kinships")?;
    Ok(())
}

fn main() -> Result<()> {
    match Args::parse() {
        Args::Run {
            input,
            output,
            params,
            metrics,
            filter_log,
            verbose,
        } => {
            let mut params = load_params(params.as_deref())?;
            params.verbose |= verbose;
            init_logging(params.verbose);
            params.report_non_default();
            run(
                &input,
                &output,
                params,
                metrics.as_deref(),
                filter_log.as_deref(),
            )
        }
        Args::Kinship {
            input,
            params,
            thresh,
            verbose,
        } => {
            let mut params = load_params(params.as_deref())?;
            if thresh.is_some() {
                params.thresh = thresh;
            }
            init_logging(verbose || params.verbose);
            params.report_non_default();
            kinship(&input, params)
        }
    }
}

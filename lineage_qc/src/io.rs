//! Tab-separated molecule tables.

use crate::errors::SchemaError;
use crate::kinship::KinshipVector;
use crate::molecule::{Column, LineageGroup, MoleculeRecord, MoleculeTable};
use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

const STAGE: &str = "read molecule table";
const MISSING: &str = "NA";

fn is_missing(field: &str) -> bool {
    matches!(field, "" | MISSING | "NaN" | "nan")
}

/// Parse a non-negative integer, also accepting integral floats such as `12.0`.
fn parse_count(field: &str) -> Option<u64> {
    field.parse::<u64>().ok().or_else(|| {
        let value: f64 = field.parse().ok()?;
        (value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64).then_some(value as u64)
    })
}

pub fn read_molecule_table(path: &Path) -> Result<MoleculeTable> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    from_reader(file).with_context(|| path.display().to_string())
}

/// Read a molecule table with a header line. Columns other than the molecule
/// table columns are ignored. `NA` or an empty field marks a missing intBC or
/// lineage group.
pub fn from_reader(reader: impl Read) -> Result<MoleculeTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(reader);

    let index: BTreeMap<Column, usize> = {
        let headers = reader.headers()?;
        let duplicates: Vec<_> = headers.iter().duplicates().collect();
        ensure!(
            duplicates.is_empty(),
            "The molecule table header contains a duplicate field: \"{}\". \
             Please ensure that the file has no duplicated fields.",
            duplicates.join(", ")
        );
        headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| Column::from_str(h).ok().map(|c| (c, i)))
            .collect()
    };
    if let Some(&column) = Column::CORE.iter().find(|c| !index.contains_key(c)) {
        return Err(SchemaError::MissingColumn {
            stage: STAGE,
            column,
        }
        .into());
    }

    let mut records = Vec::new();
    for (i, row) in reader.records().enumerate() {
        // 1 for 0-indexing, 1 for header
        let line = i + 2;
        let row =
            row.with_context(|| format!("The molecule table failed to parse on line {line}."))?;
        let field = |column: Column| {
            index
                .get(&column)
                .and_then(|&i| row.get(i))
                .unwrap_or_default()
        };

        let cell_bc = field(Column::CellBc);
        ensure!(
            !is_missing(cell_bc),
            "The molecule table has no cellBC on line {line}."
        );
        let int_bc = field(Column::IntBc);
        let read_count = parse_count(field(Column::ReadCount)).with_context(|| {
            format!(
                "The molecule table has an invalid readCount \"{}\" on line {line}.",
                field(Column::ReadCount)
            )
        })?;
        let lineage_grp = match field(Column::LineageGrp) {
            grp if is_missing(grp) => None,
            grp => {
                let value = parse_count(grp)
                    .and_then(|v| u32::try_from(v).ok())
                    .with_context(|| {
                        format!("The molecule table has an invalid lineageGrp \"{grp}\" on line {line}.")
                    })?;
                Some(LineageGroup(value))
            }
        };

        records.push(MoleculeRecord {
            cell_bc: cell_bc.to_string(),
            int_bc: (!is_missing(int_bc)).then(|| int_bc.to_string()),
            allele: field(Column::Allele).to_string(),
            umi: field(Column::Umi).to_string(),
            read_count,
            lineage_grp,
        });
    }

    Ok(MoleculeTable::with_columns(index.into_keys(), records))
}

fn field_value(record: &MoleculeRecord, column: Column) -> String {
    match column {
        Column::CellBc => record.cell_bc.clone(),
        Column::IntBc => record.int_bc.clone().unwrap_or_else(|| MISSING.to_string()),
        Column::Allele => record.allele.clone(),
        Column::Umi => record.umi.clone(),
        Column::ReadCount => record.read_count.to_string(),
        Column::LineageGrp => record
            .lineage_grp
            .map_or_else(|| MISSING.to_string(), |g| g.to_string()),
    }
}

pub fn write_molecule_table(path: &Path, table: &MoleculeTable) -> Result<()> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    to_writer(BufWriter::new(file), table).with_context(|| path.display().to_string())
}

/// Write the columns the table carries, in canonical column order.
pub fn to_writer(writer: impl Write, table: &MoleculeTable) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    let columns: Vec<Column> = table.columns().iter().copied().collect();
    writer.write_record(columns.iter().map(Column::to_string))?;
    for record in table.records() {
        writer.write_record(columns.iter().map(|&c| field_value(record, c)))?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per cell: its barcode, assigned group and the kinship to every group.
pub fn kinships_to_writer(writer: impl Write, kinships: &[KinshipVector]) -> Result<()> {
    let groups: BTreeSet<LineageGroup> = kinships
        .iter()
        .flat_map(|k| k.scores.keys().copied())
        .collect();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    writer.write_record(
        [Column::CellBc.to_string(), Column::LineageGrp.to_string()]
            .into_iter()
            .chain(groups.iter().map(|g| format!("kinship_{g}"))),
    )?;
    for kinship in kinships {
        writer.write_record(
            [kinship.cell_bc.clone(), kinship.assigned.to_string()]
                .into_iter()
                .chain(groups.iter().map(|g| {
                    format!("{:.6}", kinship.scores.get(g).copied().unwrap_or_default())
                })),
        )?;
    }
    writer.flush()?;
    Ok(())
}

use crate::errors::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use strum_macros::{Display, EnumString};

/// The columns of a molecule table, named as they appear in a table header.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum Column {
    #[strum(serialize = "cellBC")]
    #[serde(rename = "cellBC")]
    CellBc,
    #[strum(serialize = "intBC")]
    #[serde(rename = "intBC")]
    IntBc,
    #[strum(serialize = "allele")]
    #[serde(rename = "allele")]
    Allele,
    #[strum(serialize = "UMI")]
    #[serde(rename = "UMI")]
    Umi,
    #[strum(serialize = "readCount")]
    #[serde(rename = "readCount")]
    ReadCount,
    #[strum(serialize = "lineageGrp")]
    #[serde(rename = "lineageGrp")]
    LineageGrp,
}

impl Column {
    /// Columns every molecule table carries.
    pub const CORE: [Column; 5] = [
        Column::CellBc,
        Column::IntBc,
        Column::Allele,
        Column::Umi,
        Column::ReadCount,
    ];
}

/// A clonal population label, assigned upstream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct LineageGroup(pub u32);

impl fmt::Display for LineageGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LineageGroup {
    fn from(value: u32) -> Self {
        LineageGroup(value)
    }
}

/// One observed (cellBC, intBC, allele, UMI) molecule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MoleculeRecord {
    pub cell_bc: String,
    pub int_bc: Option<String>,
    pub allele: String,
    pub umi: String,
    pub read_count: u64,
    pub lineage_grp: Option<LineageGroup>,
}

impl MoleculeRecord {
    pub fn new(cell_bc: &str, int_bc: &str, allele: &str, umi: &str, read_count: u64) -> Self {
        MoleculeRecord {
            cell_bc: cell_bc.to_string(),
            int_bc: Some(int_bc.to_string()),
            allele: allele.to_string(),
            umi: umi.to_string(),
            read_count,
            lineage_grp: None,
        }
    }

    pub fn with_lineage(mut self, group: impl Into<LineageGroup>) -> Self {
        self.lineage_grp = Some(group.into());
        self
    }

    /// The intBC of this row, or a `SchemaError` naming `stage` if the value is missing.
    pub fn require_int_bc(&self, stage: &'static str) -> Result<&str, SchemaError> {
        self.int_bc.as_deref().ok_or_else(|| SchemaError::MissingValue {
            stage,
            column: Column::IntBc,
            cell_bc: self.cell_bc.clone(),
        })
    }

    pub fn require_lineage(&self, stage: &'static str) -> Result<LineageGroup, SchemaError> {
        self.lineage_grp.ok_or_else(|| SchemaError::MissingValue {
            stage,
            column: Column::LineageGrp,
            cell_bc: self.cell_bc.clone(),
        })
    }
}

/// Cell, UMI and read totals of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSummary {
    pub cells: usize,
    pub umis: usize,
    pub reads: u64,
}

/// An ordered collection of molecules together with the columns it carries.
///
/// Each row is one molecule, so UMI counts are row counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoleculeTable {
    columns: BTreeSet<Column>,
    records: Vec<MoleculeRecord>,
}

impl MoleculeTable {
    /// Build a table carrying the core columns, plus `lineageGrp` if any
    /// record has a lineage group.
    pub fn new(records: Vec<MoleculeRecord>) -> Self {
        let mut columns: BTreeSet<Column> = Column::CORE.into_iter().collect();
        if records.iter().any(|r| r.lineage_grp.is_some()) {
            columns.insert(Column::LineageGrp);
        }
        MoleculeTable { columns, records }
    }

    pub fn with_columns(
        columns: impl IntoIterator<Item = Column>,
        records: Vec<MoleculeRecord>,
    ) -> Self {
        MoleculeTable {
            columns: columns.into_iter().collect(),
            records,
        }
    }

    pub fn columns(&self) -> &BTreeSet<Column> {
        &self.columns
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    /// Fail with a `SchemaError` naming `stage` unless every column in `required` is present.
    pub fn require(&self, stage: &'static str, required: &[Column]) -> Result<(), SchemaError> {
        match required.iter().find(|c| !self.columns.contains(c)) {
            Some(&column) => Err(SchemaError::MissingColumn { stage, column }),
            None => Ok(()),
        }
    }

    pub fn records(&self) -> &[MoleculeRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MoleculeRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cell_barcodes(&self) -> BTreeSet<&str> {
        self.records.iter().map(|r| r.cell_bc.as_str()).collect()
    }

    pub fn num_cells(&self) -> usize {
        self.cell_barcodes().len()
    }

    pub fn summary(&self) -> TableSummary {
        TableSummary {
            cells: self.num_cells(),
            umis: self.records.len(),
            reads: self.records.iter().map(|r| r.read_count).sum(),
        }
    }

    /// Keep the rows for which `keep` returns true. The column set is unchanged.
    pub fn filter(self, mut keep: impl FnMut(&MoleculeRecord) -> bool) -> Self {
        let MoleculeTable {
            columns,
            mut records,
        } = self;
        records.retain(|r| keep(r));
        MoleculeTable { columns, records }
    }

    /// Keep the rows whose position is flagged in `keep`. Rows past the end of
    /// `keep` are dropped.
    pub fn select_rows(self, keep: &[bool]) -> Self {
        let mut flags = keep.iter();
        self.filter(|_| flags.next().copied().unwrap_or(false))
    }

    /// Drop every row belonging to one of `cells`.
    pub fn remove_cells<S: AsRef<str>>(self, cells: &BTreeSet<S>) -> Self {
        if cells.is_empty() {
            return self;
        }
        let cells: BTreeSet<&str> = cells.iter().map(|c| c.as_ref()).collect();
        self.filter(|r| !cells.contains(r.cell_bc.as_str()))
    }

    /// Drop rows with a missing intBC. Returns the table and the number of rows dropped.
    pub fn drop_missing_int_bc(self) -> (Self, usize) {
        let before = self.len();
        let table = self.filter(|r| r.int_bc.is_some());
        let dropped = before - table.len();
        (table, dropped)
    }

    /// Split rows by their assigned lineage group.
    pub fn partition_by_lineage(
        &self,
        stage: &'static str,
    ) -> Result<BTreeMap<LineageGroup, Vec<&MoleculeRecord>>, SchemaError> {
        self.require(stage, &[Column::LineageGrp])?;
        let mut groups: BTreeMap<LineageGroup, Vec<&MoleculeRecord>> = BTreeMap::new();
        for record in &self.records {
            groups
                .entry(record.require_lineage(stage)?)
                .or_default()
                .push(record);
        }
        Ok(groups)
    }
}

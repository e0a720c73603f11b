use crate::molecule::{Column, LineageGroup};

/// The molecule table does not have the shape a stage requires.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("{stage}: the molecule table has no '{column}' column")]
    MissingColumn { stage: &'static str, column: Column },

    #[error(
        "{stage}: cell {cell_bc} has a row with no '{column}' value. \
         Rows with missing values must be dropped before this stage."
    )]
    MissingValue {
        stage: &'static str,
        column: Column,
        cell_bc: String,
    },

    #[error(
        "{stage}: cell {cell_bc} is assigned to more than one lineage group \
         ({first} and {second})"
    )]
    ConflictingLineage {
        stage: &'static str,
        cell_bc: String,
        first: LineageGroup,
        second: LineageGroup,
    },

    #[error(
        "{stage}: cell {cell_bc} has UMI {umi} more than once at intBC {int_bc}. \
         Resolve UMI sequences before this stage."
    )]
    DuplicateUmi {
        stage: &'static str,
        cell_bc: String,
        int_bc: String,
        umi: String,
    },
}

/// A proportion or normalization would divide by zero.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArithmeticError {
    #[error("cell {cell_bc} has a total UMI count of zero, its conflict proportion is undefined")]
    ZeroUmiTotal { cell_bc: String },

    #[error("cell {cell_bc} shares no intBC with any lineage group, its kinship cannot be normalized")]
    NoKinship { cell_bc: String },

    #[error(
        "cell {cell_bc} shares intBCs with lineage group {group}, \
         whose characteristic intBCs have a total weight of zero"
    )]
    ZeroGroupWeight { cell_bc: String, group: LineageGroup },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LineageQcError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),

    #[error("parameter {name} = {value} must lie within {min} and {max}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl LineageQcError {
    pub(crate) fn check_fraction(name: &'static str, value: f64) -> Result<(), Self> {
        if (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(LineageQcError::InvalidParameter {
                name,
                value,
                min: 0.0,
                max: 1.0,
            })
        }
    }
}

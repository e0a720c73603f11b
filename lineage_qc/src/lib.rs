//! lineage_qc
//!
//! Error correction and doublet filtering of lineage-tracing molecule tables,
//! run ahead of character-matrix construction. Every stage consumes a
//! `MoleculeTable` and returns a new, smaller one.

use ahash::AHasher;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;

pub mod cell_filter;
pub mod consensus;
pub mod errors;
pub mod filter_log;
pub mod grouped;
pub mod intbc_set;
pub mod inter_doublet;
pub mod intra_doublet;
pub mod io;
pub mod kinship;
pub mod metrics;
pub mod molecule;
pub mod params;
pub mod pipeline;
pub mod umi;

pub use errors::{ArithmeticError, LineageQcError, SchemaError};
pub use molecule::{Column, LineageGroup, MoleculeRecord, MoleculeTable};
pub use params::FilterParams;
pub use pipeline::{Pipeline, PipelineOutput};

/// A deterministic and fast hasher.
#[derive(Clone, Copy, Default)]
pub struct TxHasher;

impl TxHasher {
    fn random_state() -> ahash::RandomState {
        ahash::RandomState::with_seeds(0, 0, 0, 0)
    }
}

impl BuildHasher for TxHasher {
    type Hasher = AHasher;

    fn build_hasher(&self) -> Self::Hasher {
        Self::random_state().build_hasher()
    }
}

/// A default HashMap using some faster hashing scheme
pub type TxHashMap<K, V> = HashMap<K, V, TxHasher>;

/// A default HashSet using some faster hashing scheme
pub type TxHashSet<K> = HashSet<K, TxHasher>;

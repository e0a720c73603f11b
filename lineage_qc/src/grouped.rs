//! Group rows by a partition key, tally each sub-key within the partition and
//! select one winning sub-key per partition.
//!
//! Consensus allele calling, intra-lineage conflict counting and UMI sequence
//! resolution all reduce to this: they differ only in the partition key, the
//! sub-key and how candidates are ranked.

use crate::errors::SchemaError;
use crate::molecule::MoleculeRecord;
use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::AddAssign;

/// Read and molecule support accumulated over a set of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Support {
    pub reads: u64,
    pub umis: u64,
}

impl Support {
    pub fn of(record: &MoleculeRecord) -> Self {
        Support {
            reads: record.read_count,
            umis: 1,
        }
    }
}

impl AddAssign for Support {
    fn add_assign(&mut self, other: Support) {
        self.reads += other.reads;
        self.umis += other.umis;
    }
}

impl Sum for Support {
    fn sum<I: Iterator<Item = Support>>(iter: I) -> Support {
        iter.fold(Support::default(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}

/// The winning sub-key of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<S> {
    pub winner: S,
    pub winner_support: Support,
    /// Support over every sub-key of the partition.
    pub total: Support,
    /// Number of distinct sub-keys seen in the partition.
    pub candidates: usize,
}

impl<S> Selection<S> {
    pub fn is_contested(&self) -> bool {
        self.candidates > 1
    }

    /// Support carried by every sub-key other than the winner.
    pub fn losing_support(&self) -> Support {
        Support {
            reads: self.total.reads - self.winner_support.reads,
            umis: self.total.umis - self.winner_support.umis,
        }
    }
}

/// Tally `records` by `partition` and `sub_key`, and select the sub-key with
/// the greatest `rank` in each partition.
///
/// `rank` must order every pair of distinct sub-keys, so that the selection
/// never depends on the input row order. Partitions are returned in key order.
pub fn select_majority<'a, K, S, R>(
    records: impl IntoIterator<Item = &'a MoleculeRecord>,
    partition: impl Fn(&'a MoleculeRecord) -> Result<K, SchemaError>,
    sub_key: impl Fn(&'a MoleculeRecord) -> S,
    rank: impl Fn(S, Support) -> R,
) -> Result<BTreeMap<K, Selection<S>>, SchemaError>
where
    K: Ord,
    S: Ord + Copy,
    R: Ord,
{
    let mut tallies: BTreeMap<K, BTreeMap<S, Support>> = BTreeMap::new();
    for record in records {
        *tallies
            .entry(partition(record)?)
            .or_default()
            .entry(sub_key(record))
            .or_default() += Support::of(record);
    }

    let mut selections = BTreeMap::new();
    for (key, subs) in tallies {
        let candidates = subs.len();
        let total: Support = subs.values().copied().sum();
        let Some((winner, winner_support)) = subs.into_iter().max_by_key(|&(s, sup)| rank(s, sup))
        else {
            continue;
        };
        selections.insert(
            key,
            Selection {
                winner,
                winner_support,
                total,
                candidates,
            },
        );
    }
    Ok(selections)
}

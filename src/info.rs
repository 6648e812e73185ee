//! Per-node phylogenetic annotations.
//!
//! A node's `info` slot holds a [`PhylogenyInfo`], which in turn carries the
//! optional reconciliation and index sub-records. Indexing, reconciliation
//! and bootstrap scoring each fill in their own part and leave the other
//! untouched, so a tree can be both indexed and reconciled.

use crate::bitset::Bitset;
use crate::tree::NodeId;

/// Event underlying a node of a reconciled gene tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconciliationEvent {
    Duplication,
    Speciation,
    Leaf,
}

/// Mapping of one gene-tree node onto the species tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReconciliationInfo {
    /// Species-tree node this gene-tree node maps to.
    pub species: NodeId,
    pub event: ReconciliationEvent,
}

/// Leaf-set index of a node in a tree whose leaves are numbered `0..L-1`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedTreeInfo {
    /// Row/column of the distance matrix for leaves, `None` for internal nodes.
    pub matrix_index: Option<usize>,
    /// Leaves below this node, one bit per matrix index.
    pub leaves_below: Bitset,
    /// Number of replicate trees that contain this node's split.
    pub num_bootstraps: usize,
    /// `num_bootstraps` divided by the number of replicates.
    pub bootstrap_support: f64,
    /// Size of the leaf universe; identical on every node of a tree.
    pub total_num_leaves: usize,
}

impl IndexedTreeInfo {
    pub fn new(matrix_index: Option<usize>, total_num_leaves: usize) -> Self {
        Self {
            matrix_index,
            leaves_below: Bitset::for_leaves(total_num_leaves),
            num_bootstraps: 0,
            bootstrap_support: 0.0,
            total_num_leaves,
        }
    }
}

/// Annotation attached to tree nodes by the algorithms in this crate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhylogenyInfo {
    pub recon: Option<ReconciliationInfo>,
    pub index: Option<IndexedTreeInfo>,
}

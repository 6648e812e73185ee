//! Error taxonomy shared by every engine in the crate.
//!
//! Precondition violations (bad leaf labels, non-binary species trees,
//! missing lookup entries, too few taxa) and malformed input (Newick, TSV)
//! are both reported through [`PhyloError`]; nothing here is transient, so
//! callers never retry.

use thiserror::Error;

use crate::tree::NodeId;

#[derive(Debug, Error)]
pub enum PhyloError {
    /// Leaves are not labeled `0..L-1` exactly once, or an internal node carries a label.
    #[error("invalid leaf labeling for indexing: {0}")]
    InvalidLeafLabels(String),

    /// An operation that needs `IndexedTreeInfo` found a node without it.
    #[error("tree is not indexed (node {0} has no index info)")]
    NotIndexed(NodeId),

    /// An operation that needs reconciliation info found a node without it.
    #[error("tree is not reconciled (node {0} has no reconciliation info)")]
    NotReconciled(NodeId),

    #[error("tree is not binary: node {node} has {children} children")]
    NonBinaryTree { node: NodeId, children: usize },

    /// A lookup map lacks a required entry.
    #[error("missing mapping: {0}")]
    MissingMapping(String),

    #[error("neighbor joining needs at least 3 taxa, got {0}")]
    TooFewTaxa(usize),

    #[error("outgroup {0} is not a taxon of the distance matrix")]
    UnknownOutgroup(usize),

    /// Structurally inconsistent node arena.
    #[error("invalid tree: {0}")]
    InvalidTree(String),

    #[error("invalid matrix: {0}")]
    InvalidMatrix(String),

    /// Reference and replicate trees do not share a leaf universe.
    #[error("leaf set mismatch: reference has {expected} leaves, replicate has {found}")]
    LeafSetMismatch { expected: usize, found: usize },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PhyloError>;

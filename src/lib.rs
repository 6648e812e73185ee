//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `tree`, `info`, `newick`: arena tree, per-node annotations, Newick I/O.
//! - `matrix`: distance, similarity and join-cost matrices.
//! - `index`: leaf-set indexing of trees built from matrices.
//! - `bitset`, `snapshot`: leaf-set bitmaps and per-tree split snapshots.
//! - `bootstrap`: split support against replicate trees.
//! - `nj`, `guided`, `join_cost`: plain and species-guided neighbor-joining.
//! - `reconcile`: gene tree / species tree reconciliation and rerooting.
//! - `io`: TSV matrices, mappings, Newick and BEAST/NEXUS tree files.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod bootstrap;
pub mod error;
pub mod guided;
pub mod index;
pub mod info;
pub mod io;
pub mod join_cost;
pub mod matrix;
pub mod newick;
pub mod nj;
pub mod reconcile;
pub mod snapshot;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use bitset::Bitset;
pub use bootstrap::{
    label_with_support, score_from_bootstrap, score_from_bootstraps,
    score_reconciliation_from_bootstrap, score_reconciliation_from_bootstraps,
};
pub use error::{PhyloError, Result};
pub use guided::guided_neighbor_joining;
pub use index::{
    add_indexed_tree_info, distance_between_leaves, distance_between_nodes, get_leaf_by_index,
    get_mrca, set_leaves_below,
};
pub use info::{IndexedTreeInfo, PhylogenyInfo, ReconciliationEvent, ReconciliationInfo};
pub use io::{read_beast_trees, read_matrix_tsv, write_matrix_tsv};
pub use join_cost::{compute_join_costs, get_mrca_matrix, MrcaMatrix, SpeciesIndex};
pub use matrix::{SimilarityMatrix, SquareMatrix};
pub use nj::neighbor_join;
pub use reconcile::{
    reconcile_at_most_binary, reconcile_binary, reconciliation_cost_at_most_binary,
    reconciliation_cost_binary, root_and_reconcile_at_most_binary, root_and_reconcile_binary,
    leaf_to_species_from_labels, LeafToSpecies, ReconciliationCost,
};
pub use snapshot::TreeSnapshot;
pub use tree::{Node, NodeId, PhyloTree};

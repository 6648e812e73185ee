//! Join costs and MRCA tables over a binary species tree.
//!
//! Guided neighbor-joining asks, for every candidate pair of gene clusters,
//! what it would cost in duplications and losses to join a lineage mapped to
//! species `i` with one mapped to species `j`. Both that cost and the species
//! the joined cluster maps to only depend on the species tree, so they are
//! computed once here and shared read-only by every guided run against the
//! same species tree.
//!
//! Every species node (leaves and internal nodes) gets a join-cost index, in
//! post-order, so leaves come before their ancestors.

use std::collections::HashMap;

use itertools::Itertools;
use log::debug;

use crate::error::{PhyloError, Result};
use crate::matrix::SquareMatrix;
use crate::tree::{NodeId, PhyloTree};

/// Bijection between species-tree nodes and join-cost indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesIndex {
    index_of: HashMap<NodeId, usize>,
    species: Vec<NodeId>,
}

impl SpeciesIndex {
    /// Index every node of `species_tree` in post-order.
    pub fn new(species_tree: &PhyloTree) -> Self {
        let species = species_tree.postorder();
        let index_of = species.iter().enumerate().map(|(i, &s)| (s, i)).collect();
        Self { index_of, species }
    }

    /// Join-cost index of a species node.
    pub fn index_of(&self, species: NodeId) -> Option<usize> {
        self.index_of.get(&species).copied()
    }

    /// Species node at a join-cost index.
    pub fn species_at(&self, index: usize) -> Option<NodeId> {
        self.species.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
}

/// Cost of joining two lineages, for every ordered pair of species nodes.
///
/// With `m` the MRCA of `i` and `j`: if `m` is one of them the join is a
/// duplication, costing `cost_per_dup` plus one loss per species edge from
/// `m` down to `i` and to `j`. Otherwise it is a speciation at `m` and only
/// the lineages skipped below `m`'s children count as losses.
///
/// # Errors
/// [`PhyloError::NonBinaryTree`] unless `species_tree` is binary.
pub fn compute_join_costs(
    species_tree: &PhyloTree,
    cost_per_dup: f64,
    cost_per_loss: f64,
) -> Result<(SquareMatrix, SpeciesIndex)> {
    species_tree.ensure_binary()?;
    let index = SpeciesIndex::new(species_tree);
    let n = index.len();
    let depth: Vec<usize> = index
        .species
        .iter()
        .map(|&s| species_tree.depth_of(s))
        .collect();

    let mut costs = SquareMatrix::new(n);
    for (i, j) in (0..n).cartesian_product(0..n) {
        let (si, sj) = (index.species[i], index.species[j]);
        let m = species_tree.mrca(si, sj);
        let dm = species_tree.depth_of(m);
        let below_i = depth[i] - dm;
        let below_j = depth[j] - dm;
        costs[(i, j)] = if m == si || m == sj {
            cost_per_dup + cost_per_loss * (below_i + below_j) as f64
        } else {
            cost_per_loss * ((below_i - 1) + (below_j - 1)) as f64
        };
    }
    debug!("computed {n}x{n} join costs (dup {cost_per_dup}, loss {cost_per_loss})");
    Ok((costs, index))
}

/// Pairwise MRCAs of species nodes, addressed by join-cost index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrcaMatrix {
    n: usize,
    mrca: Vec<NodeId>,
}

impl MrcaMatrix {
    /// MRCA of the species at join-cost indices `i` and `j`.
    pub fn mrca(&self, i: usize, j: usize) -> NodeId {
        self.mrca[i * self.n + j]
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }
}

/// Cache the MRCA of every pair of indexed species nodes.
///
/// # Errors
/// [`PhyloError::MissingMapping`] if `species_index` names a node that is
/// not in `species_tree`.
pub fn get_mrca_matrix(species_tree: &PhyloTree, species_index: &SpeciesIndex) -> Result<MrcaMatrix> {
    let n = species_index.len();
    if let Some(&bad) = species_index
        .species
        .iter()
        .find(|&&s| species_tree.get(s).is_none())
    {
        return Err(PhyloError::MissingMapping(format!(
            "species node {bad} is not in the species tree"
        )));
    }
    let mut mrca = Vec::with_capacity(n * n);
    for &si in &species_index.species {
        for &sj in &species_index.species {
            mrca.push(species_tree.mrca(si, sj));
        }
    }
    Ok(MrcaMatrix { n, mrca })
}

//! Neighbor-joining guided by a species tree.
//!
//! The clustering loop is the plain one from [`crate::nj`], with two changes:
//! every cluster carries the species it maps to, and the join criterion adds
//! the join cost of the two clusters' species. A joined cluster maps to the
//! MRCA of its children's species, so costs compound up the tree. Distances
//! come from a [`SimilarityMatrix`] rather than a distance matrix.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info};

use crate::error::{PhyloError, Result};
use crate::index::add_indexed_tree_info;
use crate::info::{ReconciliationEvent, ReconciliationInfo};
use crate::join_cost::{MrcaMatrix, SpeciesIndex};
use crate::matrix::{SimilarityMatrix, SquareMatrix};
use crate::nj::Clustering;
use crate::tree::{NodeId, PhyloTree};

/// Build a gene tree from similarity counts, penalizing joins by their
/// duplication/loss cost on `species_tree`.
///
/// `matrix_index_to_join_cost_index` maps each taxon (matrix row) to the
/// join-cost index of its species. Ties in the penalized criterion go to the
/// lower join cost, then to the first pair in scan order. The tree is rooted
/// at the final join; leaves are labeled with their matrix index and every
/// node carries index and reconciliation info.
///
/// # Errors
/// [`PhyloError::NonBinaryTree`] for a non-binary species tree,
/// [`PhyloError::MissingMapping`] for an unmapped taxon or species,
/// [`PhyloError::TooFewTaxa`] below 3 taxa.
pub fn guided_neighbor_joining(
    similarity: &SimilarityMatrix,
    join_costs: &SquareMatrix,
    matrix_index_to_join_cost_index: &HashMap<usize, usize>,
    species_to_join_cost_index: &SpeciesIndex,
    species_mrca: &MrcaMatrix,
    species_tree: &PhyloTree,
) -> Result<PhyloTree> {
    species_tree.ensure_binary()?;
    let n = similarity.len();
    if n < 3 {
        return Err(PhyloError::TooFewTaxa(n));
    }
    let species_count = species_to_join_cost_index.len();
    if join_costs.len() != species_count || species_mrca.len() != species_count {
        return Err(PhyloError::InvalidMatrix(format!(
            "join cost tables cover {} and {} species, the index has {}",
            join_costs.len(),
            species_mrca.len(),
            species_count
        )));
    }

    // join-cost index per active position, and species per built node
    let mut cluster_species: Vec<usize> = Vec::with_capacity(n);
    for i in 0..n {
        let ci = *matrix_index_to_join_cost_index
            .get(&i)
            .ok_or_else(|| PhyloError::MissingMapping(format!("matrix index {i} has no species")))?;
        if ci >= species_count {
            return Err(PhyloError::MissingMapping(format!(
                "join cost index {ci} of matrix index {i} is out of range"
            )));
        }
        cluster_species.push(ci);
    }
    let mut node_species: Vec<NodeId> = cluster_species
        .iter()
        .map(|&ci| species_at(species_to_join_cost_index, ci))
        .collect::<Result<_>>()?;

    let t0 = Instant::now();
    let mut clusters = Clustering::new(n, |i, j| similarity.distance(i, j));
    while clusters.len() > 2 {
        let sums = clusters.row_sums();
        let (mut best_i, mut best_j) = (1, 0);
        let (mut best_total, mut best_cost) = (f64::INFINITY, f64::INFINITY);
        for i in 1..clusters.len() {
            for j in 0..i {
                let cost = join_costs[(cluster_species[i], cluster_species[j])];
                let total = clusters.criterion(i, j, &sums) + cost;
                if total < best_total || (total == best_total && cost < best_cost) {
                    best_total = total;
                    best_cost = cost;
                    best_i = i;
                    best_j = j;
                }
            }
        }

        let joined_species = species_mrca.mrca(cluster_species[best_i], cluster_species[best_j]);
        let joined_index = species_to_join_cost_index
            .index_of(joined_species)
            .ok_or_else(|| {
                PhyloError::MissingMapping(format!("species node {joined_species} has no join cost index"))
            })?;
        let joined = clusters.join(best_i, best_j, &sums);
        debug!("joined positions {best_i} and {best_j} into node {joined} (cost {best_cost})");

        cluster_species[best_i] = joined_index;
        cluster_species.swap_remove(best_j);
        node_species.push(joined_species);
    }
    node_species.push(species_mrca.mrca(cluster_species[0], cluster_species[1]));

    let mut tree = clusters.finish()?;
    add_indexed_tree_info(&mut tree)?;
    for id in tree.preorder() {
        let species = node_species[id];
        let event = if tree.is_leaf(id) {
            ReconciliationEvent::Leaf
        } else if tree.children(id).iter().any(|&c| node_species[c] == species) {
            ReconciliationEvent::Duplication
        } else {
            ReconciliationEvent::Speciation
        };
        tree.info_mut(id).recon = Some(ReconciliationInfo { species, event });
    }
    info!(
        "Guided neighbor-joined {} taxa in {:.3}s",
        n,
        t0.elapsed().as_secs_f64()
    );
    Ok(tree)
}

fn species_at(index: &SpeciesIndex, join_cost_index: usize) -> Result<NodeId> {
    index.species_at(join_cost_index).ok_or_else(|| {
        PhyloError::MissingMapping(format!("join cost index {join_cost_index} has no species"))
    })
}

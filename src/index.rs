//! Leaf-set indexing of trees whose leaves are numbered like matrix rows.
//!
//! # Overview
//! A tree built from a distance matrix labels its leaves `"0"`, `"1"`, …,
//! `"L-1"`. Indexing attaches an [`IndexedTreeInfo`] to every node: leaves
//! learn their matrix index, and every node records the [`Bitset`] of leaves
//! below it. With those bitmaps, leaf lookup and MRCA queries only walk one
//! root-to-leaf path instead of traversing the whole tree.
//!
//! ```text
//!            root {0,1,2,3}
//!           /             \
//!      x {0,1}          y {2,3}
//!      /    \           /    \
//!     0      1         2      3
//! ```

use log::debug;

use crate::bitset::Bitset;
use crate::error::{PhyloError, Result};
use crate::info::IndexedTreeInfo;
use crate::tree::{NodeId, PhyloTree};

/// Attach `IndexedTreeInfo` to every node and fill in the leaf bitmaps.
///
/// # Errors
/// [`PhyloError::InvalidLeafLabels`] unless the leaves are labeled with the
/// decimal strings `0..L-1`, each exactly once, and internal nodes carry no
/// label.
pub fn add_indexed_tree_info(tree: &mut PhyloTree) -> Result<()> {
    let order = tree.preorder();
    let total = order.iter().filter(|&&id| tree.is_leaf(id)).count();
    let mut seen = vec![false; total];
    let mut assignments: Vec<(NodeId, Option<usize>)> = Vec::with_capacity(order.len());

    for &id in &order {
        let node = &tree[id];
        if !node.is_leaf() {
            if let Some(label) = &node.label {
                return Err(PhyloError::InvalidLeafLabels(format!(
                    "internal node {id} is labeled '{label}'"
                )));
            }
            assignments.push((id, None));
            continue;
        }
        let label = node
            .label
            .as_deref()
            .ok_or_else(|| PhyloError::InvalidLeafLabels(format!("leaf {id} is unlabeled")))?;
        let index: usize = label.parse().map_err(|_| {
            PhyloError::InvalidLeafLabels(format!("leaf label '{label}' is not an index"))
        })?;
        if index >= total {
            return Err(PhyloError::InvalidLeafLabels(format!(
                "leaf label {index} out of range for {total} leaves"
            )));
        }
        if std::mem::replace(&mut seen[index], true) {
            return Err(PhyloError::InvalidLeafLabels(format!(
                "leaf label {index} appears more than once"
            )));
        }
        assignments.push((id, Some(index)));
    }

    for (id, matrix_index) in assignments {
        tree.info_mut(id).index = Some(IndexedTreeInfo::new(matrix_index, total));
    }
    debug!("indexed tree with {total} leaves");
    set_leaves_below(tree, total)
}

/// Recompute `leaves_below` and `total_num_leaves` on every node in one post-order pass.
///
/// # Errors
/// [`PhyloError::NotIndexed`] if any node lacks `IndexedTreeInfo`.
pub fn set_leaves_below(tree: &mut PhyloTree, total_num_leaves: usize) -> Result<()> {
    for id in tree.postorder() {
        let mut below = Bitset::for_leaves(total_num_leaves);
        if tree.is_leaf(id) {
            let leaf = index_info(tree, id)?.matrix_index.ok_or_else(|| {
                PhyloError::InvalidLeafLabels(format!("leaf {id} has no matrix index"))
            })?;
            if leaf >= total_num_leaves {
                return Err(PhyloError::InvalidLeafLabels(format!(
                    "matrix index {leaf} out of range for {total_num_leaves} leaves"
                )));
            }
            below.set(leaf);
        } else {
            for &child in tree.children(id) {
                below.or_assign(&index_info(tree, child)?.leaves_below);
            }
        }
        let info = tree[id]
            .info
            .as_mut()
            .and_then(|i| i.index.as_mut())
            .ok_or(PhyloError::NotIndexed(id))?;
        info.leaves_below = below;
        info.total_num_leaves = total_num_leaves;
    }
    Ok(())
}

/// The `IndexedTreeInfo` of `id`, or [`PhyloError::NotIndexed`].
pub fn index_info(tree: &PhyloTree, id: NodeId) -> Result<&IndexedTreeInfo> {
    tree[id].index_info().ok_or(PhyloError::NotIndexed(id))
}

/// The leaf whose matrix index is `leaf_index`, found by descending along the bitmaps.
pub fn get_leaf_by_index(tree: &PhyloTree, leaf_index: usize) -> Result<NodeId> {
    let mut cur = tree.root();
    if !index_info(tree, cur)?.leaves_below.contains(leaf_index) {
        return Err(PhyloError::MissingMapping(format!(
            "leaf index {leaf_index} is not in the tree"
        )));
    }
    while !tree.is_leaf(cur) {
        let mut next = None;
        for &child in tree.children(cur) {
            if index_info(tree, child)?.leaves_below.contains(leaf_index) {
                next = Some(child);
                break;
            }
        }
        cur = next.ok_or_else(|| {
            PhyloError::InvalidTree(format!("node {cur} has stale leaf bitmaps"))
        })?;
    }
    Ok(cur)
}

/// Most recent common ancestor of the leaves with matrix indices `leaf1` and `leaf2`.
///
/// Walks from `leaf1` toward the root and returns the first ancestor whose
/// bitmap contains `leaf2`.
pub fn get_mrca(tree: &PhyloTree, leaf1: usize, leaf2: usize) -> Result<NodeId> {
    let mut cur = get_leaf_by_index(tree, leaf1)?;
    loop {
        if index_info(tree, cur)?.leaves_below.contains(leaf2) {
            return Ok(cur);
        }
        cur = tree.parent(cur).ok_or_else(|| {
            PhyloError::MissingMapping(format!("leaf index {leaf2} is not in the tree"))
        })?;
    }
}

/// Sum of branch lengths on the path between two nodes of an indexed tree.
///
/// Unset branch lengths count as zero.
pub fn distance_between_nodes(tree: &PhyloTree, node1: NodeId, node2: NodeId) -> Result<f64> {
    let target = &index_info(tree, node2)?.leaves_below;
    let mut mrca = node1;
    while !index_info(tree, mrca)?.leaves_below.is_superset(target) {
        mrca = tree
            .parent(mrca)
            .ok_or_else(|| PhyloError::InvalidTree("nodes are not in the same tree".into()))?;
    }
    Ok(length_to_ancestor(tree, node1, mrca) + length_to_ancestor(tree, node2, mrca))
}

/// Path length between the leaves with matrix indices `leaf1` and `leaf2`.
pub fn distance_between_leaves(tree: &PhyloTree, leaf1: usize, leaf2: usize) -> Result<f64> {
    let a = get_leaf_by_index(tree, leaf1)?;
    let b = get_leaf_by_index(tree, leaf2)?;
    distance_between_nodes(tree, a, b)
}

fn length_to_ancestor(tree: &PhyloTree, mut node: NodeId, ancestor: NodeId) -> f64 {
    let mut length = 0.0;
    while node != ancestor {
        length += tree[node].branch_length.unwrap_or(0.0);
        match tree.parent(node) {
            Some(p) => node = p,
            None => break,
        }
    }
    length
}

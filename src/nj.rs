//! Neighbor-joining.
//!
//! Clusters live at *positions* `0..r` of a working distance matrix. Joining
//! the clusters at positions `i` and `j` (always `j < i`) writes the new
//! cluster into position `i` and swap-removes position `j`, so the matrix
//! never shrinks and the active list stays dense. Pairs are scanned with `i`
//! ascending over positions and `j < i` ascending; the first strict minimum
//! of the criterion wins.

use std::collections::HashSet;
use std::time::Instant;

use log::{debug, info};

use crate::error::{PhyloError, Result};
use crate::index::add_indexed_tree_info;
use crate::matrix::SquareMatrix;
use crate::tree::{Node, NodeId, PhyloTree, UnrootedEdge};

/// Working state shared by plain and guided neighbor-joining.
pub(crate) struct Clustering {
    dist: SquareMatrix,
    active: Vec<NodeId>,
    nodes: Vec<Node>,
}

impl Clustering {
    /// One leaf per taxon, labeled with its matrix index; `distance(i, j)`
    /// is only queried for `i > j`.
    pub(crate) fn new(n: usize, distance: impl Fn(usize, usize) -> f64) -> Self {
        let mut dist = SquareMatrix::new(n);
        for i in 0..n {
            for j in 0..i {
                let d = distance(i, j);
                dist[(i, j)] = d;
                dist[(j, i)] = d;
            }
        }
        let nodes = (0..n).map(|i| Node::new(i, Some(i.to_string()), None)).collect();
        Self {
            dist,
            active: (0..n).collect(),
            nodes,
        }
    }

    /// Number of active clusters.
    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn distance(&self, i: usize, j: usize) -> f64 {
        self.dist[(i, j)]
    }

    /// Sum of distances from each active position to all others.
    pub(crate) fn row_sums(&self) -> Vec<f64> {
        let r = self.len();
        (0..r)
            .map(|i| (0..r).map(|k| self.dist[(i, k)]).sum())
            .collect()
    }

    /// `(r - 2)·d(i, j) - R_i - R_j`
    pub(crate) fn criterion(&self, i: usize, j: usize, sums: &[f64]) -> f64 {
        (self.len() as f64 - 2.0) * self.dist[(i, j)] - sums[i] - sums[j]
    }

    /// Join positions `i` and `j` (`j < i`) under a new node and return its id.
    pub(crate) fn join(&mut self, i: usize, j: usize, sums: &[f64]) -> NodeId {
        let r = self.len() as f64;
        let d_ij = self.dist[(i, j)];
        let b_i = d_ij / 2.0 + (sums[i] - sums[j]) / (2.0 * (r - 2.0));
        let b_j = d_ij - b_i;

        let (node_i, node_j) = (self.active[i], self.active[j]);
        let new_id = self.push_parent(node_i, node_j, b_i, b_j);

        for k in 0..self.len() {
            if k == i || k == j {
                continue;
            }
            let d = (self.dist[(i, k)] + self.dist[(j, k)] - d_ij) / 2.0;
            self.dist[(i, k)] = d;
            self.dist[(k, i)] = d;
        }
        self.active[i] = new_id;
        self.remove_position(j);
        new_id
    }

    /// Join the last two clusters under the root, each at half their distance.
    pub(crate) fn finish(mut self) -> Result<PhyloTree> {
        let (node_0, node_1) = match self.active.as_slice() {
            &[a, b] => (a, b),
            other => {
                return Err(PhyloError::InvalidTree(format!(
                    "cannot finish clustering with {} active clusters",
                    other.len()
                )));
            }
        };
        let half = self.dist[(0, 1)] / 2.0;
        let root = self.push_parent(node_0, node_1, half, half);
        PhyloTree::from_nodes(self.nodes, root)
    }

    fn push_parent(&mut self, a: NodeId, b: NodeId, len_a: f64, len_b: f64) -> NodeId {
        let id = self.nodes.len();
        let mut parent = Node::new(id, None, None);
        parent.children = vec![a, b];
        self.nodes.push(parent);
        self.nodes[a].parent = Some(id);
        self.nodes[b].parent = Some(id);
        self.nodes[a].branch_length = Some(len_a.max(0.0));
        self.nodes[b].branch_length = Some(len_b.max(0.0));
        id
    }

    /// Move the last position into `j` and drop the last.
    fn remove_position(&mut self, j: usize) {
        let last = self.len() - 1;
        if j != last {
            for k in 0..=last {
                self.dist[(j, k)] = self.dist[(last, k)];
                self.dist[(k, j)] = self.dist[(k, last)];
            }
            self.dist[(j, j)] = 0.0;
        }
        self.active.swap_remove(j);
    }
}

/// Build a tree from the lower triangle (`i > j`) of `distances`.
///
/// Leaves are labeled `"0".."n-1"` and the returned tree is indexed. It is
/// rooted at the midpoint of the longest edge, or of the longest edge that
/// touches one of the `outgroups` leaves.
///
/// # Errors
/// [`PhyloError::TooFewTaxa`] below 3 taxa, [`PhyloError::UnknownOutgroup`]
/// for an outgroup outside `0..n`.
pub fn neighbor_join(distances: &SquareMatrix, outgroups: Option<&[usize]>) -> Result<PhyloTree> {
    let n = distances.len();
    if n < 3 {
        return Err(PhyloError::TooFewTaxa(n));
    }
    if let Some(&bad) = outgroups.into_iter().flatten().find(|&&o| o >= n) {
        return Err(PhyloError::UnknownOutgroup(bad));
    }

    let t0 = Instant::now();
    let mut clusters = Clustering::new(n, |i, j| distances.lower(i, j));
    while clusters.len() > 2 {
        let sums = clusters.row_sums();
        let (mut best_i, mut best_j) = (1, 0);
        let mut best_q = f64::INFINITY;
        for i in 1..clusters.len() {
            for j in 0..i {
                let q = clusters.criterion(i, j, &sums);
                if q < best_q {
                    best_q = q;
                    best_i = i;
                    best_j = j;
                }
            }
        }
        let joined = clusters.join(best_i, best_j, &sums);
        debug!("joined positions {best_i} and {best_j} into node {joined} (Q = {best_q})");
    }
    let unrooted = clusters.finish()?;

    let edge = rooting_edge(&unrooted, outgroups)?;
    let mut tree = unrooted.reroot(&edge);
    add_indexed_tree_info(&mut tree)?;
    info!(
        "Neighbor-joined {} taxa in {:.3}s",
        n,
        t0.elapsed().as_secs_f64()
    );
    Ok(tree)
}

/// Longest edge of the unrooted view, first in pre-order on ties.
fn rooting_edge(tree: &PhyloTree, outgroups: Option<&[usize]>) -> Result<UnrootedEdge> {
    let outgroup_labels: Option<HashSet<String>> = outgroups
        .filter(|o| !o.is_empty())
        .map(|o| o.iter().map(|i| i.to_string()).collect());
    let is_outgroup = |id: NodeId| match (&outgroup_labels, &tree[id].label) {
        (Some(labels), Some(label)) => tree.is_leaf(id) && labels.contains(label),
        _ => false,
    };

    let mut best: Option<UnrootedEdge> = None;
    for edge in tree.unrooted_edges() {
        if outgroup_labels.is_some() && !is_outgroup(edge.a) && !is_outgroup(edge.b) {
            continue;
        }
        let length = edge.length.unwrap_or(0.0);
        if best.is_none_or(|b| length > b.length.unwrap_or(0.0)) {
            best = Some(edge);
        }
    }
    best.ok_or_else(|| PhyloError::InvalidTree("no edge to root on".into()))
}

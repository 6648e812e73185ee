//! Split snapshots of indexed trees.
//!
//! # Overview
//! A `TreeSnapshot` records, for every node of an indexed tree, the set of
//! leaves below it (its *split*) together with the reconciliation the node
//! carries, if any. Snapshots are immutable and cheap to query, so a batch of
//! replicate trees can be snapshotted in parallel once and then compared with
//! a reference tree node by node.
//!
//! # Rooted and unrooted splits
//! Bootstrap scoring compares rooted clades: the split of a node is exactly
//! its `leaves_below` bitmap. For topology comparisons that must ignore the
//! root position (e.g. checking a neighbor-joining result against the tree
//! that generated its distances) [`TreeSnapshot::unrooted_splits`] returns
//! canonical bipartitions instead:
//!
//! ```text
//!        (root)                       node1
//!        /   \                        /   \
//!    node1    node2              (root)    1
//!    /   \    /   \              /   \
//!   0     1  2     3            0    node2
//!                                    /   \
//!                                   2     3
//! ```
//!
//! Both trees describe the bipartition {0,1}|{2,3}. It is stored as the side
//! that does NOT contain leaf 0, here {2,3}, so both produce `0b1100`.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;

use crate::bitset::Bitset;
use crate::error::Result;
use crate::index::index_info;
use crate::info::ReconciliationInfo;
use crate::tree::PhyloTree;

/// An immutable snapshot of all clades of an indexed tree.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    /// Leaf set of every node, with the reconciliation of each node owning it.
    /// Several nodes share a leaf set only across unary nodes.
    pub splits: HashMap<Bitset, Vec<Option<ReconciliationInfo>>>,

    /// Size of the leaf universe.
    pub num_leaves: usize,
}

impl TreeSnapshot {
    /// Extract a snapshot from an indexed tree.
    ///
    /// # Errors
    /// [`crate::PhyloError::NotIndexed`] if any node lacks index info.
    pub fn from_tree(tree: &PhyloTree) -> Result<Self> {
        let num_leaves = index_info(tree, tree.root())?.total_num_leaves;
        let mut splits: HashMap<Bitset, Vec<Option<ReconciliationInfo>>> = HashMap::new();
        for id in tree.preorder() {
            let info = index_info(tree, id)?;
            splits
                .entry(info.leaves_below.clone())
                .or_default()
                .push(tree[id].recon_info().copied());
        }
        Ok(Self { splits, num_leaves })
    }

    /// True if some node of the snapshotted tree has exactly this leaf set.
    pub fn contains(&self, split: &Bitset) -> bool {
        self.splits.contains_key(split)
    }

    /// True if a node with exactly this leaf set also carries `recon`.
    pub fn contains_with_reconciliation(
        &self,
        split: &Bitset,
        recon: Option<&ReconciliationInfo>,
    ) -> bool {
        self.splits
            .get(split)
            .is_some_and(|recons| recons.iter().any(|r| r.as_ref() == recon))
    }

    /// Non-trivial bipartitions, canonicalized to the side without leaf 0.
    ///
    /// Trivial bipartitions (one leaf against the rest) and the full leaf set
    /// are skipped, so two trees with the same unrooted topology produce
    /// equal sets whatever their rooting.
    pub fn unrooted_splits(&self) -> HashSet<Bitset> {
        self.splits
            .keys()
            .filter_map(|split| {
                let canonical = if split.contains(0) {
                    split.complement(self.num_leaves)
                } else {
                    split.clone()
                };
                let size = canonical.count_ones();
                (size > 1 && size + 1 < self.num_leaves).then_some(canonical)
            })
            .collect()
    }
}

/// Snapshot every tree in parallel, failing on the first unindexed tree.
pub fn build_snapshots(trees: &[PhyloTree]) -> Result<Vec<TreeSnapshot>> {
    trees.par_iter().map(TreeSnapshot::from_tree).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::add_indexed_tree_info;
    use crate::info::ReconciliationEvent;
    use crate::newick;

    fn indexed(s: &str) -> PhyloTree {
        let mut t = newick::parse(s).unwrap();
        add_indexed_tree_info(&mut t).unwrap();
        t
    }

    fn bits(leaves: &[usize], n: usize) -> Bitset {
        let mut b = Bitset::for_leaves(n);
        for &l in leaves {
            b.set(l);
        }
        b
    }

    /// ```text
    ///           root
    ///          /    \
    ///      node1     node2
    ///      /   \     /   \
    ///     0     1   2    node3
    ///                    /   \
    ///                   3     4
    /// ```
    #[test]
    fn test_depth3_tree_splits() {
        let snap = TreeSnapshot::from_tree(&indexed("((0,1),(2,(3,4)));")).unwrap();
        assert_eq!(snap.num_leaves, 5);
        // 5 leaves + 4 internal nodes
        assert_eq!(snap.splits.len(), 9);
        assert!(snap.contains(&bits(&[3, 4], 5)));
        assert!(snap.contains(&bits(&[2, 3, 4], 5)));
        assert!(snap.contains(&bits(&[0, 1, 2, 3, 4], 5)));
        assert!(!snap.contains(&bits(&[1, 2], 5)));
    }

    #[test]
    fn test_unrooted_splits_ignore_root_position() {
        let a = TreeSnapshot::from_tree(&indexed("((0,1),(2,3));")).unwrap();
        let b = TreeSnapshot::from_tree(&indexed("(0,(1,(2,3)));")).unwrap();
        assert_eq!(a.unrooted_splits(), b.unrooted_splits());
        assert_eq!(
            a.unrooted_splits(),
            HashSet::from([bits(&[2, 3], 4)])
        );

        let c = TreeSnapshot::from_tree(&indexed("((0,2),(1,3));")).unwrap();
        assert_ne!(a.unrooted_splits(), c.unrooted_splits());
    }

    #[test]
    fn test_reconciliation_lookup() {
        let mut tree = indexed("((0,1),2);");
        let cherry = tree.children(tree.root())[0];
        let recon = ReconciliationInfo {
            species: 7,
            event: ReconciliationEvent::Duplication,
        };
        tree.info_mut(cherry).recon = Some(recon);
        let snap = TreeSnapshot::from_tree(&tree).unwrap();
        let split = bits(&[0, 1], 3);
        assert!(snap.contains_with_reconciliation(&split, Some(&recon)));
        let other = ReconciliationInfo {
            event: ReconciliationEvent::Speciation,
            ..recon
        };
        assert!(!snap.contains_with_reconciliation(&split, Some(&other)));
        assert!(!snap.contains_with_reconciliation(&split, None));
        assert!(snap.contains_with_reconciliation(&bits(&[2], 3), None));
    }

    #[test]
    fn test_build_snapshots_requires_index() {
        let trees = vec![indexed("(0,1);"), newick::parse("(0,1);").unwrap()];
        assert!(build_snapshots(&trees).is_err());
        assert_eq!(build_snapshots(&trees[..1]).unwrap().len(), 1);
    }
}

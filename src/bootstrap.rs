//! Bootstrap support of a reference topology against replicate trees.
//!
//! Every node of the reference tree defines a split: the set of leaves below
//! it. A replicate supports that split if one of its nodes has exactly the
//! same leaf set. The reconciliation-aware variants additionally require the
//! matching replicate node to map to the same species with the same event,
//! so their support never exceeds the plain one.
//!
//! All trees must be indexed over the same leaf universe (leaves labeled
//! `0..L-1`, see [`crate::index`]).

use std::collections::HashMap;
use std::time::Instant;

use log::info;
use rayon::prelude::*;

use crate::error::{PhyloError, Result};
use crate::index::{add_indexed_tree_info, index_info};
use crate::io::{relabel_leaves_by_index, rename_leaf_nodes};
use crate::reconcile::{reconcile_at_most_binary, LeafToSpecies};
use crate::snapshot::{build_snapshots, TreeSnapshot};
use crate::tree::PhyloTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupportCriterion {
    LeafSet,
    LeafSetAndReconciliation,
}

/// Score `tree` against a single replicate.
pub fn score_from_bootstrap(tree: &PhyloTree, bootstrap: &PhyloTree) -> Result<PhyloTree> {
    score_from_bootstraps(tree, std::slice::from_ref(bootstrap))
}

/// Return a copy of `tree` with `num_bootstraps` and `bootstrap_support`
/// filled in on every node.
///
/// # Errors
/// [`PhyloError::NotIndexed`] if any tree is not indexed and
/// [`PhyloError::LeafSetMismatch`] if a replicate has another leaf universe.
pub fn score_from_bootstraps(tree: &PhyloTree, bootstraps: &[PhyloTree]) -> Result<PhyloTree> {
    score(tree, bootstraps, SupportCriterion::LeafSet)
}

/// Score `tree` against a single replicate, matching reconciliations too.
pub fn score_reconciliation_from_bootstrap(
    tree: &PhyloTree,
    bootstrap: &PhyloTree,
) -> Result<PhyloTree> {
    score_reconciliation_from_bootstraps(tree, std::slice::from_ref(bootstrap))
}

/// Like [`score_from_bootstraps`], but a replicate node only counts if it
/// also carries the same reconciliation (species and event) as the
/// reference node.
pub fn score_reconciliation_from_bootstraps(
    tree: &PhyloTree,
    bootstraps: &[PhyloTree],
) -> Result<PhyloTree> {
    score(tree, bootstraps, SupportCriterion::LeafSetAndReconciliation)
}

fn score(tree: &PhyloTree, bootstraps: &[PhyloTree], criterion: SupportCriterion) -> Result<PhyloTree> {
    let t0 = Instant::now();
    let expected = index_info(tree, tree.root())?.total_num_leaves;
    let snapshots = build_snapshots(bootstraps)?;
    if let Some(bad) = snapshots.iter().find(|s| s.num_leaves != expected) {
        return Err(PhyloError::LeafSetMismatch {
            expected,
            found: bad.num_leaves,
        });
    }

    let total = snapshots.len();
    let mut scored = tree.clone();
    for id in scored.preorder() {
        let split = index_info(&scored, id)?.leaves_below.clone();
        let recon = scored[id].recon_info().copied();
        let supports = |snap: &&TreeSnapshot| match criterion {
            SupportCriterion::LeafSet => snap.contains(&split),
            SupportCriterion::LeafSetAndReconciliation => {
                snap.contains_with_reconciliation(&split, recon.as_ref())
            }
        };
        let count = snapshots.iter().filter(supports).count();

        let info = scored[id]
            .info
            .as_mut()
            .and_then(|i| i.index.as_mut())
            .ok_or(PhyloError::NotIndexed(id))?;
        info.num_bootstraps = count;
        info.bootstrap_support = if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        };
    }
    info!(
        "Scored {} nodes against {} replicates in {:.3}s",
        scored.node_count(),
        total,
        t0.elapsed().as_secs_f64()
    );
    Ok(scored)
}

/// Write each internal, non-root node's support into its label as a rounded percentage.
pub fn label_with_support(tree: &mut PhyloTree) -> Result<()> {
    let root = tree.root();
    for id in tree.preorder() {
        if id == root || tree.is_leaf(id) {
            continue;
        }
        let support = index_info(tree, id)?.bootstrap_support;
        tree[id].label = Some(format!("{}", (support * 100.0).round()));
    }
    Ok(())
}

/// Support labels for trees whose leaves carry taxon names.
///
/// Leaves are numbered by sorted reference name, every tree is indexed
/// (and reconciled when `reconciliation` is given), and the scored
/// reference comes back with support percentages as internal labels and
/// its original leaf names.
pub fn support_for_named_trees(
    reference: &PhyloTree,
    replicates: &[PhyloTree],
    reconciliation: Option<(&PhyloTree, &LeafToSpecies)>,
) -> Result<PhyloTree> {
    let mut names = reference.leaf_labels_below(reference.root());
    names.sort();
    let by_index: Option<(&PhyloTree, LeafToSpecies)> = reconciliation.map(|(species, map)| {
        let indexed = names
            .iter()
            .enumerate()
            .filter_map(|(i, n)| map.get(n).map(|&s| (i.to_string(), s)))
            .collect();
        (species, indexed)
    });
    let prepare = |tree: &PhyloTree| -> Result<PhyloTree> {
        let mut tree = tree.clone();
        tree.clear_phylogeny_info();
        // old support values or species names; replaced by fresh support
        for id in tree.preorder() {
            if !tree.is_leaf(id) {
                tree[id].label = None;
            }
        }
        relabel_leaves_by_index(&mut tree, &names)?;
        add_indexed_tree_info(&mut tree)?;
        if let Some((species, map)) = &by_index {
            reconcile_at_most_binary(&mut tree, species, map, false)?;
        }
        Ok(tree)
    };

    let reference = prepare(reference)?;
    let replicates = replicates.par_iter().map(prepare).collect::<Result<Vec<_>>>()?;
    let mut scored = match by_index {
        Some(_) => score_reconciliation_from_bootstraps(&reference, &replicates)?,
        None => score_from_bootstraps(&reference, &replicates)?,
    };
    label_with_support(&mut scored)?;
    let restore: HashMap<String, String> = names
        .into_iter()
        .enumerate()
        .map(|(i, n)| (i.to_string(), n))
        .collect();
    rename_leaf_nodes(&mut scored, &restore)?;
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{add_indexed_tree_info, get_mrca};
    use crate::info::{ReconciliationEvent, ReconciliationInfo};
    use crate::newick;

    fn indexed(s: &str) -> PhyloTree {
        let mut t = newick::parse(s).unwrap();
        add_indexed_tree_info(&mut t).unwrap();
        t
    }

    fn support_of(tree: &PhyloTree, a: usize, b: usize) -> f64 {
        let node = get_mrca(tree, a, b).unwrap();
        index_info(tree, node).unwrap().bootstrap_support
    }

    #[test]
    fn counts_identical_splits() {
        let reference = indexed("((0,1),(2,3));");
        let replicates = vec![
            indexed("((0,1),(2,3));"),
            indexed("((0,2),(1,3));"),
            indexed("((1,0),2,3);"),
        ];
        let scored = score_from_bootstraps(&reference, &replicates).unwrap();
        assert!((support_of(&scored, 0, 1) - 2.0 / 3.0).abs() < 1e-12);
        assert!((support_of(&scored, 2, 3) - 1.0 / 3.0).abs() < 1e-12);
        let root = index_info(&scored, scored.root()).unwrap();
        assert_eq!(root.num_bootstraps, 3);
        assert_eq!(root.bootstrap_support, 1.0);
        for leaf in scored.leaves() {
            assert_eq!(index_info(&scored, leaf).unwrap().bootstrap_support, 1.0);
        }
        // the input is left untouched
        assert_eq!(index_info(&reference, reference.root()).unwrap().num_bootstraps, 0);
    }

    #[test]
    fn support_is_exactly_zero_or_one() {
        let reference = indexed("((0,1),(2,3));");
        let absent = vec![indexed("((0,2),(1,3));"), indexed("((0,3),(1,2));")];
        let scored = score_from_bootstraps(&reference, &absent).unwrap();
        assert_eq!(support_of(&scored, 0, 1), 0.0);

        let present = vec![reference.clone(), reference.clone()];
        let scored = score_from_bootstraps(&reference, &present).unwrap();
        assert_eq!(support_of(&scored, 0, 1), 1.0);
        assert_eq!(support_of(&scored, 2, 3), 1.0);

        let single = score_from_bootstrap(&reference, &reference).unwrap();
        assert_eq!(support_of(&single, 2, 3), 1.0);

        let none = score_from_bootstraps(&reference, &[]).unwrap();
        assert_eq!(support_of(&none, 2, 3), 0.0);
    }

    #[test]
    fn reconciliation_support_never_exceeds_plain_support() {
        let tag = |tree: &mut PhyloTree, a: usize, b: usize, event| {
            let node = get_mrca(tree, a, b).unwrap();
            tree.info_mut(node).recon = Some(ReconciliationInfo { species: 1, event });
        };
        let mut reference = indexed("((0,1),(2,3));");
        tag(&mut reference, 0, 1, ReconciliationEvent::Duplication);

        let mut same = indexed("((0,1),(2,3));");
        tag(&mut same, 0, 1, ReconciliationEvent::Duplication);
        let mut different = indexed("((0,1),(2,3));");
        tag(&mut different, 0, 1, ReconciliationEvent::Speciation);
        let replicates = vec![same, different];

        let plain = score_from_bootstraps(&reference, &replicates).unwrap();
        let recon = score_reconciliation_from_bootstraps(&reference, &replicates).unwrap();
        assert_eq!(support_of(&plain, 0, 1), 1.0);
        assert_eq!(support_of(&recon, 0, 1), 0.5);
        for id in plain.preorder() {
            assert!(
                index_info(&recon, id).unwrap().bootstrap_support
                    <= index_info(&plain, id).unwrap().bootstrap_support
            );
        }
        let one = score_reconciliation_from_bootstrap(&reference, &replicates[1]).unwrap();
        assert_eq!(support_of(&one, 0, 1), 0.0);
    }

    #[test]
    fn rejects_mismatched_leaf_sets() {
        let reference = indexed("((0,1),(2,3));");
        let bigger = indexed("((0,1),(2,(3,4)));");
        assert!(matches!(
            score_from_bootstrap(&reference, &bigger),
            Err(PhyloError::LeafSetMismatch { expected: 4, found: 5 })
        ));
    }

    #[test]
    fn named_trees() {
        let reference = newick::parse("(((a,b),c),d);").unwrap();
        let replicates = vec![
            newick::parse("(d,(c,(b,a)));").unwrap(),
            newick::parse("(((a,c),b),d);").unwrap(),
        ];
        let scored = support_for_named_trees(&reference, &replicates, None).unwrap();
        assert_eq!(newick::write(&scored), "(((a,b)50,c)100,d);");

        let species = newick::parse("((A,B),(C,D));").unwrap();
        let map: LeafToSpecies = ["a", "b", "c", "d"]
            .iter()
            .map(|g| (g.to_string(), species.leaf_by_label(&g.to_uppercase()).unwrap()))
            .collect();
        // the second replicate maps the {a,b,c} clade to a duplication
        let scored = support_for_named_trees(&reference, &replicates, Some((&species, &map))).unwrap();
        assert_eq!(newick::write(&scored), "(((a,b)50,c)50,d);");

        let stranger = vec![newick::parse("((a,b),(c,e));").unwrap()];
        assert!(support_for_named_trees(&reference, &stranger, None).is_err());
    }

    #[test]
    fn named_trees_with_internal_labels() {
        let reference = newick::parse("(((a,b)90,c)75,d);").unwrap();
        let replicates = vec![
            newick::parse("(((a,b),c),d);").unwrap(),
            newick::parse("(((a,b)AB,c)ABC,d)root;").unwrap(),
        ];
        let scored = support_for_named_trees(&reference, &replicates, None).unwrap();
        assert_eq!(newick::write(&scored), "(((a,b)100,c)100,d);");
    }

    #[test]
    fn support_labels() {
        let reference = indexed("(((0,1),2),3);");
        let replicates = vec![indexed("(((0,1),2),3);"), indexed("(((0,2),1),3);")];
        let mut scored = score_from_bootstraps(&reference, &replicates).unwrap();
        label_with_support(&mut scored).unwrap();
        assert_eq!(newick::write(&scored), "(((0,1)50,2)100,3);");
    }
}

//! Gene tree / species tree reconciliation by LCA mapping.
//!
//! Each gene leaf maps to the species its label is assigned to; each
//! internal gene node maps to the MRCA of its children's species. A node is
//! a duplication when it maps to the same species as one of its children,
//! otherwise a speciation. Losses are the species lineages a gene edge
//! skips over.
//!
//! ```text
//! species ((A,B),C)          gene ((a,c),b)
//!
//!     root                       root -> root  Dup
//!    /    \                     /    \
//!  AB      C               x -> root  b -> B
//!  / \                       / \
//! A   B                 a -> A  c -> C
//!
//! 1 duplication, 3 losses
//! ```

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;

use crate::error::{PhyloError, Result};
use crate::info::{ReconciliationEvent, ReconciliationInfo};
use crate::tree::{NodeId, PhyloTree};

/// Species-tree node of every gene leaf, keyed by gene leaf label.
pub type LeafToSpecies = HashMap<String, NodeId>;

/// Build a [`LeafToSpecies`] from (gene leaf label, species leaf label) pairs.
///
/// # Errors
/// [`PhyloError::MissingMapping`] if a species label names no leaf of `species`.
pub fn leaf_to_species_from_labels(
    species: &PhyloTree,
    pairs: &[(String, String)],
) -> Result<LeafToSpecies> {
    let species_leaves: HashMap<&str, NodeId> = species
        .leaves()
        .into_iter()
        .filter_map(|id| species[id].label.as_deref().map(|l| (l, id)))
        .collect();
    pairs
        .iter()
        .map(|(gene, sp)| {
            let id = species_leaves.get(sp.as_str()).copied().ok_or_else(|| {
                PhyloError::MissingMapping(format!("species '{sp}' of gene '{gene}' is not a species leaf"))
            })?;
            Ok((gene.clone(), id))
        })
        .collect()
}

/// Duplications and losses implied by a reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationCost {
    pub dups: usize,
    pub losses: usize,
}

/// Reconcile a binary gene tree in place.
///
/// With `relabel_ancestors`, unlabeled internal gene nodes take the label of
/// the species node they map to.
///
/// # Errors
/// [`PhyloError::NonBinaryTree`] if the gene tree is not binary,
/// [`PhyloError::MissingMapping`] for a gene leaf without a species.
pub fn reconcile_binary(
    gene: &mut PhyloTree,
    species: &PhyloTree,
    leaf_to_species: &LeafToSpecies,
    relabel_ancestors: bool,
) -> Result<()> {
    gene.ensure_binary()?;
    reconcile(gene, species, leaf_to_species, relabel_ancestors)
}

/// Reconcile a gene tree of any arity in place.
///
/// A multifurcating node maps to the MRCA of its children's species, folded
/// left to right, and is a duplication if that MRCA is one of them. A unary
/// node maps to its child's species and counts as a speciation.
pub fn reconcile_at_most_binary(
    gene: &mut PhyloTree,
    species: &PhyloTree,
    leaf_to_species: &LeafToSpecies,
    relabel_ancestors: bool,
) -> Result<()> {
    reconcile(gene, species, leaf_to_species, relabel_ancestors)
}

fn reconcile(
    gene: &mut PhyloTree,
    species: &PhyloTree,
    leaf_to_species: &LeafToSpecies,
    relabel_ancestors: bool,
) -> Result<()> {
    for id in gene.postorder() {
        let recon = if gene.is_leaf(id) {
            let label = gene[id]
                .label
                .as_deref()
                .ok_or_else(|| PhyloError::MissingMapping(format!("gene leaf {id} is unlabeled")))?;
            let mapped = *leaf_to_species.get(label).ok_or_else(|| {
                PhyloError::MissingMapping(format!("gene leaf '{label}' has no species"))
            })?;
            if species.get(mapped).is_none() {
                return Err(PhyloError::MissingMapping(format!(
                    "gene leaf '{label}' maps to unknown species node {mapped}"
                )));
            }
            ReconciliationInfo {
                species: mapped,
                event: ReconciliationEvent::Leaf,
            }
        } else {
            let child_species = gene
                .children(id)
                .iter()
                .map(|&c| {
                    gene[c]
                        .recon_info()
                        .map(|r| r.species)
                        .ok_or(PhyloError::NotReconciled(c))
                })
                .collect::<Result<Vec<NodeId>>>()?;
            let mut mapped = child_species[0];
            for &s in &child_species[1..] {
                mapped = species.mrca(mapped, s);
            }
            let event = if child_species.len() > 1 && child_species.contains(&mapped) {
                ReconciliationEvent::Duplication
            } else {
                ReconciliationEvent::Speciation
            };
            ReconciliationInfo {
                species: mapped,
                event,
            }
        };

        gene.info_mut(id).recon = Some(recon);
        if relabel_ancestors && !gene.is_leaf(id) && gene[id].label.is_none() {
            gene[id].label = species[recon.species].label.clone();
        }
    }
    Ok(())
}

/// Cost of reconciling a copy of `gene`; the input is left untouched.
pub fn reconciliation_cost_binary(
    gene: &PhyloTree,
    species: &PhyloTree,
    leaf_to_species: &LeafToSpecies,
) -> Result<ReconciliationCost> {
    let mut reconciled = gene.clone();
    reconcile_binary(&mut reconciled, species, leaf_to_species, false)?;
    count_events(&reconciled, species)
}

/// Cost of a tree that already carries reconciliation info.
///
/// # Errors
/// [`PhyloError::NotReconciled`] if a node has no reconciliation info.
pub fn reconciliation_cost_at_most_binary(
    reconciled: &PhyloTree,
    species: &PhyloTree,
) -> Result<ReconciliationCost> {
    count_events(reconciled, species)
}

/// Losses on a gene edge are the species edges between the two mappings,
/// less the one edge a speciation accounts for.
///
/// The edge is discounted when the parent is a speciation, not when the
/// child is a duplication: a duplication keeps its lineage in the parent's
/// species, so every species edge down to the child is a loss.
fn count_events(tree: &PhyloTree, species: &PhyloTree) -> Result<ReconciliationCost> {
    let mut cost = ReconciliationCost::default();
    for id in tree.preorder() {
        let recon = tree[id].recon_info().ok_or(PhyloError::NotReconciled(id))?;
        if recon.event == ReconciliationEvent::Duplication {
            cost.dups += 1;
        }
        for &c in tree.children(id) {
            let child = tree[c].recon_info().ok_or(PhyloError::NotReconciled(c))?;
            let path = species.path_length(recon.species, child.species);
            cost.losses += match recon.event {
                ReconciliationEvent::Speciation => path.saturating_sub(1),
                _ => path,
            };
        }
    }
    Ok(cost)
}

/// Reroot a binary gene tree on the edge that minimizes duplications and
/// return it reconciled.
///
/// Every edge of the unrooted view is tried; the first minimum in pre-order
/// of edges wins.
pub fn root_and_reconcile_binary(
    gene: &PhyloTree,
    species: &PhyloTree,
    leaf_to_species: &LeafToSpecies,
) -> Result<PhyloTree> {
    root_and_reconcile(gene, species, leaf_to_species, reconcile_binary)
}

/// Like [`root_and_reconcile_binary`] for trees with unary or
/// multifurcating nodes.
pub fn root_and_reconcile_at_most_binary(
    gene: &PhyloTree,
    species: &PhyloTree,
    leaf_to_species: &LeafToSpecies,
) -> Result<PhyloTree> {
    root_and_reconcile(gene, species, leaf_to_species, reconcile_at_most_binary)
}

type ReconcileFn = fn(&mut PhyloTree, &PhyloTree, &LeafToSpecies, bool) -> Result<()>;

fn root_and_reconcile(
    gene: &PhyloTree,
    species: &PhyloTree,
    leaf_to_species: &LeafToSpecies,
    reconcile_fn: ReconcileFn,
) -> Result<PhyloTree> {
    let t0 = Instant::now();
    let edges = gene.unrooted_edges();
    if edges.is_empty() {
        let mut tree = gene.clone();
        reconcile_fn(&mut tree, species, leaf_to_species, false)?;
        return Ok(tree);
    }

    let costs = edges
        .par_iter()
        .map(|edge| {
            let mut candidate = gene.reroot(edge);
            reconcile_fn(&mut candidate, species, leaf_to_species, false)?;
            count_events(&candidate, species)
        })
        .collect::<Result<Vec<ReconciliationCost>>>()?;

    let mut best = 0;
    for (i, cost) in costs.iter().enumerate() {
        if cost.dups < costs[best].dups {
            best = i;
        }
    }
    debug!(
        "best of {} rootings is edge {} with {} dups and {} losses",
        edges.len(),
        best,
        costs[best].dups,
        costs[best].losses
    );

    let mut tree = gene.reroot(&edges[best]);
    reconcile_fn(&mut tree, species, leaf_to_species, false)?;
    info!(
        "Searched {} rootings in {:.3}s",
        edges.len(),
        t0.elapsed().as_secs_f64()
    );
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick;
    use std::collections::BTreeSet;

    fn species() -> PhyloTree {
        newick::parse("((A,B)AB,(C,D)CD)root;").unwrap()
    }

    /// Gene leaf `a2` maps to species leaf `A`, and so on.
    fn mapping(species: &PhyloTree, genes: &[&str]) -> LeafToSpecies {
        genes
            .iter()
            .map(|g| {
                let s = g[..1].to_uppercase();
                (g.to_string(), species.leaf_by_label(&s).unwrap())
            })
            .collect()
    }

    fn root_splits(t: &PhyloTree) -> BTreeSet<BTreeSet<String>> {
        t.children(t.root())
            .iter()
            .map(|&c| t.leaf_labels_below(c).into_iter().collect())
            .collect()
    }

    #[test]
    fn identical_topology_costs_nothing() {
        let s = species();
        let map = mapping(&s, &["a", "b", "c", "d"]);
        let mut gene = newick::parse("((a,b),(c,d));").unwrap();
        reconcile_binary(&mut gene, &s, &map, false).unwrap();
        let root = gene[gene.root()].recon_info().unwrap();
        assert_eq!(root.species, s.root());
        assert_eq!(root.event, ReconciliationEvent::Speciation);
        for leaf in gene.leaves() {
            assert_eq!(gene[leaf].recon_info().unwrap().event, ReconciliationEvent::Leaf);
        }
        assert_eq!(
            reconciliation_cost_at_most_binary(&gene, &s).unwrap(),
            ReconciliationCost { dups: 0, losses: 0 }
        );
    }

    #[test]
    fn duplicated_pair_adds_one_dup() {
        let s = species();
        let map = mapping(&s, &["a1", "a2", "b", "c", "d"]);
        let gene = newick::parse("(((a1,a2),b),(c,d));").unwrap();
        assert_eq!(
            reconciliation_cost_binary(&gene, &s, &map).unwrap(),
            ReconciliationCost { dups: 1, losses: 0 }
        );
        // the input was not annotated
        assert!(gene[gene.root()].recon_info().is_none());
    }

    #[test]
    fn counts_losses() {
        let s = newick::parse("((A,B),C);").unwrap();
        let map = mapping(&s, &["a", "b", "c"]);
        let gene = newick::parse("((a,c),b);").unwrap();
        assert_eq!(
            reconciliation_cost_binary(&gene, &s, &map).unwrap(),
            ReconciliationCost { dups: 1, losses: 3 }
        );
    }

    #[test]
    fn relabels_ancestors() {
        let s = species();
        let map = mapping(&s, &["a", "b", "c", "d"]);
        let mut gene = newick::parse("((a,b),(c,d));").unwrap();
        reconcile_binary(&mut gene, &s, &map, true).unwrap();
        assert_eq!(newick::write(&gene), "((a,b)AB,(c,d)CD)root;");
    }

    #[test]
    fn reports_missing_species() {
        let s = species();
        let map = mapping(&s, &["a", "b", "c"]);
        let mut gene = newick::parse("((a,b),(c,d));").unwrap();
        assert!(matches!(
            reconcile_binary(&mut gene, &s, &map, false),
            Err(PhyloError::MissingMapping(_))
        ));
    }

    #[test]
    fn binary_and_at_most_binary_inputs() {
        let s = species();
        let map = mapping(&s, &["a", "b", "c", "d"]);
        let mut flat = newick::parse("(a,b,(c,d));").unwrap();
        assert!(matches!(
            reconcile_binary(&mut flat, &s, &map, false),
            Err(PhyloError::NonBinaryTree { children: 3, .. })
        ));
        reconcile_at_most_binary(&mut flat, &s, &map, false).unwrap();

        // root -> (x -> a), b
        let mut unary = PhyloTree::new();
        let x = unary.add_child(0, None, None).unwrap();
        unary.add_child(x, Some("a".into()), None).unwrap();
        unary.add_child(0, Some("b".into()), None).unwrap();
        assert!(reconcile_binary(&mut unary.clone(), &s, &map, false).is_err());
        reconcile_at_most_binary(&mut unary, &s, &map, false).unwrap();
        let a = s.leaf_by_label("A").unwrap();
        assert_eq!(
            unary[x].recon_info(),
            Some(&ReconciliationInfo {
                species: a,
                event: ReconciliationEvent::Speciation
            })
        );
        assert_eq!(
            reconciliation_cost_at_most_binary(&unary, &s).unwrap(),
            ReconciliationCost { dups: 0, losses: 0 }
        );
    }

    #[test]
    fn cost_of_unreconciled_tree_fails() {
        let s = species();
        let gene = newick::parse("((a,b),(c,d));").unwrap();
        assert!(matches!(
            reconciliation_cost_at_most_binary(&gene, &s),
            Err(PhyloError::NotReconciled(_))
        ));
    }

    #[test]
    fn rerooting_finds_the_species_root() {
        let s = species();
        let map = mapping(&s, &["a", "b", "c", "d"]);
        let gene = newick::parse("(a,(b,(c,d)));").unwrap();
        assert_eq!(reconciliation_cost_binary(&gene, &s, &map).unwrap().dups, 1);

        let best = root_and_reconcile_binary(&gene, &s, &map).unwrap();
        let expected: BTreeSet<BTreeSet<String>> = [
            BTreeSet::from(["a".to_string(), "b".to_string()]),
            BTreeSet::from(["c".to_string(), "d".to_string()]),
        ]
        .into_iter()
        .collect();
        assert_eq!(root_splits(&best), expected);
        let best_cost = reconciliation_cost_at_most_binary(&best, &s).unwrap();
        assert_eq!(best_cost.dups, 0);

        for edge in gene.unrooted_edges() {
            let candidate = gene.reroot(&edge);
            let cost = reconciliation_cost_binary(&candidate, &s, &map).unwrap();
            assert!(best_cost.dups <= cost.dups);
        }

        let also = root_and_reconcile_at_most_binary(&gene, &s, &map).unwrap();
        assert_eq!(root_splits(&also), expected);
    }

    #[test]
    fn rerooting_never_worse_with_duplications() {
        let s = species();
        let map = mapping(&s, &["a1", "a2", "b", "c1", "c2", "d"]);
        let gene = newick::parse("((a1,(c1,d)),(b,(a2,c2)));").unwrap();
        let best = root_and_reconcile_binary(&gene, &s, &map).unwrap();
        let best_dups = reconciliation_cost_at_most_binary(&best, &s).unwrap().dups;
        for edge in gene.unrooted_edges() {
            let cost = reconciliation_cost_binary(&gene.reroot(&edge), &s, &map).unwrap();
            assert!(best_dups <= cost.dups);
        }
    }

    #[test]
    fn mapping_from_labels() {
        let s = species();
        let pairs = vec![
            ("g1".to_string(), "A".to_string()),
            ("g2".to_string(), "D".to_string()),
        ];
        let map = leaf_to_species_from_labels(&s, &pairs).unwrap();
        assert_eq!(map["g2"], s.leaf_by_label("D").unwrap());
        let bad = vec![("g3".to_string(), "AB".to_string())];
        assert!(matches!(
            leaf_to_species_from_labels(&s, &bad),
            Err(PhyloError::MissingMapping(_))
        ));
    }

    #[test]
    fn single_leaf_gene_tree() {
        let s = species();
        let map = mapping(&s, &["a"]);
        let gene = newick::parse("a;").unwrap();
        let tree = root_and_reconcile_binary(&gene, &s, &map).unwrap();
        assert_eq!(tree[0].recon_info().unwrap().event, ReconciliationEvent::Leaf);
    }

    #[test]
    fn polytomy_folds_children() {
        let s = species();
        let map = mapping(&s, &["a", "b", "c", "d"]);
        let mut gene = newick::parse("((a,b,c),d);").unwrap();
        reconcile_at_most_binary(&mut gene, &s, &map, false).unwrap();
        let poly = gene.children(gene.root())[0];
        assert_eq!(gene.children(poly).len(), 3);
        // mrca(mrca(A, B), C) is the species root, which is none of A, B, C
        assert_eq!(
            gene[poly].recon_info(),
            Some(&ReconciliationInfo {
                species: s.root(),
                event: ReconciliationEvent::Speciation
            })
        );
        // the root joins the species root with D
        assert_eq!(
            gene[gene.root()].recon_info().unwrap().event,
            ReconciliationEvent::Duplication
        );

        let mut dup = newick::parse("(a1,a2,b);").unwrap();
        let map = mapping(&s, &["a1", "a2", "b"]);
        reconcile_at_most_binary(&mut dup, &s, &map, false).unwrap();
        let ab = s.mrca(s.leaf_by_label("A").unwrap(), s.leaf_by_label("B").unwrap());
        let root = dup[dup.root()].recon_info().unwrap();
        assert_eq!(root.species, ab);
        assert_eq!(root.event, ReconciliationEvent::Speciation);

        let gene = newick::parse("((a,b,c),d);").unwrap();
        let map = mapping(&s, &["a", "b", "c", "d"]);
        let best = root_and_reconcile_at_most_binary(&gene, &s, &map).unwrap();
        assert!(best.preorder().iter().all(|&id| best[id].recon_info().is_some()));
    }

    #[test]
    fn rerooting_skips_a_unary_root() {
        let s = species();
        let map = mapping(&s, &["a", "b", "c"]);
        let gene = newick::parse("(((a,b),c));").unwrap();
        let mut plain = gene.clone();
        reconcile_at_most_binary(&mut plain, &s, &map, false).unwrap();

        let best = root_and_reconcile_at_most_binary(&gene, &s, &map).unwrap();
        assert_eq!(best.leaf_count(), 3);
        assert_eq!(reconciliation_cost_at_most_binary(&best, &s).unwrap().dups, 0);
    }

    #[test]
    fn rerooting_tie_keeps_first_edge() {
        // all copies in one species: every rooting has two duplications
        let s = species();
        let map = mapping(&s, &["a1", "a2", "a3"]);
        let gene = newick::parse("(a1,(a2,a3));").unwrap();
        let edges = gene.unrooted_edges();
        let dups: Vec<usize> = edges
            .iter()
            .map(|e| reconciliation_cost_binary(&gene.reroot(e), &s, &map).unwrap().dups)
            .collect();
        assert_eq!(dups, vec![2, 2, 2]);

        let best = root_and_reconcile_binary(&gene, &s, &map).unwrap();
        let expected: BTreeSet<BTreeSet<String>> = [
            BTreeSet::from(["a1".to_string()]),
            BTreeSet::from(["a2".to_string(), "a3".to_string()]),
        ]
        .into_iter()
        .collect();
        assert_eq!(root_splits(&best), expected);
        assert_ne!(root_splits(&gene.reroot(&edges[1])), expected);
    }
}

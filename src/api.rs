//! Python binding layer.
//!
//! Trees cross the boundary as Newick strings and matrices as nested lists;
//! every library error becomes a `ValueError`.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::collections::HashMap;

use crate::bootstrap::support_for_named_trees;
use crate::error::PhyloError;
use crate::io::rename_leaf_nodes;
use crate::join_cost::compute_join_costs;
use crate::matrix::SquareMatrix;
use crate::newick;
use crate::nj;
use crate::reconcile::{
    leaf_to_species_from_labels, reconcile_binary, reconciliation_cost_at_most_binary,
    root_and_reconcile_binary,
};
use crate::tree::PhyloTree;

fn to_py(e: PhyloError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse_tree(newick_str: &str, what: &str) -> PyResult<PhyloTree> {
    newick::parse(newick_str)
        .map_err(|e| PyValueError::new_err(format!("Failed to parse {what} tree: {e}")))
}

/// Build a neighbor-joining tree from a square distance matrix.
///
/// Args:
///     distances: Square matrix as a list of rows; only the lower triangle is read
///     names: Taxon names, one per row (default: row indices)
///     outgroups: Row indices to root on (default: midpoint of the longest branch)
///
/// Returns:
///     The rooted tree as a Newick string
///
/// Raises:
///     ValueError: For fewer than 3 taxa, a non-square matrix or unknown outgroups
#[pyfunction]
#[pyo3(signature = (distances, names=None, outgroups=None))]
fn neighbor_join(
    distances: Vec<Vec<f64>>,
    names: Option<Vec<String>>,
    outgroups: Option<Vec<usize>>,
) -> PyResult<String> {
    let matrix = SquareMatrix::from_rows(distances).map_err(to_py)?;
    if let Some(names) = &names {
        if names.len() != matrix.len() {
            return Err(PyValueError::new_err(format!(
                "{} names for {} rows",
                names.len(),
                matrix.len()
            )));
        }
    }
    let mut tree = nj::neighbor_join(&matrix, outgroups.as_deref()).map_err(to_py)?;
    if let Some(names) = names {
        let translate: HashMap<String, String> = names
            .into_iter()
            .enumerate()
            .map(|(i, n)| (i.to_string(), n))
            .collect();
        rename_leaf_nodes(&mut tree, &translate).map_err(to_py)?;
    }
    Ok(newick::write(&tree))
}

/// Label a reference tree with bootstrap support from replicate trees.
///
/// Args:
///     reference: Reference tree (Newick)
///     replicates: Replicate trees (Newick) over the same taxa
///     species: Species tree (Newick); with `mapping`, support also requires
///         matching reconciliations (default: None)
///     mapping: Dict from gene leaf name to species leaf name (default: None)
///
/// Returns:
///     The reference tree as Newick with support percentages as internal labels
///
/// Raises:
///     ValueError: If a tree fails to parse or the taxa differ
#[pyfunction]
#[pyo3(signature = (reference, replicates, species=None, mapping=None))]
fn bootstrap_support(
    reference: String,
    replicates: Vec<String>,
    species: Option<String>,
    mapping: Option<HashMap<String, String>>,
) -> PyResult<String> {
    let reference = parse_tree(&reference, "reference")?;
    let replicates = replicates
        .iter()
        .map(|r| parse_tree(r, "replicate"))
        .collect::<PyResult<Vec<_>>>()?;

    let recon = match (species, mapping) {
        (Some(species), Some(mapping)) => {
            let species = parse_tree(&species, "species")?;
            let pairs: Vec<(String, String)> = mapping.into_iter().collect();
            let map = leaf_to_species_from_labels(&species, &pairs).map_err(to_py)?;
            Some((species, map))
        }
        (None, None) => None,
        _ => {
            return Err(PyValueError::new_err(
                "species and mapping must be given together",
            ));
        }
    };

    let scored = support_for_named_trees(
        &reference,
        &replicates,
        recon.as_ref().map(|(species, map)| (species, map)),
    )
    .map_err(to_py)?;
    Ok(newick::write(&scored))
}

/// Reconcile a binary gene tree with a species tree.
///
/// Args:
///     gene: Gene tree (Newick)
///     species: Species tree (Newick)
///     mapping: Dict from gene leaf name to species leaf name
///     reroot: Search all rootings for the fewest duplications (default: False)
///     relabel: Label internal gene nodes with their species (default: True)
///
/// Returns:
///     A tuple of (newick, duplications, losses)
///
/// Raises:
///     ValueError: If a tree fails to parse, is not binary, or a leaf is unmapped
#[pyfunction]
#[pyo3(signature = (gene, species, mapping, reroot=false, relabel=true))]
fn reconcile(
    gene: String,
    species: String,
    mapping: HashMap<String, String>,
    reroot: bool,
    relabel: bool,
) -> PyResult<(String, usize, usize)> {
    let gene = parse_tree(&gene, "gene")?;
    let species = parse_tree(&species, "species")?;
    let pairs: Vec<(String, String)> = mapping.into_iter().collect();
    let map = leaf_to_species_from_labels(&species, &pairs).map_err(to_py)?;

    let mut tree = if reroot {
        root_and_reconcile_binary(&gene, &species, &map).map_err(to_py)?
    } else {
        gene
    };
    reconcile_binary(&mut tree, &species, &map, relabel).map_err(to_py)?;
    let cost = reconciliation_cost_at_most_binary(&tree, &species).map_err(to_py)?;
    Ok((newick::write(&tree), cost.dups, cost.losses))
}

/// Duplication/loss cost of joining lineages of every pair of species nodes.
///
/// Args:
///     species: Binary species tree (Newick)
///     dup_cost: Cost of one duplication (default: 1.0)
///     loss_cost: Cost of one loss (default: 1.0)
///
/// Returns:
///     A tuple of (node_names, cost_matrix); unlabeled nodes are named `node{id}`
///
/// Raises:
///     ValueError: If the species tree fails to parse or is not binary
#[pyfunction]
#[pyo3(signature = (species, dup_cost=1.0, loss_cost=1.0))]
fn join_costs(
    species: String,
    dup_cost: f64,
    loss_cost: f64,
) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    let species = parse_tree(&species, "species")?;
    let (costs, index) = compute_join_costs(&species, dup_cost, loss_cost).map_err(to_py)?;
    let names = (0..index.len())
        .filter_map(|i| index.species_at(i))
        .map(|s| species[s].label.clone().unwrap_or_else(|| format!("node{s}")))
        .collect();
    Ok((names, costs.to_rows()))
}

/// Python module definition
#[pymodule]
fn rust_python_phylogeny(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(neighbor_join, m)?)?;
    m.add_function(wrap_pyfunction!(bootstrap_support, m)?)?;
    m.add_function(wrap_pyfunction!(reconcile, m)?)?;
    m.add_function(wrap_pyfunction!(join_costs, m)?)?;
    Ok(())
}

use clap::{Args, Parser, Subcommand};
use log::{error, info, LevelFilter};
use rust_python_phylogeny::bootstrap::support_for_named_trees;
use rust_python_phylogeny::guided::guided_neighbor_joining;
use rust_python_phylogeny::io::{
    read_beast_trees, read_mapping_tsv, read_matrix_tsv, read_newick_trees, rename_leaf_nodes,
    write_matrix_tsv, write_newick_trees,
};
use rust_python_phylogeny::join_cost::{compute_join_costs, get_mrca_matrix};
use rust_python_phylogeny::matrix::SimilarityMatrix;
use rust_python_phylogeny::nj::neighbor_join;
use rust_python_phylogeny::reconcile::{
    leaf_to_species_from_labels, reconcile_at_most_binary, reconcile_binary,
    reconciliation_cost_at_most_binary, root_and_reconcile_at_most_binary,
    root_and_reconcile_binary,
};
use rust_python_phylogeny::{PhyloError, PhyloTree};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

const EXIT_INPUT: i32 = 2;
const EXIT_ALGORITHM: i32 = 3;
const EXIT_OUTPUT: i32 = 4;

/// Build, score and reconcile phylogenetic trees from distance data.
#[derive(Parser, Debug)]
#[command(name = "rust-python-phylogeny", version, about = "Neighbor-joining, bootstrap support and reconciliation")]
struct Cli {
    /// Quiet mode: only warnings and errors are logged
    #[arg(short = 'q', long = "quiet", global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Neighbor-join a labeled distance matrix (TSV) into a Newick tree
    Nj(NjArgs),
    /// Neighbor-join a similarity matrix guided by a species tree
    Guided(GuidedArgs),
    /// Write the species-tree join-cost matrix (TSV)
    JoinCosts(JoinCostArgs),
    /// Label a reference tree with bootstrap support from replicate trees
    Bootstrap(BootstrapArgs),
    /// Reconcile gene trees with a species tree
    Reconcile(ReconcileArgs),
}

#[derive(Args, Debug)]
struct NjArgs {
    /// Square distance matrix, TSV with a header row (optionally .gz)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Root on the longest branch leading to one of these taxa
    #[arg(long = "outgroup")]
    outgroups: Vec<String>,

    /// Output Newick file
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct CostArgs {
    /// Species tree in Newick format (must be binary)
    #[arg(short = 's', long = "species")]
    species: PathBuf,

    /// Cost of one duplication
    #[arg(long = "dup-cost", default_value_t = 1.0)]
    dup_cost: f64,

    /// Cost of one loss
    #[arg(long = "loss-cost", default_value_t = 1.0)]
    loss_cost: f64,
}

#[derive(Args, Debug)]
struct GuidedArgs {
    /// Similarity counts above the diagonal, dissimilarity counts below (TSV)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Two-column TSV: gene name, species leaf
    #[arg(short = 'm', long = "mapping")]
    mapping: PathBuf,

    #[command(flatten)]
    costs: CostArgs,

    /// Label internal nodes with the species they map to
    #[arg(long = "relabel", default_value_t = false)]
    relabel: bool,

    /// Output Newick file
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct JoinCostArgs {
    #[command(flatten)]
    costs: CostArgs,

    /// Output TSV matrix (.gz for compressed output)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct BootstrapArgs {
    /// Reference tree (Newick)
    #[arg(short = 'r', long = "reference")]
    reference: PathBuf,

    /// Replicate trees: Newick file, or BEAST .trees (NEXUS) file
    #[arg(short = 'b', long = "replicates")]
    replicates: PathBuf,

    /// Burn-in by number of trees (BEAST input only)
    #[arg(short = 't', long = "burnin-trees", default_value_t = 0)]
    burnin_trees: usize,

    /// Burn-in by state, keep trees with STATE_ > value (BEAST input only)
    #[arg(short = 's', long = "burnin-states", default_value_t = 0)]
    burnin_states: usize,

    /// Use TRANSLATE block to map taxon IDs to labels (BEAST input only)
    #[arg(long = "use-real-taxa", default_value_t = false)]
    use_real_taxa: bool,

    /// Species tree; with --mapping, support also requires matching reconciliations
    #[arg(long = "species", requires = "mapping")]
    species: Option<PathBuf>,

    /// Two-column TSV: gene leaf, species leaf
    #[arg(long = "mapping", requires = "species")]
    mapping: Option<PathBuf>,

    /// Output Newick file with support percentages as internal labels
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ReconcileArgs {
    /// Gene trees (Newick, one per statement)
    #[arg(short = 'g', long = "gene")]
    gene: PathBuf,

    /// Species tree (Newick)
    #[arg(short = 's', long = "species")]
    species: PathBuf,

    /// Two-column TSV: gene leaf, species leaf
    #[arg(short = 'm', long = "mapping")]
    mapping: PathBuf,

    /// Search all rootings for the minimum number of duplications
    #[arg(long = "reroot", default_value_t = false)]
    reroot: bool,

    /// Accept unary and multifurcating nodes
    #[arg(long = "at-most-binary", default_value_t = false)]
    at_most_binary: bool,

    /// Label internal nodes with the species they map to
    #[arg(long = "relabel", default_value_t = false)]
    relabel: bool,

    /// Output Newick file
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
}

/// An error with the exit code of the stage it happened in.
struct Failure {
    code: i32,
    context: String,
    source: PhyloError,
}

fn fail(code: i32, context: impl Into<String>) -> impl FnOnce(PhyloError) -> Failure {
    let context = context.into();
    move |source| Failure {
        code,
        context,
        source,
    }
}

type CliResult<T> = std::result::Result<T, Failure>;

fn main() {
    let cli = Cli::parse();
    let level = if cli.quiet { LevelFilter::Warn } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_target(false)
        .init();

    let result = match cli.command {
        Command::Nj(args) => run_nj(args),
        Command::Guided(args) => run_guided(args),
        Command::JoinCosts(args) => run_join_costs(args),
        Command::Bootstrap(args) => run_bootstrap(args),
        Command::Reconcile(args) => run_reconcile(args),
    };
    if let Err(f) = result {
        error!("{}: {}", f.context, f.source);
        std::process::exit(f.code);
    }
}

fn run_nj(args: NjArgs) -> CliResult<()> {
    let t0 = Instant::now();
    let (names, distances) = read_matrix_tsv(&args.input)
        .map_err(fail(EXIT_INPUT, format!("Failed to read {:?}", args.input)))?;
    info!("Read {} taxa in {:.3}s", names.len(), t0.elapsed().as_secs_f64());

    let outgroups = args
        .outgroups
        .iter()
        .map(|o| {
            names.iter().position(|n| n == o).ok_or_else(|| Failure {
                code: EXIT_INPUT,
                context: "Invalid --outgroup".into(),
                source: PhyloError::MissingMapping(format!("'{o}' is not a taxon of the matrix")),
            })
        })
        .collect::<CliResult<Vec<usize>>>()?;
    let outgroups = (!outgroups.is_empty()).then_some(outgroups.as_slice());

    let mut tree = neighbor_join(&distances, outgroups)
        .map_err(fail(EXIT_ALGORITHM, "Neighbor-joining failed"))?;
    restore_names(&mut tree, &names).map_err(fail(EXIT_ALGORITHM, "Failed to rename leaves"))?;
    write_tree(&args.output, &tree)
}

fn run_guided(args: GuidedArgs) -> CliResult<()> {
    let (names, counts) = read_matrix_tsv(&args.input)
        .map_err(fail(EXIT_INPUT, format!("Failed to read {:?}", args.input)))?;
    let species = read_single_tree(&args.costs.species)?;
    let mapping = read_mapping_tsv(&args.mapping)
        .map_err(fail(EXIT_INPUT, format!("Failed to read {:?}", args.mapping)))?;
    let leaf_to_species = leaf_to_species_from_labels(&species, &mapping)
        .map_err(fail(EXIT_INPUT, "Invalid --mapping"))?;

    let (costs, species_index) = compute_join_costs(&species, args.costs.dup_cost, args.costs.loss_cost)
        .map_err(fail(EXIT_ALGORITHM, "Failed to compute join costs"))?;
    let mrca = get_mrca_matrix(&species, &species_index)
        .map_err(fail(EXIT_ALGORITHM, "Failed to compute species MRCAs"))?;

    let mut matrix_index_to_join_cost_index = HashMap::new();
    for (i, name) in names.iter().enumerate() {
        let index = leaf_to_species
            .get(name)
            .and_then(|&s| species_index.index_of(s))
            .ok_or_else(|| Failure {
                code: EXIT_INPUT,
                context: "Invalid --mapping".into(),
                source: PhyloError::MissingMapping(format!("gene '{name}' has no species")),
            })?;
        matrix_index_to_join_cost_index.insert(i, index);
    }

    let mut tree = guided_neighbor_joining(
        &SimilarityMatrix::from_matrix(counts),
        &costs,
        &matrix_index_to_join_cost_index,
        &species_index,
        &mrca,
        &species,
    )
    .map_err(fail(EXIT_ALGORITHM, "Guided neighbor-joining failed"))?;
    if args.relabel {
        for id in tree.preorder() {
            if let Some(recon) = tree[id].recon_info().copied() {
                if !tree.is_leaf(id) {
                    tree[id].label = species[recon.species].label.clone();
                }
            }
        }
    }
    restore_names(&mut tree, &names).map_err(fail(EXIT_ALGORITHM, "Failed to rename leaves"))?;
    write_tree(&args.output, &tree)
}

fn run_join_costs(args: JoinCostArgs) -> CliResult<()> {
    let species = read_single_tree(&args.costs.species)?;
    let (costs, index) = compute_join_costs(&species, args.costs.dup_cost, args.costs.loss_cost)
        .map_err(fail(EXIT_ALGORITHM, "Failed to compute join costs"))?;
    let names: Vec<String> = (0..index.len())
        .filter_map(|i| index.species_at(i))
        .map(|s| species[s].label.clone().unwrap_or_else(|| format!("node{s}")))
        .collect();

    let t0 = Instant::now();
    write_matrix_tsv(&args.output, &names, &costs.to_rows())
        .map_err(fail(EXIT_OUTPUT, format!("Failed to write output {:?}", args.output)))?;
    info!("Writing to output {:.3}s", t0.elapsed().as_secs_f64());
    Ok(())
}

fn run_bootstrap(args: BootstrapArgs) -> CliResult<()> {
    let reference = read_single_tree(&args.reference)?;
    let replicates = read_replicates(&args)?;
    if replicates.is_empty() {
        return Err(Failure {
            code: EXIT_INPUT,
            context: format!("No trees parsed from {:?}", args.replicates),
            source: PhyloError::Parse("no replicate trees".into()),
        });
    }
    info!("Read {} replicate trees", replicates.len());

    let recon = match (&args.species, &args.mapping) {
        (Some(species), Some(mapping)) => {
            let species = read_single_tree(species)?;
            let pairs = read_mapping_tsv(mapping)
                .map_err(fail(EXIT_INPUT, format!("Failed to read {mapping:?}")))?;
            let map = leaf_to_species_from_labels(&species, &pairs)
                .map_err(fail(EXIT_INPUT, "Invalid --mapping"))?;
            Some((species, map))
        }
        _ => None,
    };

    let t0 = Instant::now();
    let scored = support_for_named_trees(
        &reference,
        &replicates,
        recon.as_ref().map(|(species, map)| (species, map)),
    )
    .map_err(fail(EXIT_ALGORITHM, "Bootstrap scoring failed"))?;
    info!("Scored reference in {:.3}s", t0.elapsed().as_secs_f64());
    write_tree(&args.output, &scored)
}

fn run_reconcile(args: ReconcileArgs) -> CliResult<()> {
    let genes = read_newick_trees(&args.gene)
        .map_err(fail(EXIT_INPUT, format!("Failed to read {:?}", args.gene)))?;
    let species = read_single_tree(&args.species)?;
    let pairs = read_mapping_tsv(&args.mapping)
        .map_err(fail(EXIT_INPUT, format!("Failed to read {:?}", args.mapping)))?;
    let map = leaf_to_species_from_labels(&species, &pairs)
        .map_err(fail(EXIT_INPUT, "Invalid --mapping"))?;

    let t0 = Instant::now();
    let mut reconciled = Vec::with_capacity(genes.len());
    for (i, gene) in genes.into_iter().enumerate() {
        let context = format!("Failed to reconcile gene tree {i}");
        let mut tree = match (args.reroot, args.at_most_binary) {
            (true, false) => root_and_reconcile_binary(&gene, &species, &map),
            (true, true) => root_and_reconcile_at_most_binary(&gene, &species, &map),
            (false, _) => Ok(gene),
        }
        .map_err(fail(EXIT_ALGORITHM, context.clone()))?;
        // reconciling again is idempotent and applies --relabel
        let reconciled_in_place = if args.at_most_binary {
            reconcile_at_most_binary(&mut tree, &species, &map, args.relabel)
        } else {
            reconcile_binary(&mut tree, &species, &map, args.relabel)
        };
        reconciled_in_place.map_err(fail(EXIT_ALGORITHM, context.clone()))?;

        let cost = reconciliation_cost_at_most_binary(&tree, &species)
            .map_err(fail(EXIT_ALGORITHM, context))?;
        info!("Gene tree {i}: {} duplications, {} losses", cost.dups, cost.losses);
        reconciled.push(tree);
    }
    info!("Reconciled {} gene trees in {:.3}s", reconciled.len(), t0.elapsed().as_secs_f64());

    write_newick_trees(&args.output, &reconciled)
        .map_err(fail(EXIT_OUTPUT, format!("Failed to write output {:?}", args.output)))
}

fn read_single_tree(path: &Path) -> CliResult<PhyloTree> {
    let mut trees = read_newick_trees(path)
        .map_err(fail(EXIT_INPUT, format!("Failed to read {path:?}")))?;
    if trees.is_empty() {
        return Err(Failure {
            code: EXIT_INPUT,
            context: format!("Failed to read {path:?}"),
            source: PhyloError::Parse("no tree in file".into()),
        });
    }
    Ok(trees.swap_remove(0))
}

fn read_replicates(args: &BootstrapArgs) -> CliResult<Vec<PhyloTree>> {
    let path = &args.replicates;
    let name = path.to_string_lossy();
    let context = format!("Failed to read {path:?}");
    if name.ends_with(".trees") || name.ends_with(".trees.gz") {
        let (_, named) = read_beast_trees(path, args.burnin_trees, args.burnin_states, args.use_real_taxa)
            .map_err(fail(EXIT_INPUT, context))?;
        Ok(named.into_iter().map(|(_, tree)| tree).collect())
    } else {
        read_newick_trees(path).map_err(fail(EXIT_INPUT, context))
    }
}

/// Turn index labels `"0".."n-1"` back into taxon names.
fn restore_names(tree: &mut PhyloTree, names: &[String]) -> rust_python_phylogeny::Result<()> {
    let translate: HashMap<String, String> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (i.to_string(), n.clone()))
        .collect();
    rename_leaf_nodes(tree, &translate)
}

fn write_tree(path: &Path, tree: &PhyloTree) -> CliResult<()> {
    let t0 = Instant::now();
    write_newick_trees(path, std::slice::from_ref(tree))
        .map_err(fail(EXIT_OUTPUT, format!("Failed to write output {path:?}")))?;
    info!("Writing to output {:.3}s", t0.elapsed().as_secs_f64());
    Ok(())
}

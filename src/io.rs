//! File input and output: labeled TSV matrices, leaf mappings, Newick tree
//! files and BEAST/NEXUS `.trees` files.
//!
//! Paths ending in `.gz` are transparently (de)compressed.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};

use crate::error::{PhyloError, Result};
use crate::matrix::SquareMatrix;
use crate::newick;
use crate::tree::PhyloTree;

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let f = File::open(path)?;
    Ok(if is_gz(path) {
        Box::new(BufReader::new(GzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    })
}

fn read_to_string(path: &Path) -> Result<String> {
    if !is_gz(path) {
        return Ok(fs::read_to_string(path)?);
    }
    let mut content = String::new();
    GzDecoder::new(File::open(path)?).read_to_string(&mut content)?;
    Ok(content)
}

/// Strip BEAST annotations from Newick strings.
///
/// BEAST writes branch annotations like `:[&rate=0.123]2.45` where 2.45 is
/// the actual branch length, and tree annotations like `[&R]`. The `[&...]`
/// blocks are removed, everything else is kept.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

/// Read the trees of a BEAST `.trees` (NEXUS) file, dropping burn-in.
///
/// Burn-in is given as a number of leading trees and/or a `STATE_` value;
/// with both at 0 every tree is kept. Trees are named
/// `{file stem}_tree_STATE{n}`. With `use_real_taxa`, leaf ids are replaced
/// through the TRANSLATE block. Trees that fail to parse are skipped with a
/// warning.
pub fn read_beast_trees<P: AsRef<Path>>(
    path: P,
    burnin_trees: usize,
    burnin_states: usize,
    use_real_taxa: bool,
) -> Result<(HashMap<String, String>, Vec<(String, PhyloTree)>)> {
    let path = path.as_ref();
    let content = read_to_string(path)?;

    let base_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.trim_end_matches(".gz").trim_end_matches(".trees"))
        .unwrap_or("unknown");

    let taxons = parse_taxon_block(&content);

    let mut trees = Vec::new();
    for (idx, block) in collect_tree_blocks(&content).into_iter().enumerate() {
        let state = extract_state(block.header);
        let keep = (burnin_trees == 0 && burnin_states == 0)
            || (burnin_trees > 0 && idx >= burnin_trees)
            || (burnin_states > 0 && state > burnin_states);
        if !keep {
            continue;
        }

        let newick_str = strip_beast_annotations(&block.body);
        let mut tree = match newick::parse(&newick_str) {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to parse tree {} at index {}: {}", path.display(), idx, e);
                continue;
            }
        };
        if use_real_taxa {
            rename_leaf_nodes(&mut tree, &taxons)?;
        }
        trees.push((format!("{base_name}_tree_STATE{state}"), tree));
    }
    debug!("read {} trees and {} taxa from {}", trees.len(), taxons.len(), path.display());

    Ok((taxons, trees))
}

fn extract_state(header: &str) -> usize {
    if let Some(start) = header.to_ascii_uppercase().find("STATE_") {
        let rest = &header[start + "STATE_".len()..];
        let state = rest
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>();
        if let Ok(num) = state.parse::<usize>() {
            return num;
        }
    }
    0
}

struct TreeBlock<'a> {
    header: &'a str,
    body: String,
}

fn collect_tree_blocks(content: &str) -> Vec<TreeBlock<'_>> {
    content
        .lines()
        .map(str::trim_start)
        .skip_while(|line| !line.to_ascii_uppercase().starts_with("TREE "))
        .take_while(|line| !line.trim().to_ascii_uppercase().starts_with("END;"))
        .filter_map(|line| {
            let (header, body) = line.split_once('=')?;
            Some(TreeBlock {
                header: header.trim(),
                body: body.trim().to_string(),
            })
        })
        .collect()
}

fn parse_taxon_block(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while(|line| !line.trim().starts_with(';'))
        // 1 '1959.M.CD.59.ZR59',
        // 2 '1960.DRC60A',
        .filter_map(|line| {
            let line = line.trim().trim_end_matches([',', ';']);
            let mut parts = line.split_whitespace();
            let id = parts.next()?.to_string();
            let label = parts.next()?.trim_matches('\'').to_string();
            Some((id, label))
        })
        .collect()
}

/// Replace every leaf label through `translate`.
///
/// # Errors
/// [`PhyloError::MissingMapping`] for a leaf whose label is not a key.
pub fn rename_leaf_nodes(tree: &mut PhyloTree, translate: &HashMap<String, String>) -> Result<()> {
    for leaf in tree.leaves() {
        let label = tree[leaf].label.as_deref().unwrap_or_default();
        let renamed = translate
            .get(label)
            .ok_or_else(|| PhyloError::MissingMapping(format!("no translation for leaf '{label}'")))?
            .clone();
        tree[leaf].label = Some(renamed);
    }
    Ok(())
}

/// Relabel leaves with their position in `names`, so that the tree can be
/// indexed against a matrix whose rows follow `names`.
pub fn relabel_leaves_by_index(tree: &mut PhyloTree, names: &[String]) -> Result<()> {
    let translate: HashMap<String, String> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i.to_string()))
        .collect();
    rename_leaf_nodes(tree, &translate)
}

/// Read every `;`-terminated Newick statement of a file.
pub fn read_newick_trees<P: AsRef<Path>>(path: P) -> Result<Vec<PhyloTree>> {
    let content = read_to_string(path.as_ref())?;
    split_statements(&content)
        .into_iter()
        .map(|s| newick::parse(&s))
        .collect()
}

/// Split on `;` outside quotes, dropping `[...]` comments and annotations.
fn split_statements(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for c in content.chars() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth.saturating_sub(1);
                continue;
            }
            _ if depth > 0 => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ';') => {
                current.push(c);
                let statement = current.trim();
                if statement.len() > 1 {
                    statements.push(statement.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        if depth == 0 {
            current.push(c);
        }
    }
    statements
}

/// Read a labeled square matrix written by [`write_matrix_tsv`].
///
/// The first line is a header of column names (its first cell is ignored),
/// then one line per row: the row name followed by one value per column.
pub fn read_matrix_tsv<P: AsRef<Path>>(path: P) -> Result<(Vec<String>, SquareMatrix)> {
    let mut lines = open_reader(path.as_ref())?.lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => return Err(PhyloError::InvalidMatrix("empty matrix file".into())),
    };
    let names: Vec<String> = header.split('\t').skip(1).map(|s| s.trim().to_string()).collect();

    let mut rows = Vec::with_capacity(names.len());
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut cells = line.split('\t');
        let row_name = cells.next().unwrap_or_default().trim();
        if names.get(rows.len()).map(String::as_str) != Some(row_name) {
            return Err(PhyloError::InvalidMatrix(format!(
                "row {} is named '{}', expected the header order",
                i + 1,
                row_name
            )));
        }
        let row = cells
            .map(|c| {
                c.trim()
                    .parse::<f64>()
                    .map_err(|_| PhyloError::Parse(format!("invalid matrix value '{c}' in row {}", i + 1)))
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    if rows.len() != names.len() {
        return Err(PhyloError::InvalidMatrix(format!(
            "{} rows for {} columns",
            rows.len(),
            names.len()
        )));
    }
    Ok((names, SquareMatrix::from_rows(rows)?))
}

/// Write a labeled square matrix as TSV.
/// If `path` ends with `.gz`, the output is gzip-compressed.
pub fn write_matrix_tsv<P: AsRef<Path>, T: std::fmt::Display>(
    path: P,
    names: &[String],
    mat: &[Vec<T>],
) -> Result<()> {
    let p = path.as_ref();
    if mat.len() != names.len() {
        return Err(PhyloError::InvalidMatrix(format!(
            "{} rows for {} names",
            mat.len(),
            names.len()
        )));
    }

    let mut out: Box<dyn Write> = if is_gz(p) {
        let enc = GzEncoder::new(File::create(p)?, Compression::default());
        Box::new(BufWriter::new(enc))
    } else {
        Box::new(BufWriter::new(File::create(p)?))
    };

    // Header row
    for name in names {
        write!(&mut out, "\t{name}")?;
    }
    writeln!(&mut out)?;

    for (name, row) in names.iter().zip(mat) {
        write!(&mut out, "{name}")?;
        for val in row {
            write!(&mut out, "\t{val}")?;
        }
        writeln!(&mut out)?;
    }

    out.flush()?;
    Ok(())
}

/// Read a two-column TSV mapping (gene leaf, species leaf).
///
/// Blank lines and lines starting with `#` are skipped.
pub fn read_mapping_tsv<P: AsRef<Path>>(path: P) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for (i, line) in open_reader(path.as_ref())?.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (gene, species) = line
            .split_once('\t')
            .ok_or_else(|| PhyloError::Parse(format!("mapping line {} has no tab", i + 1)))?;
        pairs.push((gene.trim().to_string(), species.trim().to_string()));
    }
    Ok(pairs)
}

/// Write Newick trees, one per line.
pub fn write_newick_trees<P: AsRef<Path>>(path: P, trees: &[PhyloTree]) -> Result<()> {
    let p = path.as_ref();
    let mut out: Box<dyn Write> = if is_gz(p) {
        Box::new(BufWriter::new(GzEncoder::new(File::create(p)?, Compression::default())))
    } else {
        Box::new(BufWriter::new(File::create(p)?))
    };
    for tree in trees {
        writeln!(&mut out, "{}", newick::write(tree))?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rpp_io_{}_{}", std::process::id(), name))
    }

    const BEAST: &str = "#NEXUS\n\
Begin trees;\n\
\tTranslate\n\
\t\t1 'A',\n\
\t\t2 'B',\n\
\t\t3 'C'\n\
\t\t;\n\
tree STATE_0 = [&R] ((1:[&rate=1.0]1.0,2:1.0):0.5,3:1.5);\n\
tree STATE_1000 = [&R] ((1:1.0,3:1.0):0.5,2:1.5);\n\
tree STATE_2000 = [&R] ((1:1.0,3:1.0:0.5,2:1.5);\n\
End;\n";

    #[test]
    fn strips_annotations() {
        assert_eq!(
            strip_beast_annotations("[&R] (1:[&rate=0.1]2.5,2:1);"),
            " (1:2.5,2:1);"
        );
    }

    #[test]
    fn state_and_taxa() {
        assert_eq!(extract_state("tree STATE_1500"), 1500);
        assert_eq!(extract_state("tree tree_1"), 0);
        let taxa = parse_taxon_block(BEAST);
        assert_eq!(taxa.len(), 3);
        assert_eq!(taxa["3"], "C");
        assert_eq!(collect_tree_blocks(BEAST).len(), 3);
    }

    #[test]
    fn reads_beast_file_with_burnin() {
        let path = temp_path("sample.trees");
        fs::write(&path, BEAST).unwrap();

        // the malformed last tree is skipped
        let (taxa, trees) = read_beast_trees(&path, 0, 0, true).unwrap();
        assert_eq!(taxa.len(), 3);
        assert_eq!(trees.len(), 2);

        let (_, trees) = read_beast_trees(&path, 1, 0, true).unwrap();
        assert_eq!(trees.len(), 1);
        let (name, tree) = &trees[0];
        assert!(name.ends_with("_tree_STATE1000"));
        assert_eq!(newick::write(tree), "((A:1,C:1):0.5,B:1.5);");

        let (_, trees) = read_beast_trees(&path, 0, 500, false).unwrap();
        assert_eq!(newick::write(&trees[0].1), "((1:1,3:1):0.5,2:1.5);");
        fs::remove_file(&path).unwrap();

        assert!(matches!(read_beast_trees(&path, 0, 0, false), Err(PhyloError::Io(_))));
    }

    #[test]
    fn matrix_round_trip_plain_and_gz() {
        let names = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let rows = vec![vec![0.0, 1.5, 2.0], vec![1.5, 0.0, 0.25], vec![2.0, 0.25, 0.0]];
        for file in ["m.tsv", "m.tsv.gz"] {
            let path = temp_path(file);
            write_matrix_tsv(&path, &names, &rows).unwrap();
            let (read_names, m) = read_matrix_tsv(&path).unwrap();
            assert_eq!(read_names, names);
            assert_eq!(m.to_rows(), rows);
            fs::remove_file(&path).unwrap();
        }
    }

    #[test]
    fn rejects_ragged_matrix() {
        let path = temp_path("ragged.tsv");
        fs::write(&path, "\tx\ty\nx\t0\t1\ny\t1\n").unwrap();
        assert!(matches!(read_matrix_tsv(&path), Err(PhyloError::InvalidMatrix(_))));
        fs::write(&path, "\tx\ty\nx\t0\tfoo\ny\t1\t0\n").unwrap();
        assert!(matches!(read_matrix_tsv(&path), Err(PhyloError::Parse(_))));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn mappings_and_newick_files() {
        let path = temp_path("map.tsv");
        fs::write(&path, "# gene\tspecies\ng1\tA\n\ng2\tB\n").unwrap();
        assert_eq!(
            read_mapping_tsv(&path).unwrap(),
            vec![("g1".to_string(), "A".to_string()), ("g2".to_string(), "B".to_string())]
        );
        fs::remove_file(&path).unwrap();

        let path = temp_path("trees.nwk");
        fs::write(&path, "((a,b),c);\n(x,\n z)[comment;]\n;\n").unwrap();
        let trees = read_newick_trees(&path).unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[1].leaf_count(), 2);

        write_newick_trees(&path, &trees[..1]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "((a,b),c);\n");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn relabels_by_index() {
        let mut tree = newick::parse("((b,a),c);").unwrap();
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        relabel_leaves_by_index(&mut tree, &names).unwrap();
        assert_eq!(newick::write(&tree), "((1,0),2);");
        let mut other = newick::parse("(a,d);").unwrap();
        assert!(matches!(
            relabel_leaves_by_index(&mut other, &names),
            Err(PhyloError::MissingMapping(_))
        ));
    }
}

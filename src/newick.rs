//! Newick import and export.
//!
//! Reading goes through `phylotree`'s Newick parser and converts the result
//! into the crate's arena [`PhyloTree`]; writing is done here so that child
//! order, unset branch lengths and annotation-derived labels are under our
//! control.
//!
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' children ')' label | label
//! children = subtree (',' subtree)*
//! label    = name? (':' length)?
//! ```

use phylotree::tree::Tree as NewickTree;

use crate::error::{PhyloError, Result};
use crate::tree::{Node, NodeId, PhyloTree};

/// Parse a Newick string into a `PhyloTree`.
///
/// Whitespace outside quoted labels is ignored. Malformed input (unbalanced
/// parentheses, missing `;`, unparseable branch length) is a
/// [`PhyloError::Parse`]; no partial tree is returned.
pub fn parse(input: &str) -> Result<PhyloTree> {
    let compact = strip_whitespace(input);
    if !compact.starts_with('(') {
        return parse_single_node(&compact);
    }
    let source = NewickTree::from_newick(&compact).map_err(|e| PhyloError::Parse(e.to_string()))?;
    from_phylotree(&source)
}

/// Serialize a `PhyloTree` to a Newick string.
///
/// Children are written in stored order; a branch length is written only
/// when set, using the shortest representation that parses back exactly.
pub fn write(tree: &PhyloTree) -> String {
    let mut buf = String::new();
    write_subtree(tree, tree.root(), &mut buf);
    buf.push(';');
    buf
}

enum Token {
    Open(NodeId),
    Close(NodeId),
    Comma,
}

fn write_subtree(tree: &PhyloTree, start: NodeId, buf: &mut String) {
    let mut stack = vec![Token::Open(start)];
    while let Some(token) = stack.pop() {
        match token {
            Token::Open(id) if tree.is_leaf(id) => write_label(tree, id, buf),
            Token::Open(id) => {
                buf.push('(');
                stack.push(Token::Close(id));
                for (i, &child) in tree.children(id).iter().enumerate().rev() {
                    stack.push(Token::Open(child));
                    if i > 0 {
                        stack.push(Token::Comma);
                    }
                }
            }
            Token::Close(id) => {
                buf.push(')');
                write_label(tree, id, buf);
            }
            Token::Comma => buf.push(','),
        }
    }
}

fn write_label(tree: &PhyloTree, id: NodeId, buf: &mut String) {
    let node = &tree[id];
    if let Some(ref label) = node.label {
        buf.push_str(label);
    }
    if let Some(len) = node.branch_length {
        buf.push(':');
        buf.push_str(&len.to_string());
    }
}

/// Convert a `phylotree` tree into the arena, keeping child order.
fn from_phylotree(source: &NewickTree) -> Result<PhyloTree> {
    let root = source.get_root().map_err(|e| PhyloError::Parse(e.to_string()))?;
    let mut nodes: Vec<Node> = Vec::new();
    let mut stack: Vec<(usize, Option<NodeId>)> = vec![(root, None)];
    while let Some((source_id, parent)) = stack.pop() {
        let src = source
            .get(&source_id)
            .map_err(|e| PhyloError::Parse(e.to_string()))?;
        let id = nodes.len();
        let mut node = Node::new(id, clean_label(src.name.as_deref()), src.parent_edge);
        node.parent = parent;
        nodes.push(node);
        if let Some(p) = parent {
            nodes[p].children.push(id);
        }
        for &child in src.children.iter().rev() {
            stack.push((child, Some(id)));
        }
    }
    PhyloTree::from_nodes(nodes, 0)
}

/// `phylotree` rejects a bare leaf, so `A;` and `A:0.5;` are read here.
fn parse_single_node(input: &str) -> Result<PhyloTree> {
    let Some(body) = input.strip_suffix(';') else {
        return Err(PhyloError::Parse("missing ';' at end of Newick string".into()));
    };
    if body.contains([',', '(', ')', ';']) {
        return Err(PhyloError::Parse(format!("unexpected token in '{input}'")));
    }
    let (name, length) = match body.split_once(':') {
        Some((name, len)) => {
            let len: f64 = len
                .parse()
                .map_err(|_| PhyloError::Parse(format!("invalid branch length: '{len}'")))?;
            (name, Some(len))
        }
        None => (body, None),
    };
    PhyloTree::from_nodes(vec![Node::new(0, clean_label(Some(name)), length)], 0)
}

fn clean_label(name: Option<&str>) -> Option<String> {
    let name = name?.trim().trim_matches(|c: char| c == '"' || c == '\'');
    (!name.is_empty()).then(|| name.to_string())
}

fn strip_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => continue,
            _ => {}
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(tree: &PhyloTree) -> Vec<String> {
        tree.leaves()
            .into_iter()
            .filter_map(|id| tree[id].label.clone())
            .collect()
    }

    #[test]
    fn parse_simple_pair() {
        let tree = parse("(A,B);").unwrap();
        assert_eq!(tree.node_count(), 3);
        assert_eq!(labels(&tree), vec!["A", "B"]);
        assert_eq!(tree[tree.root()].branch_length, None);
    }

    #[test]
    fn parse_with_branch_lengths_and_internal_labels() {
        let tree = parse("((A:0.1,B:0.2)AB:0.3,C:0.4)root;").unwrap();
        let root = tree.root();
        assert_eq!(tree[root].label.as_deref(), Some("root"));
        let ab = tree.children(root)[0];
        assert_eq!(tree[ab].label.as_deref(), Some("AB"));
        assert_eq!(tree[ab].branch_length, Some(0.3));
        assert_eq!(tree[tree.children(ab)[1]].branch_length, Some(0.2));
        assert_eq!(labels(&tree), vec!["A", "B", "C"]);
    }

    #[test]
    fn parse_ignores_whitespace() {
        let tree = parse(" ( A : 1 ,\n B:2 ) ;").unwrap();
        assert_eq!(labels(&tree), vec!["A", "B"]);
        assert_eq!(tree[tree.children(0)[0]].branch_length, Some(1.0));
    }

    #[test]
    fn parse_single_leaf() {
        let tree = parse("A:0.5;").unwrap();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree[0].label.as_deref(), Some("A"));
        assert_eq!(tree[0].branch_length, Some(0.5));
        assert_eq!(write(&tree), "A:0.5;");
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(parse("((A,B);"), Err(PhyloError::Parse(_))));
        assert!(matches!(parse("(A,B)"), Err(PhyloError::Parse(_))));
        assert!(matches!(parse("(A:x,B);"), Err(PhyloError::Parse(_))));
        assert!(matches!(parse("A"), Err(PhyloError::Parse(_))));
        assert!(matches!(parse("A:zz;"), Err(PhyloError::Parse(_))));
    }

    #[test]
    fn write_omits_unset_lengths() {
        let mut tree = PhyloTree::new();
        let x = tree.add_child(0, None, Some(1.5)).unwrap();
        tree.add_child(x, Some("A".into()), None).unwrap();
        tree.add_child(x, Some("B".into()), Some(0.25)).unwrap();
        tree.add_child(0, Some("C".into()), Some(2.0)).unwrap();
        assert_eq!(write(&tree), "((A,B:0.25):1.5,C:2);");
    }

    #[test]
    fn round_trip() {
        let inputs = [
            "(0,1,2);",
            "((0:1,1:2):0.5,(2:0.125,3:3.75):0.5);",
            "(((A:0.1,B:0.2)x:0.3,C:0.7)y:1e-7,D:12345.678)z;",
        ];
        for input in inputs {
            let tree = parse(input).unwrap();
            let again = parse(&write(&tree)).unwrap();
            assert_eq!(write(&again), write(&tree));
            assert_eq!(again.node_count(), tree.node_count());
            for id in tree.preorder() {
                assert_eq!(tree[id].label, again[id].label);
                assert_eq!(tree[id].branch_length, again[id].branch_length);
                assert_eq!(tree[id].children, again[id].children);
            }
        }
    }

    #[test]
    fn writes_deep_caterpillar() {
        let depth = 20_000;
        let mut tree = PhyloTree::new();
        let mut spine = 0;
        for i in 0..depth {
            tree.add_child(spine, Some(format!("t{i}")), None).unwrap();
            spine = tree.add_child(spine, None, None).unwrap();
        }
        tree[spine].label = Some("last".into());
        let out = write(&tree);
        assert!(out.starts_with("(t0,(t1,(t2,"));
        assert!(out.ends_with(&format!("(t19999,last{});", ")".repeat(depth))));
        assert_eq!(out.matches(',').count(), depth);
    }
}

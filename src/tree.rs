//! Arena-backed phylogenetic tree.
//!
//! Nodes live in a flat `Vec<Node>` and are referenced by `NodeId` (a `usize`
//! index). A node's parent is an index, never a reference, so cloning a tree
//! is a plain `Vec` copy and annotations travel with the clone.
//!
//! Besides the rooted view, the tree can be looked at as unrooted: a root with
//! exactly two children is then a degree-two node that disappears, and its two
//! child edges form one undirected edge. [`PhyloTree::unrooted_edges`] and
//! [`PhyloTree::reroot`] work on that view and back the midpoint rooting of
//! neighbor-joining as well as the rerooting search of reconciliation.

use std::ops::{Index, IndexMut};

use crate::error::{PhyloError, Result};
use crate::info::{IndexedTreeInfo, PhylogenyInfo, ReconciliationInfo};

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A single node in a phylogenetic tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Child nodes, in Newick order.
    pub children: Vec<NodeId>,
    /// Branch length from this node to its parent; `None` when unset.
    pub branch_length: Option<f64>,
    /// Taxon or clade label.
    pub label: Option<String>,
    /// Annotation slot filled by indexing, reconciliation and bootstrap scoring.
    pub info: Option<PhylogenyInfo>,
}

impl Node {
    pub fn new(id: NodeId, label: Option<String>, branch_length: Option<f64>) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            branch_length,
            label,
            info: None,
        }
    }

    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn index_info(&self) -> Option<&IndexedTreeInfo> {
        self.info.as_ref()?.index.as_ref()
    }

    pub fn recon_info(&self) -> Option<&ReconciliationInfo> {
        self.info.as_ref()?.recon.as_ref()
    }
}

/// An undirected edge of the unrooted view of a tree.
///
/// `a` is the endpoint that was the child in the rooted arena (for the merged
/// root edge, the first child of the root) and `b` the other endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnrootedEdge {
    pub a: NodeId,
    pub b: NodeId,
    pub length: Option<f64>,
}

/// A rooted phylogenetic tree stored as an arena of nodes.
#[derive(Debug, Clone)]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for PhyloTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PhyloTree {
    /// Create a new tree with a single unlabeled root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(0, None, None)],
            root: 0,
        }
    }

    /// Create a tree from pre-built nodes and a root index.
    ///
    /// Used by the Newick reader and the tree-building algorithms.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(PhyloError::InvalidTree("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(PhyloError::InvalidTree(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        if let Some(bad) = nodes.iter().enumerate().find(|(i, n)| n.id != *i) {
            return Err(PhyloError::InvalidTree(format!(
                "node at position {} carries id {}",
                bad.0, bad.1.id
            )));
        }
        Ok(Self { nodes, root })
    }

    /// Add a child to `parent` and return its `NodeId`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        label: Option<String>,
        branch_length: Option<f64>,
    ) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(PhyloError::InvalidTree(format!(
                "parent index {} out of range ({})",
                parent,
                self.nodes.len()
            )));
        }
        let id = self.nodes.len();
        let mut node = Node::new(id, label, branch_length);
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].is_leaf()
    }

    /// The annotation slot of `id`, created empty if absent.
    pub fn info_mut(&mut self, id: NodeId) -> &mut PhylogenyInfo {
        self.nodes[id].info.get_or_insert_with(PhylogenyInfo::default)
    }

    /// Drop every `PhylogenyInfo` attached to the tree.
    pub fn clear_phylogeny_info(&mut self) {
        for node in &mut self.nodes {
            node.info = None;
        }
    }

    /// Pre-order (parent before children) node ids from the root.
    pub fn preorder(&self) -> Vec<NodeId> {
        self.preorder_from(self.root)
    }

    /// Pre-order node ids of the subtree rooted at `start`.
    pub fn preorder_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            result.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        result
    }

    /// Post-order (children before parent) node ids from the root.
    pub fn postorder(&self) -> Vec<NodeId> {
        // Reverse of a preorder that visits the last child first.
        let mut result = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            result.push(id);
            for &child in &self.nodes[id].children {
                stack.push(child);
            }
        }
        result.reverse();
        result
    }

    /// Leaf ids in pre-order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.nodes[id].is_leaf())
            .collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    /// Labels of the leaves below `id`, in pre-order.
    pub fn leaf_labels_below(&self, id: NodeId) -> Vec<String> {
        self.preorder_from(id)
            .into_iter()
            .filter(|&n| self.nodes[n].is_leaf())
            .filter_map(|n| self.nodes[n].label.clone())
            .collect()
    }

    /// First leaf (pre-order) carrying `label`.
    pub fn leaf_by_label(&self, label: &str) -> Option<NodeId> {
        self.leaves()
            .into_iter()
            .find(|&id| self.nodes[id].label.as_deref() == Some(label))
    }

    /// True if every internal node reachable from the root has exactly two children.
    pub fn is_binary(&self) -> bool {
        self.ensure_binary().is_ok()
    }

    /// Fails on the first internal node (pre-order) without exactly two children.
    pub fn ensure_binary(&self) -> Result<()> {
        for id in self.preorder() {
            let children = self.nodes[id].children.len();
            if children != 0 && children != 2 {
                return Err(PhyloError::NonBinaryTree { node: id, children });
            }
        }
        Ok(())
    }

    /// Number of edges between `id` and the root.
    pub fn depth_of(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = id;
        while let Some(p) = self.nodes[cur].parent {
            depth += 1;
            cur = p;
        }
        depth
    }

    /// Most recent common ancestor of two nodes, by walking parent links.
    pub fn mrca(&self, a: NodeId, b: NodeId) -> NodeId {
        let (mut a, mut b) = (a, b);
        let (mut da, mut db) = (self.depth_of(a), self.depth_of(b));
        while da > db {
            a = self.nodes[a].parent.unwrap_or(a);
            da -= 1;
        }
        while db > da {
            b = self.nodes[b].parent.unwrap_or(b);
            db -= 1;
        }
        while a != b {
            match (self.nodes[a].parent, self.nodes[b].parent) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                // Disconnected nodes; the root is the best answer available.
                _ => return self.root,
            }
        }
        a
    }

    /// Number of edges on the path between `a` and `b`.
    pub fn path_length(&self, a: NodeId, b: NodeId) -> usize {
        let m = self.mrca(a, b);
        self.depth_of(a) + self.depth_of(b) - 2 * self.depth_of(m)
    }

    /// Top of the unrooted view: the root, or the first node below a chain
    /// of single-child nodes hanging from it.
    fn unrooted_top(&self) -> NodeId {
        let mut top = self.root;
        while let &[only] = self.nodes[top].children.as_slice() {
            top = only;
        }
        top
    }

    /// The two children of a degree-two top, whose edges merge when unrooted.
    fn suppressed_root_children(&self, top: NodeId) -> Option<(NodeId, NodeId)> {
        match self.nodes[top].children.as_slice() {
            &[x, y] => Some((x, y)),
            _ => None,
        }
    }

    /// Undirected adjacency of the unrooted view, children before parent.
    fn adjacency(&self) -> Vec<Vec<(NodeId, Option<f64>)>> {
        let top = self.unrooted_top();
        let merged = self.suppressed_root_children(top);
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for id in self.preorder_from(top) {
            let node = &self.nodes[id];
            if merged.is_none() || id != top {
                for &c in &node.children {
                    adj[id].push((c, self.nodes[c].branch_length));
                }
            }
            if id == top {
                continue;
            }
            let Some(p) = node.parent else { continue };
            match merged {
                Some((x, y)) if p == top => {
                    let other = if id == x { y } else { x };
                    let length = merge_lengths(self.nodes[x].branch_length, self.nodes[y].branch_length);
                    adj[id].push((other, length));
                }
                _ => adj[id].push((p, node.branch_length)),
            }
        }
        adj
    }

    /// Every edge of the unrooted view exactly once, in pre-order of the
    /// endpoint that is the child in the rooted arena. Single-child nodes
    /// above the first branching node are not part of the view.
    pub fn unrooted_edges(&self) -> Vec<UnrootedEdge> {
        let top = self.unrooted_top();
        let merged = self.suppressed_root_children(top);
        let mut edges = Vec::new();
        for id in self.preorder_from(top) {
            if id == top {
                continue;
            }
            let Some(p) = self.nodes[id].parent else { continue };
            match merged {
                Some((x, y)) if p == top => {
                    if id == x {
                        edges.push(UnrootedEdge {
                            a: x,
                            b: y,
                            length: merge_lengths(self.nodes[x].branch_length, self.nodes[y].branch_length),
                        });
                    }
                }
                _ => edges.push(UnrootedEdge {
                    a: id,
                    b: p,
                    length: self.nodes[id].branch_length,
                }),
            }
        }
        edges
    }

    /// A new tree rooted at the midpoint of `edge` of the unrooted view.
    ///
    /// The new root's first child is the `edge.a` side. Labels and branch
    /// lengths are kept, annotations are not: indexing and reconciliation are
    /// properties of a rooting and must be recomputed.
    pub fn reroot(&self, edge: &UnrootedEdge) -> PhyloTree {
        let adj = self.adjacency();
        let half = edge.length.map(|l| l / 2.0);
        let mut nodes = vec![Node::new(0, None, None)];
        // (old id, neighbor it was reached from, new parent, branch length)
        let mut stack = vec![(edge.b, edge.a, 0, half), (edge.a, edge.b, 0, half)];
        while let Some((id, came_from, parent, branch_length)) = stack.pop() {
            let new_id = nodes.len();
            let mut node = Node::new(new_id, self.nodes[id].label.clone(), branch_length);
            node.parent = Some(parent);
            nodes.push(node);
            nodes[parent].children.push(new_id);
            for &(next, length) in adj[id].iter().rev() {
                if next != came_from {
                    stack.push((next, id, new_id, length));
                }
            }
        }
        PhyloTree { nodes, root: 0 }
    }
}

fn merge_lengths(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        _ => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

impl Index<NodeId> for PhyloTree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

impl IndexMut<NodeId> for PhyloTree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }
}

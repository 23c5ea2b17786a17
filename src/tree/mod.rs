use std::fmt::{self, Display};

use anyhow::bail;
use log::info;

use crate::Result;
use NodeIdx::{Internal as Int, Leaf};

mod branch_marks;
mod paml_labels;
mod tree_node;
pub mod tree_parser;

pub use branch_marks::*;
pub use tree_node::*;

/// Structural identifier of a node: its position in the tree's node arena, tagged with
/// whether the node is a leaf or an internal node.
#[derive(Debug, PartialEq, Clone, Copy, PartialOrd, Eq, Ord, Hash)]
pub enum NodeIdx {
    Internal(usize),
    Leaf(usize),
}

impl Display for NodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Int(idx) => write!(f, "internal node {}", idx),
            Leaf(idx) => write!(f, "leaf node {}", idx),
        }
    }
}

impl From<NodeIdx> for usize {
    fn from(node_idx: NodeIdx) -> usize {
        match node_idx {
            Int(idx) => idx,
            Leaf(idx) => idx,
        }
    }
}

impl From<&NodeIdx> for usize {
    fn from(node_idx: &NodeIdx) -> usize {
        usize::from(*node_idx)
    }
}

/// Rooted phylogenetic tree stored as an arena of nodes.
///
/// Nodes reference their parent and children by [`NodeIdx`]. The root may have more than two
/// children, which is how unrooted trees are kept (trifurcation at the root).
#[derive(Debug, Clone)]
pub struct Tree {
    pub root: NodeIdx,
    pub(crate) nodes: Vec<Node>,
    pub postorder: Vec<NodeIdx>,
    pub preorder: Vec<NodeIdx>,
    pub(crate) leaf_ids: Vec<String>,
}

impl Tree {
    pub(crate) fn compute_postorder(&mut self) {
        let mut order = Vec::<NodeIdx>::with_capacity(self.nodes.len());
        let mut stack = Vec::<NodeIdx>::with_capacity(self.nodes.len());
        stack.push(self.root);
        while let Some(cur_root) = stack.pop() {
            order.push(cur_root);
            if let Int(_) = cur_root {
                stack.extend(self.children(&cur_root).iter().copied());
            }
        }
        order.reverse();
        self.postorder = order;
    }

    pub(crate) fn compute_preorder(&mut self) {
        self.preorder = self.preorder_subroot(&self.root);
    }

    pub fn preorder_subroot(&self, subroot_idx: &NodeIdx) -> Vec<NodeIdx> {
        let mut order = Vec::<NodeIdx>::with_capacity(self.nodes.len());
        let mut stack = Vec::<NodeIdx>::with_capacity(self.nodes.len());
        stack.push(*subroot_idx);
        while let Some(cur_root) = stack.pop() {
            order.push(cur_root);
            if let Int(_) = cur_root {
                stack.extend(self.children(&cur_root).iter().rev().copied());
            }
        }
        order
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: &NodeIdx) -> &Node {
        &self.nodes[usize::from(idx)]
    }

    pub(crate) fn node_mut(&mut self, idx: &NodeIdx) -> &mut Node {
        &mut self.nodes[usize::from(idx)]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn leaves(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|&node| matches!(node.idx, Leaf(_)))
            .collect()
    }

    pub fn internals(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|&node| matches!(node.idx, Int(_)))
            .collect()
    }

    /// Nodes other than the root, i.e. the nodes that own a branch, in preorder.
    pub fn descendants(&self) -> impl Iterator<Item = &Node> {
        self.preorder
            .iter()
            .filter(|&idx| *idx != self.root)
            .map(|idx| self.node(idx))
    }

    pub fn children(&self, idx: &NodeIdx) -> &Vec<NodeIdx> {
        &self.node(idx).children
    }

    pub fn parent(&self, idx: &NodeIdx) -> Option<&NodeIdx> {
        self.node(idx).parent.as_ref()
    }

    pub fn blen(&self, idx: &NodeIdx) -> f64 {
        self.node(idx).blen
    }

    pub fn set_blen(&mut self, idx: &NodeIdx, blen: f64) {
        self.node_mut(idx).blen = blen;
    }

    pub fn node_id(&self, idx: &NodeIdx) -> &str {
        &self.node(idx).id
    }

    pub fn leaf_ids(&self) -> Vec<String> {
        self.leaf_ids.clone()
    }

    /// Returns true if `idx` points at a node of this tree.
    pub fn contains(&self, idx: &NodeIdx) -> bool {
        self.nodes
            .get(usize::from(idx))
            .is_some_and(|node| node.idx == *idx)
    }

    /// Looks up a node index by node name, failing if no such node exists.
    pub fn try_idx(&self, id: &str) -> Result<NodeIdx> {
        match self.nodes.iter().find(|node| node.id == id) {
            Some(node) => Ok(node.idx),
            None => bail!("No node with id {} found in the tree", id),
        }
    }

    /// Returns the node with the given name, panics if there is none.
    #[cfg(test)]
    pub(crate) fn by_id(&self, id: &str) -> &Node {
        let idx = self
            .try_idx(id)
            .unwrap_or_else(|_| panic!("No node with id {} found in the tree", id));
        self.node(&idx)
    }

    /// Reorders the children of every internal node so that subtrees are sorted by the
    /// (sorted) names of the leaves they contain. This gives a canonical child order that
    /// does not depend on the order in which the tree was written.
    pub fn sort_descendants(&mut self) {
        let mut content: Vec<Vec<String>> = vec![Vec::new(); self.nodes.len()];
        for pos in 0..self.postorder.len() {
            let idx = self.postorder[pos];
            let i = usize::from(idx);
            match idx {
                Leaf(_) => content[i] = vec![self.nodes[i].id.clone()],
                Int(_) => {
                    let mut names: Vec<String> = self.nodes[i]
                        .children
                        .iter()
                        .flat_map(|child| content[usize::from(child)].iter().cloned())
                        .collect();
                    names.sort();
                    self.nodes[i]
                        .children
                        .sort_by(|a, b| content[usize::from(a)].cmp(&content[usize::from(b)]));
                    content[i] = names;
                }
            }
        }
        self.compute_postorder();
        self.compute_preorder();
        info!("Sorted tree descendants by leaf names.");
    }

    /// Newick representation of the tree with node names and branch lengths.
    pub fn to_newick(&self) -> String {
        format!("{};", self.subtree_to_newick(&self.root))
    }

    fn subtree_to_newick(&self, idx: &NodeIdx) -> String {
        let node = self.node(idx);
        let children = node
            .children
            .iter()
            .map(|child| self.subtree_to_newick(child))
            .collect::<Vec<_>>();
        let label = newick_label(&node.id);
        if children.is_empty() {
            format!("{}:{}", label, node.blen)
        } else {
            format!("({}){}:{}", children.join(","), label, node.blen)
        }
    }

    /// Newick representation in the form read by codeml: leaf names only, no internal node
    /// names and no branch lengths. With `with_marks` the branch marks are written directly
    /// after each node, e.g. `((A #1,B),C);`.
    pub fn to_paml_newick(&self, with_marks: bool) -> String {
        format!("{};", self.subtree_to_paml_newick(&self.root, with_marks))
    }

    fn subtree_to_paml_newick(&self, idx: &NodeIdx, with_marks: bool) -> String {
        let node = self.node(idx);
        let mark = if with_marks { node.mark.as_str() } else { "" };
        if node.children.is_empty() {
            format!("{}{}", newick_label(&node.id), mark)
        } else {
            let children = node
                .children
                .iter()
                .map(|child| self.subtree_to_paml_newick(child, with_marks))
                .collect::<Vec<_>>();
            format!("({}){}", children.join(","), mark)
        }
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_newick())
    }
}

fn newick_label(id: &str) -> String {
    let needs_quotes = id
        .chars()
        .any(|c| c.is_whitespace() || "(),:;[]'#".contains(c));
    if needs_quotes {
        format!("'{}'", id.replace('\'', "''"))
    } else {
        id.to_string()
    }
}

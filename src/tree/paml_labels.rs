use itertools::Itertools;
use log::{info, warn};

use crate::tree::{
    Node,
    NodeIdx::{self, Internal as Int, Leaf},
    Tree,
};

impl Tree {
    /// Stamps every node with the sequential `paml_id` used by codeml.
    ///
    /// Leaves get `1..=L` in ascending order of their names, which is the order in which codeml
    /// reports the sequences. Internal nodes get `L+1..` in preorder, first child before
    /// second, so the root is always `L+1`. This reproduces codeml's own node numbering as
    /// long as the children are in the same order as in the tree file handed to codeml, see
    /// [`Tree::sort_descendants`].
    ///
    /// Leaf names must be unique; duplicates are reported but the numbering is still applied.
    ///
    /// # Example
    /// ```
    /// use phylo_evol::tree::tree_parser::from_newick;
    /// let mut tree = from_newick("((C,A),(B,D));").unwrap().pop().unwrap();
    /// tree.label_as_paml();
    /// assert_eq!(tree.node(&tree.try_idx("A").unwrap()).paml_id, Some(1));
    /// assert_eq!(tree.node(&tree.try_idx("D").unwrap()).paml_id, Some(4));
    /// assert_eq!(tree.node(&tree.root).paml_id, Some(5));
    /// ```
    pub fn label_as_paml(&mut self) {
        let mut leaves: Vec<(NodeIdx, String)> = self
            .nodes
            .iter()
            .filter(|node| node.is_leaf())
            .map(|node| (node.idx, node.id.clone()))
            .collect();
        leaves.sort_by(|(_, a), (_, b)| a.cmp(b));
        for ((_, a), (_, b)) in leaves.iter().tuple_windows() {
            if a == b {
                warn!("Leaf name {} is not unique, codeml node labels will be ambiguous.", a);
            }
        }

        let mut paml_id = 1;
        for (idx, _) in leaves.iter() {
            self.node_mut(idx).paml_id = Some(paml_id);
            paml_id += 1;
        }
        for pos in 0..self.preorder.len() {
            let idx = self.preorder[pos];
            if let Int(_) = idx {
                self.node_mut(&idx).paml_id = Some(paml_id);
                paml_id += 1;
            }
        }
        info!("Labelled {} tree nodes with codeml ids.", paml_id - 1);
    }

    /// True once every node carries a `paml_id`.
    pub fn is_paml_labelled(&self) -> bool {
        self.nodes.iter().all(|node| node.paml_id.is_some())
    }

    /// Resolves a codeml node number back to the node index.
    pub fn idx_by_paml_id(&self, paml_id: usize) -> Option<NodeIdx> {
        self.nodes
            .iter()
            .find(|node| node.paml_id == Some(paml_id))
            .map(|node| node.idx)
    }

    pub fn by_paml_id(&self, paml_id: usize) -> Option<&Node> {
        self.idx_by_paml_id(paml_id).map(|idx| self.node(&idx))
    }

    /// Leaf indices in `paml_id` order, i.e. the order of the sequences in the codeml alignment.
    pub fn leaves_by_paml_id(&self) -> Vec<NodeIdx> {
        self.nodes
            .iter()
            .filter(|node| matches!(node.idx, Leaf(_)))
            .sorted_by_key(|node| (node.paml_id, node.id.clone()))
            .map(|node| node.idx)
            .collect()
    }
}

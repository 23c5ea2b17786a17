use anyhow::bail;
use log::{debug, warn};
use pest::Parser;

use crate::errors::EvolError;
use crate::tree::tree_parser::{NewickParser, Rule};
use crate::tree::{NodeIdx, Tree};
use crate::Result;

/// Mark given to selected branches when no explicit marks are supplied.
pub const DEFAULT_MARK: &str = "#1";

/// Checks that a mark label is a `#` sign directly followed by an integer, e.g. `#1`.
pub fn validate_mark(mark: &str) -> Result<()> {
    if NewickParser::parse(Rule::paml_mark, mark).is_err() {
        bail!(EvolError::MalformedMark(mark.to_string()));
    }
    Ok(())
}

impl Tree {
    /// Marks the branches above the given nodes so that codeml can assign them to a
    /// foreground class.
    ///
    /// Every selected node gets `" " + mark` (default mark `#1`), every other node has its
    /// mark cleared, so calling this again replaces the previous marking completely.
    /// Malformed marks are reported and applied anyway. The root has no branch and cannot be
    /// marked.
    ///
    /// # Example
    /// ```
    /// use phylo_evol::tree::tree_parser::from_newick;
    /// let mut tree = from_newick("((A,B),C);").unwrap().pop().unwrap();
    /// let a = tree.try_idx("A").unwrap();
    /// let c = tree.try_idx("C").unwrap();
    /// tree.mark(&[a, c], Some(&["#1".to_string(), "#2".to_string()])).unwrap();
    /// assert_eq!(tree.to_paml_newick(true), "((A #1,B),C #2);");
    /// ```
    pub fn mark(&mut self, node_ids: &[NodeIdx], marks: Option<&[String]>) -> Result<()> {
        let marks: Vec<String> = match marks {
            Some(marks) => {
                if marks.len() != node_ids.len() {
                    bail!(
                        "Got {} marks for {} nodes, provide one mark per node",
                        marks.len(),
                        node_ids.len()
                    );
                }
                marks.to_vec()
            }
            None => vec![DEFAULT_MARK.to_string(); node_ids.len()],
        };
        for idx in node_ids {
            if !self.contains(idx) {
                bail!("Cannot mark {}, it is not part of the tree", idx);
            }
        }
        for mark in &marks {
            if let Err(e) = validate_mark(mark) {
                warn!("{}, applying it anyway.", e);
            }
        }
        if node_ids.contains(&self.root) {
            warn!("The root has no branch to mark, ignoring it.");
        }

        let root = self.root;
        for node in self.nodes.iter_mut() {
            node.mark = match node_ids.iter().position(|idx| *idx == node.idx) {
                Some(pos) if node.idx != root => format!(" {}", marks[pos]),
                _ => String::new(),
            };
        }
        debug!("Marked branches: {:?}", node_ids);
        Ok(())
    }

    /// Same as [`Tree::mark`], selecting the nodes by their codeml ids.
    pub fn mark_by_paml_ids(&mut self, paml_ids: &[usize], marks: Option<&[String]>) -> Result<()> {
        let mut node_ids = Vec::with_capacity(paml_ids.len());
        for paml_id in paml_ids {
            match self.idx_by_paml_id(*paml_id) {
                Some(idx) => node_ids.push(idx),
                None => bail!("No node with codeml id {} in the tree", paml_id),
            }
        }
        self.mark(&node_ids, marks)
    }

    /// Removes all branch marks.
    pub fn clear_marks(&mut self) {
        for node in self.nodes.iter_mut() {
            node.mark.clear();
        }
    }

    /// Nodes currently carrying a mark, with the mark label (without the leading space).
    pub fn marked(&self) -> Vec<(NodeIdx, &str)> {
        self.nodes
            .iter()
            .filter(|node| !node.mark.is_empty())
            .map(|node| (node.idx, node.mark.trim_start()))
            .collect()
    }
}

use std::fmt;
use std::result::Result as stdResult;

use anyhow::bail;
use log::info;
use pest::{error::Error as PestError, iterators::Pair, Parser};
use pest_derive::Parser;

use crate::tree::{
    Node,
    NodeIdx::{self, Internal as Int, Leaf},
    Tree,
};
use crate::Result;

#[derive(Parser)]
#[grammar = "./tree/newick.pest"]
pub struct NewickParser;

#[derive(Debug)]
pub struct ParsingError(pub(crate) Box<PestError<Rule>>);

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Malformed newick string")?;
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParsingError {}

/// Parses all trees of a newick string.
///
/// Node names, branch lengths and codeml branch marks (`A #1`) are read; other
/// bracketed comments are skipped. A root with three children (unrooted tree) is kept as is.
///
/// # Example
/// ```
/// use phylo_evol::tree::tree_parser::from_newick;
/// let trees = from_newick("((A:1.0,B:2.0)E:1.0,(C:1.0,D #1:2.0)F:1.0);").unwrap();
/// assert_eq!(trees.len(), 1);
/// assert_eq!(trees[0].leaves().len(), 4);
/// assert_eq!(trees[0].node(&trees[0].try_idx("D").unwrap()).mark, " #1");
/// ```
pub fn from_newick(newick_string: &str) -> Result<Vec<Tree>> {
    info!("Parsing newick trees.");
    let mut trees = Vec::new();
    let newick_rule = match NewickParser::parse(Rule::newick, newick_string) {
        Ok(mut pairs) => match pairs.next() {
            Some(rule) => rule,
            None => bail!("Empty newick string"),
        },
        Err(e) => bail!(ParsingError(Box::new(e))),
    };
    for tree_rule in newick_rule.into_inner() {
        if tree_rule.as_rule() != Rule::tree {
            continue;
        }
        let mut tree = Tree::new_empty();
        if let Some(rule) = tree_rule.into_inner().next() {
            if let Err(e) = tree.parse_tree_rule(rule) {
                bail!(ParsingError(e));
            }
        }
        trees.push(tree);
    }
    info!("Finished parsing {} newick tree(s) successfully.", trees.len());
    Ok(trees)
}

impl Tree {
    fn new_empty() -> Self {
        Self {
            root: Int(0),
            nodes: Vec::new(),
            postorder: Vec::new(),
            preorder: Vec::new(),
            leaf_ids: Vec::new(),
        }
    }

    fn parse_tree_rule(&mut self, rule: Pair<Rule>) -> stdResult<(), Box<PestError<Rule>>> {
        let mut node_idx = 0;
        match rule.as_rule() {
            Rule::leaf => {
                self.parse_leaf_rule(&mut node_idx, rule)?;
                self.root = Leaf(0);
            }
            Rule::internal => {
                self.parse_internal_rule(&mut node_idx, rule)?;
                self.root = Int(0);
                if self.children(&self.root).len() == 3 {
                    info!("Found unrooted tree, keeping the trifurcation at the root.");
                }
            }
            _ => unreachable!(),
        }
        self.compute_postorder();
        self.compute_preorder();
        Ok(())
    }

    fn parse_internal_rule(
        &mut self,
        node_idx: &mut usize,
        internal_rule: Pair<Rule>,
    ) -> stdResult<NodeIdx, Box<PestError<Rule>>> {
        let cur_node_idx = *node_idx;
        self.nodes.push(Node::new_empty_internal(cur_node_idx));
        *node_idx += 1;
        let mut children: Vec<NodeIdx> = Vec::new();
        for rule in internal_rule.into_inner() {
            match rule.as_rule() {
                Rule::label => self.nodes[cur_node_idx].id = Tree::parse_label_rule(rule),
                Rule::branch_length => {
                    self.nodes[cur_node_idx].blen = Tree::parse_branch_length_rule(rule)
                }
                Rule::mark => self.nodes[cur_node_idx].mark = Tree::parse_mark_rule(rule),
                Rule::internal => children.push(self.parse_internal_rule(node_idx, rule)?),
                Rule::leaf => children.push(self.parse_leaf_rule(node_idx, rule)?),
                _ => unreachable!(),
            }
        }
        for child_idx in &children {
            self.nodes[usize::from(child_idx)].parent = Some(Int(cur_node_idx));
        }
        self.nodes[cur_node_idx].children = children;
        Ok(Int(cur_node_idx))
    }

    fn parse_leaf_rule(
        &mut self,
        node_idx: &mut usize,
        inner_rule: Pair<Rule>,
    ) -> stdResult<NodeIdx, Box<PestError<Rule>>> {
        let mut node = Node::new_leaf(*node_idx, None, 0.0, String::new());
        for rule in inner_rule.into_inner() {
            match rule.as_rule() {
                Rule::label => node.id = Tree::parse_label_rule(rule),
                Rule::branch_length => node.blen = Tree::parse_branch_length_rule(rule),
                Rule::mark => node.mark = Tree::parse_mark_rule(rule),
                _ => unreachable!(),
            }
        }
        self.leaf_ids.push(node.id.clone());
        self.nodes.push(node);
        *node_idx += 1;
        Ok(Leaf(*node_idx - 1))
    }

    fn parse_branch_length_rule(rule: Pair<Rule>) -> f64 {
        rule.into_inner()
            .next()
            .map(|number| number.as_str().trim().parse::<f64>().unwrap_or_default())
            .unwrap_or_default()
    }

    fn parse_label_rule(rule: Pair<Rule>) -> String {
        let label = rule.as_str();
        match label.strip_prefix('\'').and_then(|l| l.strip_suffix('\'')) {
            Some(quoted) => quoted.replace("''", "'"),
            None => label.to_string(),
        }
    }

    fn parse_mark_rule(rule: Pair<Rule>) -> String {
        format!(" {}", rule.as_str())
    }
}

use std::collections::HashMap;
use std::env;
use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::bail;
use bio::io::fasta::Record;
use itertools::Itertools;
use log::{debug, info, warn};

use crate::errors::EvolError;
use crate::evol_model::{EvolModel, EvolParam, ModelType};
use crate::io::{read_newick_from_file, read_sequences, DataError};
use crate::lrt::lrt_pvalue;
use crate::paml::{parse_codeml_out, parse_rst};
use crate::tree::{NodeIdx, Tree};
use crate::Result;

mod codeml_runner;
mod model_registry;

pub use codeml_runner::*;
pub use model_registry::*;

/// Default location of the codeml working directories.
pub const DEFAULT_WORKDIR: &str = "phylo-evol-codeml";
/// Default codeml binary, looked up on the `PATH`.
pub const DEFAULT_CODEML: &str = "codeml";

static NEXT_TREE_ID: AtomicUsize = AtomicUsize::new(0);

/// Process-unique identity of an [`EvolTree`], carried by its models as a back-reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TreeId(usize);

impl TreeId {
    /// Returns an id that no other tree of this process has.
    pub fn next() -> Self {
        TreeId(NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tree {}", self.0)
    }
}

/// A tree prepared for codeml: nodes labelled with codeml ids, optional branch marks, the
/// linked codon alignment and the registry of models fitted on it.
#[derive(Debug)]
pub struct EvolTree {
    id: TreeId,
    pub tree: Tree,
    sequences: Option<Vec<Record>>,
    /// Every model runs in its own subdirectory of `workdir`.
    pub workdir: PathBuf,
    pub codeml_path: PathBuf,
    models: ModelRegistry,
}

impl EvolTree {
    /// Wraps a tree: sorts its descendants into the canonical order, labels the nodes with
    /// codeml ids and clears any marks read from the newick string.
    ///
    /// # Example
    /// ```
    /// use phylo_evol::evol_tree::EvolTree;
    /// use phylo_evol::tree::tree_parser::from_newick;
    /// let tree = from_newick("((D,C),(B #1,A));").unwrap().pop().unwrap();
    /// let evol_tree = EvolTree::new(tree);
    /// assert_eq!(evol_tree.to_paml_newick(true), "((A,B),(C,D));");
    /// let c = evol_tree.tree.try_idx("C").unwrap();
    /// assert_eq!(evol_tree.tree.node(&c).paml_id, Some(3));
    /// ```
    pub fn new(mut tree: Tree) -> Self {
        tree.sort_descendants();
        tree.label_as_paml();
        tree.clear_marks();
        Self {
            id: TreeId::next(),
            tree,
            sequences: None,
            workdir: env::temp_dir().join(DEFAULT_WORKDIR),
            codeml_path: PathBuf::from(DEFAULT_CODEML),
            models: ModelRegistry::new(),
        }
    }

    /// Reads the first tree of a newick file.
    pub fn from_newick_file(path: &Path) -> Result<Self> {
        let mut trees = read_newick_from_file(path)?.into_iter();
        let Some(tree) = trees.next() else {
            bail!(DataError {
                message: format!("No tree found in {}", path.display())
            });
        };
        if trees.next().is_some() {
            warn!("Found more than one tree in {}, using the first one.", path.display());
        }
        Ok(Self::new(tree))
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_codeml(mut self, codeml_path: impl Into<PathBuf>) -> Self {
        self.codeml_path = codeml_path.into();
        self
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    /// Sequences of the linked alignment in codeml order, `None` before linking.
    pub fn sequences(&self) -> Option<&[Record]> {
        self.sequences.as_deref()
    }

    /// Links the tree to a codon alignment in fasta format.
    ///
    /// Every leaf needs a sequence of the same name; sequences of taxa not in the tree are
    /// ignored. The tree is relabelled afterwards, so the codeml ids and the order of the
    /// sequences always agree.
    pub fn link_to_alignment(&mut self, path: &Path) -> Result<()> {
        let records = read_sequences(path)?;
        let mut by_name: HashMap<&str, &Record> =
            records.iter().map(|rec| (rec.id(), rec)).collect();

        self.tree.label_as_paml();
        let mut ordered = Vec::with_capacity(self.tree.leaves().len());
        let mut missing = Vec::new();
        for idx in self.tree.leaves_by_paml_id() {
            let id = self.tree.node_id(&idx);
            match by_name.remove(id) {
                Some(rec) => ordered.push(rec.clone()),
                None => missing.push(id.to_string()),
            }
        }
        if !missing.is_empty() {
            bail!(DataError {
                message: format!("No sequence found for leaves: {}", missing.join(", "))
            });
        }
        if !by_name.is_empty() {
            info!(
                "Ignoring sequences of taxa not in the tree: {}",
                by_name.keys().sorted().join(", ")
            );
        }
        for rec in &ordered {
            if rec.seq().len() % 3 != 0 {
                warn!(
                    "Sequence {} has length {}, which is not a multiple of 3.",
                    rec.id(),
                    rec.seq().len()
                );
            }
        }
        if !ordered.iter().map(|rec| rec.seq().len()).all_equal() {
            warn!("Sequences have different lengths, codeml expects an alignment.");
        }
        self.sequences = Some(ordered);
        info!("Linked tree to alignment {}", path.display());
        Ok(())
    }

    /// Marks the branches above the given nodes, see [`Tree::mark`].
    pub fn mark(&mut self, node_ids: &[NodeIdx], marks: Option<&[String]>) -> Result<()> {
        self.tree.mark(node_ids, marks)
    }

    /// Marks the branches above the nodes with the given codeml ids.
    pub fn mark_by_paml_ids(&mut self, paml_ids: &[usize], marks: Option<&[String]>) -> Result<()> {
        self.tree.mark_by_paml_ids(paml_ids, marks)
    }

    /// The tree in the newick flavour read by codeml, see [`Tree::to_paml_newick`].
    pub fn to_paml_newick(&self, with_marks: bool) -> String {
        self.tree.to_paml_newick(with_marks)
    }

    /// Writes the codeml newick tree to `path`, replacing an existing file.
    pub fn write(&self, path: &Path, with_marks: bool) -> Result<()> {
        info!("Writing codeml tree to file {}", path.display());
        fs::write(path, format!("{}\n", self.to_paml_newick(with_marks)))?;
        Ok(())
    }

    /// Creates an unfitted model bound to this tree.
    pub fn new_model(&self, name: &str) -> Result<EvolModel> {
        EvolModel::new(name, self.id)
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Registers `model` and fills it in from the codeml output at `path`.
    ///
    /// The model is stored first, under a fresh name if its name is taken (`M0`, `M0__1`,
    /// `M0__2`, ...), so it stays registered even when linking fails. A missing output file
    /// is reported as [`EvolError::MissingOutput`]. Site models also read their per-site
    /// results from `<workdir>/<name>/rst`. The first model linked to the tree sets the
    /// branch lengths of the tree to its estimates.
    ///
    /// Returns the name under which the model is registered.
    pub fn link_to_evol_model(&mut self, path: &Path, mut model: EvolModel) -> Result<String> {
        if model.tree != self.id {
            warn!(
                "Model {} was created for {}, binding it to {}.",
                model.name, model.tree, self.id
            );
            model.tree = self.id;
        }
        let name = self.models.insert_unique(model);
        let rst = self.workdir.join(&name).join("rst");

        let Some(model) = self.models.get_mut(&name) else {
            bail!(EvolError::ModelNotFound(vec![name]));
        };
        if !path.is_file() {
            if let Some(run) = &model.run {
                info!("codeml output for model {}:\n{}", name, run);
            }
            bail!(EvolError::MissingOutput {
                model: name,
                path: path.to_path_buf(),
            });
        }
        parse_codeml_out(path, model)?;
        if model.model_type() == ModelType::Site {
            if !rst.is_file() {
                warn!("No site results for model {} at {}", name, rst.display());
            } else {
                match parse_rst(&rst) {
                    Ok(sites) => model.sites = Some(sites),
                    Err(e) => warn!(
                        "Unable to read site results of model {} from {}: {}",
                        name,
                        rst.display(),
                        e
                    ),
                }
            }
        }

        if self.models.len() == 1 {
            info!("First model linked, setting branch lengths to those of {}", name);
            self.change_dist_to_evol(EvolParam::BranchLength, &name)?;
        }
        info!("Linked model {} to the tree", name);
        Ok(name)
    }

    /// Same as [`EvolTree::link_to_evol_model`] for a bare model built from its name.
    pub fn link_to_evol_model_by_name(&mut self, path: &Path, name: &str) -> Result<String> {
        let model = self.new_model(name)?;
        self.link_to_evol_model(path, model)
    }

    /// Returns a registered model, failing with [`EvolError::ModelNotFound`].
    pub fn get_evol_model(&self, name: &str) -> Result<&EvolModel> {
        match self.models.get(name) {
            Some(model) => Ok(model),
            None => bail!(EvolError::ModelNotFound(vec![name.to_string()])),
        }
    }

    /// Sets the length of every branch to the value of `param` estimated by a registered
    /// model. Branches without an estimate keep their length.
    pub fn change_dist_to_evol(&mut self, param: EvolParam, model_name: &str) -> Result<()> {
        let model = self.get_evol_model(model_name)?;
        let updates: Vec<(NodeIdx, f64)> = self
            .tree
            .descendants()
            .filter_map(|node| {
                let value = model.branch_value(node.paml_id?, param)?;
                Some((node.idx, value))
            })
            .collect();
        let branches = self.tree.descendants().count();
        if updates.len() < branches {
            warn!(
                "Model {} has no {} for {} of {} branches, keeping their lengths.",
                model_name,
                param,
                branches - updates.len(),
                branches
            );
        }
        for (idx, value) in updates {
            self.tree.set_blen(&idx, value);
        }
        debug!("Tree with {} as branch lengths: {}", param, self.tree);
        Ok(())
    }

    /// p-value of the likelihood-ratio test of the `alternative` model against the nested
    /// `null` model.
    ///
    /// Fails with [`EvolError::ModelNotFound`] naming every model that is not registered.
    /// Returns 1.0 if either model has not been fitted.
    ///
    /// Usual comparisons, alternative against null:
    /// * `M2` vs `M1`, `M8` vs `M7`: positive selection on sites;
    /// * `bsA` vs `bsA1`: positive selection on sites of the marked branches;
    /// * `bsA` vs `M1`: relaxation on sites of the marked branches;
    /// * `bsC` vs `M1`, `bsD` vs `M3`: different omegas on the marked clades;
    /// * `b_free` vs `b_neut`: positive selection on the marked branches;
    /// * `b_neut` vs `M0`: relaxation on the marked branches.
    pub fn get_most_likely(&self, alternative: &str, null: &str) -> Result<f64> {
        let missing: Vec<String> = [alternative, null]
            .into_iter()
            .unique()
            .filter(|name| !self.models.contains(name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            bail!(EvolError::ModelNotFound(missing));
        }
        let alternative_fit = self.get_evol_model(alternative)?.fit();
        let null_fit = self.get_evol_model(null)?.fit();
        match (alternative_fit, null_fit) {
            (Some(alternative_fit), Some(null_fit)) => Ok(lrt_pvalue(&alternative_fit, &null_fit)),
            _ => {
                warn!(
                    "Model {} or {} has not been fitted, no likelihood-ratio test possible.",
                    alternative, null
                );
                Ok(1.0)
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;

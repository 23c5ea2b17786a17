use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use anyhow::{bail, Error};

use crate::evol_tree::TreeId;
use crate::lrt::Fit;
use crate::Result;

mod control;
pub use control::*;

/// Level at which a model lets the dN/dS ratio vary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelType {
    Site,
    Branch,
    BranchSite,
    UserDefined,
}

impl Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Site => write!(f, "site"),
            ModelType::Branch => write!(f, "branch"),
            ModelType::BranchSite => write!(f, "branch-site"),
            ModelType::UserDefined => write!(f, "user defined"),
        }
    }
}

/// The codeml models that can be run, named the way model names have to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ModelKind {
    M0,
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
    M7,
    M8,
    M8a,
    bsA,
    bsA1,
    bsB,
    bsC,
    bsD,
    b_free,
    b_neut,
    fb,
    XX,
}

impl ModelKind {
    pub const ALL: [ModelKind; 19] = [
        ModelKind::M0,
        ModelKind::M1,
        ModelKind::M2,
        ModelKind::M3,
        ModelKind::M4,
        ModelKind::M5,
        ModelKind::M6,
        ModelKind::M7,
        ModelKind::M8,
        ModelKind::M8a,
        ModelKind::bsA,
        ModelKind::bsA1,
        ModelKind::bsB,
        ModelKind::bsC,
        ModelKind::bsD,
        ModelKind::b_free,
        ModelKind::b_neut,
        ModelKind::fb,
        ModelKind::XX,
    ];

    /// Finds the kind of a model from its name: the part before the first `.` (and before a
    /// `__N` disambiguation suffix) must be one of the known kinds, e.g. `b_free.vs.lele`.
    pub fn from_model_name(name: &str) -> Result<Self> {
        let base = name.split("__").next().unwrap_or_default();
        base.split('.').next().unwrap_or_default().parse()
    }

    pub fn model_type(&self) -> ModelType {
        use ModelKind::*;
        match self {
            M0 | M1 | M2 | M3 | M4 | M5 | M6 | M7 | M8 | M8a => ModelType::Site,
            bsA | bsA1 | bsB | bsC | bsD => ModelType::BranchSite,
            b_free | b_neut | fb => ModelType::Branch,
            XX => ModelType::UserDefined,
        }
    }

    /// Whether the model reads branch marks from the tree.
    pub fn allow_mark(&self) -> bool {
        use ModelKind::*;
        matches!(self, bsA | bsA1 | bsB | bsC | bsD | b_free | b_neut)
    }

    /// Kind of evolution the model describes.
    pub fn evol(&self) -> &'static str {
        use ModelKind::*;
        match self {
            M0 => "negative-selection",
            M1 => "relaxation",
            M2 => "positive-selection",
            M3 => "discrete",
            M4 => "frequencies",
            M5 => "gamma",
            M6 => "2 gamma",
            M7 => "relaxation",
            M8 => "positive-selection",
            M8a => "relaxation",
            bsA => "positive-selection",
            bsA1 => "relaxation",
            bsB => "positive-selection",
            bsC => "different-ratios",
            bsD => "different-ratios",
            b_free => "positive-selection",
            b_neut => "relaxation",
            fb => "free-ratios",
            XX => "user defined",
        }
    }

    /// Control-file parameters that differ from the defaults for this kind.
    pub fn ctrl_changes(&self) -> &'static [(&'static str, &'static str)] {
        use ModelKind::*;
        match self {
            M0 => &[("NSsites", "0")],
            M1 => &[("NSsites", "1")],
            M2 => &[("NSsites", "2")],
            M3 => &[("NSsites", "3")],
            M4 => &[("NSsites", "4")],
            M5 => &[("NSsites", "5")],
            M6 => &[("NSsites", "6")],
            M7 => &[("NSsites", "7")],
            M8 => &[("NSsites", "8")],
            M8a => &[("NSsites", "8"), ("fix_omega", "1"), ("omega", "1")],
            bsA => &[("model", "2"), ("NSsites", "2")],
            bsA1 => &[
                ("model", "2"),
                ("NSsites", "2"),
                ("fix_omega", "1"),
                ("omega", "1"),
            ],
            bsB => &[("model", "2"), ("NSsites", "3")],
            bsC => &[("model", "3"), ("NSsites", "2")],
            bsD => &[("model", "3"), ("NSsites", "3")],
            b_free => &[("model", "2"), ("NSsites", "0")],
            b_neut => &[
                ("model", "2"),
                ("NSsites", "0"),
                ("fix_omega", "1"),
                ("omega", "1"),
            ],
            fb => &[("model", "1"), ("NSsites", "0")],
            XX => &[],
        }
    }
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match ModelKind::ALL.iter().find(|kind| kind.to_string() == s) {
            Some(kind) => Ok(*kind),
            None => bail!(
                "Unknown model {}, model names need to start with one of: {}",
                s,
                ModelKind::ALL.map(|kind| kind.to_string()).join(", ")
            ),
        }
    }
}

/// Per-branch quantities estimated by codeml.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BranchParams {
    pub bl: Option<f64>,
    pub dn: Option<f64>,
    pub ds: Option<f64>,
    pub w: Option<f64>,
}

/// Branch quantity that can be read off a fitted model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvolParam {
    Dn,
    Ds,
    Omega,
    BranchLength,
}

impl Display for EvolParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvolParam::Dn => write!(f, "dN"),
            EvolParam::Ds => write!(f, "dS"),
            EvolParam::Omega => write!(f, "w"),
            EvolParam::BranchLength => write!(f, "bL"),
        }
    }
}

impl FromStr for EvolParam {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dN" => Ok(EvolParam::Dn),
            "dS" => Ok(EvolParam::Ds),
            "w" | "omega" => Ok(EvolParam::Omega),
            "bL" => Ok(EvolParam::BranchLength),
            _ => bail!("Unknown evolutionary parameter {}, use one of dN, dS, w, bL", s),
        }
    }
}

/// Empirical Bayes estimate for one alignment site.
#[derive(Clone, Debug, PartialEq)]
pub struct SiteEstimate {
    pub site: usize,
    pub residue: char,
    /// Posterior probability of each site class.
    pub probs: Vec<f64>,
    /// Most likely site class, 1-based as reported by codeml.
    pub class: usize,
    /// Posterior mean of omega, not reported for every model.
    pub w: Option<f64>,
    /// Standard error of the posterior mean, only reported by BEB.
    pub se: Option<f64>,
}

/// Site-wise results of a site model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SiteResults {
    /// Naive Empirical Bayes.
    pub neb: Vec<SiteEstimate>,
    /// Bayes Empirical Bayes.
    pub beb: Vec<SiteEstimate>,
}

/// One evolutionary model fitted (or to be fitted) by codeml on a tree.
///
/// A model is created unfitted; the codeml output parsers fill in the log-likelihood, the
/// number of free parameters and the branch and site estimates.
#[derive(Clone, Debug)]
pub struct EvolModel {
    pub name: String,
    pub kind: ModelKind,
    pub(crate) tree: TreeId,
    pub ctrl: CtrlParams,
    /// Number of free parameters.
    pub np: Option<usize>,
    /// Log-likelihood, only present once the model has been fitted.
    pub lnl: Option<f64>,
    /// Branch estimates keyed by the codeml id of the node below the branch.
    pub branches: BTreeMap<usize, BranchParams>,
    /// Named scalar estimates such as `kappa` and `omega`.
    pub params: BTreeMap<String, f64>,
    /// Estimates following the branch lengths on the parameter line of the output.
    pub estimates: Vec<f64>,
    pub sites: Option<SiteResults>,
    /// Captured standard output of the codeml run.
    pub run: Option<String>,
}

impl EvolModel {
    /// Creates an unfitted model for the tree with the given id.
    /// Fails if the name does not start with a known model kind.
    ///
    /// # Example
    /// ```
    /// use phylo_evol::evol_model::{EvolModel, ModelType};
    /// use phylo_evol::evol_tree::TreeId;
    /// let model = EvolModel::new("b_free.clade1", TreeId::next()).unwrap();
    /// assert_eq!(model.model_type(), ModelType::Branch);
    /// assert!(model.allow_mark());
    /// assert_eq!(model.ctrl.get("model"), Some("2"));
    /// ```
    pub fn new(name: &str, tree: TreeId) -> Result<Self> {
        let kind = ModelKind::from_model_name(name)?;
        let mut ctrl = CtrlParams::default();
        for (key, value) in kind.ctrl_changes() {
            ctrl.set(key, *value);
        }
        Ok(Self {
            name: name.to_string(),
            kind,
            tree,
            ctrl,
            np: None,
            lnl: None,
            branches: BTreeMap::new(),
            params: BTreeMap::new(),
            estimates: Vec::new(),
            sites: None,
            run: None,
        })
    }

    /// Creates an unfitted model with additional control-file settings on top of the
    /// defaults for its kind.
    pub fn with_ctrl(name: &str, tree: TreeId, ctrl: &[(&str, &str)]) -> Result<Self> {
        let mut model = Self::new(name, tree)?;
        for (key, value) in ctrl {
            model.ctrl.set(key, *value);
        }
        Ok(model)
    }

    pub fn model_type(&self) -> ModelType {
        self.kind.model_type()
    }

    pub fn allow_mark(&self) -> bool {
        self.kind.allow_mark()
    }

    pub fn is_fitted(&self) -> bool {
        self.lnl.is_some()
    }

    /// Log-likelihood and free-parameter count, if the model has been fitted.
    pub fn fit(&self) -> Option<Fit> {
        Some(Fit {
            lnl: self.lnl?,
            np: self.np?,
        })
    }

    pub fn tree_id(&self) -> TreeId {
        self.tree
    }

    pub fn branch(&self, paml_id: usize) -> Option<&BranchParams> {
        self.branches.get(&paml_id)
    }

    /// Value of `param` for the branch above the node with the given codeml id.
    pub fn branch_value(&self, paml_id: usize, param: EvolParam) -> Option<f64> {
        let branch = self.branch(paml_id)?;
        match param {
            EvolParam::Dn => branch.dn,
            EvolParam::Ds => branch.ds,
            EvolParam::Omega => branch.w,
            EvolParam::BranchLength => branch.bl,
        }
    }

    pub(crate) fn branch_mut(&mut self, paml_id: usize) -> &mut BranchParams {
        self.branches.entry(paml_id).or_default()
    }

    pub fn ctrl_string(&self) -> String {
        self.ctrl.to_ctrl_string()
    }
}

impl Display for EvolModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Evolutionary model {}", self.name)?;
        writeln!(
            f,
            "  kind: {} ({} model of {})",
            self.kind,
            self.model_type(),
            self.kind.evol()
        )?;
        match (self.lnl, self.np) {
            (Some(lnl), Some(np)) => writeln!(f, "  lnL: {} with {} free parameters", lnl, np)?,
            _ => writeln!(f, "  not fitted")?,
        }
        for (name, value) in &self.params {
            writeln!(f, "  {}: {}", name, value)?;
        }
        write!(f, "  {} branch estimates", self.branches.len())
    }
}

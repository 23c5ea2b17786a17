use std::env;
use std::fmt::{self, Display};
use std::path::PathBuf;

use anyhow::{bail, Error};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use phylo_evol::evol_model::ModelKind;
use phylo_evol::evol_tree::{DEFAULT_CODEML, DEFAULT_WORKDIR};

type Result<T> = std::result::Result<T, Error>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(super) struct Cli {
    /// Tree file in newick format
    #[arg(short, long, value_name = "TREE_FILE")]
    pub(super) tree_file: PathBuf,

    /// Directory holding one subdirectory per codeml run
    #[arg(short, long, value_name = "WORKDIR", global = true)]
    pub(super) workdir: Option<PathBuf>,

    /// Path to the codeml binary
    #[arg(short, long, value_name = "CODEML", global = true, default_value = DEFAULT_CODEML)]
    pub(super) codeml: PathBuf,

    /// Log debugging output
    #[arg(short, long, global = true)]
    pub(super) verbose: bool,

    #[command(subcommand)]
    pub(super) command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub(super) enum Commands {
    /// Prints the codeml id of every node of the tree
    Label,

    /// Writes the tree in the newick flavour read by codeml
    Write {
        /// Output file
        #[arg(short, long, value_name = "OUTPUT_FILE")]
        output: PathBuf,

        /// Codeml ids of the nodes whose branches are marked
        #[arg(short, long, value_name = "PAML_ID", value_delimiter = ',')]
        mark: Vec<usize>,

        /// Mark labels, one per marked node (default #1)
        #[arg(long, value_name = "MARK", value_delimiter = ',')]
        marks: Vec<String>,
    },

    /// Runs codeml models on the tree and an alignment
    Run {
        /// Codon alignment in fasta format
        #[arg(short, long, value_name = "SEQ_FILE")]
        seq_file: PathBuf,

        /// Models to run, e.g. M0,M1,M2 or b_free.primates
        #[arg(short = 'm', long, value_name = "MODEL", value_delimiter = ',', required = true)]
        models: Vec<String>,

        /// Codeml ids of the nodes whose branches are marked
        #[arg(long, value_name = "PAML_ID", value_delimiter = ',')]
        mark: Vec<usize>,

        /// Mark labels, one per marked node (default #1)
        #[arg(long, value_name = "MARK", value_delimiter = ',')]
        marks: Vec<String>,
    },

    /// Reads finished runs from the working directory and compares two models
    Compare {
        /// Alternative model
        #[arg(value_name = "ALTERNATIVE")]
        alternative: String,

        /// Null model, nested in the alternative
        #[arg(value_name = "NULL")]
        null: String,
    },
}

impl Display for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Commands::Label => write!(f, "label"),
            Commands::Write {
                output,
                mark,
                marks,
            } => write!(
                f,
                "write to {}, marking {:?} with {:?}",
                output.display(),
                mark,
                marks
            ),
            Commands::Run {
                seq_file,
                models,
                mark,
                marks,
            } => write!(
                f,
                "run {} on {}, marking {:?} with {:?}",
                models.join(", "),
                seq_file.display(),
                mark,
                marks
            ),
            Commands::Compare { alternative, null } => {
                write!(f, "compare {} against {}", alternative, null)
            }
        }
    }
}

pub(super) struct ConfigBuilder {
    tree_file: PathBuf,
    workdir: Option<PathBuf>,
    codeml: PathBuf,
    verbose: bool,
    command: Commands,
}

impl From<Cli> for ConfigBuilder {
    fn from(cli: Cli) -> Self {
        Self {
            tree_file: cli.tree_file,
            workdir: cli.workdir,
            codeml: cli.codeml,
            verbose: cli.verbose,
            command: cli.command,
        }
    }
}

fn check_marks(mark: &[usize], marks: &[String]) -> Result<()> {
    if !marks.is_empty() && marks.len() != mark.len() {
        bail!(
            "Got {} mark labels for {} marked nodes, provide one label per node",
            marks.len(),
            mark.len()
        );
    }
    Ok(())
}

impl ConfigBuilder {
    pub(super) fn setup(self) -> Result<Config> {
        if !self.tree_file.is_file() {
            bail!("Tree file {} does not exist", self.tree_file.display());
        }
        match &self.command {
            Commands::Label => {}
            Commands::Write { mark, marks, .. } => check_marks(mark, marks)?,
            Commands::Run {
                seq_file,
                models,
                mark,
                marks,
            } => {
                if !seq_file.is_file() {
                    bail!("Sequence file {} does not exist", seq_file.display());
                }
                for model in models {
                    ModelKind::from_model_name(model)?;
                }
                check_marks(mark, marks)?;
            }
            Commands::Compare { alternative, null } => {
                ModelKind::from_model_name(alternative)?;
                ModelKind::from_model_name(null)?;
            }
        }
        Ok(Config {
            tree_file: self.tree_file,
            workdir: self
                .workdir
                .unwrap_or_else(|| env::temp_dir().join(DEFAULT_WORKDIR)),
            codeml: self.codeml,
            log_level: if self.verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            },
            command: self.command,
        })
    }
}

pub(super) struct Config {
    pub(super) tree_file: PathBuf,
    pub(super) workdir: PathBuf,
    pub(super) codeml: PathBuf,
    pub(super) log_level: LevelFilter,
    pub(super) command: Commands,
}

impl Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  tree file: {}", self.tree_file.display())?;
        writeln!(f, "  working directory: {}", self.workdir.display())?;
        writeln!(f, "  codeml: {}", self.codeml.display())?;
        writeln!(f, "  log level: {}", self.log_level)?;
        write!(f, "  command: {}", self.command)
    }
}

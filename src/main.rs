use anyhow::{bail, Error};
use clap::Parser;
use ftail::Ftail;
use log::{info, warn};

use phylo_evol::errors::EvolError;
use phylo_evol::evol_tree::{EvolTree, RunOptions};
use phylo_evol::tree::Tree;

mod cli;
use crate::cli::{Cli, Commands, ConfigBuilder};

type Result<T> = std::result::Result<T, Error>;

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            bail!("Unable to parse command line arguments: \n {}", error)
        }
    };
    let cfg_build: ConfigBuilder = cli.into();
    let cfg = cfg_build.setup()?;
    if let Err(e) = Ftail::new().console(cfg.log_level).init() {
        bail!("Unable to set up logging: {:?}", e);
    }

    info!("phylo-evol run started.");
    info!("{}", cfg);

    let mut evol_tree = EvolTree::from_newick_file(&cfg.tree_file)?
        .with_workdir(cfg.workdir.clone())
        .with_codeml(cfg.codeml.clone());

    match cfg.command {
        Commands::Label => print_labels(&evol_tree.tree),
        Commands::Write {
            output,
            mark,
            marks,
        } => {
            mark_tree(&mut evol_tree, &mark, &marks)?;
            evol_tree.write(&output, !mark.is_empty())?;
            info!("Put codeml tree in {}", output.display());
        }
        Commands::Run {
            seq_file,
            models,
            mark,
            marks,
        } => {
            evol_tree.link_to_alignment(&seq_file)?;
            mark_tree(&mut evol_tree, &mark, &marks)?;
            for name in &models {
                match evol_tree.run_model(name, &RunOptions::default()) {
                    Ok(run) => {
                        info!("Results of model {} are in {}", run.model, run.dir.display());
                        println!("{}", evol_tree.get_evol_model(&run.model)?);
                    }
                    Err(e) => match e.downcast_ref::<EvolError>() {
                        Some(EvolError::MissingOutput { .. }) => warn!("{}", e),
                        _ => return Err(e),
                    },
                }
            }
        }
        Commands::Compare { alternative, null } => {
            for name in [&alternative, &null] {
                let out = cfg.workdir.join(name).join("out");
                if let Err(e) = evol_tree.link_to_evol_model_by_name(&out, name) {
                    warn!("{}", e);
                }
            }
            let pvalue = evol_tree.get_most_likely(&alternative, &null)?;
            println!("{} vs {}: p-value {}", alternative, null, pvalue);
        }
    }
    Ok(())
}

fn mark_tree(evol_tree: &mut EvolTree, mark: &[usize], marks: &[String]) -> Result<()> {
    if mark.is_empty() {
        return Ok(());
    }
    let marks = if marks.is_empty() { None } else { Some(marks) };
    evol_tree.mark_by_paml_ids(mark, marks)
}

fn print_labels(tree: &Tree) {
    let mut nodes: Vec<_> = tree.nodes().collect();
    nodes.sort_by_key(|node| node.paml_id);
    for node in nodes {
        let leaves: Vec<&str> = tree
            .preorder_subroot(&node.idx)
            .iter()
            .filter(|idx| tree.children(idx).is_empty())
            .map(|idx| tree.node_id(idx))
            .collect();
        let paml_id = node.paml_id.map(|id| id.to_string()).unwrap_or_default();
        println!("{}\t{}", paml_id, leaves.join(","));
    }
}

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use anyhow::bail;
use log::{debug, info, warn};

use crate::evol_tree::EvolTree;
use crate::io::write_paml_alignment;
use crate::Result;

/// How a codeml run is set up and what is kept of it.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Control file to use instead of the one generated for the model.
    pub ctrl_string: Option<String>,
    /// Control-file settings applied on top of the defaults of the model kind.
    pub ctrl: Vec<(String, String)>,
    /// Store the captured output on the model and link the results to the tree.
    pub keep: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ctrl_string: None,
            ctrl: Vec::new(),
            keep: true,
        }
    }
}

/// Outcome of a finished codeml process.
#[derive(Clone, Debug)]
pub struct CodemlRun {
    /// Name of the model, as registered when the run was kept.
    pub model: String,
    /// Directory holding the inputs and outputs of the run.
    pub dir: PathBuf,
    /// Captured standard output of codeml.
    pub stdout: String,
}

impl EvolTree {
    /// Runs codeml for the model `name` in `<workdir>/<name>`.
    ///
    /// Writes the alignment (`algn`), the tree (`tree`, with branch marks only for models
    /// that read them) and the control file (`tmp.ctl`), then runs `codeml tmp.ctl` in that
    /// directory and waits for it to finish. A name that is already registered gets a
    /// `__N` suffix before anything is written, so earlier runs are never overwritten. The
    /// tree has to be linked to an alignment first.
    pub fn run_model(&mut self, name: &str, options: &RunOptions) -> Result<CodemlRun> {
        let Some(sequences) = &self.sequences else {
            bail!("Tree is not linked to an alignment, link one before running codeml");
        };
        let mut model = self.new_model(name)?;
        model.name = self.models().unique_name(name);
        for (key, value) in &options.ctrl {
            model.ctrl.set(key, value.as_str());
        }

        let dir = self.workdir.join(&model.name);
        info!("Preparing codeml run of model {} in {}", model.name, dir.display());
        fs::create_dir_all(&dir)?;
        write_paml_alignment(sequences, &dir.join("algn"))?;
        fs::write(dir.join("tree"), self.to_paml_newick(model.allow_mark()))?;
        let ctrl = match &options.ctrl_string {
            Some(ctrl) => ctrl.clone(),
            None => model.ctrl_string(),
        };
        fs::write(dir.join("tmp.ctl"), ctrl)?;

        info!("Running {} for model {}", self.codeml_path.display(), model.name);
        let output = match Command::new(&self.codeml_path)
            .arg("tmp.ctl")
            .current_dir(&dir)
            .output()
        {
            Ok(output) => output,
            Err(e) => bail!(
                "Unable to run codeml at {}: {}. Set the path to the codeml binary.",
                self.codeml_path.display(),
                e
            ),
        };
        if !output.status.success() {
            warn!("codeml exited with {} for model {}", output.status, model.name);
        }
        if !output.stderr.is_empty() {
            debug!("codeml stderr: {}", String::from_utf8_lossy(&output.stderr));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        info!("Finished codeml run of model {}", model.name);

        let mut run = CodemlRun {
            model: model.name.clone(),
            dir,
            stdout,
        };
        if options.keep {
            model.run = Some(run.stdout.clone());
            run.model = self.link_to_evol_model(&run.dir.join("out"), model)?;
        }
        Ok(run)
    }
}

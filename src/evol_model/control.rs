use std::fmt::{self, Display};

/// Default codeml control parameters, in the order they are written to the control file.
const DEFAULT_CTRL: [(&str, &str); 28] = [
    ("seqfile", "algn"),
    ("treefile", "tree"),
    ("outfile", "out"),
    ("noisy", "0"),
    ("verbose", "2"),
    ("runmode", "0"),
    ("seqtype", "1"),
    ("CodonFreq", "2"),
    ("clock", "0"),
    ("aaDist", "0"),
    ("model", "0"),
    ("NSsites", "2"),
    ("icode", "0"),
    ("Mgene", "0"),
    ("fix_kappa", "0"),
    ("kappa", "2"),
    ("fix_omega", "0"),
    ("omega", "0.7"),
    ("fix_alpha", "1"),
    ("alpha", "0."),
    ("Malpha", "0"),
    ("ncatG", "8"),
    ("getSE", "0"),
    ("RateAncestor", "0"),
    ("fix_blength", "0"),
    ("Small_Diff", ".5e-6"),
    ("cleandata", "0"),
    ("method", "0"),
];

/// Parameters of a codeml control file.
#[derive(Debug, Clone, PartialEq)]
pub struct CtrlParams {
    params: Vec<(String, String)>,
}

impl Default for CtrlParams {
    fn default() -> Self {
        Self {
            params: DEFAULT_CTRL
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl CtrlParams {
    /// Sets a parameter, appending it if it is not one of the defaults.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.params.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_ctrl_string(&self) -> String {
        self.to_string()
    }
}

impl Display for CtrlParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.params {
            writeln!(f, "{:>15} = {}", key, value)?;
        }
        Ok(())
    }
}

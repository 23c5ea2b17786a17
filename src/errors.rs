use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Recoverable conditions reported while preparing codeml runs and consuming their results.
/// Returned inside [`anyhow::Error`], callers can recover the kind with `downcast_ref`.
#[derive(Debug, Clone, PartialEq)]
pub enum EvolError {
    /// The output file of a codeml run does not exist; the model is registered but unfitted.
    MissingOutput { model: String, path: PathBuf },
    /// One or more models requested for a comparison are not registered.
    ModelNotFound(Vec<String>),
    /// A branch mark that is not `#` followed by an integer.
    MalformedMark(String),
}

impl fmt::Display for EvolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvolError::MissingOutput { model, path } => write!(
                f,
                "Output of model {} not found, not a file: {}",
                model,
                path.display()
            ),
            EvolError::ModelNotFound(names) => {
                write!(f, "Model(s) not computed: {}", names.join(", "))
            }
            EvolError::MalformedMark(mark) => write!(
                f,
                "Malformed mark \"{}\", marks should be a \"#\" sign directly followed by an integer",
                mark
            ),
        }
    }
}

impl Error for EvolError {}

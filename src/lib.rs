use anyhow::Error;

pub mod errors;
pub mod evol_model;
pub mod evol_tree;
pub mod io;
pub mod lrt;
pub mod paml;
pub mod tree;

mod macros;

type Result<T> = std::result::Result<T, Error>;

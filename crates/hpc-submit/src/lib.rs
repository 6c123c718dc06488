pub mod backend;
pub mod common;
pub mod config;
pub mod submit;

pub type Error = crate::common::error::SubmitError;
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the directory (inside the project) that holds generated artifacts by default.
pub const GENERATED_DIR_NAME: &str = ".hpc_submit_gen";

pub const HPC_SUBMIT_VERSION: &str = env!("CARGO_PKG_VERSION");

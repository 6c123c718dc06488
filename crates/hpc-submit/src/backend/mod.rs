//! Backends turn a validated configuration into submit artifacts for one execution target.

pub mod common;
pub mod htcondor;
pub mod registry;
pub mod spacehpc;
pub mod writer;

use std::path::PathBuf;

use crate::config::BackendSchema;
pub use registry::{BackendEntry, BackendRegistry};
pub use writer::{ArtifactWriter, DATA_FILE_MODE, SCRIPT_FILE_MODE};

/// Renders the artifacts of a backend whose configuration was already validated.
pub trait Generator: std::fmt::Debug {
    /// Writes all artifacts through `writer` and returns the path of the submission script.
    ///
    /// Artifacts are written in dependency order: the wrapper script, the scheduler descriptor
    /// that references it and finally the script that submits the descriptor.
    fn generate(&self, writer: &ArtifactWriter) -> crate::Result<PathBuf>;
}

/// A backend that can be registered in a [`BackendRegistry`].
///
/// By convention, a backend named `foo` is implemented by `FooBackend` with configuration
/// `FooConfig`, and reads its own keys from the `foo` section of the configuration.
pub trait Backend: Generator + Sized + 'static {
    /// Lowercase name used to select the backend.
    const NAME: &'static str;

    type Config: BackendSchema;

    fn new(config: Self::Config) -> Self;
}

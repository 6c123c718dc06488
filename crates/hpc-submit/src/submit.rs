//! Single invocation of the generator: layered configuration in, artifact directory out.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::GENERATED_DIR_NAME;
use crate::backend::{ArtifactWriter, BackendRegistry};
use crate::config::layers::CONFIG_FILE_NAME;
use crate::config::{ConfigLocations, merge, parse_overrides};

/// Everything needed to generate the artifacts of one job.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Name of the backend.
    pub mode: String,
    pub project: PathBuf,
    /// Project configuration layer, `<project>/hpc_submit.conf` if not set.
    pub project_config: Option<PathBuf>,
    /// Raw `KEY=VALUE` overrides.
    pub overrides: Vec<String>,
    /// Output directory, `<project>/.hpc_submit_gen` if not set.
    pub outdir: Option<PathBuf>,
    pub locations: ConfigLocations,
}

impl GenerateRequest {
    fn project_config(&self) -> PathBuf {
        self.project_config
            .clone()
            .unwrap_or_else(|| self.project.join(CONFIG_FILE_NAME))
    }

    fn outdir(&self) -> PathBuf {
        self.outdir
            .clone()
            .unwrap_or_else(|| self.project.join(GENERATED_DIR_NAME))
    }
}

/// Lowest layer: values implied by the command line itself.
fn project_defaults(project: &Path) -> Mapping {
    let mut defaults = Mapping::new();
    defaults.insert(
        Value::String("project_dir".to_string()),
        Value::String(project.to_string_lossy().into_owned()),
    );
    defaults
}

/// Validates the configuration of `request` and writes the artifacts of the selected backend.
///
/// Returns the output directory. Nothing is written unless the configuration is valid.
pub fn generate(request: &GenerateRequest, registry: &BackendRegistry) -> crate::Result<PathBuf> {
    let overrides = parse_overrides(&request.overrides)?;
    let layered = request
        .locations
        .resolve(Some(&request.project_config()), overrides)?;
    let merged = merge(project_defaults(&request.project), layered);

    let backend = registry.resolve(&request.mode)?;
    let generator = backend.instantiate(&merged)?;

    let writer = ArtifactWriter::new(&request.outdir())?;
    let submit_script = generator.generate(&writer)?;
    log::info!(
        "Generated {} artifacts, submit with {}",
        backend.name(),
        submit_script.display()
    );
    Ok(writer.directory().to_path_buf())
}

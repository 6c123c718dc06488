//! Local HTCondor pool running the job in a Singularity/Apptainer container.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde_yaml::Mapping;

use crate::backend::common::{MNT_DATA, MNT_OUTPUT, MNT_PROJECT, WrapperScript, container_binds};
use crate::backend::{ArtifactWriter, Backend, DATA_FILE_MODE, Generator, SCRIPT_FILE_MODE};
use crate::common::error::SubmitError;
use crate::common::utils::fs::absolute_path;
use crate::common::utils::str::{condor_arguments, shell_quote};
use crate::config::{BackendSchema, BaseConfig, Section};

const FILE_SUB: &str = "htcondor_job.sub";
const FILE_SH: &str = "htcondor_job.sh";
const FILE_SUBMIT: &str = "htcondor_submit.sh";

/// The scratch directory is private to a single job, so the environment is rebuilt per job
/// unless `venv` points to a shared location.
const DEFAULT_VENV: &str = "${_CONDOR_SCRATCH_DIR}/.venv";

#[derive(Debug, Clone, PartialEq)]
pub struct HtcondorConfig {
    base: BaseConfig,
    pool: String,
    schedd: String,
    cpus: u32,
    gpus: u32,
    ram: String,
    args_file: Option<PathBuf>,
}

impl HtcondorConfig {
    pub fn base(&self) -> &BaseConfig {
        &self.base
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn schedd(&self) -> &str {
        &self.schedd
    }

    pub fn cpus(&self) -> u32 {
        self.cpus
    }

    pub fn gpus(&self) -> u32 {
        self.gpus
    }

    pub fn ram(&self) -> &str {
        &self.ram
    }

    /// File with one line of arguments per job instance.
    pub fn args_file(&self) -> Option<&Path> {
        self.args_file.as_deref()
    }
}

impl BackendSchema for HtcondorConfig {
    fn from_merged(merged: &Mapping) -> crate::Result<Self> {
        let base = BaseConfig::parse(merged)?;
        let section = Section::nested(merged, HtcondorBackend::NAME)?;
        let args_file = section.optional_path("args_file")?;
        if let (Some(path), false) = (&args_file, base.args().is_empty()) {
            return Err(SubmitError::InvalidValue {
                key: format!("{}.args_file", HtcondorBackend::NAME),
                expected: "no top-level args when arguments are read from a file",
                found: format!("{path:?}"),
            });
        }
        Ok(Self {
            base,
            pool: section.required_str("pool")?,
            schedd: section.required_str("schedd")?,
            cpus: section.optional_u32("cpus", 1)?,
            gpus: section.optional_u32("gpus", 0)?,
            ram: section.optional_str("ram", "1G")?,
            args_file,
        })
    }
}

/// How job arguments reach the wrapper script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CondorArguments {
    None,
    /// Arguments written directly into the descriptor.
    Inline(String),
    /// One job per line of the file, the line is available as `$(args)`.
    FromFile(PathBuf),
}

/// Variables of the HTCondor submit description.
#[derive(Debug, Clone)]
pub struct CondorSubmitDescription<'a> {
    pub executable: &'a Path,
    pub arguments: CondorArguments,
    pub cpus: u32,
    pub gpus: u32,
    pub memory: &'a str,
    /// Host directory for the job's stdout, stderr and the HTCondor log.
    pub log_dir: PathBuf,
    pub image: PathBuf,
    pub binds: String,
}

impl CondorSubmitDescription<'_> {
    pub fn render(&self) -> String {
        let log_dir = self.log_dir.display();
        let mut lines = vec![
            "universe = vanilla".to_string(),
            format!("executable = {}", self.executable.display()),
        ];
        match &self.arguments {
            CondorArguments::None => {}
            CondorArguments::Inline(arguments) => lines.push(format!("arguments = {arguments}")),
            CondorArguments::FromFile(_) => lines.push("arguments = $(args)".to_string()),
        }
        lines.push("should_transfer_files = NO".to_string());
        lines.push(format!("request_cpus = {}", self.cpus));
        if self.gpus > 0 {
            lines.push(format!("request_gpus = {}", self.gpus));
        }
        lines.push(format!("request_memory = {}", self.memory));
        lines.extend([
            format!("output = {log_dir}/$(Cluster).$(Process).out"),
            format!("error = {log_dir}/$(Cluster).$(Process).err"),
            format!("log = {log_dir}/$(Cluster).log"),
            String::new(),
            "+SingularityJob = True".to_string(),
            format!("+SingularityImage = \"{}\"", self.image.display()),
            format!("+SingularityBind = \"{}\"", self.binds),
            String::new(),
            format!(
                "environment = \"PROJECT_DIR={MNT_PROJECT} DATA_DIR={MNT_DATA} OUTPUT_DIR={MNT_OUTPUT}\""
            ),
            String::new(),
        ]);
        match &self.arguments {
            CondorArguments::FromFile(path) => {
                lines.push(format!("queue args from {}", path.display()))
            }
            _ => lines.push("queue".to_string()),
        }

        let mut description = lines.join("\n");
        description.push('\n');
        description
    }
}

/// Variables of the script that hands the description over to the schedd.
#[derive(Debug, Clone)]
pub struct CondorSubmitScript<'a> {
    pub pool: &'a str,
    pub schedd: &'a str,
    pub description: &'a Path,
}

impl CondorSubmitScript<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"#!/bin/bash
set -euo pipefail

condor_submit -pool {pool} -name {schedd} {description}
"#,
            pool = shell_quote(self.pool),
            schedd = shell_quote(self.schedd),
            description = shell_quote(&self.description.display().to_string()),
        )
    }
}

#[derive(Debug)]
pub struct HtcondorBackend {
    config: HtcondorConfig,
}

impl HtcondorBackend {
    fn submit_description<'a>(
        &'a self,
        wrapper: &'a Path,
    ) -> crate::Result<CondorSubmitDescription<'a>> {
        let base = self.config.base();
        let output_dir = absolute_path(base.output_dir())?;
        let binds = container_binds(
            absolute_path(base.project_dir())?.display().to_string(),
            absolute_path(base.data_dir())?.display().to_string(),
            output_dir.display().to_string(),
        );
        let arguments = match self.config.args_file() {
            Some(path) => CondorArguments::FromFile(absolute_path(path)?),
            None if base.args().is_empty() => CondorArguments::None,
            None => CondorArguments::Inline(condor_arguments(base.args())),
        };
        Ok(CondorSubmitDescription {
            executable: wrapper,
            arguments,
            cpus: self.config.cpus(),
            gpus: self.config.gpus(),
            memory: self.config.ram(),
            log_dir: output_dir,
            image: absolute_path(base.image())?,
            binds: binds.iter().join(","),
        })
    }
}

impl Generator for HtcondorBackend {
    fn generate(&self, writer: &ArtifactWriter) -> crate::Result<PathBuf> {
        let wrapper = WrapperScript::from_config(self.config.base(), DEFAULT_VENV);
        let wrapper_path = writer.write(FILE_SH, &wrapper.render(), SCRIPT_FILE_MODE)?;

        let description = self.submit_description(&wrapper_path)?.render();
        let description_path = writer.write(FILE_SUB, &description, DATA_FILE_MODE)?;

        let script = CondorSubmitScript {
            pool: self.config.pool(),
            schedd: self.config.schedd(),
            description: &description_path,
        };
        writer.write(FILE_SUBMIT, &script.render(), SCRIPT_FILE_MODE)
    }
}

impl Backend for HtcondorBackend {
    const NAME: &'static str = "htcondor";

    type Config = HtcondorConfig;

    fn new(config: Self::Config) -> Self {
        Self { config }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CondorArguments, CondorSubmitDescription, CondorSubmitScript, HtcondorBackend,
        HtcondorConfig,
    };
    use crate::backend::{ArtifactWriter, Backend, Generator};
    use crate::common::error::SubmitError;
    use crate::config::{BackendSchema, parse_overrides};
    use serde_yaml::Mapping;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn merged(overrides: &[&str]) -> Mapping {
        let mut items = vec![
            "project_dir=/proj",
            "data_dir=/data",
            "output_dir=/out",
            "image=/img.sif",
            "executable=run.py",
            "htcondor.pool=P",
            "htcondor.schedd=S",
        ];
        items.extend_from_slice(overrides);
        parse_overrides(&items).unwrap()
    }

    fn generate(overrides: &[&str]) -> (TempDir, PathBuf) {
        let config = HtcondorConfig::from_merged(&merged(overrides)).unwrap();
        let tmp = TempDir::with_prefix("hpc").unwrap();
        let writer = ArtifactWriter::new(&tmp.path().join("gen")).unwrap();
        let path = HtcondorBackend::new(config).generate(&writer).unwrap();
        (tmp, path)
    }

    fn read(tmp: &TempDir, name: &str) -> String {
        std::fs::read_to_string(tmp.path().join("gen").join(name)).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = HtcondorConfig::from_merged(&merged(&[])).unwrap();
        assert_eq!(config.pool(), "P");
        assert_eq!(config.schedd(), "S");
        assert_eq!(config.cpus(), 1);
        assert_eq!(config.gpus(), 0);
        assert_eq!(config.ram(), "1G");
        assert_eq!(config.args_file(), None);
    }

    #[test]
    fn test_config_missing_schedd() {
        let mut merged = merged(&[]);
        merged
            .get_mut("htcondor")
            .and_then(|v| v.as_mapping_mut())
            .unwrap()
            .remove("schedd");
        assert!(matches!(
            HtcondorConfig::from_merged(&merged),
            Err(SubmitError::MissingRequiredKey(key)) if key == "htcondor.schedd"
        ));
    }

    #[test]
    fn test_config_invalid_cpus() {
        assert!(matches!(
            HtcondorConfig::from_merged(&merged(&["htcondor.cpus=many"])),
            Err(SubmitError::InvalidValue { key, .. }) if key == "htcondor.cpus"
        ));
    }

    #[test]
    fn test_end_to_end() {
        let (tmp, submit) = generate(&["htcondor.cpus=2", "htcondor.ram=2G"]);
        let gen_dir = tmp.path().join("gen");
        assert_eq!(submit, gen_dir.join("htcondor_submit.sh"));

        let description = read(&tmp, "htcondor_job.sub");
        assert!(description.contains("request_cpus = 2\n"));
        assert!(description.contains("request_memory = 2G\n"));
        assert!(!description.contains("request_gpus"));
        assert!(description.contains(&format!(
            "executable = {}\n",
            gen_dir.join("htcondor_job.sh").display()
        )));
        assert!(description.contains("+SingularityImage = \"/img.sif\"\n"));
        assert!(
            description.contains("+SingularityBind = \"/proj:/project,/data:/data,/out:/output\"\n")
        );
        assert!(description.contains("log = /out/$(Cluster).log\n"));
        assert!(description.contains(
            "environment = \"PROJECT_DIR=/project DATA_DIR=/data OUTPUT_DIR=/output\"\n"
        ));
        assert!(description.ends_with("\nqueue\n"));

        let wrapper = read(&tmp, "htcondor_job.sh");
        assert!(wrapper.contains("exec python3 /project/run.py \"$@\""));

        let script = read(&tmp, "htcondor_submit.sh");
        assert!(script.contains(&format!(
            "condor_submit -pool P -name S {}\n",
            gen_dir.join("htcondor_job.sub").display()
        )));

        let mode = |name: &str| {
            std::fs::metadata(gen_dir.join(name))
                .unwrap()
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode("htcondor_job.sub"), 0o644);
        assert_eq!(mode("htcondor_job.sh"), 0o755);
        assert_eq!(mode("htcondor_submit.sh"), 0o755);
    }

    #[test]
    fn test_gpus_and_inline_arguments() {
        let (tmp, _) = generate(&["htcondor.gpus=1", "args=[--n, 5, a b]"]);
        let description = read(&tmp, "htcondor_job.sub");
        assert!(description.contains("request_gpus = 1\n"));
        assert!(description.contains("arguments = \"--n 5 'a b'\"\n"));
    }

    #[test]
    fn test_arguments_from_file() {
        let (tmp, _) = generate(&["htcondor.args_file=/proj/args.txt"]);
        let description = read(&tmp, "htcondor_job.sub");
        assert!(description.contains("arguments = $(args)\n"));
        assert!(description.ends_with("queue args from /proj/args.txt\n"));
    }

    #[test]
    fn test_arguments_file_conflicts_with_args() {
        assert!(matches!(
            HtcondorConfig::from_merged(&merged(&[
                "htcondor.args_file=/proj/args.txt",
                "args=[--n, 5]",
            ])),
            Err(SubmitError::InvalidValue { key, .. }) if key == "htcondor.args_file"
        ));
    }

    #[test]
    fn test_default_venv_is_scratch() {
        let (tmp, _) = generate(&["requirements=requirements.txt"]);
        let wrapper = read(&tmp, "htcondor_job.sh");
        assert!(wrapper.contains("VENV=\"${_CONDOR_SCRATCH_DIR}/.venv\"\n"));
        assert!(wrapper.contains("REQUIREMENTS=\"/project/requirements.txt\"\n"));
    }

    #[test]
    fn test_render_description() {
        let description = CondorSubmitDescription {
            executable: Path::new("/gen/htcondor_job.sh"),
            arguments: CondorArguments::None,
            cpus: 4,
            gpus: 2,
            memory: "8G",
            log_dir: PathBuf::from("/results"),
            image: PathBuf::from("/img.sif"),
            binds: "/p:/project".to_string(),
        };
        insta::assert_snapshot!(description.render(), @r###"
        universe = vanilla
        executable = /gen/htcondor_job.sh
        should_transfer_files = NO
        request_cpus = 4
        request_gpus = 2
        request_memory = 8G
        output = /results/$(Cluster).$(Process).out
        error = /results/$(Cluster).$(Process).err
        log = /results/$(Cluster).log

        +SingularityJob = True
        +SingularityImage = "/img.sif"
        +SingularityBind = "/p:/project"

        environment = "PROJECT_DIR=/project DATA_DIR=/data OUTPUT_DIR=/output"

        queue
        "###);
    }

    #[test]
    fn test_render_submit_script() {
        let script = CondorSubmitScript {
            pool: "cm.example.org",
            schedd: "submit 1",
            description: Path::new("/gen/htcondor_job.sub"),
        };
        insta::assert_snapshot!(script.render(), @r###"
        #!/bin/bash
        set -euo pipefail

        condor_submit -pool cm.example.org -name 'submit 1' /gen/htcondor_job.sub
        "###);
    }
}

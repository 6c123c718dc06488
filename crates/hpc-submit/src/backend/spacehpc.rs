//! Remote PBS site: inputs are staged over SSH/rsync to a login node and the job is submitted
//! there with `qsub`, running inside an Apptainer container.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde_yaml::Mapping;

use crate::GENERATED_DIR_NAME;
use crate::backend::common::{
    BindMount, MNT_DATA, MNT_OUTPUT, MNT_PROJECT, WrapperScript, container_binds,
};
use crate::backend::{ArtifactWriter, Backend, DATA_FILE_MODE, Generator, SCRIPT_FILE_MODE};
use crate::common::error::SubmitError;
use crate::common::utils::fs::absolute_path;
use crate::common::utils::str::{shell_join, shell_quote};
use crate::common::utils::time::normalize_walltime;
use crate::config::{BackendSchema, BaseConfig, Section};

const FILE_PBS: &str = "job.pbs";
const FILE_SH: &str = "job.sh";
const FILE_SUBMIT: &str = "submit_spacehpc.sh";

/// Lives in the synchronized project directory, so it is shared by all jobs of the project.
/// The project sync must never delete it.
const DEFAULT_VENV: &str = "/project/.venv";
const VENV_DIR_NAME: &str = ".venv";

/// Characters that cannot be embedded in the remote ssh and `qsub -v` command strings.
const REMOTE_UNSAFE_CHARS: [char; 5] = ['"', '$', '`', '\\', ','];

const DEFAULT_SCRATCH_BASE: &str = "${SPACEHPC_SCRATCH_BASE:-/scratch}";
const DEFAULT_PROJECTS_BASE: &str = "${SPACEHPC_PROJECTS_BASE:-/shared/projects}";

/// Variables passed from the submission script to the PBS job through `qsub -v`.
const REMOTE_JOB_VARS: [&str; 4] = [
    "REMOTE_PROJ_DIR",
    "REMOTE_DATA_DIR",
    "REMOTE_OUT_DIR",
    "REMOTE_IMAGE",
];

/// Final path components of the staged inputs, reused as directory names on the remote site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNames {
    pub project: String,
    pub data: String,
    pub output: String,
    pub image: String,
}

impl RemoteNames {
    fn from_base(base: &BaseConfig) -> crate::Result<Self> {
        Ok(Self {
            project: final_component("project_dir", base.project_dir())?,
            data: final_component("data_dir", base.data_dir())?,
            output: final_component("output_dir", base.output_dir())?,
            image: final_component("image", base.image())?,
        })
    }
}

fn final_component(key: &str, path: &Path) -> crate::Result<String> {
    let invalid = |expected| SubmitError::InvalidValue {
        key: key.to_string(),
        expected,
        found: format!("{path:?}"),
    };
    let name = absolute_path(path)?
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| invalid("a path with a final component"))?;
    if name.contains(REMOTE_UNSAFE_CHARS) {
        return Err(invalid("a final component without '\"', '$', '`', '\\' or ','"));
    }
    Ok(name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpacehpcConfig {
    base: BaseConfig,
    login_node: String,
    user: String,
    ssh_key: PathBuf,
    project: String,
    queue: String,
    nodes: u32,
    cpus: u32,
    gpus: u32,
    ram: String,
    walltime: String,
    job_name: String,
    scratch_dir: String,
    projects_dir: String,
    remote_names: RemoteNames,
}

impl SpacehpcConfig {
    pub fn base(&self) -> &BaseConfig {
        &self.base
    }

    pub fn login_node(&self) -> &str {
        &self.login_node
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn ssh_key(&self) -> &Path {
        &self.ssh_key
    }

    /// Project (accounting group) on the remote site.
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn queue(&self) -> Option<&str> {
        Some(self.queue.as_str()).filter(|queue| !queue.is_empty())
    }

    pub fn nodes(&self) -> u32 {
        self.nodes
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

    /// Walltime in the `HH:MM:SS` format.
    pub fn walltime(&self) -> &str {
        &self.walltime
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn remote_names(&self) -> &RemoteNames {
        &self.remote_names
    }

    /// Shell expression of the remote scratch base directory.
    fn scratch_base(&self) -> String {
        match self.scratch_dir.as_str() {
            "" => DEFAULT_SCRATCH_BASE.to_string(),
            dir => shell_quote(dir).into_owned(),
        }
    }

    /// Shell expression of the remote projects base directory.
    fn projects_base(&self) -> String {
        match self.projects_dir.as_str() {
            "" => DEFAULT_PROJECTS_BASE.to_string(),
            dir => shell_quote(dir).into_owned(),
        }
    }
}

impl BackendSchema for SpacehpcConfig {
    fn from_merged(merged: &Mapping) -> crate::Result<Self> {
        let base = BaseConfig::parse(merged)?;
        let section = Section::nested(merged, SpacehpcBackend::NAME)?;

        let login_node = section.required_str("login_node")?;
        let user = section.required_str("user")?;
        let ssh_key = section.required_path("ssh_key")?;
        let project = section.required_str("project")?;

        let walltime = section.optional_str("walltime", "00:10:00")?;
        let walltime =
            normalize_walltime(&walltime).ok_or_else(|| SubmitError::InvalidValue {
                key: format!("{}.walltime", SpacehpcBackend::NAME),
                expected: "HH:MM:SS or a duration such as 90m",
                found: format!("{walltime:?}"),
            })?;

        Ok(Self {
            login_node,
            user,
            ssh_key,
            project,
            queue: section.optional_str("queue", "")?,
            nodes: section.optional_u32("nodes", 1)?,
            cpus: section.optional_u32("cpus", 1)?,
            gpus: section.optional_u32("gpus", 0)?,
            ram: section.optional_str("ram", "1G")?,
            walltime,
            job_name: section.optional_str("job_name", "hpc_submit")?,
            scratch_dir: section.optional_str("scratch_dir", "")?,
            projects_dir: section.optional_str("projects_dir", "")?,
            remote_names: RemoteNames::from_base(&base)?,
            base,
        })
    }
}

/// Variables of the PBS job script executed on the remote site.
#[derive(Debug, Clone)]
pub struct PbsJobScript<'a> {
    pub job_name: &'a str,
    pub queue: Option<&'a str>,
    pub nodes: u32,
    pub cpus: u32,
    pub gpus: u32,
    pub memory: &'a str,
    pub walltime: &'a str,
    pub binds: [BindMount; 3],
    /// Wrapper script path inside the container.
    pub wrapper: String,
    pub args: &'a [String],
}

impl PbsJobScript<'_> {
    pub fn render(&self) -> String {
        let mut script = format!("#!/bin/bash\n#PBS -N {}\n", self.job_name);
        if let Some(queue) = self.queue {
            script.push_str(&format!("#PBS -q {queue}\n"));
        }
        let mut select = format!("select={}:ncpus={}", self.nodes, self.cpus);
        if self.gpus > 0 {
            select.push_str(&format!(":ngpus={}", self.gpus));
        }
        script.push_str(&format!(
            "#PBS -l {select}:mem={memory}\n#PBS -l walltime={walltime}\n#PBS -j oe\n#PBS -V\n",
            memory = self.memory,
            walltime = self.walltime
        ));

        script.push_str("\nset -euo pipefail\n\n");
        for var in REMOTE_JOB_VARS {
            script.push_str(&format!(": \"${{{var}:?}}\"\n"));
        }
        script.push_str("\ncd \"$REMOTE_PROJ_DIR\"\nmkdir -p \"$REMOTE_OUT_DIR\"\n\napptainer exec \\\n");
        for bind in &self.binds {
            script.push_str(&format!("  --bind \"{bind}\" \\\n"));
        }
        script.push_str(&format!(
            "  --env PROJECT_DIR={MNT_PROJECT},DATA_DIR={MNT_DATA},OUTPUT_DIR={MNT_OUTPUT} \\\n  \"$REMOTE_IMAGE\" \\\n  bash {}",
            shell_quote(&self.wrapper)
        ));
        if !self.args.is_empty() {
            script.push(' ');
            script.push_str(&shell_join(self.args));
        }
        script.push('\n');
        script
    }
}

/// Variables of the local script that stages inputs and submits the PBS job.
#[derive(Debug, Clone)]
pub struct StagingScript<'a> {
    pub login_node: &'a str,
    pub user: &'a str,
    pub ssh_key: &'a Path,
    pub project: &'a str,
    pub local_project_dir: PathBuf,
    pub local_data_dir: PathBuf,
    pub local_image: PathBuf,
    pub job_script: &'a Path,
    pub wrapper: &'a Path,
    pub scratch_base: String,
    pub projects_base: String,
    pub names: &'a RemoteNames,
}

impl StagingScript<'_> {
    pub fn render(&self) -> String {
        let path = |path: &Path| shell_quote(&path.display().to_string()).into_owned();
        let qsub_vars = REMOTE_JOB_VARS
            .iter()
            .map(|var| format!("{var}=\\\"${var}\\\""))
            .join(",");

        format!(
            r#"#!/bin/bash
set -euo pipefail

LOGIN_NODE={login_node}
REMOTE_USER={user}
SSH_KEY={ssh_key}
PROJECT={project}

LOCAL_PROJECT_DIR={local_project_dir}
LOCAL_DATA_DIR={local_data_dir}
LOCAL_IMAGE={local_image}
LOCAL_JOB_SCRIPT={job_script}
LOCAL_WRAPPER={wrapper}

REMOTE_SCRATCH_BASE={scratch_base}
REMOTE_PROJECTS_BASE={projects_base}

REMOTE_SCRATCH_ROOT="$REMOTE_SCRATCH_BASE/$PROJECT/$REMOTE_USER"
REMOTE_PROJECT_ROOT="$REMOTE_PROJECTS_BASE/$PROJECT/$REMOTE_USER"

REMOTE_DATA_DIR="$REMOTE_SCRATCH_ROOT"/{data}
REMOTE_OUT_DIR="$REMOTE_SCRATCH_ROOT"/{output}
REMOTE_PROJ_DIR="$REMOTE_PROJECT_ROOT"/{project_name}
REMOTE_IMAGE_DIR="$REMOTE_PROJECT_ROOT/images"
REMOTE_IMAGE="$REMOTE_IMAGE_DIR"/{image}
REMOTE_GEN_DIR="$REMOTE_PROJ_DIR/{gen_dir}"

TARGET="$REMOTE_USER@$LOGIN_NODE"
SSH_OPTS=(-i "$SSH_KEY" -o BatchMode=yes -o StrictHostKeyChecking=accept-new)
RSYNC_RSH="ssh -i $(printf '%q' "$SSH_KEY") -o BatchMode=yes -o StrictHostKeyChecking=accept-new"

ssh "${{SSH_OPTS[@]}}" "$TARGET" \
  "mkdir -p \"$REMOTE_DATA_DIR\" \"$REMOTE_OUT_DIR\" \"$REMOTE_PROJ_DIR\" \"$REMOTE_IMAGE_DIR\" \"$REMOTE_GEN_DIR\""

rsync -a --delete -e "$RSYNC_RSH" "$LOCAL_DATA_DIR/" "$TARGET:$REMOTE_DATA_DIR/"
rsync -a --delete --exclude '/{gen_dir}/' --exclude '/{venv_dir}/' -e "$RSYNC_RSH" \
  "$LOCAL_PROJECT_DIR/" "$TARGET:$REMOTE_PROJ_DIR/"
rsync -a -e "$RSYNC_RSH" "$LOCAL_IMAGE" "$TARGET:$REMOTE_IMAGE"

scp "${{SSH_OPTS[@]}}" "$LOCAL_JOB_SCRIPT" "$LOCAL_WRAPPER" "$TARGET:$REMOTE_GEN_DIR/"

ssh "${{SSH_OPTS[@]}}" "$TARGET" \
  "qsub -v {qsub_vars} \"$REMOTE_GEN_DIR/{job_file}\""
"#,
            login_node = shell_quote(self.login_node),
            user = shell_quote(self.user),
            ssh_key = path(self.ssh_key),
            project = shell_quote(self.project),
            local_project_dir = path(&self.local_project_dir),
            local_data_dir = path(&self.local_data_dir),
            local_image = path(&self.local_image),
            job_script = path(self.job_script),
            wrapper = path(self.wrapper),
            scratch_base = self.scratch_base,
            projects_base = self.projects_base,
            data = shell_quote(&self.names.data),
            output = shell_quote(&self.names.output),
            project_name = shell_quote(&self.names.project),
            image = shell_quote(&self.names.image),
            gen_dir = GENERATED_DIR_NAME,
            venv_dir = VENV_DIR_NAME,
            job_file = FILE_PBS,
        )
    }
}

#[derive(Debug)]
pub struct SpacehpcBackend {
    config: SpacehpcConfig,
}

impl SpacehpcBackend {
    fn job_script(&self) -> PbsJobScript<'_> {
        let config = &self.config;
        PbsJobScript {
            job_name: config.job_name(),
            queue: config.queue(),
            nodes: config.nodes(),
            cpus: config.cpus(),
            gpus: config.gpus(),
            memory: config.ram(),
            walltime: config.walltime(),
            binds: container_binds("$REMOTE_PROJ_DIR", "$REMOTE_DATA_DIR", "$REMOTE_OUT_DIR"),
            wrapper: format!("{MNT_PROJECT}/{GENERATED_DIR_NAME}/{FILE_SH}"),
            args: config.base().args(),
        }
    }

    fn staging_script<'a>(
        &'a self,
        job_script: &'a Path,
        wrapper: &'a Path,
    ) -> crate::Result<StagingScript<'a>> {
        let config = &self.config;
        let base = config.base();
        Ok(StagingScript {
            login_node: config.login_node(),
            user: config.user(),
            ssh_key: config.ssh_key(),
            project: config.project(),
            local_project_dir: absolute_path(base.project_dir())?,
            local_data_dir: absolute_path(base.data_dir())?,
            local_image: absolute_path(base.image())?,
            job_script,
            wrapper,
            scratch_base: config.scratch_base(),
            projects_base: config.projects_base(),
            names: config.remote_names(),
        })
    }
}

impl Generator for SpacehpcBackend {
    fn generate(&self, writer: &ArtifactWriter) -> crate::Result<PathBuf> {
        let wrapper = WrapperScript::from_config(self.config.base(), DEFAULT_VENV);
        let wrapper_path = writer.write(FILE_SH, &wrapper.render(), SCRIPT_FILE_MODE)?;

        let job_path = writer.write(FILE_PBS, &self.job_script().render(), DATA_FILE_MODE)?;

        let staging = self.staging_script(&job_path, &wrapper_path)?.render();
        writer.write(FILE_SUBMIT, &staging, SCRIPT_FILE_MODE)
    }
}

impl Backend for SpacehpcBackend {
    const NAME: &'static str = "spacehpc";

    type Config = SpacehpcConfig;

    fn new(config: Self::Config) -> Self {
        Self { config }
    }
}

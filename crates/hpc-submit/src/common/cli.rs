use std::path::PathBuf;

use clap::Parser;

// Root CLI options
#[derive(Parser, Debug)]
#[command(
    author,
    about,
    version(crate::HPC_SUBMIT_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    /// Backend that generates the artifacts (e.g. `htcondor`, `spacehpc`)
    pub mode: String,

    /// Project directory, used as the default `project_dir`
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub project: PathBuf,

    /// Project configuration file [default: <PROJECT>/hpc_submit.conf]
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub project_config: Option<PathBuf>,

    /// Overrides a configuration value, e.g. `--set htcondor.cpus=4`.
    /// Can be used multiple times.
    #[arg(long = "set", value_name = "KEY=VALUE", allow_hyphen_values(true))]
    pub overrides: Vec<String>,

    /// Directory where the artifacts are written [default: <PROJECT>/.hpc_submit_gen]
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub outdir: Option<PathBuf>,

    /// Site-wide configuration file
    #[arg(long, env = "HPC_SUBMIT_GLOBAL_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub global_config: Option<PathBuf>,

    /// Per-user configuration file
    #[arg(long, env = "HPC_SUBMIT_USER_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub user_config: Option<PathBuf>,

    /// Enables more detailed log output
    #[arg(long, env = "HPC_SUBMIT_DEBUG")]
    pub debug: bool,
}

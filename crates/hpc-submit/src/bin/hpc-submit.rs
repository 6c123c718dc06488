use anyhow::Context;
use clap::Parser;

use hpc_submit::backend::BackendRegistry;
use hpc_submit::common::cli::RootOptions;
use hpc_submit::common::setup::setup_logging;
use hpc_submit::config::ConfigLocations;
use hpc_submit::submit::{GenerateRequest, generate};

fn make_request(opts: RootOptions) -> GenerateRequest {
    let mut locations = ConfigLocations::from_env_defaults();
    if let Some(global) = opts.global_config {
        locations.global = global;
    }
    if let Some(user) = opts.user_config {
        locations.user = user;
    }
    GenerateRequest {
        mode: opts.mode,
        project: opts.project,
        project_config: opts.project_config,
        overrides: opts.overrides,
        outdir: opts.outdir,
        locations,
    }
}

fn command_generate(request: GenerateRequest) -> anyhow::Result<()> {
    let registry = BackendRegistry::with_builtin();
    let outdir = generate(&request, &registry).with_context(|| {
        format!(
            "Cannot generate {} artifacts for project {}",
            request.mode,
            request.project.display()
        )
    })?;
    println!("{}", outdir.display());
    Ok(())
}

fn main() {
    let opts = RootOptions::parse();
    setup_logging(opts.debug);

    if let Err(error) = command_generate(make_request(opts)) {
        log::error!("{error:?}");
        std::process::exit(1);
    }
}

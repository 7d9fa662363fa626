//! conda-supply CLI entry point.
//!
//! Runs the conda supply step against the staging directories handed over
//! by the build system.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use buildpack_kit::{BuildpackManifest, DirStager, SystemCommand};
use clap::Parser;
use conda_supply::{Conda, LogHandler, SupplyError};
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "conda-supply")]
#[command(about = "Supply Miniconda and a conda environment to a Python app")]
struct Args {
    /// App source directory
    build_dir: PathBuf,

    /// Cache directory kept between builds
    cache_dir: PathBuf,

    /// Dependencies directory shared by all buildpacks
    deps_dir: PathBuf,

    /// This buildpack's index inside the dependencies directory
    deps_idx: String,

    /// Buildpack root (default: two levels above this executable)
    #[arg(long, env = "BUILDPACK_DIR")]
    buildpack_dir: Option<PathBuf>,

    /// Buildpack manifest (default: <buildpack-dir>/manifest.yml)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Only consider manifest entries built for this stack
    #[arg(long, env = "CF_STACK")]
    stack: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .format_timestamp(None)
        .init();

    if let Err(e) = supply(args) {
        if !already_reported(&e) {
            error!("{:#}", e);
        }
        std::process::exit(1);
    }
}

/// Pipeline failures were already emitted as progress errors by the run.
fn already_reported(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SupplyError>().is_some()
}

fn supply(args: Args) -> anyhow::Result<()> {
    let buildpack_dir = match args.buildpack_dir {
        Some(dir) => dir,
        None => default_buildpack_dir()?,
    };
    let manifest_path = args
        .manifest
        .unwrap_or_else(|| buildpack_dir.join("manifest.yml"));

    info!("Configuration:");
    info!("  Build dir: {:?}", args.build_dir);
    info!("  Cache dir: {:?}", args.cache_dir);
    info!("  Deps dir: {:?}", args.deps_dir);
    info!("  Deps index: {}", args.deps_idx);
    info!("  Manifest: {:?}", manifest_path);
    info!("  Stack: {}", args.stack.as_deref().unwrap_or("any"));

    let mut manifest = BuildpackManifest::load(&manifest_path)
        .with_context(|| format!("Unable to load buildpack manifest {}", manifest_path.display()))?;
    if let Some(stack) = args.stack {
        manifest = manifest.with_stack(stack);
    }

    let stager = DirStager::new(args.build_dir, args.cache_dir, args.deps_dir, args.deps_idx);
    let command = SystemCommand;

    Conda::new(&manifest, &stager, &command, Arc::new(LogHandler)).run()?;
    Ok(())
}

/// The supply binary ships as `<buildpack-dir>/bin/supply`.
fn default_buildpack_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("Unable to locate the supply executable")?;
    exe.parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .with_context(|| format!("No buildpack directory above {}", exe.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_pipeline_errors_are_not_logged_twice() {
        let err = anyhow::Error::from(SupplyError::Permissions(io::Error::other("denied")));
        assert!(already_reported(&err));
    }

    #[test]
    fn test_setup_errors_are_logged() {
        let err = BuildpackManifest::load(Path::new("/nonexistent/manifest.yml"))
            .context("Unable to load buildpack manifest")
            .unwrap_err();
        assert!(!already_reported(&err));
    }
}

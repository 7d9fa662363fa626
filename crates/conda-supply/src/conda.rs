//! Miniconda installation and conda environment setup.
//!
//! The supply step runs as a fixed pipeline:
//!
//! 1. pick Miniconda 2 or 3 from the app's `runtime.txt`
//! 2. download the installer and run it in batch mode into `<dep-dir>/conda`
//! 3. `conda env update` the `dep_env` environment from `environment.yml`,
//!    then `conda clean` the package caches
//! 4. link `conda/bin` into the dependency `bin` dir and write the
//!    `profile.d` activation script
//!
//! Any failure stops the run. Nothing is rolled back; the build system is
//! expected to retry the whole phase.

use buildpack_kit::{indent_writer, Command, CommandError, Manifest, Stager};
use log::debug;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::SupplyError;
use crate::progress::{ProgressHandler, SupplyPhase};

/// Name of the conda environment built from `environment.yml`.
pub const ENV_NAME: &str = "dep_env";

const RUNTIME_FILE: &str = "runtime.txt";
const ENVIRONMENT_FILE: &str = "environment.yml";
const PROFILE_SCRIPT: &str = "conda.sh";
const PYTHON3_PREFIX: &str = "python-3";

/// Which Miniconda installer the app needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinicondaVersion {
    Miniconda2,
    Miniconda3,
}

impl MinicondaVersion {
    /// Decide from the contents of `runtime.txt`, if it could be read.
    ///
    /// Only a `python-3` prefix selects Miniconda 3; a missing file or any
    /// other content falls back to Miniconda 2.
    pub fn from_runtime(runtime: Option<&str>) -> Self {
        match runtime {
            Some(runtime) if runtime.starts_with(PYTHON3_PREFIX) => MinicondaVersion::Miniconda3,
            _ => MinicondaVersion::Miniconda2,
        }
    }

    /// Dependency name in the buildpack manifest.
    pub fn dependency_name(self) -> &'static str {
        match self {
            MinicondaVersion::Miniconda2 => "miniconda2",
            MinicondaVersion::Miniconda3 => "miniconda3",
        }
    }
}

impl fmt::Display for MinicondaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dependency_name())
    }
}

/// The `profile.d` script that activates `dep_env` at app start.
///
/// Conda bakes absolute paths into the files it installs. At runtime the
/// dependency dir lives under `$DEPS_DIR`, so the first line rewrites every
/// build-time path before activating the environment.
pub fn profile_script(dep_dir: &Path, deps_idx: &str) -> String {
    let dep_dir = dep_dir.display();
    format!(
        "grep -rlI {dep_dir} $DEPS_DIR/{deps_idx}/conda | xargs sed -i -e \"s|{dep_dir}|$DEPS_DIR/{deps_idx}|g\"\n\
         source activate {ENV_NAME}\n"
    )
}

/// The conda supply pipeline.
///
/// Subprocess output goes to `stdout`/`stderr` (the process streams unless
/// replaced with [`Conda::with_output`]), indented under the step headers.
pub struct Conda<'a> {
    manifest: &'a dyn Manifest,
    stager: &'a dyn Stager,
    command: &'a dyn Command,
    progress: Arc<dyn ProgressHandler>,
    stdout: Box<dyn Write + Send + 'a>,
    stderr: Box<dyn Write + Send + 'a>,
}

impl<'a> Conda<'a> {
    pub fn new(
        manifest: &'a dyn Manifest,
        stager: &'a dyn Stager,
        command: &'a dyn Command,
        progress: Arc<dyn ProgressHandler>,
    ) -> Self {
        Self {
            manifest,
            stager,
            command,
            progress,
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
        }
    }

    /// Send subprocess output somewhere other than the process streams.
    pub fn with_output(
        mut self,
        stdout: impl Write + Send + 'a,
        stderr: impl Write + Send + 'a,
    ) -> Self {
        self.stdout = Box::new(stdout);
        self.stderr = Box::new(stderr);
        self
    }

    /// Run the whole pipeline, stopping at the first failing stage.
    pub fn run(&mut self) -> Result<(), SupplyError> {
        let version = self.version();

        if let Err(e) = self.install(version) {
            self.error(format!("Could not install conda: {e}"));
            return Err(e);
        }

        if let Err(e) = self.update_and_clean() {
            self.error(format!("Could not update conda env: {e}"));
            return Err(e);
        }

        self.link_bin();

        let script = self.profile_d();
        if let Err(e) = self
            .stager
            .write_profile_d(PROFILE_SCRIPT, &script)
            .map_err(SupplyError::ProfileScript)
        {
            self.error(format!("Could not write profile.d script: {e}"));
            return Err(e);
        }

        self.begin_step("Done");
        Ok(())
    }

    /// Pick the Miniconda variant from `<build-dir>/runtime.txt`.
    pub fn version(&self) -> MinicondaVersion {
        let runtime = fs::read(self.stager.build_dir().join(RUNTIME_FILE))
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        let version = MinicondaVersion::from_runtime(runtime.as_deref());
        debug!("Selected {} (runtime.txt: {:?})", version, runtime);
        version
    }

    /// Download the installer for `version` and run it into `<dep-dir>/conda`.
    ///
    /// The installer lives in a temporary file that is removed when this
    /// returns, whether or not the install succeeded.
    pub fn install(&mut self, version: MinicondaVersion) -> Result<(), SupplyError> {
        self.begin_step("Supplying conda");
        self.info(format!("Using {version}"));

        let installer = tempfile::Builder::new()
            .prefix("miniconda")
            .suffix(".sh")
            .tempfile()
            .map_err(SupplyError::InstallerFile)?
            .into_temp_path();

        self.manifest
            .install_only_version(version.dependency_name(), &installer)
            .map_err(SupplyError::Download)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&installer, fs::Permissions::from_mode(0o755))
                .map_err(SupplyError::Permissions)?;
        }

        self.begin_step("Installing Miniconda");
        let conda_home = self.conda_home();
        self.execute(
            &installer,
            &[OsStr::new("-b"), OsStr::new("-p"), conda_home.as_os_str()],
        )
        .map_err(SupplyError::Install)
    }

    /// Build `dep_env` from `environment.yml`, then prune conda's caches.
    ///
    /// Clean only runs once the update succeeded.
    pub fn update_and_clean(&mut self) -> Result<(), SupplyError> {
        self.begin_step("Installing Dependencies");
        self.begin_step("Installing conda environment from environment.yml");

        let conda = self.conda_bin().join("conda");
        let environment = self.stager.build_dir().join(ENVIRONMENT_FILE);

        self.execute(
            &conda,
            &[
                OsStr::new("env"),
                OsStr::new("update"),
                OsStr::new("--quiet"),
                OsStr::new("-n"),
                OsStr::new(ENV_NAME),
                OsStr::new("-f"),
                environment.as_os_str(),
            ],
        )
        .map_err(SupplyError::EnvUpdate)?;

        if let Err(e) = self.execute(&conda, &[OsStr::new("clean"), OsStr::new("-pt")]) {
            let err = SupplyError::Clean(e);
            self.error(err.to_string());
            return Err(err);
        }

        Ok(())
    }

    /// Contents of the `conda.sh` profile script for this stager.
    pub fn profile_d(&self) -> String {
        profile_script(&self.stager.dep_dir(), self.stager.deps_idx())
    }

    /// Link failures are reported as warnings and do not fail the run.
    fn link_bin(&self) {
        let conda_bin = self.conda_bin();
        if let Err(e) = self.stager.link_directory_in_dep_dir(&conda_bin, "bin") {
            self.warning(format!(
                "Could not link {} into the dependency bin directory: {e}",
                conda_bin.display()
            ));
        }
    }

    fn conda_home(&self) -> PathBuf {
        self.stager.dep_dir().join("conda")
    }

    fn conda_bin(&self) -> PathBuf {
        self.conda_home().join("bin")
    }

    fn execute(&mut self, program: &Path, args: &[&OsStr]) -> Result<(), CommandError> {
        let mut stdout = indent_writer(&mut self.stdout);
        let mut stderr = indent_writer(&mut self.stderr);
        self.command
            .execute(Path::new("/"), &mut stdout, &mut stderr, program, args)
    }

    fn begin_step(&self, message: &str) {
        self.progress.on_progress(SupplyPhase::BeginStep {
            message: message.to_string(),
        });
    }

    fn info(&self, message: String) {
        self.progress.on_progress(SupplyPhase::Info { message });
    }

    fn warning(&self, message: String) {
        self.progress.on_progress(SupplyPhase::Warning { message });
    }

    fn error(&self, message: String) {
        self.progress.on_progress(SupplyPhase::Error { message });
    }
}

//! Staging directories handed to a supply step.
//!
//! A supply step is invoked with a build directory (the app), a cache
//! directory that survives between builds, and a dependencies directory
//! shared by every buildpack in the chain. Each buildpack owns one
//! sub-directory of the latter, named by its index (`<deps-dir>/<idx>`).
//! Binaries linked into `<deps-dir>/<idx>/bin` end up on `PATH`, and scripts
//! in `<deps-dir>/<idx>/profile.d` are sourced when the app starts.

use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error type for staging operations.
#[derive(Debug, thiserror::Error)]
#[error("failed to {action} {}: {source}", .path.display())]
pub struct StagerError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl StagerError {
    fn new(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self {
            action,
            path,
            source,
        }
    }
}

/// Staging locations and the writes a supply step may perform on them.
pub trait Stager {
    fn build_dir(&self) -> &Path;
    fn cache_dir(&self) -> &Path;
    /// This buildpack's own directory inside the dependencies directory.
    fn dep_dir(&self) -> PathBuf;
    fn deps_idx(&self) -> &str;

    /// Link every entry of `dest_dir` into `<dep-dir>/<dep_subdir>`.
    fn link_directory_in_dep_dir(&self, dest_dir: &Path, dep_subdir: &str)
        -> Result<(), StagerError>;

    /// Write a script to `<dep-dir>/profile.d/<script_name>`.
    fn write_profile_d(&self, script_name: &str, contents: &str) -> Result<(), StagerError>;
}

/// [`Stager`] over real directories.
#[derive(Debug, Clone)]
pub struct DirStager {
    build_dir: PathBuf,
    cache_dir: PathBuf,
    deps_dir: PathBuf,
    deps_idx: String,
}

impl DirStager {
    pub fn new(
        build_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        deps_dir: impl Into<PathBuf>,
        deps_idx: impl Into<String>,
    ) -> Self {
        Self {
            build_dir: build_dir.into(),
            cache_dir: cache_dir.into(),
            deps_dir: deps_dir.into(),
            deps_idx: deps_idx.into(),
        }
    }

    /// The dependencies directory shared by all buildpacks.
    pub fn deps_dir(&self) -> &Path {
        &self.deps_dir
    }
}

impl Stager for DirStager {
    fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn dep_dir(&self) -> PathBuf {
        self.deps_dir.join(&self.deps_idx)
    }

    fn deps_idx(&self) -> &str {
        &self.deps_idx
    }

    fn link_directory_in_dep_dir(
        &self,
        dest_dir: &Path,
        dep_subdir: &str,
    ) -> Result<(), StagerError> {
        let link_dir = self.dep_dir().join(dep_subdir);
        fs::create_dir_all(&link_dir).map_err(StagerError::new("create", &link_dir))?;

        let entries = fs::read_dir(dest_dir).map_err(StagerError::new("read", dest_dir))?;
        for entry in entries {
            let entry = entry.map_err(StagerError::new("read", dest_dir))?;
            let source = entry.path();
            let link = link_dir.join(entry.file_name());

            // Relative links keep working once the deps dir is moved at runtime
            let target = pathdiff::diff_paths(&source, &link_dir).unwrap_or_else(|| source.clone());

            if fs::symlink_metadata(&link).is_ok() {
                fs::remove_file(&link).map_err(StagerError::new("replace", &link))?;
            }
            symlink(&target, &link).map_err(StagerError::new("link", &link))?;
        }

        debug!("Linked {:?} into {:?}", dest_dir, link_dir);
        Ok(())
    }

    fn write_profile_d(&self, script_name: &str, contents: &str) -> Result<(), StagerError> {
        let profile_dir = self.dep_dir().join("profile.d");
        fs::create_dir_all(&profile_dir).map_err(StagerError::new("create", &profile_dir))?;

        let script = profile_dir.join(script_name);
        fs::write(&script, contents).map_err(StagerError::new("write", &script))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
                .map_err(StagerError::new("chmod", &script))?;
        }

        debug!("Wrote profile.d script {:?}", script);
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinking into the deps dir requires a unix platform",
    ))
}

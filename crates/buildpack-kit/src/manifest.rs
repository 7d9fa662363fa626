//! Buildpack `manifest.yml` lookup and verified dependency downloads.
//!
//! The manifest lists every dependency the buildpack may install, each with
//! a download URI and a SHA-256 checksum. Resolving a dependency means
//! finding its single entry for the current stack, fetching the artifact
//! (over HTTP(S) or from a `file://` path for offline buildpacks) and
//! refusing to hand it over unless the checksum matches.

use log::{debug, info};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use url::Url;
use zip::ZipArchive;

/// Error type for manifest lookups and dependency downloads.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("dependency {name} not found in manifest")]
    NotFound { name: String },

    #[error("more than one version of {name} found: {}", .versions.join(", "))]
    MultipleVersions { name: String, versions: Vec<String> },

    #[error("unsupported dependency URI: {uri}")]
    UnsupportedUri { uri: String },

    #[error("failed to download {uri}: {reason}")]
    Download { uri: String, reason: String },

    #[error("checksum mismatch for {uri}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        uri: String,
        expected: String,
        actual: String,
    },

    #[error("failed to extract {uri}: {reason}")]
    Extract { uri: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Resolves dependency names to artifacts on disk.
pub trait Manifest {
    /// Install the only version of `name` the manifest offers at `dest`.
    ///
    /// A `.zip` artifact is extracted with `dest` as the target directory;
    /// any other artifact is written to the file `dest`.
    ///
    /// Fails if the manifest has no entry or more than one entry for
    /// `name`, if the artifact can't be fetched, or if its checksum doesn't
    /// match.
    fn install_only_version(&self, name: &str, dest: &Path) -> Result<(), ManifestError>;
}

/// One `dependencies` entry of `manifest.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
    pub uri: String,
    pub sha256: String,
    #[serde(default)]
    pub cf_stacks: Vec<String>,
}

impl ManifestEntry {
    fn supports_stack(&self, stack: Option<&str>) -> bool {
        match stack {
            Some(stack) => self.cf_stacks.is_empty() || self.cf_stacks.iter().any(|s| s == stack),
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    dependencies: Vec<ManifestEntry>,
}

/// [`Manifest`] backed by a buildpack's `manifest.yml`.
#[derive(Debug, Clone)]
pub struct BuildpackManifest {
    entries: Vec<ManifestEntry>,
    stack: Option<String>,
}

impl BuildpackManifest {
    /// Load and parse a `manifest.yml` file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_yaml::from_str(content)?;
        Ok(Self {
            entries: raw.dependencies,
            stack: None,
        })
    }

    /// Only consider entries built for `stack` (entries without
    /// `cf_stacks` match every stack).
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// All versions of `name` available for the configured stack.
    pub fn all_versions(&self, name: &str) -> Vec<&str> {
        self.matching(name)
            .into_iter()
            .map(|e| e.version.as_str())
            .collect()
    }

    fn matching(&self, name: &str) -> Vec<&ManifestEntry> {
        self.entries
            .iter()
            .filter(|e| e.name == name && e.supports_stack(self.stack.as_deref()))
            .collect()
    }

    fn only_version(&self, name: &str) -> Result<&ManifestEntry, ManifestError> {
        let candidates = self.matching(name);
        match candidates.as_slice() {
            [] => Err(ManifestError::NotFound {
                name: name.to_string(),
            }),
            [entry] => Ok(*entry),
            _ => Err(ManifestError::MultipleVersions {
                name: name.to_string(),
                versions: candidates.iter().map(|e| e.version.clone()).collect(),
            }),
        }
    }
}

impl Manifest for BuildpackManifest {
    fn install_only_version(&self, name: &str, dest: &Path) -> Result<(), ManifestError> {
        let entry = self.only_version(name)?;
        info!("Installing {} {}", entry.name, entry.version);

        let bytes = fetch(entry)?;
        verify_checksum(entry, &bytes)?;

        if entry.uri.ends_with(".zip") {
            extract_zip(&bytes, dest).map_err(|e| ManifestError::Extract {
                uri: entry.uri.clone(),
                reason: e.to_string(),
            })?;
        } else {
            fs::write(dest, &bytes)?;
        }

        debug!("Installed {} {} to {:?}", entry.name, entry.version, dest);
        Ok(())
    }
}

fn fetch(entry: &ManifestEntry) -> Result<Vec<u8>, ManifestError> {
    let unsupported = || ManifestError::UnsupportedUri {
        uri: entry.uri.clone(),
    };
    let url = Url::parse(&entry.uri).map_err(|_| unsupported())?;

    match url.scheme() {
        "file" => {
            let path = url.to_file_path().map_err(|()| unsupported())?;
            debug!("Using local artifact {:?}", path);
            Ok(fs::read(&path)?)
        }
        "http" | "https" => download(&url, &entry.uri),
        _ => Err(unsupported()),
    }
}

fn download(url: &Url, uri: &str) -> Result<Vec<u8>, ManifestError> {
    let failed = |reason: String| ManifestError::Download {
        uri: redact(url),
        reason,
    };

    info!("Downloading {}", redact(url));

    let client = reqwest::blocking::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(uri).send().map_err(|e| failed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(failed(format!("unexpected status {}", response.status())));
    }

    let bytes = response.bytes().map_err(|e| failed(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Hide credentials embedded in a dependency URI before it reaches the log.
fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    if redacted.password().is_some() {
        redacted.set_password(Some("-redacted-")).ok();
    }
    redacted.to_string()
}

fn verify_checksum(entry: &ManifestEntry, bytes: &[u8]) -> Result<(), ManifestError> {
    let actual = hex::encode(Sha256::digest(bytes));
    let expected = entry.sha256.to_lowercase();

    if actual != expected {
        return Err(ManifestError::ChecksumMismatch {
            uri: entry.uri.clone(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Extract every entry of a zip archive below `dest_dir`.
fn extract_zip(zip_bytes: &[u8], dest_dir: &Path) -> zip::result::ZipResult<()> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        // Skip entries that would escape the destination
        let Some(relative) = file.enclosed_name() else {
            continue;
        };
        let out_path = dest_dir.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = fs::File::create(&out_path)?;
        io::copy(&mut file, &mut out_file)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))?;
            }
        }
    }

    Ok(())
}

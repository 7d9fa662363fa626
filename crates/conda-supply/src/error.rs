//! Errors returned by the supply pipeline.

use buildpack_kit::{CommandError, ManifestError, StagerError};
use std::io;

/// The pipeline stage a [`SupplyError`] stopped the run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyStage {
    Install,
    EnvironmentUpdate,
    CacheClean,
    Finalize,
}

/// Error type for the supply pipeline.
///
/// Every variant names the stage that failed and keeps the underlying error
/// as its source.
#[derive(Debug, thiserror::Error)]
pub enum SupplyError {
    #[error("could not create installer file: {0}")]
    InstallerFile(#[source] io::Error),

    #[error("error downloading miniconda: {0}")]
    Download(#[source] ManifestError),

    #[error("could not make installer executable: {0}")]
    Permissions(#[source] io::Error),

    #[error("error installing miniconda: {0}")]
    Install(#[source] CommandError),

    #[error("could not run conda env update: {0}")]
    EnvUpdate(#[source] CommandError),

    #[error("could not run conda clean: {0}")]
    Clean(#[source] CommandError),

    #[error("could not write profile.d script: {0}")]
    ProfileScript(#[source] StagerError),
}

impl SupplyError {
    pub fn stage(&self) -> SupplyStage {
        match self {
            SupplyError::InstallerFile(_)
            | SupplyError::Download(_)
            | SupplyError::Permissions(_)
            | SupplyError::Install(_) => SupplyStage::Install,
            SupplyError::EnvUpdate(_) => SupplyStage::EnvironmentUpdate,
            SupplyError::Clean(_) => SupplyStage::CacheClean,
            SupplyError::ProfileScript(_) => SupplyStage::Finalize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::path::PathBuf;

    #[test]
    fn test_download_error_keeps_cause() {
        let err = SupplyError::Download(ManifestError::NotFound {
            name: "miniconda3".to_string(),
        });

        assert_eq!(
            err.to_string(),
            "error downloading miniconda: dependency miniconda3 not found in manifest"
        );
        assert_eq!(err.stage(), SupplyStage::Install);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_stage_per_variant() {
        let failed = || CommandError::Failed {
            program: PathBuf::from("conda"),
            code: Some(1),
        };

        assert_eq!(
            SupplyError::EnvUpdate(failed()).stage(),
            SupplyStage::EnvironmentUpdate
        );
        assert_eq!(SupplyError::Clean(failed()).stage(), SupplyStage::CacheClean);
        assert_eq!(
            SupplyError::Permissions(io::Error::other("denied")).stage(),
            SupplyStage::Install
        );
    }
}

//! Conda supply step for a Python buildpack.
//!
//! Installs Miniconda into the buildpack's dependency directory, builds the
//! `dep_env` environment from the app's `environment.yml`, and writes a
//! `profile.d` script that activates it when the app starts.
//!
//! The pipeline lives in [`conda::Conda`] and only talks to the outside
//! world through the [`buildpack_kit`] ports, so it can be driven by fakes.
//!
//! # Progress Reporting
//!
//! Every step header, warning and error is emitted as a [`SupplyPhase`]
//! to a [`ProgressHandler`]. The binary uses [`LogHandler`], which renders
//! them in the usual buildpack style through the `log` crate.
//!
//! ```ignore
//! use buildpack_kit::{BuildpackManifest, DirStager, SystemCommand};
//! use conda_supply::{Conda, LogHandler};
//!
//! let mut conda = Conda::new(&manifest, &stager, &SystemCommand, Arc::new(LogHandler));
//! conda.run()?;
//! ```

pub mod conda;
pub mod error;
pub mod progress;

// Re-export key types
pub use conda::{profile_script, Conda, MinicondaVersion, ENV_NAME};
pub use error::{SupplyError, SupplyStage};
pub use progress::{LogHandler, ProgressHandler, SupplyPhase};

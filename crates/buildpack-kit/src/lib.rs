//! Collaborators for buildpack supply steps.
//!
//! A supply step talks to the outside world through three ports:
//!
//! - [`Command`] runs an external program, forwarding its output
//! - [`Manifest`] resolves a dependency name to a verified artifact on disk
//! - [`Stager`] exposes the staging directories and writes into the
//!   dependency tree (bin links, `profile.d` scripts)
//!
//! Each port has one concrete implementation used by the real binary
//! ([`SystemCommand`], [`BuildpackManifest`], [`DirStager`]). Orchestrators
//! should depend on the traits only so they can be driven by fakes in tests.
//!
//! ```ignore
//! use buildpack_kit::{indent_writer, Command, SystemCommand};
//!
//! let mut out = indent_writer(std::io::stdout());
//! let mut err = indent_writer(std::io::stderr());
//! SystemCommand.execute(Path::new("/"), &mut out, &mut err, Path::new("ls"), &[])?;
//! ```

pub mod command;
pub mod manifest;
pub mod stager;

// Re-export commonly used items
pub use command::{indent_writer, Command, CommandError, IndentWriter, SystemCommand, INDENT};
pub use manifest::{BuildpackManifest, Manifest, ManifestEntry, ManifestError};
pub use stager::{DirStager, Stager, StagerError};

//! Progress reporting for the supply step.
//!
//! Provides [`SupplyPhase`] events (step headers, info lines, warnings and
//! errors) and a [`ProgressHandler`] trait that consumers implement to route
//! them to the build log.

use serde::{Deserialize, Serialize};

/// A single line of supply-step output.
///
/// Serializable so a build driver can forward events over IPC instead of
/// scraping the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SupplyPhase {
    /// A new step started ("Supplying conda", "Done", ...).
    BeginStep { message: String },
    /// Detail belonging to the current step.
    Info { message: String },
    /// Something went wrong but the step carries on.
    Warning { message: String },
    /// The step failed.
    Error { message: String },
}

impl SupplyPhase {
    pub fn message(&self) -> &str {
        match self {
            SupplyPhase::BeginStep { message }
            | SupplyPhase::Info { message }
            | SupplyPhase::Warning { message }
            | SupplyPhase::Error { message } => message,
        }
    }
}

/// Trait for receiving supply progress events.
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, phase: SupplyPhase);
}

/// Log-only progress handler.
///
/// Renders phases with the prefixes buildpack users expect in their deploy
/// output and writes them to the `log` crate.
pub struct LogHandler;

impl ProgressHandler for LogHandler {
    fn on_progress(&self, phase: SupplyPhase) {
        match &phase {
            SupplyPhase::BeginStep { message } => {
                log::info!("-----> {message}");
            }
            SupplyPhase::Info { message } => {
                log::info!("       {message}");
            }
            SupplyPhase::Warning { message } => {
                log::warn!("**WARNING** {message}");
            }
            SupplyPhase::Error { message } => {
                log::error!("**ERROR** {message}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accessor() {
        let phase = SupplyPhase::Warning {
            message: "could not link".to_string(),
        };
        assert_eq!(phase.message(), "could not link");
    }

    #[test]
    fn test_log_handler_accepts_every_phase() {
        let handler = LogHandler;
        for phase in [
            SupplyPhase::BeginStep {
                message: "Supplying conda".to_string(),
            },
            SupplyPhase::Info {
                message: "detail".to_string(),
            },
            SupplyPhase::Warning {
                message: "careful".to_string(),
            },
            SupplyPhase::Error {
                message: "broken".to_string(),
            },
        ] {
            handler.on_progress(phase);
        }
    }
}

//! Error types
//!
//! Failures that are reported back to the caller of a supervisor command.
//! Process crashes are not errors in this sense; they surface on the event
//! bus as [`Event::Fatal`](crate::events::Event::Fatal).

use std::path::PathBuf;

use thiserror::Error;

use crate::process::ManagedProcess;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error type for supervisor commands
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Configuration is invalid or could not be loaded
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The OS refused to start a managed process
    #[error("failed to spawn {process} ({}): {source}", path.display())]
    Spawn {
        process: ManagedProcess,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Requested encoding profile does not exist
    #[error("profile index {index} out of range ({len} profiles configured)")]
    ProfileOutOfRange { index: usize, len: usize },

    /// A request to the node HTTP API failed
    #[error("node api request failed: {0}")]
    Probe(#[from] ProbeError),

    /// The supervisor loop has shut down
    #[error("supervisor is shut down")]
    Closed,

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::Config(_) => "config",
            SupervisorError::Spawn { .. } => "spawn",
            SupervisorError::ProfileOutOfRange { .. } => "profile_out_of_range",
            SupervisorError::Probe(_) => "probe",
            SupervisorError::Closed => "closed",
            SupervisorError::Io(_) => "io",
        }
    }
}

/// Outcome of a failed probe against the node HTTP API
///
/// Only `Refused` carries meaning for the health state machine: it is the
/// node's way of saying "not up yet". Everything else is treated as noise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Nothing is listening on the status port
    #[error("connection refused")]
    Refused,

    /// Any other transport, status or decoding failure
    #[error("{0}")]
    Other(String),
}

impl ProbeError {
    pub fn is_refused(&self) -> bool {
        matches!(self, ProbeError::Refused)
    }
}

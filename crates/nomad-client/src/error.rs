//! Error types for the Nomad client.

use std::fmt::{self, Display};

use nomad_types::{HostPort, RejectionReason};

/// Protocol phase a mutative message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    Commit,
    Rollback,
    Takeover,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => write!(f, "prepare"),
            Phase::Commit => write!(f, "commit"),
            Phase::Rollback => write!(f, "rollback"),
            Phase::Takeover => write!(f, "takeover"),
        }
    }
}

/// Errors that abort a Nomad call.
///
/// Per-server failures never show up here; they are reported as events.
#[derive(Debug, thiserror::Error)]
pub enum NomadError {
    /// A server answered with a rejection that is impossible for the phase.
    /// Signals a client/server version skew or a bug, never a retryable state.
    #[error("server {server} rejected {phase} with impossible reason {reason:?}: {}", message.as_deref().unwrap_or("no details"))]
    ProtocolViolation {
        server: HostPort,
        phase: Phase,
        reason: RejectionReason,
        message: Option<String>,
    },

    #[error("cannot run Nomad against an empty server list")]
    EmptyCluster,

    #[error("server {0} is listed more than once")]
    DuplicateServer(HostPort),

    #[error("expected node count {expected} is below the number of servers ({servers})")]
    InvalidNodeCount { expected: usize, servers: usize },

    #[error("server {0} has no discovered fencing token")]
    NotDiscovered(HostPort),

    #[error("no change is in flight")]
    NoChangeInFlight,

    #[error("invalid configuration: {0}")]
    Config(#[from] nomad_config::ConfigError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, NomadError>;

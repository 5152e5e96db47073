//! The change payload carried by prepare messages.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// A configuration mutation that Nomad agrees upon.
///
/// The protocol treats changes as opaque: servers apply them through their
/// own applicator, the client only needs a human-readable summary for
/// reporting.
pub trait NomadChange: Clone + Debug + Send + Sync + 'static {
    /// One-line description of what this change does.
    fn summary(&self) -> String;
}

/// A change made of an opaque string payload and its summary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleChange {
    pub change: String,
    pub summary: String,
}

impl SimpleChange {
    pub fn new(change: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            change: change.into(),
            summary: summary.into(),
        }
    }
}

impl NomadChange for SimpleChange {
    fn summary(&self) -> String {
        self.summary.clone()
    }
}

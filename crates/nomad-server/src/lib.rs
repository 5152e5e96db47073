//! # nomad-server: The server side of the Nomad protocol
//!
//! Each server is authoritative for its own state. It enforces:
//! - fencing: every mutative message must carry the server's current
//!   mutative message count, which advances by exactly one per accepted
//!   mutation
//! - a single in-flight change: at most one change is PREPARED at a time
//! - monotonic versions: a prepared change must carry a version above any
//!   version the server has seen
//!
//! Configuration semantics are delegated to a [`ChangeApplicator`].

mod applicator;
mod error;
mod server;
mod state;

pub use applicator::{ChangeApplicator, PotentialApplicationResult, SettingsApplicator};
pub use error::{Result, ServerError};
pub use server::NomadServerImpl;
pub use state::{ChangeState, Mutation, ServerState, StateChange};

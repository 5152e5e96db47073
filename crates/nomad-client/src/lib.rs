//! # nomad-client: Client-driven two-phase configuration changes
//!
//! The client agrees a configuration change across a set of independent
//! servers, without any server-to-server coordination. A run:
//!
//! 1. discovers every server twice, keeping each server's fencing token and
//!    making sure no other client moved in between;
//! 2. checks that the servers agree on what was committed;
//! 3. prepares the change everywhere (or, when recovering, takes over the
//!    servers holding an abandoned change);
//! 4. commits or rolls back on the servers that hold the change.
//!
//! Everything a run does is reported as [`NomadEvent`]s to a caller-supplied
//! [`ResultReceiver`], and the run ends with a [`Consistency`] verdict.
//!
//! ```ignore
//! let client = NomadClient::new(endpoints, "ops-box", "alice")?;
//! let results = RecordingReceiver::new();
//! let consistency = client.try_apply_change(&results, change).await?;
//! ```

mod checker;
mod client;
mod clock;
mod decider;
mod endpoint;
mod error;
mod logging;
mod process;
mod results;
mod sender;

pub use checker::ConsistencyChecker;
pub use client::NomadClient;
pub use clock::{Clock, FixedClock, SystemClock};
pub use decider::{
    ChangeDecider, CommitDecision, Decider, DeciderState, DiscoveryDecider, ForcedOutcome,
    RecoveryDecider,
};
pub use endpoint::NomadEndpoint;
pub use error::{NomadError, Phase, Result};
pub use logging::LoggingReceiver;
pub use process::{ChangeProcess, DiscoveryProcess, RecoveryProcess};
pub use results::{Consistency, MuxReceiver, NomadEvent, RecordingReceiver, ResultReceiver};
pub use sender::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_CONCURRENT_CALLS, MessageSender};

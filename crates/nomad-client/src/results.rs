//! The event stream of a Nomad run and the listeners consuming it.
//!
//! A run reports everything it does as an ordered sequence of
//! [`NomadEvent`]s. The caller's receiver and the run's own collaborators
//! (decider, sender, consistency checker) all observe the same sequence,
//! in registration order.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::{Mutex, PoisonError};

use nomad_types::{ChangeUuid, ConfigHash, DiscoverResponse, HostPort};

// ============================================================================
// Consistency
// ============================================================================

/// Terminal classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consistency {
    /// Every server agrees and nothing is left in flight.
    Consistent,
    /// A change may be half applied; run recovery.
    MayNeedRecovery,
    /// The run stopped before mutating anything.
    UnknownButNoChange,
    /// The same change is committed on some servers and rolled back on others.
    UnrecoverablyInconsistent,
    /// Servers agree on every decision but run different configurations.
    UnrecoverablyPartitioned,
}

// ============================================================================
// Events
// ============================================================================

/// One step of a Nomad run, as reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NomadEvent<C> {
    StartDiscovery {
        servers: Vec<HostPort>,
    },
    Discovered {
        server: HostPort,
        response: DiscoverResponse<C>,
    },
    DiscoverFail {
        server: HostPort,
        reason: String,
    },
    /// A server already holds a prepared change from another run.
    DiscoverAlreadyPrepared {
        server: HostPort,
        change_uuid: ChangeUuid,
        creation_host: String,
        creation_user: String,
    },
    EndDiscovery,

    StartSecondDiscovery,
    DiscoverRepeated {
        server: HostPort,
    },
    /// The server's fencing token moved between the two discoveries.
    DiscoverOtherClient {
        server: HostPort,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    DiscoverConfigInconsistent {
        change_uuid: ChangeUuid,
        committed: Vec<HostPort>,
        rolled_back: Vec<HostPort>,
    },
    DiscoverConfigPartitioned {
        partitions: BTreeMap<ConfigHash, Vec<HostPort>>,
    },
    EndSecondDiscovery,

    StartPrepare {
        change_uuid: ChangeUuid,
    },
    Prepared {
        server: HostPort,
    },
    PrepareFail {
        server: HostPort,
        reason: String,
    },
    PrepareOtherClient {
        server: HostPort,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    PrepareChangeUnacceptable {
        server: HostPort,
        reason: String,
    },
    EndPrepare,

    StartTakeover,
    TakeoverSucceeded {
        server: HostPort,
    },
    TakeoverFail {
        server: HostPort,
        reason: String,
    },
    TakeoverOtherClient {
        server: HostPort,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    EndTakeover,

    StartCommit,
    Committed {
        server: HostPort,
    },
    CommitFail {
        server: HostPort,
        reason: String,
    },
    CommitOtherClient {
        server: HostPort,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    EndCommit,

    StartRollback,
    RolledBack {
        server: HostPort,
    },
    RollbackFail {
        server: HostPort,
        reason: String,
    },
    RollbackOtherClient {
        server: HostPort,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    EndRollback,

    CannotDecideOverCommitOrRollback,
    Done {
        consistency: Consistency,
    },
}

fn join(servers: &[HostPort]) -> String {
    servers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn or_unknown(value: Option<&String>) -> &str {
    value.map_or("unknown", String::as_str)
}

/// Compact rendering, e.g. `prepared(localhost:9410)`.
impl<C> Display for NomadEvent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartDiscovery { servers } => write!(f, "start_discovery({})", join(servers)),
            Self::Discovered { server, .. } => write!(f, "discovered({server})"),
            Self::DiscoverFail { server, .. } => write!(f, "discover_fail({server})"),
            Self::DiscoverAlreadyPrepared {
                server,
                creation_host,
                creation_user,
                ..
            } => write!(
                f,
                "discover_already_prepared({server}, {creation_host}, {creation_user})"
            ),
            Self::EndDiscovery => write!(f, "end_discovery"),
            Self::StartSecondDiscovery => write!(f, "start_second_discovery"),
            Self::DiscoverRepeated { server } => write!(f, "discover_repeated({server})"),
            Self::DiscoverOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => write!(
                f,
                "discover_other_client({server}, {}, {})",
                or_unknown(last_mutation_host.as_ref()),
                or_unknown(last_mutation_user.as_ref())
            ),
            Self::DiscoverConfigInconsistent {
                committed,
                rolled_back,
                ..
            } => write!(
                f,
                "discover_config_inconsistent([{}], [{}])",
                join(committed),
                join(rolled_back)
            ),
            Self::DiscoverConfigPartitioned { partitions } => {
                let groups = partitions
                    .values()
                    .map(|servers| format!("[{}]", join(servers)))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "discover_config_partitioned({groups})")
            }
            Self::EndSecondDiscovery => write!(f, "end_second_discovery"),
            Self::StartPrepare { .. } => write!(f, "start_prepare"),
            Self::Prepared { server } => write!(f, "prepared({server})"),
            Self::PrepareFail { server, .. } => write!(f, "prepare_fail({server})"),
            Self::PrepareOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => write!(
                f,
                "prepare_other_client({server}, {}, {})",
                or_unknown(last_mutation_host.as_ref()),
                or_unknown(last_mutation_user.as_ref())
            ),
            Self::PrepareChangeUnacceptable { server, reason } => {
                write!(f, "prepare_change_unacceptable({server}, {reason})")
            }
            Self::EndPrepare => write!(f, "end_prepare"),
            Self::StartTakeover => write!(f, "start_takeover"),
            Self::TakeoverSucceeded { server } => write!(f, "takeover({server})"),
            Self::TakeoverFail { server, .. } => write!(f, "takeover_fail({server})"),
            Self::TakeoverOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => write!(
                f,
                "takeover_other_client({server}, {}, {})",
                or_unknown(last_mutation_host.as_ref()),
                or_unknown(last_mutation_user.as_ref())
            ),
            Self::EndTakeover => write!(f, "end_takeover"),
            Self::StartCommit => write!(f, "start_commit"),
            Self::Committed { server } => write!(f, "committed({server})"),
            Self::CommitFail { server, .. } => write!(f, "commit_fail({server})"),
            Self::CommitOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => write!(
                f,
                "commit_other_client({server}, {}, {})",
                or_unknown(last_mutation_host.as_ref()),
                or_unknown(last_mutation_user.as_ref())
            ),
            Self::EndCommit => write!(f, "end_commit"),
            Self::StartRollback => write!(f, "start_rollback"),
            Self::RolledBack { server } => write!(f, "rolled_back({server})"),
            Self::RollbackFail { server, .. } => write!(f, "rollback_fail({server})"),
            Self::RollbackOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => write!(
                f,
                "rollback_other_client({server}, {}, {})",
                or_unknown(last_mutation_host.as_ref()),
                or_unknown(last_mutation_user.as_ref())
            ),
            Self::EndRollback => write!(f, "end_rollback"),
            Self::CannotDecideOverCommitOrRollback => {
                write!(f, "cannot_decide_over_commit_or_rollback")
            }
            Self::Done { consistency } => write!(f, "done({consistency:?})"),
        }
    }
}

// ============================================================================
// Receivers
// ============================================================================

/// Listener of a Nomad run.
///
/// Events are delivered one at a time, in protocol order.
pub trait ResultReceiver<C>: Send + Sync {
    fn on_event(&self, event: &NomadEvent<C>);
}

/// Forwards every event to several receivers, in registration order.
pub struct MuxReceiver<'a, C> {
    receivers: Vec<&'a dyn ResultReceiver<C>>,
}

impl<'a, C> MuxReceiver<'a, C> {
    pub fn new(receivers: Vec<&'a dyn ResultReceiver<C>>) -> Self {
        Self { receivers }
    }
}

impl<C> ResultReceiver<C> for MuxReceiver<'_, C> {
    fn on_event(&self, event: &NomadEvent<C>) {
        for receiver in &self.receivers {
            receiver.on_event(event);
        }
    }
}

/// Receiver that keeps every event it sees.
pub struct RecordingReceiver<C> {
    events: Mutex<Vec<NomadEvent<C>>>,
}

impl<C> Default for RecordingReceiver<C> {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl<C: Clone> RecordingReceiver<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NomadEvent<C>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events rendered with their compact [`Display`] form.
    pub fn trail(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// The consistency reported by `done`, if the run got there.
    pub fn consistency(&self) -> Option<Consistency> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|event| match event {
                NomadEvent::Done { consistency } => Some(*consistency),
                _ => None,
            })
    }
}

impl<C: Clone + Send> ResultReceiver<C> for RecordingReceiver<C> {
    fn on_event(&self, event: &NomadEvent<C>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

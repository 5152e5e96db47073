//! Deciders: fold the event stream into the outcome of a run.
//!
//! Every process owns one decider. It listens to the same events as the
//! caller and answers two questions: should the in-flight change be
//! committed or rolled back, and how consistent is the cluster at the end.
//! The flags are shared by all process kinds ([`DeciderState`]); what differs
//! is the commit decision.

use std::sync::{Mutex, MutexGuard, PoisonError};

use nomad_types::{ChangeRequestState, ChangeUuid, HostPort, NomadChange, ServerMode};

use crate::error::{NomadError, Result};
use crate::results::{Consistency, NomadEvent, ResultReceiver};

// ============================================================================
// Decisions
// ============================================================================

/// What to do with the change a run is resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    Commit,
    Rollback,
    /// Neither outcome is known to be safe.
    Undecided,
}

/// Outcome an operator imposes on a recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedOutcome {
    Commit,
    Rollback,
}

impl From<ForcedOutcome> for CommitDecision {
    fn from(outcome: ForcedOutcome) -> Self {
        match outcome {
            ForcedOutcome::Commit => CommitDecision::Commit,
            ForcedOutcome::Rollback => CommitDecision::Rollback,
        }
    }
}

// ============================================================================
// Shared flags
// ============================================================================

/// Failure flags accumulated over one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeciderState {
    discover_failed: bool,
    whole_cluster_accepting: bool,
    prepare_failed: bool,
    takeover_failed: bool,
    commit_or_rollback_failed: bool,
    inconsistent: bool,
    partitioned: bool,
}

impl Default for DeciderState {
    fn default() -> Self {
        Self {
            discover_failed: false,
            whole_cluster_accepting: true,
            prepare_failed: false,
            takeover_failed: false,
            commit_or_rollback_failed: false,
            inconsistent: false,
            partitioned: false,
        }
    }
}

impl DeciderState {
    /// Applies one event to the flags.
    pub fn record<C>(&mut self, event: &NomadEvent<C>) {
        match event {
            NomadEvent::Discovered { response, .. } => {
                if response.mode == ServerMode::Prepared {
                    self.whole_cluster_accepting = false;
                }
            }
            NomadEvent::DiscoverFail { .. }
            | NomadEvent::DiscoverAlreadyPrepared { .. }
            | NomadEvent::DiscoverOtherClient { .. } => self.discover_failed = true,
            NomadEvent::DiscoverConfigInconsistent { .. } => self.inconsistent = true,
            NomadEvent::DiscoverConfigPartitioned { .. } => self.partitioned = true,
            NomadEvent::PrepareFail { .. }
            | NomadEvent::PrepareOtherClient { .. }
            | NomadEvent::PrepareChangeUnacceptable { .. } => self.prepare_failed = true,
            NomadEvent::TakeoverFail { .. } | NomadEvent::TakeoverOtherClient { .. } => {
                self.takeover_failed = true;
            }
            NomadEvent::CommitFail { .. }
            | NomadEvent::CommitOtherClient { .. }
            | NomadEvent::RollbackFail { .. }
            | NomadEvent::RollbackOtherClient { .. } => self.commit_or_rollback_failed = true,
            _ => {}
        }
    }

    pub fn is_discover_successful(&self) -> bool {
        !self.discover_failed
    }

    /// No server holds a prepared change.
    pub fn is_whole_cluster_accepting(&self) -> bool {
        self.whole_cluster_accepting
    }

    pub fn is_prepare_successful(&self) -> bool {
        !self.prepare_failed
    }

    pub fn is_takeover_successful(&self) -> bool {
        !self.takeover_failed
    }

    pub fn is_commit_or_rollback_successful(&self) -> bool {
        !self.commit_or_rollback_failed
    }

    pub fn is_inconsistent(&self) -> bool {
        self.inconsistent
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    /// Final verdict. The first matching rule wins.
    pub fn consistency(&self) -> Consistency {
        if self.inconsistent {
            Consistency::UnrecoverablyInconsistent
        } else if self.partitioned {
            Consistency::UnrecoverablyPartitioned
        } else if self.discover_failed {
            Consistency::UnknownButNoChange
        } else if self.takeover_failed || self.commit_or_rollback_failed {
            Consistency::MayNeedRecovery
        } else {
            Consistency::Consistent
        }
    }
}

#[derive(Debug, Default)]
struct SharedState(Mutex<DeciderState>);

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, DeciderState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> DeciderState {
        *self.lock()
    }
}

// ============================================================================
// Decider trait
// ============================================================================

/// Listener that decides how a run ends.
pub trait Decider<C>: ResultReceiver<C> {
    /// Flags accumulated so far.
    fn state(&self) -> DeciderState;

    /// Whether to commit or roll back the change in flight.
    fn commit_decision(&self) -> CommitDecision;

    /// Event this decider derives from `event`, to be broadcast right after it.
    fn follow_up(&self, _event: &NomadEvent<C>) -> Option<NomadEvent<C>> {
        None
    }

    fn should_do_commit(&self) -> bool {
        self.commit_decision() == CommitDecision::Commit
    }

    fn should_do_rollback(&self) -> bool {
        self.commit_decision() == CommitDecision::Rollback
    }

    fn consistency(&self) -> Consistency {
        self.state().consistency()
    }
}

// ============================================================================
// Change
// ============================================================================

/// Decider of a change run: commit if and only if every server prepared.
#[derive(Debug, Default)]
pub struct ChangeDecider {
    state: SharedState,
}

impl ChangeDecider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: NomadChange> ResultReceiver<C> for ChangeDecider {
    fn on_event(&self, event: &NomadEvent<C>) {
        self.state.lock().record(event);
    }
}

impl<C: NomadChange> Decider<C> for ChangeDecider {
    fn state(&self) -> DeciderState {
        self.state.snapshot()
    }

    fn commit_decision(&self) -> CommitDecision {
        if self.state.snapshot().is_prepare_successful() {
            CommitDecision::Commit
        } else {
            CommitDecision::Rollback
        }
    }

    /// A change can only start on a cluster with nothing in flight.
    fn follow_up(&self, event: &NomadEvent<C>) -> Option<NomadEvent<C>> {
        let NomadEvent::Discovered { server, response } = event else {
            return None;
        };
        if response.mode != ServerMode::Prepared {
            return None;
        }
        let latest = response.latest_change.as_ref()?;
        Some(NomadEvent::DiscoverAlreadyPrepared {
            server: server.clone(),
            change_uuid: latest.change_uuid,
            creation_host: latest.creation_host.clone(),
            creation_user: latest.creation_user.clone(),
        })
    }
}

// ============================================================================
// Recovery
// ============================================================================

/// What one server reported about its changes.
#[derive(Debug, Clone)]
struct ServerChanges {
    server: HostPort,
    latest: Option<(ChangeUuid, ChangeRequestState)>,
    latest_committed: Option<ChangeUuid>,
}

/// Decider of a recovery run.
///
/// Resolution of the prepared change:
/// 1. a forced outcome always wins, and is applied to each prepared server
///    with the change that server holds;
/// 2. otherwise more than one distinct prepared change is undecidable;
/// 3. a change committed on some server is committed, one rolled back on
///    some server is rolled back, and one that is both is undecidable;
/// 4. a change no server has resolved is rolled back, but only when every
///    expected node was reached, since a missing node may have committed it.
#[derive(Debug)]
pub struct RecoveryDecider {
    state: SharedState,
    expected_node_count: usize,
    forced: Option<ForcedOutcome>,
    servers: Mutex<Vec<ServerChanges>>,
}

impl RecoveryDecider {
    /// Fails when `expected_node_count` is below the number of servers.
    pub fn new(
        server_count: usize,
        expected_node_count: usize,
        forced: Option<ForcedOutcome>,
    ) -> Result<Self> {
        if expected_node_count < server_count {
            return Err(NomadError::InvalidNodeCount {
                expected: expected_node_count,
                servers: server_count,
            });
        }
        Ok(Self {
            state: SharedState::default(),
            expected_node_count,
            forced,
            servers: Mutex::new(Vec::new()),
        })
    }

    fn servers(&self) -> MutexGuard<'_, Vec<ServerChanges>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Servers whose latest change is still prepared, with that change.
    pub fn prepared_servers(&self) -> Vec<(HostPort, ChangeUuid)> {
        self.servers()
            .iter()
            .filter_map(|s| match s.latest {
                Some((uuid, ChangeRequestState::Prepared)) => Some((s.server.clone(), uuid)),
                _ => None,
            })
            .collect()
    }

    fn decide(&self) -> CommitDecision {
        if let Some(forced) = self.forced {
            return forced.into();
        }

        let servers = self.servers();
        let mut prepared: Vec<ChangeUuid> = servers
            .iter()
            .filter_map(|s| match s.latest {
                Some((uuid, ChangeRequestState::Prepared)) => Some(uuid),
                _ => None,
            })
            .collect();
        prepared.sort_unstable();
        prepared.dedup();

        let uuid = match prepared.as_slice() {
            [] => return CommitDecision::Rollback,
            [uuid] => *uuid,
            _ => {
                tracing::warn!(changes = prepared.len(), "servers prepared different changes");
                return CommitDecision::Undecided;
            }
        };

        let committed = servers.iter().any(|s| {
            s.latest_committed == Some(uuid)
                || s.latest == Some((uuid, ChangeRequestState::Committed))
        });
        let rolled_back = servers
            .iter()
            .any(|s| s.latest == Some((uuid, ChangeRequestState::RolledBack)));

        match (committed, rolled_back) {
            (true, true) => CommitDecision::Undecided,
            (true, false) => CommitDecision::Commit,
            (false, true) => CommitDecision::Rollback,
            (false, false) if servers.len() < self.expected_node_count => {
                tracing::warn!(
                    uuid = %uuid,
                    reachable = servers.len(),
                    expected = self.expected_node_count,
                    "not every node was reached; cannot rule out a commit elsewhere"
                );
                CommitDecision::Undecided
            }
            (false, false) => CommitDecision::Rollback,
        }
    }
}

impl<C: NomadChange> ResultReceiver<C> for RecoveryDecider {
    fn on_event(&self, event: &NomadEvent<C>) {
        self.state.lock().record(event);
        if let NomadEvent::Discovered { server, response } = event {
            self.servers().push(ServerChanges {
                server: server.clone(),
                latest: response
                    .latest_change
                    .as_ref()
                    .map(|c| (c.change_uuid, c.state)),
                latest_committed: response
                    .latest_committed_change
                    .as_ref()
                    .map(|c| c.change_uuid),
            });
        }
    }
}

impl<C: NomadChange> Decider<C> for RecoveryDecider {
    fn state(&self) -> DeciderState {
        self.state.snapshot()
    }

    fn commit_decision(&self) -> CommitDecision {
        self.decide()
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Decider of a read-only discovery run.
///
/// A cluster holding a prepared change is reported as needing recovery even
/// when every server answered.
#[derive(Debug, Default)]
pub struct DiscoveryDecider {
    state: SharedState,
}

impl DiscoveryDecider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: NomadChange> ResultReceiver<C> for DiscoveryDecider {
    fn on_event(&self, event: &NomadEvent<C>) {
        self.state.lock().record(event);
    }
}

impl<C: NomadChange> Decider<C> for DiscoveryDecider {
    fn state(&self) -> DeciderState {
        self.state.snapshot()
    }

    fn commit_decision(&self) -> CommitDecision {
        CommitDecision::Undecided
    }

    fn consistency(&self) -> Consistency {
        let state = self.state.snapshot();
        match state.consistency() {
            Consistency::Consistent if !state.is_whole_cluster_accepting() => {
                Consistency::MayNeedRecovery
            }
            consistency => consistency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nomad_types::SimpleChange;
    use test_case::test_case;

    fn server(port: u16) -> HostPort {
        HostPort::new("localhost", port)
    }

    #[test]
    fn fresh_state_is_consistent() {
        let state = DeciderState::default();
        assert!(state.is_discover_successful());
        assert!(state.is_whole_cluster_accepting());
        assert_eq!(state.consistency(), Consistency::Consistent);
    }

    #[test_case(NomadEvent::DiscoverFail { server: server(1), reason: "down".into() }, Consistency::UnknownButNoChange ; "discover fail")]
    #[test_case(NomadEvent::TakeoverFail { server: server(1), reason: "down".into() }, Consistency::MayNeedRecovery ; "takeover fail")]
    #[test_case(NomadEvent::CommitFail { server: server(1), reason: "down".into() }, Consistency::MayNeedRecovery ; "commit fail")]
    #[test_case(NomadEvent::RollbackOtherClient { server: server(1), last_mutation_host: None, last_mutation_user: None }, Consistency::MayNeedRecovery ; "rollback other client")]
    #[test_case(NomadEvent::PrepareFail { server: server(1), reason: "down".into() }, Consistency::Consistent ; "prepare fail alone")]
    fn single_failure_maps_to_consistency(
        event: NomadEvent<SimpleChange>,
        expected: Consistency,
    ) {
        let mut state = DeciderState::default();
        state.record(&event);
        assert_eq!(state.consistency(), expected);
    }

    #[test]
    fn inconsistency_takes_precedence_over_everything() {
        let mut state = DeciderState::default();
        state.record::<SimpleChange>(&NomadEvent::DiscoverFail {
            server: server(1),
            reason: "down".into(),
        });
        state.record::<SimpleChange>(&NomadEvent::DiscoverConfigPartitioned {
            partitions: std::collections::BTreeMap::new(),
        });
        assert_eq!(state.consistency(), Consistency::UnrecoverablyPartitioned);

        state.record::<SimpleChange>(&NomadEvent::DiscoverConfigInconsistent {
            change_uuid: ChangeUuid::random(),
            committed: vec![server(1)],
            rolled_back: vec![server(2)],
        });
        assert_eq!(state.consistency(), Consistency::UnrecoverablyInconsistent);
    }

    #[test]
    fn change_decider_rolls_back_after_any_prepare_failure() {
        let decider = ChangeDecider::new();
        let d: &dyn Decider<SimpleChange> = &decider;
        assert!(d.should_do_commit());

        d.on_event(&NomadEvent::Prepared { server: server(1) });
        d.on_event(&NomadEvent::PrepareChangeUnacceptable {
            server: server(2),
            reason: "no".into(),
        });
        assert!(!d.should_do_commit());
        assert!(d.should_do_rollback());
    }

    #[test]
    fn recovery_decider_rejects_expected_count_below_servers() {
        let result = RecoveryDecider::new(3, 2, None);
        assert!(matches!(
            result,
            Err(NomadError::InvalidNodeCount {
                expected: 2,
                servers: 3
            })
        ));
    }

    #[test]
    fn recovery_decider_honours_forced_outcome() {
        let decider = RecoveryDecider::new(1, 5, Some(ForcedOutcome::Commit)).unwrap();
        assert_eq!(
            Decider::<SimpleChange>::commit_decision(&decider),
            CommitDecision::Commit
        );
    }
}

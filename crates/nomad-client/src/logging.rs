//! Log rendering of a Nomad run.

use nomad_types::NomadChange;

use crate::results::{Consistency, NomadEvent, ResultReceiver};

/// Receiver that turns every event into a `tracing` record.
///
/// Progress is logged at `debug`, per-server failures at `warn`, and
/// cluster-wide disagreement at `error`. The final verdict is logged at
/// `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingReceiver;

impl LoggingReceiver {
    pub fn new() -> Self {
        Self
    }
}

impl<C: NomadChange> ResultReceiver<C> for LoggingReceiver {
    #[allow(clippy::match_same_arms)]
    fn on_event(&self, event: &NomadEvent<C>) {
        match event {
            NomadEvent::StartDiscovery { servers } => {
                tracing::debug!(servers = servers.len(), "discovering servers");
            }
            NomadEvent::Discovered { server, response } => {
                tracing::debug!(
                    server = %server,
                    mode = ?response.mode,
                    count = %response.mutative_message_count,
                    version = %response.current_version,
                    "server discovered"
                );
            }
            NomadEvent::DiscoverFail { server, reason } => {
                tracing::warn!(server = %server, reason = %reason, "discover failed");
            }
            NomadEvent::DiscoverAlreadyPrepared {
                server,
                change_uuid,
                creation_host,
                creation_user,
            } => {
                tracing::warn!(
                    server = %server,
                    uuid = %change_uuid,
                    host = %creation_host,
                    user = %creation_user,
                    "another change is already prepared"
                );
            }
            NomadEvent::EndDiscovery => tracing::debug!("discovery finished"),
            NomadEvent::StartSecondDiscovery => tracing::debug!("discovering servers again"),
            NomadEvent::DiscoverRepeated { server } => {
                tracing::debug!(server = %server, "server unchanged since first discovery");
            }
            NomadEvent::DiscoverOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => {
                tracing::warn!(
                    server = %server,
                    host = ?last_mutation_host,
                    user = ?last_mutation_user,
                    "server changed by another client during discovery"
                );
            }
            NomadEvent::DiscoverConfigInconsistent {
                change_uuid,
                committed,
                rolled_back,
            } => {
                tracing::error!(
                    uuid = %change_uuid,
                    committed = ?committed,
                    rolled_back = ?rolled_back,
                    "change is committed on some servers and rolled back on others"
                );
            }
            NomadEvent::DiscoverConfigPartitioned { partitions } => {
                tracing::error!(
                    partitions = partitions.len(),
                    groups = ?partitions.values().collect::<Vec<_>>(),
                    "servers run different configurations"
                );
            }
            NomadEvent::EndSecondDiscovery => tracing::debug!("second discovery finished"),
            NomadEvent::StartPrepare { change_uuid } => {
                tracing::debug!(uuid = %change_uuid, "preparing change");
            }
            NomadEvent::Prepared { server } => {
                tracing::debug!(server = %server, "change prepared");
            }
            NomadEvent::PrepareFail { server, reason } => {
                tracing::warn!(server = %server, reason = %reason, "prepare failed");
            }
            NomadEvent::PrepareOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => {
                tracing::warn!(
                    server = %server,
                    host = ?last_mutation_host,
                    user = ?last_mutation_user,
                    "prepare rejected: another client mutated the server"
                );
            }
            NomadEvent::PrepareChangeUnacceptable { server, reason } => {
                tracing::warn!(server = %server, reason = %reason, "change rejected by server");
            }
            NomadEvent::EndPrepare => tracing::debug!("prepare finished"),
            NomadEvent::StartTakeover => tracing::debug!("taking over servers"),
            NomadEvent::TakeoverSucceeded { server } => {
                tracing::debug!(server = %server, "server taken over");
            }
            NomadEvent::TakeoverFail { server, reason } => {
                tracing::warn!(server = %server, reason = %reason, "takeover failed");
            }
            NomadEvent::TakeoverOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => {
                tracing::warn!(
                    server = %server,
                    host = ?last_mutation_host,
                    user = ?last_mutation_user,
                    "takeover rejected: another client mutated the server"
                );
            }
            NomadEvent::EndTakeover => tracing::debug!("takeover finished"),
            NomadEvent::StartCommit => tracing::debug!("committing change"),
            NomadEvent::Committed { server } => {
                tracing::debug!(server = %server, "change committed");
            }
            NomadEvent::CommitFail { server, reason } => {
                tracing::warn!(server = %server, reason = %reason, "commit failed");
            }
            NomadEvent::CommitOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => {
                tracing::warn!(
                    server = %server,
                    host = ?last_mutation_host,
                    user = ?last_mutation_user,
                    "commit rejected: another client mutated the server"
                );
            }
            NomadEvent::EndCommit => tracing::debug!("commit finished"),
            NomadEvent::StartRollback => tracing::debug!("rolling back change"),
            NomadEvent::RolledBack { server } => {
                tracing::debug!(server = %server, "change rolled back");
            }
            NomadEvent::RollbackFail { server, reason } => {
                tracing::warn!(server = %server, reason = %reason, "rollback failed");
            }
            NomadEvent::RollbackOtherClient {
                server,
                last_mutation_host,
                last_mutation_user,
            } => {
                tracing::warn!(
                    server = %server,
                    host = ?last_mutation_host,
                    user = ?last_mutation_user,
                    "rollback rejected: another client mutated the server"
                );
            }
            NomadEvent::EndRollback => tracing::debug!("rollback finished"),
            NomadEvent::CannotDecideOverCommitOrRollback => {
                tracing::error!(
                    "cannot decide whether to commit or roll back; rerun recovery with a forced outcome"
                );
            }
            NomadEvent::Done { consistency } => log_done(*consistency),
        }
    }
}

fn log_done(consistency: Consistency) {
    match consistency {
        Consistency::Consistent => tracing::info!("cluster is consistent"),
        Consistency::MayNeedRecovery => {
            tracing::info!("change may be partially applied; recovery may be needed");
        }
        Consistency::UnknownButNoChange => {
            tracing::info!("cluster state unknown; no change was made");
        }
        Consistency::UnrecoverablyInconsistent => {
            tracing::info!("cluster is inconsistent and cannot be recovered automatically");
        }
        Consistency::UnrecoverablyPartitioned => {
            tracing::info!("cluster is partitioned and cannot be recovered automatically");
        }
    }
}

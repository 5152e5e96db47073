//! Finishing a change another run left prepared.

use nomad_types::NomadChange;

use super::Process;
use crate::checker::ConsistencyChecker;
use crate::decider::{Decider, ForcedOutcome, RecoveryDecider};
use crate::error::Result;
use crate::results::{Consistency, ResultReceiver};
use crate::sender::MessageSender;

/// Takes over every server, then commits or rolls back the change they
/// still hold prepared.
///
/// A cluster where no server holds a prepared change is left untouched.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryProcess {
    expected_node_count: usize,
    forced: Option<ForcedOutcome>,
}

impl RecoveryProcess {
    /// `expected_node_count` counts every node of the cluster, reachable or not.
    pub fn new(expected_node_count: usize, forced: Option<ForcedOutcome>) -> Self {
        Self {
            expected_node_count,
            forced,
        }
    }

    pub async fn run<C: NomadChange>(
        self,
        results: &dyn ResultReceiver<C>,
        sender: &MessageSender<C>,
    ) -> Result<Consistency> {
        let decider =
            RecoveryDecider::new(sender.server_count(), self.expected_node_count, self.forced)?;
        let checker = ConsistencyChecker::new();
        let process = Process::new(results, sender, &decider, &checker);

        if !process.discover().await? {
            return Ok(process.finish());
        }
        if Decider::<C>::state(&decider).is_whole_cluster_accepting() {
            tracing::debug!("no prepared change to recover");
            return Ok(process.finish());
        }

        sender.send_takeovers(process.listeners()).await?;
        if !Decider::<C>::state(&decider).is_takeover_successful() {
            return Ok(process.finish());
        }

        for (server, change_uuid) in decider.prepared_servers() {
            sender.register_prepared_change(&server, change_uuid);
        }

        process.resolve().await
    }
}

//! Applying one change across the cluster.

use nomad_types::{ChangeUuid, NomadChange};

use super::Process;
use crate::checker::ConsistencyChecker;
use crate::decider::ChangeDecider;
use crate::error::Result;
use crate::results::{Consistency, ResultReceiver};
use crate::sender::MessageSender;

/// Prepares a change on every server, then commits it if all of them
/// accepted and rolls it back otherwise.
#[derive(Debug)]
pub struct ChangeProcess<C> {
    change: C,
}

impl<C: NomadChange> ChangeProcess<C> {
    pub fn new(change: C) -> Self {
        Self { change }
    }

    pub async fn run(
        self,
        results: &dyn ResultReceiver<C>,
        sender: &MessageSender<C>,
    ) -> Result<Consistency> {
        let decider = ChangeDecider::new();
        let checker = ConsistencyChecker::new();
        let process = Process::new(results, sender, &decider, &checker);

        if !process.discover().await? {
            return Ok(process.finish());
        }

        let change_uuid = ChangeUuid::random();
        tracing::debug!(
            uuid = %change_uuid,
            summary = %self.change.summary(),
            "preparing change"
        );
        process
            .sender()
            .send_prepares(process.listeners(), change_uuid, self.change)
            .await?;

        process.resolve().await
    }
}

//! Read-only inspection of the cluster.

use nomad_types::NomadChange;

use super::Process;
use crate::checker::ConsistencyChecker;
use crate::decider::DiscoveryDecider;
use crate::error::Result;
use crate::results::{Consistency, ResultReceiver};
use crate::sender::MessageSender;

/// Runs both discovery rounds and the consistency check, then reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryProcess;

impl DiscoveryProcess {
    pub fn new() -> Self {
        Self
    }

    pub async fn run<C: NomadChange>(
        self,
        results: &dyn ResultReceiver<C>,
        sender: &MessageSender<C>,
    ) -> Result<Consistency> {
        let decider = DiscoveryDecider::new();
        let checker = ConsistencyChecker::new();
        let process = Process::new(results, sender, &decider, &checker);

        process.discover().await?;
        Ok(process.finish())
    }
}

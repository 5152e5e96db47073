//! The three-step skeleton shared by every Nomad run.
//!
//! 1. Double discovery, followed by the consistency check.
//! 2. A process-specific action (prepare, or takeover for recovery).
//! 3. Resolution: commit or roll back on the servers holding the change.
//!
//! Every event goes to the caller's receiver, the decider, the sender and the
//! checker, in that order. Events a decider derives from another event are
//! broadcast right after it.

mod change;
mod discovery;
mod recovery;

pub use change::ChangeProcess;
pub use discovery::DiscoveryProcess;
pub use recovery::RecoveryProcess;

use nomad_types::NomadChange;

use crate::checker::ConsistencyChecker;
use crate::decider::{CommitDecision, Decider};
use crate::error::Result;
use crate::results::{Consistency, MuxReceiver, NomadEvent, ResultReceiver};
use crate::sender::MessageSender;

/// Ordered broadcast to a run's collaborators.
struct Listeners<'a, C> {
    receivers: MuxReceiver<'a, C>,
    decider: &'a dyn Decider<C>,
}

impl<C> ResultReceiver<C> for Listeners<'_, C> {
    fn on_event(&self, event: &NomadEvent<C>) {
        self.receivers.on_event(event);
        if let Some(follow_up) = self.decider.follow_up(event) {
            self.on_event(&follow_up);
        }
    }
}

/// One run, wired to its collaborators.
struct Process<'a, C: NomadChange> {
    sender: &'a MessageSender<C>,
    decider: &'a dyn Decider<C>,
    checker: &'a ConsistencyChecker<C>,
    listeners: Listeners<'a, C>,
}

impl<'a, C: NomadChange> Process<'a, C> {
    fn new(
        results: &'a dyn ResultReceiver<C>,
        sender: &'a MessageSender<C>,
        decider: &'a dyn Decider<C>,
        checker: &'a ConsistencyChecker<C>,
    ) -> Self {
        let receivers = MuxReceiver::new(vec![
            results,
            decider as &dyn ResultReceiver<C>,
            sender as &dyn ResultReceiver<C>,
            checker as &dyn ResultReceiver<C>,
        ]);
        Self {
            sender,
            decider,
            checker,
            listeners: Listeners { receivers, decider },
        }
    }

    fn listeners(&self) -> &dyn ResultReceiver<C> {
        &self.listeners
    }

    fn sender(&self) -> &MessageSender<C> {
        self.sender
    }

    /// Runs both discovery rounds and the consistency check.
    ///
    /// Returns false when the run must stop: a server failed or was already
    /// busy, another client interfered, or the cluster disagrees with itself.
    async fn discover(&self) -> Result<bool> {
        self.sender.send_discovers(self.listeners()).await?;
        if !self.decider.state().is_discover_successful() {
            return Ok(false);
        }

        self.sender.send_second_discovers(self.listeners()).await?;
        self.checker.check(self.listeners());
        self.listeners.on_event(&NomadEvent::EndSecondDiscovery);

        let state = self.decider.state();
        Ok(state.is_discover_successful() && !state.is_inconsistent() && !state.is_partitioned())
    }

    /// Commits or rolls back the change, as the decider says.
    ///
    /// When the decider cannot tell, `cannot_decide_over_commit_or_rollback`
    /// ends the run without a `done` event.
    async fn resolve(&self) -> Result<Consistency> {
        match self.decider.commit_decision() {
            CommitDecision::Commit => self.sender.send_commits(self.listeners()).await?,
            CommitDecision::Rollback => self.sender.send_rollbacks(self.listeners()).await?,
            CommitDecision::Undecided => {
                self.listeners
                    .on_event(&NomadEvent::CannotDecideOverCommitOrRollback);
                return Ok(Consistency::MayNeedRecovery);
            }
        }
        Ok(self.finish())
    }

    /// Reports the verdict.
    fn finish(&self) -> Consistency {
        let consistency = self.decider.consistency();
        self.listeners.on_event(&NomadEvent::Done { consistency });
        consistency
    }
}

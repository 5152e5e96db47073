//! Fan-out of protocol phases to every server.
//!
//! Each phase dispatches one call per target server concurrently, bounded by
//! a concurrency cap and a per-call timeout. Outcomes are collected into
//! per-server slots and published in server order once the whole phase has
//! completed, so the event trail does not depend on response timing.
//!
//! The sender is also a listener: it learns fencing tokens and the highest
//! version from `discovered` events, and which servers hold the change from
//! `prepared` events. Commit and rollback only go to those servers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nomad_types::{
    AcceptRejectResponse, ChangeUuid, CommitMessage, DiscoverResponse, HostPort,
    MutativeMessageCount, NomadChange, NomadServerError, PrepareMessage, RejectionReason,
    RollbackMessage, TakeoverMessage, Version,
};
use tokio::task::JoinSet;

use crate::clock::Clock;
use crate::endpoint::NomadEndpoint;
use crate::error::{NomadError, Phase, Result};
use crate::results::{NomadEvent, ResultReceiver};

/// Default deadline of a single server call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of server calls in flight within one phase.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 8;

type Call<R> = Pin<Box<dyn Future<Output = std::result::Result<R, NomadServerError>> + Send>>;

/// What the sender learned from the event stream.
#[derive(Debug, Default)]
struct Tracker {
    mutative_message_counts: HashMap<HostPort, MutativeMessageCount>,
    max_version: Version,
    prepared_servers: Vec<HostPort>,
    change_uuid: Option<ChangeUuid>,
    prepared_changes: HashMap<HostPort, ChangeUuid>,
}

/// Sends each protocol phase to the servers of one run.
pub struct MessageSender<C: NomadChange> {
    servers: Vec<NomadEndpoint<C>>,
    host: String,
    user: String,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    max_concurrent_calls: usize,
    tracker: Mutex<Tracker>,
}

/// How a rejection maps to an event for one mutative phase.
enum RejectionEvent {
    OtherClient,
    Unacceptable,
}

impl<C: NomadChange> MessageSender<C> {
    pub fn new(
        servers: Vec<NomadEndpoint<C>>,
        host: impl Into<String>,
        user: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            servers,
            host: host.into(),
            user: user.into(),
            clock,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            tracker: Mutex::new(Tracker::default()),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_max_concurrent_calls(mut self, max_concurrent_calls: usize) -> Self {
        self.max_concurrent_calls = max_concurrent_calls.max(1);
        self
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    fn addresses(&self) -> Vec<HostPort> {
        self.servers.iter().map(|s| s.address().clone()).collect()
    }

    /// Fencing token discovered for `server`.
    pub fn mutative_message_count(&self, server: &HostPort) -> Option<MutativeMessageCount> {
        self.tracker().mutative_message_counts.get(server).copied()
    }

    /// Highest version seen across all discovered servers.
    pub fn max_version(&self) -> Version {
        self.tracker().max_version
    }

    /// Servers that will receive commit or rollback, in server order.
    pub fn prepared_servers(&self) -> Vec<HostPort> {
        self.tracker().prepared_servers.clone()
    }

    pub fn change_uuid(&self) -> Option<ChangeUuid> {
        self.tracker().change_uuid
    }

    /// Change that commit or rollback will target on `server`.
    pub fn change_uuid_for(&self, server: &HostPort) -> Option<ChangeUuid> {
        let tracker = self.tracker();
        tracker
            .prepared_changes
            .get(server)
            .copied()
            .or(tracker.change_uuid)
    }

    /// Marks `server` as holding the change, so it receives commit or rollback.
    pub fn register_prepared_server(&self, server: &HostPort) {
        let mut tracker = self.tracker();
        if !tracker.prepared_servers.contains(server) {
            tracker.prepared_servers.push(server.clone());
        }
    }

    /// Sets the change that commit or rollback will target.
    pub fn set_change_uuid(&self, change_uuid: ChangeUuid) {
        self.tracker().change_uuid = Some(change_uuid);
    }

    /// Marks `server` as holding `change_uuid`, which commit or rollback will
    /// target on that server only.
    pub fn register_prepared_change(&self, server: &HostPort, change_uuid: ChangeUuid) {
        self.register_prepared_server(server);
        self.tracker()
            .prepared_changes
            .insert(server.clone(), change_uuid);
    }

    fn target_change(&self, server: &HostPort) -> Result<ChangeUuid> {
        self.change_uuid_for(server)
            .ok_or(NomadError::NoChangeInFlight)
    }

    fn token(&self, server: &HostPort) -> Result<MutativeMessageCount> {
        self.mutative_message_count(server)
            .ok_or_else(|| NomadError::NotDiscovered(server.clone()))
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Runs one call per server concurrently and returns outcomes in input order.
    ///
    /// A call that does not finish within the timeout counts as failed. It is
    /// dropped on the client side, but the server may still process it.
    async fn fan_out<R: Send + 'static>(
        &self,
        calls: Vec<Call<R>>,
    ) -> Vec<std::result::Result<R, String>> {
        let mut slots: Vec<Option<std::result::Result<R, String>>> =
            std::iter::repeat_with(|| None).take(calls.len()).collect();
        let mut in_flight = JoinSet::new();
        let call_timeout = self.call_timeout;

        for (index, call) in calls.into_iter().enumerate() {
            if in_flight.len() >= self.max_concurrent_calls {
                if let Some(joined) = in_flight.join_next().await {
                    store(&mut slots, joined);
                }
            }
            in_flight.spawn(async move {
                let outcome = match tokio::time::timeout(call_timeout, call).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(error)) => Err(error.to_string()),
                    Err(_) => Err(format!(
                        "call timed out after {}ms",
                        call_timeout.as_millis()
                    )),
                };
                (index, outcome)
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            store(&mut slots, joined);
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err("call was aborted".to_string())))
            .collect()
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    pub async fn send_discovers(&self, results: &dyn ResultReceiver<C>) -> Result<()> {
        results.on_event(&NomadEvent::StartDiscovery {
            servers: self.addresses(),
        });

        let calls = self
            .servers
            .iter()
            .map(|endpoint| {
                let endpoint = endpoint.clone();
                Box::pin(async move { endpoint.discover().await }) as Call<_>
            })
            .collect();
        let outcomes = self.fan_out(calls).await;

        for (endpoint, outcome) in self.servers.iter().zip(outcomes) {
            let server = endpoint.address().clone();
            match outcome {
                Ok(response) => results.on_event(&NomadEvent::Discovered { server, response }),
                Err(reason) => results.on_event(&NomadEvent::DiscoverFail { server, reason }),
            }
        }

        results.on_event(&NomadEvent::EndDiscovery);
        Ok(())
    }

    /// Discovers again and compares fencing tokens with the first round.
    ///
    /// The closing `end_second_discovery` is emitted by the caller, after the
    /// consistency check.
    pub async fn send_second_discovers(&self, results: &dyn ResultReceiver<C>) -> Result<()> {
        results.on_event(&NomadEvent::StartSecondDiscovery);

        let calls = self
            .servers
            .iter()
            .map(|endpoint| {
                let endpoint = endpoint.clone();
                Box::pin(async move { endpoint.discover().await }) as Call<DiscoverResponse<C>>
            })
            .collect();
        let outcomes = self.fan_out(calls).await;

        for (endpoint, outcome) in self.servers.iter().zip(outcomes) {
            let server = endpoint.address().clone();
            match outcome {
                Ok(response) => {
                    let first = self.token(&server)?;
                    if response.mutative_message_count == first {
                        results.on_event(&NomadEvent::DiscoverRepeated { server });
                    } else {
                        results.on_event(&NomadEvent::DiscoverOtherClient {
                            server,
                            last_mutation_host: response.last_mutation_host,
                            last_mutation_user: response.last_mutation_user,
                        });
                    }
                }
                Err(reason) => results.on_event(&NomadEvent::DiscoverFail { server, reason }),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Mutative phases
    // ========================================================================

    /// Prepares `change` on every server, at the next cluster-wide version.
    pub async fn send_prepares(
        &self,
        results: &dyn ResultReceiver<C>,
        change_uuid: ChangeUuid,
        change: C,
    ) -> Result<()> {
        self.set_change_uuid(change_uuid);
        results.on_event(&NomadEvent::StartPrepare { change_uuid });

        let version = self.max_version().next();
        let now = self.clock.now();
        let mut calls = Vec::with_capacity(self.servers.len());
        for endpoint in &self.servers {
            let message = PrepareMessage {
                expected_mutative_message_count: self.token(endpoint.address())?,
                mutation_host: self.host.clone(),
                mutation_user: self.user.clone(),
                mutation_timestamp: now,
                change_uuid,
                version,
                change: change.clone(),
            };
            let endpoint = endpoint.clone();
            calls.push(Box::pin(async move { endpoint.prepare(message).await }) as Call<_>);
        }
        let outcomes = self.fan_out(calls).await;

        for (endpoint, outcome) in self.servers.iter().zip(outcomes) {
            let server = endpoint.address().clone();
            let event = mutative_event(
                Phase::Prepare,
                server,
                outcome,
                |server| NomadEvent::Prepared { server },
                |server, reason| NomadEvent::PrepareFail { server, reason },
                |server, rejection, kind| match kind {
                    RejectionEvent::OtherClient => NomadEvent::PrepareOtherClient {
                        server,
                        last_mutation_host: rejection.last_mutation_host,
                        last_mutation_user: rejection.last_mutation_user,
                    },
                    RejectionEvent::Unacceptable => NomadEvent::PrepareChangeUnacceptable {
                        server,
                        reason: rejection.message.unwrap_or_default(),
                    },
                },
            )?;
            results.on_event(&event);
        }

        results.on_event(&NomadEvent::EndPrepare);
        Ok(())
    }

    /// Takes over every server, whoever holds its prepared change.
    pub async fn send_takeovers(&self, results: &dyn ResultReceiver<C>) -> Result<()> {
        results.on_event(&NomadEvent::StartTakeover);

        let now = self.clock.now();
        let mut calls = Vec::with_capacity(self.servers.len());
        for endpoint in &self.servers {
            let message = TakeoverMessage {
                expected_mutative_message_count: self.token(endpoint.address())?,
                mutation_host: self.host.clone(),
                mutation_user: self.user.clone(),
                mutation_timestamp: now,
            };
            let endpoint = endpoint.clone();
            calls.push(Box::pin(async move { endpoint.takeover(message).await }) as Call<_>);
        }
        let outcomes = self.fan_out(calls).await;

        for (endpoint, outcome) in self.servers.iter().zip(outcomes) {
            let event = mutative_event(
                Phase::Takeover,
                endpoint.address().clone(),
                outcome,
                |server| NomadEvent::TakeoverSucceeded { server },
                |server, reason| NomadEvent::TakeoverFail { server, reason },
                |server, rejection, _| NomadEvent::TakeoverOtherClient {
                    server,
                    last_mutation_host: rejection.last_mutation_host,
                    last_mutation_user: rejection.last_mutation_user,
                },
            )?;
            results.on_event(&event);
        }

        results.on_event(&NomadEvent::EndTakeover);
        Ok(())
    }

    /// Commits the change on the servers that prepared it.
    pub async fn send_commits(&self, results: &dyn ResultReceiver<C>) -> Result<()> {
        results.on_event(&NomadEvent::StartCommit);

        let targets = self.prepared_endpoints();
        let now = self.clock.now();
        let mut calls = Vec::with_capacity(targets.len());
        for endpoint in &targets {
            let message = CommitMessage {
                expected_mutative_message_count: self.token(endpoint.address())?.next(),
                mutation_host: self.host.clone(),
                mutation_user: self.user.clone(),
                mutation_timestamp: now,
                change_uuid: self.target_change(endpoint.address())?,
            };
            let endpoint = endpoint.clone();
            calls.push(Box::pin(async move { endpoint.commit(message).await }) as Call<_>);
        }
        let outcomes = self.fan_out(calls).await;

        for (endpoint, outcome) in targets.iter().zip(outcomes) {
            let event = mutative_event(
                Phase::Commit,
                endpoint.address().clone(),
                outcome,
                |server| NomadEvent::Committed { server },
                |server, reason| NomadEvent::CommitFail { server, reason },
                |server, rejection, _| NomadEvent::CommitOtherClient {
                    server,
                    last_mutation_host: rejection.last_mutation_host,
                    last_mutation_user: rejection.last_mutation_user,
                },
            )?;
            results.on_event(&event);
        }

        results.on_event(&NomadEvent::EndCommit);
        Ok(())
    }

    /// Rolls the change back on the servers that prepared it.
    pub async fn send_rollbacks(&self, results: &dyn ResultReceiver<C>) -> Result<()> {
        results.on_event(&NomadEvent::StartRollback);

        let targets = self.prepared_endpoints();
        let now = self.clock.now();
        let mut calls = Vec::with_capacity(targets.len());
        for endpoint in &targets {
            let message = RollbackMessage {
                expected_mutative_message_count: self.token(endpoint.address())?.next(),
                mutation_host: self.host.clone(),
                mutation_user: self.user.clone(),
                mutation_timestamp: now,
                change_uuid: self.target_change(endpoint.address())?,
            };
            let endpoint = endpoint.clone();
            calls.push(Box::pin(async move { endpoint.rollback(message).await }) as Call<_>);
        }
        let outcomes = self.fan_out(calls).await;

        for (endpoint, outcome) in targets.iter().zip(outcomes) {
            let event = mutative_event(
                Phase::Rollback,
                endpoint.address().clone(),
                outcome,
                |server| NomadEvent::RolledBack { server },
                |server, reason| NomadEvent::RollbackFail { server, reason },
                |server, rejection, _| NomadEvent::RollbackOtherClient {
                    server,
                    last_mutation_host: rejection.last_mutation_host,
                    last_mutation_user: rejection.last_mutation_user,
                },
            )?;
            results.on_event(&event);
        }

        results.on_event(&NomadEvent::EndRollback);
        Ok(())
    }

    fn prepared_endpoints(&self) -> Vec<NomadEndpoint<C>> {
        let prepared = self.prepared_servers();
        self.servers
            .iter()
            .filter(|endpoint| prepared.contains(endpoint.address()))
            .cloned()
            .collect()
    }
}

fn store<R>(
    slots: &mut [Option<std::result::Result<R, String>>],
    joined: std::result::Result<(usize, std::result::Result<R, String>), tokio::task::JoinError>,
) {
    match joined {
        Ok((index, outcome)) => {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(outcome);
            }
        }
        Err(error) => {
            // The slot stays empty and is reported as aborted.
            tracing::warn!(error = %error, "server call task did not complete");
        }
    }
}

/// Maps the outcome of one mutative call to its event.
///
/// DEAD always maps to the phase's other-client event. UNACCEPTABLE is only
/// legal for prepare. Anything else violates the protocol.
fn mutative_event<C>(
    phase: Phase,
    server: HostPort,
    outcome: std::result::Result<AcceptRejectResponse, String>,
    accepted: impl FnOnce(HostPort) -> NomadEvent<C>,
    failed: impl FnOnce(HostPort, String) -> NomadEvent<C>,
    rejected: impl FnOnce(HostPort, nomad_types::Rejection, RejectionEvent) -> NomadEvent<C>,
) -> Result<NomadEvent<C>> {
    let response = match outcome {
        Ok(response) => response,
        Err(reason) => return Ok(failed(server, reason)),
    };
    let rejection = match response {
        AcceptRejectResponse::Accept => return Ok(accepted(server)),
        AcceptRejectResponse::Reject(rejection) => rejection,
    };

    match (rejection.reason, phase) {
        (RejectionReason::Dead, _) => Ok(rejected(server, rejection, RejectionEvent::OtherClient)),
        (RejectionReason::Unacceptable, Phase::Prepare) => {
            Ok(rejected(server, rejection, RejectionEvent::Unacceptable))
        }
        (reason, phase) => {
            tracing::error!(
                server = %server,
                phase = %phase,
                reason = ?reason,
                message = ?rejection.message,
                "server rejected message with an impossible reason"
            );
            Err(NomadError::ProtocolViolation {
                server,
                phase,
                reason,
                message: rejection.message,
            })
        }
    }
}

impl<C: NomadChange> ResultReceiver<C> for MessageSender<C> {
    fn on_event(&self, event: &NomadEvent<C>) {
        match event {
            NomadEvent::Discovered { server, response } => {
                let mut tracker = self.tracker();
                tracker
                    .mutative_message_counts
                    .insert(server.clone(), response.mutative_message_count);
                tracker.max_version = tracker.max_version.max(response.highest_version);
            }
            NomadEvent::Prepared { server } => self.register_prepared_server(server),
            _ => {}
        }
    }
}

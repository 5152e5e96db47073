//! Public entry point of the Nomad client.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use nomad_config::NomadConfig;
use nomad_types::{HostPort, NomadChange, NomadServer};

use crate::clock::{Clock, SystemClock};
use crate::decider::ForcedOutcome;
use crate::endpoint::NomadEndpoint;
use crate::error::{NomadError, Result};
use crate::process::{ChangeProcess, DiscoveryProcess, RecoveryProcess};
use crate::results::{Consistency, ResultReceiver};
use crate::sender::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_CONCURRENT_CALLS, MessageSender};

/// Drives Nomad runs against a fixed set of servers.
///
/// Every call starts from scratch: no state survives between runs, so a
/// client can be reused and shared freely.
pub struct NomadClient<C: NomadChange> {
    servers: Vec<NomadEndpoint<C>>,
    host: String,
    user: String,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    max_concurrent_calls: usize,
    expected_node_count: usize,
}

impl<C: NomadChange> NomadClient<C> {
    /// Creates a client identifying itself as `user` on `host`.
    ///
    /// Fails on an empty server list or a server listed twice.
    pub fn new(
        servers: Vec<NomadEndpoint<C>>,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Self> {
        if servers.is_empty() {
            return Err(NomadError::EmptyCluster);
        }
        let mut seen = HashSet::new();
        for server in &servers {
            if !seen.insert(server.address()) {
                return Err(NomadError::DuplicateServer(server.address().clone()));
            }
        }

        Ok(Self {
            expected_node_count: servers.len(),
            servers,
            host: host.into(),
            user: user.into(),
            clock: Arc::new(SystemClock),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
        })
    }

    /// Creates a client from configuration. `connect` opens each server.
    pub fn from_config<F>(config: &NomadConfig, mut connect: F) -> Result<Self>
    where
        F: FnMut(&HostPort) -> Arc<dyn NomadServer<C>>,
    {
        config.validate()?;
        let servers = config
            .cluster
            .server_addresses()?
            .into_iter()
            .map(|address| {
                let server = connect(&address);
                NomadEndpoint::new(address, server)
            })
            .collect();

        Ok(Self::new(servers, &config.client.host, &config.client.user)?
            .with_call_timeout(config.client.call_timeout())
            .with_max_concurrent_calls(config.client.max_concurrent_calls)
            .with_expected_node_count(config.cluster.expected_node_count()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_max_concurrent_calls(mut self, max_concurrent_calls: usize) -> Self {
        self.max_concurrent_calls = max_concurrent_calls;
        self
    }

    /// Size of the whole cluster assumed by [`try_cluster_recovery`].
    ///
    /// Defaults to the number of servers.
    ///
    /// [`try_cluster_recovery`]: Self::try_cluster_recovery
    pub fn with_expected_node_count(mut self, expected_node_count: usize) -> Self {
        self.expected_node_count = expected_node_count;
        self
    }

    pub fn expected_node_count(&self) -> usize {
        self.expected_node_count
    }

    pub fn servers(&self) -> Vec<HostPort> {
        self.servers.iter().map(|s| s.address().clone()).collect()
    }

    fn sender(&self) -> MessageSender<C> {
        MessageSender::new(
            self.servers.clone(),
            self.host.clone(),
            self.user.clone(),
            Arc::clone(&self.clock),
        )
        .with_call_timeout(self.call_timeout)
        .with_max_concurrent_calls(self.max_concurrent_calls)
    }

    /// Applies `change` on every server, or on none.
    ///
    /// Per-server failures are reported to `results`; `Err` is reserved for
    /// protocol violations.
    pub async fn try_apply_change(
        &self,
        results: &dyn ResultReceiver<C>,
        change: C,
    ) -> Result<Consistency> {
        tracing::info!(
            servers = self.servers.len(),
            summary = %change.summary(),
            "applying change"
        );
        ChangeProcess::new(change)
            .run(results, &self.sender())
            .await
    }

    /// Resolves a change left prepared by an interrupted run.
    ///
    /// `expected_total_node_count` is the size of the whole cluster; when it
    /// exceeds the number of servers, recovery only rolls back a change it can
    /// prove no missing node committed. `forced` imposes the outcome.
    pub async fn try_recovery(
        &self,
        results: &dyn ResultReceiver<C>,
        expected_total_node_count: usize,
        forced: Option<ForcedOutcome>,
    ) -> Result<Consistency> {
        tracing::info!(
            servers = self.servers.len(),
            expected = expected_total_node_count,
            forced = ?forced,
            "recovering cluster"
        );
        RecoveryProcess::new(expected_total_node_count, forced)
            .run(results, &self.sender())
            .await
    }

    /// Recovers against the cluster size this client was configured with.
    pub async fn try_cluster_recovery(
        &self,
        results: &dyn ResultReceiver<C>,
        forced: Option<ForcedOutcome>,
    ) -> Result<Consistency> {
        self.try_recovery(results, self.expected_node_count, forced)
            .await
    }

    /// Inspects the cluster without mutating it.
    pub async fn try_discovery(&self, results: &dyn ResultReceiver<C>) -> Result<Consistency> {
        DiscoveryProcess::new()
            .run(results, &self.sender())
            .await
    }
}

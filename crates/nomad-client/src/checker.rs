//! Cross-server consistency check over the first discovery round.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use nomad_types::{
    ChangeRequestState, ChangeUuid, ConfigHash, DiscoverResponse, HostPort, NomadChange,
};

use crate::results::{NomadEvent, ResultReceiver};

/// Detects split decisions and diverging configurations.
///
/// Collects every `discovered` event, then [`check`](Self::check) looks for
/// two failure shapes:
///
/// - *inconsistent*: one change committed on some servers and rolled back on
///   others;
/// - *partitioned*: no such conflict, but servers run configurations with
///   different hashes.
///
/// A server's running configuration is the one of its latest committed
/// change, or [`ConfigHash::EMPTY`] when it has committed nothing. Servers
/// whose latest change is still prepared take no part in the hash comparison.
pub struct ConsistencyChecker<C> {
    discovered: Mutex<Vec<(HostPort, DiscoverResponse<C>)>>,
}

impl<C> Default for ConsistencyChecker<C> {
    fn default() -> Self {
        Self {
            discovered: Mutex::new(Vec::new()),
        }
    }
}

impl<C: NomadChange> ConsistencyChecker<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn discovered(&self) -> MutexGuard<'_, Vec<(HostPort, DiscoverResponse<C>)>> {
        self.discovered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reports what it finds to `results`. Returns true if the cluster passed.
    pub fn check(&self, results: &dyn ResultReceiver<C>) -> bool {
        let events = self.findings();
        let passed = events.is_empty();
        for event in &events {
            results.on_event(event);
        }
        passed
    }

    fn findings(&self) -> Vec<NomadEvent<C>> {
        let discovered = self.discovered();

        let mut committed: BTreeMap<ChangeUuid, Vec<HostPort>> = BTreeMap::new();
        let mut rolled_back: BTreeMap<ChangeUuid, Vec<HostPort>> = BTreeMap::new();
        for (server, response) in discovered.iter() {
            if let Some(change) = &response.latest_committed_change {
                committed
                    .entry(change.change_uuid)
                    .or_default()
                    .push(server.clone());
            }
            if let Some(change) = &response.latest_change {
                if change.state == ChangeRequestState::RolledBack {
                    rolled_back
                        .entry(change.change_uuid)
                        .or_default()
                        .push(server.clone());
                }
            }
        }

        let conflicts: Vec<NomadEvent<C>> = committed
            .into_iter()
            .filter_map(|(change_uuid, committed)| {
                let rolled_back = rolled_back.remove(&change_uuid)?;
                Some(NomadEvent::DiscoverConfigInconsistent {
                    change_uuid,
                    committed,
                    rolled_back,
                })
            })
            .collect();
        if !conflicts.is_empty() {
            return conflicts;
        }

        let mut partitions: BTreeMap<ConfigHash, Vec<HostPort>> = BTreeMap::new();
        for (server, response) in discovered.iter() {
            if response.latest_change_state() == Some(ChangeRequestState::Prepared) {
                continue;
            }
            let hash = response
                .latest_committed_change
                .as_ref()
                .map_or(ConfigHash::EMPTY, |change| change.change_result_hash);
            partitions.entry(hash).or_default().push(server.clone());
        }
        if partitions.len() > 1 {
            return vec![NomadEvent::DiscoverConfigPartitioned { partitions }];
        }

        Vec::new()
    }
}

impl<C: NomadChange> ResultReceiver<C> for ConsistencyChecker<C> {
    fn on_event(&self, event: &NomadEvent<C>) {
        if let NomadEvent::Discovered { server, response } = event {
            self.discovered().push((server.clone(), response.clone()));
        }
    }
}

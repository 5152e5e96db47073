//! Protocol state of a single server.
//!
//! The state is an append-only log of changes linked by their predecessor,
//! plus the scalar fields clients discover (mode, fencing token, versions and
//! last mutation). Every mutation goes through [`ServerState::apply`], which
//! enforces that the fencing token advances by exactly one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nomad_types::{
    ChangeDetails, ChangeRequestState, ChangeUuid, ConfigHash, DiscoverResponse,
    MutativeMessageCount, ServerMode, Version,
};

use crate::error::{Result, ServerError};

/// Everything a server remembers about one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeState<C, T> {
    pub state: ChangeRequestState,
    pub version: Version,
    pub prev_change_uuid: Option<ChangeUuid>,
    pub change: C,
    /// Configuration this change produces.
    pub change_result: T,
    pub change_result_hash: ConfigHash,
    pub creation_host: String,
    pub creation_user: String,
    pub creation_timestamp: DateTime<Utc>,
}

impl<C: Clone, T> ChangeState<C, T> {
    fn details(&self, change_uuid: ChangeUuid) -> ChangeDetails<C> {
        ChangeDetails {
            change_uuid,
            state: self.state,
            version: self.version,
            change: self.change.clone(),
            change_result_hash: self.change_result_hash,
            creation_host: self.creation_host.clone(),
            creation_user: self.creation_user.clone(),
            creation_timestamp: self.creation_timestamp,
        }
    }
}

/// Who performed a mutation, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub host: String,
    pub user: String,
    pub timestamp: DateTime<Utc>,
}

/// A single atomic mutation of [`ServerState`].
#[derive(Debug, Clone)]
pub struct StateChange<C, T> {
    mutation: Mutation,
    mode: Option<ServerMode>,
    latest_change_uuid: Option<ChangeUuid>,
    current_version: Option<Version>,
    highest_version: Option<Version>,
    new_change: Option<(ChangeUuid, ChangeState<C, T>)>,
    change_state_update: Option<(ChangeUuid, ChangeRequestState)>,
}

impl<C, T> StateChange<C, T> {
    pub fn new(mutation: Mutation) -> Self {
        Self {
            mutation,
            mode: None,
            latest_change_uuid: None,
            current_version: None,
            highest_version: None,
            new_change: None,
            change_state_update: None,
        }
    }

    pub fn with_mode(mut self, mode: ServerMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_current_version(mut self, version: Version) -> Self {
        self.current_version = Some(version);
        self
    }

    pub fn with_highest_version(mut self, version: Version) -> Self {
        self.highest_version = Some(version);
        self
    }

    /// Appends a new change and makes it the latest one.
    pub fn create_change(mut self, change_uuid: ChangeUuid, change: ChangeState<C, T>) -> Self {
        self.latest_change_uuid = Some(change_uuid);
        self.new_change = Some((change_uuid, change));
        self
    }

    pub fn update_change_state(
        mut self,
        change_uuid: ChangeUuid,
        state: ChangeRequestState,
    ) -> Self {
        self.change_state_update = Some((change_uuid, state));
        self
    }
}

/// In-memory protocol state of one server.
#[derive(Debug, Clone)]
pub struct ServerState<C, T> {
    mode: ServerMode,
    mutative_message_count: MutativeMessageCount,
    last_mutation: Option<Mutation>,
    current_version: Version,
    highest_version: Version,
    latest_change_uuid: Option<ChangeUuid>,
    changes: HashMap<ChangeUuid, ChangeState<C, T>>,
}

impl<C, T> Default for ServerState<C, T> {
    fn default() -> Self {
        Self {
            mode: ServerMode::Accepting,
            mutative_message_count: MutativeMessageCount::default(),
            last_mutation: None,
            current_version: Version::ZERO,
            highest_version: Version::ZERO,
            latest_change_uuid: None,
            changes: HashMap::new(),
        }
    }
}

impl<C, T> ServerState<C, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn mutative_message_count(&self) -> MutativeMessageCount {
        self.mutative_message_count
    }

    pub fn current_version(&self) -> Version {
        self.current_version
    }

    pub fn highest_version(&self) -> Version {
        self.highest_version
    }

    pub fn latest_change_uuid(&self) -> Option<ChangeUuid> {
        self.latest_change_uuid
    }

    pub fn last_mutation_host(&self) -> Option<&str> {
        self.last_mutation.as_ref().map(|m| m.host.as_str())
    }

    pub fn last_mutation_user(&self) -> Option<&str> {
        self.last_mutation.as_ref().map(|m| m.user.as_str())
    }

    pub fn change_state(&self, change_uuid: &ChangeUuid) -> Option<&ChangeState<C, T>> {
        self.changes.get(change_uuid)
    }

    /// Walks back from the latest change to the newest committed one.
    pub fn latest_committed_change(&self) -> Result<Option<(ChangeUuid, &ChangeState<C, T>)>> {
        let mut cursor = self.latest_change_uuid;
        while let Some(uuid) = cursor {
            let change = self
                .changes
                .get(&uuid)
                .ok_or(ServerError::MissingChange(uuid))?;
            if change.state == ChangeRequestState::Committed {
                return Ok(Some((uuid, change)));
            }
            cursor = change.prev_change_uuid;
        }
        Ok(None)
    }

    /// Configuration produced by the newest committed change.
    pub fn current_committed_config(&self) -> Result<Option<&T>> {
        Ok(self
            .latest_committed_change()?
            .map(|(_, change)| &change.change_result))
    }

    /// Applies one mutation atomically.
    ///
    /// Fails without touching the state if the mutation refers to an
    /// unknown change.
    pub fn apply(&mut self, change: StateChange<C, T>) -> Result<()> {
        if let Some((uuid, _)) = &change.change_state_update {
            let known = self.changes.contains_key(uuid)
                || change.new_change.as_ref().is_some_and(|(new, _)| new == uuid);
            if !known {
                return Err(ServerError::MissingChange(*uuid));
            }
        }

        let count_before = self.mutative_message_count;

        if let Some(mode) = change.mode {
            self.mode = mode;
        }
        if let Some(uuid) = change.latest_change_uuid {
            self.latest_change_uuid = Some(uuid);
        }
        if let Some(version) = change.current_version {
            self.current_version = version;
        }
        if let Some(version) = change.highest_version {
            self.highest_version = self.highest_version.max(version);
        }
        if let Some((uuid, new_change)) = change.new_change {
            self.changes.insert(uuid, new_change);
        }
        if let Some((uuid, state)) = change.change_state_update {
            if let Some(existing) = self.changes.get_mut(&uuid) {
                existing.state = state;
            }
        }
        self.last_mutation = Some(change.mutation);
        self.mutative_message_count = self.mutative_message_count.next();

        // Postcondition: exactly one increment per accepted mutation
        assert_eq!(
            self.mutative_message_count,
            count_before.next(),
            "mutative message count must advance by exactly one"
        );

        Ok(())
    }
}

impl<C: Clone, T> ServerState<C, T> {
    /// Builds the response to a discover call.
    pub fn discover(&self) -> Result<DiscoverResponse<C>> {
        let latest_change = match self.latest_change_uuid {
            Some(uuid) => {
                let change = self
                    .changes
                    .get(&uuid)
                    .ok_or(ServerError::MissingChange(uuid))?;
                Some(change.details(uuid))
            }
            None => None,
        };
        let latest_committed_change = self
            .latest_committed_change()?
            .map(|(uuid, change)| change.details(uuid));

        Ok(DiscoverResponse {
            mode: self.mode,
            mutative_message_count: self.mutative_message_count,
            last_mutation_host: self.last_mutation.as_ref().map(|m| m.host.clone()),
            last_mutation_user: self.last_mutation.as_ref().map(|m| m.user.clone()),
            last_mutation_timestamp: self.last_mutation.as_ref().map(|m| m.timestamp),
            current_version: self.current_version,
            highest_version: self.highest_version,
            latest_change,
            latest_committed_change,
        })
    }
}

//! The Nomad server: fencing, validation and the prepare/commit state machine.
//!
//! ```text
//! ACCEPTING --prepare--> PREPARED --commit|rollback--> ACCEPTING
//! ```
//!
//! Takeover keeps the mode and only transfers mutation rights. All calls
//! hold the state lock for their whole duration, so one RPC is processed at
//! a time.

use async_trait::async_trait;
use nomad_types::{
    AcceptRejectResponse, ChangeRequestState, ChangeUuid, CommitMessage, ConfigHash,
    DiscoverResponse, MutativeMessageCount, NomadChange, NomadServer, NomadServerError,
    PrepareMessage, Rejection, RejectionReason, RollbackMessage, ServerMode, TakeoverMessage,
};
use tokio::sync::Mutex;

use crate::applicator::{ChangeApplicator, PotentialApplicationResult};
use crate::error::{Result, ServerError};
use crate::state::{ChangeState, Mutation, ServerState, StateChange};

/// A Nomad server backed by an in-memory change log.
pub struct NomadServerImpl<C, A: ChangeApplicator<C>> {
    state: Mutex<ServerState<C, A::Config>>,
    applicator: A,
}

impl<C: NomadChange, A: ChangeApplicator<C>> NomadServerImpl<C, A> {
    /// Creates a server that never saw any change.
    pub fn new(applicator: A) -> Self {
        Self::with_state(ServerState::new(), applicator)
    }

    /// Creates a server resuming from an existing state.
    pub fn with_state(state: ServerState<C, A::Config>, applicator: A) -> Self {
        Self {
            state: Mutex::new(state),
            applicator,
        }
    }

    pub fn applicator(&self) -> &A {
        &self.applicator
    }

    /// Returns true if a change was prepared and never committed or rolled back.
    pub async fn has_incomplete_change(&self) -> bool {
        let state = self.state.lock().await;
        state.mode() == ServerMode::Prepared
            || state
                .latest_change_uuid()
                .and_then(|uuid| state.change_state(&uuid))
                .is_some_and(|change| change.state == ChangeRequestState::Prepared)
    }

    /// Configuration in force, if any change was ever committed.
    pub async fn current_committed_config(&self) -> Result<Option<A::Config>> {
        let state = self.state.lock().await;
        Ok(state.current_committed_config()?.cloned())
    }

    /// Looks up one change of the log.
    pub async fn change_state(&self, change_uuid: &ChangeUuid) -> Option<ChangeState<C, A::Config>> {
        let state = self.state.lock().await;
        state.change_state(change_uuid).cloned()
    }

    /// Copy of the full state, for inspection.
    pub async fn snapshot(&self) -> ServerState<C, A::Config> {
        self.state.lock().await.clone()
    }
}

fn is_dead<C, T>(state: &ServerState<C, T>, expected: MutativeMessageCount) -> bool {
    state.mutative_message_count() != expected
}

fn reject<C, T>(
    state: &ServerState<C, T>,
    reason: RejectionReason,
    message: impl Into<String>,
) -> AcceptRejectResponse {
    AcceptRejectResponse::Reject(Rejection {
        reason,
        message: Some(message.into()),
        last_mutation_host: state.last_mutation_host().map(str::to_string),
        last_mutation_user: state.last_mutation_user().map(str::to_string),
    })
}

fn reject_dead<C, T>(
    state: &ServerState<C, T>,
    expected: MutativeMessageCount,
) -> AcceptRejectResponse {
    tracing::debug!(
        expected = %expected,
        actual = %state.mutative_message_count(),
        "rejecting mutation with stale fencing token"
    );
    reject(
        state,
        RejectionReason::Dead,
        format!(
            "expected mutative message count {expected}, found {}",
            state.mutative_message_count()
        ),
    )
}

fn reject_bad<C, T>(state: &ServerState<C, T>, message: String) -> AcceptRejectResponse {
    tracing::warn!(reason = %message, "rejecting bad message");
    reject(state, RejectionReason::Bad, message)
}

/// Checks that `change_uuid` names the change currently prepared.
fn check_prepared<C, T>(state: &ServerState<C, T>, change_uuid: ChangeUuid) -> Option<String> {
    if state.mode() != ServerMode::Prepared {
        return Some(format!(
            "expected mode {:?}, was {:?}",
            ServerMode::Prepared,
            state.mode()
        ));
    }
    match state.change_state(&change_uuid) {
        None => Some(format!("change {change_uuid} does not exist")),
        Some(change)
            if change.state != ChangeRequestState::Prepared
                || state.latest_change_uuid() != Some(change_uuid) =>
        {
            Some(format!("change {change_uuid} is not the prepared change"))
        }
        Some(_) => None,
    }
}

#[async_trait]
impl<C, A> NomadServer<C> for NomadServerImpl<C, A>
where
    C: NomadChange,
    A: ChangeApplicator<C>,
{
    async fn discover(&self) -> std::result::Result<DiscoverResponse<C>, NomadServerError> {
        let state = self.state.lock().await;
        Ok(state.discover()?)
    }

    async fn prepare(
        &self,
        message: PrepareMessage<C>,
    ) -> std::result::Result<AcceptRejectResponse, NomadServerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if is_dead(state, message.expected_mutative_message_count) {
            return Ok(reject_dead(state, message.expected_mutative_message_count));
        }

        if state.mode() == ServerMode::Prepared {
            tracing::debug!(
                uuid = %message.change_uuid,
                "rejecting prepare: another change is already prepared"
            );
            return Ok(reject(
                state,
                RejectionReason::Dead,
                "another change is already prepared",
            ));
        }

        if message.version <= state.highest_version() {
            let reason = format!(
                "change version {} is not above highest version {}",
                message.version,
                state.highest_version()
            );
            return Ok(reject_bad(state, reason));
        }

        if state.change_state(&message.change_uuid).is_some() {
            let reason = format!("change {} already exists", message.change_uuid);
            return Ok(reject_bad(state, reason));
        }

        let existing = state.current_committed_config()?;
        let config = match self.applicator.try_apply(existing, &message.change) {
            PotentialApplicationResult::Allow(config) => config,
            PotentialApplicationResult::Reject(reason) => {
                tracing::debug!(
                    uuid = %message.change_uuid,
                    reason = %reason,
                    "change is unacceptable"
                );
                return Ok(reject(state, RejectionReason::Unacceptable, reason));
            }
        };
        let change_result_hash = ConfigHash::of(&config).map_err(ServerError::from)?;

        let mutation = Mutation {
            host: message.mutation_host,
            user: message.mutation_user,
            timestamp: message.mutation_timestamp,
        };
        let change = ChangeState {
            state: ChangeRequestState::Prepared,
            version: message.version,
            prev_change_uuid: state.latest_change_uuid(),
            change: message.change,
            change_result: config,
            change_result_hash,
            creation_host: mutation.host.clone(),
            creation_user: mutation.user.clone(),
            creation_timestamp: mutation.timestamp,
        };

        state.apply(
            StateChange::new(mutation)
                .with_mode(ServerMode::Prepared)
                .with_highest_version(message.version)
                .create_change(message.change_uuid, change),
        )?;

        tracing::debug!(
            uuid = %message.change_uuid,
            version = %message.version,
            "change prepared"
        );
        Ok(AcceptRejectResponse::accept())
    }

    async fn commit(
        &self,
        message: CommitMessage,
    ) -> std::result::Result<AcceptRejectResponse, NomadServerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if is_dead(state, message.expected_mutative_message_count) {
            return Ok(reject_dead(state, message.expected_mutative_message_count));
        }
        if let Some(reason) = check_prepared(state, message.change_uuid) {
            return Ok(reject_bad(state, reason));
        }

        let (version, change) = match state.change_state(&message.change_uuid) {
            Some(prepared) => (prepared.version, prepared.change.clone()),
            None => return Err(ServerError::MissingChange(message.change_uuid).into()),
        };

        self.applicator
            .apply(&change)
            .map_err(|reason| ServerError::Apply {
                uuid: message.change_uuid,
                reason,
            })?;

        state.apply(
            StateChange::new(Mutation {
                host: message.mutation_host,
                user: message.mutation_user,
                timestamp: message.mutation_timestamp,
            })
            .with_mode(ServerMode::Accepting)
            .with_current_version(version)
            .update_change_state(message.change_uuid, ChangeRequestState::Committed),
        )?;

        tracing::debug!(uuid = %message.change_uuid, version = %version, "change committed");
        Ok(AcceptRejectResponse::accept())
    }

    async fn rollback(
        &self,
        message: RollbackMessage,
    ) -> std::result::Result<AcceptRejectResponse, NomadServerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if is_dead(state, message.expected_mutative_message_count) {
            return Ok(reject_dead(state, message.expected_mutative_message_count));
        }
        if let Some(reason) = check_prepared(state, message.change_uuid) {
            return Ok(reject_bad(state, reason));
        }

        state.apply(
            StateChange::new(Mutation {
                host: message.mutation_host,
                user: message.mutation_user,
                timestamp: message.mutation_timestamp,
            })
            .with_mode(ServerMode::Accepting)
            .update_change_state(message.change_uuid, ChangeRequestState::RolledBack),
        )?;

        tracing::debug!(uuid = %message.change_uuid, "change rolled back");
        Ok(AcceptRejectResponse::accept())
    }

    async fn takeover(
        &self,
        message: TakeoverMessage,
    ) -> std::result::Result<AcceptRejectResponse, NomadServerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if is_dead(state, message.expected_mutative_message_count) {
            return Ok(reject_dead(state, message.expected_mutative_message_count));
        }

        let host = message.mutation_host.clone();
        let user = message.mutation_user.clone();
        state.apply(StateChange::new(Mutation {
            host: message.mutation_host,
            user: message.mutation_user,
            timestamp: message.mutation_timestamp,
        }))?;

        tracing::debug!(host = %host, user = %user, "mutation rights taken over");
        Ok(AcceptRejectResponse::accept())
    }
}

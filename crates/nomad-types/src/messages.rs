//! Protocol messages exchanged between a Nomad client and one server.
//!
//! Every mutative message carries the fencing token the client expects the
//! server to hold (`expected_mutative_message_count`). A server rejects the
//! message as [`RejectionReason::Dead`] when the token does not match, which
//! is how concurrent clients detect each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChangeUuid, ConfigHash, MutativeMessageCount, Version};

// ============================================================================
// States
// ============================================================================

/// Mode of a server's local state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerMode {
    /// No change in flight; the server accepts a new prepare.
    Accepting,
    /// A change is prepared and waits for commit or rollback.
    Prepared,
}

/// Lifecycle state of one change on one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeRequestState {
    Prepared,
    Committed,
    RolledBack,
}

// ============================================================================
// Discovery
// ============================================================================

/// Description of one change as recorded by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDetails<C> {
    pub change_uuid: ChangeUuid,
    pub state: ChangeRequestState,
    pub version: Version,
    pub change: C,
    /// Hash of the configuration this change produces.
    pub change_result_hash: ConfigHash,
    pub creation_host: String,
    pub creation_user: String,
    pub creation_timestamp: DateTime<Utc>,
}

/// Snapshot of a server's protocol state, returned by `discover`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverResponse<C> {
    pub mode: ServerMode,
    /// Fencing token the next mutative message must carry.
    pub mutative_message_count: MutativeMessageCount,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
    pub last_mutation_timestamp: Option<DateTime<Utc>>,
    /// Version of the committed configuration currently in force.
    pub current_version: Version,
    /// Highest version this server has ever seen, prepared or not.
    pub highest_version: Version,
    pub latest_change: Option<ChangeDetails<C>>,
    pub latest_committed_change: Option<ChangeDetails<C>>,
}

impl<C> DiscoverResponse<C> {
    /// State of the most recent change, if any.
    pub fn latest_change_state(&self) -> Option<ChangeRequestState> {
        self.latest_change.as_ref().map(|c| c.state)
    }

    /// Uuid of the most recent change, if any.
    pub fn latest_change_uuid(&self) -> Option<ChangeUuid> {
        self.latest_change.as_ref().map(|c| c.change_uuid)
    }
}

// ============================================================================
// Mutative messages
// ============================================================================

/// Asks a server to validate and stage a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareMessage<C> {
    pub expected_mutative_message_count: MutativeMessageCount,
    pub mutation_host: String,
    pub mutation_user: String,
    pub mutation_timestamp: DateTime<Utc>,
    pub change_uuid: ChangeUuid,
    pub version: Version,
    pub change: C,
}

/// Asks a server to make its prepared change effective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    pub expected_mutative_message_count: MutativeMessageCount,
    pub mutation_host: String,
    pub mutation_user: String,
    pub mutation_timestamp: DateTime<Utc>,
    pub change_uuid: ChangeUuid,
}

/// Asks a server to discard its prepared change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackMessage {
    pub expected_mutative_message_count: MutativeMessageCount,
    pub mutation_host: String,
    pub mutation_user: String,
    pub mutation_timestamp: DateTime<Utc>,
    pub change_uuid: ChangeUuid,
}

/// Seizes mutation rights on a server, whoever prepared its pending change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverMessage {
    pub expected_mutative_message_count: MutativeMessageCount,
    pub mutation_host: String,
    pub mutation_user: String,
    pub mutation_timestamp: DateTime<Utc>,
}

// ============================================================================
// Responses
// ============================================================================

/// Why a server refused a mutative message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    /// The change failed local validation. Only valid for prepare.
    Unacceptable,
    /// The fencing token did not match: another client mutated the server.
    Dead,
    /// The message itself is malformed for the server's state.
    Bad,
}

/// Details of a rejected mutative message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub message: Option<String>,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
}

/// Outcome of a mutative message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptRejectResponse {
    Accept,
    Reject(Rejection),
}

impl AcceptRejectResponse {
    pub fn accept() -> Self {
        Self::Accept
    }

    /// Rejection for a change that failed validation.
    pub fn reject_unacceptable(message: impl Into<String>) -> Self {
        Self::Reject(Rejection {
            reason: RejectionReason::Unacceptable,
            message: Some(message.into()),
            last_mutation_host: None,
            last_mutation_user: None,
        })
    }

    /// Rejection naming whoever last mutated the server.
    pub fn reject_dead(
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    ) -> Self {
        Self::Reject(Rejection {
            reason: RejectionReason::Dead,
            message: None,
            last_mutation_host,
            last_mutation_user,
        })
    }

    pub fn reject_bad(message: impl Into<String>) -> Self {
        Self::Reject(Rejection {
            reason: RejectionReason::Bad,
            message: Some(message.into()),
            last_mutation_host: None,
            last_mutation_user: None,
        })
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Accept => None,
            Self::Reject(rejection) => Some(rejection),
        }
    }
}

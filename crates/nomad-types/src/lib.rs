//! # nomad-types: Shared types for the Nomad protocol
//!
//! This crate contains the contract shared by Nomad clients and servers:
//! - Addressing and identifiers ([`HostPort`], [`ChangeUuid`], [`Version`], [`MutativeMessageCount`])
//! - Content hashing of configurations ([`ConfigHash`])
//! - Protocol messages ([`DiscoverResponse`], [`PrepareMessage`], [`CommitMessage`],
//!   [`RollbackMessage`], [`TakeoverMessage`], [`AcceptRejectResponse`])
//! - The change payload abstraction ([`NomadChange`])
//! - The per-server RPC surface ([`NomadServer`])

use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod change;
mod messages;
mod server;

pub use change::{NomadChange, SimpleChange};
pub use messages::{
    AcceptRejectResponse, ChangeDetails, ChangeRequestState, CommitMessage, DiscoverResponse,
    PrepareMessage, Rejection, RejectionReason, RollbackMessage, ServerMode, TakeoverMessage,
};
pub use server::{NomadServer, NomadServerError};

#[cfg(test)]
mod tests;

// ============================================================================
// Addressing
// ============================================================================

/// Network address of one Nomad server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error returned when a `host:port` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid server address '{0}': expected host:port")]
pub struct ParseHostPortError(String);

impl FromStr for HostPort {
    type Err = ParseHostPortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseHostPortError(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseHostPortError(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseHostPortError(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

// ============================================================================
// Identifiers - All Copy
// ============================================================================

/// Unique identifier of one proposed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeUuid(Uuid);

impl ChangeUuid {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ChangeUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ChangeUuid {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<ChangeUuid> for Uuid {
    fn from(id: ChangeUuid) -> Self {
        id.0
    }
}

/// Configuration version number.
///
/// Versions are globally monotonic: a new change always gets the highest
/// version seen anywhere in the cluster plus one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(u64);

impl Version {
    /// Version of a server that never committed anything.
    pub const ZERO: Version = Version(0);

    pub fn new(version: u64) -> Self {
        Self(version)
    }

    /// The version following this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Per-server fencing token.
///
/// Increases by exactly one for every mutative message a server accepts.
/// A client must present the value it discovered to mutate the server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct MutativeMessageCount(u64);

impl MutativeMessageCount {
    pub fn new(count: u64) -> Self {
        Self(count)
    }

    /// The count after one more accepted mutation.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for MutativeMessageCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MutativeMessageCount {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Configuration hash
// ============================================================================

/// Length of a configuration hash in bytes.
pub const CONFIG_HASH_LENGTH: usize = 32;

/// Content hash of the configuration resulting from a change.
///
/// Computed with BLAKE3 over the canonical postcard encoding of the
/// configuration, so two servers holding equal configurations report equal
/// hashes regardless of how they reached them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigHash([u8; CONFIG_HASH_LENGTH]);

impl ConfigHash {
    /// Hash of the empty configuration.
    pub const EMPTY: ConfigHash = ConfigHash([0u8; CONFIG_HASH_LENGTH]);

    /// Hashes the canonical encoding of a configuration value.
    pub fn of<T: Serialize + ?Sized>(config: &T) -> Result<Self, postcard::Error> {
        let encoded = postcard::to_allocvec(config)?;
        Ok(Self::of_bytes(&encoded))
    }

    /// Hashes already-encoded configuration bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; CONFIG_HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONFIG_HASH_LENGTH] {
        &self.0
    }
}

impl Debug for ConfigHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ConfigHash({:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5], self.0[6], self.0[7]
        )
    }
}

impl Display for ConfigHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; CONFIG_HASH_LENGTH]> for ConfigHash {
    fn from(bytes: [u8; CONFIG_HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ConfigHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

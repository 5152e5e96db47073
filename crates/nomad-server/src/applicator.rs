//! Validation and application of changes against a server's configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use nomad_types::SimpleChange;
use serde::Serialize;

/// Outcome of validating a change against the committed configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PotentialApplicationResult<T> {
    /// The change is valid and would produce this configuration.
    Allow(T),
    /// The change is refused, with a reason for the operator.
    Reject(String),
}

impl<T> PotentialApplicationResult<T> {
    pub fn allow(config: T) -> Self {
        Self::Allow(config)
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject(reason.into())
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Bridges the protocol to the configuration model of a server.
///
/// `try_apply` runs during prepare and must be free of side effects;
/// `apply` runs once, on commit.
pub trait ChangeApplicator<C>: Send + Sync {
    /// The configuration a change produces.
    type Config: Clone + Serialize + Send + Sync + 'static;

    /// Computes the configuration `change` would produce on top of `existing`.
    ///
    /// `existing` is `None` before the first committed change.
    fn try_apply(
        &self,
        existing: Option<&Self::Config>,
        change: &C,
    ) -> PotentialApplicationResult<Self::Config>;

    /// Makes a committed change take effect.
    fn apply(&self, change: &C) -> Result<(), String>;
}

// ============================================================================
// Settings applicator
// ============================================================================

/// Applicator for a flat `key=value` settings map.
///
/// Each [`SimpleChange`] payload is `key=value`; an empty value removes the
/// key. Keys registered as read-only cannot be changed once set.
#[derive(Debug, Default)]
pub struct SettingsApplicator {
    read_only: BTreeSet<String>,
    applied: Mutex<Vec<SimpleChange>>,
}

impl SettingsApplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses any change to `key` after its first assignment.
    pub fn with_read_only_key(mut self, key: impl Into<String>) -> Self {
        self.read_only.insert(key.into());
        self
    }

    /// Changes applied so far, in commit order.
    pub fn applied(&self) -> Vec<SimpleChange> {
        self.applied
            .lock()
            .map(|applied| applied.clone())
            .unwrap_or_default()
    }
}

impl ChangeApplicator<SimpleChange> for SettingsApplicator {
    type Config = BTreeMap<String, String>;

    fn try_apply(
        &self,
        existing: Option<&Self::Config>,
        change: &SimpleChange,
    ) -> PotentialApplicationResult<Self::Config> {
        let Some((key, value)) = change.change.split_once('=') else {
            return PotentialApplicationResult::reject(format!(
                "malformed setting '{}': expected key=value",
                change.change
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return PotentialApplicationResult::reject("setting name must not be empty");
        }

        let mut config = existing.cloned().unwrap_or_default();
        if self.read_only.contains(key) && config.contains_key(key) {
            return PotentialApplicationResult::reject(format!("setting '{key}' is read-only"));
        }

        let value = value.trim();
        if value.is_empty() {
            config.remove(key);
        } else {
            config.insert(key.to_string(), value.to_string());
        }
        PotentialApplicationResult::allow(config)
    }

    fn apply(&self, change: &SimpleChange) -> Result<(), String> {
        let mut applied = self
            .applied
            .lock()
            .map_err(|_| "applied-change log is poisoned".to_string())?;
        applied.push(change.clone());
        Ok(())
    }
}

//! Condition management following Kubernetes API conventions
//!
//! Conditions are held in a [`ConditionSet`] keyed by condition type, so the
//! "at most one condition per type" rule is structural rather than something
//! every caller has to re-check. On the wire the set is an ordered list, as
//! the API conventions require.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Condition type used by both controllers
pub const CONDITION_TYPE_READY: &str = "Ready";
/// Approval condition types carried on SigningRequests
pub const CONDITION_TYPE_APPROVED: &str = "Approved";
pub const CONDITION_TYPE_DENIED: &str = "Denied";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => f.write_str("True"),
            ConditionStatus::False => f.write_str("False"),
            ConditionStatus::Unknown => f.write_str("Unknown"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. "Ready")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: ConditionStatus,
    /// Last time the condition status changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    /// Machine-readable reason for the last transition
    #[serde(default)]
    pub reason: String,
    /// Human-readable message complementing the reason
    #[serde(default)]
    pub message: String,
}

/// A set of conditions, at most one per type.
///
/// Serializes as a list ordered by condition type; duplicate types in the
/// input collapse to the last entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConditionSet(BTreeMap<String, Condition>);

impl ConditionSet {
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.get(type_)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }

    /// Check whether a condition of the given type is present and True
    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// Update or add a condition.
    ///
    /// A previously unseen type starts from an `Unknown` baseline, so setting
    /// it straight to `Unknown` records no transition time. The transition
    /// time is refreshed only when the status value actually changes; reason
    /// and message are always overwritten.
    ///
    /// Returns whether the condition observably changed (it was added, or its
    /// status, reason, or message differ). Callers use this to decide whether
    /// a status write and an Event are warranted.
    pub fn set(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> bool {
        let inserted = !self.0.contains_key(type_);
        let entry = self
            .0
            .entry(type_.to_string())
            .or_insert_with(|| Condition {
                type_: type_.to_string(),
                status: ConditionStatus::Unknown,
                last_transition_time: None,
                reason: String::new(),
                message: String::new(),
            });

        let changed = inserted
            || entry.status != status
            || entry.reason != reason
            || entry.message != message;

        if entry.status != status {
            entry.last_transition_time = Some(Utc::now().to_rfc3339());
        }
        entry.status = status;
        entry.reason = reason.to_string();
        entry.message = message.to_string();

        changed
    }
}

impl Serialize for ConditionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.values())
    }
}

impl<'de> Deserialize<'de> for ConditionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let list = Vec::<Condition>::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for c in list {
            map.insert(c.type_.clone(), c);
        }
        Ok(ConditionSet(map))
    }
}

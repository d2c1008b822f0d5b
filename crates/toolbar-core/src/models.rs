//! Data models
//!
//! Wire types mirror the dev-server REST payloads. `EnhancedFlag` and
//! `ToolbarSyncState` are the normalized views handed to consumers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// One possible value of a flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: Value,
}

/// Evaluated value (or persisted override) of a flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagState {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub version: u64,
}

/// Server-of-record data for one project at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    #[serde(default)]
    pub source_environment_key: String,
    /// Server-side freshness, milliseconds since the epoch
    #[serde(rename = "_lastSyncedFromSource", default)]
    pub last_synced_from_source: i64,
    #[serde(default)]
    pub available_variations: HashMap<String, Vec<Variation>>,
    #[serde(default)]
    pub flags_state: HashMap<String, FlagState>,
    #[serde(default)]
    pub overrides: HashMap<String, FlagState>,
}

/// Response to `PUT .../overrides/{flagKey}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideResponse {
    #[serde(rename = "override")]
    pub is_override: bool,
    pub value: Value,
}

/// Inferred shape of a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    Multivariate,
    String,
    Number,
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlagType::Boolean => "boolean",
            FlagType::Multivariate => "multivariate",
            FlagType::String => "string",
            FlagType::Number => "number",
        };
        f.write_str(s)
    }
}

/// A value that matched one of a multivariate flag's variations
#[derive(Debug, Clone, PartialEq)]
pub struct MultivariateVariant {
    pub id: String,
    pub name: Option<String>,
    pub value: Value,
}

/// Typed flag value
///
/// Wire values are arbitrary JSON. After inference consumers match on
/// the variant instead of inspecting the raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Boolean(bool),
    Variant(MultivariateVariant),
    String(String),
    Number(serde_json::Number),
    Json(Value),
}

impl FlagValue {
    /// Classify a raw value by its JSON shape
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(b) => FlagValue::Boolean(*b),
            Value::String(s) => FlagValue::String(s.clone()),
            Value::Number(n) => FlagValue::Number(n.clone()),
            other => FlagValue::Json(other.clone()),
        }
    }

    /// Classify a raw value in the context of its flag
    ///
    /// Multivariate flags resolve to the matching variation when there is one.
    pub fn classify(value: &Value, flag_type: FlagType, variations: &[Variation]) -> Self {
        if flag_type == FlagType::Multivariate {
            if let Some(variation) = variations.iter().find(|v| v.value == *value) {
                return FlagValue::Variant(MultivariateVariant {
                    id: variation.id.clone(),
                    name: variation.name.clone(),
                    value: variation.value.clone(),
                });
            }
        }
        Self::from_json(value)
    }

    /// The raw JSON value, as sent over the wire
    pub fn to_json(&self) -> Value {
        match self {
            FlagValue::Boolean(b) => Value::Bool(*b),
            FlagValue::Variant(v) => v.value.clone(),
            FlagValue::String(s) => Value::String(s.clone()),
            FlagValue::Number(n) => Value::Number(n.clone()),
            FlagValue::Json(v) => v.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Boolean(b) => Some(*b),
            FlagValue::Variant(v) => v.value.as_bool(),
            _ => None,
        }
    }

    /// False only for boolean `false` and JSON `null`
    pub fn is_enabled(&self) -> bool {
        !matches!(self.to_json(), Value::Bool(false) | Value::Null)
    }
}

impl Serialize for FlagValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Variant(MultivariateVariant {
                name: Some(name),
                value,
                ..
            }) => write!(f, "{} ({})", name, value),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// UI-ready view of a single flag
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedFlag {
    pub key: String,
    pub name: String,
    /// Override value if present, otherwise the evaluated value
    pub current_value: FlagValue,
    /// Evaluated value ignoring any override
    pub original_value: FlagValue,
    pub is_overridden: bool,
    pub available_variations: Vec<Variation>,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    pub source_environment: String,
    pub enabled: bool,
    pub version: u64,
}

impl EnhancedFlag {
    /// Point the flag at an override value
    pub fn apply_override(&mut self, value: &Value) {
        self.current_value = FlagValue::classify(value, self.flag_type, &self.available_variations);
        self.is_overridden = true;
        self.enabled = self.current_value.is_enabled();
    }

    /// Drop any override and fall back to the evaluated value
    pub fn revert_override(&mut self) {
        self.current_value = self.original_value.clone();
        self.is_overridden = false;
        self.enabled = self.current_value.is_enabled();
    }
}

/// Connection status shown to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Before the first sync, and after the engine stops
    #[default]
    Disconnected,
    /// Last poll succeeded
    Connected,
    /// Last poll failed
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Externally observable sync state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolbarSyncState {
    pub flags: BTreeMap<String, EnhancedFlag>,
    pub connection_status: ConnectionStatus,
    /// Wall-clock time of the last successful poll
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Server-side freshness reported by the last successful poll
    pub last_synced_from_source: Option<i64>,
    /// True only while the first fetch for the current project is outstanding
    pub is_loading: bool,
    pub error: Option<String>,
    pub current_project_key: Option<String>,
    pub available_projects: Vec<String>,
}

impl ToolbarSyncState {
    /// Keys of flags that currently carry an override
    pub fn overridden_keys(&self) -> Vec<String> {
        self.flags
            .values()
            .filter(|f| f.is_overridden)
            .map(|f| f.key.clone())
            .collect()
    }

    pub fn override_count(&self) -> usize {
        self.flags.values().filter(|f| f.is_overridden).count()
    }
}

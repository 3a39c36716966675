//! Per-instance sequence options.
//!
//! Effective options for a sequence are its recorded override laid over the
//! instance defaults, resolved fresh on every increment.

use std::fmt;
use std::sync::RwLock;

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::contracts::{ConfigError, LockResultExt, SequenceError};

pub const DEFAULT_COLLECTION: &str = "counters";
pub const DEFAULT_FIELD: &str = "_id";
pub const DEFAULT_STEP: i64 = 1;

/// Fully resolved options of one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOptions {
    /// Collection holding the counter documents.
    pub collection: String,
    /// Field the counter drives.
    pub field: String,
    /// Amount added per increment.
    pub step: i64,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.into(),
            field: DEFAULT_FIELD.into(),
            step: DEFAULT_STEP,
        }
    }
}

impl SequenceOptions {
    /// Creates options from environment variables.
    ///
    /// Environment variables:
    /// - `AUTOSEQ_COLLECTION`: counters collection (default: counters)
    /// - `AUTOSEQ_FIELD`: auto-incremented field (default: _id)
    /// - `AUTOSEQ_STEP`: increment amount, must be positive (default: 1)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            collection: std::env::var("AUTOSEQ_COLLECTION")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(default.collection),
            field: std::env::var("AUTOSEQ_FIELD")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(default.field),
            step: std::env::var("AUTOSEQ_STEP")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|step: &i64| *step > 0)
                .unwrap_or(default.step),
        }
    }
}

/// Partial options. `None` leaves the underlying value in place.
///
/// Keys other than `collection`, `field` and `step` are kept in `extra` and
/// have no effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsOverride {
    pub collection: Option<String>,
    pub field: Option<String>,
    pub step: Option<i64>,
    pub extra: Map<String, Value>,
}

impl OptionsOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Parses an options map such as `{"collection": "ids", "step": 10}`.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mut parsed = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "collection" => parsed.collection = Some(expect_string(key, value)?),
                "field" => parsed.field = Some(expect_string(key, value)?),
                "step" => {
                    parsed.step = Some(value.as_i64().ok_or_else(|| ConfigError::InvalidValue {
                        key: key.clone(),
                        reason: format!("expected an integer, got {}", value),
                    })?)
                }
                _ => {
                    tracing::debug!(key = %key, "Ignoring unrecognized sequence option");
                    parsed.extra.insert(key.clone(), value.clone());
                }
            }
        }
        parsed.validate()?;
        Ok(parsed)
    }

    /// Rejects values that would break the strict-increase invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.step {
            Some(step) if step <= 0 => Err(ConfigError::InvalidStep(step)),
            _ => Ok(()),
        }
    }

    /// Returns true if nothing is overridden.
    pub fn is_empty(&self) -> bool {
        self.collection.is_none()
            && self.field.is_none()
            && self.step.is_none()
            && self.extra.is_empty()
    }

    fn apply_to(&self, options: &mut SequenceOptions) {
        if let Some(collection) = &self.collection {
            options.collection.clone_from(collection);
        }
        if let Some(field) = &self.field {
            options.field.clone_from(field);
        }
        if let Some(step) = self.step {
            options.step = step;
        }
    }

    fn merge(&mut self, other: OptionsOverride) {
        if other.collection.is_some() {
            self.collection = other.collection;
        }
        if other.field.is_some() {
            self.field = other.field;
        }
        if other.step.is_some() {
            self.step = other.step;
        }
        self.extra.extend(other.extra);
    }
}

fn expect_string(key: &str, value: &Value) -> Result<String, ConfigError> {
    match value.as_str() {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a non-empty string, got {}", value),
        }),
    }
}

/// A recognized option name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionName {
    Collection,
    Field,
    Step,
}

/// A resolved option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Text(String),
    Integer(i64),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{}", i),
        }
    }
}

/// Instance defaults plus per-sequence overrides.
#[derive(Debug, Default)]
pub struct SequenceSettings {
    defaults: RwLock<SequenceOptions>,
    /// Unrecognized keys passed to `set_defaults`.
    default_extra: RwLock<Map<String, Value>>,
    overrides: DashMap<String, OptionsOverride>,
}

impl SequenceSettings {
    /// Creates settings with the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings with explicit defaults.
    pub fn with_defaults(defaults: SequenceOptions) -> Result<Self, SequenceError> {
        if defaults.step <= 0 {
            return Err(ConfigError::InvalidStep(defaults.step).into());
        }
        Ok(Self {
            defaults: RwLock::new(defaults),
            ..Self::default()
        })
    }

    /// Merges `options` into the instance defaults.
    pub fn set_defaults(&self, mut options: OptionsOverride) -> Result<(), SequenceError> {
        options.validate()?;
        let extra = std::mem::take(&mut options.extra);
        {
            let mut defaults = self.defaults.write().map_lock_err()?;
            options.apply_to(&mut defaults);
            tracing::debug!(
                collection = %defaults.collection,
                field = %defaults.field,
                step = defaults.step,
                "Updated sequence defaults"
            );
        }
        if !extra.is_empty() {
            self.default_extra.write().map_lock_err()?.extend(extra);
        }
        Ok(())
    }

    /// Merges a raw options map into the instance defaults.
    pub fn set_defaults_from_map(&self, map: &Map<String, Value>) -> Result<(), SequenceError> {
        self.set_defaults(OptionsOverride::from_map(map)?)
    }

    /// Returns a copy of the current defaults.
    pub fn defaults(&self) -> Result<SequenceOptions, SequenceError> {
        Ok(self.defaults.read().map_lock_err()?.clone())
    }

    /// Returns the stored value of an unrecognized default key.
    pub fn default_extra(&self, key: &str) -> Result<Option<Value>, SequenceError> {
        Ok(self.default_extra.read().map_lock_err()?.get(key).cloned())
    }

    /// Records options for one sequence, merging into any existing override.
    pub fn override_sequence(
        &self,
        sequence: &str,
        options: OptionsOverride,
    ) -> Result<(), SequenceError> {
        options.validate()?;
        self.overrides
            .entry(sequence.to_string())
            .or_default()
            .merge(options);
        Ok(())
    }

    /// Records options for a sequence only if it has none yet.
    ///
    /// Returns true if the options were recorded.
    pub fn register_if_absent(
        &self,
        sequence: &str,
        options: &OptionsOverride,
    ) -> Result<bool, SequenceError> {
        if self.overrides.contains_key(sequence) {
            return Ok(false);
        }
        options.validate()?;
        let mut inserted = false;
        self.overrides
            .entry(sequence.to_string())
            .or_insert_with(|| {
                inserted = true;
                options.clone()
            });
        Ok(inserted)
    }

    /// Drops the override of a sequence.
    pub fn clear_override(&self, sequence: &str) -> Option<OptionsOverride> {
        self.overrides.remove(sequence).map(|(_, v)| v)
    }

    /// Returns the recorded override of a sequence.
    pub fn sequence_override(&self, sequence: &str) -> Option<OptionsOverride> {
        self.overrides.get(sequence).map(|o| o.value().clone())
    }

    /// Resolves the effective options of a sequence.
    pub fn resolve(&self, sequence: &str) -> Result<SequenceOptions, SequenceError> {
        let mut options = self.defaults()?;
        if let Some(entry) = self.overrides.get(sequence) {
            entry.value().apply_to(&mut options);
        }
        Ok(options)
    }

    /// Resolves a sequence as it would be after
    /// [`SequenceSettings::register_if_absent`] with `fallback`: a recorded
    /// override wins, otherwise `fallback` is laid over the defaults.
    pub fn resolve_with(
        &self,
        sequence: &str,
        fallback: &OptionsOverride,
    ) -> Result<SequenceOptions, SequenceError> {
        let mut options = self.defaults()?;
        match self.overrides.get(sequence) {
            Some(entry) => entry.value().apply_to(&mut options),
            None => fallback.apply_to(&mut options),
        }
        Ok(options)
    }

    /// Resolves one option of a sequence.
    pub fn resolve_option(
        &self,
        sequence: &str,
        name: OptionName,
    ) -> Result<OptionValue, SequenceError> {
        let options = self.resolve(sequence)?;
        Ok(match name {
            OptionName::Collection => OptionValue::Text(options.collection),
            OptionName::Field => OptionValue::Text(options.field),
            OptionName::Step => OptionValue::Integer(options.step),
        })
    }
}

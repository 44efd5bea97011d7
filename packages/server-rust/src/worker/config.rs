//! Declarative worker and pool configuration.
//!
//! These types are read from JSON by the configuration sources and compared
//! field by field when the pool reconciles a new configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::interval::Interval;
use super::task::ConfigurationError;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Task parameters, passed verbatim to `WorkerTask::configure`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, Value>);

impl Parameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A string parameter.
    ///
    /// # Errors
    ///
    /// Fails if the parameter is present but not a string.
    pub fn get_str(&self, name: &str) -> Result<Option<&str>, ConfigurationError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(ConfigurationError::invalid_parameter(
                name,
                format!("expected a string, found {other}"),
            )),
        }
    }

    /// A boolean parameter, given either as a JSON boolean or as the strings
    /// `"true"` / `"false"` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Fails if the parameter is present but not a boolean.
    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, ConfigurationError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(other) => Err(ConfigurationError::invalid_parameter(
                name,
                format!("expected a boolean, found {other}"),
            )),
        }
    }

    /// A list of strings, given either as a JSON array of strings or as one
    /// string with comma or whitespace separated items. Empty items are dropped.
    ///
    /// # Errors
    ///
    /// Fails if the parameter is present but neither form.
    pub fn get_string_list(&self, name: &str) -> Result<Option<Vec<String>>, ConfigurationError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(
                s.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.trim().to_string()),
                    other => Err(ConfigurationError::invalid_parameter(
                        name,
                        format!("list items must be strings, found {other}"),
                    )),
                })
                .filter(|item| !matches!(item, Ok(s) if s.is_empty()))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(other) => Err(ConfigurationError::invalid_parameter(
                name,
                format!("expected a list of strings, found {other}"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerSpec
// ---------------------------------------------------------------------------

/// Declarative configuration of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// Unique name within the pool.
    pub name: String,
    /// Registry key of the task to instantiate.
    pub task: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
    /// Number of simultaneous instances. Values of 0 (or negative values in
    /// configuration files) run a single instance.
    #[serde(default = "default_concurrency", deserialize_with = "lenient_concurrency")]
    pub concurrency: u32,
    /// Delay before the first execution.
    #[serde(rename = "delayMs", default, with = "duration_ms")]
    pub delay: Duration,
    /// `None` runs the task once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_concurrency() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

fn lenient_concurrency<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(u32::try_from(raw).unwrap_or(if raw <= 0 { 1 } else { u32::MAX }).max(1))
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl WorkerSpec {
    /// An active, single-instance, run-once worker without parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            parameters: Parameters::new(),
            concurrency: 1,
            delay: Duration::ZERO,
            interval: None,
            active: true,
        }
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Number of instances to run, never less than one.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        usize::try_from(self.concurrency.max(1)).unwrap_or(usize::MAX)
    }

    /// Whether moving from `self` to `other` requires cancelling and
    /// re-creating the worker's instances.
    #[must_use]
    pub fn requires_reschedule(&self, other: &WorkerSpec) -> bool {
        self.task != other.task
            || self.active != other.active
            || self.effective_concurrency() != other.effective_concurrency()
            || self.interval != other.interval
    }
}

// ---------------------------------------------------------------------------
// PoolConfiguration
// ---------------------------------------------------------------------------

/// Configuration of a whole worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfiguration {
    pub name: String,
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
    /// Seconds between configuration change checks; 0 disables them.
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

impl PoolConfiguration {
    #[must_use]
    pub fn new(name: impl Into<String>, workers: Vec<WorkerSpec>) -> Self {
        Self {
            name: name.into(),
            workers,
            refresh_interval_secs: 0,
        }
    }

    #[must_use]
    pub fn with_refresh_interval_secs(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    /// Parse a pool configuration document.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed documents.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Number of task instances the active workers run.
    #[must_use]
    pub fn initial_instance_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.active)
            .map(WorkerSpec::effective_concurrency)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::worker::interval::TimeUnit;

    #[test]
    fn worker_spec_defaults_from_json() {
        let spec: WorkerSpec =
            serde_json::from_str(r#"{ "name": "puller", "task": "pull" }"#).unwrap();
        assert_eq!(spec, WorkerSpec::new("puller", "pull"));
        assert!(spec.active);
        assert_eq!(spec.effective_concurrency(), 1);
    }

    #[test]
    fn non_positive_concurrency_normalises_to_one() {
        for raw in ["0", "-3"] {
            let json = format!(r#"{{ "name": "w", "task": "t", "concurrency": {raw} }}"#);
            let spec: WorkerSpec = serde_json::from_str(&json).unwrap();
            assert_eq!(spec.concurrency, 1);
        }
        assert_eq!(WorkerSpec::new("w", "t").with_concurrency(0).effective_concurrency(), 1);
    }

    #[test]
    fn pool_configuration_document() {
        let config = PoolConfiguration::from_json(
            r#"{
                "name": "default",
                "refreshIntervalSecs": 60,
                "workers": [
                    {
                        "name": "pull-all",
                        "task": "pull",
                        "concurrency": 2,
                        "delayMs": 1500,
                        "interval": { "length": 10, "unit": "seconds" },
                        "parameters": { "include": false }
                    },
                    { "name": "disabled", "task": "pull", "active": false }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.refresh_interval_secs, 60);
        let pull = &config.workers[0];
        assert_eq!(pull.delay, Duration::from_millis(1500));
        assert_eq!(pull.interval, Some(Interval::new(10, TimeUnit::Seconds)));
        assert_eq!(pull.parameters.get_bool("include").unwrap(), Some(false));
        assert_eq!(config.initial_instance_count(), 2);
    }

    #[test]
    fn reschedule_needed_only_for_scheduling_fields() {
        let base = WorkerSpec::new("w", "t").with_interval(Interval::seconds(10));

        let params = base
            .clone()
            .with_parameters(Parameters::new().with("k", "v"));
        assert!(!base.requires_reschedule(&params));

        let delayed = base.clone().with_delay(Duration::from_secs(3));
        assert!(!base.requires_reschedule(&delayed));

        assert!(base.requires_reschedule(&base.clone().with_interval(Interval::seconds(5))));
        assert!(base.requires_reschedule(&base.clone().with_concurrency(2)));
        assert!(base.requires_reschedule(&base.clone().with_active(false)));
        let mut other_task = base.clone();
        other_task.task = "other".to_string();
        assert!(base.requires_reschedule(&other_task));
    }

    #[test]
    fn string_list_accepts_array_and_separated_string() {
        let params = Parameters::new()
            .with("array", json!(["a", " b ", ""]))
            .with("csv", "a, b  c,,d")
            .with("bad", json!([1, 2]));

        assert_eq!(
            params.get_string_list("array").unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            params.get_string_list("csv").unwrap(),
            Some(vec!["a", "b", "c", "d"].into_iter().map(String::from).collect())
        );
        assert!(params.get_string_list("missing").unwrap().is_none());
        assert!(matches!(
            params.get_string_list("bad"),
            Err(ConfigurationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn bool_accepts_strings() {
        let params = Parameters::new()
            .with("yes", "TRUE")
            .with("no", false)
            .with("bad", 3);
        assert_eq!(params.get_bool("yes").unwrap(), Some(true));
        assert_eq!(params.get_bool("no").unwrap(), Some(false));
        assert!(params.get_bool("bad").is_err());
        assert!(params.get_str("no").is_err());
    }
}

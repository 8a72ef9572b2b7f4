//! The `remote_write` section of the addon's `prometheus.yml`.
//!
//! The section is rendered from [`RemoteWrite`] with serde structs and
//! merged into the live configuration by replacing the whole list. Every
//! other top-level key of the live file is preserved as-is.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::desired::RemoteWrite;
use crate::error::{Error, Result};
use crate::relabel::RelabelAction;

/// Top-level key holding the remote-write targets.
pub const REMOTE_WRITE_KEY: &str = "remote_write";

/// Label every rule matches against.
const METRIC_NAME_LABEL: &str = "__name__";

/// One `remote_write` target as Prometheus reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWriteEntry {
    pub url: String,
    pub remote_timeout: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_relabel_configs: Vec<WriteRelabelConfig>,
    pub queue_config: QueueSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRelabelConfig {
    pub source_labels: Vec<String>,
    pub regex: String,
    pub action: RelabelAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSection {
    pub capacity: u32,
    pub max_shards: u32,
    pub min_shards: u32,
    pub max_samples_per_send: u32,
    pub batch_send_deadline: String,
    pub min_backoff: String,
    pub max_backoff: String,
    pub retry_on_http_429: bool,
}

impl From<&RemoteWrite> for RemoteWriteEntry {
    fn from(remote: &RemoteWrite) -> Self {
        let queue = &remote.queue;
        Self {
            url: remote.url.clone(),
            remote_timeout: format!("{}s", remote.timeout_seconds),
            write_relabel_configs: remote
                .relabel_rules
                .iter()
                .map(|rule| WriteRelabelConfig {
                    source_labels: vec![METRIC_NAME_LABEL.to_string()],
                    regex: rule.label_match.clone(),
                    action: rule.action,
                })
                .collect(),
            queue_config: QueueSection {
                capacity: queue.capacity,
                max_shards: queue.max_shards,
                min_shards: queue.min_shards,
                max_samples_per_send: queue.max_samples_per_send,
                batch_send_deadline: format!("{}ms", queue.batch_send_deadline_ms),
                min_backoff: format!("{}ms", queue.min_backoff_ms),
                max_backoff: format!("{}ms", queue.max_backoff_ms),
                retry_on_http_429: queue.retry_on_failure,
            },
        }
    }
}

/// Desired `remote_write` list. Empty when remote write is disabled.
#[must_use]
pub fn desired_entries(remote: Option<&RemoteWrite>) -> Vec<RemoteWriteEntry> {
    remote.map(RemoteWriteEntry::from).into_iter().collect()
}

fn parse_mapping(config_yaml: &str) -> Result<Mapping> {
    if config_yaml.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(config_yaml)? {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        other => Err(Error::Fatal(format!(
            "prometheus.yml is not a mapping (found {})",
            value_type(&other)
        ))),
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Replace the `remote_write` list of a Prometheus config.
///
/// `None` removes the key. The list is always replaced wholesale, so
/// applying the same patch twice yields the same document.
///
/// # Errors
///
/// Returns a fatal error if the existing config is not a YAML mapping.
pub fn patch_prometheus_config(config_yaml: &str, remote: Option<&RemoteWrite>) -> Result<String> {
    let mut mapping = parse_mapping(config_yaml)?;
    let key = Value::String(REMOTE_WRITE_KEY.to_string());

    match remote {
        Some(remote) => {
            let entries = serde_yaml::to_value(desired_entries(Some(remote)))?;
            mapping.insert(key, entries);
        }
        None => {
            mapping.remove(&key);
        }
    }

    Ok(serde_yaml::to_string(&Value::Mapping(mapping))?)
}

/// Parse the live `remote_write` list. A missing key is an empty list.
///
/// # Errors
///
/// Returns a fatal error if the config or the list does not parse.
pub fn live_entries(config_yaml: &str) -> Result<Vec<RemoteWriteEntry>> {
    let mapping = parse_mapping(config_yaml)?;
    match mapping.get(REMOTE_WRITE_KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => Ok(serde_yaml::from_value(value.clone())?),
    }
}

/// Whether the live list equals the desired one exactly.
///
/// An unparsable live config never matches.
#[must_use]
pub fn remote_write_matches(config_yaml: &str, remote: Option<&RemoteWrite>) -> bool {
    live_entries(config_yaml).is_ok_and(|live| live == desired_entries(remote))
}

/// Whether two configs agree on every top-level key except `remote_write`.
///
/// An unparsable config never matches.
#[must_use]
pub fn matches_apart_from_remote_write(config_yaml: &str, base_yaml: &str) -> bool {
    let strip = |yaml: &str| {
        parse_mapping(yaml).map(|mut mapping| {
            mapping.remove(REMOTE_WRITE_KEY);
            mapping
        })
    };
    match (strip(config_yaml), strip(base_yaml)) {
        (Ok(live), Ok(base)) => live == base,
        _ => false,
    }
}

/// Differences between the live and desired lists, for reports.
#[must_use]
pub fn describe_mismatch(config_yaml: &str, remote: Option<&RemoteWrite>) -> Vec<String> {
    let live = match live_entries(config_yaml) {
        Ok(live) => live,
        Err(e) => return vec![format!("live prometheus.yml does not parse: {e}")],
    };
    let desired = desired_entries(remote);

    let mut problems = Vec::new();
    if live.len() != desired.len() {
        problems.push(format!(
            "remote_write has {} target(s), expected {}",
            live.len(),
            desired.len()
        ));
    }
    for (live, desired) in live.iter().zip(&desired) {
        if live.url != desired.url {
            problems.push(format!(
                "remote_write url is {}, expected {}",
                live.url, desired.url
            ));
        }
        if live.write_relabel_configs != desired.write_relabel_configs {
            problems.push("write_relabel_configs differ".to_string());
        }
        if live.queue_config != desired.queue_config || live.remote_timeout != desired.remote_timeout
        {
            problems.push("queue_config or remote_timeout differ".to_string());
        }
    }
    problems
}

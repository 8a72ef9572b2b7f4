//! Desired state of the mesh observability stack.
//!
//! A [`DesiredStateSpec`] is built once per invocation from the settings
//! file and CLI flags, validated, and then passed by reference through the
//! whole reconciliation. Nothing here is mutated after validation.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::relabel::{RelabelChain, RelabelRule};

/// Default namespace for the mesh control plane and the addon.
pub const DEFAULT_NAMESPACE: &str = "istio-system";

/// Default sink: the remote-write receiver running on the host of a local
/// (kind / Docker Desktop) cluster.
pub const DEFAULT_REMOTE_WRITE_URL: &str = "http://host.docker.internal:5000/receive";

/// Istio installation profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MeshProfile {
    /// Control plane only.
    Minimal,
    /// Control plane and ingress gateway.
    Default,
    /// Everything, tuned for evaluation clusters.
    #[default]
    Demo,
}

impl fmt::Display for MeshProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minimal => write!(f, "minimal"),
            Self::Default => write!(f, "default"),
            Self::Demo => write!(f, "demo"),
        }
    }
}

impl std::str::FromStr for MeshProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "default" => Ok(Self::Default),
            "demo" => Ok(Self::Demo),
            _ => Err(Error::InvalidSpec(format!(
                "unknown mesh profile: {s}. Supported: minimal, default, demo"
            ))),
        }
    }
}

/// Whether the addon service is reachable from outside the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Exposure {
    #[default]
    None,
    LoadBalancer,
}

impl fmt::Display for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::LoadBalancer => write!(f, "loadBalancer"),
        }
    }
}

/// Remote-write queue tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: u32,
    pub max_shards: u32,
    pub min_shards: u32,
    pub max_samples_per_send: u32,
    pub batch_send_deadline_ms: u64,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Retry batches rejected with HTTP 429.
    pub retry_on_failure: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_shards: 50,
            min_shards: 1,
            max_samples_per_send: 2_000,
            batch_send_deadline_ms: 5_000,
            min_backoff_ms: 30,
            max_backoff_ms: 5_000,
            retry_on_failure: true,
        }
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<()> {
        let counts = [
            ("capacity", u64::from(self.capacity)),
            ("max_shards", u64::from(self.max_shards)),
            ("min_shards", u64::from(self.min_shards)),
            ("max_samples_per_send", u64::from(self.max_samples_per_send)),
            ("batch_send_deadline_ms", self.batch_send_deadline_ms),
            ("min_backoff_ms", self.min_backoff_ms),
            ("max_backoff_ms", self.max_backoff_ms),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidSpec(format!(
                "queue_config.{name} must be greater than zero"
            )));
        }
        if self.min_shards > self.max_shards {
            return Err(Error::InvalidSpec(format!(
                "queue_config.min_shards ({}) exceeds max_shards ({})",
                self.min_shards, self.max_shards
            )));
        }
        if self.min_backoff_ms > self.max_backoff_ms {
            return Err(Error::InvalidSpec(format!(
                "queue_config.min_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.min_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Remote-write target configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteWrite {
    pub url: String,
    pub timeout_seconds: u64,
    pub relabel_rules: Vec<RelabelRule>,
    #[serde(rename = "queue_config")]
    pub queue: QueueConfig,
}

impl Default for RemoteWrite {
    fn default() -> Self {
        Self {
            url: DEFAULT_REMOTE_WRITE_URL.to_string(),
            timeout_seconds: 30,
            relabel_rules: vec![
                RelabelRule::keep("istio_.*|envoy_.*"),
                RelabelRule::drop(".*_debug.*"),
            ],
            queue: QueueConfig::default(),
        }
    }
}

impl RemoteWrite {
    fn validate(&self) -> Result<()> {
        validate_remote_write_url(&self.url)?;
        if self.timeout_seconds == 0 {
            return Err(Error::InvalidSpec(
                "remote_write.timeout_seconds must be greater than zero".into(),
            ));
        }
        RelabelChain::new(&self.relabel_rules)?;
        self.queue.validate()
    }
}

/// Persistent storage for the addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    pub class_name: String,
    pub size_bytes: u64,
}

/// Container resource requests and limits (Kubernetes quantities).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourceLimits {
    pub request_cpu: Option<String>,
    pub request_mem: Option<String>,
    pub limit_cpu: Option<String>,
    pub limit_mem: Option<String>,
}

impl ResourceLimits {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.request_cpu.is_none()
            && self.request_mem.is_none()
            && self.limit_cpu.is_none()
            && self.limit_mem.is_none()
    }
}

/// Declarative target for one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredStateSpec {
    pub mesh_profile: MeshProfile,
    pub namespace: String,
    /// `None` disables remote write.
    pub remote_write: Option<RemoteWrite>,
    pub storage: Option<Storage>,
    pub resource_limits: ResourceLimits,
    pub exposure: Exposure,
}

impl Default for DesiredStateSpec {
    fn default() -> Self {
        Self {
            mesh_profile: MeshProfile::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            remote_write: Some(RemoteWrite::default()),
            storage: None,
            resource_limits: ResourceLimits::default(),
            exposure: Exposure::default(),
        }
    }
}

impl DesiredStateSpec {
    /// Check every invariant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        validate_dns_label(&self.namespace)?;
        if let Some(remote) = &self.remote_write {
            remote.validate()?;
        }
        if let Some(storage) = &self.storage {
            if storage.class_name.trim().is_empty() {
                return Err(Error::InvalidSpec("storage.class_name is empty".into()));
            }
            if storage.size_bytes == 0 {
                return Err(Error::InvalidSpec(
                    "storage.size_bytes must be greater than zero".into(),
                ));
            }
        }
        let limits = &self.resource_limits;
        for (name, value) in [
            ("request_cpu", &limits.request_cpu),
            ("request_mem", &limits.request_mem),
            ("limit_cpu", &limits.limit_cpu),
            ("limit_mem", &limits.limit_mem),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(Error::InvalidSpec(format!("resource_limits.{name} is empty")));
            }
        }
        Ok(())
    }

    /// Copy of this state with the remote-write URL replaced.
    ///
    /// Remote write is enabled with default tuning if it was disabled.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when `url` is missing and an
    /// [`Error::InvalidSpec`] when it is not an absolute URI.
    pub fn with_remote_write_url(&self, url: Option<&str>) -> Result<Self> {
        let url = url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Fatal("missing remote-write backend URL".into()))?;
        validate_remote_write_url(url)?;

        let mut next = self.clone();
        let remote = next.remote_write.get_or_insert_with(RemoteWrite::default);
        remote.url = url.to_string();
        Ok(next)
    }
}

fn validate_remote_write_url(raw: &str) -> Result<()> {
    let parsed = Url::parse(raw)
        .map_err(|e| Error::InvalidSpec(format!("remote-write URL '{raw}' is not absolute: {e}")))?;
    if !parsed.has_host() {
        return Err(Error::InvalidSpec(format!(
            "remote-write URL '{raw}' has no host"
        )));
    }
    Ok(())
}

/// DNS-1123 label pattern; length is checked separately.
const DNS_LABEL_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

/// DNS-1123 label: lowercase alphanumerics and '-', alphanumeric at both
/// ends, at most 63 characters.
pub fn validate_dns_label(name: &str) -> Result<()> {
    let pattern = Regex::new(DNS_LABEL_PATTERN)
        .map_err(|e| Error::Fatal(format!("invalid DNS label pattern: {e}")))?;
    if name.len() > 63 || !pattern.is_match(name) {
        return Err(Error::InvalidSpec(format!(
            "namespace '{name}' is not a valid DNS-1123 label"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let desired = DesiredStateSpec::default();
        desired.validate().unwrap();
        assert_eq!(desired.namespace, "istio-system");
        assert_eq!(desired.mesh_profile, MeshProfile::Demo);
        assert_eq!(desired.exposure, Exposure::None);
    }

    #[test]
    fn test_namespace_validation() {
        for bad in ["", "Istio", "-mesh", "mesh-", "mesh_obs", &"a".repeat(64)] {
            assert!(validate_dns_label(bad).is_err(), "{bad} should be rejected");
        }
        for good in ["a", "istio-system", "obs1", &"a".repeat(63)] {
            assert!(validate_dns_label(good).is_ok(), "{good} should be accepted");
        }
    }

    #[test]
    fn test_remote_write_url_must_be_absolute() {
        let mut desired = DesiredStateSpec::default();
        desired.remote_write.as_mut().unwrap().url = "/receive".into();
        assert!(desired.validate().is_err());

        desired.remote_write.as_mut().unwrap().url = "http://sink:8000/receive".into();
        desired.validate().unwrap();
    }

    #[test]
    fn test_remote_write_disabled_skips_url_check() {
        let desired = DesiredStateSpec {
            remote_write: None,
            ..Default::default()
        };
        desired.validate().unwrap();
    }

    #[test]
    fn test_queue_invariants() {
        let mut desired = DesiredStateSpec::default();
        let queue = &mut desired.remote_write.as_mut().unwrap().queue;
        queue.min_shards = 10;
        queue.max_shards = 5;
        let err = desired.validate().unwrap_err();
        assert!(err.to_string().contains("min_shards"));

        let mut desired = DesiredStateSpec::default();
        desired.remote_write.as_mut().unwrap().queue.capacity = 0;
        let err = desired.validate().unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_storage_invariants() {
        let desired = DesiredStateSpec {
            storage: Some(Storage {
                class_name: "standard".into(),
                size_bytes: 0,
            }),
            ..Default::default()
        };
        assert!(desired.validate().is_err());
    }

    #[test]
    fn test_with_remote_write_url() {
        let desired = DesiredStateSpec {
            remote_write: None,
            ..Default::default()
        };
        let next = desired
            .with_remote_write_url(Some("http://sink.example:8000/receive"))
            .unwrap();
        assert_eq!(
            next.remote_write.unwrap().url,
            "http://sink.example:8000/receive"
        );

        let err = desired.with_remote_write_url(None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
        assert!(desired.with_remote_write_url(Some("  ")).is_err());
        assert!(desired.with_remote_write_url(Some("not a url")).is_err());
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("Minimal".parse::<MeshProfile>().unwrap(), MeshProfile::Minimal);
        assert_eq!("demo".parse::<MeshProfile>().unwrap(), MeshProfile::Demo);
        assert!("ambient".parse::<MeshProfile>().is_err());
    }

    #[test]
    fn test_yaml_round_trip_uses_snake_case() {
        let yaml = r"
mesh_profile: minimal
namespace: observability
exposure: loadBalancer
remote_write:
  url: http://sink:8000/receive
  queue_config:
    max_shards: 10
";
        let desired: DesiredStateSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desired.mesh_profile, MeshProfile::Minimal);
        assert_eq!(desired.exposure, Exposure::LoadBalancer);
        let remote = desired.remote_write.unwrap();
        assert_eq!(remote.queue.max_shards, 10);
        assert_eq!(remote.queue.min_shards, 1);
        assert_eq!(remote.timeout_seconds, 30);
    }
}

//! Cluster access.
//!
//! [`ClusterClient`] is the only seam between the reconciler and the
//! outside world. [`kube::KubeClusterClient`] talks to a real API server
//! and the mesh installer; [`memory::InMemoryCluster`] is a complete
//! in-process cluster for tests.

pub mod kube;
pub mod memory;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Pod, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use ::kube::api::DynamicObject;
use ::kube::discovery::ApiResource;
use serde_json::Value;
use tokio::time::Instant;

use crate::desired::MeshProfile;
use crate::error::{Error, Result};
use crate::wait::WaitPolicy;

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "meshobs";

/// Kubernetes object kinds the reconciler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Namespace,
    ServiceAccount,
    ConfigMap,
    Service,
    Deployment,
    Pod,
    PersistentVolumeClaim,
    ClusterRole,
    ClusterRoleBinding,
}

impl Kind {
    /// API resource descriptor for the dynamic API.
    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        match self {
            Self::Namespace => ApiResource::erase::<Namespace>(&()),
            Self::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
            Self::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            Self::Service => ApiResource::erase::<Service>(&()),
            Self::Deployment => ApiResource::erase::<Deployment>(&()),
            Self::Pod => ApiResource::erase::<Pod>(&()),
            Self::PersistentVolumeClaim => ApiResource::erase::<PersistentVolumeClaim>(&()),
            Self::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
            Self::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
        }
    }

    #[must_use]
    pub fn namespaced(self) -> bool {
        !matches!(
            self,
            Self::Namespace | Self::ClusterRole | Self::ClusterRoleBinding
        )
    }

    /// Kind of a manifest, from its `kind` field.
    ///
    /// # Errors
    ///
    /// Returns a fatal error for manifests without type information or of
    /// a kind this tool does not manage.
    pub fn of(manifest: &DynamicObject) -> Result<Self> {
        let types = manifest.types.as_ref().ok_or_else(|| {
            Error::Fatal(format!(
                "manifest {} has no apiVersion/kind",
                manifest.metadata.name.as_deref().unwrap_or("<unnamed>")
            ))
        })?;
        types.kind.parse()
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Namespace => "Namespace",
            Self::ServiceAccount => "ServiceAccount",
            Self::ConfigMap => "ConfigMap",
            Self::Service => "Service",
            Self::Deployment => "Deployment",
            Self::Pod => "Pod",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Namespace" => Ok(Self::Namespace),
            "ServiceAccount" => Ok(Self::ServiceAccount),
            "ConfigMap" => Ok(Self::ConfigMap),
            "Service" => Ok(Self::Service),
            "Deployment" => Ok(Self::Deployment),
            "Pod" => Ok(Self::Pod),
            "PersistentVolumeClaim" => Ok(Self::PersistentVolumeClaim),
            "ClusterRole" => Ok(Self::ClusterRole),
            "ClusterRoleBinding" => Ok(Self::ClusterRoleBinding),
            _ => Err(Error::Fatal(format!("unsupported kind: {s}"))),
        }
    }
}

/// Readiness conditions the reconciler waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Deployment reports the `Available` condition.
    Available,
    /// Deployment has observed its latest generation and every replica is
    /// updated and available.
    RolledOut,
    /// At least one pod matches and every matching pod is Running and Ready.
    PodsReady,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "availability"),
            Self::RolledOut => write!(f, "rollout"),
            Self::PodsReady => write!(f, "pod readiness"),
        }
    }
}

impl Condition {
    /// Evaluate the condition over the objects selected for it.
    ///
    /// An empty selection never satisfies a condition.
    #[must_use]
    pub fn holds(self, objects: &[DynamicObject]) -> bool {
        !objects.is_empty()
            && objects.iter().all(|object| match self {
                Self::Available => deployment_available(object),
                Self::RolledOut => deployment_rolled_out(object),
                Self::PodsReady => pod_ready(object),
            })
    }
}

fn status_i64(object: &DynamicObject, field: &str) -> i64 {
    object
        .data
        .get("status")
        .and_then(|s| s.get(field))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

fn has_true_condition(status: Option<&Value>, condition_type: &str) -> bool {
    status
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some(condition_type)
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
}

fn deployment_available(object: &DynamicObject) -> bool {
    has_true_condition(object.data.get("status"), "Available")
}

fn deployment_rolled_out(object: &DynamicObject) -> bool {
    let desired = object
        .data
        .get("spec")
        .and_then(|s| s.get("replicas"))
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let generation = object.metadata.generation.unwrap_or(0);

    status_i64(object, "observedGeneration") >= generation
        && status_i64(object, "updatedReplicas") >= desired
        && status_i64(object, "availableReplicas") >= desired
        && status_i64(object, "replicas") <= desired
}

fn pod_ready(object: &DynamicObject) -> bool {
    let status = object.data.get("status");
    status.and_then(|s| s.get("phase")).and_then(Value::as_str) == Some("Running")
        && has_true_condition(status, "Ready")
}

/// Access to a Kubernetes cluster and the mesh installer.
///
/// Errors are classified by [`crate::error::ErrorKind`]: a missing object is
/// `NotFound`, a retryable failure `Transient`, anything else `Fatal`.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// API server version, proving the cluster is reachable and the
    /// credentials are accepted.
    async fn cluster_info(&self) -> Result<String>;

    /// Version of the mesh installer, proving it is present.
    async fn mesh_installer(&self) -> Result<String>;

    async fn get(&self, kind: Kind, name: &str, namespace: Option<&str>) -> Result<DynamicObject>;

    /// List objects matching an equality label selector (`a=b,c=d`).
    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<DynamicObject>>;

    /// Server-side apply. Applying an identical manifest changes nothing.
    async fn apply(&self, manifest: &DynamicObject) -> Result<DynamicObject>;

    /// JSON merge patch (RFC 7386).
    async fn patch(
        &self,
        kind: Kind,
        name: &str,
        namespace: Option<&str>,
        patch: &Value,
    ) -> Result<DynamicObject>;

    /// Delete an object. Returns whether it existed.
    async fn delete(&self, kind: Kind, name: &str, namespace: Option<&str>) -> Result<bool>;

    /// Recent log lines of every pod matching the selector.
    async fn logs(
        &self,
        namespace: &str,
        selector: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> Result<String>;

    async fn install_mesh(&self, profile: MeshProfile, overlay_file: &Path) -> Result<()>;

    async fn uninstall_mesh(&self, purge: bool) -> Result<()>;

    /// Evaluate a readiness condition once.
    async fn check_condition(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &str,
        condition: Condition,
    ) -> Result<bool> {
        let objects = self.list(kind, Some(namespace), selector).await?;
        Ok(condition.holds(&objects))
    }

    /// Poll a readiness condition with the given policy.
    async fn wait_for_condition(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &str,
        condition: Condition,
        policy: &WaitPolicy,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let what = format!("{condition} of {kind} {selector} in {namespace}");
        policy
            .poll_until(&what, deadline, || {
                self.check_condition(kind, namespace, selector, condition)
            })
            .await
    }
}

/// Parse an equality label selector into pairs.
///
/// # Errors
///
/// Returns a fatal error for set-based or malformed terms.
pub fn parse_selector(selector: &str) -> Result<Vec<(String, String)>> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            let (key, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| Error::Fatal(format!("unsupported label selector term: {term}")))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            Kind::Namespace,
            Kind::ConfigMap,
            Kind::Deployment,
            Kind::ClusterRoleBinding,
            Kind::PersistentVolumeClaim,
        ] {
            assert_eq!(kind.to_string().parse::<Kind>().unwrap(), kind);
        }
        assert!("Ingress".parse::<Kind>().is_err());
    }

    #[test]
    fn test_api_resources() {
        let deployment = Kind::Deployment.api_resource();
        assert_eq!(deployment.api_version, "apps/v1");
        assert_eq!(deployment.plural, "deployments");
        assert!(!Kind::ClusterRole.namespaced());
        assert!(Kind::ConfigMap.namespaced());
    }

    #[test]
    fn test_kind_of_manifest() {
        let manifest = object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "prometheus"}
        }));
        assert_eq!(Kind::of(&manifest).unwrap(), Kind::ConfigMap);
    }

    #[test]
    fn test_rolled_out() {
        let ready = object(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "prometheus", "generation": 2},
            "spec": {"replicas": 1},
            "status": {"observedGeneration": 2, "replicas": 1, "updatedReplicas": 1, "availableReplicas": 1}
        }));
        assert!(Condition::RolledOut.holds(&[ready]));

        let stale = object(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "prometheus", "generation": 3},
            "spec": {"replicas": 1},
            "status": {"observedGeneration": 2, "replicas": 1, "updatedReplicas": 1, "availableReplicas": 1}
        }));
        assert!(!Condition::RolledOut.holds(&[stale]));
        assert!(!Condition::RolledOut.holds(&[]));
    }

    #[test]
    fn test_pods_ready() {
        let ready = object(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p1"},
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
        }));
        let pending = object(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p2"},
            "status": {"phase": "Pending"}
        }));
        assert!(Condition::PodsReady.holds(&[ready.clone()]));
        assert!(!Condition::PodsReady.holds(&[ready, pending]));
    }

    #[test]
    fn test_parse_selector() {
        assert_eq!(
            parse_selector("app=istiod, istio==pilot").unwrap(),
            vec![
                ("app".to_string(), "istiod".to_string()),
                ("istio".to_string(), "pilot".to_string())
            ]
        );
        assert!(parse_selector("").unwrap().is_empty());
        assert!(parse_selector("app in (a,b)").is_err());
    }
}

//! In-process cluster used by tests and dry runs.
//!
//! Objects live in a map keyed by kind, namespace and name. Deployments get
//! a synthesized status and Ready pods on every write unless stalled, the
//! mesh installer creates an `istiod` Deployment, and faults can be injected
//! per operation and kind.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::{json, Value};

use super::{parse_selector, ClusterClient, Kind};
use crate::desired::MeshProfile;
use crate::error::{Error, Result};

/// Label and selector of the mesh control plane Deployment.
pub const MESH_LABEL: (&str, &str) = ("app", "istiod");

/// Cluster operations, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    ClusterInfo,
    Get,
    List,
    Apply,
    Patch,
    Delete,
    Logs,
    InstallMesh,
    UninstallMesh,
}

impl Op {
    fn mutates(self) -> bool {
        matches!(
            self,
            Self::Apply | Self::Patch | Self::Delete | Self::InstallMesh | Self::UninstallMesh
        )
    }
}

/// Error produced by an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Fatal,
}

/// A scripted failure.
#[derive(Debug, Clone)]
pub struct Fault {
    pub op: Op,
    /// Restrict the fault to one kind. `None` matches every kind.
    pub kind: Option<Kind>,
    /// Remaining failures. `None` fails forever.
    pub remaining: Option<u32>,
    pub error: FaultKind,
}

impl Fault {
    #[must_use]
    pub fn transient(op: Op, kind: Option<Kind>, times: u32) -> Self {
        Self {
            op,
            kind,
            remaining: Some(times),
            error: FaultKind::Transient,
        }
    }

    #[must_use]
    pub fn always(op: Op, kind: Option<Kind>, error: FaultKind) -> Self {
        Self {
            op,
            kind,
            remaining: None,
            error,
        }
    }
}

/// Key of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: Kind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    fn new(kind: Kind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.filter(|_| kind.namespaced()).map(str::to_string),
            name: name.to_string(),
        }
    }
}

#[derive(Debug)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    faults: Vec<Fault>,
    stalled: Vec<String>,
    reachable: bool,
    installer: Option<String>,
    logs: BTreeMap<(String, String), String>,
    calls: BTreeMap<Op, u32>,
    resource_version: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            faults: Vec::new(),
            stalled: Vec::new(),
            reachable: true,
            installer: Some("1.24.0".to_string()),
            logs: BTreeMap::new(),
            calls: BTreeMap::new(),
            resource_version: 0,
        }
    }
}

/// In-memory [`ClusterClient`]. Clones share the same cluster.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<State>>,
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked mid-call.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Script a failure.
    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    /// Drop every scripted failure.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Keep the named Deployment from ever becoming ready.
    pub fn stall(&self, deployment: &str) {
        let mut state = self.lock();
        state.stalled.push(deployment.to_string());
        let keys: Vec<ObjectKey> = state
            .objects
            .keys()
            .filter(|k| k.kind == Kind::Deployment && k.name == deployment)
            .cloned()
            .collect();
        for key in keys {
            state.reconcile_deployment(&key);
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Simulate presence or absence of the mesh installer.
    pub fn set_installer(&self, version: Option<&str>) {
        self.lock().installer = version.map(str::to_string);
    }

    /// Log text returned for pods selected by `selector` in `namespace`.
    pub fn set_logs(&self, namespace: &str, selector: &str, text: &str) {
        self.lock()
            .logs
            .insert((namespace.to_string(), selector.to_string()), text.to_string());
    }

    /// Number of calls made for an operation, failed ones included.
    #[must_use]
    pub fn calls(&self, op: Op) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of mutating calls made so far.
    #[must_use]
    pub fn mutations(&self) -> u32 {
        self.lock()
            .calls
            .iter()
            .filter(|(op, _)| op.mutates())
            .map(|(_, count)| count)
            .sum()
    }

    /// Copy of every stored object.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<ObjectKey, Value> {
        self.lock().objects.clone()
    }

    #[must_use]
    pub fn contains(&self, kind: Kind, name: &str, namespace: Option<&str>) -> bool {
        self.lock()
            .objects
            .contains_key(&ObjectKey::new(kind, namespace, name))
    }

    /// Insert or replace an object directly, bypassing faults and counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the object has no kind or name.
    pub fn seed(&self, object: &DynamicObject) -> Result<()> {
        let kind = Kind::of(object)?;
        let name = object_name(object)?;
        let key = ObjectKey::new(kind, object.metadata.namespace.as_deref(), name);
        let mut state = self.lock();
        state.store(key, serde_json::to_value(object)?);
        Ok(())
    }

    fn enter(&self, op: Op, kind: Option<Kind>) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        state.take_fault(op, kind)?;
        Ok(state)
    }
}

fn object_name(object: &DynamicObject) -> Result<&str> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::Fatal("object has no metadata.name".into()))
}

fn to_object(value: &Value) -> Result<DynamicObject> {
    Ok(serde_json::from_value(value.clone())?)
}

fn labels_match(value: &Value, selector: &[(String, String)]) -> bool {
    let labels = value.pointer("/metadata/labels");
    selector.iter().all(|(key, expected)| {
        labels
            .and_then(|l| l.get(key))
            .and_then(Value::as_str)
            == Some(expected.as_str())
    })
}

/// RFC 7386 JSON merge patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

impl State {
    fn take_fault(&mut self, op: Op, kind: Option<Kind>) -> Result<()> {
        let Some(fault) = self.faults.iter_mut().find(|f| {
            f.op == op
                && (f.kind.is_none() || f.kind == kind)
                && f.remaining != Some(0)
        }) else {
            return Ok(());
        };
        if let Some(n) = fault.remaining.as_mut() {
            *n -= 1;
        }
        let target = kind.map_or_else(String::new, |k| format!(" on {k}"));
        match fault.error {
            FaultKind::Transient => Err(Error::Transient(format!(
                "injected transient failure of {op:?}{target}"
            ))),
            FaultKind::Fatal => Err(Error::Fatal(format!(
                "injected fatal failure of {op:?}{target}"
            ))),
        }
    }

    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn namespace_exists(&self, namespace: &str) -> bool {
        self.objects
            .contains_key(&ObjectKey::new(Kind::Namespace, None, namespace))
    }

    /// Store a new revision of an object, maintaining generation and
    /// resourceVersion and reconciling Deployments.
    fn store(&mut self, key: ObjectKey, mut value: Value) {
        let previous = self.objects.get(&key);
        let spec_changed = previous.map(|p| p.get("spec")) != Some(value.get("spec"));
        let generation = previous
            .and_then(|p| p.pointer("/metadata/generation"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let generation = if spec_changed { generation + 1 } else { generation };

        if previous.is_some_and(|p| *p == value) {
            return;
        }

        let version = self.next_version();
        if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert("resourceVersion".into(), json!(version));
            meta.insert("generation".into(), json!(generation));
            if let Some(ns) = &key.namespace {
                meta.insert("namespace".into(), json!(ns));
            }
        }
        if key.kind == Kind::Service {
            synthesize_service_status(&mut value);
        }

        self.objects.insert(key.clone(), value);
        if key.kind == Kind::Deployment {
            self.reconcile_deployment(&key);
        }
    }

    /// Set Deployment status and replace its pods for the current generation.
    fn reconcile_deployment(&mut self, key: &ObjectKey) {
        let stalled = self.stalled.contains(&key.name);
        let Some(deployment) = self.objects.get_mut(key) else {
            return;
        };

        let generation = deployment
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let replicas = deployment
            .pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let template_labels = deployment
            .pointer("/spec/template/metadata/labels")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let ready = if stalled { 0 } else { replicas };
        let available = if stalled { "False" } else { "True" };
        deployment["status"] = json!({
            "observedGeneration": generation,
            "replicas": replicas,
            "updatedReplicas": ready,
            "readyReplicas": ready,
            "availableReplicas": ready,
            "conditions": [{"type": "Available", "status": available}],
        });

        let owner = key.name.clone();
        self.objects.retain(|k, v| {
            !(k.kind == Kind::Pod
                && k.namespace == key.namespace
                && v.pointer("/metadata/ownerReferences/0/name").and_then(Value::as_str)
                    == Some(owner.as_str()))
        });

        for index in 0..replicas {
            let name = format!("{owner}-{generation}-{index}");
            let (phase, ready) = if stalled {
                ("Pending", "False")
            } else {
                ("Running", "True")
            };
            let pod = json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "name": name,
                    "namespace": key.namespace,
                    "labels": template_labels,
                    "ownerReferences": [{
                        "apiVersion": "apps/v1",
                        "kind": "Deployment",
                        "name": owner,
                        "uid": "",
                    }],
                },
                "status": {
                    "phase": phase,
                    "conditions": [{"type": "Ready", "status": ready}],
                },
            });
            self.objects
                .insert(ObjectKey::new(Kind::Pod, key.namespace.as_deref(), &name), pod);
        }
    }

    fn remove(&mut self, key: &ObjectKey) -> bool {
        let existed = self.objects.remove(key).is_some();
        match key.kind {
            Kind::Namespace => {
                self.objects
                    .retain(|k, _| k.namespace.as_deref() != Some(key.name.as_str()));
            }
            Kind::Deployment => {
                self.objects.retain(|k, v| {
                    !(k.kind == Kind::Pod
                        && k.namespace == key.namespace
                        && v.pointer("/metadata/ownerReferences/0/name")
                            .and_then(Value::as_str)
                            == Some(key.name.as_str()))
                });
            }
            _ => {}
        }
        existed
    }
}

fn synthesize_service_status(service: &mut Value) {
    let is_lb = service.pointer("/spec/type").and_then(Value::as_str) == Some("LoadBalancer");
    if is_lb {
        service["status"] = json!({"loadBalancer": {"ingress": [{"ip": "172.18.255.200"}]}});
    } else if let Some(map) = service.as_object_mut() {
        map.remove("status");
    }
}

/// Namespace the installer overlay targets.
fn overlay_namespace(overlay: &str) -> Result<String> {
    let value: serde_yaml::Value = serde_yaml::from_str(overlay)?;
    Ok(value
        .get("spec")
        .and_then(|s| s.get("values"))
        .and_then(|v| v.get("global"))
        .and_then(|g| g.get("istioNamespace"))
        .and_then(serde_yaml::Value::as_str)
        .unwrap_or(crate::desired::DEFAULT_NAMESPACE)
        .to_string())
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn cluster_info(&self) -> Result<String> {
        let state = self.enter(Op::ClusterInfo, None)?;
        if state.reachable {
            Ok("Kubernetes v1.31.0 (in-memory)".to_string())
        } else {
            Err(Error::Transient("dial tcp 127.0.0.1:6443: connection refused".into()))
        }
    }

    async fn mesh_installer(&self) -> Result<String> {
        self.lock()
            .installer
            .clone()
            .ok_or_else(|| Error::Fatal("istioctl not found in PATH".into()))
    }

    async fn get(&self, kind: Kind, name: &str, namespace: Option<&str>) -> Result<DynamicObject> {
        let state = self.enter(Op::Get, Some(kind))?;
        state
            .objects
            .get(&ObjectKey::new(kind, namespace, name))
            .map(to_object)
            .unwrap_or_else(|| Err(Error::not_found(kind, name)))
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<DynamicObject>> {
        let selector = parse_selector(selector)?;
        let state = self.enter(Op::List, Some(kind))?;
        state
            .objects
            .iter()
            .filter(|(key, value)| {
                key.kind == kind
                    && (namespace.is_none() || key.namespace.as_deref() == namespace)
                    && labels_match(value, &selector)
            })
            .map(|(_, value)| to_object(value))
            .collect()
    }

    async fn apply(&self, manifest: &DynamicObject) -> Result<DynamicObject> {
        let kind = Kind::of(manifest)?;
        let name = object_name(manifest)?;
        let mut state = self.enter(Op::Apply, Some(kind))?;

        let namespace = manifest.metadata.namespace.as_deref();
        if kind.namespaced() {
            let ns = namespace
                .ok_or_else(|| Error::Fatal(format!("{kind} {name} has no namespace")))?;
            if !state.namespace_exists(ns) {
                return Err(Error::not_found(Kind::Namespace, ns));
            }
        }

        let key = ObjectKey::new(kind, namespace, name);
        let incoming = serde_json::to_value(manifest)?;
        let mut merged = state.objects.get(&key).cloned().unwrap_or(Value::Null);
        let preserved_meta = merged
            .get("metadata")
            .and_then(|m| Some((m.get("generation")?.clone(), m.get("resourceVersion")?.clone())));
        merge_patch(&mut merged, &incoming);
        if let (Some((generation, version)), Some(meta)) = (
            preserved_meta,
            merged.get_mut("metadata").and_then(Value::as_object_mut),
        ) {
            meta.insert("generation".into(), generation);
            meta.insert("resourceVersion".into(), version);
        }

        state.store(key.clone(), merged);
        state
            .objects
            .get(&key)
            .map(to_object)
            .unwrap_or_else(|| Err(Error::not_found(kind, name)))
    }

    async fn patch(
        &self,
        kind: Kind,
        name: &str,
        namespace: Option<&str>,
        patch: &Value,
    ) -> Result<DynamicObject> {
        let mut state = self.enter(Op::Patch, Some(kind))?;
        let key = ObjectKey::new(kind, namespace, name);
        let mut value = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(kind, name))?;
        merge_patch(&mut value, patch);
        state.store(key.clone(), value);
        state
            .objects
            .get(&key)
            .map(to_object)
            .unwrap_or_else(|| Err(Error::not_found(kind, name)))
    }

    async fn delete(&self, kind: Kind, name: &str, namespace: Option<&str>) -> Result<bool> {
        let mut state = self.enter(Op::Delete, Some(kind))?;
        Ok(state.remove(&ObjectKey::new(kind, namespace, name)))
    }

    async fn logs(
        &self,
        namespace: &str,
        selector: &str,
        _container: Option<&str>,
        _tail_lines: i64,
    ) -> Result<String> {
        let state = self.enter(Op::Logs, Some(Kind::Pod))?;
        Ok(state
            .logs
            .get(&(namespace.to_string(), selector.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn install_mesh(&self, profile: MeshProfile, overlay_file: &Path) -> Result<()> {
        let overlay = std::fs::read_to_string(overlay_file).map_err(|e| {
            Error::Fatal(format!(
                "cannot read installer overlay {}: {e}",
                overlay_file.display()
            ))
        })?;
        let namespace = overlay_namespace(&overlay)?;

        let mut state = self.enter(Op::InstallMesh, None)?;
        if state.installer.is_none() {
            return Err(Error::Fatal("istioctl not found in PATH".into()));
        }

        let ns_key = ObjectKey::new(Kind::Namespace, None, &namespace);
        if !state.objects.contains_key(&ns_key) {
            state.store(
                ns_key,
                json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": {"name": namespace},
                }),
            );
        }

        let (label_key, label_value) = MESH_LABEL;
        state.store(
            ObjectKey::new(Kind::Deployment, Some(&namespace), "istiod"),
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {
                    "name": "istiod",
                    "namespace": namespace,
                    "labels": {label_key: label_value, "istio": "pilot"},
                    "annotations": {"install.istio.io/profile": profile.to_string()},
                },
                "spec": {
                    "replicas": 1,
                    "selector": {"matchLabels": {label_key: label_value}},
                    "template": {"metadata": {"labels": {label_key: label_value, "istio": "pilot"}}},
                },
            }),
        );
        Ok(())
    }

    async fn uninstall_mesh(&self, _purge: bool) -> Result<()> {
        let mut state = self.enter(Op::UninstallMesh, None)?;
        let (label_key, label_value) = MESH_LABEL;
        let keys: Vec<ObjectKey> = state
            .objects
            .iter()
            .filter(|(k, v)| {
                k.kind == Kind::Deployment
                    && v.pointer(&format!("/metadata/labels/{label_key}"))
                        .and_then(Value::as_str)
                        == Some(label_value)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            state.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Condition;

    fn manifest(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn namespace(name: &str) -> DynamicObject {
        manifest(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}}))
    }

    fn deployment(ns: &str, name: &str) -> DynamicObject {
        manifest(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": ns},
            "spec": {
                "replicas": 2,
                "template": {"metadata": {"labels": {"app": name}}}
            }
        }))
    }

    #[test]
    fn test_merge_patch_rfc7386() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"list": [1, 2]});
        merge_patch(&mut target, &json!({"list": [3]}));
        assert_eq!(target, json!({"list": [3]}));
    }

    #[tokio::test]
    async fn test_apply_requires_namespace() {
        let cluster = InMemoryCluster::new();
        let err = cluster.apply(&deployment("obs", "prometheus")).await.unwrap_err();
        assert!(err.is_not_found());

        cluster.apply(&namespace("obs")).await.unwrap();
        cluster.apply(&deployment("obs", "prometheus")).await.unwrap();
        assert!(cluster.contains(Kind::Deployment, "prometheus", Some("obs")));
    }

    #[tokio::test]
    async fn test_identical_apply_is_noop() {
        let cluster = InMemoryCluster::new();
        cluster.apply(&namespace("obs")).await.unwrap();
        cluster.apply(&deployment("obs", "prometheus")).await.unwrap();
        let before = cluster.snapshot();
        cluster.apply(&deployment("obs", "prometheus")).await.unwrap();
        assert_eq!(before, cluster.snapshot());
    }

    #[tokio::test]
    async fn test_deployment_gets_ready_pods() {
        let cluster = InMemoryCluster::new();
        cluster.apply(&namespace("obs")).await.unwrap();
        cluster.apply(&deployment("obs", "prometheus")).await.unwrap();

        let pods = cluster.list(Kind::Pod, Some("obs"), "app=prometheus").await.unwrap();
        assert_eq!(pods.len(), 2);
        assert!(cluster
            .check_condition(Kind::Pod, "obs", "app=prometheus", Condition::PodsReady)
            .await
            .unwrap());
        assert!(cluster
            .check_condition(Kind::Deployment, "obs", "", Condition::RolledOut)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_template_patch_replaces_pods() {
        let cluster = InMemoryCluster::new();
        cluster.apply(&namespace("obs")).await.unwrap();
        cluster.apply(&deployment("obs", "prometheus")).await.unwrap();

        let patched = cluster
            .patch(
                Kind::Deployment,
                "prometheus",
                Some("obs"),
                &json!({"spec": {"template": {"metadata": {"annotations": {"restart": "1"}}}}}),
            )
            .await
            .unwrap();
        assert_eq!(patched.metadata.generation, Some(2));

        let pods = cluster.list(Kind::Pod, Some("obs"), "app=prometheus").await.unwrap();
        assert_eq!(pods.len(), 2);
        assert!(pods
            .iter()
            .all(|p| p.metadata.name.as_deref().unwrap().starts_with("prometheus-2-")));
    }

    #[tokio::test]
    async fn test_stalled_deployment_never_ready() {
        let cluster = InMemoryCluster::new();
        cluster.stall("prometheus");
        cluster.apply(&namespace("obs")).await.unwrap();
        cluster.apply(&deployment("obs", "prometheus")).await.unwrap();
        assert!(!cluster
            .check_condition(Kind::Deployment, "obs", "", Condition::RolledOut)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_namespace_delete_cascades() {
        let cluster = InMemoryCluster::new();
        cluster.apply(&namespace("obs")).await.unwrap();
        cluster.apply(&deployment("obs", "prometheus")).await.unwrap();

        assert!(cluster.delete(Kind::Namespace, "obs", None).await.unwrap());
        assert!(cluster.snapshot().is_empty());
        assert!(!cluster.delete(Kind::Namespace, "obs", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let cluster = InMemoryCluster::new();
        cluster.inject(Fault::transient(Op::Apply, Some(Kind::Namespace), 1));

        let err = cluster.apply(&namespace("obs")).await.unwrap_err();
        assert!(err.is_transient());
        cluster.apply(&namespace("obs")).await.unwrap();
        assert_eq!(cluster.calls(Op::Apply), 2);
        assert_eq!(cluster.mutations(), 2);
    }

    #[tokio::test]
    async fn test_install_mesh_reads_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = dir.path().join("overlay.yaml");
        std::fs::write(
            &overlay,
            "spec:\n  values:\n    global:\n      istioNamespace: mesh\n",
        )
        .unwrap();

        let cluster = InMemoryCluster::new();
        cluster.install_mesh(MeshProfile::Minimal, &overlay).await.unwrap();
        assert!(cluster.contains(Kind::Namespace, "mesh", None));
        assert!(cluster
            .check_condition(Kind::Deployment, "mesh", "app=istiod", Condition::Available)
            .await
            .unwrap());

        cluster.uninstall_mesh(true).await.unwrap();
        assert!(!cluster.contains(Kind::Deployment, "istiod", Some("mesh")));
    }

    #[tokio::test]
    async fn test_install_mesh_requires_overlay_file() {
        let cluster = InMemoryCluster::new();
        let err = cluster
            .install_mesh(MeshProfile::Demo, Path::new("/nonexistent/overlay.yaml"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
    }
}

//! Prometheus addon manifests.
//!
//! The addon ships as a multi-document YAML template (bundled at compile
//! time, or read from a file or URL). Rendering sets namespaces, resource
//! limits and storage on the parsed documents and stamps the Deployment
//! with a fingerprint of the rendered bundle, so an unchanged addon is
//! recognized without comparing every field.

use std::fmt;
use std::path::PathBuf;

use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::client::Kind;
use crate::desired::{DesiredStateSpec, ResourceLimits, Storage};
use crate::error::{Error, Result};

/// Template bundled into the binary.
const BUNDLED_TEMPLATE: &str = include_str!("../manifests/prometheus.yaml");

/// Name shared by the addon Deployment, ConfigMap, Service and RBAC objects.
pub const ADDON_NAME: &str = "prometheus";
/// Label selector of the addon pods.
pub const ADDON_SELECTOR: &str = "app.kubernetes.io/name=prometheus";
/// ConfigMap key holding the Prometheus configuration.
pub const CONFIG_KEY: &str = "prometheus.yml";
/// Container running the Prometheus server.
pub const SERVER_CONTAINER: &str = "prometheus-server";
/// Volume backing the TSDB.
const STORAGE_VOLUME: &str = "storage-volume";
/// Claim created when persistent storage is requested.
pub const STORAGE_CLAIM: &str = "prometheus-storage";
/// Service exposing the addon outside the cluster.
pub const EXPOSURE_SERVICE: &str = "prometheus-lb";
/// Deployment annotation carrying the bundle fingerprint.
pub const FINGERPRINT_ANNOTATION: &str = "meshobs.io/addon-fingerprint";
/// Label put on everything this tool creates.
pub const MANAGED_BY_LABEL: (&str, &str) = ("app.kubernetes.io/managed-by", "meshobs");

/// Where the addon template comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", tag = "type", content = "location")]
pub enum AddonSource {
    /// Template compiled into the binary.
    #[default]
    Bundled,
    File(PathBuf),
    Url(String),
}

impl fmt::Display for AddonSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundled => write!(f, "bundled"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => write!(f, "{url}"),
        }
    }
}

/// SHA-1 of some content, hex encoded.
#[must_use]
pub fn sha1_hex(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Parsed, unrendered addon documents.
#[derive(Debug, Clone)]
pub struct AddonTemplate {
    documents: Vec<DynamicObject>,
}

impl AddonTemplate {
    /// The template compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled YAML does not parse.
    pub fn bundled() -> Result<Self> {
        Self::parse(BUNDLED_TEMPLATE)
    }

    /// Load the template from its source.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be read, fetched or parsed.
    pub async fn load(source: &AddonSource) -> Result<Self> {
        let text = match source {
            AddonSource::Bundled => return Self::bundled(),
            AddonSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::Fatal(format!("failed to read addon template {}: {e}", path.display()))
            })?,
            AddonSource::Url(url) => {
                debug!(url = %url, "Fetching addon template");
                let response = reqwest::get(url)
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| {
                        Error::Fatal(format!("failed to fetch addon template {url}: {e}"))
                    })?;
                response.text().await.map_err(|e| {
                    Error::Fatal(format!("failed to read addon template body: {e}"))
                })?
            }
        };
        info!(source = %source, "Loaded addon template");
        Self::parse(&text)
    }

    /// Parse a multi-document YAML template.
    ///
    /// # Errors
    ///
    /// Returns an error if a document does not parse or the template lacks
    /// the addon Deployment or ConfigMap.
    pub fn parse(text: &str) -> Result<Self> {
        let mut documents = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let object: DynamicObject = serde_json::from_value(serde_json::to_value(value)?)?;
            Kind::of(&object)?;
            documents.push(object);
        }

        let template = Self { documents };
        for kind in [Kind::Deployment, Kind::ConfigMap] {
            if template.find(kind, ADDON_NAME).is_none() {
                return Err(Error::Fatal(format!(
                    "addon template has no {kind} named {ADDON_NAME}"
                )));
            }
        }
        Ok(template)
    }

    fn find(&self, kind: Kind, name: &str) -> Option<&DynamicObject> {
        self.documents.iter().find(|d| {
            Kind::of(d).ok() == Some(kind) && d.metadata.name.as_deref() == Some(name)
        })
    }

    /// Render the template for a desired state.
    ///
    /// # Errors
    ///
    /// Returns an error if the documents cannot be serialized for hashing.
    pub fn render(&self, desired: &DesiredStateSpec) -> Result<AddonBundle> {
        let namespace = desired.namespace.as_str();
        let mut documents = Vec::with_capacity(self.documents.len() + 1);

        for template in &self.documents {
            let mut document = template.clone();
            let kind = Kind::of(&document)?;
            if kind.namespaced() {
                document.metadata.namespace = Some(namespace.to_string());
            }
            match kind {
                Kind::ClusterRoleBinding => set_subject_namespaces(&mut document, namespace),
                Kind::Deployment if document.metadata.name.as_deref() == Some(ADDON_NAME) => {
                    set_resources(&mut document, &desired.resource_limits);
                    if desired.storage.is_some() {
                        use_storage_claim(&mut document);
                    }
                }
                _ => {}
            }
            documents.push(document);
        }

        if let Some(storage) = &desired.storage {
            documents.push(storage_claim(namespace, storage)?);
        }

        let fingerprint = sha1_hex(serde_json::to_string(&documents)?.as_bytes());
        for document in &mut documents {
            if Kind::of(document).ok() == Some(Kind::Deployment)
                && document.metadata.name.as_deref() == Some(ADDON_NAME)
            {
                document
                    .metadata
                    .annotations
                    .get_or_insert_with(Default::default)
                    .insert(FINGERPRINT_ANNOTATION.to_string(), fingerprint.clone());
            }
        }

        Ok(AddonBundle {
            documents,
            fingerprint,
        })
    }
}

/// A rendered addon, ready to apply.
#[derive(Debug, Clone)]
pub struct AddonBundle {
    /// Documents in apply order.
    pub documents: Vec<DynamicObject>,
    pub fingerprint: String,
}

impl AddonBundle {
    /// The rendered addon Deployment.
    #[must_use]
    pub fn deployment(&self) -> Option<&DynamicObject> {
        self.documents.iter().find(|d| {
            Kind::of(d).ok() == Some(Kind::Deployment)
                && d.metadata.name.as_deref() == Some(ADDON_NAME)
        })
    }

    /// Whether a live Deployment spec still carries every rendered field.
    ///
    /// Fields the API server adds (defaults, the restart annotation) are
    /// ignored; a changed or missing rendered field is drift.
    #[must_use]
    pub fn deployment_matches(&self, live_spec: &Value) -> bool {
        self.deployment()
            .and_then(|d| d.data.get("spec"))
            .is_some_and(|rendered| contains_rendered(live_spec, rendered))
    }

    /// `prometheus.yml` as rendered, before remote write is merged in.
    #[must_use]
    pub fn base_config(&self) -> Option<&str> {
        self.documents
            .iter()
            .find(|d| {
                Kind::of(d).ok() == Some(Kind::ConfigMap)
                    && d.metadata.name.as_deref() == Some(ADDON_NAME)
            })
            .and_then(|d| d.data.get("data"))
            .and_then(|data| data.get(CONFIG_KEY))
            .and_then(Value::as_str)
    }
}

/// `live` holds every field of `rendered` with the same value. Lists must
/// have the same length and match element by element.
fn contains_rendered(live: &Value, rendered: &Value) -> bool {
    match (live, rendered) {
        (Value::Object(live), Value::Object(rendered)) => rendered
            .iter()
            .all(|(key, value)| live.get(key).is_some_and(|l| contains_rendered(l, value))),
        (Value::Array(live), Value::Array(rendered)) => {
            live.len() == rendered.len()
                && live
                    .iter()
                    .zip(rendered)
                    .all(|(l, r)| contains_rendered(l, r))
        }
        _ => live == rendered,
    }
}

fn set_subject_namespaces(binding: &mut DynamicObject, namespace: &str) {
    if let Some(subjects) = binding.data.get_mut("subjects").and_then(Value::as_array_mut) {
        for subject in subjects {
            if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
                subject["namespace"] = json!(namespace);
            }
        }
    }
}

fn pod_spec_mut(deployment: &mut DynamicObject) -> Option<&mut Map<String, Value>> {
    deployment
        .data
        .pointer_mut("/spec/template/spec")
        .and_then(Value::as_object_mut)
}

fn set_resources(deployment: &mut DynamicObject, limits: &ResourceLimits) {
    if limits.is_empty() {
        return;
    }
    let quantities = |cpu: &Option<String>, mem: &Option<String>| {
        let mut map = Map::new();
        if let Some(cpu) = cpu {
            map.insert("cpu".into(), json!(cpu));
        }
        if let Some(mem) = mem {
            map.insert("memory".into(), json!(mem));
        }
        map
    };
    let mut resources = Map::new();
    let requests = quantities(&limits.request_cpu, &limits.request_mem);
    if !requests.is_empty() {
        resources.insert("requests".into(), Value::Object(requests));
    }
    let caps = quantities(&limits.limit_cpu, &limits.limit_mem);
    if !caps.is_empty() {
        resources.insert("limits".into(), Value::Object(caps));
    }

    let containers = pod_spec_mut(deployment)
        .and_then(|spec| spec.get_mut("containers"))
        .and_then(Value::as_array_mut);
    for container in containers.into_iter().flatten() {
        if container.get("name").and_then(Value::as_str) == Some(SERVER_CONTAINER) {
            container["resources"] = Value::Object(resources.clone());
        }
    }
}

fn use_storage_claim(deployment: &mut DynamicObject) {
    let volumes = pod_spec_mut(deployment)
        .and_then(|spec| spec.get_mut("volumes"))
        .and_then(Value::as_array_mut);
    for volume in volumes.into_iter().flatten() {
        if volume.get("name").and_then(Value::as_str) == Some(STORAGE_VOLUME) {
            *volume = json!({
                "name": STORAGE_VOLUME,
                "persistentVolumeClaim": {"claimName": STORAGE_CLAIM},
            });
        }
    }
}

fn storage_claim(namespace: &str, storage: &Storage) -> Result<DynamicObject> {
    let (label_key, label_value) = MANAGED_BY_LABEL;
    Ok(serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "name": STORAGE_CLAIM,
            "namespace": namespace,
            "labels": {"app.kubernetes.io/name": ADDON_NAME, label_key: label_value},
        },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "storageClassName": storage.class_name,
            "resources": {"requests": {"storage": storage.size_bytes.to_string()}},
        },
    }))?)
}

/// `LoadBalancer` Service exposing the addon.
///
/// # Errors
///
/// Never fails in practice; the manifest is built from a fixed shape.
pub fn exposure_service(namespace: &str) -> Result<DynamicObject> {
    let (label_key, label_value) = MANAGED_BY_LABEL;
    Ok(serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": EXPOSURE_SERVICE,
            "namespace": namespace,
            "labels": {"app.kubernetes.io/name": ADDON_NAME, label_key: label_value},
        },
        "spec": {
            "type": "LoadBalancer",
            "selector": {"app.kubernetes.io/name": ADDON_NAME},
            "ports": [{"name": "http", "port": 9090, "protocol": "TCP", "targetPort": 9090}],
        },
    }))?)
}

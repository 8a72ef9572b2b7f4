//! Read-only snapshot of the live cluster.

use kube::api::DynamicObject;
use serde_json::Value;

use crate::addon::{
    self, ADDON_NAME, CONFIG_KEY, EXPOSURE_SERVICE, FINGERPRINT_ANNOTATION, STORAGE_CLAIM,
};
use crate::client::{ClusterClient, Condition, Kind};
use crate::desired::MeshProfile;
use crate::error::Result;

/// Namespace annotation recording the installed mesh profile.
pub const PROFILE_ANNOTATION: &str = "meshobs.io/mesh-profile";
/// Name of the mesh control plane Deployment.
pub const MESH_DEPLOYMENT: &str = "istiod";
/// Selector of the mesh control plane pods.
pub const MESH_SELECTOR: &str = "app=istiod";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeshStatus {
    pub installed: bool,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceStatus {
    /// Profile recorded by the last successful install, if parseable.
    pub profile: Option<MeshProfile>,
    pub managed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonStatus {
    pub fingerprint: Option<String>,
    /// Live Deployment spec, diffed against the rendered one.
    pub spec: Value,
    pub rolled_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    pub yaml: String,
    /// SHA-1 of `yaml`.
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureStatus {
    pub service_type: String,
    pub address: Option<String>,
}

/// What the cluster looks like right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservedState {
    pub mesh: MeshStatus,
    pub namespace: Option<NamespaceStatus>,
    pub addon: Option<AddonStatus>,
    pub config: Option<LiveConfig>,
    pub exposure: Option<ExposureStatus>,
    /// The addon storage claim exists.
    pub storage_claim: bool,
}

/// `NotFound` becomes `None`; every other error propagates.
async fn optional<F>(lookup: F) -> Result<Option<DynamicObject>>
where
    F: std::future::Future<Output = Result<DynamicObject>>,
{
    match lookup.await {
        Ok(object) => Ok(Some(object)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn annotation<'a>(object: &'a DynamicObject, key: &str) -> Option<&'a str> {
    object
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

impl ObservedState {
    /// Query the cluster. Independent reads run concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first non-`NotFound` error of any read.
    pub async fn fetch<C>(client: &C, namespace: &str) -> Result<Self>
    where
        C: ClusterClient + ?Sized,
    {
        let ns = Some(namespace);
        let (mesh, namespace_object, addon, config, exposure, claim) = tokio::try_join!(
            optional(client.get(Kind::Deployment, MESH_DEPLOYMENT, ns)),
            optional(client.get(Kind::Namespace, namespace, None)),
            optional(client.get(Kind::Deployment, ADDON_NAME, ns)),
            optional(client.get(Kind::ConfigMap, ADDON_NAME, ns)),
            optional(client.get(Kind::Service, EXPOSURE_SERVICE, ns)),
            optional(client.get(Kind::PersistentVolumeClaim, STORAGE_CLAIM, ns)),
        )?;

        Ok(Self {
            mesh: MeshStatus {
                installed: mesh.is_some(),
                available: mesh
                    .as_ref()
                    .is_some_and(|m| Condition::Available.holds(std::slice::from_ref(m))),
            },
            namespace: namespace_object.map(|object| NamespaceStatus {
                profile: annotation(&object, PROFILE_ANNOTATION).and_then(|p| p.parse().ok()),
                managed: object
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(addon::MANAGED_BY_LABEL.0))
                    .is_some_and(|v| v == addon::MANAGED_BY_LABEL.1),
            }),
            addon: addon.map(|deployment| AddonStatus {
                fingerprint: annotation(&deployment, FINGERPRINT_ANNOTATION).map(str::to_string),
                spec: deployment.data.get("spec").cloned().unwrap_or(Value::Null),
                rolled_out: Condition::RolledOut.holds(std::slice::from_ref(&deployment)),
            }),
            config: config.map(|config_map| {
                let yaml = config_map
                    .data
                    .get("data")
                    .and_then(|d| d.get(CONFIG_KEY))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                LiveConfig {
                    hash: addon::sha1_hex(yaml.as_bytes()),
                    yaml,
                }
            }),
            exposure: exposure.map(|service| ExposureStatus {
                service_type: service
                    .data
                    .pointer("/spec/type")
                    .and_then(Value::as_str)
                    .unwrap_or("ClusterIP")
                    .to_string(),
                address: service
                    .data
                    .pointer("/status/loadBalancer/ingress/0")
                    .and_then(|ingress| ingress.get("ip").or_else(|| ingress.get("hostname")))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            storage_claim: claim.is_some(),
        })
    }

    /// The mesh is installed, available, and recorded with `profile`.
    #[must_use]
    pub fn mesh_satisfies(&self, profile: MeshProfile) -> bool {
        self.mesh.installed
            && self.mesh.available
            && self
                .namespace
                .as_ref()
                .is_some_and(|ns| ns.profile == Some(profile))
    }
}

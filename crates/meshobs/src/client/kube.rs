//! [`ClusterClient`] backed by a real API server and `istioctl`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ClusterClient, Kind, FIELD_MANAGER};
use crate::desired::MeshProfile;
use crate::error::{is_transient_message, Error, Result};

/// Cluster client over the Kubernetes dynamic API.
pub struct KubeClusterClient {
    client: Client,
    kubeconfig: Option<PathBuf>,
    mesh_cli: String,
}

impl KubeClusterClient {
    /// Connect using an explicit kubeconfig, or the inferred configuration
    /// (`KUBECONFIG`, `~/.kube/config`, in-cluster) when none is given.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the configuration cannot be loaded.
    pub async fn connect(kubeconfig: Option<&Path>, mesh_cli: &str) -> Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::Fatal(format!(
                        "failed to read kubeconfig from {}: {e}",
                        path.display()
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        Error::Fatal(format!("failed to create Kubernetes config: {e}"))
                    })?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::Fatal(format!("failed to infer Kubernetes config: {e}")))?,
        };

        let client = Client::try_from(config)
            .map_err(|e| Error::Fatal(format!("failed to create Kubernetes client: {e}")))?;

        Ok(Self {
            client,
            kubeconfig: kubeconfig.map(Path::to_path_buf),
            mesh_cli: mesh_cli.to_string(),
        })
    }

    fn api(&self, kind: Kind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match namespace.filter(|_| kind.namespaced()) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None if kind.namespaced() => {
                Api::default_namespaced_with(self.client.clone(), &resource)
            }
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    /// Run the mesh installer and classify its failure.
    async fn run_mesh_cli(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new(&self.mesh_cli);
        if let Some(path) = &self.kubeconfig {
            command.arg("--kubeconfig").arg(path);
        }
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cli = %self.mesh_cli, ?args, "Running mesh installer");
        let output = command.output().await.map_err(|e| {
            Error::Fatal(format!("failed to run {}: {e}", self.mesh_cli))
        })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = format!(
            "{} {} failed: {}",
            self.mesh_cli,
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        );
        if is_transient_message(&stderr) {
            Err(Error::Transient(message))
        } else {
            Err(Error::Fatal(message))
        }
    }
}

/// Map a client error to the reconciler's classification.
fn classify(err: kube::Error, kind: Kind, name: &str) -> Error {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => Error::not_found(kind, name),
            401 | 403 => Error::Fatal(format!(
                "{kind} {name}: access denied ({}): {}",
                response.code, response.message
            )),
            409 | 429 | 500..=599 => Error::Transient(format!(
                "{kind} {name}: {} ({})",
                response.message, response.code
            )),
            _ => Error::Fatal(format!(
                "{kind} {name}: {} ({})",
                response.message, response.code
            )),
        },
        err @ (kube::Error::HyperError(_)
        | kube::Error::Service(_)
        | kube::Error::ReadEvents(_)) => Error::Transient(format!("{kind} {name}: {err}")),
        err => Error::Fatal(format!("{kind} {name}: {err}")),
    }
}

fn manifest_name(manifest: &DynamicObject) -> Result<&str> {
    manifest
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::Fatal("manifest has no metadata.name".into()))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn cluster_info(&self) -> Result<String> {
        let info = self.client.apiserver_version().await.map_err(|e| {
            Error::Fatal(format!("Kubernetes API server is not reachable: {e}"))
        })?;
        Ok(format!("Kubernetes {}", info.git_version))
    }

    async fn mesh_installer(&self) -> Result<String> {
        let path = which::which(&self.mesh_cli)
            .map_err(|_| Error::Fatal(format!("{} not found in PATH", self.mesh_cli)))?;
        let version = self
            .run_mesh_cli(&["version", "--remote=false"])
            .await
            .map_err(|e| Error::Fatal(e.to_string()))?;
        Ok(format!("{} ({})", version, path.display()))
    }

    async fn get(&self, kind: Kind, name: &str, namespace: Option<&str>) -> Result<DynamicObject> {
        self.api(kind, namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, kind, name))
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(selector);
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(|e| classify(e, kind, selector))?;
        Ok(list.items)
    }

    async fn apply(&self, manifest: &DynamicObject) -> Result<DynamicObject> {
        let kind = Kind::of(manifest)?;
        let name = manifest_name(manifest)?;
        let params = PatchParams::apply(FIELD_MANAGER).force();

        debug!(%kind, name, "Applying manifest");
        self.api(kind, manifest.metadata.namespace.as_deref())
            .patch(name, &params, &Patch::Apply(manifest))
            .await
            .map_err(|e| classify(e, kind, name))
    }

    async fn patch(
        &self,
        kind: Kind,
        name: &str,
        namespace: Option<&str>,
        patch: &Value,
    ) -> Result<DynamicObject> {
        debug!(%kind, name, "Merge-patching object");
        self.api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(e, kind, name))
    }

    async fn delete(&self, kind: Kind, name: &str, namespace: Option<&str>) -> Result<bool> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match classify(e, kind, name) {
                Error::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn logs(
        &self,
        namespace: &str,
        selector: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| classify(e, Kind::Pod, selector))?;

        let params = LogParams {
            container: container.map(ToString::to_string),
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };

        let mut combined = String::new();
        for pod in list.items {
            let Some(name) = pod.metadata.name else {
                continue;
            };
            let text = pods
                .logs(&name, &params)
                .await
                .map_err(|e| classify(e, Kind::Pod, &name))?;
            combined.push_str(&format!("==> {name} <==\n{text}\n"));
        }
        Ok(combined)
    }

    async fn install_mesh(&self, profile: MeshProfile, overlay_file: &Path) -> Result<()> {
        let overlay = overlay_file.to_string_lossy();
        let profile_arg = format!("profile={profile}");
        info!(%profile, overlay = %overlay, "Installing mesh control plane");
        self.run_mesh_cli(&["install", "-y", "-f", &overlay, "--set", &profile_arg])
            .await?;
        Ok(())
    }

    async fn uninstall_mesh(&self, purge: bool) -> Result<()> {
        info!(purge, "Uninstalling mesh control plane");
        if purge {
            self.run_mesh_cli(&["uninstall", "-y", "--purge"]).await?;
        } else {
            self.run_mesh_cli(&["uninstall", "-y", "--revision", "default"])
                .await?;
        }
        Ok(())
    }
}

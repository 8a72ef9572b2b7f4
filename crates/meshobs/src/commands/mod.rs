//! CLI subcommands.

pub mod cleanup;
pub mod plan;
pub mod relabel;
pub mod setup;
pub mod update_backend;
pub mod verify;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio::time::Instant;

use meshobs::addon::AddonTemplate;
use meshobs::client::kube::KubeClusterClient;
use meshobs::config::Settings;
use meshobs::desired::{validate_dns_label, DesiredStateSpec};
use meshobs::reconciler::Reconciler;

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Settings file (defaults to ./meshobs.yaml when present).
    #[arg(long, global = true, env = "MESHOBS_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to kubeconfig file.
    #[arg(long, global = true, env = "KUBECONFIG", value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace of the mesh and its addon.
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Overall deadline in seconds.
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Settings with the global flags applied.
pub struct Context {
    pub settings: Settings,
    kubeconfig: Option<PathBuf>,
}

impl Context {
    /// Load settings and apply the flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file is unreadable or a flag is invalid.
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let mut settings = Settings::load(args.config.as_deref())?;
        if let Some(namespace) = &args.namespace {
            validate_dns_label(namespace)?;
            settings.desired.namespace.clone_from(namespace);
        }
        if let Some(timeout) = args.timeout {
            settings.deadline_secs = Some(timeout);
        }
        settings.validate()?;
        Ok(Self {
            settings,
            kubeconfig: args.kubeconfig.clone(),
        })
    }

    #[must_use]
    pub fn desired(&self) -> &DesiredStateSpec {
        &self.settings.desired
    }

    /// Deadline measured from now.
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout does not fit in an instant.
    pub fn deadline(&self) -> Result<Option<Instant>> {
        Ok(self.settings.deadline_from(Instant::now())?)
    }

    /// Connect to the cluster and build a reconciler.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig or the addon template cannot be loaded.
    pub async fn reconciler(&self) -> Result<Reconciler<KubeClusterClient>> {
        let client = KubeClusterClient::connect(self.kubeconfig.as_deref(), &self.settings.mesh_cli)
            .await
            .context("Failed to create Kubernetes client")?;
        let template = AddonTemplate::load(&self.settings.addon)
            .await
            .context("Failed to load addon template")?;
        Ok(Reconciler::new(
            client,
            template,
            self.settings.reconciler_options(),
        ))
    }
}

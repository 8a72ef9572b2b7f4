//! Reconciliation of the mesh observability stack.
//!
//! The [`Reconciler`] coordinates:
//! - preconditions (cluster reachable, installer present)
//! - observation and planning
//! - sequential, idempotent step execution with retries and waits
//! - verification of the result
//!
//! and the reverse path, teardown.

use std::fmt;
use std::path::PathBuf;

use kube::api::DynamicObject;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::addon::{
    self, AddonBundle, AddonTemplate, ADDON_NAME, ADDON_SELECTOR, CONFIG_KEY, EXPOSURE_SERVICE,
    MANAGED_BY_LABEL, STORAGE_CLAIM,
};
use crate::client::{ClusterClient, Condition, Kind};
use crate::desired::DesiredStateSpec;
use crate::error::{Error, ErrorKind, Result};
use crate::observe::{ObservedState, MESH_SELECTOR, PROFILE_ANNOTATION};
use crate::plan::{Plan, Step};
use crate::preflight;
use crate::remote_write;
use crate::retry::{retry_transient, RetryConfig};
use crate::ui;
use crate::verify::{self, VerificationReport, VerifyOptions};
use crate::wait::WaitPolicies;
use crate::workspace::{self, Workspace};

/// Pod template annotation bumped to trigger a rollout restart.
const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Lifecycle of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Planning,
    Applying,
    WaitingReady,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A reconciliation that failed, and where.
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct StepFailure {
    /// The step, or the phase for failures outside a step.
    pub step: String,
    #[source]
    pub source: Error,
}

impl StepFailure {
    fn new(step: impl fmt::Display, source: Error) -> Self {
        Self {
            step: step.to_string(),
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Tunables for a [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub waits: WaitPolicies,
    pub retry: RetryConfig,
    /// Parent of the per-call workspace directories.
    pub work_dir: PathBuf,
    pub verify: VerifyOptions,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            waits: WaitPolicies::default(),
            retry: RetryConfig::default(),
            work_dir: std::env::temp_dir().join("meshobs"),
            verify: VerifyOptions::default(),
        }
    }
}

/// Outcome of a successful [`Reconciler::apply`].
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub plan: Plan,
    /// Steps that changed the cluster.
    pub executed: Vec<Step>,
    /// Planned steps found already satisfied when their turn came.
    pub skipped: Vec<Step>,
    pub verification: VerificationReport,
}

/// Options for [`Reconciler::teardown`].
#[derive(Debug, Clone, Copy)]
pub struct TeardownOptions {
    /// Remove every mesh resource, not only the default revision.
    pub purge: bool,
    pub delete_namespace: bool,
}

impl Default for TeardownOptions {
    fn default() -> Self {
        Self {
            purge: true,
            delete_namespace: true,
        }
    }
}

/// Outcome of [`Reconciler::teardown`].
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Objects that existed and were deleted, as `Kind/name`.
    pub removed: Vec<String>,
    /// Step failures that did not stop the teardown.
    pub warnings: Vec<String>,
    /// Stale workspace directories removed.
    pub swept: usize,
}

/// Drives the cluster towards a desired state.
pub struct Reconciler<C> {
    client: C,
    template: AddonTemplate,
    options: ReconcilerOptions,
    phase: Phase,
    transitions: Vec<(Phase, Phase)>,
}

impl<C: ClusterClient> Reconciler<C> {
    pub fn new(client: C, template: AddonTemplate, options: ReconcilerOptions) -> Self {
        Self {
            client,
            template,
            options,
            phase: Phase::Idle,
            transitions: Vec::new(),
        }
    }

    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase change since the last call started, in order.
    #[must_use]
    pub fn transitions(&self) -> &[(Phase, Phase)] {
        &self.transitions
    }

    fn start(&mut self) {
        self.transitions.clear();
        self.phase = Phase::Idle;
    }

    fn transition(&mut self, to: Phase) {
        info!(from = %self.phase, to = %to, "Phase transition");
        self.transitions.push((self.phase, to));
        self.phase = to;
    }

    fn fail(&mut self, step: impl fmt::Display, source: Error) -> StepFailure {
        let failure = StepFailure::new(step, source);
        error!(step = %failure.step, kind = %failure.kind(), error = %failure.source, "Reconciliation failed");
        self.transition(Phase::Failed);
        failure
    }

    fn check_deadline(deadline: Option<Instant>, what: &str) -> Result<()> {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::Timeout {
                what: format!("overall deadline before {what}"),
                attempts: 0,
            });
        }
        Ok(())
    }

    async fn observe(&self, namespace: &str, deadline: Option<Instant>) -> Result<ObservedState> {
        retry_transient(&self.options.retry, "observe", deadline, || {
            ObservedState::fetch(&self.client, namespace)
        })
        .await
    }

    /// Compute the plan without changing anything.
    ///
    /// # Errors
    ///
    /// Fails if the desired state is invalid or the cluster cannot be read.
    pub async fn plan(&self, desired: &DesiredStateSpec) -> Result<Plan, StepFailure> {
        desired
            .validate()
            .map_err(|e| StepFailure::new("validate", e))?;
        let bundle = self
            .template
            .render(desired)
            .map_err(|e| StepFailure::new("render", e))?;
        let observed = self
            .observe(&desired.namespace, None)
            .await
            .map_err(|e| StepFailure::new("observe", e))?;
        Ok(Plan::build(desired, &bundle, &observed))
    }

    /// Reconcile the cluster to `desired`.
    ///
    /// # Errors
    ///
    /// Returns the failing step when a precondition is unmet, a step fails
    /// after retries, a wait or the deadline times out, or verification
    /// finds a mismatch. The phase is then [`Phase::Failed`].
    pub async fn apply(
        &mut self,
        desired: &DesiredStateSpec,
        deadline: Option<Instant>,
    ) -> Result<ApplyReport, StepFailure> {
        self.start();

        if let Err(e) = desired.validate() {
            return Err(self.fail("validate", e));
        }
        if let Err(e) = preflight::check(&self.client, true).await {
            return Err(self.fail("preflight", e));
        }

        self.transition(Phase::Planning);
        let bundle = match self.template.render(desired) {
            Ok(bundle) => bundle,
            Err(e) => return Err(self.fail("render", e)),
        };
        let observed = match self.observe(&desired.namespace, deadline).await {
            Ok(observed) => observed,
            Err(e) => return Err(self.fail("observe", e)),
        };
        let plan = Plan::build(desired, &bundle, &observed);
        info!(steps = plan.len(), "Plan computed");

        self.transition(Phase::Applying);
        let workspace = if plan.contains(Step::InstallMesh) {
            match Workspace::create(&self.options.work_dir) {
                Ok(workspace) => Some(workspace),
                Err(e) => return Err(self.fail("workspace", e)),
            }
        } else {
            None
        };

        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut patched = false;
        let total = plan.len();

        for (index, step) in plan.steps.iter().copied().enumerate() {
            ui::print_progress_step(index + 1, total, step.description());

            let outcome = self
                .run_step(step, desired, &bundle, workspace.as_ref(), patched, deadline)
                .await;
            match outcome {
                Ok(true) => {
                    if step == Step::PatchRemoteWrite {
                        patched = true;
                    }
                    executed.push(step);
                    if step.starts_rollout() {
                        self.transition(Phase::WaitingReady);
                        if let Err(e) = self.wait_step(step, &desired.namespace, deadline).await {
                            return Err(self.fail(step, e));
                        }
                        self.transition(Phase::Applying);
                    }
                }
                Ok(false) => {
                    info!(step = %step, "Step already satisfied, skipping");
                    skipped.push(step);
                }
                Err(e) => return Err(self.fail(step, e)),
            }
        }
        drop(workspace);

        self.transition(Phase::WaitingReady);
        if let Err(e) = self.wait_ready(desired, deadline).await {
            return Err(self.fail("wait-ready", e));
        }

        self.transition(Phase::Verifying);
        let verification = match self.verify_state(desired, deadline).await {
            Ok(report) => report,
            Err(e) => return Err(self.fail("verify", e)),
        };
        let verification = match verification.into_result() {
            Ok(report) => report,
            Err(e) => return Err(self.fail("verify", e)),
        };

        self.transition(Phase::Done);
        Ok(ApplyReport {
            plan,
            executed,
            skipped,
            verification,
        })
    }

    /// Reconcile with the remote-write URL replaced.
    ///
    /// A missing or malformed URL fails before any cluster call.
    ///
    /// # Errors
    ///
    /// As [`Reconciler::apply`].
    pub async fn update_backend(
        &mut self,
        base: &DesiredStateSpec,
        url: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<ApplyReport, StepFailure> {
        let desired = match base.with_remote_write_url(url) {
            Ok(desired) => desired,
            Err(e) => {
                self.start();
                return Err(self.fail("validate", e));
            }
        };
        self.apply(&desired, deadline).await
    }

    /// Verify the live state without changing it.
    ///
    /// # Errors
    ///
    /// Fails if the cluster cannot be read; mismatches are in the report.
    pub async fn verify(
        &self,
        desired: &DesiredStateSpec,
    ) -> Result<VerificationReport, StepFailure> {
        self.verify_state(desired, None)
            .await
            .map_err(|e| StepFailure::new("verify", e))
    }

    async fn verify_state(
        &self,
        desired: &DesiredStateSpec,
        deadline: Option<Instant>,
    ) -> Result<VerificationReport> {
        let observed = self.observe(&desired.namespace, deadline).await?;
        verify::verify(&self.client, desired, &observed, self.options.verify).await
    }

    /// Run one step against a fresh observation.
    ///
    /// Returns `Ok(false)` when the step turned out to be satisfied.
    async fn run_step(
        &self,
        step: Step,
        desired: &DesiredStateSpec,
        bundle: &AddonBundle,
        workspace: Option<&Workspace>,
        patched: bool,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        Self::check_deadline(deadline, &step.to_string())?;

        if step == Step::RestartAddon {
            if !patched {
                return Ok(false);
            }
        } else {
            let observed = self.observe(&desired.namespace, deadline).await?;
            if step.is_satisfied(desired, bundle, &observed) {
                return Ok(false);
            }
        }

        let namespace = desired.namespace.as_str();
        match step {
            Step::InstallMesh => {
                let workspace = workspace
                    .ok_or_else(|| Error::Fatal("no workspace for the installer overlay".into()))?;
                let overlay = workspace.write_overlay(desired)?;
                self.retry("install mesh", deadline, || {
                    self.client.install_mesh(desired.mesh_profile, &overlay)
                })
                .await?;
            }
            Step::EnsureNamespace => {
                let manifest = namespace_manifest(desired)?;
                self.apply_manifest(&manifest, deadline).await?;
            }
            Step::ApplyAddon => {
                for document in &bundle.documents {
                    self.apply_manifest(document, deadline).await?;
                }
            }
            Step::PatchRemoteWrite => {
                return self.patch_remote_write(desired, deadline).await;
            }
            Step::RestartAddon => {
                let patch = json!({"spec": {"template": {"metadata": {"annotations": {
                    RESTARTED_AT_ANNOTATION: chrono::Utc::now().to_rfc3339(),
                }}}}});
                self.retry("restart addon", deadline, || {
                    self.client
                        .patch(Kind::Deployment, ADDON_NAME, Some(namespace), &patch)
                })
                .await?;
            }
            Step::RemoveStorage => {
                self.retry("remove storage claim", deadline, || {
                    self.client
                        .delete(Kind::PersistentVolumeClaim, STORAGE_CLAIM, Some(namespace))
                })
                .await?;
            }
            Step::ApplyExposure => {
                let service = addon::exposure_service(namespace)?;
                self.apply_manifest(&service, deadline).await?;
            }
            Step::RemoveExposure => {
                self.retry("remove exposure", deadline, || {
                    self.client
                        .delete(Kind::Service, EXPOSURE_SERVICE, Some(namespace))
                })
                .await?;
            }
        }
        Ok(true)
    }

    async fn retry<T, F, Fut>(&self, what: &str, deadline: Option<Instant>, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        retry_transient(&self.options.retry, what, deadline, operation).await
    }

    async fn apply_manifest(
        &self,
        manifest: &DynamicObject,
        deadline: Option<Instant>,
    ) -> Result<DynamicObject> {
        let what = format!(
            "apply {}",
            manifest.metadata.name.as_deref().unwrap_or_default()
        );
        self.retry(&what, deadline, || self.client.apply(manifest))
            .await
    }

    /// Read-modify-write of the addon config. Returns whether it changed.
    async fn patch_remote_write(
        &self,
        desired: &DesiredStateSpec,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        let namespace = desired.namespace.as_str();
        let config_map = self
            .retry("read addon config", deadline, || {
                self.client
                    .get(Kind::ConfigMap, ADDON_NAME, Some(namespace))
            })
            .await?;
        let current = config_map
            .data
            .get("data")
            .and_then(|d| d.get(CONFIG_KEY))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if remote_write::remote_write_matches(current, desired.remote_write.as_ref()) {
            return Ok(false);
        }

        let updated =
            remote_write::patch_prometheus_config(current, desired.remote_write.as_ref())?;
        if updated == current {
            return Ok(false);
        }

        let patch = json!({"data": {CONFIG_KEY: updated}});
        self.retry("patch addon config", deadline, || {
            self.client
                .patch(Kind::ConfigMap, ADDON_NAME, Some(namespace), &patch)
        })
        .await?;
        info!(
            url = desired.remote_write.as_ref().map_or("<disabled>", |r| r.url.as_str()),
            "Remote write configured"
        );
        Ok(true)
    }

    /// Wait for the rollout a step started.
    async fn wait_step(&self, step: Step, namespace: &str, deadline: Option<Instant>) -> Result<()> {
        match step {
            Step::InstallMesh => {
                self.client
                    .wait_for_condition(
                        Kind::Deployment,
                        namespace,
                        MESH_SELECTOR,
                        Condition::Available,
                        &self.options.waits.mesh,
                        deadline,
                    )
                    .await
            }
            Step::ApplyAddon | Step::RestartAddon => self.wait_addon(namespace, deadline).await,
            _ => Ok(()),
        }
    }

    async fn wait_addon(&self, namespace: &str, deadline: Option<Instant>) -> Result<()> {
        let waits = &self.options.waits;
        self.client
            .wait_for_condition(
                Kind::Deployment,
                namespace,
                ADDON_SELECTOR,
                Condition::RolledOut,
                &waits.rollout,
                deadline,
            )
            .await?;
        self.client
            .wait_for_condition(
                Kind::Pod,
                namespace,
                ADDON_SELECTOR,
                Condition::PodsReady,
                &waits.pods,
                deadline,
            )
            .await
    }

    /// Final readiness gate, also covering steps skipped as satisfied.
    async fn wait_ready(&self, desired: &DesiredStateSpec, deadline: Option<Instant>) -> Result<()> {
        let namespace = desired.namespace.as_str();
        self.client
            .wait_for_condition(
                Kind::Deployment,
                namespace,
                MESH_SELECTOR,
                Condition::Available,
                &self.options.waits.mesh,
                deadline,
            )
            .await?;
        self.wait_addon(namespace, deadline).await
    }

    /// Remove everything this tool installs.
    ///
    /// Absent objects count as removed. Step failures are collected as
    /// warnings and the remaining steps still run.
    ///
    /// # Errors
    ///
    /// Fails only when a precondition is unmet or the deadline expires.
    pub async fn teardown(
        &mut self,
        desired: &DesiredStateSpec,
        options: TeardownOptions,
        deadline: Option<Instant>,
    ) -> Result<TeardownReport, StepFailure> {
        self.start();

        if let Err(e) = preflight::check(&self.client, true).await {
            return Err(self.fail("preflight", e));
        }
        self.transition(Phase::Applying);

        let namespace = desired.namespace.as_str();
        let mut report = TeardownReport::default();

        let mut targets: Vec<(Kind, String, Option<String>)> =
            vec![(Kind::Service, EXPOSURE_SERVICE.to_string(), Some(namespace.to_string()))];
        match self.template.render(desired) {
            Ok(bundle) => {
                for document in bundle.documents.iter().rev() {
                    match (Kind::of(document), document.metadata.name.clone()) {
                        (Ok(kind), Some(name)) => {
                            targets.push((kind, name, document.metadata.namespace.clone()));
                        }
                        _ => report
                            .warnings
                            .push("skipping addon document without kind or name".into()),
                    }
                }
            }
            Err(e) => report.warnings.push(format!("render addon: {e}")),
        }
        if !targets
            .iter()
            .any(|(kind, _, _)| *kind == Kind::PersistentVolumeClaim)
        {
            targets.push((
                Kind::PersistentVolumeClaim,
                STORAGE_CLAIM.to_string(),
                Some(namespace.to_string()),
            ));
        }

        let total = targets.len() + 2 + usize::from(options.delete_namespace);
        let mut index = 0;

        for (kind, name, ns) in &targets {
            index += 1;
            if let Err(e) = Self::check_deadline(deadline, "teardown") {
                return Err(self.fail(format!("delete {kind}/{name}"), e));
            }
            ui::print_progress_step(index, total, &format!("Removing {kind} {name}"));
            let result = self
                .retry(&format!("delete {kind}/{name}"), deadline, || {
                    self.client.delete(*kind, name, ns.as_deref())
                })
                .await;
            Self::record(&mut report, &format!("{kind}/{name}"), result);
        }

        index += 1;
        if let Err(e) = Self::check_deadline(deadline, "teardown") {
            return Err(self.fail("uninstall mesh", e));
        }
        ui::print_progress_step(index, total, "Uninstalling mesh control plane");
        let purge = options.purge;
        let result = self
            .retry("uninstall mesh", deadline, || self.client.uninstall_mesh(purge))
            .await
            .map(|()| false);
        Self::record(&mut report, "mesh", result);

        if options.delete_namespace {
            index += 1;
            if let Err(e) = Self::check_deadline(deadline, "teardown") {
                return Err(self.fail(format!("delete Namespace/{namespace}"), e));
            }
            ui::print_progress_step(index, total, &format!("Removing namespace {namespace}"));
            let result = self
                .retry("delete namespace", deadline, || {
                    self.client.delete(Kind::Namespace, namespace, None)
                })
                .await;
            Self::record(&mut report, &format!("Namespace/{namespace}"), result);
        }

        index += 1;
        ui::print_progress_step(index, total, "Sweeping local workspaces");
        match workspace::sweep(&self.options.work_dir) {
            Ok(swept) => report.swept = swept,
            Err(e) => report.warnings.push(format!("sweep workspaces: {e}")),
        }

        self.transition(Phase::Done);
        Ok(report)
    }

    fn record(report: &mut TeardownReport, target: &str, result: Result<bool>) {
        match result {
            Ok(true) => report.removed.push(target.to_string()),
            Ok(false) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(target, error = %e, "Teardown step failed, continuing");
                ui::print_warning(&format!("{target}: {e}"));
                report.warnings.push(format!("{target}: {e}"));
            }
        }
    }
}

/// Target namespace, labelled as managed and annotated with the profile.
fn namespace_manifest(desired: &DesiredStateSpec) -> Result<DynamicObject> {
    let (label_key, label_value) = MANAGED_BY_LABEL;
    Ok(serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": desired.namespace,
            "labels": {label_key: label_value},
            "annotations": {PROFILE_ANNOTATION: desired.mesh_profile.to_string()},
        },
    }))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{Fault, FaultKind, InMemoryCluster, Op};

    fn reconciler(cluster: &InMemoryCluster, work_dir: &std::path::Path) -> Reconciler<InMemoryCluster> {
        Reconciler::new(
            cluster.clone(),
            AddonTemplate::bundled().unwrap(),
            ReconcilerOptions {
                work_dir: work_dir.to_path_buf(),
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_from_empty_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        let mut reconciler = reconciler(&cluster, dir.path());

        let report = reconciler
            .apply(&DesiredStateSpec::default(), None)
            .await
            .unwrap();

        assert_eq!(reconciler.phase(), Phase::Done);
        assert_eq!(
            report.executed,
            vec![
                Step::InstallMesh,
                Step::EnsureNamespace,
                Step::ApplyAddon,
                Step::PatchRemoteWrite,
                Step::RestartAddon,
            ]
        );
        assert!(report.verification.all_passed());
        assert_eq!(
            reconciler
                .transitions()
                .iter()
                .map(|(_, to)| *to)
                .collect::<Vec<_>>(),
            vec![
                Phase::Planning,
                Phase::Applying,
                // InstallMesh, ApplyAddon and RestartAddon each wait for their rollout.
                Phase::WaitingReady,
                Phase::Applying,
                Phase::WaitingReady,
                Phase::Applying,
                Phase::WaitingReady,
                Phase::Applying,
                Phase::WaitingReady,
                Phase::Verifying,
                Phase::Done
            ]
        );
        // Workspace removed once the call ends.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_patch_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster.inject(Fault::transient(Op::Patch, Some(Kind::ConfigMap), 2));
        let mut reconciler = reconciler(&cluster, dir.path());

        reconciler
            .apply(&DesiredStateSpec::default(), None)
            .await
            .unwrap();
        assert_eq!(reconciler.phase(), Phase::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_apply_fails_with_step() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster.inject(Fault::always(Op::Apply, Some(Kind::Deployment), FaultKind::Fatal));
        let mut reconciler = reconciler(&cluster, dir.path());

        let failure = reconciler
            .apply(&DesiredStateSpec::default(), None)
            .await
            .unwrap_err();
        assert_eq!(failure.step, "ApplyAddon");
        assert_eq!(failure.kind(), ErrorKind::Fatal);
        assert_eq!(reconciler.phase(), Phase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_installer_fails_before_planning() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        cluster.set_installer(None);
        let mut reconciler = reconciler(&cluster, dir.path());

        let failure = reconciler
            .apply(&DesiredStateSpec::default(), None)
            .await
            .unwrap_err();
        assert_eq!(failure.step, "preflight");
        assert_eq!(failure.kind(), ErrorKind::Fatal);
        assert_eq!(reconciler.transitions(), &[(Phase::Idle, Phase::Failed)]);
        assert_eq!(cluster.mutations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_remote_write_removes_section() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        let mut reconciler = reconciler(&cluster, dir.path());
        reconciler
            .apply(&DesiredStateSpec::default(), None)
            .await
            .unwrap();

        let disabled = DesiredStateSpec {
            remote_write: None,
            ..Default::default()
        };
        let report = reconciler.apply(&disabled, None).await.unwrap();
        assert_eq!(
            report.executed,
            vec![Step::PatchRemoteWrite, Step::RestartAddon]
        );
        let config = cluster
            .get(Kind::ConfigMap, ADDON_NAME, Some("istio-system"))
            .await
            .unwrap();
        let yaml = config.data["data"][CONFIG_KEY].as_str().unwrap();
        assert!(!yaml.contains("remote_write"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_namespace_records_profile() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new();
        let mut reconciler = reconciler(&cluster, dir.path());
        reconciler
            .apply(&DesiredStateSpec::default(), None)
            .await
            .unwrap();

        let namespace = cluster
            .get(Kind::Namespace, "istio-system", None)
            .await
            .unwrap();
        assert_eq!(
            namespace.metadata.annotations.unwrap()[PROFILE_ANNOTATION],
            "demo"
        );
    }
}

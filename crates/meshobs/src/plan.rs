//! Reconciliation steps and planning.
//!
//! A plan is the ordered list of steps needed to move the observed state to
//! the desired one. Every step is idempotent and knows how to tell whether
//! it is already satisfied, so the reconciler can re-check it against a
//! fresh observation right before running it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::addon::AddonBundle;
use crate::desired::{DesiredStateSpec, Exposure};
use crate::observe::ObservedState;
use crate::remote_write;

/// One idempotent unit of reconciliation, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Install the mesh control plane with the desired profile.
    InstallMesh,
    /// Create or update the target namespace.
    EnsureNamespace,
    /// Apply the rendered addon bundle.
    ApplyAddon,
    /// Replace the `remote_write` list in the addon config.
    PatchRemoteWrite,
    /// Rollout-restart the addon so it loads the new config.
    RestartAddon,
    /// Delete the storage claim left over once storage is no longer wanted.
    RemoveStorage,
    /// Create the `LoadBalancer` Service.
    ApplyExposure,
    /// Delete the `LoadBalancer` Service.
    RemoveExposure,
}

impl Step {
    /// Get a human-readable description of the step.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::InstallMesh => "Installing mesh control plane",
            Self::EnsureNamespace => "Ensuring namespace",
            Self::ApplyAddon => "Applying Prometheus addon",
            Self::PatchRemoteWrite => "Configuring remote write",
            Self::RestartAddon => "Restarting Prometheus addon",
            Self::RemoveStorage => "Removing Prometheus storage claim",
            Self::ApplyExposure => "Exposing Prometheus",
            Self::RemoveExposure => "Removing Prometheus exposure",
        }
    }

    /// Whether running the step changes a rollout that must be awaited.
    #[must_use]
    pub fn starts_rollout(&self) -> bool {
        matches!(self, Self::InstallMesh | Self::ApplyAddon | Self::RestartAddon)
    }

    /// Whether the step has nothing left to do.
    #[must_use]
    pub fn is_satisfied(
        &self,
        desired: &DesiredStateSpec,
        bundle: &AddonBundle,
        observed: &ObservedState,
    ) -> bool {
        match self {
            Self::InstallMesh => observed.mesh_satisfies(desired.mesh_profile),
            Self::EnsureNamespace => observed
                .namespace
                .as_ref()
                .is_some_and(|ns| ns.managed && ns.profile == Some(desired.mesh_profile)),
            Self::ApplyAddon => {
                let deployment_current = observed.addon.as_ref().is_some_and(|addon| {
                    addon.fingerprint.as_deref() == Some(bundle.fingerprint.as_str())
                        && bundle.deployment_matches(&addon.spec)
                });
                // Hand edits outside remote_write count as drift too.
                let config_current = observed.config.as_ref().is_some_and(|config| {
                    bundle.base_config().is_some_and(|base| {
                        remote_write::matches_apart_from_remote_write(&config.yaml, base)
                    })
                });
                deployment_current && config_current
            }
            Self::PatchRemoteWrite => observed.config.as_ref().is_some_and(|config| {
                remote_write::remote_write_matches(&config.yaml, desired.remote_write.as_ref())
            }),
            // Only meaningful after a patch; the reconciler decides.
            Self::RestartAddon => false,
            Self::RemoveStorage => desired.storage.is_some() || !observed.storage_claim,
            Self::ApplyExposure => observed
                .exposure
                .as_ref()
                .is_some_and(|e| e.service_type == "LoadBalancer"),
            Self::RemoveExposure => observed.exposure.is_none(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InstallMesh => "InstallMesh",
            Self::EnsureNamespace => "EnsureNamespace",
            Self::ApplyAddon => "ApplyAddon",
            Self::PatchRemoteWrite => "PatchRemoteWrite",
            Self::RestartAddon => "RestartAddon",
            Self::RemoveStorage => "RemoveStorage",
            Self::ApplyExposure => "ApplyExposure",
            Self::RemoveExposure => "RemoveExposure",
        };
        write!(f, "{name}")
    }
}

/// Ordered steps for one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    /// Compute the steps needed to reach `desired` from `observed`.
    #[must_use]
    pub fn build(
        desired: &DesiredStateSpec,
        bundle: &AddonBundle,
        observed: &ObservedState,
    ) -> Self {
        let needed = |step: Step| !step.is_satisfied(desired, bundle, observed);
        let mut steps = Vec::new();

        if needed(Step::InstallMesh) {
            steps.push(Step::InstallMesh);
        }
        if needed(Step::EnsureNamespace) {
            steps.push(Step::EnsureNamespace);
        }

        let apply_addon = needed(Step::ApplyAddon);
        if apply_addon {
            steps.push(Step::ApplyAddon);
        }
        // Re-applying the addon resets its config, so the patch follows it.
        if apply_addon || needed(Step::PatchRemoteWrite) {
            steps.push(Step::PatchRemoteWrite);
            steps.push(Step::RestartAddon);
        }
        if needed(Step::RemoveStorage) {
            steps.push(Step::RemoveStorage);
        }

        match desired.exposure {
            Exposure::LoadBalancer if needed(Step::ApplyExposure) => {
                steps.push(Step::ApplyExposure);
            }
            Exposure::None if needed(Step::RemoveExposure) => steps.push(Step::RemoveExposure),
            _ => {}
        }

        Self { steps }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn contains(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::AddonTemplate;
    use crate::desired::MeshProfile;
    use crate::observe::{
        AddonStatus, ExposureStatus, LiveConfig, MeshStatus, NamespaceStatus,
    };

    fn bundle(desired: &DesiredStateSpec) -> AddonBundle {
        AddonTemplate::bundled().unwrap().render(desired).unwrap()
    }

    fn converged(desired: &DesiredStateSpec, bundle: &AddonBundle) -> ObservedState {
        let yaml = remote_write::patch_prometheus_config(
            bundle.base_config().unwrap(),
            desired.remote_write.as_ref(),
        )
        .unwrap();
        ObservedState {
            mesh: MeshStatus {
                installed: true,
                available: true,
            },
            namespace: Some(NamespaceStatus {
                profile: Some(desired.mesh_profile),
                managed: true,
            }),
            addon: Some(AddonStatus {
                fingerprint: Some(bundle.fingerprint.clone()),
                spec: bundle.deployment().unwrap().data["spec"].clone(),
                rolled_out: true,
            }),
            config: Some(LiveConfig {
                hash: crate::addon::sha1_hex(yaml.as_bytes()),
                yaml,
            }),
            exposure: None,
            storage_claim: desired.storage.is_some(),
        }
    }

    #[test]
    fn test_empty_cluster_plans_everything() {
        let desired = DesiredStateSpec {
            exposure: Exposure::LoadBalancer,
            ..Default::default()
        };
        let plan = Plan::build(&desired, &bundle(&desired), &ObservedState::default());
        assert_eq!(
            plan.steps,
            vec![
                Step::InstallMesh,
                Step::EnsureNamespace,
                Step::ApplyAddon,
                Step::PatchRemoteWrite,
                Step::RestartAddon,
                Step::ApplyExposure,
            ]
        );
    }

    #[test]
    fn test_converged_cluster_plans_nothing() {
        let desired = DesiredStateSpec::default();
        let bundle = bundle(&desired);
        let plan = Plan::build(&desired, &bundle, &converged(&desired, &bundle));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_url_change_plans_patch_and_restart_only() {
        let desired = DesiredStateSpec::default();
        let bundle = bundle(&desired);
        let observed = converged(&desired, &bundle);

        let moved = desired
            .with_remote_write_url(Some("http://elsewhere:8000/receive"))
            .unwrap();
        let plan = Plan::build(&moved, &bundle, &observed);
        assert_eq!(plan.steps, vec![Step::PatchRemoteWrite, Step::RestartAddon]);
    }

    #[test]
    fn test_profile_drift_reinstalls_mesh() {
        let desired = DesiredStateSpec::default();
        let bundle = bundle(&desired);
        let observed = converged(&desired, &bundle);

        let minimal = DesiredStateSpec {
            mesh_profile: MeshProfile::Minimal,
            ..desired
        };
        let plan = Plan::build(&minimal, &bundle, &observed);
        assert_eq!(plan.steps, vec![Step::InstallMesh, Step::EnsureNamespace]);
    }

    #[test]
    fn test_changed_addon_is_reapplied() {
        let desired = DesiredStateSpec::default();
        let bundle = bundle(&desired);
        let mut observed = converged(&desired, &bundle);
        if let Some(addon) = observed.addon.as_mut() {
            addon.fingerprint = Some("stale".into());
        }

        let plan = Plan::build(&desired, &bundle, &observed);
        assert_eq!(
            plan.steps,
            vec![Step::ApplyAddon, Step::PatchRemoteWrite, Step::RestartAddon]
        );
    }

    #[test]
    fn test_exposure_removed_when_not_desired() {
        let desired = DesiredStateSpec::default();
        let bundle = bundle(&desired);
        let mut observed = converged(&desired, &bundle);
        observed.exposure = Some(ExposureStatus {
            service_type: "LoadBalancer".into(),
            address: None,
        });

        let plan = Plan::build(&desired, &bundle, &observed);
        assert_eq!(plan.steps, vec![Step::RemoveExposure]);
    }

    #[test]
    fn test_scaled_down_addon_is_reapplied() {
        let desired = DesiredStateSpec::default();
        let bundle = bundle(&desired);
        let mut observed = converged(&desired, &bundle);
        if let Some(addon) = observed.addon.as_mut() {
            addon.spec["replicas"] = serde_json::json!(0);
        }

        let plan = Plan::build(&desired, &bundle, &observed);
        assert_eq!(
            plan.steps,
            vec![Step::ApplyAddon, Step::PatchRemoteWrite, Step::RestartAddon]
        );
    }

    #[test]
    fn test_server_defaults_are_not_drift() {
        let desired = DesiredStateSpec::default();
        let bundle = bundle(&desired);
        let mut observed = converged(&desired, &bundle);
        if let Some(addon) = observed.addon.as_mut() {
            addon.spec["progressDeadlineSeconds"] = serde_json::json!(600);
            addon.spec["template"]["metadata"]["annotations"] =
                serde_json::json!({"kubectl.kubernetes.io/restartedAt": "2026-01-01T00:00:00Z"});
        }

        assert!(Plan::build(&desired, &bundle, &observed).is_empty());
    }

    #[test]
    fn test_edited_scrape_config_is_reapplied() {
        let desired = DesiredStateSpec::default();
        let bundle = bundle(&desired);
        let mut observed = converged(&desired, &bundle);
        let yaml = remote_write::patch_prometheus_config(
            "global:\n  scrape_interval: 15s\n",
            desired.remote_write.as_ref(),
        )
        .unwrap();
        observed.config = Some(LiveConfig {
            hash: crate::addon::sha1_hex(yaml.as_bytes()),
            yaml,
        });

        let plan = Plan::build(&desired, &bundle, &observed);
        assert_eq!(
            plan.steps,
            vec![Step::ApplyAddon, Step::PatchRemoteWrite, Step::RestartAddon]
        );
    }

    #[test]
    fn test_leftover_storage_claim_is_removed() {
        let desired = DesiredStateSpec::default();
        let bundle = bundle(&desired);
        let mut observed = converged(&desired, &bundle);
        observed.storage_claim = true;

        let plan = Plan::build(&desired, &bundle, &observed);
        assert_eq!(plan.steps, vec![Step::RemoveStorage]);
    }
}

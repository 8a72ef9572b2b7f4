//! Verification of the live state against the desired state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::addon::{ADDON_SELECTOR, SERVER_CONTAINER};
use crate::client::ClusterClient;
use crate::desired::{DesiredStateSpec, Exposure};
use crate::error::{Error, Result};
use crate::observe::ObservedState;
use crate::remote_write;

/// Log lines Prometheus writes when it rejects its configuration.
const RELOAD_ERRORS: [&str; 2] = ["error loading config", "error reloading"];

/// The result of a verification check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// A single check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: String,
}

impl CheckResult {
    pub fn pass(name: &str, details: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, details)
    }

    pub fn fail(name: &str, details: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, details)
    }

    pub fn skip(name: &str, details: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Skip, details)
    }

    fn new(name: &str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.into(),
        }
    }
}

/// Options for [`verify`].
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    /// Scan the addon logs for config reload errors.
    pub check_logs: bool,
    pub log_tail_lines: i64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            check_logs: false,
            log_tail_lines: 200,
        }
    }
}

/// The complete verification report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    pub fn push(&mut self, check: CheckResult) {
        self.checks.push(check);
    }

    /// Check if no check failed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.status != CheckStatus::Fail)
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Pass)
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .collect()
    }

    /// Turn failed checks into a [`Error::VerificationMismatch`].
    ///
    /// # Errors
    ///
    /// Returns the mismatch if any check failed.
    pub fn into_result(self) -> Result<Self> {
        if self.all_passed() {
            return Ok(self);
        }
        Err(Error::VerificationMismatch(
            self.failed()
                .iter()
                .map(|c| format!("{}: {}", c.name, c.details))
                .collect(),
        ))
    }

    /// Print a summary of the report.
    pub fn print_summary(&self) {
        crate::ui::print_section("Verification");
        for check in &self.checks {
            match check.status {
                CheckStatus::Skip => crate::ui::print_info(&format!(
                    "{} skipped - {}",
                    check.name, check.details
                )),
                status => crate::ui::print_check_result(
                    &check.name,
                    status == CheckStatus::Pass,
                    Some(&check.details),
                ),
            }
        }
        println!();
        let summary = format!(
            "{}/{} checks passed",
            self.passed_count(),
            self.checks.len()
        );
        if self.all_passed() {
            crate::ui::print_success(&summary);
        } else {
            crate::ui::print_error(&summary);
        }
    }
}

/// Compare the live state with the desired state.
///
/// The report lists every check, failed ones included; call
/// [`VerificationReport::into_result`] to turn failures into an error.
///
/// # Errors
///
/// Returns an error only if reading logs fails with a non-transient error.
pub async fn verify<C>(
    client: &C,
    desired: &DesiredStateSpec,
    observed: &ObservedState,
    options: VerifyOptions,
) -> Result<VerificationReport>
where
    C: ClusterClient + ?Sized,
{
    let mut report = VerificationReport::default();

    report.push(match (observed.mesh.installed, observed.mesh.available) {
        (true, true) => CheckResult::pass("mesh", "istiod available"),
        (true, false) => CheckResult::fail("mesh", "istiod not available"),
        _ => CheckResult::fail("mesh", "istiod not installed"),
    });

    report.push(match &observed.addon {
        Some(addon) if addon.rolled_out => CheckResult::pass("addon", "prometheus rolled out"),
        Some(_) => CheckResult::fail("addon", "prometheus rollout incomplete"),
        None => CheckResult::fail("addon", "prometheus deployment missing"),
    });

    let remote = desired.remote_write.as_ref();
    report.push(match &observed.config {
        None => CheckResult::fail("remote-write", "prometheus config map missing"),
        Some(config) if remote_write::remote_write_matches(&config.yaml, remote) => {
            match remote {
                Some(remote) => CheckResult::pass("remote-write", format!("writing to {}", remote.url)),
                None => CheckResult::pass("remote-write", "disabled"),
            }
        }
        Some(config) => CheckResult::fail(
            "remote-write",
            remote_write::describe_mismatch(&config.yaml, remote).join(", "),
        ),
    });

    report.push(match (desired.exposure, &observed.exposure) {
        (Exposure::LoadBalancer, Some(e)) if e.service_type == "LoadBalancer" => {
            CheckResult::pass(
                "exposure",
                e.address
                    .as_deref()
                    .map_or_else(|| "address pending".to_string(), |a| format!("reachable at {a}:9090")),
            )
        }
        (Exposure::LoadBalancer, _) => CheckResult::fail("exposure", "load balancer service missing"),
        (Exposure::None, None) => CheckResult::pass("exposure", "not exposed"),
        (Exposure::None, Some(_)) => {
            CheckResult::fail("exposure", "load balancer service present but not desired")
        }
    });

    if options.check_logs {
        report.push(check_reload_logs(client, desired, options.log_tail_lines).await?);
    } else {
        report.push(CheckResult::skip("config-reload", "log scan disabled"));
    }

    debug!(
        passed = report.passed_count(),
        total = report.checks.len(),
        "Verification finished"
    );
    Ok(report)
}

async fn check_reload_logs<C>(
    client: &C,
    desired: &DesiredStateSpec,
    tail_lines: i64,
) -> Result<CheckResult>
where
    C: ClusterClient + ?Sized,
{
    let logs = match client
        .logs(&desired.namespace, ADDON_SELECTOR, Some(SERVER_CONTAINER), tail_lines)
        .await
    {
        Ok(logs) => logs,
        Err(e) if e.is_transient() || e.is_not_found() => {
            return Ok(CheckResult::skip("config-reload", format!("logs unavailable: {e}")));
        }
        Err(e) => return Err(e),
    };

    let offending = logs.lines().find(|line| {
        let line = line.to_lowercase();
        RELOAD_ERRORS.iter().any(|marker| line.contains(marker))
    });
    Ok(match offending {
        Some(line) => CheckResult::fail("config-reload", line.trim()),
        None => CheckResult::pass("config-reload", "no reload errors"),
    })
}

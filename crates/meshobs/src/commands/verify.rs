//! Verify command - compare the live state with the desired state.

use anyhow::Result;
use clap::Args;
use tracing::warn;

use meshobs::backend;
use meshobs::verify::CheckResult;

use super::{Context, GlobalArgs};

/// Verify the live state without changing anything.
#[derive(Args, Debug)]
pub struct VerifyCommand {
    /// Also query the remote-write sink health endpoint.
    #[arg(long)]
    probe_backend: bool,

    /// Scan the addon logs for config reload errors.
    #[arg(long)]
    check_logs: bool,

    /// Output report as JSON.
    #[arg(long, default_value = "false")]
    json: bool,
}

impl VerifyCommand {
    /// Run the verify command.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be read or any check fails.
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let mut context = Context::load(global)?;
        if self.check_logs {
            context.settings.verify_logs = true;
        }
        let desired = context.desired().clone();

        let reconciler = context.reconciler().await?;
        let mut report = reconciler.verify(&desired).await?;

        if self.probe_backend {
            report.push(match &desired.remote_write {
                None => CheckResult::skip("backend", "remote write disabled"),
                Some(remote) => match backend::probe(&remote.url).await {
                    Ok(health) if health.is_healthy() => {
                        CheckResult::pass("backend", format!("sink reports {}", health.status))
                    }
                    Ok(health) => {
                        CheckResult::fail("backend", format!("sink reports {}", health.status))
                    }
                    Err(e) => {
                        warn!(error = %e, "Sink health probe failed");
                        CheckResult::fail("backend", e.to_string())
                    }
                },
            });
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            report.print_summary();
        }

        report.into_result()?;
        Ok(())
    }
}

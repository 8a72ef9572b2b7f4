//! Setup command - install and configure the whole stack.

use anyhow::Result;
use clap::Args;
use tracing::info;

use meshobs::reconciler::ApplyReport;
use meshobs::ui;

use super::{Context, GlobalArgs};

/// Install the mesh, the Prometheus addon and remote write.
#[derive(Args, Debug)]
pub struct SetupCommand {
    /// Scan the addon logs for config reload errors after applying.
    #[arg(long)]
    check_logs: bool,
}

impl SetupCommand {
    /// Run the setup command.
    ///
    /// # Errors
    ///
    /// Returns the failing step if reconciliation fails.
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let mut context = Context::load(global)?;
        if self.check_logs {
            context.settings.verify_logs = true;
        }

        ui::print_section("Mesh observability setup");
        let desired = context.desired().clone();
        ui::print_kv("Profile", &desired.mesh_profile.to_string());
        ui::print_kv("Namespace", &desired.namespace);
        ui::print_kv(
            "Remote write",
            desired
                .remote_write
                .as_ref()
                .map_or("disabled", |r| r.url.as_str()),
        );
        println!();

        let deadline = context.deadline()?;
        ui::print_step("Connecting to cluster");
        let mut reconciler = context.reconciler().await?;
        let report = reconciler.apply(&desired, deadline).await?;
        print_apply_report(&report);
        info!(executed = report.executed.len(), "Setup complete");
        ui::print_success("Setup complete");
        Ok(())
    }
}

pub fn print_apply_report(report: &ApplyReport) {
    if report.plan.is_empty() {
        ui::print_info("Cluster already matches the desired state");
    } else {
        for step in &report.executed {
            ui::print_check_result(step.description(), true, None);
        }
        for step in &report.skipped {
            ui::print_check_result(step.description(), true, Some("already satisfied"));
        }
    }
    report.verification.print_summary();
}

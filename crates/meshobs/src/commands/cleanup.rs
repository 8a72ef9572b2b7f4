//! Cleanup command - remove everything setup installed.

use anyhow::Result;
use clap::Args;
use tracing::info;

use meshobs::reconciler::TeardownOptions;
use meshobs::ui;

use super::{Context, GlobalArgs};

/// Tear down the addon, the mesh and the namespace.
#[derive(Args, Debug)]
pub struct CleanupCommand {
    /// Leave the namespace in place.
    #[arg(long)]
    keep_namespace: bool,

    /// Only remove the default mesh revision instead of purging everything.
    #[arg(long)]
    no_purge: bool,
}

impl CleanupCommand {
    /// Run the cleanup command.
    ///
    /// Step failures are reported as warnings and do not fail the command.
    ///
    /// # Errors
    ///
    /// Returns an error only if a precondition is unmet.
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let context = Context::load(global)?;
        let desired = context.desired().clone();

        ui::print_section("Mesh observability cleanup");
        ui::print_step("Connecting to cluster");
        let mut reconciler = context.reconciler().await?;
        let options = TeardownOptions {
            purge: !self.no_purge,
            delete_namespace: !self.keep_namespace,
        };
        let report = reconciler
            .teardown(&desired, options, context.deadline()?)
            .await?;

        println!();
        if report.removed.is_empty() {
            ui::print_info("Nothing to remove");
        }
        for removed in &report.removed {
            ui::print_list_item(&format!("removed {removed}"));
        }
        if report.swept > 0 {
            ui::print_list_item(&format!("swept {} stale workspace(s)", report.swept));
        }
        info!(
            removed = report.removed.len(),
            warnings = report.warnings.len(),
            "Cleanup finished"
        );

        if report.warnings.is_empty() {
            ui::print_success("Cleanup complete");
        } else {
            ui::print_warning(&format!(
                "Cleanup finished with {} warning(s)",
                report.warnings.len()
            ));
        }
        Ok(())
    }
}

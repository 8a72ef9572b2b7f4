//! Plan command - show what setup would do.

use anyhow::Result;
use clap::Args;

use meshobs::ui;

use super::{Context, GlobalArgs};

/// Observe the cluster and print the planned steps.
#[derive(Args, Debug)]
pub struct PlanCommand {
    /// Output the plan as JSON.
    #[arg(long, default_value = "false")]
    json: bool,
}

impl PlanCommand {
    /// Run the plan command.
    ///
    /// # Errors
    ///
    /// Returns an error if the desired state is invalid or the cluster
    /// cannot be read.
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let context = Context::load(global)?;
        let reconciler = context.reconciler().await?;
        let plan = reconciler.plan(context.desired()).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        ui::print_section("Planned steps");
        if plan.is_empty() {
            ui::print_success("Cluster already matches the desired state");
        }
        for (index, step) in plan.steps.iter().enumerate() {
            ui::print_progress_step(index + 1, plan.len(), step.description());
        }
        Ok(())
    }
}

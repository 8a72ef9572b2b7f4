//! Update-backend command - point remote write at another sink.

use anyhow::Result;
use clap::Args;

use meshobs::ui;

use super::setup::print_apply_report;
use super::{Context, GlobalArgs};

/// Replace the remote-write URL and reconcile.
#[derive(Args, Debug)]
pub struct UpdateBackendCommand {
    /// New remote-write URL, e.g. http://host.docker.internal:5000/receive.
    url: Option<String>,
}

impl UpdateBackendCommand {
    /// Run the update-backend command.
    ///
    /// # Errors
    ///
    /// Fails before touching the cluster if the URL is missing or invalid,
    /// otherwise returns the failing step.
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let context = Context::load(global)?;
        let base = context.desired().clone();

        ui::print_section("Remote-write backend update");
        // Reject a bad URL before connecting.
        base.with_remote_write_url(self.url.as_deref())?;
        let mut reconciler = context.reconciler().await?;
        let report = reconciler
            .update_backend(&base, self.url.as_deref(), context.deadline()?)
            .await?;
        print_apply_report(&report);
        ui::print_success(&format!(
            "Remote write now targets {}",
            self.url.as_deref().unwrap_or_default()
        ));
        Ok(())
    }
}

//! meshobs CLI.
//!
//! Installs the Istio control plane and its Prometheus addon, points the
//! addon's remote write at a metrics sink, verifies the result and tears
//! everything down again.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use meshobs::error::Error;
use meshobs::reconciler::StepFailure;
use meshobs::ui;

mod commands;

use commands::cleanup::CleanupCommand;
use commands::plan::PlanCommand;
use commands::relabel::RelabelCommand;
use commands::setup::SetupCommand;
use commands::update_backend::UpdateBackendCommand;
use commands::verify::VerifyCommand;
use commands::GlobalArgs;

/// Mesh observability installer.
#[derive(Parser)]
#[command(
    name = "meshobs",
    version,
    about = "Istio + Prometheus remote-write installer",
    long_about = "Install, configure, verify and tear down a service-mesh observability stack.\n\n\
                  Every command observes the cluster first and only changes what differs\n\
                  from the desired state, so re-running a command is always safe."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the mesh and the Prometheus addon, and configure remote write.
    Setup(SetupCommand),

    /// Point remote write at a new sink URL.
    UpdateBackend(UpdateBackendCommand),

    /// Remove the addon, the mesh and the namespace.
    Cleanup(CleanupCommand),

    /// Show the steps setup would run.
    Plan(PlanCommand),

    /// Verify the live state against the desired state.
    Verify(VerifyCommand),

    /// Evaluate the relabel rules against metric names.
    Relabel(RelabelCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,meshobs=debug")
    } else {
        EnvFilter::new("warn,meshobs=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match &cli.command {
        Commands::Setup(cmd) => cmd.run(&cli.global).await,
        Commands::UpdateBackend(cmd) => cmd.run(&cli.global).await,
        Commands::Cleanup(cmd) => cmd.run(&cli.global).await,
        Commands::Plan(cmd) => cmd.run(&cli.global).await,
        Commands::Verify(cmd) => cmd.run(&cli.global).await,
        Commands::Relabel(cmd) => cmd.run(&cli.global),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

/// Print the error kind and, for reconciliation failures, the step.
fn report_error(err: &anyhow::Error) {
    if let Some(failure) = err.downcast_ref::<StepFailure>() {
        ui::print_error(&format!(
            "{} error in step {}: {}",
            failure.kind(),
            failure.step,
            failure.source
        ));
    } else if let Some(error) = err.downcast_ref::<Error>() {
        ui::print_error(&format!("{} error: {error}", error.kind()));
    } else {
        ui::print_error(&format!("{err:#}"));
    }
}

//! Relabel command - dry-run the relabel rules against metric names.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use meshobs::config::Settings;
use meshobs::relabel::{RelabelChain, Verdict};
use meshobs::ui;

use super::GlobalArgs;

/// Show which metrics the configured relabel rules keep or drop.
#[derive(Args, Debug)]
pub struct RelabelCommand {
    /// Metric names to evaluate.
    #[arg(required = true, value_name = "METRIC")]
    metrics: Vec<String>,
}

impl RelabelCommand {
    /// Run the relabel command.
    ///
    /// # Errors
    ///
    /// Returns an error if remote write is disabled or a rule does not compile.
    pub fn run(&self, global: &GlobalArgs) -> Result<()> {
        let settings = Settings::load(global.config.as_deref())?;
        let Some(remote) = &settings.desired.remote_write else {
            bail!("Remote write is disabled; there are no relabel rules");
        };
        let chain = RelabelChain::new(&remote.relabel_rules)?;

        ui::print_section("Relabel rules");
        for (index, rule) in remote.relabel_rules.iter().enumerate() {
            ui::print_list_item(&format!("{}. {} {}", index + 1, rule.action, rule.label_match));
        }
        println!();

        for metric in &self.metrics {
            match chain.evaluate(metric) {
                Verdict::Kept => println!("  {} {metric}", "keep".green().bold()),
                Verdict::Dropped { rule } => println!(
                    "  {} {metric} {}",
                    "drop".red().bold(),
                    format!("(rule {})", rule + 1).bright_black()
                ),
            }
        }
        Ok(())
    }
}

//! `cnwan remove <workload>`: delete a workload's endpoints and service.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use cnwan_sync::{remove_workload, Removal};

use crate::commands::CommandEnv;
use crate::workload::Workload;

/// Arguments for `cnwan remove`.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Workload YAML file.
    pub workload: PathBuf,
}

impl RemoveArgs {
    pub async fn run(self, env: &CommandEnv) -> Result<()> {
        let workload = Workload::load(&self.workload)?;
        let broker = env.broker();

        let report = remove_workload(
            &broker,
            workload.namespace.as_ref(),
            workload.service.as_ref(),
        )
        .await
        .with_context(|| format!("remove failed for '{}'", workload.label()))?;

        println!(
            "✓ '{}/{}' removed ({} deleted, {} not owned)",
            report.namespace,
            report.service,
            report.count(Removal::Deleted),
            report.count(Removal::NotOwned),
        );
        for r in &report.records {
            let marker = match r.outcome {
                Removal::Deleted => "-".red().to_string(),
                Removal::NotFound => "·".bright_black().to_string(),
                Removal::NotOwned | Removal::HasForeignChildren => "⊘".yellow().to_string(),
            };
            println!("  {marker}  {:<9} {}", r.kind.to_string(), r.name);
        }
        let kept = report.count(Removal::HasForeignChildren);
        if kept > 0 {
            println!(
                "{}",
                format!("  {kept} record(s) kept because they hold records owned by someone else")
                    .yellow()
            );
        }
        Ok(())
    }
}

//! `cnwan sync <workload>`: reconcile a workload into the registry.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use cnwan_sync::{sync_workload, Outcome, SyncReport};

use crate::commands::CommandEnv;
use crate::workload::Workload;

/// Arguments for `cnwan sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Workload YAML file.
    pub workload: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub async fn run(self, env: &CommandEnv) -> Result<()> {
        let workload = Workload::load(&self.workload)?;
        let broker = env.broker();

        let report = match sync_workload(
            &broker,
            workload.namespace.as_ref(),
            workload.service.as_ref(),
        )
        .await
        {
            Ok(report) => report,
            Err(err) => {
                if err.is_retryable() {
                    eprintln!("transient failure; running `cnwan sync` again may succeed");
                }
                return Err(err).with_context(|| format!("sync failed for '{}'", workload.label()));
            }
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize sync report")?
            );
            return Ok(());
        }

        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &SyncReport) {
    let created = report.count(Outcome::Created);
    let updated = report.count(Outcome::Updated);
    let unchanged = report.count(Outcome::Unchanged);
    let not_owned = report.count(Outcome::NotOwned);

    let label = format!("{}/{}", report.namespace, report.service);
    if created + updated == 0 {
        println!("✓ '{label}' is up to date");
    } else {
        println!("✓ '{label}' synced ({created} created, {updated} updated, {unchanged} unchanged)");
    }
    if not_owned > 0 {
        println!(
            "{}",
            format!("  {not_owned} record(s) owned by someone else were left untouched").yellow()
        );
    }

    for r in &report.records {
        let marker = match r.outcome {
            Outcome::Created => "+".green().to_string(),
            Outcome::Updated => "✎".cyan().to_string(),
            Outcome::Unchanged => "·".bright_black().to_string(),
            Outcome::NotOwned => "⊘".yellow().to_string(),
        };
        println!("  {marker}  {:<9} {}", r.kind.to_string(), r.name);
    }
}

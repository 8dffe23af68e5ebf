//! `cnwan extract <workload>`: print the records a workload maps to.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use cnwan_core::Metadata;
use cnwan_sync::{extract, Extracted};

use crate::workload::Workload;

/// Arguments for `cnwan extract`.
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Workload YAML file.
    pub workload: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "kind")]
    kind: &'static str,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "address")]
    address: String,
    #[tabled(rename = "metadata")]
    metadata: String,
}

impl ExtractArgs {
    pub fn run(self) -> Result<()> {
        let workload = Workload::load(&self.workload)?;
        let extracted = extract(workload.namespace.as_ref(), workload.service.as_ref())
            .with_context(|| format!("extraction failed for '{}'", workload.label()))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&extracted)
                    .context("failed to serialize extracted records")?
            );
            return Ok(());
        }

        let mut table = Table::new(rows(&extracted));
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn rows(extracted: &Extracted) -> Vec<RecordRow> {
    let mut rows = vec![
        RecordRow {
            kind: "namespace",
            name: extracted.namespace.name.clone(),
            address: String::new(),
            metadata: format_metadata(&extracted.namespace.metadata),
        },
        RecordRow {
            kind: "service",
            name: format!("{}/{}", extracted.service.ns_name, extracted.service.name),
            address: String::new(),
            metadata: format_metadata(&extracted.service.metadata),
        },
    ];
    rows.extend(extracted.endpoints.iter().map(|ep| RecordRow {
        kind: "endpoint",
        name: format!("{}/{}/{}", ep.ns_name, ep.serv_name, ep.name),
        address: format!("{}:{}", ep.address, ep.port),
        metadata: format_metadata(&ep.metadata),
    }));
    rows
}

/// `k=v` pairs sorted by key, comma separated.
pub(crate) fn format_metadata(metadata: &Metadata) -> String {
    let mut pairs: Vec<_> = metadata.iter().collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

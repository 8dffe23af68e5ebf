//! `cnwan show`: list the local registry store.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use cnwan_core::{Endpoint, Metadata, Namespace, OwnershipTag, Service, ServiceRegistry};

use crate::commands::{extract::format_metadata, CommandEnv};

/// Arguments for `cnwan show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ServiceTree {
    #[serde(flatten)]
    service: Service,
    endpoints: Vec<Endpoint>,
}

#[derive(Serialize)]
struct NamespaceTree {
    #[serde(flatten)]
    namespace: Namespace,
    services: Vec<ServiceTree>,
}

#[derive(Tabled)]
struct StoreRow {
    #[tabled(rename = "kind")]
    kind: &'static str,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "owner")]
    owner: &'static str,
    #[tabled(rename = "detail")]
    detail: String,
}

impl ShowArgs {
    pub async fn run(self, env: &CommandEnv) -> Result<()> {
        let store = env.store();
        let mut tree = Vec::new();
        for namespace in store
            .list_namespaces()
            .await
            .context("failed to list namespaces")?
        {
            let mut services = Vec::new();
            for service in store.list_services(&namespace.name).await? {
                let endpoints = store
                    .list_endpoints(&namespace.name, &service.name)
                    .await?;
                services.push(ServiceTree { service, endpoints });
            }
            tree.push(NamespaceTree {
                namespace,
                services,
            });
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&tree).context("failed to serialize store")?
            );
            return Ok(());
        }

        print_table(&tree, &env.settings.ownership(), &store.root().display().to_string());
        Ok(())
    }
}

fn print_table(tree: &[NamespaceTree], tag: &OwnershipTag, root: &str) {
    println!("{} {}", "Registry store:".bold(), root);
    if tree.is_empty() {
        println!("No namespaces registered. Run `cnwan sync <workload>` first.");
        return;
    }

    let mut rows = Vec::new();
    for ns in tree {
        rows.push(StoreRow {
            kind: "namespace",
            name: ns.namespace.name.clone(),
            owner: owner_label(tag, &ns.namespace.metadata),
            detail: format_metadata(&ns.namespace.metadata),
        });
        for serv in &ns.services {
            rows.push(StoreRow {
                kind: "service",
                name: format!("{}/{}", serv.service.ns_name, serv.service.name),
                owner: owner_label(tag, &serv.service.metadata),
                detail: format_metadata(&serv.service.metadata),
            });
            for ep in &serv.endpoints {
                rows.push(StoreRow {
                    kind: "endpoint",
                    name: format!("{}/{}/{}", ep.ns_name, ep.serv_name, ep.name),
                    owner: owner_label(tag, &ep.metadata),
                    detail: format!("{}:{}", ep.address, ep.port),
                });
            }
        }
    }

    let foreign = rows.iter().filter(|r| r.owner == "foreign").count();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    if foreign > 0 {
        println!(
            "{}",
            format!("{foreign} record(s) are not tagged {tag} and will never be modified").yellow()
        );
    }
}

fn owner_label(tag: &OwnershipTag, metadata: &Metadata) -> &'static str {
    if tag.owns(metadata) {
        "owned"
    } else {
        "foreign"
    }
}

//! Workload files: one namespace and one service, as observed in a cluster.
//!
//! ```yaml
//! namespace:
//!   name: prod
//!   annotations: { env: prod }
//! service:
//!   name: web
//!   ports: [{ port: 80 }]
//!   externalIPs: [10.0.0.1]
//!   loadBalancerIPs: [34.1.2.3]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use cnwan_sync::{NamespaceObject, ServiceObject};

#[derive(Debug, Clone, Deserialize)]
pub struct Workload {
    pub namespace: Option<NamespaceObject>,
    pub service: Option<ServiceObject>,
}

impl Workload {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read workload at {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse workload at {}", path.display()))
    }

    /// `<namespace>/<service>`, with `?` for whatever is missing.
    pub fn label(&self) -> String {
        let ns = self.namespace.as_ref().map_or("?", |n| n.name.as_str());
        let serv = self.service.as_ref().map_or("?", |s| s.name.as_str());
        format!("{ns}/{serv}")
    }
}

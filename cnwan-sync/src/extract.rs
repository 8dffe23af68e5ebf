//! Workload → registry record extraction.
//!
//! Endpoint names are `<service>-<hash>`, where `<hash>` is the first 10 hex
//! characters of SHA-256 over `"<address>-<port>"`. The name is stable for the
//! same address and port and needs no coordination with the backend.
//!
//! Addresses are taken as-is: an address listed twice yields two endpoints
//! with the same name.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use cnwan_core::{Endpoint, Metadata, Namespace, Service};

use crate::error::SyncError;

/// Number of hex characters of the digest kept in endpoint names.
pub const ENDPOINT_HASH_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Workload objects
// ---------------------------------------------------------------------------

/// The parts of a cluster namespace the bridge looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceObject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Metadata>,
}

/// One port exposed by a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// The parts of a cluster service the bridge looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceObject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Metadata>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default, rename = "externalIPs")]
    pub external_ips: Vec<String>,
    /// Addresses assigned by a load balancer.
    #[serde(default, rename = "loadBalancerIPs")]
    pub load_balancer_ips: Vec<String>,
}

/// Records derived from one namespace/service pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extracted {
    pub namespace: Namespace,
    pub service: Service,
    pub endpoints: Vec<Endpoint>,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Build the namespace, service and endpoint records for a workload.
pub fn extract(
    ns: Option<&NamespaceObject>,
    serv: Option<&ServiceObject>,
) -> Result<Extracted, SyncError> {
    let ns = ns.ok_or(SyncError::NamespaceNotProvided)?;
    let serv = serv.ok_or(SyncError::ServiceNotProvided)?;

    let namespace = Namespace {
        name: ns.name.clone(),
        metadata: ns.annotations.clone().unwrap_or_default(),
    };

    // Metadata lives on the service, never on its endpoints.
    let service = Service {
        name: serv.name.clone(),
        ns_name: ns.name.clone(),
        metadata: serv.annotations.clone().unwrap_or_default(),
    };

    let addresses: Vec<&String> = serv
        .external_ips
        .iter()
        .chain(serv.load_balancer_ips.iter())
        .collect();

    let mut endpoints = Vec::with_capacity(serv.ports.len() * addresses.len());
    for port in &serv.ports {
        for address in &addresses {
            endpoints.push(Endpoint {
                name: endpoint_name(&serv.name, address, port.port),
                ns_name: namespace.name.clone(),
                serv_name: service.name.clone(),
                address: (*address).clone(),
                port: port.port,
                metadata: Metadata::new(),
            });
        }
    }

    Ok(Extracted {
        namespace,
        service,
        endpoints,
    })
}

/// `<serv_name>-<first 10 hex chars of sha256("<address>-<port>")>`
pub fn endpoint_name(serv_name: &str, address: &str, port: u16) -> String {
    let digest = hex::encode(Sha256::digest(format!("{address}-{port}").as_bytes()));
    format!("{serv_name}-{}", &digest[..ENDPOINT_HASH_LEN])
}

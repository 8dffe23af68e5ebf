//! Workload-level entrypoints shared by the CLI and any watch loop.
//!
//! `sync_workload` reconciles namespace → service → endpoints in that order
//! and stops at the first error; the next trigger picks up where it left off.
//! `remove_workload` deletes the endpoints and then the service. The
//! namespace stays, since other services may live in it.

use serde::Serialize;

use cnwan_core::RecordKind;

use crate::broker::{Broker, Outcome, Removal};
use crate::error::SyncError;
use crate::extract::{extract, NamespaceObject, ServiceObject};

/// Per-record outcome of a workload sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordResult<T> {
    pub kind: RecordKind,
    pub name: String,
    pub outcome: T,
}

/// Outcome of syncing one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub namespace: String,
    pub service: String,
    pub records: Vec<RecordResult<Outcome>>,
}

impl SyncReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// Outcome of removing one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub namespace: String,
    pub service: String,
    pub records: Vec<RecordResult<Removal>>,
}

impl RemovalReport {
    pub fn count(&self, removal: Removal) -> usize {
        self.records.iter().filter(|r| r.outcome == removal).count()
    }
}

/// Extract records from the workload and reconcile each of them.
pub async fn sync_workload(
    broker: &Broker,
    ns: Option<&NamespaceObject>,
    serv: Option<&ServiceObject>,
) -> Result<SyncReport, SyncError> {
    let extracted = extract(ns, serv)?;
    let mut report = SyncReport {
        namespace: extracted.namespace.name.clone(),
        service: extracted.service.name.clone(),
        records: Vec::with_capacity(extracted.endpoints.len() + 2),
    };

    let (ns, outcome) = broker.reconcile_ns(Some(extracted.namespace)).await?;
    report.records.push(RecordResult {
        kind: RecordKind::Namespace,
        name: ns.name,
        outcome,
    });

    let (serv, outcome) = broker.reconcile_service(Some(extracted.service)).await?;
    report.records.push(RecordResult {
        kind: RecordKind::Service,
        name: serv.name,
        outcome,
    });

    for ep in extracted.endpoints {
        let (ep, outcome) = broker.reconcile_endpoint(Some(ep)).await?;
        report.records.push(RecordResult {
            kind: RecordKind::Endpoint,
            name: ep.name,
            outcome,
        });
    }

    tracing::info!(
        namespace = %report.namespace,
        service = %report.service,
        created = report.count(Outcome::Created),
        updated = report.count(Outcome::Updated),
        unchanged = report.count(Outcome::Unchanged),
        not_owned = report.count(Outcome::NotOwned),
        "workload synced"
    );
    Ok(report)
}

/// Remove the workload's endpoints and service, skipping records we do not
/// own.
pub async fn remove_workload(
    broker: &Broker,
    ns: Option<&NamespaceObject>,
    serv: Option<&ServiceObject>,
) -> Result<RemovalReport, SyncError> {
    let extracted = extract(ns, serv)?;
    let ns_name = extracted.namespace.name;
    let serv_name = extracted.service.name;
    let mut records = Vec::with_capacity(extracted.endpoints.len() + 1);

    for ep in extracted.endpoints {
        let removal = broker
            .remove_endpoint(&ns_name, &serv_name, &ep.name)
            .await?;
        records.push(RecordResult {
            kind: RecordKind::Endpoint,
            name: ep.name,
            outcome: removal,
        });
    }

    let removal = broker.remove_service(&ns_name, &serv_name).await?;
    records.push(RecordResult {
        kind: RecordKind::Service,
        name: serv_name.clone(),
        outcome: removal,
    });

    let report = RemovalReport {
        namespace: ns_name,
        service: serv_name,
        records,
    };
    tracing::info!(
        namespace = %report.namespace,
        service = %report.service,
        deleted = report.count(Removal::Deleted),
        not_owned = report.count(Removal::NotOwned),
        kept = report.count(Removal::HasForeignChildren),
        "workload removed"
    );
    Ok(report)
}

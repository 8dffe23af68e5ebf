//! # cnwan-sync
//!
//! Ownership-aware reconciliation of namespaces, services and endpoints
//! against a [`cnwan_core::ServiceRegistry`].
//!
//! [`extract`] turns workload objects into registry records,
//! [`Broker`] reconciles each record, and [`pipeline`] chains the two for a
//! whole workload.

pub mod broker;
pub mod error;
pub mod extract;
pub mod locks;
pub mod pipeline;

pub use broker::{BackendContext, Broker, BrokerSettings, Outcome, Removal};
pub use error::SyncError;
pub use extract::{extract, Extracted, NamespaceObject, ServiceObject, ServicePort};
pub use locks::{KeyedLocks, RecordKey};
pub use pipeline::{remove_workload, sync_workload, RecordResult, RemovalReport, SyncReport};

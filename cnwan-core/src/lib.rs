//! cnwan core library — record model, registry port, backends, errors.
//!
//! - [`types`] — `Namespace`, `Service`, `Endpoint`, [`OwnershipTag`]
//! - [`error`] — [`RegistryError`]
//! - [`registry`] — the [`ServiceRegistry`] port every backend implements
//! - [`memory`] / [`file`] — in-memory and YAML-on-disk backends

pub mod error;
pub mod file;
pub mod memory;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use file::FileRegistry;
pub use memory::{CallOp, MemoryRegistry, RegistryCall};
pub use registry::ServiceRegistry;
pub use types::{Endpoint, Metadata, Namespace, OwnershipTag, RecordKind, Service};

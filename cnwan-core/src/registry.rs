//! The service registry port.
//!
//! Every backend (cloud directory, local YAML store, in-memory double)
//! implements [`ServiceRegistry`]. Reconciliation only ever talks to a
//! registry through this trait.
//!
//! Lookups report a missing record with [`RegistryError::NotFound`]; any
//! other error is opaque to callers.
//!
//! Deleting a namespace or service removes everything below it. Callers that
//! must not touch records they do not own list the children first.

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::types::{Endpoint, Namespace, Service};

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    // -- Namespaces

    async fn get_namespace(&self, name: &str) -> Result<Namespace, RegistryError>;

    async fn create_namespace(&self, ns: &Namespace) -> Result<Namespace, RegistryError>;

    async fn update_namespace(&self, ns: &Namespace) -> Result<Namespace, RegistryError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), RegistryError>;

    /// Every namespace, sorted by name.
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, RegistryError>;

    // -- Services, scoped by namespace

    async fn get_service(&self, ns_name: &str, name: &str) -> Result<Service, RegistryError>;

    async fn create_service(&self, serv: &Service) -> Result<Service, RegistryError>;

    async fn update_service(&self, serv: &Service) -> Result<Service, RegistryError>;

    async fn delete_service(&self, ns_name: &str, name: &str) -> Result<(), RegistryError>;

    /// Services of `ns_name`, sorted by name. Empty if the namespace is
    /// missing.
    async fn list_services(&self, ns_name: &str) -> Result<Vec<Service>, RegistryError>;

    // -- Endpoints, scoped by namespace and service

    async fn get_endpoint(
        &self,
        ns_name: &str,
        serv_name: &str,
        name: &str,
    ) -> Result<Endpoint, RegistryError>;

    async fn create_endpoint(&self, ep: &Endpoint) -> Result<Endpoint, RegistryError>;

    async fn update_endpoint(&self, ep: &Endpoint) -> Result<Endpoint, RegistryError>;

    async fn delete_endpoint(
        &self,
        ns_name: &str,
        serv_name: &str,
        name: &str,
    ) -> Result<(), RegistryError>;

    /// Endpoints of `ns_name/serv_name`, sorted by name. Empty if the service
    /// is missing.
    async fn list_endpoints(
        &self,
        ns_name: &str,
        serv_name: &str,
    ) -> Result<Vec<Endpoint>, RegistryError>;
}

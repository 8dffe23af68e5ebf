//! In-memory registry backend.
//!
//! Keeps every record in ordered maps and journals each call it receives, so
//! tests can assert exactly which operations reconciliation issued. Failures
//! and latency can be injected per operation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::RegistryError;
use crate::registry::ServiceRegistry;
use crate::types::{Endpoint, Namespace, RecordKind, Service};

/// Operation names used in the call journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOp {
    Get,
    Create,
    Update,
    Delete,
    List,
}

impl fmt::Display for CallOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOp::Get => write!(f, "get"),
            CallOp::Create => write!(f, "create"),
            CallOp::Update => write!(f, "update"),
            CallOp::Delete => write!(f, "delete"),
            CallOp::List => write!(f, "list"),
        }
    }
}

/// One journaled registry call. `name` is the record's own name, not its
/// scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCall {
    pub op: CallOp,
    pub kind: RecordKind,
    pub name: String,
}

impl RegistryCall {
    pub fn is_mutation(&self) -> bool {
        !matches!(self.op, CallOp::Get | CallOp::List)
    }
}

type ServiceKey = (String, String);
type EndpointKey = (String, String, String);

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    services: BTreeMap<ServiceKey, Service>,
    endpoints: BTreeMap<EndpointKey, Endpoint>,
    calls: Vec<RegistryCall>,
    failures: HashMap<(CallOp, RecordKind), String>,
    latency: Option<Duration>,
}

/// A [`ServiceRegistry`] held entirely in memory.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Seeding (not journaled)

    pub fn insert_namespace(&self, ns: Namespace) {
        self.state.lock().namespaces.insert(ns.name.clone(), ns);
    }

    pub fn insert_service(&self, serv: Service) {
        let key = (serv.ns_name.clone(), serv.name.clone());
        self.state.lock().services.insert(key, serv);
    }

    pub fn insert_endpoint(&self, ep: Endpoint) {
        let key = (ep.ns_name.clone(), ep.serv_name.clone(), ep.name.clone());
        self.state.lock().endpoints.insert(key, ep);
    }

    // -- Inspection

    /// Every call received so far, oldest first.
    pub fn calls(&self) -> Vec<RegistryCall> {
        self.state.lock().calls.clone()
    }

    /// Calls that would have changed the registry.
    pub fn mutations(&self) -> Vec<RegistryCall> {
        self.calls().into_iter().filter(|c| c.is_mutation()).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.state.lock().namespaces.get(name).cloned()
    }

    pub fn service(&self, ns_name: &str, name: &str) -> Option<Service> {
        self.state
            .lock()
            .services
            .get(&(ns_name.to_string(), name.to_string()))
            .cloned()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.state.lock().endpoints.values().cloned().collect()
    }

    // -- Fault injection

    /// Make every `op` on `kind` fail with [`RegistryError::Backend`].
    pub fn fail_on(&self, op: CallOp, kind: RecordKind, message: impl Into<String>) {
        self.state.lock().failures.insert((op, kind), message.into());
    }

    /// Delay every call by `latency` before it is served.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    async fn enter(&self, op: CallOp, kind: RecordKind, name: &str) -> Result<(), RegistryError> {
        let (latency, failure) = {
            let mut state = self.state.lock();
            state.calls.push(RegistryCall {
                op,
                kind,
                name: name.to_string(),
            });
            (state.latency, state.failures.get(&(op, kind)).cloned())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(message) => Err(RegistryError::Backend(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, RegistryError> {
        self.enter(CallOp::Get, RecordKind::Namespace, name).await?;
        self.state
            .lock()
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(RecordKind::Namespace, name))
    }

    async fn create_namespace(&self, ns: &Namespace) -> Result<Namespace, RegistryError> {
        self.enter(CallOp::Create, RecordKind::Namespace, &ns.name)
            .await?;
        let mut state = self.state.lock();
        if state.namespaces.contains_key(&ns.name) {
            return Err(RegistryError::already_exists(RecordKind::Namespace, &ns.name));
        }
        state.namespaces.insert(ns.name.clone(), ns.clone());
        Ok(ns.clone())
    }

    async fn update_namespace(&self, ns: &Namespace) -> Result<Namespace, RegistryError> {
        self.enter(CallOp::Update, RecordKind::Namespace, &ns.name)
            .await?;
        let mut state = self.state.lock();
        let Some(slot) = state.namespaces.get_mut(&ns.name) else {
            return Err(RegistryError::not_found(RecordKind::Namespace, &ns.name));
        };
        *slot = ns.clone();
        Ok(ns.clone())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), RegistryError> {
        self.enter(CallOp::Delete, RecordKind::Namespace, name).await?;
        let mut state = self.state.lock();
        if state.namespaces.remove(name).is_none() {
            return Err(RegistryError::not_found(RecordKind::Namespace, name));
        }
        state.services.retain(|(ns, _), _| ns != name);
        state.endpoints.retain(|(ns, _, _), _| ns != name);
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, RegistryError> {
        self.enter(CallOp::List, RecordKind::Namespace, "").await?;
        Ok(self.state.lock().namespaces.values().cloned().collect())
    }

    async fn get_service(&self, ns_name: &str, name: &str) -> Result<Service, RegistryError> {
        self.enter(CallOp::Get, RecordKind::Service, name).await?;
        self.state
            .lock()
            .services
            .get(&(ns_name.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::not_found(RecordKind::Service, name))
    }

    async fn create_service(&self, serv: &Service) -> Result<Service, RegistryError> {
        self.enter(CallOp::Create, RecordKind::Service, &serv.name)
            .await?;
        let key = (serv.ns_name.clone(), serv.name.clone());
        let mut state = self.state.lock();
        if state.services.contains_key(&key) {
            return Err(RegistryError::already_exists(RecordKind::Service, &serv.name));
        }
        state.services.insert(key, serv.clone());
        Ok(serv.clone())
    }

    async fn update_service(&self, serv: &Service) -> Result<Service, RegistryError> {
        self.enter(CallOp::Update, RecordKind::Service, &serv.name)
            .await?;
        let key = (serv.ns_name.clone(), serv.name.clone());
        let mut state = self.state.lock();
        let Some(slot) = state.services.get_mut(&key) else {
            return Err(RegistryError::not_found(RecordKind::Service, &serv.name));
        };
        *slot = serv.clone();
        Ok(serv.clone())
    }

    async fn delete_service(&self, ns_name: &str, name: &str) -> Result<(), RegistryError> {
        self.enter(CallOp::Delete, RecordKind::Service, name).await?;
        let mut state = self.state.lock();
        if state
            .services
            .remove(&(ns_name.to_string(), name.to_string()))
            .is_none()
        {
            return Err(RegistryError::not_found(RecordKind::Service, name));
        }
        state
            .endpoints
            .retain(|(ns, serv, _), _| !(ns == ns_name && serv == name));
        Ok(())
    }

    async fn list_services(&self, ns_name: &str) -> Result<Vec<Service>, RegistryError> {
        self.enter(CallOp::List, RecordKind::Service, ns_name).await?;
        Ok(self
            .state
            .lock()
            .services
            .values()
            .filter(|s| s.ns_name == ns_name)
            .cloned()
            .collect())
    }

    async fn get_endpoint(
        &self,
        ns_name: &str,
        serv_name: &str,
        name: &str,
    ) -> Result<Endpoint, RegistryError> {
        self.enter(CallOp::Get, RecordKind::Endpoint, name).await?;
        self.state
            .lock()
            .endpoints
            .get(&(ns_name.to_string(), serv_name.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::not_found(RecordKind::Endpoint, name))
    }

    async fn create_endpoint(&self, ep: &Endpoint) -> Result<Endpoint, RegistryError> {
        self.enter(CallOp::Create, RecordKind::Endpoint, &ep.name)
            .await?;
        let key = (ep.ns_name.clone(), ep.serv_name.clone(), ep.name.clone());
        let mut state = self.state.lock();
        if state.endpoints.contains_key(&key) {
            return Err(RegistryError::already_exists(RecordKind::Endpoint, &ep.name));
        }
        state.endpoints.insert(key, ep.clone());
        Ok(ep.clone())
    }

    async fn update_endpoint(&self, ep: &Endpoint) -> Result<Endpoint, RegistryError> {
        self.enter(CallOp::Update, RecordKind::Endpoint, &ep.name)
            .await?;
        let key = (ep.ns_name.clone(), ep.serv_name.clone(), ep.name.clone());
        let mut state = self.state.lock();
        let Some(slot) = state.endpoints.get_mut(&key) else {
            return Err(RegistryError::not_found(RecordKind::Endpoint, &ep.name));
        };
        *slot = ep.clone();
        Ok(ep.clone())
    }

    async fn delete_endpoint(
        &self,
        ns_name: &str,
        serv_name: &str,
        name: &str,
    ) -> Result<(), RegistryError> {
        self.enter(CallOp::Delete, RecordKind::Endpoint, name).await?;
        let key = (ns_name.to_string(), serv_name.to_string(), name.to_string());
        match self.state.lock().endpoints.remove(&key) {
            Some(_) => Ok(()),
            None => Err(RegistryError::not_found(RecordKind::Endpoint, name)),
        }
    }

    async fn list_endpoints(
        &self,
        ns_name: &str,
        serv_name: &str,
    ) -> Result<Vec<Endpoint>, RegistryError> {
        self.enter(CallOp::List, RecordKind::Endpoint, serv_name).await?;
        Ok(self
            .state
            .lock()
            .endpoints
            .values()
            .filter(|e| e.ns_name == ns_name && e.serv_name == serv_name)
            .cloned()
            .collect())
    }
}

//! Ownership-aware reconciliation.
//!
//! ## `manage_*` — per-record state machine
//!
//! 1. Validate: registry configured, record provided, name non-empty.
//! 2. Lock the record's key.
//! 3. Stamp the ownership tag into the desired metadata (last, so user
//!    metadata can never override it).
//! 4. Load the record from the registry.
//!    - not found → create it;
//!    - any other error → bail out;
//!    - owned by someone else → leave it alone;
//!    - owned, metadata equal → nothing to do;
//!    - owned, metadata differs → update it.
//!
//! The `remove_*` operations follow the same guard: only records carrying our
//! tag are ever deleted. Deleting a namespace or service takes its children
//! with it, so those are only removed when every record below them carries
//! our tag as well.
//!
//! Every registry call is bounded by the call timeout and aborted when the
//! shutdown signal fires. No retries are attempted here; the next trigger
//! will reconcile again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use cnwan_core::{
    Endpoint, Metadata, Namespace, OwnershipTag, RecordKind, RegistryError, Service,
    ServiceRegistry,
};

use crate::error::SyncError;
use crate::locks::{KeyedLocks, RecordKey};

/// Applied when the configured timeout is zero or negative.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Backend identification (cloud project, region). Opaque to reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Construction-time configuration of a [`Broker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub ownership: OwnershipTag,
    /// Per-call timeout in seconds; `<= 0` means [`DEFAULT_CALL_TIMEOUT`].
    pub timeout_secs: i64,
    pub context: BackendContext,
}

impl BrokerSettings {
    pub fn new(ownership: OwnershipTag) -> Self {
        Self {
            ownership,
            timeout_secs: 0,
            context: BackendContext::default(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        if self.timeout_secs <= 0 {
            DEFAULT_CALL_TIMEOUT
        } else {
            Duration::from_secs(self.timeout_secs as u64)
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a reconciliation pass did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Absent from the registry; created.
    Created,
    /// Owned but stale; updated.
    Updated,
    /// Owned and in sync; no call issued.
    Unchanged,
    /// Present but managed by someone else; left untouched.
    NotOwned,
}

/// What a removal pass did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    Deleted,
    /// Nothing to delete.
    NotFound,
    NotOwned,
    /// Owned, but something below it is not; nothing was deleted.
    HasForeignChildren,
}

// ---------------------------------------------------------------------------
// Records the broker can reconcile
// ---------------------------------------------------------------------------

#[async_trait]
trait Reconcilable: Clone + Send + Sync + Sized {
    const KIND: RecordKind;

    fn key(&self) -> RecordKey;
    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;

    async fn fetch(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError>;
    async fn create(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError>;
    async fn update(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError>;
}

#[async_trait]
impl Reconcilable for Namespace {
    const KIND: RecordKind = RecordKind::Namespace;

    fn key(&self) -> RecordKey {
        RecordKey::namespace(&self.name)
    }
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    async fn fetch(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError> {
        reg.get_namespace(&self.name).await
    }
    async fn create(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError> {
        reg.create_namespace(self).await
    }
    async fn update(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError> {
        reg.update_namespace(self).await
    }
}

#[async_trait]
impl Reconcilable for Service {
    const KIND: RecordKind = RecordKind::Service;

    fn key(&self) -> RecordKey {
        RecordKey::service(&self.ns_name, &self.name)
    }
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    async fn fetch(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError> {
        reg.get_service(&self.ns_name, &self.name).await
    }
    async fn create(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError> {
        reg.create_service(self).await
    }
    async fn update(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError> {
        reg.update_service(self).await
    }
}

#[async_trait]
impl Reconcilable for Endpoint {
    const KIND: RecordKind = RecordKind::Endpoint;

    fn key(&self) -> RecordKey {
        RecordKey::endpoint(&self.ns_name, &self.serv_name, &self.name)
    }
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    async fn fetch(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError> {
        reg.get_endpoint(&self.ns_name, &self.serv_name, &self.name)
            .await
    }
    async fn create(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError> {
        reg.create_endpoint(self).await
    }
    async fn update(&self, reg: &dyn ServiceRegistry) -> Result<Self, RegistryError> {
        reg.update_endpoint(self).await
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Reconciles desired records against a [`ServiceRegistry`], never touching
/// records it does not own.
pub struct Broker {
    registry: Option<Arc<dyn ServiceRegistry>>,
    ownership: OwnershipTag,
    timeout: Duration,
    context: BackendContext,
    locks: KeyedLocks,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Broker {
    pub fn new(registry: Option<Arc<dyn ServiceRegistry>>, settings: BrokerSettings) -> Self {
        let timeout = settings.call_timeout();
        Self {
            registry,
            ownership: settings.ownership,
            timeout,
            context: settings.context,
            locks: KeyedLocks::new(),
            shutdown: None,
        }
    }

    pub fn with_registry(registry: Arc<dyn ServiceRegistry>, settings: BrokerSettings) -> Self {
        Self::new(Some(registry), settings)
    }

    /// Override the per-call timeout. A zero duration restores the default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            DEFAULT_CALL_TIMEOUT
        } else {
            timeout
        };
        self
    }

    /// Abort in-flight registry calls once `shutdown` turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn ownership(&self) -> &OwnershipTag {
        &self.ownership
    }

    pub fn call_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn context(&self) -> &BackendContext {
        &self.context
    }

    // -- manage: return the record as it now exists in the registry

    pub async fn manage_ns(&self, ns: Option<Namespace>) -> Result<Namespace, SyncError> {
        self.reconcile(ns).await.map(|(ns, _)| ns)
    }

    pub async fn manage_service(&self, serv: Option<Service>) -> Result<Service, SyncError> {
        self.reconcile(serv).await.map(|(serv, _)| serv)
    }

    pub async fn manage_endpoint(&self, ep: Option<Endpoint>) -> Result<Endpoint, SyncError> {
        self.reconcile(ep).await.map(|(ep, _)| ep)
    }

    // -- reconcile: same as manage, plus what was done

    pub async fn reconcile_ns(
        &self,
        ns: Option<Namespace>,
    ) -> Result<(Namespace, Outcome), SyncError> {
        self.reconcile(ns).await
    }

    pub async fn reconcile_service(
        &self,
        serv: Option<Service>,
    ) -> Result<(Service, Outcome), SyncError> {
        self.reconcile(serv).await
    }

    pub async fn reconcile_endpoint(
        &self,
        ep: Option<Endpoint>,
    ) -> Result<(Endpoint, Outcome), SyncError> {
        self.reconcile(ep).await
    }

    // -- remove: delete only what we own

    pub async fn remove_ns(&self, name: &str) -> Result<Removal, SyncError> {
        self.remove(RecordKey::namespace(name)).await
    }

    pub async fn remove_service(&self, ns_name: &str, name: &str) -> Result<Removal, SyncError> {
        self.remove(RecordKey::service(ns_name, name)).await
    }

    pub async fn remove_endpoint(
        &self,
        ns_name: &str,
        serv_name: &str,
        name: &str,
    ) -> Result<Removal, SyncError> {
        self.remove(RecordKey::endpoint(ns_name, serv_name, name))
            .await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn reconcile<T: Reconcilable>(
        &self,
        desired: Option<T>,
    ) -> Result<(T, Outcome), SyncError> {
        let registry = self
            .registry
            .as_deref()
            .ok_or(SyncError::RegistryNotConfigured)?;
        let mut desired = desired.ok_or(SyncError::RecordNotProvided { kind: T::KIND })?;
        let key = desired.key();
        if key.name.is_empty() {
            return Err(SyncError::NameNotProvided { kind: T::KIND });
        }

        let _guard = self.locks.lock(key.clone()).await;
        self.ownership.stamp(desired.metadata_mut());

        tracing::debug!(kind = %T::KIND, name = %key, "loading from service registry");
        let existing = match self.call(T::KIND, "get", desired.fetch(registry)).await {
            Ok(existing) => existing,
            Err(err) if err.is_not_found() => {
                tracing::debug!(kind = %T::KIND, name = %key, "not in service registry, creating it");
                let created = self
                    .call(T::KIND, "create", desired.create(registry))
                    .await
                    .inspect_err(|err| {
                        tracing::error!(kind = %T::KIND, name = %key, error = %err, "create failed");
                    })?;
                tracing::info!(kind = %T::KIND, name = %key, "created");
                return Ok((created, Outcome::Created));
            }
            Err(err) => {
                tracing::error!(kind = %T::KIND, name = %key, error = %err, "load failed");
                return Err(err);
            }
        };

        if !self.ownership.owns(existing.metadata()) {
            tracing::info!(
                kind = %T::KIND,
                name = %key,
                "not owned by this bridge, leaving it untouched"
            );
            return Ok((existing, Outcome::NotOwned));
        }

        if existing.metadata() == desired.metadata() {
            tracing::debug!(kind = %T::KIND, name = %key, "already in sync");
            return Ok((existing, Outcome::Unchanged));
        }

        tracing::debug!(kind = %T::KIND, name = %key, "metadata changed, updating");
        let updated = self
            .call(T::KIND, "update", desired.update(registry))
            .await
            .inspect_err(|err| {
                tracing::error!(kind = %T::KIND, name = %key, error = %err, "update failed");
            })?;
        tracing::info!(kind = %T::KIND, name = %key, "updated");
        Ok((updated, Outcome::Updated))
    }

    async fn remove(&self, key: RecordKey) -> Result<Removal, SyncError> {
        let registry = self
            .registry
            .as_deref()
            .ok_or(SyncError::RegistryNotConfigured)?;
        if key.name.is_empty() {
            return Err(SyncError::NameNotProvided { kind: key.kind });
        }

        let _guard = self.locks.lock(key.clone()).await;

        let metadata = match self.call(key.kind, "get", fetch_metadata(registry, &key)).await {
            Ok(metadata) => metadata,
            Err(err) if err.is_not_found() => {
                tracing::debug!(kind = %key.kind, name = %key, "already absent");
                return Ok(Removal::NotFound);
            }
            Err(err) => {
                tracing::error!(kind = %key.kind, name = %key, error = %err, "load failed");
                return Err(err);
            }
        };

        if !self.ownership.owns(&metadata) {
            tracing::info!(kind = %key.kind, name = %key, "not owned by this bridge, not deleting");
            return Ok(Removal::NotOwned);
        }

        if let Some(child) = self.foreign_child(registry, &key).await? {
            tracing::info!(
                kind = %key.kind,
                name = %key,
                child = %child,
                "holds a record owned by someone else, not deleting"
            );
            return Ok(Removal::HasForeignChildren);
        }

        match self
            .call(key.kind, "delete", delete_record(registry, &key))
            .await
        {
            Ok(()) => {
                tracing::info!(kind = %key.kind, name = %key, "deleted");
                Ok(Removal::Deleted)
            }
            // Gone between load and delete.
            Err(err) if err.is_not_found() => Ok(Removal::NotFound),
            Err(err) => {
                tracing::error!(kind = %key.kind, name = %key, error = %err, "delete failed");
                Err(err)
            }
        }
    }

    /// First record below `key` that does not carry our tag.
    async fn foreign_child(
        &self,
        registry: &dyn ServiceRegistry,
        key: &RecordKey,
    ) -> Result<Option<RecordKey>, SyncError> {
        match key.kind {
            RecordKind::Endpoint => Ok(None),
            RecordKind::Service => self.foreign_endpoint(registry, &key.ns_name, &key.name).await,
            RecordKind::Namespace => {
                let services = self
                    .call(RecordKind::Service, "list", registry.list_services(&key.name))
                    .await?;
                for serv in services {
                    if !self.ownership.owns(&serv.metadata) {
                        return Ok(Some(RecordKey::service(&key.name, &serv.name)));
                    }
                    if let Some(ep) = self.foreign_endpoint(registry, &key.name, &serv.name).await? {
                        return Ok(Some(ep));
                    }
                }
                Ok(None)
            }
        }
    }

    async fn foreign_endpoint(
        &self,
        registry: &dyn ServiceRegistry,
        ns_name: &str,
        serv_name: &str,
    ) -> Result<Option<RecordKey>, SyncError> {
        let endpoints = self
            .call(
                RecordKind::Endpoint,
                "list",
                registry.list_endpoints(ns_name, serv_name),
            )
            .await?;
        Ok(endpoints
            .into_iter()
            .find(|ep| !self.ownership.owns(&ep.metadata))
            .map(|ep| RecordKey::endpoint(ns_name, serv_name, ep.name)))
    }

    /// Run one registry call under the timeout and the shutdown signal.
    async fn call<T, F>(&self, kind: RecordKind, op: &'static str, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, RegistryError>>,
    {
        let timed = tokio::time::timeout(self.timeout, fut);
        let result = match self.shutdown.clone() {
            Some(mut shutdown) => {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => {
                        tracing::warn!(kind = %kind, op, "registry call cancelled");
                        return Err(SyncError::Cancelled { kind, op });
                    }
                    res = timed => res,
                }
            }
            None => timed.await,
        };

        match result {
            Ok(inner) => inner.map_err(SyncError::from),
            Err(_) => {
                tracing::warn!(kind = %kind, op, after = ?self.timeout, "registry call timed out");
                Err(SyncError::Timeout {
                    kind,
                    op,
                    after: self.timeout,
                })
            }
        }
    }
}

/// Resolves once the shutdown flag is `true`. A dropped sender never cancels.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn fetch_metadata(
    reg: &dyn ServiceRegistry,
    key: &RecordKey,
) -> Result<Metadata, RegistryError> {
    match key.kind {
        RecordKind::Namespace => Ok(reg.get_namespace(&key.name).await?.metadata),
        RecordKind::Service => Ok(reg.get_service(&key.ns_name, &key.name).await?.metadata),
        RecordKind::Endpoint => Ok(reg
            .get_endpoint(&key.ns_name, &key.serv_name, &key.name)
            .await?
            .metadata),
    }
}

async fn delete_record(reg: &dyn ServiceRegistry, key: &RecordKey) -> Result<(), RegistryError> {
    match key.kind {
        RecordKind::Namespace => reg.delete_namespace(&key.name).await,
        RecordKind::Service => reg.delete_service(&key.ns_name, &key.name).await,
        RecordKind::Endpoint => {
            reg.delete_endpoint(&key.ns_name, &key.serv_name, &key.name)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnwan_core::{CallOp, MemoryRegistry, RegistryCall};

    fn tag() -> OwnershipTag {
        OwnershipTag::new("owner", "cnwan")
    }

    fn broker(reg: &Arc<MemoryRegistry>) -> Broker {
        Broker::with_registry(reg.clone(), BrokerSettings::new(tag()))
    }

    fn prod() -> Namespace {
        Namespace::new("prod").with_metadata([("env", "prod")])
    }

    fn web_endpoint() -> Endpoint {
        Endpoint {
            name: "web-1".into(),
            ns_name: "prod".into(),
            serv_name: "web".into(),
            address: "10.0.0.1".into(),
            port: 80,
            metadata: Metadata::new(),
        }
    }

    // -- Settings

    #[test]
    fn non_positive_timeout_defaults_to_thirty_seconds() {
        let mut settings = BrokerSettings::new(tag());
        assert_eq!(settings.call_timeout(), Duration::from_secs(30));
        settings.timeout_secs = -5;
        assert_eq!(settings.call_timeout(), Duration::from_secs(30));
        settings.timeout_secs = 2;
        assert_eq!(settings.call_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn zero_override_restores_default_timeout() {
        let reg = Arc::new(MemoryRegistry::new());
        let b = broker(&reg).with_timeout(Duration::ZERO);
        assert_eq!(b.call_timeout(), DEFAULT_CALL_TIMEOUT);
    }

    // -- Preconditions

    #[tokio::test]
    async fn missing_registry_fails_before_anything_else() {
        let b = Broker::new(None, BrokerSettings::new(tag()));
        let err = b.manage_ns(None).await.unwrap_err();
        assert!(matches!(err, SyncError::RegistryNotConfigured), "got: {err}");
    }

    #[tokio::test]
    async fn missing_record_makes_no_registry_call() {
        let reg = Arc::new(MemoryRegistry::new());
        let err = broker(&reg).manage_service(None).await.unwrap_err();
        assert!(
            matches!(err, SyncError::RecordNotProvided { kind: RecordKind::Service }),
            "got: {err}"
        );
        assert!(reg.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_name_makes_no_registry_call() {
        let reg = Arc::new(MemoryRegistry::new());
        let err = broker(&reg)
            .manage_ns(Some(Namespace::new("")))
            .await
            .unwrap_err();
        assert!(
            matches!(err, SyncError::NameNotProvided { kind: RecordKind::Namespace }),
            "got: {err}"
        );
        assert!(reg.calls().is_empty());
    }

    // -- State machine

    #[tokio::test]
    async fn absent_namespace_is_created_with_tag() {
        let reg = Arc::new(MemoryRegistry::new());
        let (ns, outcome) = broker(&reg).reconcile_ns(Some(prod())).await.expect("manage");

        assert_eq!(outcome, Outcome::Created);
        assert_eq!(
            ns.metadata,
            Metadata::from([
                ("env".to_string(), "prod".to_string()),
                ("owner".to_string(), "cnwan".to_string()),
            ])
        );
        assert_eq!(reg.namespace("prod"), Some(ns));
        assert_eq!(
            reg.mutations(),
            vec![RegistryCall {
                op: CallOp::Create,
                kind: RecordKind::Namespace,
                name: "prod".into()
            }]
        );
    }

    #[tokio::test]
    async fn second_pass_issues_no_mutation() {
        let reg = Arc::new(MemoryRegistry::new());
        let b = broker(&reg);
        let first = b.manage_ns(Some(prod())).await.expect("first");
        reg.clear_calls();

        let (second, outcome) = b.reconcile_ns(Some(prod())).await.expect("second");
        assert_eq!(outcome, Outcome::Unchanged);
        assert_eq!(second, first);
        assert!(reg.mutations().is_empty());
    }

    #[tokio::test]
    async fn unowned_namespace_is_returned_unchanged() {
        let reg = Arc::new(MemoryRegistry::new());
        let theirs = Namespace::new("prod").with_metadata([("owner", "someone-else")]);
        reg.insert_namespace(theirs.clone());

        let (ns, outcome) = broker(&reg).reconcile_ns(Some(prod())).await.expect("manage");
        assert_eq!(outcome, Outcome::NotOwned);
        assert_eq!(ns, theirs);
        assert!(reg.mutations().is_empty());
        assert_eq!(reg.namespace("prod"), Some(theirs));
    }

    #[tokio::test]
    async fn untagged_service_is_not_updated() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_service(Service::new("prod", "web").with_metadata([("team", "net")]));

        let desired = Service::new("prod", "web").with_metadata([("team", "video")]);
        let (_, outcome) = broker(&reg)
            .reconcile_service(Some(desired))
            .await
            .expect("manage");
        assert_eq!(outcome, Outcome::NotOwned);
        assert!(reg.mutations().is_empty());
    }

    #[tokio::test]
    async fn owned_stale_service_is_updated() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_service(
            Service::new("prod", "web").with_metadata([("owner", "cnwan"), ("team", "net")]),
        );

        let desired = Service::new("prod", "web").with_metadata([("team", "video")]);
        let (serv, outcome) = broker(&reg)
            .reconcile_service(Some(desired))
            .await
            .expect("manage");
        assert_eq!(outcome, Outcome::Updated);
        assert_eq!(serv.metadata.get("team").map(String::as_str), Some("video"));
        assert_eq!(serv.metadata.get("owner").map(String::as_str), Some("cnwan"));
        assert_eq!(reg.mutations().len(), 1);
        assert_eq!(reg.mutations()[0].op, CallOp::Update);
    }

    #[tokio::test]
    async fn user_metadata_cannot_override_tag() {
        let reg = Arc::new(MemoryRegistry::new());
        let sneaky = Namespace::new("prod").with_metadata([("owner", "someone-else")]);
        let ns = broker(&reg).manage_ns(Some(sneaky)).await.expect("manage");
        assert_eq!(ns.metadata.get("owner").map(String::as_str), Some("cnwan"));
    }

    #[tokio::test]
    async fn endpoint_follows_same_state_machine() {
        let reg = Arc::new(MemoryRegistry::new());
        let b = broker(&reg);
        let (_, first) = b.reconcile_endpoint(Some(web_endpoint())).await.expect("first");
        let (_, second) = b.reconcile_endpoint(Some(web_endpoint())).await.expect("second");
        assert_eq!((first, second), (Outcome::Created, Outcome::Unchanged));
        assert_eq!(reg.mutations().len(), 1);
    }

    // -- Errors

    #[tokio::test]
    async fn fetch_error_stops_reconciliation() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.fail_on(CallOp::Get, RecordKind::Namespace, "unavailable");
        let err = broker(&reg).manage_ns(Some(prod())).await.unwrap_err();
        assert!(matches!(err, SyncError::Registry(RegistryError::Backend(_))), "got: {err}");
        assert!(reg.mutations().is_empty());
    }

    #[tokio::test]
    async fn update_error_is_surfaced() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_namespace(Namespace::new("prod").with_metadata([("owner", "cnwan")]));
        reg.fail_on(CallOp::Update, RecordKind::Namespace, "quota");
        let err = broker(&reg).manage_ns(Some(prod())).await.unwrap_err();
        assert!(err.to_string().contains("quota"), "got: {err}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn slow_registry_times_out() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.set_latency(Duration::from_secs(5));
        let b = broker(&reg).with_timeout(Duration::from_millis(50));

        let err = b.manage_ns(Some(prod())).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout { op: "get", .. }), "got: {err}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_call_and_releases_lock() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.set_latency(Duration::from_secs(5));
        let (tx, rx) = watch::channel(false);
        let b = Arc::new(broker(&reg).with_shutdown(rx));

        let task = {
            let b = b.clone();
            tokio::spawn(async move { b.manage_ns(Some(prod())).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).expect("send");

        let err = task.await.expect("join").unwrap_err();
        assert!(matches!(err, SyncError::Cancelled { .. }), "got: {err}");
        assert!(b.locks.is_empty(), "lock must be released on cancellation");
    }

    // -- Concurrency

    #[tokio::test]
    async fn concurrent_passes_on_same_record_create_once() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.set_latency(Duration::from_millis(20));
        let b = broker(&reg);

        let (a, c) = tokio::join!(b.manage_ns(Some(prod())), b.manage_ns(Some(prod())));
        assert_eq!(a.expect("a"), c.expect("c"));
        assert_eq!(reg.mutations().len(), 1, "second pass must see the first create");
    }

    // -- Removal

    #[tokio::test]
    async fn remove_deletes_owned_record() {
        let reg = Arc::new(MemoryRegistry::new());
        let b = broker(&reg);
        b.manage_ns(Some(prod())).await.expect("create");
        assert_eq!(b.remove_ns("prod").await.expect("remove"), Removal::Deleted);
        assert!(reg.namespace("prod").is_none());
    }

    #[tokio::test]
    async fn remove_never_deletes_unowned_record() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_service(Service::new("prod", "web").with_metadata([("owner", "other")]));
        let removal = broker(&reg).remove_service("prod", "web").await.expect("remove");
        assert_eq!(removal, Removal::NotOwned);
        assert!(reg.mutations().is_empty());
    }

    fn tagged_endpoint(name: &str, owner: &str) -> Endpoint {
        let mut ep = web_endpoint();
        ep.name = name.into();
        ep.metadata = Metadata::from([("owner".to_string(), owner.to_string())]);
        ep
    }

    #[tokio::test]
    async fn service_holding_foreign_endpoint_is_kept() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_service(Service::new("prod", "web").with_metadata([("owner", "cnwan")]));
        reg.insert_endpoint(tagged_endpoint("web-1", "cnwan"));
        reg.insert_endpoint(tagged_endpoint("web-2", "someone-else"));

        let removal = broker(&reg).remove_service("prod", "web").await.expect("remove");
        assert_eq!(removal, Removal::HasForeignChildren);
        assert!(reg.mutations().is_empty());
        assert!(reg.service("prod", "web").is_some());
        assert_eq!(reg.endpoints().len(), 2);
    }

    #[tokio::test]
    async fn service_with_only_owned_endpoints_is_deleted() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_service(Service::new("prod", "web").with_metadata([("owner", "cnwan")]));
        reg.insert_endpoint(tagged_endpoint("web-1", "cnwan"));

        let removal = broker(&reg).remove_service("prod", "web").await.expect("remove");
        assert_eq!(removal, Removal::Deleted);
        assert!(reg.endpoints().is_empty());
    }

    #[tokio::test]
    async fn namespace_holding_foreign_service_is_kept() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_namespace(Namespace::new("prod").with_metadata([("owner", "cnwan")]));
        reg.insert_service(Service::new("prod", "web").with_metadata([("owner", "cnwan")]));
        reg.insert_service(Service::new("prod", "db").with_metadata([("owner", "ops")]));

        let removal = broker(&reg).remove_ns("prod").await.expect("remove");
        assert_eq!(removal, Removal::HasForeignChildren);
        assert!(reg.namespace("prod").is_some());
        assert!(reg.service("prod", "db").is_some());
    }

    #[tokio::test]
    async fn namespace_holding_foreign_endpoint_is_kept() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_namespace(Namespace::new("prod").with_metadata([("owner", "cnwan")]));
        reg.insert_service(Service::new("prod", "web").with_metadata([("owner", "cnwan")]));
        reg.insert_endpoint(tagged_endpoint("web-2", "someone-else"));

        let removal = broker(&reg).remove_ns("prod").await.expect("remove");
        assert_eq!(removal, Removal::HasForeignChildren);
        assert_eq!(reg.endpoints().len(), 1);
    }

    #[tokio::test]
    async fn child_listing_error_stops_removal() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_service(Service::new("prod", "web").with_metadata([("owner", "cnwan")]));
        reg.fail_on(CallOp::List, RecordKind::Endpoint, "unavailable");

        let err = broker(&reg).remove_service("prod", "web").await.unwrap_err();
        assert!(err.to_string().contains("unavailable"), "got: {err}");
        assert!(reg.service("prod", "web").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn service_removal_and_endpoint_pass_do_not_interleave() {
        let reg = Arc::new(MemoryRegistry::new());
        reg.insert_namespace(Namespace::new("prod").with_metadata([("owner", "cnwan")]));
        reg.insert_service(Service::new("prod", "web").with_metadata([("owner", "cnwan")]));
        reg.set_latency(Duration::from_millis(30));
        let b = Arc::new(broker(&reg));

        let removal = {
            let b = b.clone();
            tokio::spawn(async move { b.remove_service("prod", "web").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let pass = {
            let b = b.clone();
            tokio::spawn(async move { b.reconcile_endpoint(Some(web_endpoint())).await })
        };
        assert_eq!(removal.await.expect("join").expect("remove"), Removal::Deleted);
        pass.await.expect("join").expect("reconcile");

        let calls = reg.calls();
        let service_delete = calls
            .iter()
            .position(|c| c.kind == RecordKind::Service && c.op == CallOp::Delete)
            .expect("service delete");
        let first_endpoint_get = calls
            .iter()
            .position(|c| c.kind == RecordKind::Endpoint && c.op == CallOp::Get)
            .expect("endpoint get");
        assert!(
            first_endpoint_get > service_delete,
            "endpoint pass ran inside service removal: {calls:?}"
        );
    }

    #[tokio::test]
    async fn remove_absent_record_is_not_an_error() {
        let reg = Arc::new(MemoryRegistry::new());
        let removal = broker(&reg)
            .remove_endpoint("prod", "web", "web-1")
            .await
            .expect("remove");
        assert_eq!(removal, Removal::NotFound);
    }

    #[tokio::test]
    async fn remove_with_empty_name_fails() {
        let reg = Arc::new(MemoryRegistry::new());
        let err = broker(&reg).remove_ns("").await.unwrap_err();
        assert!(matches!(err, SyncError::NameNotProvided { .. }), "got: {err}");
        assert!(reg.calls().is_empty());
    }
}

//! YAML-on-disk registry backend.
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   namespaces/
//!     <ns>/
//!       namespace.yaml
//!       services/
//!         <serv>/
//!           service.yaml
//!           endpoints/
//!             <endpoint>.yaml
//! ```
//!
//! Directories are created with mode `0700`, files with `0600`. Every write
//! goes to a `.yaml.tmp` sibling first and is renamed into place, so readers
//! never observe a half-written record. Deleting a namespace or service
//! removes everything below it.
//!
//! All file I/O runs on tokio's blocking pool, so the store can be used from
//! any runtime flavor.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, RegistryError};
use crate::registry::ServiceRegistry;
use crate::types::{Endpoint, Namespace, RecordKind, Service};

/// A [`ServiceRegistry`] persisted as one YAML file per record.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    root: PathBuf,
}

impl FileRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<home>/.cnwan/registry`
    pub fn default_root_at(home: &Path) -> PathBuf {
        home.join(".cnwan").join("registry")
    }

    /// Store rooted at `~/.cnwan/registry`.
    pub fn at_home() -> Result<Self, RegistryError> {
        let home = dirs::home_dir().ok_or(RegistryError::HomeNotFound)?;
        Ok(Self::new(Self::default_root_at(&home)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -----------------------------------------------------------------------
    // Path helpers (pure, no I/O)
    // -----------------------------------------------------------------------

    fn namespaces_dir(&self) -> PathBuf {
        self.root.join("namespaces")
    }

    fn namespace_dir(&self, ns: &str) -> PathBuf {
        self.namespaces_dir().join(ns)
    }

    pub fn namespace_path(&self, ns: &str) -> PathBuf {
        self.namespace_dir(ns).join("namespace.yaml")
    }

    fn service_dir(&self, ns: &str, serv: &str) -> PathBuf {
        self.namespace_dir(ns).join("services").join(serv)
    }

    pub fn service_path(&self, ns: &str, serv: &str) -> PathBuf {
        self.service_dir(ns, serv).join("service.yaml")
    }

    fn endpoints_dir(&self, ns: &str, serv: &str) -> PathBuf {
        self.service_dir(ns, serv).join("endpoints")
    }

    pub fn endpoint_path(&self, ns: &str, serv: &str, name: &str) -> PathBuf {
        self.endpoints_dir(ns, serv).join(format!("{name}.yaml"))
    }

    /// Run blocking store I/O on the runtime's blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&FileRegistry) -> Result<T, RegistryError> + Send + 'static,
    {
        let reg = self.clone();
        tokio::task::spawn_blocking(move || f(&reg))
            .await
            .map_err(|e| RegistryError::Backend(format!("store task failed: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// Blocking operations
// ---------------------------------------------------------------------------

impl FileRegistry {
    fn read_namespaces(&self) -> Result<Vec<Namespace>, RegistryError> {
        let mut out = Vec::new();
        for name in subdir_names(&self.namespaces_dir())? {
            if let Some(ns) = load(&self.namespace_path(&name))? {
                out.push(ns);
            }
        }
        Ok(out)
    }

    fn read_services(&self, ns: &str) -> Result<Vec<Service>, RegistryError> {
        check_name(RecordKind::Namespace, ns)?;
        let mut out = Vec::new();
        for name in subdir_names(&self.namespace_dir(ns).join("services"))? {
            if let Some(serv) = load(&self.service_path(ns, &name))? {
                out.push(serv);
            }
        }
        Ok(out)
    }

    fn read_endpoints(&self, ns: &str, serv: &str) -> Result<Vec<Endpoint>, RegistryError> {
        check_name(RecordKind::Namespace, ns)?;
        check_name(RecordKind::Service, serv)?;
        let dir = self.endpoints_dir(ns, serv);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut files: Vec<_> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "yaml"))
            .collect();
        files.sort();

        let mut out = Vec::new();
        for path in files {
            if let Some(ep) = load(&path)? {
                out.push(ep);
            }
        }
        Ok(out)
    }

    fn read_namespace(&self, name: &str) -> Result<Namespace, RegistryError> {
        check_name(RecordKind::Namespace, name)?;
        load(&self.namespace_path(name))?
            .ok_or_else(|| RegistryError::not_found(RecordKind::Namespace, name))
    }

    fn write_namespace(&self, ns: &Namespace, create: bool) -> Result<(), RegistryError> {
        check_name(RecordKind::Namespace, &ns.name)?;
        let path = self.namespace_path(&ns.name);
        check_presence(&path, create, RecordKind::Namespace, &ns.name)?;
        save(&path, ns)?;
        tracing::debug!(path = %path.display(), "namespace stored");
        Ok(())
    }

    fn read_service(&self, ns: &str, name: &str) -> Result<Service, RegistryError> {
        check_name(RecordKind::Namespace, ns)?;
        check_name(RecordKind::Service, name)?;
        load(&self.service_path(ns, name))?
            .ok_or_else(|| RegistryError::not_found(RecordKind::Service, name))
    }

    fn write_service(&self, serv: &Service, create: bool) -> Result<(), RegistryError> {
        check_name(RecordKind::Namespace, &serv.ns_name)?;
        check_name(RecordKind::Service, &serv.name)?;
        if !self.namespace_path(&serv.ns_name).exists() {
            return Err(RegistryError::not_found(RecordKind::Namespace, &serv.ns_name));
        }
        let path = self.service_path(&serv.ns_name, &serv.name);
        check_presence(&path, create, RecordKind::Service, &serv.name)?;
        save(&path, serv)?;
        tracing::debug!(path = %path.display(), "service stored");
        Ok(())
    }

    fn read_endpoint(&self, ns: &str, serv: &str, name: &str) -> Result<Endpoint, RegistryError> {
        check_name(RecordKind::Namespace, ns)?;
        check_name(RecordKind::Service, serv)?;
        check_name(RecordKind::Endpoint, name)?;
        load(&self.endpoint_path(ns, serv, name))?
            .ok_or_else(|| RegistryError::not_found(RecordKind::Endpoint, name))
    }

    fn write_endpoint(&self, ep: &Endpoint, create: bool) -> Result<(), RegistryError> {
        check_name(RecordKind::Namespace, &ep.ns_name)?;
        check_name(RecordKind::Service, &ep.serv_name)?;
        check_name(RecordKind::Endpoint, &ep.name)?;
        if !self.service_path(&ep.ns_name, &ep.serv_name).exists() {
            return Err(RegistryError::not_found(RecordKind::Service, &ep.serv_name));
        }
        let path = self.endpoint_path(&ep.ns_name, &ep.serv_name, &ep.name);
        check_presence(&path, create, RecordKind::Endpoint, &ep.name)?;
        save(&path, ep)?;
        tracing::debug!(path = %path.display(), "endpoint stored");
        Ok(())
    }

    fn remove_endpoint_file(&self, ns: &str, serv: &str, name: &str) -> Result<(), RegistryError> {
        check_name(RecordKind::Namespace, ns)?;
        check_name(RecordKind::Service, serv)?;
        check_name(RecordKind::Endpoint, name)?;
        let path = self.endpoint_path(ns, serv, name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RegistryError::not_found(RecordKind::Endpoint, name))
            }
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

#[async_trait]
impl ServiceRegistry for FileRegistry {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, RegistryError> {
        let name = name.to_string();
        self.blocking(move |reg| reg.read_namespace(&name)).await
    }

    async fn create_namespace(&self, ns: &Namespace) -> Result<Namespace, RegistryError> {
        let ns = ns.clone();
        self.blocking(move |reg| reg.write_namespace(&ns, true).map(|()| ns))
            .await
    }

    async fn update_namespace(&self, ns: &Namespace) -> Result<Namespace, RegistryError> {
        let ns = ns.clone();
        self.blocking(move |reg| reg.write_namespace(&ns, false).map(|()| ns))
            .await
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), RegistryError> {
        let name = name.to_string();
        self.blocking(move |reg| {
            check_name(RecordKind::Namespace, &name)?;
            remove_tree(&reg.namespace_dir(&name), RecordKind::Namespace, &name)
        })
        .await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, RegistryError> {
        self.blocking(|reg| reg.read_namespaces()).await
    }

    async fn get_service(&self, ns_name: &str, name: &str) -> Result<Service, RegistryError> {
        let (ns_name, name) = (ns_name.to_string(), name.to_string());
        self.blocking(move |reg| reg.read_service(&ns_name, &name))
            .await
    }

    async fn create_service(&self, serv: &Service) -> Result<Service, RegistryError> {
        let serv = serv.clone();
        self.blocking(move |reg| reg.write_service(&serv, true).map(|()| serv))
            .await
    }

    async fn update_service(&self, serv: &Service) -> Result<Service, RegistryError> {
        let serv = serv.clone();
        self.blocking(move |reg| reg.write_service(&serv, false).map(|()| serv))
            .await
    }

    async fn delete_service(&self, ns_name: &str, name: &str) -> Result<(), RegistryError> {
        let (ns_name, name) = (ns_name.to_string(), name.to_string());
        self.blocking(move |reg| {
            check_name(RecordKind::Namespace, &ns_name)?;
            check_name(RecordKind::Service, &name)?;
            remove_tree(&reg.service_dir(&ns_name, &name), RecordKind::Service, &name)
        })
        .await
    }

    async fn list_services(&self, ns_name: &str) -> Result<Vec<Service>, RegistryError> {
        let ns_name = ns_name.to_string();
        self.blocking(move |reg| reg.read_services(&ns_name)).await
    }

    async fn get_endpoint(
        &self,
        ns_name: &str,
        serv_name: &str,
        name: &str,
    ) -> Result<Endpoint, RegistryError> {
        let (ns_name, serv_name, name) =
            (ns_name.to_string(), serv_name.to_string(), name.to_string());
        self.blocking(move |reg| reg.read_endpoint(&ns_name, &serv_name, &name))
            .await
    }

    async fn create_endpoint(&self, ep: &Endpoint) -> Result<Endpoint, RegistryError> {
        let ep = ep.clone();
        self.blocking(move |reg| reg.write_endpoint(&ep, true).map(|()| ep))
            .await
    }

    async fn update_endpoint(&self, ep: &Endpoint) -> Result<Endpoint, RegistryError> {
        let ep = ep.clone();
        self.blocking(move |reg| reg.write_endpoint(&ep, false).map(|()| ep))
            .await
    }

    async fn delete_endpoint(
        &self,
        ns_name: &str,
        serv_name: &str,
        name: &str,
    ) -> Result<(), RegistryError> {
        let (ns_name, serv_name, name) =
            (ns_name.to_string(), serv_name.to_string(), name.to_string());
        self.blocking(move |reg| reg.remove_endpoint_file(&ns_name, &serv_name, &name))
            .await
    }

    async fn list_endpoints(
        &self,
        ns_name: &str,
        serv_name: &str,
    ) -> Result<Vec<Endpoint>, RegistryError> {
        let (ns_name, serv_name) = (ns_name.to_string(), serv_name.to_string());
        self.blocking(move |reg| reg.read_endpoints(&ns_name, &serv_name))
            .await
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn check_name(kind: RecordKind, name: &str) -> Result<(), RegistryError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if bad {
        return Err(RegistryError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// `create` requires `path` to be absent, an update requires it present.
fn check_presence(
    path: &Path,
    create: bool,
    kind: RecordKind,
    name: &str,
) -> Result<(), RegistryError> {
    match (create, path.exists()) {
        (true, true) => Err(RegistryError::already_exists(kind, name)),
        (false, false) => Err(RegistryError::not_found(kind, name)),
        _ => Ok(()),
    }
}

/// Read and parse a record; `Ok(None)` when the file does not exist.
fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, RegistryError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Atomically write `value` to `path`: `.yaml.tmp` sibling → `chmod 0600` →
/// `rename`.
fn save<T: Serialize>(path: &Path, value: &T) -> Result<(), RegistryError> {
    if let Some(dir) = path.parent() {
        ensure_dir(dir)?;
    }
    let yaml = serde_yaml::to_string(value)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<(), RegistryError> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    set_dir_permissions(dir)
}

fn remove_tree(dir: &Path, kind: RecordKind, name: &str) -> Result<(), RegistryError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(RegistryError::not_found(kind, name))
        }
        Err(e) => Err(io_err(dir, e)),
    }
}

fn subdir_names(dir: &Path) -> Result<Vec<String>, RegistryError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileRegistry) {
        let dir = TempDir::new().expect("tempdir");
        let reg = FileRegistry::new(dir.path().join("registry"));
        (dir, reg)
    }

    #[test]
    fn paths_follow_layout() {
        let reg = FileRegistry::new("/r");
        assert!(reg
            .endpoint_path("prod", "web", "web-abc")
            .ends_with("namespaces/prod/services/web/endpoints/web-abc.yaml"));
        assert!(reg.namespace_path("prod").ends_with("namespaces/prod/namespace.yaml"));
    }

    #[tokio::test]
    async fn namespace_save_and_load() {
        let (_dir, reg) = store();
        let ns = Namespace::new("prod").with_metadata([("env", "prod")]);
        reg.create_namespace(&ns).await.expect("create");
        assert_eq!(reg.get_namespace("prod").await.expect("get"), ns);
    }

    #[tokio::test]
    async fn atomic_write_cleans_up_tmp() {
        let (_dir, reg) = store();
        reg.create_namespace(&Namespace::new("prod")).await.expect("create");
        let tmp = reg.namespace_path("prod").with_extension("yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn record_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, reg) = store();
        reg.create_namespace(&Namespace::new("prod")).await.expect("create");
        let mode = std::fs::metadata(reg.namespace_path("prod"))
            .expect("meta")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn service_requires_namespace() {
        let (_dir, reg) = store();
        let err = reg.create_service(&Service::new("prod", "web")).await.unwrap_err();
        assert!(
            matches!(err, RegistryError::NotFound { kind: RecordKind::Namespace, .. }),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let (_dir, reg) = store();
        let err = reg.update_namespace(&Namespace::new("prod")).await.unwrap_err();
        assert!(err.is_not_found(), "got: {err}");
    }

    #[tokio::test]
    async fn path_separator_in_name_is_rejected() {
        let (_dir, reg) = store();
        let err = reg.get_namespace("../etc").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn list_empty_store() {
        let (_dir, reg) = store();
        assert!(reg.list_namespaces().await.expect("list").is_empty());
        assert!(reg.list_endpoints("prod", "web").await.expect("list").is_empty());
    }
}

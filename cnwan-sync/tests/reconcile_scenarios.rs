use std::sync::Arc;

use cnwan_core::{
    CallOp, Endpoint, FileRegistry, MemoryRegistry, Metadata, Namespace, OwnershipTag,
    RecordKind, Service, ServiceRegistry,
};
use cnwan_sync::{
    extract, sync_workload, Broker, BrokerSettings, NamespaceObject, Outcome, Removal,
    ServiceObject, ServicePort,
};
use tempfile::TempDir;

fn settings() -> BrokerSettings {
    BrokerSettings::new(OwnershipTag::new("owner", "cnwan"))
}

fn prod() -> Namespace {
    Namespace::new("prod").with_metadata([("env", "prod")])
}

fn metadata(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn scenario_a_empty_registry_creates_tagged_namespace() {
    let reg = Arc::new(MemoryRegistry::new());
    let broker = Broker::with_registry(reg.clone(), settings());

    let ns = broker.manage_ns(Some(prod())).await.expect("manage");

    let mutations = reg.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].op, CallOp::Create);
    let stored = reg.namespace("prod").expect("stored");
    assert_eq!(stored.metadata, metadata(&[("env", "prod"), ("owner", "cnwan")]));
    assert_eq!(ns, stored);
}

#[tokio::test]
async fn scenario_b_reconciling_again_changes_nothing() {
    let reg = Arc::new(MemoryRegistry::new());
    let broker = Broker::with_registry(reg.clone(), settings());
    let created = broker.manage_ns(Some(prod())).await.expect("first");
    reg.clear_calls();

    let again = broker.manage_ns(Some(prod())).await.expect("second");
    assert_eq!(again, created);
    assert!(reg.mutations().is_empty());
}

#[tokio::test]
async fn scenario_c_foreign_namespace_is_left_alone() {
    let reg = Arc::new(MemoryRegistry::new());
    let foreign = Namespace::new("prod").with_metadata([("owner", "someone-else")]);
    reg.insert_namespace(foreign.clone());
    let broker = Broker::with_registry(reg.clone(), settings());

    let ns = broker.manage_ns(Some(prod())).await.expect("no error");
    assert_eq!(ns, foreign);
    assert!(reg.mutations().is_empty());
}

#[test]
fn scenario_d_duplicate_addresses_yield_identical_endpoint_names() {
    let ns = NamespaceObject {
        name: "prod".into(),
        annotations: None,
    };
    let web = ServiceObject {
        name: "web".into(),
        ports: vec![ServicePort {
            port: 80,
            ..Default::default()
        }],
        external_ips: vec!["10.0.0.1".into(), "10.0.0.1".into()],
        ..Default::default()
    };

    let out = extract(Some(&ns), Some(&web)).expect("extract");
    assert_eq!(out.endpoints.len(), 2);
    assert_eq!(out.endpoints[0].name, out.endpoints[1].name);
}

#[tokio::test]
async fn metadata_order_does_not_trigger_update() {
    let reg = Arc::new(MemoryRegistry::new());
    reg.insert_namespace(
        Namespace::new("prod").with_metadata([("owner", "cnwan"), ("b", "2"), ("a", "1")]),
    );
    let broker = Broker::with_registry(reg.clone(), settings());

    let (_, outcome) = broker
        .reconcile_ns(Some(Namespace::new("prod").with_metadata([("a", "1"), ("b", "2")])))
        .await
        .expect("manage");
    assert_eq!(outcome, Outcome::Unchanged);
    assert!(reg.mutations().is_empty());
}

#[tokio::test]
async fn workload_lands_in_file_registry() {
    let dir = TempDir::new().expect("tempdir");
    let reg = Arc::new(FileRegistry::new(dir.path()));
    let broker = Broker::with_registry(reg.clone(), settings());

    let ns = NamespaceObject {
        name: "prod".into(),
        annotations: Some(metadata(&[("env", "prod")])),
    };
    let web = ServiceObject {
        name: "web".into(),
        annotations: Some(metadata(&[("traffic", "video")])),
        ports: vec![ServicePort {
            port: 443,
            ..Default::default()
        }],
        external_ips: vec!["10.0.0.1".into()],
        load_balancer_ips: vec!["34.1.2.3".into()],
    };

    let report = sync_workload(&broker, Some(&ns), Some(&web))
        .await
        .expect("sync");
    assert_eq!(report.count(Outcome::Created), 4);

    let serv = reg.get_service("prod", "web").await.expect("service");
    assert_eq!(serv.metadata, metadata(&[("traffic", "video"), ("owner", "cnwan")]));
    let endpoints = reg.list_endpoints("prod", "web").await.expect("list");
    assert_eq!(endpoints.len(), 2);
    assert!(endpoints.iter().all(|e| e.metadata.get("owner").is_some()));

    let again = sync_workload(&broker, Some(&ns), Some(&web))
        .await
        .expect("resync");
    assert_eq!(again.count(Outcome::Unchanged), 4);
    assert!(again.records.iter().any(|r| r.kind == RecordKind::Endpoint));
}

#[tokio::test]
async fn file_store_namespace_with_foreign_service_survives_removal() {
    let dir = TempDir::new().expect("tempdir");
    let reg = Arc::new(FileRegistry::new(dir.path()));
    reg.create_namespace(&Namespace::new("prod").with_metadata([("owner", "cnwan")]))
        .await
        .expect("ns");
    reg.create_service(&Service::new("prod", "db").with_metadata([("owner", "ops")]))
        .await
        .expect("db");
    let broker = Broker::with_registry(reg.clone(), settings());

    let removal = broker.remove_ns("prod").await.expect("remove");
    assert_eq!(removal, Removal::HasForeignChildren);
    assert!(reg.get_namespace("prod").await.is_ok());
    assert!(reg.get_service("prod", "db").await.is_ok());
}

#[tokio::test]
async fn file_store_service_with_foreign_endpoint_survives_removal() {
    let dir = TempDir::new().expect("tempdir");
    let reg = Arc::new(FileRegistry::new(dir.path()));
    reg.create_namespace(&Namespace::new("prod")).await.expect("ns");
    reg.create_service(&Service::new("prod", "web").with_metadata([("owner", "cnwan")]))
        .await
        .expect("web");
    reg.create_endpoint(&Endpoint {
        name: "web-manual".into(),
        ns_name: "prod".into(),
        serv_name: "web".into(),
        address: "10.9.9.9".into(),
        port: 80,
        metadata: metadata(&[("owner", "someone-else")]),
    })
    .await
    .expect("endpoint");
    let broker = Broker::with_registry(reg.clone(), settings());

    let removal = broker.remove_service("prod", "web").await.expect("remove");
    assert_eq!(removal, Removal::HasForeignChildren);
    assert!(reg.get_endpoint("prod", "web", "web-manual").await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_store_never_orphans_endpoints_under_removed_service() {
    let dir = TempDir::new().expect("tempdir");
    let reg = Arc::new(FileRegistry::new(dir.path()));
    let broker = Arc::new(Broker::with_registry(reg.clone(), settings()));
    broker.manage_ns(Some(prod())).await.expect("ns");
    broker
        .manage_service(Some(Service::new("prod", "web")))
        .await
        .expect("web");

    let mut tasks = Vec::new();
    for i in 0..8u16 {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            let ep = Endpoint {
                name: format!("web-{i}"),
                ns_name: "prod".into(),
                serv_name: "web".into(),
                address: "10.0.0.1".into(),
                port: 8000 + i,
                metadata: Metadata::new(),
            };
            // Fails with NotFound once the service is gone.
            let _ = broker.manage_endpoint(Some(ep)).await;
        }));
    }
    let removal = broker.remove_service("prod", "web").await.expect("remove");
    for task in tasks {
        task.await.expect("join");
    }

    assert_eq!(removal, Removal::Deleted);
    assert!(reg.list_endpoints("prod", "web").await.expect("list").is_empty());
    let service_dir = dir.path().join("namespaces/prod/services/web");
    assert!(!service_dir.exists(), "left behind: {}", service_dir.display());
}

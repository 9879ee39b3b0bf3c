//! Drives a real daemon over its Unix socket inside a temporary home.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use steward_adapter::{AdapterRegistry, FixedFactory, InMemoryAdapter};
use steward_core::{snapshot, AdapterKind, EntityType, OrgId, TokenKey};
use steward_daemon::paths::socket_path;
use steward_daemon::{
    bootstrap, request_run, request_status, request_stop, run, DaemonError, DaemonRequest,
};
use steward_sync::MemorySink;

fn pull_person(adapter: &str) -> DaemonRequest {
    DaemonRequest::Sync {
        adapter: adapter.to_string(),
        org_id: OrgId::from("org_grace"),
        token_key: TokenKey::from("tok_1"),
        entities: Some(vec![EntityType::from("person")]),
    }
}

async fn blocking<T, F>(home: PathBuf, call: F) -> T
where
    T: Send + 'static,
    F: FnOnce(PathBuf) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(home))
        .await
        .expect("blocking client call")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_serves_runs_over_the_socket_and_snapshots_on_stop() {
    let home = TempDir::new().expect("home");
    let adapter = Arc::new(InMemoryAdapter::new(AdapterKind::Pco));
    adapter.seed("person", "1", json!({ "first_name": "Ada" }));
    let adapters = AdapterRegistry::new().with(Arc::new(FixedFactory::new(adapter.clone())));
    let sink = Arc::new(MemorySink::new());

    let (services, store) = bootstrap(home.path(), adapters, sink.clone()).expect("bootstrap");
    let daemon = tokio::spawn(run(home.path().to_path_buf(), services, store));

    let status = blocking(home.path().to_path_buf(), |h| request_status(&h))
        .await
        .expect("status");
    assert_eq!(status["running"], json!(true));
    assert_eq!(status["links"], json!(0));

    let first = blocking(home.path().to_path_buf(), |h| {
        request_run(&h, &pull_person("pco"))
    })
    .await
    .expect("first pull");
    assert_eq!(first["adapter"], json!("pco"));
    assert_eq!(first["result"]["submission"], json!("completed"));
    assert_eq!(first["result"]["detail"]["workflow"], json!("pull"));
    assert_eq!(first["result"]["detail"]["entities"][0]["created"], json!(1));
    assert_eq!(sink.len(), 1);

    let replay = blocking(home.path().to_path_buf(), |h| {
        request_run(&h, &pull_person("pco"))
    })
    .await
    .expect("replayed pull");
    assert_eq!(replay["result"]["submission"], json!("duplicate"));

    let unknown = blocking(home.path().to_path_buf(), |h| {
        request_run(&h, &pull_person("salesforce"))
    })
    .await
    .expect_err("unknown adapter");
    match unknown {
        DaemonError::Protocol(message) => {
            assert!(message.contains("salesforce"), "{message}");
            assert!(message.starts_with("[unsupported_adapter]"), "{message}");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let status: Value = blocking(home.path().to_path_buf(), |h| request_status(&h))
        .await
        .expect("status after runs");
    assert_eq!(status["links"], json!(1));
    assert_eq!(status["syncing"], json!(0));
    assert_eq!(status["recent_runs"].as_array().map(Vec::len), Some(1));
    assert_eq!(status["recent_runs"][0]["state"], json!("succeeded"));

    blocking(home.path().to_path_buf(), |h| request_stop(&h))
        .await
        .expect("stop");
    daemon
        .await
        .expect("daemon task")
        .expect("daemon exits cleanly");

    assert!(!socket_path(home.path()).exists(), "socket removed on exit");
    let saved = snapshot::load_at(home.path()).expect("snapshot");
    assert_eq!(saved.links.len(), 1);
    assert_eq!(saved.links[0].external_id.as_str(), "1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_restores_links_from_the_previous_snapshot() {
    let home = TempDir::new().expect("home");
    let adapter = Arc::new(InMemoryAdapter::new(AdapterKind::Pco));
    adapter.seed("person", "1", json!({ "first_name": "Ada" }));

    for round in 0..2 {
        let adapters = AdapterRegistry::new().with(Arc::new(FixedFactory::new(adapter.clone())));
        let (services, store) =
            bootstrap(home.path(), adapters, Arc::new(MemorySink::new())).expect("bootstrap");
        let daemon = tokio::spawn(run(home.path().to_path_buf(), services, store));

        let status = blocking(home.path().to_path_buf(), |h| request_status(&h))
            .await
            .expect("status");
        assert_eq!(status["links"], json!(round));

        if round == 0 {
            blocking(home.path().to_path_buf(), |h| {
                request_run(&h, &pull_person("pco"))
            })
            .await
            .expect("pull");
        }

        blocking(home.path().to_path_buf(), |h| request_stop(&h))
            .await
            .expect("stop");
        daemon.await.expect("join").expect("clean exit");
    }
}

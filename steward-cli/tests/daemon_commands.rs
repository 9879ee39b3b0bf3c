use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::json;
use tempfile::TempDir;

use steward_adapter::{AdapterRegistry, FixedFactory, InMemoryAdapter};
use steward_core::AdapterKind;
use steward_daemon::{bootstrap, run};
use steward_sync::MemorySink;

fn steward_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("steward"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

/// Run the binary off the async runtime so the in-process daemon keeps serving.
async fn steward(home: &Path, args: &[&str]) -> Output {
    let home: PathBuf = home.to_path_buf();
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    tokio::task::spawn_blocking(move || {
        steward_cmd(&home)
            .args(&args)
            .output()
            .expect("run steward")
    })
    .await
    .expect("join")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");

    let assert = steward_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success();
    let status: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("status JSON");
    assert_eq!(status["running"], json!(false));

    steward_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn sync_without_daemon_fails_with_hint() {
    let home = TempDir::new().expect("home");

    steward_cmd(home.path())
        .args(["sync", "--adapter", "pco", "--org", "org_1", "--token", "tok"])
        .assert()
        .failure()
        .stderr(contains("daemon is not running"));
}

#[test]
fn push_rejects_an_empty_batch() {
    let home = TempDir::new().expect("home");
    let file = home.path().join("mutations.json");
    std::fs::write(&file, "[]").expect("write mutations");

    steward_cmd(home.path())
        .args(["push", "--adapter", "pco", "--org", "org_1", "--token", "tok"])
        .args(["--entity", "person", "--file"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(contains("contains no mutations"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commands_drive_a_running_daemon() {
    let home = TempDir::new().expect("home");
    let adapter = Arc::new(InMemoryAdapter::new(AdapterKind::Pco));
    adapter.seed("person", "1", json!({ "first_name": "Ada" }));
    let adapters = AdapterRegistry::new().with(Arc::new(FixedFactory::new(adapter.clone())));
    let (services, store) =
        bootstrap(home.path(), adapters, Arc::new(MemorySink::new())).expect("bootstrap");
    let daemon = tokio::spawn(run(home.path().to_path_buf(), services, store));

    let status = steward(home.path(), &["daemon", "status"]).await;
    assert!(status.status.success());
    let payload: serde_json::Value = serde_json::from_slice(&status.stdout).expect("status JSON");
    assert_eq!(payload["running"], json!(true));
    assert_eq!(payload["adapters"], json!(["pco"]));

    let target = ["--adapter", "pco", "--org", "org_grace", "--token", "tok_1"];
    let mut pull = vec!["sync", "--entity", "person"];
    pull.extend(target);
    let synced = steward(home.path(), &pull).await;
    assert!(synced.status.success(), "{}", String::from_utf8_lossy(&synced.stderr));
    assert!(stdout(&synced).contains("pco / org_grace: completed"));
    assert!(stdout(&synced).contains("person: 1 fetched, 1 created"));

    let again = steward(home.path(), &pull).await;
    assert!(again.status.success());
    assert!(stdout(&again).contains("already succeeded"));

    let mut delete = vec![
        "webhook",
        "--event-type",
        "people.v2.events.person.destroyed",
        "--external-id",
        "1",
        "--delete",
    ];
    delete.extend(target);
    let unlinked = steward(home.path(), &delete).await;
    assert!(unlinked.status.success(), "{}", String::from_utf8_lossy(&unlinked.stderr));
    assert!(stdout(&unlinked).contains("unlinked per_"));

    let stopped = steward(home.path(), &["daemon", "stop"]).await;
    assert!(stopped.status.success());
    daemon.await.expect("join").expect("clean exit");

    let links = steward(home.path(), &["links", "--json"]).await;
    let saved: Vec<serde_json::Value> = serde_json::from_slice(&links.stdout).expect("links JSON");
    assert!(saved.is_empty(), "deleted link stays deleted after restart");
}

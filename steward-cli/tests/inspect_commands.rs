use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use chrono::{Duration, Utc};
use predicates::str::contains;

use steward_core::{
    snapshot, AdapterKind, EntityId, EntityRelationship, EntityType, ExternalId, ExternalLink,
    OrgId, StoreSnapshot,
};

fn steward_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("steward"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn link(org: &str, external_id: &str, syncing: bool, age: Duration) -> ExternalLink {
    let mut link = ExternalLink::new(
        OrgId::from(org),
        AdapterKind::Pco,
        EntityType::from("person"),
        EntityId::from(format!("per_{external_id}").as_str()),
        ExternalId::from(external_id),
        Utc::now() - age,
    );
    link.syncing = syncing;
    link
}

fn seed_snapshot(home: &TempDir) {
    let relationships = vec![EntityRelationship {
        org_id: OrgId::from("org_grace"),
        source_entity_type: EntityType::from("person"),
        target_entity_types: ["household", "email"]
            .into_iter()
            .map(EntityType::from)
            .collect::<BTreeSet<_>>(),
        updated_at: Utc::now(),
    }];
    let snapshot = StoreSnapshot::new(
        vec![
            link("org_grace", "1", false, Duration::minutes(1)),
            link("org_grace", "2", true, Duration::hours(2)),
            link("org_hope", "9", false, Duration::minutes(1)),
        ],
        relationships,
    );
    snapshot::save_at(home.path(), &snapshot).expect("save snapshot");
}

#[test]
fn links_json_filters_by_org() {
    let home = TempDir::new().expect("home");
    seed_snapshot(&home);

    let assert = steward_cmd(home.path())
        .args(["links", "--org", "org_grace", "--json"])
        .assert()
        .success();
    let links: Vec<serde_json::Value> =
        serde_json::from_slice(&assert.get_output().stdout).expect("links JSON");

    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|l| l["org_id"] == "org_grace"));
    assert_eq!(links[0]["external_id"], "1");
    assert_eq!(links[0]["adapter"], "pco");
}

#[test]
fn links_table_marks_stuck_claims() {
    let home = TempDir::new().expect("home");
    seed_snapshot(&home);

    steward_cmd(home.path())
        .arg("links")
        .assert()
        .success()
        .stdout(contains("3 links | 1 syncing | 1 stuck"))
        .stdout(contains("STUCK"))
        .stdout(contains("per_2"));
}

#[test]
fn links_on_a_fresh_home_are_empty() {
    let home = TempDir::new().expect("home");

    steward_cmd(home.path())
        .arg("links")
        .assert()
        .success()
        .stdout(contains("No links recorded."));
}

#[test]
fn unknown_adapter_filter_is_a_usage_error() {
    let home = TempDir::new().expect("home");

    steward_cmd(home.path())
        .args(["links", "--adapter", "salesforce"])
        .assert()
        .failure()
        .stderr(contains("expected one of: pco, ccb"));
}

#[test]
fn stuck_honours_configured_threshold() {
    let home = TempDir::new().expect("home");
    seed_snapshot(&home);

    let assert = steward_cmd(home.path())
        .args(["stuck", "--json"])
        .assert()
        .success();
    let stuck: Vec<serde_json::Value> =
        serde_json::from_slice(&assert.get_output().stdout).expect("stuck JSON");
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0]["external_id"], "2");
    assert_eq!(stuck[0]["age"], "2h");

    home.child(".steward/config.yaml")
        .write_str("stale_after_secs: 86400\n")
        .expect("write config");
    steward_cmd(home.path())
        .arg("stuck")
        .assert()
        .success()
        .stdout(contains("no claims older than 1d"));
}

#[test]
fn relationships_lists_targets_for_org() {
    let home = TempDir::new().expect("home");
    seed_snapshot(&home);

    steward_cmd(home.path())
        .args(["relationships", "--org", "org_grace"])
        .assert()
        .success()
        .stdout(contains("person"))
        .stdout(contains("email, household"));

    steward_cmd(home.path())
        .args(["relationships", "--org", "org_hope"])
        .assert()
        .success()
        .stdout(contains("No relationships recorded for 'org_hope'."));
}

#[test]
fn config_prints_defaults_merged_with_file() {
    let home = TempDir::new().expect("home");
    home.child(".steward/config.yaml")
        .write_str("page_size: 25\n")
        .expect("write config");

    let assert = steward_cmd(home.path()).arg("config").assert().success();
    let settings: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("config JSON");
    assert_eq!(settings["page_size"], 25);
    assert_eq!(settings["record_concurrency"], 8);
    assert_eq!(settings["retry"]["max_attempts"], 3);
}

#[test]
fn malformed_config_names_the_file() {
    let home = TempDir::new().expect("home");
    home.child(".steward/config.yaml")
        .write_str("page_size: [\n")
        .expect("write config");

    steward_cmd(home.path())
        .arg("config")
        .assert()
        .failure()
        .stderr(contains("config.yaml"));
}

#[test]
fn routes_show_manifest_endpoints() {
    let home = TempDir::new().expect("home");

    steward_cmd(home.path())
        .args(["routes", "ccb"])
        .assert()
        .success()
        .stdout(contains("individuals.individual_profiles"))
        .stdout(contains("group_participant."));

    let assert = steward_cmd(home.path())
        .args(["routes", "pco", "--json"])
        .assert()
        .success();
    let rows: Vec<serde_json::Value> =
        serde_json::from_slice(&assert.get_output().stdout).expect("routes JSON");
    let event = rows
        .iter()
        .find(|row| row["entity_type"] == "event")
        .expect("event endpoint");
    assert_eq!(event["pulled"], false);
    assert_eq!(event["methods"], "list,fetch");
}

#[test]
fn detect_resolves_known_tables_only() {
    let home = TempDir::new().expect("home");

    steward_cmd(home.path())
        .args(["detect", "people"])
        .assert()
        .success()
        .stdout(contains("people → person (ids: per_…)"));

    steward_cmd(home.path())
        .args(["detect", "invoices"])
        .assert()
        .failure()
        .stderr(contains("cannot sync table 'invoices'"));
}

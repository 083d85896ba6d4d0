//! netpolctl end-to-end

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const UID: &str = "6f1c2a4e-8d0b-4c55-9a3e-2b7d9f0c1e42";

fn write_policy(dir: &Path, namespace: Option<&str>) -> String {
    let namespace = namespace
        .map(|ns| format!(r#""namespace": "{}","#, ns))
        .unwrap_or_default();
    let policy = format!(
        r#"{{
            "kind": "NetworkPolicy",
            "metadata": {{ "name": "mixed", {namespace} "uid": "{UID}" }},
            "specs": [
                {{ "endpointSelector": {{ "matchLabels": {{ "app": "x" }} }} }},
                {{
                    "endpointSelector": {{ "matchLabels": {{ "app": "y" }} }},
                    "egress": [{{ "toGroups": [{{ "provider": "static", "attributes": {{ "name": "db" }} }}] }}]
                }}
            ]
        }}"#
    );
    let path = dir.join("policy.json");
    fs::write(&path, policy).unwrap();
    path.to_string_lossy().into_owned()
}

fn netpolctl() -> Command {
    let mut cmd = Command::cargo_bin("netpolctl").unwrap();
    cmd.env_remove("NETPOL_CONFIG").env_remove("NETPOL_LOG_LEVEL");
    cmd
}

#[test]
fn classify_lists_rule_classes() {
    let tmp = tempdir().unwrap();
    let policy = write_policy(tmp.path(), Some("prod"));

    netpolctl()
        .args(["classify", "--policy", &policy])
        .assert()
        .success()
        .stdout(predicate::str::contains("0\tplain"))
        .stdout(predicate::str::contains("1\trequires-derivation"))
        .stdout(predicate::str::contains(format!("mixed-togroups-{UID}")));
}

#[test]
fn classify_rejects_namespaceless_namespaced_policy() {
    let tmp = tempdir().unwrap();
    let policy = write_policy(tmp.path(), None);

    netpolctl()
        .args(["classify", "--policy", &policy])
        .assert()
        .failure();

    netpolctl()
        .args(["classify", "--policy", &policy, "--cluster-scoped"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1\trequires-derivation"));
}

#[test]
fn derive_without_groups_prints_partial_and_fails() {
    let tmp = tempdir().unwrap();
    let policy = write_policy(tmp.path(), Some("prod"));

    netpolctl()
        .args(["derive", "--policy", &policy])
        .assert()
        .failure()
        .stdout(predicate::str::contains(format!("mixed-togroups-{UID}")))
        .stderr(predicate::str::contains("derivation incomplete"));
}

#[test]
fn derive_with_groups_resolves_addresses() {
    let tmp = tempdir().unwrap();
    let policy = write_policy(tmp.path(), Some("prod"));
    let groups = tmp.path().join("groups.json");
    fs::write(
        &groups,
        r#"{ "static": [ { "group": { "provider": "static", "attributes": { "name": "db" } },
                           "addresses": ["10.9.8.7"] } ] }"#,
    )
    .unwrap();

    netpolctl()
        .args(["derive", "--policy", &policy, "--groups"])
        .arg(&groups)
        .assert()
        .success()
        .stdout(predicate::str::contains("10.9.8.7/32"))
        .stdout(predicate::str::contains("toGroups").not());
}

#[test]
fn status_key_uses_configured_layout() {
    netpolctl()
        .args(["status-key", "--name", "web", "--namespace", "prod", "--node", "n1"])
        .assert()
        .success()
        .stdout("netpol/state/policystatuses/v1/prod/web/n1\n");

    let tmp = tempdir().unwrap();
    let config = tmp.path().join("agent.json");
    fs::write(
        &config,
        r#"{ "status": { "node_name": "worker-7", "side_channel": { "key_prefix": "kvstore" } } }"#,
    )
    .unwrap();

    netpolctl()
        .arg("--config")
        .arg(&config)
        .args(["status-key", "--name", "global"])
        .assert()
        .success()
        .stdout("kvstore/state/policystatuses/v1/global/worker-7\n");
}

#![allow(deprecated)] // Command::cargo_bin, until the cargo_bin! migration

//! Full stack lifecycle through the binary: plan, apply, re-plan, destroy.
//! Runs against the simulated control plane, which persists its resource
//! table under the state directory, so each invocation behaves like a real
//! CLI session.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn ground(state_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ground").unwrap();
    cmd.arg("--state-dir").arg(state_dir);
    cmd
}

#[test]
fn plan_apply_replan_destroy() {
    let temp = TempDir::new().unwrap();

    // First plan: everything is a create.
    ground(temp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("10 to create"))
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::contains("service"));

    // Apply creates the whole topology and surfaces the endpoint export.
    ground(temp.path())
        .arg("apply")
        .arg("--yes")
        .assert()
        .success()
        .stdout(predicate::str::contains("endpoint_address"))
        .stdout(predicate::str::contains("service.lb.sim.internal"));

    // State shows active records with remote identifiers.
    ground(temp.path())
        .arg("state")
        .assert()
        .success()
        .stdout(predicate::str::contains("active"))
        .stdout(predicate::str::contains("sim-network-"));

    // A second plan finds nothing to do.
    ground(temp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"))
        .stdout(predicate::str::contains("10 unchanged"));

    // Destroy tears everything down again.
    ground(temp.path())
        .arg("destroy")
        .arg("--yes")
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));

    // And the next plan starts from scratch.
    ground(temp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("10 to create"));
}

#[test]
fn switching_variant_plans_a_migration() {
    let temp = TempDir::new().unwrap();

    ground(temp.path())
        .arg("apply")
        .arg("--yes")
        .assert()
        .success();

    // The sidecar variant only touches the task definition.
    ground(temp.path())
        .arg("plan")
        .arg("--blueprint")
        .arg("fargate-lb-sidecar")
        .assert()
        .success()
        .stdout(predicate::str::contains("task-definition"))
        .stdout(predicate::str::contains("1 to update"))
        .stdout(predicate::str::contains("9 unchanged"));

    // The EC2 variant reshapes the stack: shared resources change in
    // place or get replaced, the Fargate-only ones go away.
    ground(temp.path())
        .arg("plan")
        .arg("--blueprint")
        .arg("ec2-cluster")
        .assert()
        .success()
        .stdout(predicate::str::contains("to delete"));
}

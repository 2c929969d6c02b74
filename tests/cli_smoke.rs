//! CLI smoke tests.
//!
//! These run the `sp` binary against a fixture assembly. Commands that need
//! the provisioning service talk to a local mock server.

mod common;

use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

/// Get a command for running sp in `dir`.
fn sp(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sp").unwrap();
    cmd.current_dir(dir.path())
        .env("STACKPILOT_CONFIG", dir.path().join("no-global.toml"))
        .env("XDG_CONFIG_HOME", dir.path())
        .env_remove("STACKPILOT_TOKEN")
        .arg("--no-interactive");
    cmd
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let network = queue_template("https://network");
    let app = queue_template("https://app");
    write_assembly(
        &dir.path().join("stack.out"),
        &[("Network", &[], &network), ("App", &["Network"], &app)],
    );
    dir
}

#[test]
fn help_flag_works() {
    Command::cargo_bin("sp")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn list_prints_stacks_in_dependency_order() {
    let dir = project();
    sp(&dir)
        .args(["list", "--long"])
        .assert()
        .success()
        .stdout(predicate::str::is_match("(?s)Network.*App .*depends on: Network").unwrap());
}

#[test]
fn unknown_pattern_exits_with_error() {
    let dir = project();
    sp(&dir)
        .args(["list", "Nope*"])
        .assert()
        .code(2)
        .stderr(predicate::str::starts_with("error:"));
}

#[test]
fn deploy_without_endpoint_exits_with_error() {
    let dir = project();
    sp(&dir)
        .arg("deploy")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no provisioning endpoint"));
}

#[test]
fn destroy_of_several_stacks_needs_a_selection() {
    let dir = project();
    sp(&dir)
        .args(["destroy", "--endpoint", "http://127.0.0.1:9"])
        .assert()
        .code(2);
}

#[test]
fn diff_fail_exits_one_when_stacks_differ() {
    let dir = project();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        // Nothing is deployed yet
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        server
    });

    sp(&dir)
        .args(["diff", "--fail", "--endpoint", &server.uri()])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[+] AWS::SQS::Queue Queue"));

    sp(&dir)
        .args(["diff", "--endpoint", &server.uri()])
        .assert()
        .success();
}

#[test]
fn deploy_writes_outputs_file() {
    let dir = project();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex("/stacks/[A-Za-z]+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "outcome": "deployed",
                "outputs": { "QueueUrl": "https://queue" },
                "stackArn": "arn:stack",
                "noOp": false
            })))
            .expect(2)
            .mount(&server)
            .await;
        server
    });

    sp(&dir)
        .args(["deploy", "--require-approval", "never", "-O", "outputs.json"])
        .args(["--endpoint", &server.uri()])
        .assert()
        .success();

    let outputs = dir.child("outputs.json");
    outputs.assert(predicate::path::exists());
    outputs.assert(predicate::str::contains("\"Network\"").and(predicate::str::contains("https://queue")));
}

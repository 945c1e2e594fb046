//! Integration tests for the `resilink` CLI binary.
//!
//! Argument parsing, offline commands, and backend commands against a
//! wiremock server. Nothing touches the user's real settings.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `resilink` binary with env isolation.
fn resilink_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("resilink");
    cmd.env("HOME", "/tmp/resilink-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/resilink-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("RESILINK_CONFIG")
        .env_remove("RESILINK_BACKEND_URL")
        .env_remove("RESILINK_ANON_KEY")
        .env_remove("RESILINK_ANON_KEY_ENV")
        .env_remove("RESILINK_PLATFORM")
        .env_remove("RESILINK_FALLBACK_MODE")
        .env_remove("RESILINK_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

/// A command pointed at `url` as a native desktop host.
fn backend_cmd(url: &str) -> assert_cmd::Command {
    let mut cmd = resilink_cmd();
    cmd.args(["--backend-url", url, "--anon-key", "anon", "--platform", "desktop"]);
    cmd
}

/// Run a blocking command from inside an async test.
async fn run(mut cmd: assert_cmd::Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

async fn probe_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/connection_test"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    server
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = resilink_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    resilink_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("ping")
            .and(predicate::str::contains("diagnose"))
            .and(predicate::str::contains("fetch"))
            .and(predicate::str::contains("limits"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    resilink_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("resilink"));
}

#[test]
fn test_invalid_output_format() {
    resilink_cmd()
        .args(["limits", "-o", "yaml"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_platform() {
    resilink_cmd()
        .args(["limits", "--platform", "toaster"])
        .assert()
        .failure();
}

// ── Limits ──────────────────────────────────────────────────────────

#[test]
fn test_limits_table() {
    resilink_cmd().arg("limits").assert().success().stdout(
        predicate::str::contains("login")
            .and(predicate::str::contains("messagePostDaily"))
            .and(predicate::str::contains("15m")),
    );
}

#[test]
fn test_limits_json() {
    let output = resilink_cmd().args(["limits", "-o", "json"]).output().unwrap();
    assert!(output.status.success());

    let limits = stdout_json(&output);
    let login = limits
        .as_array()
        .unwrap()
        .iter()
        .find(|l| l["action"] == "login")
        .unwrap();
    assert_eq!(login["requests"], 10);
    assert_eq!(login["windowSecs"], 900);
}

#[test]
fn test_simulate_login_denies_eleventh_attempt() {
    let output = resilink_cmd()
        .args(["limits", "simulate", "login", "-n", "11", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let attempts = stdout_json(&output);
    let attempts = attempts.as_array().unwrap();
    assert_eq!(attempts.len(), 11);
    assert!(attempts[..10].iter().all(|a| a["allowed"] == true));

    let last = &attempts[10];
    assert_eq!(last["allowed"], false);
    let retry_after = last["retryAfter"].as_u64().unwrap();
    assert!((1..=900).contains(&retry_after));
    assert!(last["message"].as_str().unwrap().starts_with("Too many requests"));
}

#[test]
fn test_simulate_unknown_action_is_always_allowed() {
    resilink_cmd()
        .args(["limits", "simulate", "wave", "-n", "50", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("false").not());
}

// ── Fetch ───────────────────────────────────────────────────────────

#[test]
fn test_fetch_malformed_url_prints_empty_success() {
    resilink_cmd()
        .args(["fetch", "not a url"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"error":null,"data":{}}"#));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_json_view() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .mount(&server)
        .await;

    let mut cmd = resilink_cmd();
    cmd.args(["fetch", &format!("{}/things", server.uri()), "-o", "json"]);
    let output = run(cmd).await;

    assert!(output.status.success(), "{}", combined_output(&output));
    let view = stdout_json(&output);
    assert_eq!(view["status"], 200);
    assert_eq!(view["synthesized"], false);
    assert!(view["error"].is_null());
    assert_eq!(view["body"]["ok"], true);
}

#[test]
fn test_fetch_unreachable_exits_with_connection_code() {
    let output = resilink_cmd()
        .args(["fetch", "--once", "http://127.0.0.1:9/"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
    assert!(String::from_utf8_lossy(&output.stdout).contains(r#""data":null"#));
}

#[test]
fn test_fetch_rejects_invalid_json_body() {
    let output = resilink_cmd()
        .args(["fetch", "-X", "post", "-d", "{oops", "http://127.0.0.1:9/"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Ping / diagnose ─────────────────────────────────────────────────

#[test]
fn test_ping_without_backend() {
    let output = resilink_cmd().arg("ping").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("No backend URL configured"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ping_success() {
    let server = probe_server(200).await;

    let mut cmd = backend_cmd(&server.uri());
    cmd.args(["ping", "-o", "json"]);
    let output = run(cmd).await;

    assert!(output.status.success(), "{}", combined_output(&output));
    let report = stdout_json(&output);
    assert_eq!(report["success"], true);
    assert_eq!(report["message"], "database connection succeeded");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ping_rejected_probe_fails() {
    let server = probe_server(500).await;

    let mut cmd = backend_cmd(&server.uri());
    cmd.arg("ping");
    let output = run(cmd).await;

    assert_eq!(output.status.code(), Some(7));
    assert!(combined_output(&output).contains("failed"));
}

#[test]
fn test_ping_unreachable() {
    let output = backend_cmd("http://127.0.0.1:9")
        .arg("ping")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_diagnose_json() {
    let server = probe_server(200).await;

    let mut cmd = backend_cmd(&server.uri());
    cmd.args(["diagnose", "--fallback", "-o", "json"]);
    let output = run(cmd).await;

    assert!(output.status.success(), "{}", combined_output(&output));
    let report = stdout_json(&output);
    assert_eq!(report["timedOut"], false);
    assert_eq!(report["environment"]["platform"], "desktop");
    assert_eq!(report["system"]["inFallbackMode"], true);
    assert_eq!(report["system"]["retryLimit"], 3);
    assert_eq!(report["connection"]["success"], true);
    assert_eq!(report["auth"]["hasSession"], false);
    assert!(report["auth"]["userID"].is_null());
}

#[test]
fn test_diagnose_web_skips_probe() {
    let output = backend_cmd("http://127.0.0.1:9")
        .args(["diagnose", "--platform", "web", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["environment"]["isWeb"], true);
    assert_eq!(report["connection"]["message"], "detailed diagnostics skipped on web");
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_override() {
    resilink_cmd()
        .args(["--config", "/tmp/elsewhere/settings.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/elsewhere/settings.toml"));
}

#[test]
fn test_config_init_show_and_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.toml");
    let file = file.to_str().unwrap();

    resilink_cmd()
        .args([
            "--config",
            file,
            "--backend-url",
            "https://abc.example.co",
            "--anon-key",
            "sekrit",
            "config",
            "init",
        ])
        .assert()
        .success();

    resilink_cmd()
        .args(["--config", file, "config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("abc.example.co")
                .and(predicate::str::contains("********"))
                .and(predicate::str::contains("sekrit").not()),
        );

    let output = resilink_cmd()
        .args(["--config", file, "--backend-url", "https://x.example", "config", "init"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));
}

#[test]
fn test_config_init_requires_backend_url() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.toml");

    let output = resilink_cmd()
        .args(["--config", file.to_str().unwrap(), "config", "init"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(!file.exists());
}

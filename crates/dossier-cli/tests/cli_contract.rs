use assert_cmd::prelude::*;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use predicates::prelude::*;
use std::process::Command;

fn dossier_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("dossier"));
    // Keep the ambient environment out of provider selection.
    for key in [
        "DOSSIER_ENV_FILE",
        "DOSSIER_SEARXNG_ENDPOINTS",
        "DOSSIER_SEARXNG_ENDPOINT",
        "DOSSIER_BRAVE_API_KEY",
        "BRAVE_SEARCH_API_KEY",
        "DOSSIER_BRAVE_ENDPOINT",
        "DOSSIER_OLLAMA_BASE_URL",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn version_prints_the_package_version() {
    let mut cmd = dossier_cmd();
    cmd.arg("version");
    cmd.assert().success().stdout(predicate::str::contains(
        concat!("dossier ", env!("CARGO_PKG_VERSION")),
    ));
}

#[test]
fn zero_sources_is_a_config_error_with_exit_code_2() {
    let mut cmd = dossier_cmd();
    cmd.args(["research", "--query", "rust", "--sources", "0"]);
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("sources must be between 1 and 10"));
}

#[test]
fn unknown_profile_is_rejected() {
    let mut cmd = dossier_cmd();
    cmd.args(["research", "--query", "rust", "--profile", "ludicrous"]);
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("unknown profile"));
}

#[test]
fn unconfigured_research_exits_before_touching_the_network() {
    let mut cmd = dossier_cmd();
    cmd.args(["research", "--query", "rust"]);
    cmd.assert().code(2).stderr(predicate::str::contains(
        "no search provider configured",
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn research_against_a_loopback_fixture_writes_all_artifacts() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let page = "<html><head><title>Rust Guide</title></head><body><main><p>".to_string()
        + &"Rust ownership moves values between bindings while the borrow checker enforces \
            aliasing rules across scopes and lifetimes of references. "
            .repeat(12)
        + "</p></main></body></html>";
    let search_base = base.clone();
    let app = Router::new()
        .route(
            "/search",
            get(move || async move {
                Json(serde_json::json!({
                    "results": [
                        {"url": format!("{search_base}/page/0"), "title": "Rust Guide", "content": "snippet"}
                    ]
                }))
            }),
        )
        .route("/page/0", get(move || async move { Html(page) }))
        .route(
            "/api/chat",
            post(|Json(v): Json<serde_json::Value>| async move {
                let prompt = v["messages"][0]["content"].as_str().unwrap_or_default();
                let content = if prompt.starts_with("Based on these research findings") {
                    "Executive stub summary."
                } else if prompt.starts_with("Based on this research about") {
                    "Conclusion stub."
                } else {
                    "Insight one. Insight two."
                };
                Json(serde_json::json!({
                    "message": { "role": "assistant", "content": content }
                }))
            }),
        );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let tmp = tempfile::tempdir().unwrap();
    let out_dir = tmp.path().join("artifacts");

    let mut cmd = dossier_cmd();
    cmd.env("DOSSIER_SEARXNG_ENDPOINTS", &base);
    cmd.env("DOSSIER_OLLAMA_BASE_URL", &base);
    cmd.args([
        "research",
        "--query",
        "rust ownership",
        "--sources",
        "1",
        "--render",
        "false",
        "--model",
        "stub-model",
        "--fallback-models",
        "",
        "--timeout-ms",
        "5000",
        "--now-epoch-s",
        "1700000000",
        "--out-dir",
        out_dir.to_str().unwrap(),
    ]);
    // assert_cmd blocks; keep the fixture serving on the runtime threads.
    let assert = tokio::task::spawn_blocking(move || cmd.assert().success())
        .await
        .unwrap();
    assert
        .stdout(predicate::str::contains("research_report_1700000000.txt"))
        .stdout(predicate::str::contains("research_report_1700000000.md"))
        .stdout(predicate::str::contains("research_data_1700000000.json"));

    let txt = std::fs::read_to_string(out_dir.join("research_report_1700000000.txt")).unwrap();
    assert!(txt.contains("RESEARCH REPORT: RUST OWNERSHIP"));
    assert!(txt.contains("Executive stub summary."));

    let md = std::fs::read_to_string(out_dir.join("research_report_1700000000.md")).unwrap();
    assert!(md.contains("# Research Report: rust ownership"));

    let raw = std::fs::read_to_string(out_dir.join("research_data_1700000000.json")).unwrap();
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v["query"].as_str(), Some("rust ownership"));
    assert_eq!(v["sources_analyzed"].as_u64(), Some(1));
    assert_eq!(v["generated_at_epoch_s"].as_u64(), Some(1_700_000_000));
    assert_eq!(v["findings"][0]["model_used"].as_str(), Some("stub-model"));
}

#[test]
fn doctor_json_has_the_contract_shape_and_leaks_no_secrets() {
    let mut cmd = dossier_cmd();
    // A key that must never appear in output, only as a presence boolean.
    cmd.env("DOSSIER_BRAVE_API_KEY", "sekret-abc123");
    cmd.args(["doctor", "--json", "--timeout-ms", "1500"]);

    let assert = cmd
        .assert()
        .success()
        .stdout(predicate::str::contains("sekret-abc123").not());
    let out = assert.get_output();
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("doctor json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("doctor"));
    assert_eq!(v["name"].as_str(), Some("dossier"));
    assert_eq!(v["configured"]["search"]["brave"].as_bool(), Some(true));
    assert_eq!(
        v["configured"]["search"]["searxng_endpoints"].as_u64(),
        Some(0)
    );
    assert_eq!(
        v["configured"]["ollama"]["base_url_overridden"].as_bool(),
        Some(false)
    );
    let checks = v["checks"].as_array().expect("checks array");
    assert_eq!(checks.len(), 5);
    for c in checks {
        assert!(c["name"].is_string());
        assert!(c["ok"].is_boolean());
    }
}

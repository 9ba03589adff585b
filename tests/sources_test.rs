//! Integration tests that drive real source bindings from a config file
//!
//! These tests verify that:
//! - An HTTP source paginates until the first empty page
//! - Nested compressed archives stream through the pipeline
//! - Committed units are skipped by a second run over the same checkpoints

mod common;

use flate2::write::GzEncoder;
use flate2::Compression;
use mockito::Matcher;
use serde_json::{json, Value};
use sieve::config::parse_config;
use sieve::core::controller::RunController;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn write_policy(dir: &Path) -> String {
    let path = dir.join("policy.toml");
    std::fs::write(&path, common::POLICY).unwrap();
    path.display().to_string()
}

fn page(start: usize, count: usize) -> String {
    let rows: Vec<Value> = (start..start + count)
        .map(|i| json!({ "id": format!("W{i}"), "title": format!("Solar paper {i}") }))
        .collect();
    json!({ "results": rows }).to_string()
}

#[tokio::test]
async fn test_http_source_pages_237_records_in_four_calls() {
    let mut server = mockito::Server::new_async().await;
    let mut mocks = Vec::new();
    for (offset, body) in [
        ("0", page(0, 100)),
        ("100", page(100, 100)),
        ("200", page(200, 37)),
        ("237", page(0, 0)),
    ] {
        mocks.push(
            server
                .mock("GET", "/works")
                .match_query(Matcher::AllOf(vec![
                    Matcher::UrlEncoded("offset".into(), offset.into()),
                    Matcher::UrlEncoded("limit".into(), "100".into()),
                ]))
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(body)
                .expect(1)
                .create_async()
                .await,
        );
    }

    let dir = TempDir::new().unwrap();
    let config = parse_config(&format!(
        r#"
[source]
kind = "http"

[source.http]
base_url = "{url}/works"
page_size = 100
start_date = "2024-01-01"
end_date = "2024-02-01"
partition = "month"
timeout_seconds = 5

[classifier]
policy_path = "{policy}"

[destination]
kind = "memory"

[checkpoint]
directory = "{checkpoints}"

[run]
workers = 1
batch_size = 50
"#,
        url = server.url(),
        policy = write_policy(dir.path()),
        checkpoints = dir.path().join("checkpoints").display(),
    ))
    .unwrap();

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let controller = RunController::from_config(&config, rx.clone()).await.unwrap();
    let summary = controller.run().await.unwrap();

    assert!(summary.is_successful());
    assert_eq!(summary.units_total, 1);
    assert_eq!(summary.units_committed, 1);
    assert_eq!(summary.totals.records_fetched, 237);
    assert_eq!(summary.totals.records_written, 237);

    // Same checkpoint directory: nothing is fetched again
    let controller = RunController::from_config(&config, rx).await.unwrap();
    let summary = controller.run().await.unwrap();
    assert_eq!(summary.units_skipped, 1);
    assert_eq!(summary.totals.records_fetched, 0);

    for mock in mocks {
        mock.assert_async().await;
    }
}

fn write_jsonl_gz(path: &Path, lines: &[String]) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    for line in lines {
        writeln!(encoder, "{line}").unwrap();
    }
    encoder.finish().unwrap();
}

fn write_tar_gz(path: &Path, name: &str, data: &[u8]) {
    let file = std::fs::File::create(path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

#[tokio::test]
async fn test_archive_source_pipeline() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("archives");
    std::fs::create_dir_all(root.join("2024")).unwrap();

    let mut lines: Vec<String> = (0..5)
        .map(|i| json!({ "id": format!("A{i}"), "title": format!("Solar array {i}") }).to_string())
        .collect();
    lines.push("{ truncated".to_string());
    lines.push(json!({ "id": "A9", "title": "Wind turbines" }).to_string());
    write_jsonl_gz(&root.join("2024/a.jsonl.gz"), &lines);

    let document = json!([
        { "id": "B0", "title": "Solar forecasting" },
        { "id": "B1", "title": "Solar storage" },
        { "id": "A0", "title": "Solar array 0" }
    ]);
    write_tar_gz(
        &root.join("2024/b.tar.gz"),
        "works/b.json",
        document.to_string().as_bytes(),
    );

    let config = parse_config(&format!(
        r#"
[source]
kind = "archive"

[source.archive]
root = "{root}"

[classifier]
policy_path = "{policy}"

[destination]
kind = "memory"

[checkpoint]
directory = "{checkpoints}"

[run]
workers = 2
batch_size = 2
"#,
        root = root.display(),
        policy = write_policy(dir.path()),
        checkpoints = dir.path().join("checkpoints").display(),
    ))
    .unwrap();

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let controller = RunController::from_config(&config, rx).await.unwrap();
    let summary = controller.run().await.unwrap();

    assert_eq!(summary.units_total, 2);
    assert_eq!(summary.units_committed, 2);
    assert!(summary.failed_units.is_empty());
    assert_eq!(summary.totals.records_fetched, 9);
    assert_eq!(summary.totals.fetch_errors, 1);
    assert_eq!(summary.totals.rejected_by_stage.get("lexical"), Some(&1));
    assert_eq!(summary.totals.records_duplicate, 1);
    assert_eq!(summary.totals.records_written, 7);

    // One corrupt line in ten trips the default 1% fetch error gate
    assert!(summary.is_degraded());
    assert_eq!(summary.violations[0].gate, "max_fetch_error_rate");
}

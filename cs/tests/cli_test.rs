//! End-to-end tests for the `cs` binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cs(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cs").expect("cs binary should build");
    cmd.arg("--dir").arg(temp.path().join("store"));
    cmd.env("RUST_LOG", "error").env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_append_then_cat() {
    let temp = TempDir::new().unwrap();

    cs(&temp)
        .args(["append", "Big Buck Bunny", "open movie", "magnet:?xt=urn:btih:bbb"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Appended chunk 0"));

    cs(&temp)
        .args(["cat", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Big Buck Bunny"))
        .stdout(predicate::str::contains("magnet:?xt=urn:btih:bbb"));
}

#[test]
fn test_ingest_and_recent() {
    let temp = TempDir::new().unwrap();
    let jsonl = temp.path().join("items.jsonl");
    fs::write(
        &jsonl,
        concat!(
            "{\"name\":\"first\",\"description\":\"\",\"reference\":\"r1\"}\n",
            "not json\n",
            "\n",
            "{\"name\":\"second\",\"description\":\"d\",\"reference\":\"r2\"}\n",
        ),
    )
    .unwrap();

    cs(&temp)
        .arg("ingest")
        .arg(&jsonl)
        .assert()
        .success()
        .stdout(predicate::str::contains("Ingested 2 items (1 skipped)"));

    cs(&temp)
        .args(["recent", "-n", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("second"))
        .stdout(predicate::str::contains("first").not());
}

#[test]
fn test_stats_and_missing_chunk() {
    let temp = TempDir::new().unwrap();

    cs(&temp).args(["append", "a", "b", "c"]).assert().success();

    cs(&temp)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Chunks: 1"))
        .stdout(predicate::str::contains("Segments: 1"));

    cs(&temp)
        .args(["cat", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_append_rejects_long_name() {
    let temp = TempDir::new().unwrap();
    let name = "n".repeat(300);

    cs(&temp)
        .args(["append", &name, "d", "r"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("limit is 255"));
}

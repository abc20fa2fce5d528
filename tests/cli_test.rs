//! Command line interface tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("knolx-uploadr")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("upload"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("search-sessions"));
}

#[test]
fn test_missing_config_fails() {
    Command::cargo_bin("knolx-uploadr")
        .unwrap()
        .args(["--config", "/nonexistent/knolx.yaml", "resume", "5a1b2c3d"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_upload_requires_file_argument() {
    Command::cargo_bin("knolx-uploadr")
        .unwrap()
        .args(["upload", "5a1b2c3d"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("FILE"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_prints_pending_video_url() {
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/youtube/5a1b2c3d/temporary-url"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pending99"))
        .mount(&server)
        .await;

    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "portal:\n  base_url: \"{}\"\n  csrf_token: \"t\"", server.uri()).unwrap();
    let config_path = config.path().to_path_buf();

    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("knolx-uploadr")
            .unwrap()
            .arg("--config")
            .arg(&config_path)
            .args(["resume", "5a1b2c3d"])
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("www.youtube.com/embed/pending99"));
}

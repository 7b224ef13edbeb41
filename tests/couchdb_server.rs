// Lifecycle tests against a stand-in for the `couchdb` launcher: a shell
// script honouring `-b`, `-s` and `-d`, whose server is a wiremock instance.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use beyond_couchdb::{CouchDbConfig, CouchDbServer, ServerError};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LAUNCHER: &str = r#"#!/bin/sh
ini=""
pid=""
mode=""
while [ $# -gt 0 ]; do
  case "$1" in
    -a) ini="$2"; shift 2 ;;
    -p) pid="$2"; shift 2 ;;
    -o|-e) shift 2 ;;
    -b) mode=start; shift ;;
    -s) mode=status; shift ;;
    -d) mode=stop; shift ;;
    *) shift ;;
  esac
done
case "$mode" in
  start)
    echo $$ > "$pid"
    uri_file=$(sed -n 's/^uri_file = //p' "$ini")
    echo "@URI@" > "$uri_file"
    ;;
  status)
    @STATUS@
    ;;
  stop)
    echo stopped >> "$(dirname "$pid")/couchdb.stops"
    @STOP@
    ;;
esac
"#;

const READY: &str = "exit 0";
const NOT_RUNNING: &str = "exit 1";
const STOPS: &str = "exit 0";

fn write_launcher(dir: &Path, uri: &str, status: &str, stop: &str) -> PathBuf {
    let script = LAUNCHER
        .replace("@URI@", uri)
        .replace("@STATUS@", status)
        .replace("@STOP@", stop);
    let launcher = dir.join("couchdb");
    std::fs::write(&launcher, script).unwrap();
    std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();
    launcher
}

async fn welcoming_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "couchdb": "Welcome",
            "version": "1.6.1",
        })))
        .mount(&server)
        .await;
    server
}

fn config(launcher: PathBuf, directory: Option<PathBuf>) -> CouchDbConfig {
    CouchDbConfig::new(0, directory)
        .with_executable(launcher)
        .with_poll_interval(Duration::from_millis(10))
        .with_startup_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn start_and_stop_in_a_given_directory() {
    let http = welcoming_server().await;
    let bin = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let directory = data.path().join("db");
    let launcher = write_launcher(bin.path(), &http.uri(), READY, STOPS);

    let server = CouchDbServer::start(config(launcher, Some(directory.clone())))
        .await
        .unwrap();
    assert_eq!(server.uri(), http.uri());
    assert_eq!(server.directory(), directory.as_path());

    let ini = std::fs::read_to_string(directory.join("couchdb.ini")).unwrap();
    assert!(ini.contains(&format!("uri_file = {}/couchdb.uri", directory.display())));
    assert!(ini.contains("port = 0"));

    let welcome = server.client().welcome().await.unwrap();
    assert!(welcome.is_welcome());

    server.stop().await.unwrap();
    let stops = std::fs::read_to_string(directory.join("couchdb.stops")).unwrap();
    assert_eq!(stops.lines().count(), 1);
    assert!(directory.exists());
}

#[tokio::test]
async fn temporary_directory_is_removed_on_stop() {
    let http = welcoming_server().await;
    let bin = TempDir::new().unwrap();
    let launcher = write_launcher(bin.path(), &http.uri(), READY, STOPS);

    let server = CouchDbServer::start(config(launcher, None)).await.unwrap();
    let directory = server.directory().to_path_buf();
    assert!(directory.join("couchdb.pid").exists());

    server.stop().await.unwrap();
    assert!(!directory.exists());
}

#[tokio::test]
async fn stale_uri_file_is_replaced() {
    let http = welcoming_server().await;
    let bin = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    std::fs::write(data.path().join("couchdb.uri"), "http://127.0.0.1:1/\n").unwrap();
    let launcher = write_launcher(bin.path(), &http.uri(), READY, STOPS);

    let server = CouchDbServer::start(config(launcher, Some(data.path().to_path_buf())))
        .await
        .unwrap();
    assert_eq!(server.uri(), http.uri());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn status_never_ready_times_out_and_stops_the_server() {
    let bin = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let launcher = write_launcher(bin.path(), "http://127.0.0.1:1", NOT_RUNNING, STOPS);
    let config = config(launcher, Some(data.path().to_path_buf()))
        .with_startup_timeout(Duration::from_millis(100));

    let err = CouchDbServer::start(config).await.err().unwrap();
    match err {
        ServerError::Timeout { phase, .. } => assert_eq!(phase, "report running"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(data.path().join("couchdb.stops").exists());
}

#[tokio::test]
async fn hanging_status_command_is_cut_off_at_the_timeout() {
    let bin = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let launcher = write_launcher(bin.path(), "http://127.0.0.1:1", "sleep 3; exit 0", STOPS);
    let config = config(launcher, Some(data.path().to_path_buf()))
        .with_startup_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let err = CouchDbServer::start(config).await.err().unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "start took {:?}",
        started.elapsed()
    );
    match err {
        ServerError::Timeout { phase, .. } => assert_eq!(phase, "report running"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failed_stop_keeps_the_temporary_directory() {
    let http = welcoming_server().await;
    let bin = TempDir::new().unwrap();
    let launcher = write_launcher(bin.path(), &http.uri(), READY, "exit 1");

    let server = CouchDbServer::start(config(launcher, None)).await.unwrap();
    let directory = server.directory().to_path_buf();

    let err = server.stop().await.err().unwrap();
    assert!(matches!(err, ServerError::Command { .. }));

    // `stop` plus the retry on drop.
    let stops = std::fs::read_to_string(directory.join("couchdb.stops")).unwrap();
    assert_eq!(stops.lines().count(), 2);
    assert!(directory.join("couchdb.ini").exists());
    std::fs::remove_dir_all(&directory).unwrap();
}

#[tokio::test]
async fn missing_launcher_is_a_command_error() {
    let data = TempDir::new().unwrap();
    let config = config(
        PathBuf::from("/nonexistent/bin/couchdb"),
        Some(data.path().to_path_buf()),
    );

    let err = CouchDbServer::start(config).await.err().unwrap();
    match err {
        ServerError::Command { command, .. } => {
            assert!(command.starts_with("/nonexistent/bin/couchdb -a "));
            assert!(command.contains(" -b "));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(data.path().join("couchdb.ini").exists());
}

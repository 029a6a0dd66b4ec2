use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn pdfh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pdfh");
    path
}

/// Config using the offline hash embedder over `<tmp>/docs`.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("docs")).unwrap();
    fs::write(root.join("docs/notes.txt"), "not a pdf, ignored").unwrap();

    let config_content = format!(
        r#"[source]
root = "{root}/docs"

[chunking]
chunk_size = 200
overlap = 20

[embedding]
provider = "hash"
dims = 64

[index]
state_dir = "{root}/state"

[startup]
store_attempts = 2
store_backoff_ms = 10

[server]
bind = "127.0.0.1:0"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("pdfh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pdfh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pdfh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pdfh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_build_empty_source_dir() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pdfh(&config_path, &["build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records: 0"));
    assert!(stdout.contains("model: hash-64 (64 dims)"));
    assert!(tmp.path().join("state/metadata.sqlite").is_file());
    assert!(tmp.path().join("state/index.hnsw").is_file());
    assert!(tmp.path().join("state/index.json").is_file());
}

#[test]
fn test_status_before_and_after_build() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_pdfh(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("empty"), "got: {}", stdout);

    run_pdfh(&config_path, &["build"]);

    let (stdout, stderr, success) = run_pdfh(&config_path, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("State:       ready"), "got: {}", stdout);
    assert!(stdout.contains("Model:       hash-64"));
    assert!(stdout.contains("Records:     0"));
}

#[test]
fn test_status_reports_corrupt_index() {
    let (tmp, config_path) = setup_test_env();
    run_pdfh(&config_path, &["build"]);
    fs::write(tmp.path().join("state/index.hnsw"), b"garbage").unwrap();

    let (stdout, _, success) = run_pdfh(&config_path, &["status"]);
    assert!(!success);
    assert!(stdout.contains("unusable (corrupt_state)"), "got: {}", stdout);
}

#[test]
fn test_query_rebuilds_corrupt_index() {
    let (tmp, config_path) = setup_test_env();
    run_pdfh(&config_path, &["build"]);
    fs::write(tmp.path().join("state/index.hnsw"), b"garbage").unwrap();

    let (stdout, stderr, success) = run_pdfh(&config_path, &["query", "anything"]);
    assert!(success, "query failed: {}", stderr);
    assert!(stdout.contains("No results."));

    let (_, _, success) = run_pdfh(&config_path, &["status"]);
    assert!(success, "index should be valid again after the rebuild");
}

#[test]
fn test_corrupt_pdf_is_skipped() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("docs/bad.pdf"), b"not a valid pdf").unwrap();

    let (stdout, stderr, success) = run_pdfh(&config_path, &["build"]);
    assert!(success, "build failed: {}", stderr);
    assert!(stdout.contains("records: 0"));
    assert!(stderr.contains("skipping unparsable PDF"), "stderr: {}", stderr);
}

#[test]
fn test_missing_source_root_fails_build() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("docs")).unwrap();

    let (_, stderr, success) = run_pdfh(&config_path, &["build"]);
    assert!(!success);
    assert!(stderr.contains("source directory unavailable"), "stderr: {}", stderr);
}

#[test]
fn test_serve_exits_nonzero_on_fatal_init() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("docs")).unwrap();

    let (_, stderr, success) = run_pdfh(&config_path, &["serve", "--port", "0"]);
    assert!(!success);
    assert!(stderr.contains("index initialization failed"), "stderr: {}", stderr);
}

#[test]
fn test_query_rejects_zero_top_k() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_pdfh(&config_path, &["query", "x", "--top-k", "0"]);
    assert!(!success);
    assert!(stderr.contains("--top-k must be >= 1"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let config_path = tmp.path().join("config/bad.toml");
    fs::write(
        &config_path,
        format!(
            "[source]\nroot = \"{0}/docs\"\n[chunking]\nchunk_size = 10\noverlap = 10\n[index]\nstate_dir = \"{0}/state\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_pdfh(&config_path, &["build"]);
    assert!(!success);
    assert!(stderr.contains("configuration error"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_pdfh(&tmp.path().join("nope.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("failed to read config file"));
}

/// Address from the server's "listening on http://..." log line.
fn listening_addr(line: &str) -> Option<String> {
    let start = line.find("listening on http://")? + "listening on http://".len();
    let addr: String = line[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ':')
        .collect();
    (!addr.is_empty()).then_some(addr)
}

#[test]
fn test_serve_answers_queries_once_ready() {
    let (_tmp, config_path) = setup_test_env();

    let mut child = Command::new(pdfh_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(["serve", "--port", "0"])
        .env("RUST_LOG", "info")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start pdfh serve");

    let stderr = child.stderr.take().unwrap();
    let mut lines = BufReader::new(stderr).lines();
    let addr = lines
        .by_ref()
        .map_while(|line| line.ok())
        .find_map(|line| listening_addr(&line))
        .expect("server never reported its address");
    // Keep draining so the server never blocks on a full pipe.
    std::thread::spawn(move || lines.for_each(drop));

    let client = reqwest::blocking::Client::new();
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let health: serde_json::Value = client
            .get(format!("http://{}/health", addr))
            .send()
            .unwrap()
            .json()
            .unwrap();
        if health["status"] == "ok" {
            assert_eq!(health["records"], 0);
            break;
        }
        assert!(Instant::now() < deadline, "index never became ready");
        std::thread::sleep(Duration::from_millis(50));
    }

    let resp = client
        .post(format!("http://{}/query", addr))
        .json(&serde_json::json!({ "query": "anything" }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["results"], serde_json::json!([]));

    child.kill().unwrap();
    child.wait().unwrap();
}

//! End-to-end tests of the `trh` binary: init, master import, ingest and
//! the JSON gap report.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn trh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("trh");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    let docs = root.join("documents");
    fs::create_dir_all(&docs).unwrap();

    fs::write(
        docs.join("design.txt"),
        "Section 4. The braking controller implements REQ-001 by applying pressure \
         within two hundred milliseconds of the pedal signal.\n\n\
         Appendix: BUG-77 was observed while testing the emergency stop path on wet roads.",
    )
    .unwrap();
    fs::write(
        docs.join("tests.csv"),
        "case,covers\nTEST-1,REQ-001\nTEST-2,REQ-002\n",
    )
    .unwrap();
    fs::write(
        root.join("master.csv"),
        "req_id,description,category\n\
         REQ-001,Brake response time,Safety\n\
         REQ-002,Speed display\n\
         REQ-003,Door interlock\n",
    )
    .unwrap();

    let config_path = root.join("config/trh.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[db]
path = "{root}/data/trh.sqlite"

[ingest]
documents_dir = "{root}/documents"

[ocr]
enabled = false
"#,
            root = root.display()
        ),
    )
    .unwrap();

    (tmp, config_path)
}

fn run_trh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(trh_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run trh");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_trh(&config, &["init"]);
    assert!(ok);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/trh.sqlite").exists());

    let (_, stderr, ok) = run_trh(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_trh(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_import_then_audit_reports_gaps_and_orphans() {
    let (tmp, config) = setup_test_env();
    let master = tmp.path().join("master.csv");

    let (stdout, stderr, ok) = run_trh(&config, &["import-master", master.to_str().unwrap()]);
    assert!(ok, "import failed: {}", stderr);
    assert!(stdout.contains("Imported 3 requirements"));

    let (stdout, stderr, ok) = run_trh(&config, &["ingest", "--progress", "off"]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("2 seen, 2 new"));

    let (stdout, stderr, ok) = run_trh(&config, &["audit", "--page", "1"]);
    assert!(ok, "audit failed: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();

    assert_eq!(report["meta"]["page"], 1);
    assert_eq!(report["meta"]["total_master"], 3);
    assert_eq!(report["meta"]["traceability_score"], 66.67);

    let gaps: Vec<&str> = report["gaps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["req_id"].as_str().unwrap())
        .collect();
    assert_eq!(gaps, vec!["REQ-003"]);

    let covered = &report["coverage"][0];
    assert_eq!(covered["req_id"], "REQ-001");
    assert_eq!(covered["status"], "COVERED");
    assert_eq!(
        covered["found_in"],
        serde_json::json!(["design.txt", "tests.csv"])
    );

    let orphans: Vec<&str> = report["orphans"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["req_id"].as_str().unwrap())
        .collect();
    assert!(orphans.contains(&"BUG-77"));
    assert!(orphans.contains(&"TEST-1"));
    assert!(!orphans.contains(&"REQ-001"));
}

#[test]
fn test_ingest_emit_streams_json_lines() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_trh(&config, &["ingest", "--emit", "--progress", "json"]);
    assert!(ok, "ingest failed: {}", stderr);

    let chunks: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert!(chunk["page_content"].as_str().is_some_and(|s| !s.is_empty()));
        assert_eq!(chunk["metadata"]["chunk_hash"].as_str().unwrap().len(), 64);
        assert!(chunk["metadata"]["source"].is_string());
    }
    assert!(chunks.iter().any(|c| c["metadata"]["type"] == "table"));
    assert!(stderr.contains("\"phase\":\"file\""));
}

#[test]
fn test_rescan_reports_unchanged_files() {
    let (_tmp, config) = setup_test_env();
    assert!(run_trh(&config, &["ingest", "--progress", "off"]).2);
    let (stdout, _, ok) = run_trh(&config, &["ingest", "--progress", "off"]);
    assert!(ok);
    assert!(stdout.contains("0 new, 2 unchanged"));

    let (stdout, _, ok) = run_trh(&config, &["stats"]);
    assert!(ok);
    assert!(stdout.contains("Documents:     2"));
}

#[test]
fn test_log_and_doc_commands() {
    let (tmp, config) = setup_test_env();
    assert!(run_trh(&config, &["ingest", "--progress", "off"]).2);

    let (stdout, _, ok) = run_trh(&config, &["log", "--limit", "50"]);
    assert!(ok);
    assert!(stdout.contains("UPLOAD"));
    assert!(stdout.contains("REFRESH"));

    let bytes = fs::read(tmp.path().join("documents/design.txt")).unwrap();
    let hash = {
        use sha2::{Digest, Sha256};
        format!("{:x}", Sha256::digest(&bytes))
    };
    let (stdout, stderr, ok) = run_trh(&config, &["doc", &hash]);
    assert!(ok, "doc failed: {}", stderr);
    assert!(stdout.contains("design.txt"));
    assert!(stdout.contains("version:    1"));

    let (_, _, ok) = run_trh(&config, &["doc", "0000"]);
    assert!(!ok);
}

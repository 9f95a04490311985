//! End-to-end tests driving the `docmem` binary against a temporary
//! database with the offline `hash` embedding provider.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("src")).unwrap();

    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt covers cargo and crates.\n",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n",
    )
    .unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nNotes about deployment and infrastructure.\n",
    )
    .unwrap();
    fs::write(
        files_dir.join("src").join("lib.rs"),
        "pub fn deploy() -> bool {\n    true\n}\n",
    )
    .unwrap();
    fs::write(files_dir.join("image.bin"), [0u8, 1, 2, 3]).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/docmem.sqlite"

[chunking]
chunk_size = 400
chunk_overlap = 40

[embedding]
provider = "hash"
dims = 64

[server]
bind = "127.0.0.1:0"
"#,
        root.display()
    );

    let config_path = root.join("config").join("docmem.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn files_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .and_then(Path::parent)
        .unwrap()
        .join("files")
}

fn run_docmem(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_docmem"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run docmem binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn ingest_files(config_path: &Path, name: &str) -> String {
    let root = files_dir(config_path);
    let (stdout, stderr, success) =
        run_docmem(config_path, &["ingest", name, root.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docmem(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Database initialized"));
    assert!(!stdout.contains("Wrote"), "existing config must be kept");
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_docmem(&config_path, &["init"]);
    assert!(first, "first init failed");
    let (_, _, second) = run_docmem(&config_path, &["init"]);
    assert!(second, "second init failed");
}

#[test]
fn test_init_writes_sample_config() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("fresh").join("docmem.toml");
    // The sample points its database at ./data relative to the working dir.
    let output = Command::new(env!("CARGO_BIN_EXE_docmem"))
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&config_path)
        .arg("init")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "init failed: {}", stdout);
    assert!(stdout.contains("Wrote"));
    assert!(config_path.is_file());
    assert!(tmp.path().join("data").join("docmem.sqlite").is_file());
}

#[test]
fn test_scan_reports_unsupported() {
    let (_tmp, config_path) = setup_test_env();
    let root = files_dir(&config_path);

    let (stdout, _, success) = run_docmem(&config_path, &["scan", root.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("supported: 4"), "got: {}", stdout);
    assert!(stdout.contains(".bin: 1"), "got: {}", stdout);
}

#[test]
fn test_scan_without_config_uses_defaults() {
    let (tmp, config_path) = setup_test_env();
    let root = files_dir(&config_path);

    let (stdout, stderr, success) = run_docmem(
        &tmp.path().join("absent.toml"),
        &["scan", root.to_str().unwrap()],
    );
    assert!(success, "scan failed: {}", stderr);
    assert!(stdout.contains("supported: 4"), "got: {}", stdout);
}

#[test]
fn test_scan_rejects_malformed_config() {
    let (_tmp, config_path) = setup_test_env();
    let root = files_dir(&config_path);
    fs::write(&config_path, "[scan]\nmax_file_size_bytes = \"big\"\n").unwrap();

    let (_, stderr, success) = run_docmem(&config_path, &["scan", root.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to parse config file"), "got: {}", stderr);
}

#[test]
fn test_ingest_and_list() {
    let (_tmp, config_path) = setup_test_env();

    let stdout = ingest_files(&config_path, "handbook");
    assert!(stdout.contains("indexed files: 4"), "got: {}", stdout);
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_docmem(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("handbook"));
}

#[test]
fn test_reingest_replaces_chunks() {
    let (_tmp, config_path) = setup_test_env();

    ingest_files(&config_path, "handbook");
    let second = ingest_files(&config_path, "handbook");
    assert!(!second.contains("stale chunks removed: 0"), "got: {}", second);

    let (stdout, _, _) = run_docmem(&config_path, &["chunk-sets", "handbook"]);
    let sets = stdout
        .lines()
        .filter(|l| l.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .count();
    assert_eq!(sets, 1, "expected one chunk set, got: {}", stdout);
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    let root = files_dir(&config_path);

    let (stdout, _, success) = run_docmem(
        &config_path,
        &["ingest", "handbook", root.to_str().unwrap(), "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("dry-run"));

    let (stdout, _, _) = run_docmem(&config_path, &["list"]);
    assert!(stdout.contains("No knowledge bases."));
}

#[test]
fn test_search_finds_ingested_text() {
    let (_tmp, config_path) = setup_test_env();
    ingest_files(&config_path, "handbook");

    let (stdout, stderr, success) = run_docmem(
        &config_path,
        &["search", "alpha document about Rust programming", "--kb", "handbook"],
    );
    assert!(success, "search failed: {}", stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.contains("alpha.md"), "expected alpha.md first, got: {}", stdout);
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    ingest_files(&config_path, "handbook");

    let (first, _, _) = run_docmem(&config_path, &["search", "deployment"]);
    let (second, _, _) = run_docmem(&config_path, &["search", "deployment"]);
    let strip = |s: &str| {
        s.lines()
            .filter(|l| !l.ends_with(" ms"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(strip(&first), strip(&second));
}

#[test]
fn test_search_language_filter() {
    let (_tmp, config_path) = setup_test_env();
    ingest_files(&config_path, "handbook");

    let (stdout, _, success) = run_docmem(
        &config_path,
        &["search", "deploy", "--language", "rust", "--limit", "5"],
    );
    assert!(success);
    assert!(stdout.contains("src/lib.rs"));
    assert!(!stdout.contains(".md"), "non-rust result leaked: {}", stdout);
}

#[test]
fn test_search_unknown_kb_fails() {
    let (_tmp, config_path) = setup_test_env();
    ingest_files(&config_path, "handbook");

    let (_, stderr, success) = run_docmem(&config_path, &["search", "x", "--kb", "ghost"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    ingest_files(&config_path, "handbook");

    let (stdout, _, success) = run_docmem(&config_path, &["stats", "handbook"]);
    assert!(success);
    assert!(stdout.contains("files:       4"), "got: {}", stdout);
    assert!(stdout.contains("markdown"));
    assert!(stdout.contains("code"));
}

#[test]
fn test_rename_then_delete() {
    let (_tmp, config_path) = setup_test_env();
    ingest_files(&config_path, "handbook");

    let (stdout, stderr, success) =
        run_docmem(&config_path, &["rename", "handbook", "manual"]);
    assert!(success, "rename failed: {}", stderr);
    assert!(stdout.contains("rename handbook -> manual"));
    assert!(!stdout.contains("warning"));

    let (stdout, _, _) = run_docmem(&config_path, &["list"]);
    assert!(stdout.contains("manual"));
    assert!(!stdout.contains("handbook"));

    let (_, _, success) = run_docmem(&config_path, &["delete", "manual"]);
    assert!(success);
    let (stdout, _, _) = run_docmem(&config_path, &["list"]);
    assert!(stdout.contains("No knowledge bases."));
}

#[test]
fn test_rename_onto_existing_fails() {
    let (_tmp, config_path) = setup_test_env();
    ingest_files(&config_path, "one");
    ingest_files(&config_path, "two");

    let (_, stderr, success) = run_docmem(&config_path, &["rename", "one", "two"]);
    assert!(!success);
    assert!(stderr.contains("already exists"), "got: {}", stderr);
}

#[test]
fn test_delete_chunk_set() {
    let (_tmp, config_path) = setup_test_env();
    let stdout = ingest_files(&config_path, "handbook");
    let ts = stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("chunk set: "))
        .unwrap()
        .to_string();

    let (stdout, stderr, success) =
        run_docmem(&config_path, &["delete-chunk-set", "handbook", &ts]);
    assert!(success, "delete-chunk-set failed: {}", stderr);
    assert!(!stdout.contains("chunks removed: 0"), "got: {}", stdout);

    let (stdout, _, _) = run_docmem(&config_path, &["chunk-sets", "handbook"]);
    assert!(stdout.contains("No chunk sets."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docmem(&tmp.path().join("nope.toml"), &["list"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

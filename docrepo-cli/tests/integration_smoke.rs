//! Smoke tests for command wiring, run against the in-process memory store

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A `docrepo` invocation isolated from any .env files on the machine
fn docrepo(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("docrepo").unwrap();
    cmd.current_dir(home)
        .env("HOME", home)
        .env_remove("DOCREPO_CONFIG")
        .env_remove("DOCREPO_WRITE_URL")
        .env_remove("DOCREPO_READ_URL")
        .env_remove("DOCREPO_DATABASE")
        .env_remove("DOCREPO_SPLIT_READ_WRITE")
        .env_remove("DOCREPO_CONNECT_TIMEOUT_SECS")
        .env_remove("RUST_LOG");
    cmd
}

fn memory_store(home: &Path) -> Command {
    let mut cmd = docrepo(home);
    cmd.env("DOCREPO_WRITE_URL", "memory://primary")
        .env("DOCREPO_READ_URL", "memory://replica")
        .env("DOCREPO_DATABASE", "app");
    cmd
}

fn index_file(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("indexes.toml");
    std::fs::write(
        &path,
        r#"
[[indexes]]
name = "email_unique"
keys = [{ field = "email" }]
unique = true

[[indexes]]
name = "created_desc"
keys = [{ field = "created_at", order = "desc" }]
"#,
    )
    .unwrap();
    path
}

// === Help Output ===

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    docrepo(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ping"))
        .stdout(predicate::str::contains("indexes"))
        .stdout(predicate::str::contains("find"));
}

#[test]
fn test_indexes_sync_help() {
    let home = TempDir::new().unwrap();
    docrepo(home.path())
        .args(["indexes", "sync", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("TOML file declaring the desired indexes"));
}

// === Ping ===

#[test]
fn test_ping_reports_split_router() {
    let home = TempDir::new().unwrap();
    memory_store(home.path())
        .arg("ping")
        .assert()
        .success()
        .stdout(predicate::str::contains("database: app"))
        .stdout(predicate::str::contains("memory://replica"))
        .stdout(predicate::str::contains("split:    true"));
}

#[test]
fn test_ping_without_configuration_fails() {
    let home = TempDir::new().unwrap();
    docrepo(home.path())
        .arg("ping")
        .assert()
        .failure()
        .stderr(predicate::str::contains("write target is required"));
}

#[test]
fn test_ping_reads_config_file() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("docrepo.toml");
    std::fs::write(
        &path,
        "write_target = \"memory://primary\"\ndatabase_name = \"ledger\"\nsplit_read_write = false\n",
    )
    .unwrap();

    docrepo(home.path())
        .arg("--config")
        .arg(&path)
        .arg("ping")
        .assert()
        .success()
        .stdout(predicate::str::contains("database: ledger"))
        .stdout(predicate::str::contains("split:    false"));
}

#[test]
fn test_unsupported_scheme_names_the_side() {
    let home = TempDir::new().unwrap();
    docrepo(home.path())
        .env("DOCREPO_WRITE_URL", "postgres://db")
        .env("DOCREPO_DATABASE", "app")
        .arg("ping")
        .assert()
        .failure()
        .stderr(predicate::str::contains("write connection failed"));
}

// === Indexes ===

#[test]
fn test_indexes_plan_on_empty_collection() {
    let home = TempDir::new().unwrap();
    let file = index_file(&home);
    memory_store(home.path())
        .args(["indexes", "plan", "--collection", "users", "--file"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"to_create\""))
        .stdout(predicate::str::contains("created_desc"))
        .stdout(predicate::str::contains("email_unique"));
}

#[test]
fn test_indexes_sync_creates_declared_set() {
    let home = TempDir::new().unwrap();
    let file = index_file(&home);
    memory_store(home.path())
        .args(["indexes", "sync", "-c", "users", "-f"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created\""))
        .stdout(predicate::str::contains("email_unique"));
}

#[test]
fn test_invalid_index_file_fails_before_connecting() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("broken.toml");
    std::fs::write(&file, "[[indexes]]\nname = \"x\"\nkeys = [{ field = \"a\", order = \"up\" }]\n").unwrap();

    // No store configured: the error must come from the file, not the router
    docrepo(home.path())
        .args(["indexes", "plan", "-c", "users", "-f"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid index file"));
}

// === Queries ===

#[test]
fn test_count_empty_collection() {
    let home = TempDir::new().unwrap();
    memory_store(home.path())
        .args(["count", "--collection", "users", "--filter", r#"{"active": true}"#])
        .assert()
        .success()
        .stdout(predicate::str::diff("0\n"));
}

#[test]
fn test_find_reports_pagination_on_stderr() {
    let home = TempDir::new().unwrap();
    memory_store(home.path())
        .args(["find", "-c", "users", "--page", "0", "--limit", "500"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("page 1 of 0 (0 documents, 100 per page)"));
}

#[test]
fn test_find_rejects_zero_limit() {
    let home = TempDir::new().unwrap();
    memory_store(home.path())
        .args(["find", "-c", "users", "--limit", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("limit must be at least 1"));
}

#[test]
fn test_find_rejects_non_object_filter() {
    let home = TempDir::new().unwrap();
    memory_store(home.path())
        .args(["find", "-c", "users", "--filter", "[1]"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected a JSON object"));
}

//! CLI integration tests for dbschema-sync.
//!
//! These tests verify command-line argument parsing, help output,
//! exit codes for various error conditions, and a plan/migrate cycle
//! against an embedded database file.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;

/// Get a command for the dbschema-sync binary.
fn cmd() -> Command {
    Command::cargo_bin("dbschema-sync").unwrap()
}

const SCHEMA: &str = r#"
grains:
  - name: shop
    version: "1.0"
    tables:
      - name: orders
        columns:
          - { name: id, kind: integer, nullable: false, identity: true }
          - { name: title, kind: string, length: 50 }
        primary_key: [id]
"#;

/// Write a config pointing at an embedded database plus a schema document.
fn write_project(dir: &Path, schema: &str) -> std::path::PathBuf {
    let schema_path = dir.join("schema.yaml");
    std::fs::write(&schema_path, schema).unwrap();
    let config_path = dir.join("config.yaml");
    let config = format!(
        "target:\n  type: embedded\n  path: {}\nschema:\n  path: {}\n",
        dir.join("target.db").display(),
        schema_path.display()
    );
    std::fs::write(&config_path, config).unwrap();
    config_path
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("validate-schema"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_migrate_subcommand_help() {
    cmd()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--force-initialize"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dbschema-sync"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_and_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  type: postgres").unwrap();
    writeln!(file, "schema:").unwrap();
    writeln!(file, "  path: schema.yaml").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_dialect_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  type: db2").unwrap();
    writeln!(file, "schema:").unwrap();
    writeln!(file, "  path: schema.yaml").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate-schema"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown database type"));
}

#[test]
fn test_invalid_schema_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_project(dir.path(), &SCHEMA.replace("primary_key: [id]", "primary_key: []"));

    cmd()
        .args(["--config", config.to_str().unwrap(), "validate-schema"])
        .assert()
        .code(1);
}

// =============================================================================
// Embedded Target Tests
// =============================================================================

#[test]
fn test_validate_schema_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_project(dir.path(), SCHEMA);

    cmd()
        .args(["--config", config.to_str().unwrap(), "--output-json", "validate-schema"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"))
        .stdout(predicate::str::contains("\"dialect\": \"embedded\""));
}

#[test]
fn test_health_check_embedded() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_project(dir.path(), SCHEMA);

    cmd()
        .args(["--config", config.to_str().unwrap(), "health-check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"))
        .stdout(predicate::str::contains("Registry: absent"));
}

#[test]
fn test_plan_then_migrate_then_plan() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_project(dir.path(), SCHEMA);
    let config = config.to_str().unwrap();

    cmd()
        .args(["--config", config, "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CREATE   table shop.orders"));

    cmd()
        .args(["--config", config, "migrate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Grains upgraded: 1"));

    cmd()
        .args(["--config", config, "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Database is up to date."));
}

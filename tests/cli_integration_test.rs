mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::test_helpers::*;

fn run_cli(workspace: &TestWorkspace, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_xml-validator"))
        .current_dir(workspace.temp_dir.path())
        .env("XDG_CONFIG_HOME", workspace.temp_dir.path())
        .arg("--cache-dir")
        .arg(workspace.cache_dir())
        .args(args)
        .output()
        .expect("Failed to execute command")
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_cli_help_output() {
    let output = Command::new(env!("CARGO_BIN_EXE_xml-validator"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("--mode"));
    assert!(stdout.contains("--schema"));
    assert!(stdout.contains("--cache-dir"));
    assert!(stdout.contains("--format"));
}

#[test]
fn test_cli_requires_files() {
    let output = Command::new(env!("CARGO_BIN_EXE_xml-validator"))
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
}

#[test]
fn test_cli_valid_document_exits_zero() {
    let workspace = TestWorkspace::new();
    workspace.write("note.dtd", NOTE_DTD);
    let doc = workspace.write("note.xml", &valid_note("note.dtd"));

    let output = run_cli(&workspace, &[arg(&doc)]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("1 document: 0 errors"));
}

#[test]
fn test_cli_invalid_document_exits_one() {
    let workspace = TestWorkspace::new();
    workspace.write("catalog.xsd", CATALOG_XSD);
    let doc = workspace.write("catalog.xml", &catalog_missing_id("catalog.xsd"));

    let output = run_cli(&workspace, &["--mode", "schema", arg(&doc)]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains(&format!("{}:12:", doc.display())));
    assert!(stdout.contains("error:"));
}

#[test]
fn test_cli_missing_document_exits_two() {
    let workspace = TestWorkspace::new();
    let good = workspace.write("ok.xml", "<ok/>");
    let missing = workspace.docs_dir().join("missing.xml");

    let output = run_cli(&workspace, &["--mode", "none", arg(&good), arg(&missing)]);
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("failure:"));
}

#[test]
fn test_cli_json_output() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("catalog.xsd", CATALOG_XSD);
    let good = workspace.write("good.xml", "<catalog><item id=\"a\">x</item></catalog>");
    let bad = workspace.write("bad.xml", "<catalog>\n<item>x</item>\n</catalog>");

    let output = run_cli(
        &workspace,
        &["--format", "json", "--schema", arg(&schema), arg(&good), arg(&bad)],
    );
    assert_eq!(output.status.code(), Some(1));

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["file"], arg(&good));
    assert_eq!(reports[0]["diagnostics"].as_array().unwrap().len(), 0);
    assert_eq!(reports[1]["diagnostics"][0]["line"], 2);
    assert_eq!(reports[1]["diagnostics"][0]["warning"], false);
}

#[test]
fn test_cli_config_file_sets_output_format() {
    let workspace = TestWorkspace::new();
    let doc = workspace.write("ok.xml", "<ok/>");
    let config = workspace.temp_dir.path().join("xml-validator.toml");
    std::fs::write(&config, "[output]\nformat = \"json\"\n").unwrap();

    let output = run_cli(&workspace, &["--mode", "none", arg(&doc)]);
    assert_eq!(output.status.code(), Some(0));
    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(reports[0]["diagnostics"].as_array().unwrap().len(), 0);
}

//! Catalog files and configuration

use generation_status::config::{EngineConfig, ENV_CATALOG};
use generation_status::PhaseCatalog;
use std::io::Write;

const CATALOG_YAML: &str = r#"
---
phases:
  - key: intake
    label: Reading Input
    sub_steps:
      - { key: parse, label: Parsing, backend_step_id: parse_input }
  - key: review
    label: Human Review
    conditional: true
    sub_steps:
      - { key: wait, label: Waiting for reviewer, backend_step_id: human_review }
  - key: output
    label: Writing Output
    icon: pencil
    sub_steps:
      - { key: draft, label: Drafting, backend_step_id: draft_output }
      - { key: save, label: Saving, backend_step_id: save_output }
"#;

fn write_catalog(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_catalog_from_yaml_file() {
    let file = write_catalog(CATALOG_YAML);
    let catalog = PhaseCatalog::load(file.path()).unwrap();

    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.first_backend_step(), Some("parse_input"));
    assert_eq!(catalog.conditional_phase().map(|p| p.key.as_str()), Some("review"));
    assert!(catalog.is_review_step("human_review"));
    assert_eq!(catalog.phases()[2].icon.as_deref(), Some("pencil"));
    assert_eq!(catalog.phases()[2].sub_steps.len(), 2);
}

#[test]
fn test_invalid_catalog_file_reports_path() {
    let file = write_catalog(
        r#"
phases:
  - key: a
    label: A
    sub_steps:
      - { key: x, label: X, backend_step_id: shared }
  - key: b
    label: B
    sub_steps:
      - { key: y, label: Y, backend_step_id: shared }
"#,
    );

    let err = PhaseCatalog::load(file.path()).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("shared"), "{}", message);
    assert!(message.contains(&file.path().display().to_string()), "{}", message);
}

#[test]
fn test_malformed_yaml_is_rejected() {
    let file = write_catalog("phases: [not, a, phase]");
    assert!(PhaseCatalog::load(file.path()).is_err());
}

#[test]
fn test_missing_catalog_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(PhaseCatalog::load(&dir.path().join("missing.yaml")).is_err());
}

#[test]
fn test_config_loads_configured_catalog() {
    let file = write_catalog(CATALOG_YAML);
    let path = file.path().display().to_string();

    let config = EngineConfig::from_lookup(|key| (key == ENV_CATALOG).then(|| path.clone())).unwrap();
    let catalog = config.load_catalog().unwrap();
    assert_eq!(catalog.first_backend_step(), Some("parse_input"));
}

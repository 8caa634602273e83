//! Tests for config file loading.

use std::io::Write;

use parley::config::{ParleyConfig, DEFAULT_MODEL};
use parley::error::{ErrorCategory, ParleyError};

#[test]
fn loads_toml_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
model = "anthropic/claude-3.7-sonnet"
system_prompt = "You are a careful shell assistant."
max_tool_retries = 3
base_url = "http://localhost:1234/v1"
"#
    )
    .unwrap();

    let config = ParleyConfig::load_file(file.path()).unwrap();
    assert_eq!(config.model_id(), "anthropic/claude-3.7-sonnet");
    assert_eq!(config.max_tool_retries, Some(3));
    assert_eq!(config.debug, None);
    assert!(!config.session_config().debug_events);

    let session = config.session_config();
    assert_eq!(session.max_tool_retries, 3);
    assert_eq!(
        session.system_prompt.as_deref(),
        Some("You are a careful shell assistant.")
    );
}

#[test]
fn invalid_config_file_is_a_configuration_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "max_tool_retries = \"lots\"").unwrap();

    let err = ParleyConfig::load_file(file.path()).unwrap_err();
    assert!(matches!(err, ParleyError::ConfigFile(_)));
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ParleyConfig::load_file(&dir.path().join("config.toml")).unwrap_err();
    assert!(matches!(err, ParleyError::Io(_)));
}

#[test]
fn empty_config_uses_default_model() {
    assert_eq!(ParleyConfig::default().model_id(), DEFAULT_MODEL);
}

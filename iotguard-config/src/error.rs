//! Why a configuration could not be produced.

use std::fmt::Write;
use std::path::PathBuf;

use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid configuration:\n{}", describe(.0))]
    Validation(#[source] ValidationErrors),

    /// YAML syntax errors, type mismatches and bad `IOTGUARD_*` values.
    #[error("Cannot read configuration: {0}")]
    Parsing(#[from] Box<figment::Error>),
}

/// One line per offending field, e.g. `monitor.poll_interval_secs: range`.
fn describe(errors: &ValidationErrors) -> String {
    let mut out = String::new();
    collect(errors, "", &mut out);
    out
}

fn collect(errors: &ValidationErrors, prefix: &str, out: &mut String) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(problems) => {
                for problem in problems {
                    let reason = problem.message.as_deref().unwrap_or(&problem.code);
                    let _ = writeln!(out, "  {path}: {reason}");
                }
            }
            ValidationErrorsKind::Struct(inner) => collect(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect(inner, &format!("{path}[{index}]"), out);
                }
            }
        }
    }
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Validation(errors)
    }
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Parsing(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IotGuardConfig, PreventionConfig};
    use validator::Validate;

    #[test]
    fn validation_message_names_the_field() {
        let config = PreventionConfig {
            command_timeout_secs: 0,
            ..PreventionConfig::default()
        };
        let err = ConfigError::from(config.validate().unwrap_err());
        let text = err.to_string();
        assert!(text.starts_with("Invalid configuration:"));
        assert!(text.contains("command_timeout_secs: range"));
    }

    #[test]
    fn nested_sections_are_prefixed() {
        let mut config = IotGuardConfig::default();
        config.monitor.poll_interval_secs = 0;
        let err = ConfigError::from(config.validate().unwrap_err());
        assert!(err.to_string().contains("monitor.poll_interval_secs: range"));
    }
}

//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

lazy_static! {
    static ref INTERFACE_RE: Regex = Regex::new("^[a-zA-Z0-9_.-]+$").expect("static regex");
    static ref SCOPE_RE: Regex = Regex::new("^(global|per_device)$").expect("static regex");
}

/// Validate that an interface name follows kernel naming limits.
pub fn validate_interface(name: &str) -> Result<(), ValidationError> {
    if !name.is_empty() && name.len() <= 15 && INTERFACE_RE.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_interface"))
    }
}

/// Validate shaper scope.
pub fn validate_scope(scope: &str) -> Result<(), ValidationError> {
    if SCOPE_RE.is_match(scope) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_shaper_scope"))
    }
}

/// Validate that an argv template has a program and no blank arguments.
pub fn validate_command(argv: &[String]) -> Result<(), ValidationError> {
    if argv.is_empty() || argv.iter().any(|arg| arg.trim().is_empty()) {
        return Err(ValidationError::new("invalid_command"));
    }
    Ok(())
}

/// Validate that the apply command actually carries the rate limit.
pub fn validate_apply_command(argv: &[String]) -> Result<(), ValidationError> {
    validate_command(argv)?;
    if argv.iter().any(|arg| arg.contains("{rate}")) {
        Ok(())
    } else {
        Err(ValidationError::new("apply_command_missing_rate"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_names() {
        assert!(validate_interface("bridge100").is_ok());
        assert!(validate_interface("eth0.10").is_ok());
        assert!(validate_interface("").is_err());
        assert!(validate_interface("this-name-is-far-too-long").is_err());
        assert!(validate_interface("eth0; rm").is_err());
    }

    #[test]
    fn apply_command_requires_rate_placeholder() {
        let ok = vec!["dnctl".to_string(), "bw={rate}KByte/s".to_string()];
        let missing = vec!["dnctl".to_string(), "flush".to_string()];
        assert!(validate_apply_command(&ok).is_ok());
        assert!(validate_apply_command(&missing).is_err());
        assert!(validate_command(&[]).is_err());
    }
}

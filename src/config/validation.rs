//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, port valid)
//! - Check that path credentials exist before a connect is attempted
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure apart from path existence checks

use crate::config::schema::TransportConfig;
use crate::net::credentials::CredentialSource;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

fn check_credential(field: &'static str, reference: &str, errors: &mut Vec<ValidationError>) {
    if reference.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be empty"));
        return;
    }
    if let CredentialSource::Path(path) = CredentialSource::resolve(reference) {
        if !path.exists() {
            errors.push(ValidationError::new(
                field,
                format!("file not found: {}", path.display()),
            ));
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.endpoint.host.trim().is_empty() {
        errors.push(ValidationError::new("endpoint.host", "must not be empty"));
    }
    if config.endpoint.port == 0 {
        errors.push(ValidationError::new("endpoint.port", "must be non-zero"));
    }

    check_credential("credentials.root_ca", &config.credentials.root_ca, &mut errors);
    check_credential("credentials.device_cert", &config.credentials.device_cert, &mut errors);
    check_credential(
        "credentials.device_private_key",
        &config.credentials.device_private_key,
        &mut errors,
    );

    if config.timeouts.read_ms == 0 {
        errors.push(ValidationError::new("timeouts.read_ms", "must be greater than zero"));
    }
    if config.timeouts.operation_ms == 0 {
        errors.push(ValidationError::new(
            "timeouts.operation_ms",
            "must be greater than zero",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
